//! PostgreSQL integration tests.
//!
//! Require a running database: set `DATABASE_URL` (or use the default test
//! URL) and run with `cargo test -p takeoff-db -- --ignored`.

use std::collections::BTreeMap;

use chrono::Utc;
use uuid::Uuid;

use takeoff_core::{
    lifecycle, Dimension, Dimensions, ElementStore, ElementView, NewSuggestion, ReviewRecord,
    SuggestionRepository, SuggestionStatus,
};
use takeoff_db::{Database, DEFAULT_TEST_DATABASE_URL};

async fn setup() -> Database {
    let _ = dotenvy::dotenv();
    let url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_TEST_DATABASE_URL.to_string());
    let db = Database::connect(&url).await.expect("connect test database");
    sqlx::migrate!("../../migrations")
        .run(db.pool())
        .await
        .expect("run migrations");
    db
}

fn duct(project_id: Uuid, location: &str, length: f64) -> ElementView {
    ElementView {
        id: Uuid::now_v7(),
        external_id: format!("D-{length}"),
        project_id,
        category: Some("Duct".to_string()),
        family: Some("Rectangular".to_string()),
        element_type: None,
        spec: None,
        location_type: Some(location.to_string()),
        material: Some("Galvanized".to_string()),
        dimensions: Dimensions {
            length_mm: Some(length),
            ..Default::default()
        },
        metadata: BTreeMap::from([("Mark".to_string(), "D".to_string())]),
    }
}

fn new_suggestion(fp: &str) -> NewSuggestion {
    NewSuggestion {
        pattern_fingerprint: Some(fp.to_string()),
        suggested_commodity_code: Some("23-31 13 11".to_string()),
        suggested_pricing_code: None,
        derived_items: vec![],
        reasoning_summary: "galvanized duct".to_string(),
    }
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_pushdown_groups_and_statistics() {
    let db = setup().await;
    let project = Uuid::now_v7();
    let mut elements = vec![
        duct(project, "Indoor", 1000.0),
        duct(project, "Indoor", 2000.0),
        duct(project, " indoor ", 3000.0),
        duct(project, "Outdoor", 1500.0),
        duct(project, "Outdoor", 2500.0),
    ];
    let mut orphan = duct(project, "Indoor", 1.0);
    orphan.category = Some("  ".to_string());
    elements.push(orphan);

    assert_eq!(db.elements.insert_many(&elements).await.unwrap(), 6);

    let outcome = db.elements.aggregate_patterns(Some(project)).await.unwrap();
    assert_eq!(outcome.total_count, 6);
    assert_eq!(outcome.skipped_count, 1);
    assert_eq!(outcome.patterns.len(), 2);

    let indoor = outcome
        .patterns
        .iter()
        .find(|p| p.key.location_type == "indoor")
        .unwrap();
    assert_eq!(indoor.element_count, 3);
    assert_eq!(indoor.samples.len(), 3);
    let length = indoor.stats(Dimension::LengthMm);
    assert_eq!(length.count, 3);
    assert_eq!(length.min, Some(1000.0));
    assert_eq!(length.max, Some(3000.0));
    assert_eq!(length.p50, Some(2000.0));
    assert_eq!(length.p95, Some(3000.0));
    assert_eq!(indoor.stats(Dimension::DiameterMm).count, 0);
    assert_eq!(indoor.metadata.get("Mark").map(String::as_str), Some("D"));
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_suggestion_roundtrip_and_cas_review() {
    let db = setup().await;
    let fp = format!("test-{}", Uuid::now_v7());
    let (suggestion, _) = lifecycle::create(Uuid::now_v7(), new_suggestion(&fp), Utc::now());
    db.suggestions.insert(&suggestion).await.unwrap();

    let pending = db.suggestions.find_pending(&fp).await.unwrap().unwrap();
    assert_eq!(pending.id, suggestion.id);

    let approve = ReviewRecord {
        status: SuggestionStatus::Approved,
        reviewed_by: "alice".to_string(),
        reviewed_at: Utc::now(),
        note: None,
    };
    assert!(db.suggestions.record_review(suggestion.id, &approve).await.unwrap());
    assert!(!db.suggestions.record_review(suggestion.id, &approve).await.unwrap());

    let stored = db.suggestions.get(suggestion.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SuggestionStatus::Approved);
    assert!(db.suggestions.find_pending(&fp).await.unwrap().is_none());
    assert_eq!(db.suggestions.list_for_fingerprint(&fp).await.unwrap().len(), 1);
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_second_pending_suggestion_is_rejected() {
    let db = setup().await;
    let fp = format!("test-{}", Uuid::now_v7());
    let (first, _) = lifecycle::create(Uuid::now_v7(), new_suggestion(&fp), Utc::now());
    let (second, _) = lifecycle::create(Uuid::now_v7(), new_suggestion(&fp), Utc::now());

    db.suggestions.insert(&first).await.unwrap();
    assert!(db.suggestions.insert(&second).await.is_err());
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_pool_has_idle_connections_after_setup() {
    let db = setup().await;
    let health = db.health();
    assert!(health.size >= 1);
    assert!(!health.is_saturated());
    assert_eq!(health.in_use(), 0);
}
