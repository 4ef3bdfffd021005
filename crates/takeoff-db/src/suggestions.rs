//! Suggestion repository implementation.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use takeoff_core::{
    ClassificationSuggestion, DerivedItemSuggestion, Error, Result, ReviewRecord,
    SuggestionRepository, SuggestionStatus,
};

const SELECT_COLUMNS: &str = "id, pattern_fingerprint, suggested_commodity_code, \
     suggested_pricing_code, derived_items, reasoning_summary, status, created_at, \
     reviewed_at, reviewed_by, review_note";

/// SQLSTATE for unique_violation.
const UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL implementation of SuggestionRepository.
#[derive(Clone)]
pub struct PgSuggestionRepository {
    pool: Pool<Postgres>,
}

impl PgSuggestionRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Parse a suggestion row.
    fn parse_row(row: sqlx::postgres::PgRow) -> Result<ClassificationSuggestion> {
        let derived: serde_json::Value = row.get("derived_items");
        let derived_items: Vec<DerivedItemSuggestion> = serde_json::from_value(derived)?;
        let status: String = row.get("status");
        let status = status.parse::<SuggestionStatus>().map_err(Error::Internal)?;

        Ok(ClassificationSuggestion {
            id: row.get("id"),
            pattern_fingerprint: row.get("pattern_fingerprint"),
            suggested_commodity_code: row.get("suggested_commodity_code"),
            suggested_pricing_code: row.get("suggested_pricing_code"),
            derived_items,
            reasoning_summary: row.get("reasoning_summary"),
            status,
            created_at: row.get("created_at"),
            reviewed_at: row.get("reviewed_at"),
            reviewed_by: row.get("reviewed_by"),
            review_note: row.get("review_note"),
        })
    }
}

#[async_trait]
impl SuggestionRepository for PgSuggestionRepository {
    async fn insert(&self, suggestion: &ClassificationSuggestion) -> Result<()> {
        let derived = serde_json::to_value(&suggestion.derived_items)?;

        let result = sqlx::query(
            "INSERT INTO classification_suggestion
                (id, pattern_fingerprint, suggested_commodity_code, suggested_pricing_code,
                 derived_items, reasoning_summary, status, created_at,
                 reviewed_at, reviewed_by, review_note)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(suggestion.id)
        .bind(&suggestion.pattern_fingerprint)
        .bind(&suggestion.suggested_commodity_code)
        .bind(&suggestion.suggested_pricing_code)
        .bind(&derived)
        .bind(&suggestion.reasoning_summary)
        .bind(suggestion.status.as_str())
        .bind(suggestion.created_at)
        .bind(suggestion.reviewed_at)
        .bind(&suggestion.reviewed_by)
        .bind(&suggestion.review_note)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db))
                if db.code().as_deref() == Some(UNIQUE_VIOLATION) =>
            {
                Err(Error::InvalidInput(format!(
                    "a pending suggestion already exists for pattern {}",
                    suggestion.pattern_fingerprint.as_deref().unwrap_or("-")
                )))
            }
            Err(e) => Err(Error::Database(e)),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<ClassificationSuggestion>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM classification_suggestion WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_row).transpose()
    }

    async fn find_pending(&self, fingerprint: &str) -> Result<Option<ClassificationSuggestion>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM classification_suggestion
             WHERE pattern_fingerprint = $1 AND status = 'pending'
             ORDER BY created_at DESC
             LIMIT 1"
        ))
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_row).transpose()
    }

    async fn list_for_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Vec<ClassificationSuggestion>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM classification_suggestion
             WHERE pattern_fingerprint = $1
             ORDER BY created_at, id"
        ))
        .bind(fingerprint)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_row).collect()
    }

    async fn record_review(&self, id: Uuid, review: &ReviewRecord) -> Result<bool> {
        // Compare-and-set: only a pending row takes the review.
        let result = sqlx::query(
            "UPDATE classification_suggestion
             SET status = $2, reviewed_by = $3, reviewed_at = $4, review_note = $5
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(review.status.as_str())
        .bind(&review.reviewed_by)
        .bind(review.reviewed_at)
        .bind(&review.note)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let applied = result.rows_affected() == 1;
        debug!(
            subsystem = "db",
            component = "suggestions",
            op = "record_review",
            suggestion_id = %id,
            status = %review.status,
            applied,
            "Review persisted"
        );
        Ok(applied)
    }
}
