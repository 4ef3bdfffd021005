//! Element store with grouping and statistics pushed down to PostgreSQL.

use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use tracing::{info, instrument};
use uuid::Uuid;

use takeoff_core::{
    defaults, AggregationOutcome, Dimension, DimensionStatistics, ElementStore, ElementView, Error,
    Pattern, PatternKey, PatternSample, Result, UNSET,
};

/// Normalized key column: ASCII-trimmed, lower-cased, blank → `<unset>`.
fn key_column(column: &str) -> String {
    format!(
        "COALESCE(NULLIF(lower(btrim({column}, E' \\t\\r\\n')), ''), '{unset}') AS {column}",
        unset = UNSET
    )
}

/// Dimension column with NaN and infinities nulled out.
fn dimension_column(column: &str) -> String {
    format!(
        "CASE WHEN {column} IN ('NaN'::float8, 'Infinity'::float8, '-Infinity'::float8) \
         THEN NULL ELSE {column} END AS {column}"
    )
}

fn dimension_aggregates(column: &str) -> String {
    format!(
        "count({column}) AS {column}_count, \
         min({column}) AS {column}_min, \
         max({column}) AS {column}_max, \
         avg({column}) AS {column}_mean, \
         stddev_pop({column}) AS {column}_stddev, \
         percentile_disc(0.5) WITHIN GROUP (ORDER BY {column}) AS {column}_p50, \
         percentile_disc(0.95) WITHIN GROUP (ORDER BY {column}) AS {column}_p95"
    )
}

fn pattern_query() -> String {
    let key_columns = ["category", "family", "element_type", "material", "location_type"]
        .map(key_column)
        .join(", ");
    let dimension_columns = Dimension::ALL
        .map(|d| dimension_column(d.as_str()))
        .join(", ");
    let aggregates = Dimension::ALL
        .map(|d| dimension_aggregates(d.as_str()))
        .join(",\n       ");

    format!(
        "WITH e AS (
    SELECT id, external_id, metadata, {key_columns}, {dimension_columns}
    FROM bim_element
    WHERE ($1::uuid IS NULL OR project_id = $1)
      AND NULLIF(btrim(category, E' \\t\\r\\n'), '') IS NOT NULL
)
SELECT category, family, element_type, material, location_type,
       count(*) AS element_count,
       (array_agg(id ORDER BY id))[1:$2] AS sample_ids,
       (array_agg(external_id ORDER BY id))[1:$2] AS sample_external_ids,
       (array_agg(metadata ORDER BY id))[1] AS metadata,
       {aggregates}
FROM e
GROUP BY category, family, element_type, material, location_type"
    )
}

/// PostgreSQL implementation of [`ElementStore`].
///
/// Grouping, counts, moments and percentiles are computed by the database.
/// Percentiles use `percentile_disc`, the nearest-rank definition the
/// in-memory aggregator uses, so both stores agree on groups that fit in
/// the reservoir. Key normalization trims ASCII whitespace only.
#[derive(Clone)]
pub struct PgElementStore {
    pool: Pool<Postgres>,
    sample_size: usize,
}

impl PgElementStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            sample_size: defaults::SAMPLE_SIZE,
        }
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    /// Insert elements in one transaction. Existing ids are left untouched.
    pub async fn insert_many(&self, elements: &[ElementView]) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut inserted = 0;
        for element in elements {
            let metadata = serde_json::to_value(&element.metadata)?;
            let result = sqlx::query(
                "INSERT INTO bim_element
                    (id, external_id, project_id, category, family, element_type, spec,
                     location_type, material, length_mm, width_mm, height_mm, diameter_mm,
                     metadata)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(element.id)
            .bind(&element.external_id)
            .bind(element.project_id)
            .bind(&element.category)
            .bind(&element.family)
            .bind(&element.element_type)
            .bind(&element.spec)
            .bind(&element.location_type)
            .bind(&element.material)
            .bind(element.dimensions.length_mm)
            .bind(element.dimensions.width_mm)
            .bind(element.dimensions.height_mm)
            .bind(element.dimensions.diameter_mm)
            .bind(&metadata)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
            inserted += result.rows_affected();
        }
        tx.commit().await.map_err(Error::Database)?;
        Ok(inserted)
    }

    async fn counts(&self, project_id: Option<Uuid>) -> Result<(u64, u64)> {
        let row = sqlx::query(
            "SELECT count(*) AS total,
                    count(*) FILTER (
                        WHERE NULLIF(btrim(category, E' \\t\\r\\n'), '') IS NULL
                    ) AS skipped
             FROM bim_element
             WHERE ($1::uuid IS NULL OR project_id = $1)",
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        let total: i64 = row.get("total");
        let skipped: i64 = row.get("skipped");
        Ok((total as u64, skipped as u64))
    }

    fn parse_pattern(
        row: &sqlx::postgres::PgRow,
        aggregated_at: chrono::DateTime<Utc>,
    ) -> Pattern {
        let category: String = row.get("category");
        let family: String = row.get("family");
        let element_type: String = row.get("element_type");
        let material: String = row.get("material");
        let location_type: String = row.get("location_type");
        let key = PatternKey::new(
            Some(category.as_str()),
            Some(family.as_str()),
            Some(element_type.as_str()),
            Some(material.as_str()),
            Some(location_type.as_str()),
        );

        let ids: Vec<Uuid> = row.get("sample_ids");
        let external_ids: Vec<String> = row.get("sample_external_ids");
        let samples = ids
            .into_iter()
            .zip(external_ids)
            .map(|(element_id, external_id)| PatternSample {
                element_id,
                external_id,
            })
            .collect();

        let mut dimension_stats = BTreeMap::new();
        for dimension in Dimension::ALL {
            let col = dimension.as_str();
            let count: i64 = row.get(format!("{col}_count").as_str());
            let stats = if count == 0 {
                DimensionStatistics::empty()
            } else {
                DimensionStatistics {
                    count: count as u64,
                    min: row.get(format!("{col}_min").as_str()),
                    max: row.get(format!("{col}_max").as_str()),
                    mean: row.get(format!("{col}_mean").as_str()),
                    stddev: row.get(format!("{col}_stddev").as_str()),
                    p50: row.get(format!("{col}_p50").as_str()),
                    p95: row.get(format!("{col}_p95").as_str()),
                }
            };
            dimension_stats.insert(dimension, stats);
        }

        let metadata: Option<serde_json::Value> = row.get("metadata");
        let metadata = metadata.map(metadata_map).unwrap_or_default();
        let element_count: i64 = row.get("element_count");

        Pattern {
            fingerprint: key.fingerprint(),
            key,
            element_count: element_count as u64,
            samples,
            dimension_stats,
            metadata,
            aggregated_at,
        }
    }
}

/// Flatten a JSONB metadata object into string values.
fn metadata_map(value: serde_json::Value) -> BTreeMap<String, String> {
    match value {
        serde_json::Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| {
                let v = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, v)
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}

#[async_trait]
impl ElementStore for PgElementStore {
    #[instrument(skip(self), fields(subsystem = "db", component = "elements", op = "aggregate_patterns"))]
    async fn aggregate_patterns(&self, project_id: Option<Uuid>) -> Result<AggregationOutcome> {
        let start = Instant::now();
        let (total_count, skipped_count) = self.counts(project_id).await?;

        let rows = sqlx::query(&pattern_query())
            .bind(project_id)
            .bind(self.sample_size as i32)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let aggregated_at = Utc::now();
        let mut patterns = rows
            .iter()
            .map(|row| Self::parse_pattern(row, aggregated_at))
            .collect::<Vec<_>>();
        patterns.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));

        info!(
            element_count = total_count,
            skipped_count,
            pattern_count = patterns.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Pattern aggregation pushed down"
        );

        Ok(AggregationOutcome {
            patterns,
            total_count,
            skipped_count,
        })
    }
}
