//! Core data models for takeoff.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::formula::Formula;

// =============================================================================
// ELEMENT TYPES
// =============================================================================

/// Sentinel token for pattern key fields that are absent on the element.
pub const UNSET: &str = "<unset>";

/// A numeric dimension tracked on BIM elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    LengthMm,
    WidthMm,
    HeightMm,
    DiameterMm,
}

impl Dimension {
    /// All dimensions in canonical order.
    pub const ALL: [Dimension; 4] = [
        Dimension::LengthMm,
        Dimension::WidthMm,
        Dimension::HeightMm,
        Dimension::DiameterMm,
    ];

    /// Canonical snake_case field name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LengthMm => "length_mm",
            Self::WidthMm => "width_mm",
            Self::HeightMm => "height_mm",
            Self::DiameterMm => "diameter_mm",
        }
    }

    /// Resolve an identifier used in quantity formulas.
    ///
    /// Accepts both the snake_case field name and the camelCase spelling
    /// (`length_mm` / `lengthMm`).
    pub fn from_identifier(ident: &str) -> Option<Self> {
        match ident {
            "length_mm" | "lengthMm" => Some(Self::LengthMm),
            "width_mm" | "widthMm" => Some(Self::WidthMm),
            "height_mm" | "heightMm" => Some(Self::HeightMm),
            "diameter_mm" | "diameterMm" => Some(Self::DiameterMm),
            _ => None,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Measured dimensions of an element, all in millimetres.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length_mm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width_mm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height_mm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diameter_mm: Option<f64>,
}

impl Dimensions {
    /// Value of one dimension. Non-finite values are treated as absent.
    pub fn get(&self, dimension: Dimension) -> Option<f64> {
        let value = match dimension {
            Dimension::LengthMm => self.length_mm,
            Dimension::WidthMm => self.width_mm,
            Dimension::HeightMm => self.height_mm,
            Dimension::DiameterMm => self.diameter_mm,
        };
        value.filter(|v| v.is_finite())
    }
}

/// Read-only snapshot of a BIM element as delivered by the element store.
///
/// `category` is the only required field. It is optional in the type so
/// that malformed records can be counted and skipped instead of failing
/// the whole batch at parse time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementView {
    pub id: Uuid,
    pub external_id: String,
    pub project_id: Uuid,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default, rename = "type")]
    pub element_type: Option<String>,
    #[serde(default)]
    pub spec: Option<String>,
    #[serde(default)]
    pub location_type: Option<String>,
    #[serde(default)]
    pub material: Option<String>,
    #[serde(default)]
    pub dimensions: Dimensions,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ElementView {
    /// Pattern key of this element, or `None` if the element has no category.
    pub fn pattern_key(&self) -> Option<PatternKey> {
        PatternKey::from_element(self)
    }
}

// =============================================================================
// PATTERN TYPES
// =============================================================================

/// Normalize one pattern key component: trim, lower-case, map absent or
/// blank values to [`UNSET`].
pub fn normalize_component(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_lowercase(),
        _ => UNSET.to_string(),
    }
}

/// Normalized grouping key. Elements with equal keys belong to the same pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatternKey {
    pub category: String,
    pub family: String,
    #[serde(rename = "type")]
    pub element_type: String,
    pub material: String,
    pub location_type: String,
}

impl PatternKey {
    /// Build a key from raw (unnormalized) components.
    pub fn new(
        category: Option<&str>,
        family: Option<&str>,
        element_type: Option<&str>,
        material: Option<&str>,
        location_type: Option<&str>,
    ) -> Self {
        Self {
            category: normalize_component(category),
            family: normalize_component(family),
            element_type: normalize_component(element_type),
            material: normalize_component(material),
            location_type: normalize_component(location_type),
        }
    }

    /// Key for an element; `None` when the required category is missing or blank.
    pub fn from_element(element: &ElementView) -> Option<Self> {
        let category = element.category.as_deref().map(str::trim)?;
        if category.is_empty() {
            return None;
        }
        Some(Self::new(
            Some(category),
            element.family.as_deref(),
            element.element_type.as_deref(),
            element.material.as_deref(),
            element.location_type.as_deref(),
        ))
    }

    /// Named fields in canonical order.
    pub fn fields(&self) -> [(&'static str, &str); 5] {
        [
            ("category", &self.category),
            ("family", &self.family),
            ("type", &self.element_type),
            ("material", &self.material),
            ("location", &self.location_type),
        ]
    }

    /// Stable fingerprint: first 128 bits of SHA-256 over the normalized
    /// fields joined by the ASCII unit separator, hex encoded.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (i, (_, value)) in self.fields().iter().enumerate() {
            if i > 0 {
                hasher.update([0x1f]);
            }
            hasher.update(value.as_bytes());
        }
        let hash = hex::encode(hasher.finalize());
        hash[..32].to_string()
    }
}

/// Summary statistics for one numeric dimension within a pattern.
///
/// `count` is the number of elements carrying the dimension, not the
/// pattern's element count. When `count == 0` every other field is `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionStatistics {
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    /// Population standard deviation.
    pub stddev: Option<f64>,
    pub p50: Option<f64>,
    pub p95: Option<f64>,
}

impl DimensionStatistics {
    /// Statistics for a dimension no element carries.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// One sampled element of a pattern, kept for prompt context and audit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatternSample {
    pub element_id: Uuid,
    pub external_id: String,
}

/// Aggregate over all elements sharing a [`PatternKey`].
///
/// Immutable once built; the next aggregation run supersedes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub fingerprint: String,
    pub key: PatternKey,
    pub element_count: u64,
    /// Lowest-id elements of the group, at most the configured sample size.
    pub samples: Vec<PatternSample>,
    pub dimension_stats: BTreeMap<Dimension, DimensionStatistics>,
    /// Metadata of the lowest-id element in the group.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub aggregated_at: DateTime<Utc>,
}

impl Pattern {
    /// Statistics for one dimension (`count: 0` if never observed).
    pub fn stats(&self, dimension: Dimension) -> DimensionStatistics {
        self.dimension_stats
            .get(&dimension)
            .copied()
            .unwrap_or_default()
    }

    /// Ids of the sampled elements.
    pub fn sample_element_ids(&self) -> Vec<Uuid> {
        self.samples.iter().map(|s| s.element_id).collect()
    }

    /// Stable hash over everything except `aggregated_at`.
    ///
    /// Two aggregation passes over unchanged data yield the same digest.
    pub fn stats_digest(&self) -> String {
        let content = serde_json::json!({
            "fingerprint": self.fingerprint,
            "element_count": self.element_count,
            "samples": self.samples,
            "dimension_stats": self.dimension_stats,
            "metadata": self.metadata,
        });
        let mut hasher = Sha256::new();
        hasher.update(content.to_string().as_bytes());
        let hash = hex::encode(hasher.finalize());
        hash[..16].to_string()
    }
}

/// Result of one aggregation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregationOutcome {
    pub patterns: Vec<Pattern>,
    /// Elements consumed, including skipped ones.
    pub total_count: u64,
    /// Malformed elements that were skipped.
    pub skipped_count: u64,
}

impl AggregationOutcome {
    /// Elements that contributed to a pattern.
    pub fn valid_count(&self) -> u64 {
        self.total_count - self.skipped_count
    }
}

// =============================================================================
// CACHE TYPES
// =============================================================================

/// One tier of the cache hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheTier {
    /// In-process LRU.
    L1,
    /// Distributed TTL cache.
    L2,
    /// Materialized aggregate view.
    L3,
    /// Rendered prompt cache.
    L4,
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::L1 => write!(f, "L1"),
            Self::L2 => write!(f, "L2"),
            Self::L3 => write!(f, "L3"),
            Self::L4 => write!(f, "L4"),
        }
    }
}

/// Tier that answered a resolve request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HitTier {
    L1,
    L2,
    L3,
    L4,
    Miss,
}

impl From<CacheTier> for HitTier {
    fn from(tier: CacheTier) -> Self {
        match tier {
            CacheTier::L1 => Self::L1,
            CacheTier::L2 => Self::L2,
            CacheTier::L3 => Self::L3,
            CacheTier::L4 => Self::L4,
        }
    }
}

impl fmt::Display for HitTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::L1 => write!(f, "L1"),
            Self::L2 => write!(f, "L2"),
            Self::L3 => write!(f, "L3"),
            Self::L4 => write!(f, "L4"),
            Self::Miss => write!(f, "miss"),
        }
    }
}

// =============================================================================
// SUGGESTION TYPES
// =============================================================================

/// Review status of a classification suggestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl SuggestionStatus {
    /// Approved and Rejected are terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for SuggestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SuggestionStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("Invalid suggestion status: {}", s)),
        }
    }
}

/// Secondary commodity/pricing entry derived from a primary classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DerivedItemSuggestion {
    pub derived_commodity_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_pricing_code: Option<String>,
    /// Arithmetic expression over dimension fields, e.g. `length_mm * diameter_mm`.
    pub quantity_formula: String,
    pub quantity_unit: String,
}

impl DerivedItemSuggestion {
    /// Evaluate the quantity formula against one element's dimensions.
    ///
    /// Returns `None` if the formula does not parse, references a dimension
    /// the element lacks, or divides by zero.
    pub fn evaluate(&self, dimensions: &Dimensions) -> Option<f64> {
        Formula::parse(&self.quantity_formula)
            .ok()?
            .evaluate(dimensions)
    }
}

/// Advisory classification for a pattern, subject to human review.
///
/// Codes and derived items never change after creation; a correction is a
/// new suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationSuggestion {
    pub id: Uuid,
    pub pattern_fingerprint: Option<String>,
    pub suggested_commodity_code: Option<String>,
    pub suggested_pricing_code: Option<String>,
    pub derived_items: Vec<DerivedItemSuggestion>,
    pub reasoning_summary: String,
    pub status: SuggestionStatus,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<String>,
    /// Reviewer note (the rejection reason for rejected suggestions).
    pub review_note: Option<String>,
}

/// Request for creating a new suggestion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSuggestion {
    pub pattern_fingerprint: Option<String>,
    pub suggested_commodity_code: Option<String>,
    pub suggested_pricing_code: Option<String>,
    pub derived_items: Vec<DerivedItemSuggestion>,
    pub reasoning_summary: String,
}

/// Review outcome persisted on a suggestion.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewRecord {
    pub status: SuggestionStatus,
    pub reviewed_by: String,
    pub reviewed_at: DateTime<Utc>,
    pub note: Option<String>,
}
