//! Core traits for takeoff abstractions.
//!
//! These traits are the seams between the engine and its collaborators:
//! where elements come from, where suggestions are persisted, and which
//! model generates them. Each has an in-memory implementation for tests.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// ELEMENT STORE
// =============================================================================

/// Source of BIM elements, queried in aggregated form.
///
/// Implementations push grouping and statistics down to the storage layer
/// where possible instead of materializing every element client-side.
#[async_trait]
pub trait ElementStore: Send + Sync {
    /// Aggregate all elements (optionally of one project) into patterns.
    async fn aggregate_patterns(&self, project_id: Option<Uuid>) -> Result<AggregationOutcome>;
}

// =============================================================================
// SUGGESTION REPOSITORY
// =============================================================================

/// Persistence for classification suggestions.
///
/// The repository stores state; it does not enforce the approval workflow.
/// That lives in [`crate::lifecycle`] and the suggestion store service.
#[async_trait]
pub trait SuggestionRepository: Send + Sync {
    /// Insert a freshly created suggestion.
    async fn insert(&self, suggestion: &ClassificationSuggestion) -> Result<()>;

    /// Fetch a suggestion by ID.
    async fn get(&self, id: Uuid) -> Result<Option<ClassificationSuggestion>>;

    /// The pending suggestion for a fingerprint, if any.
    async fn find_pending(&self, fingerprint: &str) -> Result<Option<ClassificationSuggestion>>;

    /// All suggestions ever created for a fingerprint, oldest first.
    async fn list_for_fingerprint(&self, fingerprint: &str)
        -> Result<Vec<ClassificationSuggestion>>;

    /// Record a review outcome if the suggestion is still pending.
    ///
    /// Returns `false` when the suggestion was no longer pending (another
    /// reviewer got there first); the caller re-reads and re-evaluates.
    async fn record_review(&self, id: Uuid, review: &ReviewRecord) -> Result<bool>;
}

// =============================================================================
// GENERATION TRAITS
// =============================================================================

/// Backend for generating classification text from a rendered prompt.
///
/// Output is untrusted and must be validated before use.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate text given a prompt.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Generate text with system context.
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String>;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}
