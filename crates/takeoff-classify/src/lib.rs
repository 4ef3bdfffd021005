//! # takeoff-classify
//!
//! Advisory classification of BIM element patterns.
//!
//! - [`SuggestionStore`]: creates suggestions and applies human review
//!   decisions (compare-and-set, idempotent repeats, events on the bus)
//! - [`ClassificationOrchestrator`]: resolves batches of fingerprints
//!   through the cache hierarchy and generates only on a full miss
//!
//! Nothing here writes authoritative BIM classifications; committing an
//! approved suggestion is left to the caller.

pub mod cancel;
pub mod orchestrator;
pub mod store;

pub use cancel::CancellationToken;
pub use orchestrator::{
    BatchItem, BatchReport, ClassificationOrchestrator, ClassificationSource, Classified,
    ItemError, OrchestratorConfig, Reviewed,
};
pub use store::SuggestionStore;
