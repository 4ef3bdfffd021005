//! # takeoff-core
//!
//! Core types, traits, and abstractions for the takeoff classification engine.
//!
//! This crate provides the foundational data structures (element views,
//! patterns, classification suggestions), the suggestion approval state
//! machine, and the trait definitions that the aggregation, cache, storage
//! and orchestration crates depend on.

pub mod defaults;
pub mod error;
pub mod events;
pub mod formula;
pub mod lifecycle;
pub mod logging;
pub mod models;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{EventActor, EventBus, EventEnvelope, SuggestionEvent};
pub use formula::{Formula, FormulaError};
pub use lifecycle::{transition, ReviewCommand, Transition};
pub use models::*;
pub use traits::*;
pub use uuid_utils::new_v7;
