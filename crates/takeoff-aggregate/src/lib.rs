//! # takeoff-aggregate
//!
//! Groups BIM elements into patterns by normalized key and computes
//! per-dimension summary statistics.
//!
//! Three modes share one accumulator core:
//!
//! - [`PatternAggregator::aggregate`]: single-threaded batch pass
//! - [`PatternAggregator::aggregate_parallel`]: chunked rayon fold/reduce
//! - [`StreamingAggregator`]: incremental, emits groups as they go idle

mod aggregator;
mod config;
mod group;
pub mod stats;
mod streaming;

pub use aggregator::PatternAggregator;
pub use config::AggregatorConfig;
pub use streaming::StreamingAggregator;
