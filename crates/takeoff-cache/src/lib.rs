//! # takeoff-cache
//!
//! Four cache tiers in front of suggestion generation:
//!
//! | Tier | Trait | Default type | Holds |
//! |------|-------|--------------|-------|
//! | L1 | [`LocalCache`] | [`InProcessCache`] | suggestions, sharded LRU |
//! | L2 | [`DistributedCache`] | [`RedisSuggestionCache`] / [`MemoryDistributedCache`] | suggestions, shared with TTL |
//! | L3 | [`PatternView`] | [`MaterializedPatternView`] | patterns from the last aggregation run |
//! | L4 | [`PromptCache`] | [`RenderedPromptCache`] | rendered prompts tagged by template version and stats digest |
//!
//! [`CacheHierarchy`] composes them from a [`CacheTiers`] set. L2 outages degrade to L1 + generation
//! and never surface as errors.

mod hierarchy;
pub mod l1;
pub mod l2;
pub mod l3;
pub mod l4;

pub use hierarchy::{
    CacheConfig, CacheHierarchy, CacheStats, CacheTiers, Resolution, WriteOutcome,
};
pub use l1::{InProcessCache, LocalCache};
pub use l2::{DistributedCache, MemoryDistributedCache, RedisSuggestionCache};
pub use l3::{MaterializedPatternView, PatternView};
pub use l4::{PromptCache, RenderedPromptCache};
