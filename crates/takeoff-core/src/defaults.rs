//! Centralized default constants for the takeoff engine.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers. Every value here can be overridden through configuration.

// =============================================================================
// AGGREGATION
// =============================================================================

/// Sampled elements kept per pattern.
pub const SAMPLE_SIZE: usize = 5;

/// Values kept per dimension for percentile estimation.
///
/// Percentiles are exact for groups at or below this size.
pub const RESERVOIR_SIZE: usize = 1024;

/// Elements pulled per chunk in parallel aggregation.
pub const CHUNK_SIZE: usize = 65_536;

/// Streaming mode: pushes without activity before a group is closed.
pub const STREAM_IDLE_WINDOW: u64 = 100_000;

/// Streaming mode: maximum open groups before the least recently active is emitted.
pub const STREAM_MAX_OPEN_GROUPS: usize = 250_000;

// =============================================================================
// PROMPT RENDERING
// =============================================================================

/// Hard cap on rendered prompt size in bytes.
pub const PROMPT_MAX_BYTES: usize = 2048;

/// Metadata values longer than this (in characters) are truncated.
pub const PROMPT_METADATA_VALUE_MAX_CHARS: usize = 80;

// =============================================================================
// CACHE
// =============================================================================

/// L1 in-process cache capacity (entries).
pub const L1_CAPACITY: usize = 50_000;

/// L1 shard count.
pub const L1_SHARDS: usize = 16;

/// L2 distributed cache TTL in seconds (24 hours).
pub const L2_TTL_SECS: u64 = 24 * 60 * 60;

/// L2 key prefix.
pub const L2_KEY_PREFIX: &str = "tk:suggestion:";

/// Default Redis URL.
pub const REDIS_URL: &str = "redis://localhost:6379";

/// L3 materialized view maximum age in seconds (6 hours).
pub const L3_MAX_AGE_SECS: u64 = 6 * 60 * 60;

/// L4 rendered prompt cache capacity (entries).
pub const L4_CAPACITY: usize = 50_000;

// =============================================================================
// ORCHESTRATION
// =============================================================================

/// Maximum concurrent classification workers per batch.
pub const MAX_CONCURRENT: usize = 8;

/// Timeout for one generation call in seconds.
pub const GEN_TIMEOUT_SECS: u64 = 30;

/// Default event bus broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// INFERENCE
// =============================================================================

/// Default Ollama base URL.
pub const OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Default generation model name (Ollama).
pub const GEN_MODEL: &str = "gpt-oss:20b";

// =============================================================================
// DATABASE
// =============================================================================

/// Default maximum number of pooled connections.
pub const DB_MAX_CONNECTIONS: u32 = 10;

/// Default connection acquire timeout in seconds.
pub const DB_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default idle connection timeout in seconds.
pub const DB_IDLE_TIMEOUT_SECS: u64 = 600;
