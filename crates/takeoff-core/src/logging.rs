//! Structured logging schema and field name constants for takeoff.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query by the same field names across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied (e.g. L2 down) |
//! | INFO  | Lifecycle events, aggregation runs, batch completions |
//! | DEBUG | Decision points, cache hits/misses, config choices |
//! | TRACE | Per-element iteration |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "aggregate", "cache", "db", "inference", "classify"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "l1", "l2_redis", "orchestrator", "suggestion_store", "ollama"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "aggregate", "resolve", "write_through", "classify_batch"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Pattern fingerprint being operated on.
pub const FINGERPRINT: &str = "fingerprint";

/// Suggestion UUID being operated on.
pub const SUGGESTION_ID: &str = "suggestion_id";

/// Reviewer performing an approval or rejection.
pub const REVIEWER: &str = "reviewer";

/// Cache tier involved.
pub const TIER: &str = "tier";

/// Tier that answered a resolve request.
pub const HIT_TIER: &str = "hit_tier";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of elements consumed by an aggregation pass.
pub const ELEMENT_COUNT: &str = "element_count";

/// Number of malformed elements skipped.
pub const SKIPPED_COUNT: &str = "skipped_count";

/// Number of patterns produced.
pub const PATTERN_COUNT: &str = "pattern_count";

/// Number of items in a classification batch.
pub const BATCH_SIZE: &str = "batch_size";

/// Byte length of a rendered prompt.
pub const PROMPT_LEN: &str = "prompt_len";

/// Byte length of a model response.
pub const RESPONSE_LEN: &str = "response_len";

// ─── Inference fields ──────────────────────────────────────────────────────

/// Model name used for generation.
pub const MODEL: &str = "model";

/// Prompt template version.
pub const TEMPLATE_VERSION: &str = "template_version";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Write completed on some tiers only.
pub const DEGRADED: &str = "degraded";
