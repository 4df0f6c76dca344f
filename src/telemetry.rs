//! Telemetry metric name constants.
//!
//! Centralised metric names for huginn operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `huginn_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `model`: candidate model id (e.g. "gemini-1.5-flash")
//! - `operation`: "complete" or "complete_stream"
//! - `status`: outcome: "ok" or "error"
//! - `reason`: spam rejection reason

/// Total backend calls dispatched by the fallback chain.
///
/// Labels: `model`, `operation`, `status` ("ok" | "error").
pub const REQUESTS_TOTAL: &str = "huginn_requests_total";

/// Backend call duration in seconds.
///
/// Labels: `model`, `operation`.
pub const REQUEST_DURATION_SECONDS: &str = "huginn_request_duration_seconds";

/// Times the sticky index moved past a quota-exhausted candidate.
///
/// Labels: `model` (the candidate that was skipped).
pub const FALLBACK_ADVANCES_TOTAL: &str = "huginn_fallback_advances_total";

/// Total response cache hits.
pub const CACHE_HITS_TOTAL: &str = "huginn_cache_hits_total";

/// Total response cache misses.
pub const CACHE_MISSES_TOTAL: &str = "huginn_cache_misses_total";

/// Requests turned away by the per-client cooldown.
pub const RATE_LIMITED_TOTAL: &str = "huginn_rate_limited_total";

/// Messages rejected by the spam filter.
///
/// Labels: `reason` ("empty" | "too_long" | "low_diversity").
pub const SPAM_REJECTED_TOTAL: &str = "huginn_spam_rejected_total";
