//! Aggregator configuration.

use takeoff_core::defaults;

/// Tuning knobs shared by the batch and streaming aggregators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Sampled elements kept per pattern.
    pub sample_size: usize,
    /// Values kept per dimension for percentile estimation.
    pub reservoir_size: usize,
    /// Elements pulled per chunk by the parallel aggregator.
    pub chunk_size: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            sample_size: defaults::SAMPLE_SIZE,
            reservoir_size: defaults::RESERVOIR_SIZE,
            chunk_size: defaults::CHUNK_SIZE,
        }
    }
}

impl AggregatorConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `TAKEOFF_SAMPLE_SIZE` | `5` | Sampled elements per pattern |
    /// | `TAKEOFF_RESERVOIR_SIZE` | `1024` | Reservoir capacity per dimension |
    /// | `TAKEOFF_CHUNK_SIZE` | `65536` | Parallel aggregation chunk size |
    pub fn from_env() -> Self {
        let sample_size = std::env::var("TAKEOFF_SAMPLE_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::SAMPLE_SIZE);

        let reservoir_size = std::env::var("TAKEOFF_RESERVOIR_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::RESERVOIR_SIZE)
            .max(1);

        let chunk_size = std::env::var("TAKEOFF_CHUNK_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::CHUNK_SIZE)
            .max(1);

        Self {
            sample_size,
            reservoir_size,
            chunk_size,
        }
    }

    pub fn with_sample_size(mut self, size: usize) -> Self {
        self.sample_size = size;
        self
    }

    pub fn with_reservoir_size(mut self, size: usize) -> Self {
        self.reservoir_size = size.max(1);
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }
}
