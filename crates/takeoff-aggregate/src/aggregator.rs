//! Batch pattern aggregation.

use std::collections::HashMap;
use std::time::Instant;

use chrono::Utc;
use rayon::prelude::*;
use tracing::{debug, info, instrument, trace};

use takeoff_core::{AggregationOutcome, ElementView, PatternKey};

use crate::config::AggregatorConfig;
use crate::group::GroupAccumulator;

/// Group accumulators keyed by pattern key, plus pass counters.
///
/// One table per worker during a parallel fold; tables merge without
/// touching any shared state.
#[derive(Debug)]
pub(crate) struct GroupTable {
    config: AggregatorConfig,
    groups: HashMap<PatternKey, GroupAccumulator>,
    total_count: u64,
    skipped_count: u64,
}

impl GroupTable {
    pub(crate) fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            groups: HashMap::new(),
            total_count: 0,
            skipped_count: 0,
        }
    }

    pub(crate) fn fold(mut self, element: ElementView) -> Self {
        self.push(element);
        self
    }

    pub(crate) fn push(&mut self, element: ElementView) {
        self.total_count += 1;
        let Some(key) = element.pattern_key() else {
            self.skipped_count += 1;
            debug!(
                element_id = %element.id,
                external_id = %element.external_id,
                "Skipping element without category"
            );
            return;
        };
        trace!(element_id = %element.id, "Folding element");
        let config = &self.config;
        self.groups
            .entry(key)
            .or_insert_with_key(|k| GroupAccumulator::new(k.clone(), config))
            .add(element);
    }

    pub(crate) fn merge(mut self, other: GroupTable) -> Self {
        self.total_count += other.total_count;
        self.skipped_count += other.skipped_count;
        for (key, group) in other.groups {
            match self.groups.get_mut(&key) {
                Some(existing) => existing.merge(group),
                None => {
                    self.groups.insert(key, group);
                }
            }
        }
        self
    }

    /// Finish every group. Patterns are ordered by fingerprint.
    pub(crate) fn finish(self) -> AggregationOutcome {
        let aggregated_at = Utc::now();
        let mut patterns: Vec<_> = self
            .groups
            .into_values()
            .map(|g| g.into_pattern(aggregated_at))
            .collect();
        patterns.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));

        AggregationOutcome {
            patterns,
            total_count: self.total_count,
            skipped_count: self.skipped_count,
        }
    }
}

/// Groups elements into patterns and computes per-dimension statistics.
#[derive(Debug, Clone, Default)]
pub struct PatternAggregator {
    config: AggregatorConfig,
}

impl PatternAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    pub fn from_env() -> Self {
        Self::new(AggregatorConfig::from_env())
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Single-threaded pass over the input.
    ///
    /// Input is consumed lazily; memory grows with the number of distinct
    /// patterns, not with the number of elements.
    #[instrument(skip_all, fields(subsystem = "aggregate", component = "aggregator", op = "aggregate"))]
    pub fn aggregate<I>(&self, elements: I) -> AggregationOutcome
    where
        I: IntoIterator<Item = ElementView>,
    {
        let start = Instant::now();
        let mut table = GroupTable::new(self.config);
        for element in elements {
            table.push(element);
        }
        let outcome = table.finish();
        log_outcome(&outcome, start);
        outcome
    }

    /// Multi-threaded pass.
    ///
    /// Input is pulled in chunks of `chunk_size` elements. Each chunk is
    /// folded on the rayon pool into per-worker tables which are then
    /// reduced and merged into the running result. Outcomes equal the
    /// sequential pass except for percentiles of groups larger than the
    /// reservoir.
    #[instrument(skip_all, fields(subsystem = "aggregate", component = "aggregator", op = "aggregate_parallel"))]
    pub fn aggregate_parallel<I>(&self, elements: I) -> AggregationOutcome
    where
        I: IntoIterator<Item = ElementView>,
    {
        let start = Instant::now();
        let config = self.config;
        let mut iter = elements.into_iter();
        let mut table = GroupTable::new(config);
        let mut chunks = 0usize;

        loop {
            let chunk: Vec<ElementView> = iter.by_ref().take(config.chunk_size).collect();
            if chunk.is_empty() {
                break;
            }
            chunks += 1;
            let partial = chunk
                .into_par_iter()
                .fold(|| GroupTable::new(config), GroupTable::fold)
                .reduce(|| GroupTable::new(config), GroupTable::merge);
            table = table.merge(partial);
        }

        debug!(chunks, chunk_size = config.chunk_size, "Parallel fold complete");
        let outcome = table.finish();
        log_outcome(&outcome, start);
        outcome
    }
}

fn log_outcome(outcome: &AggregationOutcome, start: Instant) {
    info!(
        element_count = outcome.total_count,
        skipped_count = outcome.skipped_count,
        pattern_count = outcome.patterns.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Aggregation complete"
    );
}
