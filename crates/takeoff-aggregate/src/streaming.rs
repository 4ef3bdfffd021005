//! Streaming pattern aggregation with bounded memory.
//!
//! Groups stay open while elements keep arriving for them. A group closes
//! and its pattern is emitted once `idle_window` pushes pass without an
//! element for it, or early when more than `max_open_groups` are open (the
//! least recently active group goes first). If a closed fingerprint shows up
//! again, a fresh group opens and its later emission supersedes the earlier
//! one; consumers keep the latest pattern per fingerprint.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use tracing::{debug, info};

use takeoff_core::{defaults, AggregationOutcome, ElementView, Pattern, PatternKey};

use crate::config::AggregatorConfig;
use crate::group::GroupAccumulator;

struct OpenGroup {
    group: GroupAccumulator,
    last_seen: u64,
}

/// Incremental aggregator for unbounded element streams.
pub struct StreamingAggregator {
    config: AggregatorConfig,
    idle_window: u64,
    max_open_groups: usize,
    seq: u64,
    open: HashMap<PatternKey, OpenGroup>,
    /// Last activity sequence number -> key, oldest first.
    activity: BTreeMap<u64, PatternKey>,
    total_count: u64,
    skipped_count: u64,
    emitted_count: u64,
}

impl StreamingAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            idle_window: defaults::STREAM_IDLE_WINDOW,
            max_open_groups: defaults::STREAM_MAX_OPEN_GROUPS,
            seq: 0,
            open: HashMap::new(),
            activity: BTreeMap::new(),
            total_count: 0,
            skipped_count: 0,
            emitted_count: 0,
        }
    }

    /// Pushes without activity after which a group is closed.
    pub fn with_idle_window(mut self, pushes: u64) -> Self {
        self.idle_window = pushes.max(1);
        self
    }

    /// Upper bound on simultaneously open groups.
    pub fn with_max_open_groups(mut self, max: usize) -> Self {
        self.max_open_groups = max.max(1);
        self
    }

    pub fn open_groups(&self) -> usize {
        self.open.len()
    }

    /// Fold one element; returns the patterns whose groups closed.
    pub fn push(&mut self, element: ElementView) -> Vec<Pattern> {
        self.seq += 1;
        self.total_count += 1;
        let seq = self.seq;

        match element.pattern_key() {
            None => {
                self.skipped_count += 1;
                debug!(
                    element_id = %element.id,
                    external_id = %element.external_id,
                    "Skipping element without category"
                );
            }
            Some(key) => match self.open.get_mut(&key) {
                Some(open) => {
                    self.activity.remove(&open.last_seen);
                    open.last_seen = seq;
                    open.group.add(element);
                    self.activity.insert(seq, key);
                }
                None => {
                    let mut group = GroupAccumulator::new(key.clone(), &self.config);
                    group.add(element);
                    self.open.insert(
                        key.clone(),
                        OpenGroup {
                            group,
                            last_seen: seq,
                        },
                    );
                    self.activity.insert(seq, key);
                }
            },
        }

        let mut closed = Vec::new();

        while let Some((&last_seen, _)) = self.activity.first_key_value() {
            if seq - last_seen < self.idle_window {
                break;
            }
            if let Some(pattern) = self.close_oldest() {
                closed.push(pattern);
            }
        }

        while self.open.len() > self.max_open_groups {
            match self.close_oldest() {
                Some(pattern) => {
                    debug!(fingerprint = %pattern.fingerprint, "Open group limit reached, emitting early");
                    closed.push(pattern);
                }
                None => break,
            }
        }

        closed
    }

    fn close_oldest(&mut self) -> Option<Pattern> {
        let (_, key) = self.activity.pop_first()?;
        let open = self.open.remove(&key)?;
        self.emitted_count += 1;
        Some(open.group.into_pattern(Utc::now()))
    }

    /// Close every remaining group.
    ///
    /// The outcome's patterns are the groups still open at this point;
    /// counters cover the whole stream.
    pub fn finish(mut self) -> AggregationOutcome {
        let aggregated_at = Utc::now();
        let mut patterns: Vec<Pattern> = self
            .open
            .drain()
            .map(|(_, open)| open.group.into_pattern(aggregated_at))
            .collect();
        patterns.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));

        info!(
            subsystem = "aggregate",
            component = "streaming",
            element_count = self.total_count,
            skipped_count = self.skipped_count,
            emitted_early = self.emitted_count,
            pattern_count = patterns.len(),
            "Streaming aggregation finished"
        );

        AggregationOutcome {
            patterns,
            total_count: self.total_count,
            skipped_count: self.skipped_count,
        }
    }
}

impl Default for StreamingAggregator {
    fn default() -> Self {
        Self::new(AggregatorConfig::default())
    }
}
