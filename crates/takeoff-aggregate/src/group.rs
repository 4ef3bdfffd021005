//! Per-pattern accumulator state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use uuid::Uuid;

use takeoff_core::{Dimension, ElementView, Pattern, PatternKey, PatternSample};

use crate::config::AggregatorConfig;
use crate::stats::DimensionAccumulator;

/// Seed the reservoir RNG from the fingerprint so repeated runs over the
/// same input draw the same sample.
fn seed_from_fingerprint(fingerprint: &str) -> u64 {
    let head = &fingerprint[..fingerprint.len().min(16)];
    u64::from_str_radix(head, 16).unwrap_or(0)
}

fn slot(dimension: Dimension) -> usize {
    match dimension {
        Dimension::LengthMm => 0,
        Dimension::WidthMm => 1,
        Dimension::HeightMm => 2,
        Dimension::DiameterMm => 3,
    }
}

/// Running state for every element sharing one [`PatternKey`].
///
/// Memory per group is bounded: the sample list and each reservoir have a
/// fixed capacity and only one metadata map is retained.
#[derive(Debug, Clone)]
pub(crate) struct GroupAccumulator {
    key: PatternKey,
    fingerprint: String,
    count: u64,
    sample_size: usize,
    /// Sorted by element id, lowest first.
    samples: Vec<PatternSample>,
    metadata_owner: Option<Uuid>,
    metadata: BTreeMap<String, String>,
    dimensions: [DimensionAccumulator; 4],
    rng: StdRng,
}

impl GroupAccumulator {
    pub(crate) fn new(key: PatternKey, config: &AggregatorConfig) -> Self {
        let fingerprint = key.fingerprint();
        let rng = StdRng::seed_from_u64(seed_from_fingerprint(&fingerprint));
        let reservoir = config.reservoir_size;
        Self {
            key,
            fingerprint,
            count: 0,
            sample_size: config.sample_size,
            samples: Vec::with_capacity(config.sample_size),
            metadata_owner: None,
            metadata: BTreeMap::new(),
            dimensions: [
                DimensionAccumulator::new(reservoir),
                DimensionAccumulator::new(reservoir),
                DimensionAccumulator::new(reservoir),
                DimensionAccumulator::new(reservoir),
            ],
            rng,
        }
    }

    pub(crate) fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub(crate) fn add(&mut self, element: ElementView) {
        self.count += 1;

        for dimension in Dimension::ALL {
            if let Some(value) = element.dimensions.get(dimension) {
                self.dimensions[slot(dimension)].push(value, &mut self.rng);
            }
        }

        let take_metadata = self.metadata_owner.map_or(true, |owner| element.id < owner);

        self.offer_sample(PatternSample {
            element_id: element.id,
            external_id: element.external_id,
        });

        if take_metadata {
            self.metadata_owner = Some(element.id);
            self.metadata = element.metadata;
        }
    }

    fn offer_sample(&mut self, sample: PatternSample) {
        if self.sample_size == 0 {
            return;
        }
        let full = self.samples.len() >= self.sample_size;
        if full
            && self
                .samples
                .last()
                .is_some_and(|last| sample.element_id >= last.element_id)
        {
            return;
        }
        let pos = self
            .samples
            .partition_point(|s| s.element_id < sample.element_id);
        self.samples.insert(pos, sample);
        self.samples.truncate(self.sample_size);
    }

    /// Merge a partial accumulator for the same key.
    pub(crate) fn merge(&mut self, other: GroupAccumulator) {
        debug_assert_eq!(self.key, other.key);
        self.count += other.count;

        for (mine, theirs) in self.dimensions.iter_mut().zip(other.dimensions) {
            mine.merge(theirs, &mut self.rng);
        }

        for sample in other.samples {
            self.offer_sample(sample);
        }

        if let Some(owner) = other.metadata_owner {
            if self.metadata_owner.map_or(true, |mine| owner < mine) {
                self.metadata_owner = Some(owner);
                self.metadata = other.metadata;
            }
        }
    }

    pub(crate) fn into_pattern(self, aggregated_at: DateTime<Utc>) -> Pattern {
        let dimension_stats = Dimension::ALL
            .into_iter()
            .map(|d| (d, self.dimensions[slot(d)].finish()))
            .collect();

        Pattern {
            fingerprint: self.fingerprint,
            key: self.key,
            element_count: self.count,
            samples: self.samples,
            dimension_stats,
            metadata: self.metadata,
            aggregated_at,
        }
    }
}
