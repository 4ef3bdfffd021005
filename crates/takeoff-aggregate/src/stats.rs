//! Running statistics for one numeric dimension.
//!
//! Moments use Welford's update with Chan's parallel merge, so partial
//! accumulators built on different threads combine without loss. Percentiles
//! come from a bounded reservoir sample: exact while a group has no more
//! values than the reservoir holds, a uniform-sample estimate beyond that.

use rand::rngs::StdRng;
use rand::Rng;

use takeoff_core::DimensionStatistics;

/// Bounded uniform sample of the values seen (Algorithm R).
#[derive(Debug, Clone)]
pub struct Reservoir {
    capacity: usize,
    seen: u64,
    values: Vec<f64>,
}

impl Reservoir {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: 0,
            values: Vec::new(),
        }
    }

    pub fn push(&mut self, value: f64, rng: &mut StdRng) {
        self.seen += 1;
        if self.values.len() < self.capacity {
            self.values.push(value);
            return;
        }
        let slot = rng.gen_range(0..self.seen);
        if (slot as usize) < self.capacity {
            self.values[slot as usize] = value;
        }
    }

    /// Combine two reservoirs into one uniform sample of their union.
    ///
    /// Each slot is drawn from either side with probability proportional to
    /// the number of values that side has seen.
    pub fn merge(&mut self, mut other: Reservoir, rng: &mut StdRng) {
        let total_seen = self.seen + other.seen;
        if self.values.len() + other.values.len() <= self.capacity {
            self.values.append(&mut other.values);
            self.seen = total_seen;
            return;
        }

        let mut left = std::mem::take(&mut self.values);
        let mut right = other.values;
        let (left_weight, right_weight) = (self.seen as f64, other.seen as f64);
        let mut merged = Vec::with_capacity(self.capacity);

        while merged.len() < self.capacity && !(left.is_empty() && right.is_empty()) {
            let take_left = if right.is_empty() {
                true
            } else if left.is_empty() {
                false
            } else {
                rng.gen_bool(left_weight / (left_weight + right_weight))
            };
            let pool = if take_left { &mut left } else { &mut right };
            let index = rng.gen_range(0..pool.len());
            merged.push(pool.swap_remove(index));
        }

        self.values = merged;
        self.seen = total_seen;
    }

    /// Nearest-rank percentile, `p` in `[0, 1]`.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        let mut sorted = self.values.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        nearest_rank(&sorted, p)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn nearest_rank(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (p.clamp(0.0, 1.0) * sorted.len() as f64).ceil() as usize;
    Some(sorted[rank.clamp(1, sorted.len()) - 1])
}

/// Incremental statistics for one dimension of one pattern.
#[derive(Debug, Clone)]
pub struct DimensionAccumulator {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
    reservoir: Reservoir,
}

impl DimensionAccumulator {
    pub fn new(reservoir_capacity: usize) -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            reservoir: Reservoir::new(reservoir_capacity),
        }
    }

    /// Fold one value. Non-finite values are ignored.
    pub fn push(&mut self, value: f64, rng: &mut StdRng) {
        if !value.is_finite() {
            return;
        }
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.reservoir.push(value, rng);
    }

    /// Merge another partial accumulator for the same dimension.
    pub fn merge(&mut self, other: DimensionAccumulator, rng: &mut StdRng) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other;
            return;
        }
        let n_a = self.count as f64;
        let n_b = other.count as f64;
        let n = n_a + n_b;
        let delta = other.mean - self.mean;

        self.mean += delta * n_b / n;
        self.m2 += other.m2 + delta * delta * n_a * n_b / n;
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.reservoir.merge(other.reservoir, rng);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn finish(&self) -> DimensionStatistics {
        if self.count == 0 {
            return DimensionStatistics::empty();
        }
        let variance = (self.m2 / self.count as f64).max(0.0);
        let mut sorted = self.reservoir.values.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));

        DimensionStatistics {
            count: self.count,
            min: Some(self.min),
            max: Some(self.max),
            mean: Some(self.mean),
            stddev: Some(variance.sqrt()),
            p50: nearest_rank(&sorted, 0.50),
            p95: nearest_rank(&sorted, 0.95),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_empty_accumulator_has_count_zero() {
        let stats = DimensionAccumulator::new(16).finish();
        assert_eq!(stats.count, 0);
        assert!(stats.mean.is_none());
        assert!(stats.stddev.is_none());
        assert!(stats.p50.is_none());
    }

    #[test]
    fn test_moments_and_percentiles() {
        let mut rng = rng();
        let mut acc = DimensionAccumulator::new(64);
        for v in 1..=20 {
            acc.push(v as f64, &mut rng);
        }
        let stats = acc.finish();
        assert_eq!(stats.count, 20);
        assert_eq!(stats.min, Some(1.0));
        assert_eq!(stats.max, Some(20.0));
        assert!(approx(stats.mean.unwrap(), 10.5));
        // population variance of 1..=20 is (20^2 - 1) / 12
        assert!(approx(stats.stddev.unwrap(), (399.0f64 / 12.0).sqrt()));
        assert_eq!(stats.p50, Some(10.0));
        assert_eq!(stats.p95, Some(19.0));
    }

    #[test]
    fn test_single_value() {
        let mut rng = rng();
        let mut acc = DimensionAccumulator::new(4);
        acc.push(42.0, &mut rng);
        let stats = acc.finish();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.stddev, Some(0.0));
        assert_eq!(stats.p50, Some(42.0));
        assert_eq!(stats.p95, Some(42.0));
    }

    #[test]
    fn test_non_finite_ignored() {
        let mut rng = rng();
        let mut acc = DimensionAccumulator::new(4);
        acc.push(f64::NAN, &mut rng);
        acc.push(f64::INFINITY, &mut rng);
        acc.push(3.0, &mut rng);
        assert_eq!(acc.count(), 1);
    }

    #[test]
    fn test_merge_matches_sequential() {
        let mut rng = rng();
        let mut whole = DimensionAccumulator::new(128);
        let mut left = DimensionAccumulator::new(128);
        let mut right = DimensionAccumulator::new(128);
        for v in 0..50 {
            let x = (v * 37 % 101) as f64 + 0.25;
            whole.push(x, &mut rng);
            if v % 3 == 0 {
                left.push(x, &mut rng);
            } else {
                right.push(x, &mut rng);
            }
        }
        left.merge(right, &mut rng);
        let a = whole.finish();
        let b = left.finish();
        assert_eq!(a.count, b.count);
        assert_eq!(a.min, b.min);
        assert_eq!(a.max, b.max);
        assert!(approx(a.mean.unwrap(), b.mean.unwrap()));
        assert!((a.stddev.unwrap() - b.stddev.unwrap()).abs() < 1e-6);
        // Below reservoir capacity the percentiles are exact on both sides
        assert_eq!(a.p50, b.p50);
        assert_eq!(a.p95, b.p95);
    }

    #[test]
    fn test_merge_into_empty() {
        let mut rng = rng();
        let mut empty = DimensionAccumulator::new(8);
        let mut other = DimensionAccumulator::new(8);
        other.push(5.0, &mut rng);
        empty.merge(other, &mut rng);
        assert_eq!(empty.finish().mean, Some(5.0));
    }

    #[test]
    fn test_reservoir_stays_bounded() {
        let mut rng = rng();
        let mut reservoir = Reservoir::new(100);
        for v in 0..10_000 {
            reservoir.push(v as f64, &mut rng);
        }
        assert_eq!(reservoir.len(), 100);

        let mut other = Reservoir::new(100);
        for v in 0..500 {
            other.push(v as f64, &mut rng);
        }
        reservoir.merge(other, &mut rng);
        assert_eq!(reservoir.len(), 100);
    }

    #[test]
    fn test_reservoir_percentile_estimate_is_close() {
        let mut rng = rng();
        let mut acc = DimensionAccumulator::new(1024);
        for v in 0..100_000 {
            acc.push(v as f64, &mut rng);
        }
        let stats = acc.finish();
        let p50 = stats.p50.unwrap();
        let p95 = stats.p95.unwrap();
        assert!((p50 - 50_000.0).abs() < 5_000.0, "p50 = {p50}");
        assert!((p95 - 95_000.0).abs() < 3_000.0, "p95 = {p95}");
    }
}
