//! Fixed-schema latency histogram (.2, C2).
//!
//! Bucket layout is "lowest-bucket offset + multiplicative schema": the
//! first [`LINEAR_BUCKETS`] buckets are linear width `resolution` starting at
//! `offset`, the remaining [`GEOMETRIC_BUCKETS`] grow geometrically so a
//! fixed-size histogram (no heap growth, no locks) can still usefully cover
//! several orders of magnitude of latency. `Record` is true O(1): the bucket
//! index is computed analytically, never by scanning boundaries.
//!
//! Any value `v` with `v - offset <= resolution` (in particular any negative
//! value when `offset <= 0`) lands in bucket 0. That's what makes the
//! sleep-time histogram's "how often did we fall behind schedule" check
//! (`buckets[0] / count`) meaningful: every negative (behind-schedule) sleep
//! bucket into index 0 by construction, no special-casing needed.

pub const LINEAR_BUCKETS: usize = 50;
pub const GEOMETRIC_BUCKETS: usize = 50;
pub const NUM_BUCKETS: usize = LINEAR_BUCKETS + GEOMETRIC_BUCKETS;
/// Upper edge of the last geometric bucket is `offset + linear_extent *
/// GEOMETRIC_RANGE_MULTIPLIER`, i.e. the histogram usefully covers six
/// orders of magnitude above its linear region before every sample above
/// that just piles into the last bucket.
const GEOMETRIC_RANGE_MULTIPLIER: f64 = 1_000_000.0;

#[derive(Clone, Debug)]
pub struct Histogram {
    offset: f64,
    resolution: f64,
    /// log(per-bucket growth ratio) in the geometric region, precomputed.
    log_geo_ratio: f64,
    linear_extent: f64,
    counts: [u64; NUM_BUCKETS],
    count: u64,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
}

/// An immutable snapshot suitable for percentile extraction and reporting.
#[derive(Clone, Debug)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub buckets: Vec<BucketSnapshot>,
}

#[derive(Clone, Copy, Debug)]
pub struct BucketSnapshot {
    pub min: f64,
    pub max: f64,
    pub count: u64,
}

impl Histogram {
    /// `resolution` is a floor on bucket width; must be > 0.
    pub fn new(offset: f64, resolution: f64) -> Self {
        assert!(resolution > 0.0, "histogram resolution must be positive");
        let linear_extent = resolution * LINEAR_BUCKETS as f64;
        let log_geo_ratio = GEOMETRIC_RANGE_MULTIPLIER.ln() / GEOMETRIC_BUCKETS as f64;
        Self {
            offset,
            resolution,
            log_geo_ratio,
            linear_extent,
            counts: [0; NUM_BUCKETS],
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    fn bucket_index(&self, v: f64) -> usize {
        let shifted = v - self.offset;
        if shifted <= self.resolution {
            return 0;
        }
        if shifted < self.linear_extent {
            let idx = (shifted / self.resolution).floor() as usize;
            return idx.min(LINEAR_BUCKETS - 1);
        }
        let over = shifted / self.linear_extent;
        let idx = LINEAR_BUCKETS + (over.ln() / self.log_geo_ratio).floor() as usize;
        idx.min(NUM_BUCKETS - 1)
    }

    fn bucket_max(&self, idx: usize) -> f64 {
        if idx < LINEAR_BUCKETS {
            self.offset + self.resolution * (idx as f64 + 1.0)
        } else {
            let geo_idx = (idx - LINEAR_BUCKETS + 1) as f64;
            self.offset + self.linear_extent * (self.log_geo_ratio * geo_idx).exp()
        }
    }

    fn bucket_min(&self, idx: usize) -> f64 {
        if idx == 0 {
            f64::NEG_INFINITY
        } else {
            self.bucket_max(idx - 1)
        }
    }

    /// Records one sample, in seconds (or whatever unit the caller is
    /// consistent about - the sleep histogram records seconds same as the
    /// duration histogram).
    pub fn record(&mut self, v: f64) {
        let idx = self.bucket_index(v);
        self.counts[idx] += 1;
        self.count += 1;
        self.sum += v;
        self.sum_sq += v * v;
        if v < self.min {
            self.min = v;
        }
        if v > self.max {
            self.max = v;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Fraction of samples in bucket 0 - for the sleep-time histogram this is
    /// "how often did a thread fall behind schedule" (.5 completion).
    pub fn bucket_zero_fraction(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.counts[0] as f64 / self.count as f64
        }
    }

    /// Merges `other` into `self` and resets `other` to empty, preserving
    /// `other`'s bucket schema. Associative and commutative over the merged
    /// statistics (counts/sum/min/max all combine that way); transferring an
    /// empty histogram is a no-op.
    pub fn transfer(&mut self, other: &mut Histogram) {
        for i in 0..NUM_BUCKETS {
            self.counts[i] += other.counts[i];
        }
        self.count += other.count;
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        if other.min < self.min {
            self.min = other.min;
        }
        if other.max > self.max {
            self.max = other.max;
        }
        other.counts = [0; NUM_BUCKETS];
        other.count = 0;
        other.sum = 0.0;
        other.sum_sq = 0.0;
        other.min = f64::INFINITY;
        other.max = f64::NEG_INFINITY;
    }

    pub fn export(&self) -> HistogramSnapshot {
        let buckets = (0..NUM_BUCKETS)
            .filter(|&i| self.counts[i] > 0)
            .map(|i| BucketSnapshot {
                min: self.bucket_min(i),
                max: self.bucket_max(i),
                count: self.counts[i],
            })
            .collect();
        HistogramSnapshot {
            count: self.count,
            sum: self.sum,
            min: if self.count == 0 { 0.0 } else { self.min },
            max: if self.count == 0 { 0.0 } else { self.max },
            buckets,
        }
    }
}

impl HistogramSnapshot {
    /// Interpolated percentiles, e.g. `calc_percentiles(&[50.0, 90.0, 99.0])`.
    /// Returns `(requested_percentile, interpolated_value)` pairs in input
    /// order. Empty snapshot yields all zeros.
    pub fn calc_percentiles(&self, percentiles: &[f64]) -> Vec<(f64, f64)> {
        if self.count == 0 {
            return percentiles.iter().map(|&p| (p, 0.0)).collect();
        }
        percentiles
            .iter()
            .map(|&p| (p, self.calc_percentile(p)))
            .collect()
    }

    fn calc_percentile(&self, p: f64) -> f64 {
        let target = (p / 100.0) * self.count as f64;
        let mut cumulative = 0u64;
        for b in &self.buckets {
            let next_cumulative = cumulative + b.count;
            if (next_cumulative as f64) >= target {
                let lo = if b.min.is_finite() { b.min } else { self.min };
                let hi = b.max;
                if b.count == 0 {
                    return hi;
                }
                let fraction = (target - cumulative as f64) / b.count as f64;
                return lo + fraction.clamp(0.0, 1.0) * (hi - lo);
            }
            cumulative = next_cumulative;
        }
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_count() {
        let mut h = Histogram::new(0.0, 0.001);
        for i in 0..100 {
            h.record(i as f64 * 0.001);
        }
        assert_eq!(h.count(), 100);
    }

    #[test]
    fn negative_values_bucket_into_zero() {
        let mut h = Histogram::new(0.0, 0.001);
        h.record(-5.0);
        h.record(-0.5);
        let snap = h.export();
        assert_eq!(snap.buckets[0].count, 2);
    }

    #[test]
    fn transfer_merges_and_empties_source() {
        let mut a = Histogram::new(0.0, 0.001);
        let mut b = Histogram::new(0.0, 0.001);
        for _ in 0..5 {
            a.record(0.01);
        }
        for _ in 0..7 {
            b.record(0.02);
        }
        a.transfer(&mut b);
        assert_eq!(a.count(), 12);
        assert_eq!(b.count(), 0);
        assert_eq!(b.export().buckets.len(), 0);
    }

    #[test]
    fn transfer_of_empty_is_noop() {
        let mut a = Histogram::new(0.0, 0.001);
        a.record(0.01);
        let mut empty = Histogram::new(0.0, 0.001);
        a.transfer(&mut empty);
        assert_eq!(a.count(), 1);
    }

    #[test]
    fn percentiles_are_monotonic_and_within_range() {
        let mut h = Histogram::new(0.0, 0.0001);
        for i in 1..=1000 {
            h.record(i as f64 * 0.0001);
        }
        let snap = h.export();
        let ps = snap.calc_percentiles(&[10.0, 50.0, 90.0, 99.0]);
        let mut last = 0.0;
        for (_, v) in &ps {
            assert!(*v >= last);
            last = *v;
        }
        assert!(ps.last().unwrap().1 <= snap.max + 1e-9);
    }

    #[test]
    fn clone_is_independent() {
        let mut h = Histogram::new(0.0, 0.001);
        h.record(0.01);
        let h2 = h.clone();
        h.record(0.02);
        assert_eq!(h2.count(), 1);
        assert_eq!(h.count(), 2);
    }
}
