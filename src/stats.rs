// ============================================================================
// RUNNING STATISTICS
// ============================================================================
// Online descriptive statistics for one timing field:
// - count, mean, variance, min and max are exact over every observation
// - percentiles are estimated from a bounded reservoir sample
// ============================================================================

use std::cmp::Ordering;

/// Seed for the reservoir's xorshift generator
const RESERVOIR_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

/// Running statistics over a stream of values.
///
/// Memory is bounded by the sample window capacity: once the window is full,
/// new observations replace a retained sample with probability
/// `capacity / count` (Algorithm R), so the window stays a uniform sample of
/// the whole stream.
#[derive(Debug, Clone)]
pub struct RunningStats {
    /// Number of observations
    count: u64,
    /// Running mean (Welford)
    mean: f64,
    /// Sum of squared distances from the mean (Welford)
    m2: f64,
    /// Minimum value seen
    min: f64,
    /// Maximum value seen
    max: f64,
    /// Retained samples for percentile estimation
    samples: Vec<f64>,
    /// Maximum number of retained samples
    capacity: usize,
    /// Whether `samples` is currently sorted
    sorted: bool,
    /// xorshift64 state
    rng: u64,
}

impl RunningStats {
    /// Create an empty accumulator whose sample window holds `capacity` values.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            samples: Vec::with_capacity(capacity.min(1024)),
            capacity,
            sorted: true,
            rng: RESERVOIR_SEED,
        }
    }

    /// Record a new observation.
    pub fn add(&mut self, value: f64) {
        self.count += 1;

        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);

        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }

        if self.samples.len() < self.capacity {
            self.samples.push(value);
            self.sorted = false;
        } else {
            let j = (self.next_random() % self.count) as usize;
            if j < self.capacity {
                self.samples[j] = value;
                self.sorted = false;
            }
        }
    }

    /// Record `n` observations of the same value in O(capacity).
    ///
    /// Count, mean and variance use the Welford merge of a block of `n`
    /// identical values. The window first fills any free slots, then each
    /// retained sample is replaced with the probability that Algorithm R
    /// would have overwritten it during the remaining adds.
    pub fn add_n(&mut self, value: f64, n: u64) {
        match n {
            0 => return,
            1 => return self.add(value),
            _ => {}
        }

        let prior = self.count;
        self.count = self.count.saturating_add(n);
        let n = self.count - prior;

        let total = self.count as f64;
        let delta = value - self.mean;
        self.mean += delta * n as f64 / total;
        self.m2 += delta * delta * prior as f64 * n as f64 / total;

        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }

        let mut remaining = n;
        let mut seen = prior;
        while remaining > 0 && self.samples.len() < self.capacity {
            self.samples.push(value);
            self.sorted = false;
            remaining -= 1;
            seen += 1;
        }
        if remaining == 0 {
            return;
        }

        // A slot survives step k with probability 1 - 1/k; over steps
        // seen+1..=seen+remaining that telescopes to seen / (seen + remaining).
        let survive = seen as f64 / (seen as f64 + remaining as f64);
        for slot in 0..self.samples.len() {
            if self.next_unit() >= survive {
                self.samples[slot] = value;
                self.sorted = false;
            }
        }
    }

    /// Number of observations ever added
    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean of all observations, 0 when empty
    #[inline]
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Population variance of all observations
    #[inline]
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / self.count as f64).max(0.0)
        }
    }

    /// Population standard deviation of all observations
    #[inline]
    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Maximum value, 0 when empty
    #[inline]
    pub fn upper(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.max
        }
    }

    /// Minimum value, 0 when empty
    #[inline]
    pub fn lower(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.min
        }
    }

    /// Number of retained samples
    #[inline]
    pub fn sample_len(&self) -> usize {
        self.samples.len()
    }

    /// Capacity of the sample window
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Estimate the `p`th percentile (0..=100) from the retained samples by
    /// linear interpolation at rank `p/100 * (n-1)`. Returns 0 when empty.
    pub fn percentile(&mut self, p: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }

        if !self.sorted {
            self.samples
                .sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
            self.sorted = true;
        }

        let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 100.0) };
        let rank = p / 100.0 * (self.samples.len() - 1) as f64;
        let lo = rank.floor() as usize;
        let hi = rank.ceil() as usize;

        if lo == hi {
            return self.samples[lo];
        }

        let weight = rank - lo as f64;
        self.samples[lo] + (self.samples[hi] - self.samples[lo]) * weight
    }

    /// Simple xorshift64 PRNG for reservoir replacement
    #[inline]
    fn next_random(&mut self) -> u64 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng = x;
        x
    }

    /// Uniform in [0, 1)
    #[inline]
    fn next_unit(&mut self) -> f64 {
        (self.next_random() >> 11) as f64 / (1u64 << 53) as f64
    }
}

impl Default for RunningStats {
    fn default() -> Self {
        Self::new(crate::DEFAULT_PERCENTILE_LIMIT)
    }
}
