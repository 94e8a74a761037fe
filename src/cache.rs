// ============================================================================
// AGGREGATION CACHE
// ============================================================================
// Four independent stores keyed by measurement name + tag set:
// - counters: running integer totals
// - gauges: last value, or running sum of signed deltas
// - sets: distinct integer values, cardinality computed at collection
// - timings: running statistics per field (timings and histograms)
// ============================================================================

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use compact_str::CompactString;
use parking_lot::Mutex;
use tracing::trace;

use crate::metric::{Metric, MetricKey, MetricType};
use crate::stats::RunningStats;
use crate::DEFAULT_PERCENTILE_LIMIT;

/// Aggregation state shared between the parser task, collectors and any
/// later service instance that takes it over.
pub type SharedCache = Arc<Mutex<AggregationCache>>;

// ----------------------------------------------------------------------------
// Cache Entries
// ----------------------------------------------------------------------------

/// One measurement in a store: its name and a value per field.
#[derive(Debug, Clone)]
pub struct Entry<T> {
    pub name: CompactString,
    pub fields: AHashMap<CompactString, T>,
}

impl<T> Entry<T> {
    fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            fields: AHashMap::new(),
        }
    }
}

pub type CounterEntry = Entry<i64>;
pub type GaugeEntry = Entry<f64>;
pub type SetEntry = Entry<AHashSet<i64>>;
pub type TimingEntry = Entry<RunningStats>;

// ----------------------------------------------------------------------------
// The Cache
// ----------------------------------------------------------------------------

/// In-memory aggregation of everything received since the last clear.
#[derive(Debug)]
pub struct AggregationCache {
    /// Sample window capacity for newly created timing fields
    percentile_limit: usize,
    counters: AHashMap<MetricKey, CounterEntry>,
    gauges: AHashMap<MetricKey, GaugeEntry>,
    sets: AHashMap<MetricKey, SetEntry>,
    timings: AHashMap<MetricKey, TimingEntry>,
}

impl AggregationCache {
    /// Create an empty cache
    pub fn new(percentile_limit: usize) -> Self {
        Self {
            percentile_limit: percentile_limit.max(1),
            counters: AHashMap::new(),
            gauges: AHashMap::new(),
            sets: AHashMap::new(),
            timings: AHashMap::new(),
        }
    }

    /// Wrap the cache for sharing across tasks
    pub fn into_shared(self) -> SharedCache {
        Arc::new(Mutex::new(self))
    }

    /// Capacity used for timing fields created from now on. Existing fields
    /// keep the window they were created with.
    pub fn set_percentile_limit(&mut self, limit: usize) {
        self.percentile_limit = limit.max(1);
    }

    pub fn percentile_limit(&self) -> usize {
        self.percentile_limit
    }

    /// Fold one metric into its store. Missing entries and fields are created
    /// on first sight; this never fails.
    pub fn aggregate(&mut self, metric: Metric) {
        trace!(
            target: "statsd::cache",
            key = %metric.key,
            mtype = %metric.mtype,
            value = %metric.value,
            "Aggregating metric"
        );

        match metric.mtype {
            MetricType::Counter => {
                let total = self
                    .counters
                    .entry(metric.key)
                    .or_insert_with_key(|k| Entry::new(k.name()))
                    .fields
                    .entry(metric.field)
                    .or_insert(0);
                *total = total.wrapping_add(metric.value.as_i64());
            }
            MetricType::Gauge => {
                let current = self
                    .gauges
                    .entry(metric.key)
                    .or_insert_with_key(|k| Entry::new(k.name()))
                    .fields
                    .entry(metric.field)
                    .or_insert(0.0);
                if metric.additive {
                    *current += metric.value.as_f64();
                } else {
                    *current = metric.value.as_f64();
                }
            }
            MetricType::Set => {
                self.sets
                    .entry(metric.key)
                    .or_insert_with_key(|k| Entry::new(k.name()))
                    .fields
                    .entry(metric.field)
                    .or_default()
                    .insert(metric.value.as_i64());
            }
            MetricType::Timing | MetricType::Histogram => {
                let limit = self.percentile_limit;
                let stats = self
                    .timings
                    .entry(metric.key)
                    .or_insert_with_key(|k| Entry::new(k.name()))
                    .fields
                    .entry(metric.field)
                    .or_insert_with(|| RunningStats::new(limit));

                // Sampled observations stand in for round(1/rate) of the same value.
                let repeats = match metric.sample_rate {
                    Some(rate) => ((1.0 / rate).round() as u64).max(1),
                    None => 1,
                };
                stats.add_n(metric.value.as_f64(), repeats);
            }
        }
    }

    /// Fold a batch of metrics, returning how many were applied
    pub fn aggregate_all<I>(&mut self, metrics: I) -> usize
    where
        I: IntoIterator<Item = Metric>,
    {
        let mut applied = 0;
        for metric in metrics {
            self.aggregate(metric);
            applied += 1;
        }
        applied
    }

    // ---- Store access ----

    pub fn counters(&self) -> impl Iterator<Item = (&MetricKey, &CounterEntry)> {
        self.counters.iter()
    }

    pub fn gauges(&self) -> impl Iterator<Item = (&MetricKey, &GaugeEntry)> {
        self.gauges.iter()
    }

    pub fn sets(&self) -> impl Iterator<Item = (&MetricKey, &SetEntry)> {
        self.sets.iter()
    }

    pub fn timings(&self) -> impl Iterator<Item = (&MetricKey, &TimingEntry)> {
        self.timings.iter()
    }

    /// Mutable timing access; percentile estimation sorts the sample window
    pub fn timings_mut(&mut self) -> impl Iterator<Item = (&MetricKey, &mut TimingEntry)> {
        self.timings.iter_mut()
    }

    pub fn counter(&self, key: &MetricKey) -> Option<&CounterEntry> {
        self.counters.get(key)
    }

    pub fn gauge(&self, key: &MetricKey) -> Option<&GaugeEntry> {
        self.gauges.get(key)
    }

    pub fn set(&self, key: &MetricKey) -> Option<&SetEntry> {
        self.sets.get(key)
    }

    pub fn timing(&self, key: &MetricKey) -> Option<&TimingEntry> {
        self.timings.get(key)
    }

    // ---- Clearing ----

    pub fn clear_counters(&mut self) {
        self.counters = AHashMap::new();
    }

    pub fn clear_gauges(&mut self) {
        self.gauges = AHashMap::new();
    }

    pub fn clear_sets(&mut self) {
        self.sets = AHashMap::new();
    }

    pub fn clear_timings(&mut self) {
        self.timings = AHashMap::new();
    }

    /// Number of measurements across all four stores
    pub fn len(&self) -> usize {
        self.counters.len() + self.gauges.len() + self.sets.len() + self.timings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AggregationCache {
    fn default() -> Self {
        Self::new(DEFAULT_PERCENTILE_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_line;

    fn feed(cache: &mut AggregationCache, lines: &[&str]) {
        for line in lines {
            cache.aggregate_all(parse_line(line).unwrap());
        }
    }

    fn key_of(line: &str) -> MetricKey {
        parse_line(line).unwrap()[0].key.clone()
    }

    fn counter_value(cache: &AggregationCache, line: &str) -> Option<i64> {
        cache
            .counter(&key_of(line))
            .and_then(|e| e.fields.get("value").copied())
    }

    fn gauge_value(cache: &AggregationCache, line: &str) -> Option<f64> {
        cache
            .gauge(&key_of(line))
            .and_then(|e| e.fields.get("value").copied())
    }

    #[test]
    fn test_counter_sums() {
        let mut cache = AggregationCache::default();
        feed(&mut cache, &["requests:1|c", "requests:1|c"]);
        assert_eq!(counter_value(&cache, "requests:1|c"), Some(2));
        assert_eq!(cache.counter(&key_of("requests:1|c")).unwrap().name, "requests");
    }

    #[test]
    fn test_counter_sample_rate() {
        let mut cache = AggregationCache::default();
        feed(&mut cache, &["requests:1|c|@0.1"]);
        assert_eq!(counter_value(&cache, "requests:1|c"), Some(10));
    }

    #[test]
    fn test_gauge_additive() {
        let mut cache = AggregationCache::default();
        feed(&mut cache, &["temp:5|g", "temp:+2|g"]);
        assert_eq!(gauge_value(&cache, "temp:0|g"), Some(7.0));

        feed(&mut cache, &["temp:-10|g"]);
        assert_eq!(gauge_value(&cache, "temp:0|g"), Some(-3.0));
    }

    #[test]
    fn test_gauge_replace() {
        let mut cache = AggregationCache::default();
        feed(&mut cache, &["temp:5|g", "temp:9|g"]);
        assert_eq!(gauge_value(&cache, "temp:0|g"), Some(9.0));
    }

    #[test]
    fn test_additive_gauge_starts_from_zero() {
        let mut cache = AggregationCache::default();
        feed(&mut cache, &["queue:+4|g"]);
        assert_eq!(gauge_value(&cache, "queue:0|g"), Some(4.0));
    }

    #[test]
    fn test_tag_order_shares_entry() {
        let mut cache = AggregationCache::default();
        feed(&mut cache, &["req,a=1,b=2:1|c", "req,b=2,a=1:1|c"]);
        assert_eq!(cache.counters().count(), 1);
        assert_eq!(counter_value(&cache, "req,a=1,b=2:0|c"), Some(2));
    }

    #[test]
    fn test_different_tags_are_separate() {
        let mut cache = AggregationCache::default();
        feed(&mut cache, &["req,host=a:1|c", "req,host=b:1|c", "req:1|c"]);
        assert_eq!(cache.counters().count(), 3);
    }

    #[test]
    fn test_same_name_different_types_are_separate() {
        let mut cache = AggregationCache::default();
        feed(&mut cache, &["thing:1|c", "thing:2|g", "thing:3|s", "thing:4|ms"]);
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn test_set_deduplicates() {
        let mut cache = AggregationCache::default();
        feed(&mut cache, &["users:1|s", "users:2|s", "users:1|s", "users:2.7|s"]);
        let entry = cache.set(&key_of("users:0|s")).unwrap();
        assert_eq!(entry.fields["value"].len(), 2);
    }

    #[test]
    fn test_timing_statistics() {
        let mut cache = AggregationCache::default();
        feed(
            &mut cache,
            &["lat:1|ms", "lat:2|ms", "lat:3|ms", "lat:4|ms", "lat:5|ms"],
        );
        let entry = cache.timing(&key_of("lat:0|ms")).unwrap();
        let stats = &entry.fields["value"];
        assert_eq!(stats.count(), 5);
        assert_eq!(stats.mean(), 3.0);
        assert_eq!(stats.lower(), 1.0);
        assert_eq!(stats.upper(), 5.0);
    }

    #[test]
    fn test_timing_sample_rate_replays() {
        let mut cache = AggregationCache::default();
        feed(&mut cache, &["lat:10|ms|@0.25", "lat:10|ms|@0.3"]);
        let stats = &cache.timing(&key_of("lat:0|ms")).unwrap().fields["value"];
        // round(1/0.25) = 4, round(1/0.3) = 3
        assert_eq!(stats.count(), 7);
    }

    #[test]
    fn test_tiny_sample_rate_does_not_replay_one_by_one() {
        let mut cache = AggregationCache::new(100);
        let started = std::time::Instant::now();
        feed(&mut cache, &["lat:1|ms|@1e-12"]);
        assert!(started.elapsed() < std::time::Duration::from_secs(1));

        let stats = &cache.timing(&key_of("lat:0|ms")).unwrap().fields["value"];
        assert_eq!(stats.count(), 1_000_000_000_000);
        assert_eq!(stats.sample_len(), 100);
        assert_eq!(stats.mean(), 1.0);
    }

    #[test]
    fn test_histogram_shares_timing_store_semantics() {
        let mut cache = AggregationCache::default();
        feed(&mut cache, &["size:3|h", "size:5|h"]);
        let stats = &cache.timing(&key_of("size:0|h")).unwrap().fields["value"];
        assert_eq!(stats.count(), 2);
        assert_eq!(stats.mean(), 4.0);
    }

    #[test]
    fn test_timing_window_uses_limit() {
        let mut cache = AggregationCache::new(3);
        feed(&mut cache, &["lat:1|ms", "lat:2|ms", "lat:3|ms", "lat:4|ms", "lat:5|ms"]);
        let stats = &cache.timing(&key_of("lat:0|ms")).unwrap().fields["value"];
        assert_eq!(stats.count(), 5);
        assert_eq!(stats.sample_len(), 3);
        assert_eq!(stats.capacity(), 3);
    }

    #[test]
    fn test_clear_is_per_store() {
        let mut cache = AggregationCache::default();
        feed(&mut cache, &["a:1|c", "b:1|g", "c:1|s", "d:1|ms"]);

        cache.clear_counters();
        assert_eq!(cache.counters().count(), 0);
        assert_eq!(cache.len(), 3);

        cache.clear_gauges();
        cache.clear_sets();
        cache.clear_timings();
        assert!(cache.is_empty());
    }
}
