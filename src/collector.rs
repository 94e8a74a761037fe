// ============================================================================
// COLLECTOR & SNAPSHOTS
// ============================================================================
// Flattens the aggregation cache into `<measurement>.<field>` → value maps.
//
// The two output buckets are named after how the host presents them, not
// after StatsD types:
// - `gauges`   (charts)        ← timing / histogram statistics
// - `counters` (single values) ← gauges, counters and set cardinalities
//
// Set sizes are named `<measurement>.cardinality` so they never shadow a
// counter or gauge of the same name.
// ============================================================================

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::AggregationCache;
use crate::config::ServiceConfig;
use crate::{DEFAULT_FIELD_NAME, DEFAULT_SEPARATOR};

// ----------------------------------------------------------------------------
// Snapshot Types
// ----------------------------------------------------------------------------

/// A flattened numeric value. Counts and totals stay integral.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SnapshotValue {
    Int(i64),
    Float(f64),
}

impl SnapshotValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            SnapshotValue::Int(v) => *v as f64,
            SnapshotValue::Float(v) => *v,
        }
    }
}

impl From<i64> for SnapshotValue {
    fn from(v: i64) -> Self {
        SnapshotValue::Int(v)
    }
}

impl From<f64> for SnapshotValue {
    fn from(v: f64) -> Self {
        SnapshotValue::Float(v)
    }
}

impl Display for SnapshotValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotValue::Int(v) => write!(f, "{}", v),
            SnapshotValue::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Point-in-time output of one collection. Owned by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Timing statistics, presented as charts
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub gauges: BTreeMap<String, SnapshotValue>,

    /// Gauge values, counter totals and set cardinalities, presented as
    /// single values
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub counters: BTreeMap<String, SnapshotValue>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty() && self.counters.is_empty()
    }

    /// Total number of flattened values
    pub fn len(&self) -> usize {
        self.gauges.len() + self.counters.len()
    }

    /// Serialize as the JSON payload handed to the host
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Display for Snapshot {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json())
    }
}

// ----------------------------------------------------------------------------
// Collection
// ----------------------------------------------------------------------------

/// Build a snapshot from the cache, then clear each store whose
/// `delete_*` flag is set. The caller must hold the cache lock for the whole
/// call so the snapshot and the clear are consistent.
pub fn collect(cache: &mut AggregationCache, config: &ServiceConfig) -> Snapshot {
    let mut snapshot = Snapshot::default();

    for (_, entry) in cache.timings_mut() {
        for (field, stats) in entry.fields.iter_mut() {
            let prefix = field_prefix(field);
            let mut put = |stat: &str, value: SnapshotValue| {
                snapshot
                    .gauges
                    .insert(flat_name(&entry.name, &format!("{}{}", prefix, stat)), value);
            };

            put("mean", stats.mean().into());
            put("deviation", stats.stddev().into());
            put("upper", stats.upper().into());
            put("lower", stats.lower().into());
            put("count", (stats.count() as i64).into());
            for p in &config.percentiles {
                let value = stats.percentile(f64::from(*p));
                put(&format!("{}_percentile", p), value.into());
            }
        }
    }
    if config.delete_timings {
        cache.clear_timings();
    }

    for (_, entry) in cache.gauges() {
        for (field, value) in &entry.fields {
            snapshot
                .counters
                .insert(flat_name(&entry.name, field), (*value).into());
        }
    }
    if config.delete_gauges {
        cache.clear_gauges();
    }

    for (_, entry) in cache.counters() {
        for (field, value) in &entry.fields {
            snapshot
                .counters
                .insert(flat_name(&entry.name, field), (*value).into());
        }
    }
    if config.delete_counters {
        cache.clear_counters();
    }

    for (_, entry) in cache.sets() {
        for (field, members) in &entry.fields {
            let stat = format!("{}cardinality", field_prefix(field));
            snapshot
                .counters
                .insert(flat_name(&entry.name, &stat), (members.len() as i64).into());
        }
    }
    if config.delete_sets {
        cache.clear_sets();
    }

    debug!(
        target: "statsd::collector",
        chart_values = snapshot.gauges.len(),
        single_values = snapshot.counters.len(),
        "Snapshot collected"
    );

    snapshot
}

/// `latency` → `latency_`, the default field has no prefix
fn field_prefix(field: &str) -> String {
    if field == DEFAULT_FIELD_NAME {
        String::new()
    } else {
        format!("{}_", field)
    }
}

fn flat_name(measurement: &str, field: &str) -> String {
    format!("{}{}{}", measurement, DEFAULT_SEPARATOR, field)
}
