// ============================================================================
// CORE TYPE SYSTEM
// ============================================================================
// The parsed form of a StatsD observation. A `Metric` lives only between the
// parser and the aggregation cache; the cache keeps `MetricKey`s.
// ============================================================================

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

// ----------------------------------------------------------------------------
// Metric Type
// ----------------------------------------------------------------------------

/// The aggregation semantics selected by the `|type` part of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// `c` - summed between collections
    Counter,
    /// `g` - last value wins, or signed delta
    Gauge,
    /// `s` - distinct values
    Set,
    /// `ms` - running statistics and percentiles
    Timing,
    /// `h` - aggregated exactly like timings
    Histogram,
}

impl MetricType {
    /// Resolve a protocol type code
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "c" => Some(MetricType::Counter),
            "g" => Some(MetricType::Gauge),
            "s" => Some(MetricType::Set),
            "ms" => Some(MetricType::Timing),
            "h" => Some(MetricType::Histogram),
            _ => None,
        }
    }

    /// Name used for the `metric_type` tag
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Set => "set",
            MetricType::Timing => "timing",
            MetricType::Histogram => "histogram",
        }
    }

    /// Timings and histograms share one store
    #[inline]
    pub const fn is_timing(&self) -> bool {
        matches!(self, MetricType::Timing | MetricType::Histogram)
    }

    /// Counters and sets carry integer values, everything else floats
    #[inline]
    pub const fn is_integer(&self) -> bool {
        matches!(self, MetricType::Counter | MetricType::Set)
    }
}

impl Display for MetricType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Metric Value
// ----------------------------------------------------------------------------

/// A parsed numeric value. Counters and sets are integers, gauges and timings
/// are floats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
}

impl MetricValue {
    /// Value as an integer, floats are truncated
    #[inline]
    pub fn as_i64(&self) -> i64 {
        match self {
            MetricValue::Int(v) => *v,
            MetricValue::Float(v) => *v as i64,
        }
    }

    /// Value as a float
    #[inline]
    pub fn as_f64(&self) -> f64 {
        match self {
            MetricValue::Int(v) => *v as f64,
            MetricValue::Float(v) => *v,
        }
    }
}

impl Display for MetricValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Int(v) => write!(f, "{}", v),
            MetricValue::Float(v) => write!(f, "{}", v),
        }
    }
}

// ----------------------------------------------------------------------------
// Tags & Identity
// ----------------------------------------------------------------------------

/// Tag set of a metric. Keys are unique and kept sorted.
pub type Tags = BTreeMap<CompactString, CompactString>;

/// Identity of an aggregated series: measurement name plus tag set.
///
/// Two metrics with the same name and the same tags map to the same key no
/// matter in which order the tags appeared on the wire. The cache is keyed by
/// this struct, so unlike the textual [`MetricKey::identity`] it cannot
/// collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    name: CompactString,
    tags: Tags,
}

impl MetricKey {
    pub fn new(name: impl Into<CompactString>, tags: Tags) -> Self {
        Self {
            name: name.into(),
            tags,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Textual identity hash: every tag rendered as `key=value`, sorted,
    /// concatenated, followed by the name.
    pub fn identity(&self) -> String {
        let mut rendered: SmallVec<[String; 8]> = self
            .tags
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        rendered.sort_unstable();

        let mut identity = rendered.concat();
        identity.push_str(&self.name);
        identity
    }
}

impl Display for MetricKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for (k, v) in &self.tags {
            write!(f, ",{}={}", k, v)?;
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// The Parsed Metric
// ----------------------------------------------------------------------------

/// One StatsD observation, form is `<bucket>:<value>|<type>[|@<rate>]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    /// Raw bucket as received, tags included
    pub bucket: CompactString,
    /// Field within the measurement, `value` unless named otherwise
    pub field: CompactString,
    /// Measurement name and tags
    pub key: MetricKey,
    pub mtype: MetricType,
    pub value: MetricValue,
    /// Gauge delta (`+N` / `-N`) rather than an absolute value
    pub additive: bool,
    /// Sample rate in (0, 1] when one was given and valid
    pub sample_rate: Option<f64>,
}

impl Metric {
    #[inline]
    pub fn name(&self) -> &str {
        self.key.name()
    }

    #[inline]
    pub fn tags(&self) -> &Tags {
        self.key.tags()
    }

    /// See [`MetricKey::identity`]
    pub fn hash(&self) -> String {
        self.key.identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (CompactString::from(*k), CompactString::from(*v)))
            .collect()
    }

    #[test]
    fn test_type_codes() {
        assert_eq!(MetricType::from_code("c"), Some(MetricType::Counter));
        assert_eq!(MetricType::from_code("g"), Some(MetricType::Gauge));
        assert_eq!(MetricType::from_code("s"), Some(MetricType::Set));
        assert_eq!(MetricType::from_code("ms"), Some(MetricType::Timing));
        assert_eq!(MetricType::from_code("h"), Some(MetricType::Histogram));
        assert_eq!(MetricType::from_code("x"), None);
        assert_eq!(MetricType::from_code("MS"), None);
        assert!(MetricType::Histogram.is_timing());
        assert!(MetricType::Set.is_integer());
        assert!(!MetricType::Gauge.is_integer());
    }

    #[test]
    fn test_identity_format() {
        let key = MetricKey::new("req", tags(&[("b", "2"), ("a", "1"), ("metric_type", "counter")]));
        assert_eq!(key.identity(), "a=1b=2metric_type=counterreq");
        assert_eq!(key.to_string(), "req,a=1,b=2,metric_type=counter");
    }

    #[test]
    fn test_identity_differs_by_tag_value() {
        let a = MetricKey::new("req", tags(&[("host", "a")]));
        let b = MetricKey::new("req", tags(&[("host", "b")]));
        assert_ne!(a, b);
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(MetricValue::Float(2.9).as_i64(), 2);
        assert_eq!(MetricValue::Int(3).as_f64(), 3.0);
    }
}
