// ============================================================================
// STATSD LINE PARSER
// ============================================================================
// Wire format, one metric group per `:`-separated segment:
//
//   bucket[,tag1=val1,...]:value|type[|@rate][:value2|type2...]
//
// Parsing is permissive about tags and sample rates and strict about types,
// signs and numbers. A bad line is reported and skipped, the rest of the
// packet is still processed.
// ============================================================================

use std::borrow::Cow;

use compact_str::CompactString;
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::error::ParseError;
use crate::metric::{Metric, MetricKey, MetricType, MetricValue, Tags};
use crate::{DEFAULT_FIELD_NAME, METRIC_TYPE_TAG};

/// Metrics decoded from one line. Most lines carry a single group.
pub type LineMetrics = SmallVec<[Metric; 1]>;

// ----------------------------------------------------------------------------
// Packet Level
// ----------------------------------------------------------------------------

/// Result of decoding one datagram
#[derive(Debug, Default)]
pub struct ParsedPacket {
    /// Every metric decoded from the valid lines, in arrival order
    pub metrics: Vec<Metric>,
    /// Non-empty lines seen
    pub lines: usize,
    /// Lines rejected with a parse error
    pub errors: usize,
}

/// Split a packet into lines and parse each one. Invalid UTF-8 is replaced,
/// lines are trimmed, empty lines are skipped.
pub fn parse_packet(packet: &[u8]) -> ParsedPacket {
    let text: Cow<'_, str> = String::from_utf8_lossy(packet);
    let mut parsed = ParsedPacket::default();

    for line in text.split('\n').map(str::trim).filter(|l| !l.is_empty()) {
        parsed.lines += 1;
        match parse_line(line) {
            Ok(metrics) => parsed.metrics.extend(metrics),
            Err(e) => {
                parsed.errors += 1;
                warn!(
                    target: "statsd::parser",
                    kind = e.kind(),
                    error = %e,
                    "Unable to parse statsd line, skipping"
                );
            }
        }
    }

    trace!(
        target: "statsd::parser",
        lines = parsed.lines,
        metrics = parsed.metrics.len(),
        errors = parsed.errors,
        "Packet parsed"
    );

    parsed
}

// ----------------------------------------------------------------------------
// Line Level
// ----------------------------------------------------------------------------

/// Parse one newline-free line into its metrics.
///
/// All groups of the line are validated before anything is returned, so a
/// failure in any group rejects the whole line.
pub fn parse_line(line: &str) -> Result<LineMetrics, ParseError> {
    let mut bits = line.split(':');
    let bucket = bits.next().unwrap_or_default();

    let groups: SmallVec<[&str; 4]> = bits.collect();
    if groups.is_empty() {
        return Err(ParseError::MissingValueSeparator { line: line.into() });
    }

    let (name, field, bucket_tags) = parse_bucket(bucket);

    let mut metrics = LineMetrics::new();
    for group in groups {
        let parsed = parse_group(group, line)?;

        let mut tags = bucket_tags.clone();
        tags.insert(METRIC_TYPE_TAG.into(), parsed.mtype.as_str().into());

        metrics.push(Metric {
            bucket: bucket.into(),
            field: field.clone(),
            key: MetricKey::new(name.clone(), tags),
            mtype: parsed.mtype,
            value: parsed.value,
            additive: parsed.additive,
            sample_rate: parsed.sample_rate,
        });
    }

    Ok(metrics)
}

/// The type-specific half of a metric, decoded from `value|type[|@rate]`
#[derive(Debug)]
struct ParsedGroup {
    mtype: MetricType,
    value: MetricValue,
    additive: bool,
    sample_rate: Option<f64>,
}

fn parse_group(group: &str, line: &str) -> Result<ParsedGroup, ParseError> {
    let parts: SmallVec<[&str; 3]> = group.split('|').collect();
    if parts.len() < 2 {
        return Err(ParseError::MissingTypeSeparator { line: line.into() });
    }

    let raw_value = parts[0];
    let sample_rate = parts.get(2).and_then(|sr| parse_sample_rate(sr, line));

    let mtype = MetricType::from_code(parts[1]).ok_or_else(|| ParseError::UnsupportedType {
        mtype: parts[1].into(),
        line: line.into(),
    })?;

    let additive = raw_value.starts_with('+') || raw_value.starts_with('-');
    if additive && mtype != MetricType::Gauge {
        return Err(ParseError::InvalidSign { line: line.into() });
    }

    let invalid_value = || ParseError::InvalidValue {
        value: raw_value.into(),
        line: line.into(),
    };

    let value = if mtype.is_integer() {
        let mut v = match raw_value.parse::<i64>() {
            Ok(v) => v,
            Err(_) => raw_value.parse::<f64>().map_err(|_| invalid_value())? as i64,
        };
        // Counters were sampled on the client: scale back up to the true count.
        if mtype == MetricType::Counter {
            if let Some(rate) = sample_rate {
                v = (v as f64 / rate) as i64;
            }
        }
        MetricValue::Int(v)
    } else {
        MetricValue::Float(raw_value.parse::<f64>().map_err(|_| invalid_value())?)
    };

    Ok(ParsedGroup {
        mtype,
        value,
        additive,
        sample_rate,
    })
}

/// Parse `@<rate>`. A malformed or out-of-range rate is logged and ignored.
fn parse_sample_rate(raw: &str, line: &str) -> Option<f64> {
    let rate = raw
        .strip_prefix('@')
        .filter(|r| !r.is_empty())
        .and_then(|r| r.parse::<f64>().ok())
        .filter(|r| *r > 0.0 && *r <= 1.0);

    if rate.is_none() {
        warn!(
            target: "statsd::parser",
            sample_rate = raw,
            line,
            "Invalid sample rate, it must look like @0.1 or @0.5; ignoring it"
        );
    }

    rate
}

// ----------------------------------------------------------------------------
// Bucket Level
// ----------------------------------------------------------------------------

/// Split a bucket into (measurement name, field, tags).
///
/// `name,key=value,...`; a tag segment without `=` is kept with an empty key.
pub fn parse_bucket(bucket: &str) -> (CompactString, CompactString, Tags) {
    let mut parts = bucket.split(',');
    let name = CompactString::from(parts.next().unwrap_or_default());

    let mut tags = Tags::new();
    for segment in parts {
        let (key, value) = segment.split_once('=').unwrap_or(("", segment));
        if key.is_empty() {
            debug!(target: "statsd::parser", segment, bucket, "Tag without key");
        }
        tags.insert(key.into(), value.into());
    }

    (name, CompactString::from(DEFAULT_FIELD_NAME), tags)
}
