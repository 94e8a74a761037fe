//! # Cerebro StatsD - Metric Ingestion for AIOps
//!
//! A StatsD line-protocol server that receives metric packets over UDP,
//! aggregates them in memory and hands out point-in-time snapshots on demand.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                           CEREBRO STATSD ENGINE                              │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  UDP RECEIVER → PACKET QUEUE → PARSER → AGGREGATION CACHE → COLLECTOR       │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **Receiver**: reads datagrams and enqueues them, dropping when the queue is full
//! - **Parser**: splits packets into lines and decodes `bucket:value|type[|@rate]`
//! - **Aggregation cache**: counters, gauges, sets and timings keyed by name + tags
//! - **Collector**: flattens the cache into a snapshot and optionally clears it
//!
//! ## Example
//!
//! ```no_run
//! use cerebro_statsd::{ServiceConfig, StatsdService};
//!
//! # async fn run() -> cerebro_statsd::StatsdResult<()> {
//! let service = StatsdService::start(ServiceConfig::default(), None).await?;
//! let snapshot = service.collect();
//! println!("{}", snapshot);
//! let state = service.stop().await;
//! // `state` can be handed to the next `start` to keep aggregated values.
//! # let _ = state;
//! # Ok(())
//! # }
//! ```

#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]

pub mod cache;
pub mod channel;
pub mod collector;
pub mod config;
pub mod error;
pub mod logging;
pub mod metric;
pub mod parser;
pub mod pipeline;
pub mod receiver;
pub mod stats;

pub use cache::{AggregationCache, SharedCache};
pub use collector::{Snapshot, SnapshotValue};
pub use config::{LoggingConfig, ServiceConfig, StatsdConfig};
pub use error::{ConfigError, NetworkError, ParseError, StatsdError, StatsdResult};
pub use metric::{Metric, MetricKey, MetricType, MetricValue, Tags};
pub use pipeline::{ServiceStats, StatsdService};
pub use stats::RunningStats;

// ============================================================================
// CONSTANTS & VERSION INFORMATION
// ============================================================================

/// Engine version - follows semantic versioning
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ENGINE_NAME: &str = "cerebro-statsd";
pub const ENGINE_FULL_NAME: &str = "Cerebro StatsD Engine";

// ----------------------------------------------------------------------------
// Protocol
// ----------------------------------------------------------------------------

/// UDP packet limit, the largest datagram the receiver will read in one call
pub const UDP_MAX_PACKET_SIZE: usize = 64 * 1024;

/// Field name used when a bucket does not name one
pub const DEFAULT_FIELD_NAME: &str = "value";

/// Separator between a measurement name and its field in snapshots
pub const DEFAULT_SEPARATOR: &str = ".";

/// Synthetic tag recording the resolved metric type
pub const METRIC_TYPE_TAG: &str = "metric_type";

// ----------------------------------------------------------------------------
// Defaults
// ----------------------------------------------------------------------------

/// Default listen address (all interfaces, standard StatsD port)
pub const DEFAULT_ADDRESS: &str = ":8125";

/// Default number of packets allowed to queue between receiver and parser
pub const DEFAULT_ALLOWED_PENDING_MESSAGES: usize = 10_000;

/// Default capacity of the per-field percentile sample window
pub const DEFAULT_PERCENTILE_LIMIT: usize = 1000;

/// Default percentiles computed for timings and histograms
pub const DEFAULT_PERCENTILES: [u32; 1] = [90];
