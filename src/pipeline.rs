// ============================================================================
// SERVICE LIFECYCLE
// ============================================================================
// `StatsdService` owns the packet queue, the receiver task and the parser
// task. The aggregation cache is shared with whoever calls `collect`.
//
// Shutdown order: cancel → receiver exits and closes the socket → both tasks
// joined → queue released. Neither task can send into a released queue.
// ============================================================================

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info};

use crate::cache::{AggregationCache, SharedCache};
use crate::channel::{PacketQueue, PacketReceiver};
use crate::collector::{self, Snapshot};
use crate::config::ServiceConfig;
use crate::error::StatsdResult;
use crate::parser::parse_packet;
use crate::receiver::{self, UdpReceiver};

// ----------------------------------------------------------------------------
// Service Statistics
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct PipelineCounters {
    lines_parsed: AtomicU64,
    parse_errors: AtomicU64,
    metrics_aggregated: AtomicU64,
}

/// Point-in-time view of the pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Datagrams read from the socket, dropped ones included
    pub packets_received: u64,
    /// Datagrams discarded because the queue was full
    pub packets_dropped: u64,
    /// Datagrams taken off the queue by the parser
    pub packets_processed: u64,
    /// Non-empty lines seen by the parser
    pub lines_parsed: u64,
    /// Lines rejected as malformed
    pub parse_errors: u64,
    /// Metrics folded into the cache
    pub metrics_aggregated: u64,
    /// Packets waiting in the queue
    pub queue_depth: usize,
    /// Deepest the queue has been
    pub high_water_mark: usize,
}

// ----------------------------------------------------------------------------
// The Service
// ----------------------------------------------------------------------------

/// A running StatsD listener.
///
/// Dropping the service without calling [`StatsdService::stop`] still
/// cancels both tasks, but does not wait for them.
#[derive(Debug)]
pub struct StatsdService {
    config: ServiceConfig,
    cache: SharedCache,
    queue: PacketQueue,
    shutdown: DropGuard,
    receiver_task: JoinHandle<()>,
    parser_task: JoinHandle<()>,
    counters: Arc<PipelineCounters>,
    local_addr: SocketAddr,
}

impl StatsdService {
    /// Bind the listener and launch the receiver and parser tasks.
    ///
    /// `prior` is the cache returned by a previous instance's
    /// [`StatsdService::stop`]; its aggregated values are kept. With `None`
    /// the service starts from empty stores. Fails without starting anything
    /// if the config is invalid or the address cannot be bound.
    pub async fn start(mut config: ServiceConfig, prior: Option<SharedCache>) -> StatsdResult<Self> {
        config.normalize();
        config.validate()?;

        let address = config.bind_address();
        let socket = receiver::bind(&address).await?;

        let cache = match prior {
            Some(cache) => {
                {
                    let mut guard = cache.lock();
                    guard.set_percentile_limit(config.percentile_limit);
                    debug!(
                        target: "statsd::service",
                        series = guard.len(),
                        "Reusing aggregation state from previous instance"
                    );
                }
                cache
            }
            None => AggregationCache::new(config.percentile_limit).into_shared(),
        };

        let queue = PacketQueue::new(config.allowed_pending_messages);
        let cancel = CancellationToken::new();
        let counters = Arc::new(PipelineCounters::default());

        let listener = UdpReceiver::new(socket, queue.sender(), cancel.clone());
        let local_addr = listener.local_addr()?;

        let receiver_task = tokio::spawn(listener.run());
        let parser_task = tokio::spawn(parse_loop(
            queue.receiver(),
            Arc::clone(&cache),
            Arc::clone(&counters),
            cancel.clone(),
        ));

        info!(
            target: "statsd::service",
            address = %local_addr,
            queue_capacity = queue.capacity(),
            percentile_limit = config.percentile_limit,
            "StatsD service started"
        );

        Ok(Self {
            config,
            cache,
            queue,
            shutdown: cancel.drop_guard(),
            receiver_task,
            parser_task,
            counters,
            local_addr,
        })
    }

    /// Flatten everything aggregated so far into a snapshot, clearing the
    /// stores selected by the `delete_*` settings. Never fails.
    pub fn collect(&self) -> Snapshot {
        let mut cache = self.cache.lock();
        collector::collect(&mut cache, &self.config)
    }

    pub fn stats(&self) -> ServiceStats {
        let queue = self.queue.stats();
        ServiceStats {
            packets_received: queue.sent + queue.dropped,
            packets_dropped: queue.dropped,
            packets_processed: queue.received,
            lines_parsed: self.counters.lines_parsed.load(AtomicOrdering::Relaxed),
            parse_errors: self.counters.parse_errors.load(AtomicOrdering::Relaxed),
            metrics_aggregated: self.counters.metrics_aggregated.load(AtomicOrdering::Relaxed),
            queue_depth: queue.depth,
            high_water_mark: queue.high_water_mark,
        }
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Stop both tasks and hand back the aggregation state, which can be
    /// passed to the next [`StatsdService::start`].
    pub async fn stop(self) -> SharedCache {
        info!(target: "statsd::service", address = %self.local_addr, "Stopping StatsD service");

        self.shutdown.disarm().cancel();

        if let Err(e) = self.receiver_task.await {
            error!(target: "statsd::service", error = %e, "Receiver task failed");
        }
        if let Err(e) = self.parser_task.await {
            error!(target: "statsd::service", error = %e, "Parser task failed");
        }

        let leftover = self.queue.len();
        drop(self.queue);

        info!(
            target: "statsd::service",
            discarded_packets = leftover,
            "StatsD service stopped"
        );

        self.cache
    }
}

/// Drain the queue, parse each packet outside the lock, then fold the
/// packet's metrics into the cache under one lock acquisition.
async fn parse_loop(
    packets: PacketReceiver,
    cache: SharedCache,
    counters: Arc<PipelineCounters>,
    cancel: CancellationToken,
) {
    loop {
        let packet = tokio::select! {
            _ = cancel.cancelled() => break,
            packet = packets.recv() => match packet {
                Some(packet) => packet,
                None => break,
            },
        };

        let parsed = parse_packet(&packet);
        counters
            .lines_parsed
            .fetch_add(parsed.lines as u64, AtomicOrdering::Relaxed);
        counters
            .parse_errors
            .fetch_add(parsed.errors as u64, AtomicOrdering::Relaxed);

        if parsed.metrics.is_empty() {
            continue;
        }

        let applied = cache.lock().aggregate_all(parsed.metrics);
        counters
            .metrics_aggregated
            .fetch_add(applied as u64, AtomicOrdering::Relaxed);
    }

    debug!(target: "statsd::service", "Parser task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::SnapshotValue;
    use crate::error::{NetworkError, StatsdError};
    use std::time::Duration;
    use tokio::net::UdpSocket;

    fn loopback() -> ServiceConfig {
        ServiceConfig {
            delete_timings: false,
            ..ServiceConfig::with_address("127.0.0.1:0")
        }
    }

    async fn send(service: &StatsdService, payload: &str) {
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(payload.as_bytes(), service.local_addr())
            .await
            .unwrap();
    }

    async fn wait_until<F>(service: &StatsdService, done: F)
    where
        F: Fn(&ServiceStats) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done(&service.stats()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("pipeline did not reach the expected state in time");
    }

    #[tokio::test]
    async fn test_counters_over_udp() {
        let service = StatsdService::start(loopback(), None).await.unwrap();

        send(&service, "requests:1|c\nrequests:1|c").await;
        send(&service, "requests:3|c").await;
        wait_until(&service, |s| s.metrics_aggregated >= 3).await;

        let snapshot = service.collect();
        assert_eq!(snapshot.counters["requests.value"], SnapshotValue::Int(5));
        service.stop().await;
    }

    #[tokio::test]
    async fn test_malformed_line_skipped() {
        let service = StatsdService::start(loopback(), None).await.unwrap();

        send(&service, "bad_line_no_colon\ngood:1|c").await;
        wait_until(&service, |s| s.lines_parsed >= 2 && s.metrics_aggregated >= 1).await;

        let stats = service.stats();
        assert_eq!(stats.packets_processed, 1);
        assert_eq!(stats.parse_errors, 1);
        assert_eq!(stats.metrics_aggregated, 1);
        assert_eq!(service.collect().counters["good.value"], SnapshotValue::Int(1));
        service.stop().await;
    }

    #[tokio::test]
    async fn test_handoff_keeps_state() {
        let first = StatsdService::start(loopback(), None).await.unwrap();
        send(&first, "hits:1|c").await;
        wait_until(&first, |s| s.metrics_aggregated >= 1).await;
        let state = first.stop().await;

        let second = StatsdService::start(loopback(), Some(state)).await.unwrap();
        send(&second, "hits:2|c").await;
        wait_until(&second, |s| s.metrics_aggregated >= 1).await;

        assert_eq!(second.collect().counters["hits.value"], SnapshotValue::Int(3));
        second.stop().await;
    }

    #[tokio::test]
    async fn test_collect_applies_delete_flags() {
        let config = ServiceConfig {
            delete_counters: true,
            ..loopback()
        };
        let service = StatsdService::start(config, None).await.unwrap();

        send(&service, "hits:4|c\ntemp:20|g").await;
        wait_until(&service, |s| s.metrics_aggregated >= 2).await;

        let first = service.collect();
        assert_eq!(first.counters.len(), 2);

        let second = service.collect();
        assert!(!second.counters.contains_key("hits.value"));
        assert_eq!(second.counters["temp.value"], SnapshotValue::Float(20.0));
        service.stop().await;
    }

    #[tokio::test]
    async fn test_queue_overflow_counts_drops() {
        let config = ServiceConfig {
            allowed_pending_messages: 1,
            ..loopback()
        };
        let service = StatsdService::start(config, None).await.unwrap();
        let client = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();

        let mut last_dropped = 0;
        for _ in 0..20 {
            for _ in 0..200 {
                let _ = client.send_to(b"burst:1|c", service.local_addr());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;

            let dropped = service.stats().packets_dropped;
            assert!(dropped >= last_dropped, "drop counter went backwards");
            last_dropped = dropped;
            if dropped > 0 {
                break;
            }
        }
        assert!(last_dropped > 0, "no packets dropped with a one-slot queue");

        let stats = service.stats();
        assert!(stats.packets_received >= stats.packets_dropped);
        assert_eq!(stats.high_water_mark, 1);
        service.stop().await;
    }

    #[tokio::test]
    async fn test_bind_failure_aborts_start() {
        let taken = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let config = ServiceConfig::with_address(taken.local_addr().unwrap().to_string());

        let err = StatsdService::start(config, None).await.unwrap_err();
        assert!(matches!(
            err,
            StatsdError::Network(NetworkError::BindFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = ServiceConfig {
            percentiles: vec![150],
            ..loopback()
        };
        let err = StatsdService::start(config, None).await.unwrap_err();
        assert!(matches!(err, StatsdError::Config(_)));
    }

    #[tokio::test]
    async fn test_stop_with_idle_listener() {
        let service = StatsdService::start(loopback(), None).await.unwrap();
        let cache = tokio::time::timeout(Duration::from_secs(5), service.stop())
            .await
            .unwrap();
        assert!(cache.lock().is_empty());
    }
}
