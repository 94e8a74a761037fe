// ============================================================================
// UDP RECEIVER
// ============================================================================
// Reads datagrams from the listening socket and pushes a copy of each onto the
// packet queue. The read loop never waits on the parser: a full queue means
// the datagram is dropped.
// ============================================================================

use std::net::SocketAddr;

use flume::TrySendError;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::PacketSender;
use crate::error::NetworkError;
use crate::UDP_MAX_PACKET_SIZE;

/// Resolve `address` and bind a UDP socket to the first address that works.
pub async fn bind(address: &str) -> Result<UdpSocket, NetworkError> {
    let candidates: Vec<SocketAddr> = tokio::net::lookup_host(address)
        .await
        .map_err(|e| NetworkError::AddressResolution {
            address: address.to_string(),
            message: e.to_string(),
        })?
        .collect();

    let mut last_error = None;
    for candidate in candidates {
        match UdpSocket::bind(candidate).await {
            Ok(socket) => return Ok(socket),
            Err(e) => last_error = Some(e),
        }
    }

    Err(match last_error {
        Some(source) => NetworkError::BindFailed {
            address: address.to_string(),
            source,
        },
        None => NetworkError::AddressResolution {
            address: address.to_string(),
            message: "no addresses found".to_string(),
        },
    })
}

/// The listener task state.
#[derive(Debug)]
pub struct UdpReceiver {
    socket: UdpSocket,
    queue: PacketSender,
    cancel: CancellationToken,
}

impl UdpReceiver {
    pub fn new(socket: UdpSocket, queue: PacketSender, cancel: CancellationToken) -> Self {
        Self {
            socket,
            queue,
            cancel,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        self.socket
            .local_addr()
            .map_err(|e| NetworkError::SocketError {
                message: e.to_string(),
            })
    }

    /// Read until cancelled. The socket is closed when this returns.
    pub async fn run(self) {
        let mut buf = vec![0u8; UDP_MAX_PACKET_SIZE];

        info!(
            target: "statsd::receiver",
            address = ?self.socket.local_addr().ok(),
            "UDP listener started"
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    break;
                }
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, peer)) => self.enqueue(&buf[..len], peer),
                        Err(e) => {
                            error!(
                                target: "statsd::receiver",
                                error = %e,
                                "Error reading from UDP socket"
                            );
                        }
                    }
                }
            }
        }

        info!(target: "statsd::receiver", "UDP listener stopped");
    }

    fn enqueue(&self, datagram: &[u8], peer: SocketAddr) {
        match self.queue.try_send(datagram.to_vec()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(
                    target: "statsd::receiver",
                    dropped_total = self.queue.dropped(),
                    %peer,
                    "Packet queue full, dropping packet. \
                     Consider increasing allowed_pending_messages"
                );
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!(target: "statsd::receiver", "Packet queue closed, discarding packet");
            }
        }
    }
}
