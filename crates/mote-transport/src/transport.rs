//! Channel contract shared by datagram transports.
//!
//! This module defines the [`Channel`] trait the owning protocol layer talks
//! to, the [`Datagram`] delivered to receive handlers, and the transport
//! error and statistics types.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::endpoint::Endpoint;

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// I/O error from underlying socket
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Address binding failed
    #[error("Failed to bind to {addr}: {source}")]
    BindFailed {
        /// Address the bind was attempted on
        addr: SocketAddr,
        /// Underlying error
        source: io::Error,
    },

    /// Channel started outside a Tokio runtime
    #[error("No Tokio runtime available to drive the channel")]
    NoRuntime,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a channel, carried on every received datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel-{}", self.0)
    }
}

/// A datagram received by a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Payload bytes exactly as received
    pub payload: Vec<u8>,
    /// Sender, with IPv4-mapped addresses normalized to IPv4
    pub source: Endpoint,
    /// Channel that received it
    pub channel: ChannelId,
    /// The datagram was larger than the configured maximum and was cut short
    pub truncated: bool,
}

/// Receiver of datagram notifications.
///
/// Handlers run on the task that completed the read; a slow handler delays
/// only that socket's next read.
pub trait ReceiveHandler: Send + Sync + 'static {
    /// Called once per received datagram.
    fn on_datagram(&self, datagram: &Datagram);
}

impl<F> ReceiveHandler for F
where
    F: Fn(&Datagram) + Send + Sync + 'static,
{
    fn on_datagram(&self, datagram: &Datagram) {
        self(datagram);
    }
}

impl ReceiveHandler for tokio::sync::mpsc::UnboundedSender<Datagram> {
    fn on_datagram(&self, datagram: &Datagram) {
        // A closed receiver just stops listening.
        let _ = self.send(datagram.clone());
    }
}

/// Handle returned by [`Channel::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

/// Datagram channel contract.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use mote_transport::channel::DatagramChannel;
/// use mote_transport::transport::{Channel, Datagram};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let channel: Arc<dyn Channel> = Arc::new(DatagramChannel::with_port(0));
/// channel.start()?;
///
/// channel.subscribe(Arc::new(|d: &Datagram| {
///     println!("{} bytes from {}", d.payload.len(), d.source);
/// }));
/// channel.send(b"hello".to_vec(), "127.0.0.1:5683".parse()?);
/// # Ok(())
/// # }
/// ```
pub trait Channel: Send + Sync {
    /// Open sockets and begin reading. A second call while running is a no-op.
    ///
    /// # Errors
    /// Returns `TransportError` if socket setup fails
    fn start(&self) -> TransportResult<()>;

    /// Close all sockets and discard queued datagrams. Idempotent.
    fn stop(&self);

    /// Queue `payload` for `destination` without waiting for the network.
    fn send(&self, payload: Vec<u8>, destination: Endpoint);

    /// Register a receive handler.
    fn subscribe(&self, handler: Arc<dyn ReceiveHandler>) -> SubscriptionId;

    /// Remove a receive handler. Returns `false` if it was not registered.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Address the channel is (or will be) bound to.
    fn local_endpoint(&self) -> Endpoint;

    /// Whether delivery is guaranteed. Datagram channels never are.
    fn is_reliable(&self) -> bool {
        false
    }

    /// Get channel statistics (optional).
    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

/// Transport statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Total packets sent
    pub packets_sent: u64,
    /// Total packets received
    pub packets_received: u64,
    /// Send errors
    pub send_errors: u64,
    /// Receive errors
    pub recv_errors: u64,
}

/// Lock-free counters behind [`TransportStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    send_errors: AtomicU64,
    recv_errors: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_send(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_recv(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_recv_error(&self) {
        self.recv_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> TransportStats {
        TransportStats {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            recv_errors: self.recv_errors.load(Ordering::Relaxed),
        }
    }
}
