//! # Mote Transport
//!
//! Dual-stack datagram transport for the Mote protocol stack.
//!
//! This crate provides:
//! - A UDP channel that hides IPv4/IPv6 socket differences
//! - IPv4-only and two-socket fallbacks for hosts without dual-stack support
//! - Serialized, non-blocking sends through a single-writer queue
//! - Resilient per-socket read loops with explicit receive handlers

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

pub mod channel;
pub mod endpoint;
pub mod queue;
pub mod socket;
pub mod transport;

pub use channel::{ChannelBuilder, DatagramChannel};
pub use endpoint::{AddressFamily, Endpoint};
pub use socket::{SocketMode, SocketProvider, SystemSockets};
pub use transport::{
    Channel, ChannelId, Datagram, ReceiveHandler, SubscriptionId, TransportError,
    TransportResult, TransportStats,
};

/// Default largest datagram delivered intact, in bytes.
///
/// Reads use a buffer one byte larger so an oversized datagram can be told
/// apart from one that fits exactly.
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 4096;

/// Largest payload a UDP datagram can carry over IPv4.
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Channel configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Port for the wildcard sockets (0 = OS-assigned)
    pub port: u16,
    /// Bind one socket to exactly this address instead of the wildcards
    pub local_endpoint: Option<SocketAddr>,
    /// Receive buffer size (OS default when unset)
    pub recv_buffer_size: Option<usize>,
    /// Send buffer size (OS default when unset)
    pub send_buffer_size: Option<usize>,
    /// Largest datagram delivered intact
    pub max_datagram_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            port: 0,
            local_endpoint: None,
            recv_buffer_size: None,
            send_buffer_size: None,
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
        }
    }
}

impl ChannelConfig {
    /// Listen on `port` on every available family.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Bind a single socket to `addr`.
    #[must_use]
    pub fn bind_to(mut self, addr: SocketAddr) -> Self {
        self.local_endpoint = Some(addr);
        self
    }

    /// Set custom OS buffer sizes.
    ///
    /// # Arguments
    /// * `recv_size` - Receive buffer size in bytes
    /// * `send_size` - Send buffer size in bytes
    #[must_use]
    pub fn with_buffer_sizes(mut self, recv_size: usize, send_size: usize) -> Self {
        self.recv_buffer_size = Some(recv_size);
        self.send_buffer_size = Some(send_size);
        self
    }

    /// Set the largest datagram delivered intact.
    #[must_use]
    pub fn with_max_datagram_size(mut self, size: usize) -> Self {
        self.max_datagram_size = size;
        self
    }

    /// Check the configuration for values no socket could honour.
    ///
    /// # Errors
    /// Returns `TransportError::InvalidConfig` describing the first problem
    pub fn validate(&self) -> TransportResult<()> {
        if self.max_datagram_size == 0 || self.max_datagram_size > MAX_UDP_PAYLOAD {
            return Err(TransportError::InvalidConfig(format!(
                "max_datagram_size must be in 1..={MAX_UDP_PAYLOAD}, got {}",
                self.max_datagram_size
            )));
        }
        if self.recv_buffer_size == Some(0) || self.send_buffer_size == Some(0) {
            return Err(TransportError::InvalidConfig(
                "socket buffer sizes must be non-zero".to_string(),
            ));
        }
        if let Some(local) = self.local_endpoint {
            if self.port != 0 && local.port() != self.port {
                return Err(TransportError::InvalidConfig(format!(
                    "port {} conflicts with local endpoint {local}",
                    self.port
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ChannelConfig::default();
        assert_eq!(config.port, 0);
        assert_eq!(config.max_datagram_size, 4096);
        assert!(config.local_endpoint.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let config = ChannelConfig::default()
            .with_port(5683)
            .with_buffer_sizes(1024, 2048)
            .with_max_datagram_size(1152);

        assert_eq!(config.port, 5683);
        assert_eq!(config.recv_buffer_size, Some(1024));
        assert_eq!(config.send_buffer_size, Some(2048));
        assert_eq!(config.max_datagram_size, 1152);
    }

    #[test]
    fn test_validate_rejects_bad_sizes() {
        let config = ChannelConfig::default().with_max_datagram_size(0);
        assert!(matches!(
            config.validate(),
            Err(TransportError::InvalidConfig(_))
        ));

        let config = ChannelConfig::default().with_max_datagram_size(70_000);
        assert!(config.validate().is_err());

        let config = ChannelConfig::default().with_buffer_sizes(0, 1024);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_port_conflict() {
        let config = ChannelConfig::default()
            .with_port(5683)
            .bind_to("127.0.0.1:5684".parse().unwrap());
        assert!(config.validate().is_err());

        let config = ChannelConfig::default()
            .with_port(5683)
            .bind_to("127.0.0.1:5683".parse().unwrap());
        assert!(config.validate().is_ok());
    }
}
