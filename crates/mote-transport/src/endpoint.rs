//! Network endpoints.
//!
//! An [`Endpoint`] is an address, a port and the family they belong to.
//! IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) are folded into plain IPv4
//! on construction, so a peer reached through a dual-stack socket compares
//! equal to the same peer reached through an IPv4 socket.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::str::FromStr;

use socket2::Domain;

/// Address family of an endpoint or socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    /// IPv4
    Ipv4,
    /// IPv6
    Ipv6,
}

impl AddressFamily {
    /// Family of an IP address.
    #[must_use]
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Self::Ipv4,
            IpAddr::V6(_) => Self::Ipv6,
        }
    }

    /// Wildcard address of this family with the given port.
    #[must_use]
    pub fn unspecified(self, port: u16) -> SocketAddr {
        match self {
            Self::Ipv4 => SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)),
            Self::Ipv6 => SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0)),
        }
    }

    pub(crate) fn domain(self) -> Domain {
        match self {
            Self::Ipv4 => Domain::IPV4,
            Self::Ipv6 => Domain::IPV6,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipv4 => f.write_str("IPv4"),
            Self::Ipv6 => f.write_str("IPv6"),
        }
    }
}

/// Immutable network endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint(SocketAddr);

impl Endpoint {
    /// Create an endpoint, normalizing IPv4-mapped IPv6 to IPv4.
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
                Some(v4) => Self(SocketAddr::V4(SocketAddrV4::new(v4, v6.port()))),
                None => Self(addr),
            },
            SocketAddr::V4(_) => Self(addr),
        }
    }

    /// IP address.
    #[must_use]
    pub fn ip(&self) -> IpAddr {
        self.0.ip()
    }

    /// Port number.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.0.port()
    }

    /// Address family.
    #[must_use]
    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.0.ip())
    }

    /// Underlying socket address.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }

    /// Form usable as a destination on an IPv6 dual-stack socket.
    ///
    /// IPv4 endpoints become `[::ffff:a.b.c.d]:port`; IPv6 endpoints are
    /// returned unchanged.
    #[must_use]
    pub fn to_ipv4_mapped(&self) -> SocketAddr {
        match self.0 {
            SocketAddr::V4(v4) => {
                SocketAddr::V6(SocketAddrV6::new(v4.ip().to_ipv6_mapped(), v4.port(), 0, 0))
            }
            SocketAddr::V6(_) => self.0,
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr)
    }
}

impl From<(IpAddr, u16)> for Endpoint {
    fn from((ip, port): (IpAddr, u16)) -> Self {
        Self::new(SocketAddr::new(ip, port))
    }
}

impl From<Endpoint> for SocketAddr {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.0
    }
}

impl FromStr for Endpoint {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<SocketAddr>().map(Self::new)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
