//! Addressing for the connection registry.

use std::fmt;

/// An IPv4 address and a port number.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct SocketAddr {
    /// IPv4 address.
    pub addr: [u8; 4],
    /// Port number.
    pub port: u16,
}

impl SocketAddr {
    /// The unspecified IPv4 address (`0.0.0.0`). A binding on this address
    /// receives traffic for its port regardless of destination address.
    pub const UNSPECIFIED: [u8; 4] = [0, 0, 0, 0];

    /// Creates a new socket address from an IPv4 address and port.
    pub const fn new(addr: [u8; 4], port: u16) -> Self {
        Self { addr, port }
    }

    /// Returns `true` if the address part is `0.0.0.0`.
    pub fn is_unspecified(&self) -> bool {
        self.addr == Self::UNSPECIFIED
    }

    /// Returns the same port bound on the unspecified address.
    pub fn wildcard(&self) -> Self {
        Self::new(Self::UNSPECIFIED, self.port)
    }
}

impl From<(std::net::Ipv4Addr, u16)> for SocketAddr {
    fn from((addr, port): (std::net::Ipv4Addr, u16)) -> Self {
        Self::new(addr.octets(), port)
    }
}

impl fmt::Display for SocketAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}:{}",
            self.addr[0], self.addr[1], self.addr[2], self.addr[3], self.port,
        )
    }
}

/// A connection's four-tuple, seen from the local side.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct Socket {
    /// The local socket address.
    pub local: SocketAddr,
    /// The remote socket address.
    pub remote: SocketAddr,
}

impl fmt::Display for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.local, self.remote)
    }
}
