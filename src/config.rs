//! Tunables shared by the dispatcher and every connection bound to it.

use std::time::Duration;

/// Receive window advertised to the peer.
pub const DEFAULT_WINDOW_SIZE: u16 = 4096;

/// Start of the ephemeral port range (49152). Local ports are chosen as this
/// base combined with a random 14-bit offset.
pub const DEFAULT_EPHEMERAL_PORT_BASE: u16 = 0xC000;

/// Deadline used by [std::io::Read] on a connection.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline used by [crate::protocol::Connection::open].
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline used by [crate::protocol::Connection::shutdown].
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Minimum spacing between explicit ACKs emitted by a blocked read.
pub const DEFAULT_PROD_ACK_INTERVAL: Duration = Duration::from_millis(10);

/// Connection and dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Window advertised in every outgoing segment.
    pub window_size: u16,
    /// Base OR-ed with a random 14-bit value to form the local port.
    pub ephemeral_port_base: u16,
    /// Deadline for reads issued through [std::io::Read].
    pub read_timeout: Duration,
    /// Deadline for [crate::protocol::Connection::open].
    pub connect_timeout: Duration,
    /// Deadline for [crate::protocol::Connection::shutdown].
    pub close_timeout: Duration,
    /// Minimum spacing between explicit ACKs sent while a read waits for data.
    /// Zero sends one on every poll iteration.
    pub prod_ack_interval: Duration,
    /// When set, blocking loops resend every unacknowledged segment after this
    /// long without progress. `None` leaves recovery to the caller.
    pub retransmit_interval: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            ephemeral_port_base: DEFAULT_EPHEMERAL_PORT_BASE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            prod_ack_interval: DEFAULT_PROD_ACK_INTERVAL,
            retransmit_interval: None,
        }
    }
}
