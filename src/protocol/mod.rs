//! Client-side TCP over IPv4.
//!
//! [Segment] is the unit queued for reading and retransmission,
//! [Connection] drives one connection's state machine and [Dispatcher]
//! routes inbound segments to connections and frames outgoing ones.

pub mod checksum;
pub mod headers;
pub mod random;
pub mod transport;

pub mod socket;
pub use socket::{Socket, SocketAddr};

pub mod segment;
pub use segment::{Flags, Segment};

pub mod connection;
pub use connection::{Connection, State};

pub mod dispatcher;
pub use dispatcher::Dispatcher;

pub use crate::config::Config;
pub use random::{RandomSource, SequenceGenerator, XorShiftSource};
pub use transport::{Datagram, Transport};

#[cfg(test)]
pub(crate) mod testing;
