//! The IP layer as seen from TCP.

use std::collections::VecDeque;
use std::io;

use super::checksum::ChainedBuffer;

/// An inbound IPv4 datagram carrying a TCP segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Source IPv4 address.
    pub src: [u8; 4],
    /// Destination IPv4 address.
    pub dst: [u8; 4],
    /// The TCP segment (header and payload), without the IP header.
    pub payload: Vec<u8>,
}

/// The IP layer underneath the dispatcher.
///
/// Nothing here is interrupt driven: inbound datagrams are only handed over
/// when the dispatcher asks for them via [Transport::deliver_pending].
pub trait Transport {
    /// Returns the address outgoing segments are sent from. Used as the
    /// source address in the checksum pseudo-header.
    fn local_address(&self) -> [u8; 4];

    /// Sends `buf` as the payload of an IPv4 datagram to `dst` with the given
    /// protocol number.
    ///
    /// # Errors
    ///
    /// Returns an error if the datagram could not be handed to the link.
    fn send(&mut self, dst: [u8; 4], protocol: u8, buf: &dyn ChainedBuffer) -> io::Result<()>;

    /// Appends every pending inbound TCP datagram to `queue`.
    fn deliver_pending(&mut self, queue: &mut VecDeque<Datagram>);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn local_address(&self) -> [u8; 4] {
        (**self).local_address()
    }

    fn send(&mut self, dst: [u8; 4], protocol: u8, buf: &dyn ChainedBuffer) -> io::Result<()> {
        (**self).send(dst, protocol, buf)
    }

    fn deliver_pending(&mut self, queue: &mut VecDeque<Datagram>) {
        (**self).deliver_pending(queue)
    }
}
