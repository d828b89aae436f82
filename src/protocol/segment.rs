//! Received and outgoing TCP segments as owned values.

use std::{fmt, ops};

use super::SocketAddr;
use crate::{Error, Result};

/// Control bits carried by a segment, using the TCP wire bit positions.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flags(u8);

impl Flags {
    /// No more data from sender.
    pub const FIN: Flags = Flags(0x01);
    /// Synchronize sequence numbers.
    pub const SYN: Flags = Flags(0x02);
    /// Reset the connection.
    pub const RST: Flags = Flags(0x04);
    /// Push function.
    pub const PSH: Flags = Flags(0x08);
    /// Acknowledgment field significant.
    pub const ACK: Flags = Flags(0x10);
    /// Urgent pointer field significant.
    pub const URG: Flags = Flags(0x20);

    /// No control bits set.
    pub const fn empty() -> Self {
        Flags(0)
    }

    /// Wraps the flags byte of a TCP header. Bits above URG are dropped.
    pub const fn from_bits(bits: u8) -> Self {
        Flags(bits & 0x3F)
    }

    /// Returns the raw flags byte.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns `true` if every bit of `other` is set.
    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if no bit is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl ops::BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Flags, &str); 6] = [
            (Flags::URG, "URG"),
            (Flags::ACK, "ACK"),
            (Flags::PSH, "PSH"),
            (Flags::RST, "RST"),
            (Flags::SYN, "SYN"),
            (Flags::FIN, "FIN"),
        ];

        if self.is_empty() {
            return f.write_str("-");
        }

        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }

        Ok(())
    }
}

/// A TCP segment with an owned copy of its payload.
///
/// Immutable after construction; queues move segments rather than editing
/// them.
#[derive(Clone, PartialEq, Eq)]
pub struct Segment {
    payload: Vec<u8>,
    src: SocketAddr,
    dst: SocketAddr,
    seq: u32,
    ack: u32,
    flags: Flags,
}

impl Segment {
    /// Builds a segment, copying `payload` into storage owned by the segment.
    ///
    /// `None` yields an empty segment, the form used for pure control segments
    /// (ACK, SYN, FIN).
    ///
    /// # Errors
    ///
    /// Returns [Error::OutOfMemory] if the payload storage cannot be allocated
    /// or if `Some` is given with an empty slice.
    pub fn build(
        payload: Option<&[u8]>,
        src: SocketAddr,
        dst: SocketAddr,
        seq: u32,
        ack: u32,
        flags: Flags,
    ) -> Result<Self> {
        let payload = match payload {
            None => Vec::new(),
            Some([]) => return Err(Error::OutOfMemory),
            Some(data) => {
                let mut buf = Vec::new();
                buf.try_reserve_exact(data.len())
                    .map_err(|_| Error::OutOfMemory)?;
                buf.extend_from_slice(data);
                buf
            }
        };

        Ok(Self {
            payload,
            src,
            dst,
            seq,
            ack,
            flags,
        })
    }

    /// Returns `true` if the stream offset `n` falls inside this segment's
    /// payload (`seq <= n < seq + len`).
    ///
    /// Offsets are compared without wraparound handling.
    pub fn contains_offset(&self, n: u32) -> bool {
        let start = self.seq as u64;
        start <= n as u64 && (n as u64) < start + self.payload.len() as u64
    }

    /// Returns the sequence number one past the last payload byte.
    pub fn end_seq(&self) -> u32 {
        self.seq.wrapping_add(self.payload.len() as u32)
    }

    /// Returns the payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns the payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns `true` if the segment carries no payload.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Returns the sending socket address.
    pub fn src(&self) -> SocketAddr {
        self.src
    }

    /// Returns the receiving socket address.
    pub fn dst(&self) -> SocketAddr {
        self.dst
    }

    /// Returns the sequence number of the first payload byte.
    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// Returns the acknowledgment number.
    pub fn ack(&self) -> u32 {
        self.ack
    }

    /// Returns the control bits.
    pub fn flags(&self) -> Flags {
        self.flags
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("src", &format_args!("{}", self.src))
            .field("dst", &format_args!("{}", self.dst))
            .field("seq", &self.seq)
            .field("ack", &self.ack)
            .field("flags", &self.flags)
            .field("len", &self.payload.len())
            .finish()
    }
}
