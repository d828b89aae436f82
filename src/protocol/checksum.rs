//! Internet checksum over non-contiguous buffers and the TCP pseudo-header.

/// IP protocol number for TCP.
pub const PROTOCOL_TCP: u8 = 6;

/// Length of the TCP pseudo-header in bytes.
pub const PSEUDO_HEADER_LEN: usize = 12;

/// A read-only view over a sequence of byte chunks that together form one
/// logical buffer, e.g. pseudo-header, header and payload, without copying
/// them into a single allocation.
pub trait ChainedBuffer {
    /// Returns the number of chunks in the chain.
    fn chunk_count(&self) -> usize;

    /// Returns the chunk at `index`.
    ///
    /// # Panics
    ///
    /// May panic if `index >= self.chunk_count()`.
    fn chunk(&self, index: usize) -> &[u8];

    /// Returns the combined length of every chunk.
    fn total_len(&self) -> usize {
        (0..self.chunk_count()).map(|i| self.chunk(i).len()).sum()
    }

    /// Copies the chain into one contiguous vector.
    fn to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.total_len());
        for i in 0..self.chunk_count() {
            buf.extend_from_slice(self.chunk(i));
        }
        buf
    }
}

impl ChainedBuffer for Vec<u8> {
    fn chunk_count(&self) -> usize {
        1
    }

    fn chunk(&self, _index: usize) -> &[u8] {
        self
    }
}

impl<const N: usize> ChainedBuffer for [u8; N] {
    fn chunk_count(&self) -> usize {
        1
    }

    fn chunk(&self, _index: usize) -> &[u8] {
        self
    }
}

impl<'a, const N: usize> ChainedBuffer for [&'a [u8]; N] {
    fn chunk_count(&self) -> usize {
        N
    }

    fn chunk(&self, index: usize) -> &[u8] {
        self[index]
    }
}

impl<'a> ChainedBuffer for Vec<&'a [u8]> {
    fn chunk_count(&self) -> usize {
        self.len()
    }

    fn chunk(&self, index: usize) -> &[u8] {
        self[index]
    }
}

/// Builds the pseudo-header conceptually prefixed to a TCP segment for
/// checksum purposes (RFC 793 3.1).
///
/// ```text
///        +--------+--------+--------+--------+
///        |           Source Address          |
///        +--------+--------+--------+--------+
///        |         Destination Address       |
///        +--------+--------+--------+--------+
///        |  zero  |  PTCL  |    TCP Length   |
///        +--------+--------+--------+--------+
/// ```
pub fn pseudo_header(src: [u8; 4], dst: [u8; 4], tcp_len: u16) -> [u8; PSEUDO_HEADER_LEN] {
    let mut pseudo = [0u8; PSEUDO_HEADER_LEN];

    pseudo[0..4].copy_from_slice(&src);
    pseudo[4..8].copy_from_slice(&dst);
    pseudo[8] = 0;
    pseudo[9] = PROTOCOL_TCP;
    pseudo[10..12].copy_from_slice(&tcp_len.to_be_bytes());

    pseudo
}

/// Returns the 16 bit one's complement of the one's complement sum of all
/// 16 bit words in `buf`.
///
/// A chunk of odd length carries its last octet over to pair with the first
/// octet of the next chunk; an odd total is padded on the right with a zero
/// octet. Summing a buffer that already embeds a correct checksum yields 0.
pub fn checksum(buf: &dyn ChainedBuffer) -> u16 {
    let mut sum = 0u32;
    let mut carry_byte: Option<u8> = None;

    for i in 0..buf.chunk_count() {
        let mut bytes = buf.chunk(i);

        if let Some(hi) = carry_byte.take() {
            match bytes.split_first() {
                Some((&lo, rest)) => {
                    sum = fold(sum + u16::from_be_bytes([hi, lo]) as u32);
                    bytes = rest;
                }
                None => {
                    carry_byte = Some(hi);
                    continue;
                }
            }
        }

        let mut words = bytes.chunks_exact(2);
        for word in &mut words {
            sum = fold(sum + u16::from_be_bytes([word[0], word[1]]) as u32);
        }

        if let [last] = words.remainder() {
            carry_byte = Some(*last);
        }
    }

    if let Some(hi) = carry_byte {
        sum = fold(sum + u16::from_be_bytes([hi, 0x00]) as u32);
    }

    !(fold(sum) as u16)
}

/// Computes the checksum of a TCP segment given the IPv4 addresses it travels
/// between. `header` must have its checksum field zeroed when computing a
/// value to embed; with the embedded value left in place the result is 0 for
/// an intact segment.
///
/// The segment length must fit the pseudo-header's 16 bit length field.
pub fn segment_checksum(src: [u8; 4], dst: [u8; 4], header: &[u8], payload: &[u8]) -> u16 {
    let pseudo = pseudo_header(src, dst, (header.len() + payload.len()) as u16);
    checksum(&[&pseudo[..], header, payload])
}

/// Adds the higher 16 bits to the lower 16 bits until no carry remains.
#[inline]
fn fold(mut sum: u32) -> u32 {
    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum
}
