use crate::ParseError;
use crate::protocol::{Flags, checksum};

/// Representation of a TCP segment header (RFC 793 3.1).
///
/// ```text
///   0                   1                   2                   3
///     0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |          Source Port          |       Destination Port        |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |                        Sequence Number                        |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |                    Acknowledgment Number                      |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |  Data |           |U|A|P|R|S|F|                               |
///    | Offset| Reserved  |R|C|S|S|Y|I|            Window             |
///    |       |           |G|K|H|T|N|N|                               |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |           Checksum            |         Urgent Pointer        |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |                    Options                    |    Padding    |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |                             data                              |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Outgoing headers never carry options, so their data offset is always 5.
#[derive(Debug, Clone, Copy)]
pub struct TcpHeader {
    src_port: u16,
    dst_port: u16,
    seq_number: u32,
    ack_number: u32,
    /// Data Offset (4 bits), Reserved (4 bits) and the flags byte, exactly as
    /// they appear on the wire.
    offset_and_control_bits: u16,
    window: u16,
    checksum: u16,
    urgent_pointer: u16,
    options: TcpOptions,
}

impl TcpHeader {
    /// Minimum length of a TCP header in bytes.
    pub const MIN_HEADER_LEN: u16 = 20;

    /// Minimum data offset of a TCP header.
    pub const MIN_DATA_OFFSET: u16 = 5;

    /// Maximum length of a TCP header in bytes (data offset 15).
    pub const MAX_HEADER_LEN: u16 = 60;

    /// Maximum data offset of a TCP header.
    pub const MAX_DATA_OFFSET: u16 = 15;

    /// Byte offset of the checksum field.
    pub const CHECKSUM_OFFSET: usize = 16;

    /// Creates an option-less header. The checksum is left zero; it is filled
    /// in by the send path once the pseudo-header is known.
    pub fn new(
        src_port: u16,
        dst_port: u16,
        seq_number: u32,
        ack_number: u32,
        flags: Flags,
        window: u16,
    ) -> Self {
        Self {
            src_port,
            dst_port,
            seq_number,
            ack_number,
            offset_and_control_bits: (Self::MIN_DATA_OFFSET << 12) | flags.bits() as u16,
            window,
            checksum: 0,
            urgent_pointer: 0,
            options: TcpOptions::new(),
        }
    }

    /// Returns the Source Port field.
    pub fn src_port(&self) -> u16 {
        self.src_port
    }

    /// Returns the Destination Port field.
    pub fn dst_port(&self) -> u16 {
        self.dst_port
    }

    /// Returns the Sequence Number field.
    pub fn seq_number(&self) -> u32 {
        self.seq_number
    }

    /// Returns the Acknowledgment Number field.
    pub fn ack_number(&self) -> u32 {
        self.ack_number
    }

    /// Returns the Data Offset field (header length in 32-bit words).
    pub fn data_offset(&self) -> u8 {
        // Stored in the higher 4 bits.
        (self.offset_and_control_bits >> 12) as u8
    }

    /// Returns the control bits.
    pub fn flags(&self) -> Flags {
        Flags::from_bits(self.offset_and_control_bits as u8)
    }

    /// Returns the Window field.
    pub fn window(&self) -> u16 {
        self.window
    }

    /// Returns the Checksum field.
    pub fn checksum(&self) -> u16 {
        self.checksum
    }

    /// Sets the Checksum field.
    pub fn set_checksum(&mut self, checksum: u16) {
        self.checksum = checksum;
    }

    /// Returns the Urgent Pointer field.
    pub fn urgent_pointer(&self) -> u16 {
        self.urgent_pointer
    }

    /// Returns the options carried between the fixed header and the payload.
    pub fn options(&self) -> &TcpOptions {
        &self.options
    }

    /// Returns the length of the TCP header in bytes, including options.
    pub fn header_len(&self) -> usize {
        (self.data_offset() as usize) << 2
    }

    /// Returns the memory representation of the TCP header as a byte array in
    /// big-endian (network) byte order and the number of bytes written.
    pub fn to_be_bytes(&self) -> ([u8; Self::MAX_HEADER_LEN as usize], usize) {
        let mut raw_header = [0u8; Self::MAX_HEADER_LEN as usize];
        let size = self.header_len();

        raw_header[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        raw_header[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        raw_header[4..8].copy_from_slice(&self.seq_number.to_be_bytes());
        raw_header[8..12].copy_from_slice(&self.ack_number.to_be_bytes());
        raw_header[12..14].copy_from_slice(&self.offset_and_control_bits.to_be_bytes());
        raw_header[14..16].copy_from_slice(&self.window.to_be_bytes());
        raw_header[16..18].copy_from_slice(&self.checksum.to_be_bytes());
        raw_header[18..20].copy_from_slice(&self.urgent_pointer.to_be_bytes());

        let opts = self.options.as_slice();
        raw_header[20..20 + opts.len()].copy_from_slice(opts);

        (raw_header, size)
    }

    /// Serializes the header with its checksum computed over the
    /// pseudo-header for `src` -> `dst`, this header and `payload`.
    ///
    /// The stored checksum field is ignored.
    pub fn to_checksummed_bytes(
        &self,
        src: [u8; 4],
        dst: [u8; 4],
        payload: &[u8],
    ) -> ([u8; Self::MAX_HEADER_LEN as usize], usize) {
        let (mut raw_header, size) = self.to_be_bytes();

        // Checksum field must be 0 for computation.
        raw_header[Self::CHECKSUM_OFFSET] = 0x00;
        raw_header[Self::CHECKSUM_OFFSET + 1] = 0x00;

        let sum = checksum::segment_checksum(src, dst, &raw_header[..size], payload);
        raw_header[Self::CHECKSUM_OFFSET..Self::CHECKSUM_OFFSET + 2]
            .copy_from_slice(&sum.to_be_bytes());

        (raw_header, size)
    }
}

/// Parses the header at the start of a segment. Bytes past
/// `data_offset << 2` are payload and left untouched.
impl TryFrom<&[u8]> for TcpHeader {
    type Error = ParseError;

    fn try_from(raw: &[u8]) -> Result<Self, Self::Error> {
        if raw.len() < Self::MIN_HEADER_LEN as usize {
            return Err(ParseError::InvalidBufferLength {
                provided: raw.len(),
                min: Self::MIN_HEADER_LEN,
            });
        }

        let offset_and_control_bits = u16::from_be_bytes([raw[12], raw[13]]);
        let data_offset = offset_and_control_bits >> 12;

        if data_offset < Self::MIN_DATA_OFFSET {
            return Err(ParseError::InvalidDataOffset {
                provided: data_offset,
                min: Self::MIN_DATA_OFFSET,
                max: Self::MAX_DATA_OFFSET,
            });
        }

        // There are less bytes in the buffer than advertised by data offset.
        let header_len = (data_offset << 2) as usize;
        if header_len > raw.len() {
            return Err(ParseError::HeaderLengthMismatch {
                provided: raw.len(),
                expected: data_offset << 2,
            });
        }

        Ok(Self {
            src_port: u16::from_be_bytes([raw[0], raw[1]]),
            dst_port: u16::from_be_bytes([raw[2], raw[3]]),
            seq_number: u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]),
            ack_number: u32::from_be_bytes([raw[8], raw[9], raw[10], raw[11]]),
            offset_and_control_bits,
            window: u16::from_be_bytes([raw[14], raw[15]]),
            checksum: u16::from_be_bytes([raw[16], raw[17]]),
            urgent_pointer: u16::from_be_bytes([raw[18], raw[19]]),
            // Limit range to data offset so payload bytes are not read as
            // options.
            options: TcpOptions::from_slice(&raw[Self::MIN_HEADER_LEN as usize..header_len]),
        })
    }
}

/// Raw TCP options, up to 40 bytes.
#[derive(Debug, Clone, Copy)]
pub struct TcpOptions {
    len: usize,
    buf: [u8; 40],
}

impl TcpOptions {
    /// Maximum length of TCP options in bytes.
    pub const MAX_OPTIONS_LEN: usize = 40;

    /// Creates empty TCP options.
    pub fn new() -> Self {
        Self {
            len: 0,
            buf: [0u8; Self::MAX_OPTIONS_LEN],
        }
    }

    fn from_slice(opts: &[u8]) -> Self {
        // Data offset caps the header at 60 bytes, so this never truncates.
        let len = opts.len().min(Self::MAX_OPTIONS_LEN);
        let mut buf = [0u8; Self::MAX_OPTIONS_LEN];
        buf[..len].copy_from_slice(&opts[..len]);

        Self { len, buf }
    }

    /// Returns the length of the options in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no option bytes are present.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the raw option bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Returns an iterator over the options, stopping at End of Option List
    /// or at the first option whose length runs past the buffer.
    pub fn iter(&self) -> OptionsIter<'_> {
        OptionsIter {
            rest: self.as_slice(),
        }
    }

    /// Returns the Maximum Segment Size value, if advertised.
    pub fn mss(&self) -> Option<u16> {
        self.iter().find_map(|opt| match (opt.kind, opt.data) {
            (OptionKind::Mss, [hi, lo]) => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        })
    }
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> IntoIterator for &'a TcpOptions {
    type Item = TcpOption<'a>;
    type IntoIter = OptionsIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Represents the kinds of TCP options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    /// End of Option List (kind 0).
    Eol,
    /// No-Operation (kind 1).
    Nop,
    /// Maximum Segment Size (kind 2, length 4).
    Mss,
    /// Any other kind, carried with its length for diagnostics only.
    Other(u8),
}

impl From<u8> for OptionKind {
    fn from(val: u8) -> Self {
        match val {
            0 => Self::Eol,
            1 => Self::Nop,
            2 => Self::Mss,
            other => Self::Other(other),
        }
    }
}

impl From<OptionKind> for u8 {
    fn from(kind: OptionKind) -> u8 {
        match kind {
            OptionKind::Eol => 0,
            OptionKind::Nop => 1,
            OptionKind::Mss => 2,
            OptionKind::Other(val) => val,
        }
    }
}

/// A single option: its kind, the on-wire length (1 for single-byte kinds)
/// and the data following the kind/length pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpOption<'a> {
    /// Option kind.
    pub kind: OptionKind,
    /// Total on-wire length of the option.
    pub len: u8,
    /// Option data (empty for `Nop`).
    pub data: &'a [u8],
}

/// Iterator over the options of a TCP header.
#[derive(Debug, Clone)]
pub struct OptionsIter<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for OptionsIter<'a> {
    type Item = TcpOption<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (&kind, tail) = self.rest.split_first()?;

        match OptionKind::from(kind) {
            OptionKind::Eol => {
                self.rest = &[];
                None
            }
            OptionKind::Nop => {
                self.rest = tail;
                Some(TcpOption {
                    kind: OptionKind::Nop,
                    len: 1,
                    data: &[],
                })
            }
            kind => {
                let len = *tail.first()?;

                if len < 2 || len as usize > self.rest.len() {
                    self.rest = &[];
                    return None;
                }

                let data = &self.rest[2..len as usize];
                self.rest = &self.rest[len as usize..];

                Some(TcpOption { kind, len, data })
            }
        }
    }
}
