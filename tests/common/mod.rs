#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use boot_tcp::protocol::checksum::{self, ChainedBuffer, PROTOCOL_TCP};
use boot_tcp::protocol::headers::TcpHeader;
use boot_tcp::protocol::{
    Config, Datagram, Dispatcher, Flags, RandomSource, SocketAddr, Transport, XorShiftSource,
};

pub const CLIENT_ADDR: [u8; 4] = [10, 0, 2, 15];
pub const SERVER_ADDR: [u8; 4] = [10, 0, 2, 2];
pub const SERVER_PORT: u16 = 80;
pub const SERVER_ISN: u32 = 5000;

pub const SERVER: SocketAddr = SocketAddr::new(SERVER_ADDR, SERVER_PORT);

/// A segment the client put on the wire, as seen by the peer.
#[derive(Debug, Clone)]
pub struct Frame {
    pub src_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: Flags,
    pub window: u16,
    pub payload: Vec<u8>,
}

/// How the scripted peer answers a SYN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynReply {
    Accept,
    Refuse,
    Ignore,
}

/// A scripted server on the other end of the link.
///
/// Answers SYN according to `syn_reply`, acknowledges in-order data and
/// answers FIN with FIN+ACK (or a bare ACK if it already sent its own FIN).
/// Data and control segments from the server side are queued with the
/// `inject_*` helpers and handed over on the next pump.
#[derive(Debug)]
pub struct PeerTransport {
    pub syn_reply: SynReply,
    pub answer_fin: bool,
    pub ack_data: bool,
    pub frames: Vec<Frame>,
    pub received: Vec<u8>,
    pub outbox: VecDeque<Datagram>,
    client_port: u16,
    client_next: u32,
    fin_sent: bool,
    fin_offset: u32,
}

impl PeerTransport {
    pub fn new() -> Self {
        Self {
            syn_reply: SynReply::Accept,
            answer_fin: true,
            ack_data: true,
            frames: Vec::new(),
            received: Vec::new(),
            outbox: VecDeque::new(),
            client_port: 0,
            client_next: 0,
            fin_sent: false,
            fin_offset: 0,
        }
    }

    /// Sequence number of the server's `offset`-th data byte.
    pub fn server_seq(offset: u32) -> u32 {
        SERVER_ISN.wrapping_add(1).wrapping_add(offset)
    }

    pub fn flags_sent(&self) -> Vec<Flags> {
        self.frames.iter().map(|f| f.flags).collect()
    }

    /// Queues server data starting at stream offset `offset`.
    pub fn inject_data(&mut self, offset: u32, payload: &[u8]) {
        let raw = self.server_segment(
            Self::server_seq(offset),
            self.client_next,
            Flags::ACK | Flags::PSH,
            payload,
        );
        self.push(raw);
    }

    /// Queues the server's FIN after `offset` bytes of data.
    pub fn inject_fin(&mut self, offset: u32) {
        self.fin_sent = true;
        self.fin_offset = offset;
        let raw = self.server_segment(
            Self::server_seq(offset),
            self.client_next,
            Flags::FIN | Flags::ACK,
            &[],
        );
        self.push(raw);
    }

    pub fn inject_rst(&mut self) {
        let raw = self.server_segment(Self::server_seq(0), self.client_next, Flags::RST, &[]);
        self.push(raw);
    }

    /// Queues raw bytes as if they had arrived from the server.
    pub fn inject_raw(&mut self, raw: Vec<u8>) {
        self.push(raw);
    }

    pub fn server_segment(&self, seq: u32, ack: u32, flags: Flags, payload: &[u8]) -> Vec<u8> {
        let header = TcpHeader::new(SERVER_PORT, self.client_port, seq, ack, flags, 8192);
        let (raw, len) = header.to_checksummed_bytes(SERVER_ADDR, CLIENT_ADDR, payload);

        let mut segment = raw[..len].to_vec();
        segment.extend_from_slice(payload);
        segment
    }

    fn push(&mut self, payload: Vec<u8>) {
        self.outbox.push_back(Datagram {
            src: SERVER_ADDR,
            dst: CLIENT_ADDR,
            payload,
        });
    }

    fn reply(&mut self, seq: u32, ack: u32, flags: Flags) {
        let raw = self.server_segment(seq, ack, flags, &[]);
        self.push(raw);
    }
}

impl Transport for PeerTransport {
    fn local_address(&self) -> [u8; 4] {
        CLIENT_ADDR
    }

    fn send(&mut self, dst: [u8; 4], protocol: u8, buf: &dyn ChainedBuffer) -> io::Result<()> {
        assert_eq!(dst, SERVER_ADDR);
        assert_eq!(protocol, PROTOCOL_TCP);

        let raw = buf.to_vec();
        assert_eq!(
            checksum::segment_checksum(CLIENT_ADDR, SERVER_ADDR, &raw, &[]),
            0,
            "client sent a segment with a bad checksum"
        );

        let header = TcpHeader::try_from(&raw[..])
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
        let frame = Frame {
            src_port: header.src_port(),
            seq: header.seq_number(),
            ack: header.ack_number(),
            flags: header.flags(),
            window: header.window(),
            payload: raw[header.header_len()..].to_vec(),
        };
        self.client_port = frame.src_port;

        if frame.flags.contains(Flags::SYN) {
            self.client_next = frame.seq.wrapping_add(1);
            match self.syn_reply {
                SynReply::Accept => {
                    self.reply(SERVER_ISN, self.client_next, Flags::SYN | Flags::ACK)
                }
                SynReply::Refuse => self.reply(0, self.client_next, Flags::RST | Flags::ACK),
                SynReply::Ignore => {}
            }
        } else if !frame.payload.is_empty() {
            if frame.seq == self.client_next {
                self.received.extend_from_slice(&frame.payload);
                self.client_next = frame.seq.wrapping_add(frame.payload.len() as u32);
            }
            if self.ack_data {
                self.reply(Self::server_seq(self.fin_offset), self.client_next, Flags::ACK);
            }
        }

        if frame.flags.contains(Flags::FIN) && self.answer_fin {
            self.client_next = frame
                .seq
                .wrapping_add(frame.payload.len() as u32)
                .wrapping_add(1);

            if self.fin_sent {
                let seq = Self::server_seq(self.fin_offset).wrapping_add(1);
                self.reply(seq, self.client_next, Flags::ACK);
            } else {
                self.fin_sent = true;
                let seq = Self::server_seq(self.fin_offset);
                self.reply(seq, self.client_next, Flags::FIN | Flags::ACK);
            }
        }

        self.frames.push(frame);
        Ok(())
    }

    fn deliver_pending(&mut self, queue: &mut VecDeque<Datagram>) {
        queue.extend(self.outbox.drain(..));
    }
}

/// Always returns the same values, so every connection picks the same port.
#[derive(Debug)]
pub struct FixedSource(pub u32, pub u16);

impl RandomSource for FixedSource {
    fn random32(&mut self) -> u32 {
        self.0
    }

    fn random14(&mut self) -> u16 {
        self.1
    }
}

pub fn dispatcher(seed: u32) -> Rc<Dispatcher<PeerTransport>> {
    Dispatcher::new(PeerTransport::new(), XorShiftSource::new(seed))
}

pub fn dispatcher_with(config: Config, seed: u32) -> Rc<Dispatcher<PeerTransport>> {
    Dispatcher::with_config(PeerTransport::new(), XorShiftSource::new(seed), config)
}
