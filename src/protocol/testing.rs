//! In-memory transport for unit tests.

use std::collections::VecDeque;
use std::io;

use super::checksum::ChainedBuffer;
use super::headers::TcpHeader;
use super::transport::{Datagram, Transport};
use super::Flags;

pub(crate) const LOCAL_ADDR: [u8; 4] = [10, 0, 0, 2];
pub(crate) const PEER_ADDR: [u8; 4] = [10, 0, 0, 1];
pub(crate) const PEER_ISN: u32 = 1000;

/// Serializes a checksummed segment as the peer would put it on the wire.
#[allow(clippy::too_many_arguments)]
pub(crate) fn craft(
    src: [u8; 4],
    dst: [u8; 4],
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: u32,
    flags: Flags,
    payload: &[u8],
) -> Vec<u8> {
    let header = TcpHeader::new(src_port, dst_port, seq, ack, flags, 8192);
    let (raw, len) = header.to_checksummed_bytes(src, dst, payload);

    let mut segment = raw[..len].to_vec();
    segment.extend_from_slice(payload);
    segment
}

/// Records every datagram sent and optionally answers SYN with SYN+ACK.
#[derive(Debug)]
pub(crate) struct RecordingTransport {
    local: [u8; 4],
    pub(crate) sent: Vec<([u8; 4], u8, Vec<u8>)>,
    pub(crate) inbound: VecDeque<Datagram>,
    pub(crate) auto_syn_ack: bool,
}

impl RecordingTransport {
    pub(crate) fn new(local: [u8; 4]) -> Self {
        Self {
            local,
            sent: Vec::new(),
            inbound: VecDeque::new(),
            auto_syn_ack: false,
        }
    }

    pub(crate) fn sent_headers(&self) -> Vec<TcpHeader> {
        self.sent
            .iter()
            .map(|(_, _, raw)| TcpHeader::try_from(&raw[..]).unwrap())
            .collect()
    }

    pub(crate) fn sent_payloads(&self) -> Vec<Vec<u8>> {
        self.sent
            .iter()
            .map(|(_, _, raw)| {
                let header = TcpHeader::try_from(&raw[..]).unwrap();
                raw[header.header_len()..].to_vec()
            })
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn local_address(&self) -> [u8; 4] {
        self.local
    }

    fn send(&mut self, dst: [u8; 4], protocol: u8, buf: &dyn ChainedBuffer) -> io::Result<()> {
        let raw = buf.to_vec();
        let header = TcpHeader::try_from(&raw[..])
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;

        if self.auto_syn_ack && header.flags() == Flags::SYN {
            let reply = craft(
                dst,
                self.local,
                header.dst_port(),
                header.src_port(),
                PEER_ISN,
                header.seq_number().wrapping_add(1),
                Flags::SYN | Flags::ACK,
                &[],
            );
            self.inbound.push_back(Datagram {
                src: dst,
                dst: self.local,
                payload: reply,
            });
        }

        self.sent.push((dst, protocol, raw));
        Ok(())
    }

    fn deliver_pending(&mut self, queue: &mut VecDeque<Datagram>) {
        queue.extend(self.inbound.drain(..));
    }
}
