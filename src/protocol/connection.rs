//! Client-side TCP connection: handshake, in-order delivery of received data,
//! unacknowledged-segment bookkeeping and teardown.
//!
//! Every blocking operation is a bounded loop that pumps
//! [Dispatcher::process_incoming] and re-checks its completion condition.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};
use std::{fmt, io};

use super::dispatcher::Dispatcher;
use super::headers::TcpHeader;
use super::transport::Transport;
use super::{Flags, Segment, Socket, SocketAddr};
use crate::{Error, Result};
use crate::{debug, info, warn};

/// Largest payload one segment can carry: the IPv4 total length field less an
/// option-less TCP header.
const MAX_PAYLOAD_LEN: usize = u16::MAX as usize - TcpHeader::MIN_HEADER_LEN as usize;

/// Connection state, tracked separately for the local and the remote side.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum State {
    /// No handshake has been attempted.
    Initial,
    /// SYN sent, awaiting SYN+ACK.
    SynSent,
    /// Handshake complete, data may flow in both directions.
    Open,
    /// FIN sent, no more data will be sent from this side.
    FinSent,
    /// Terminal.
    Closed,
}

/// Per-connection state shared between a [Connection] and the dispatcher.
pub(crate) struct Tcb {
    local: SocketAddr,
    remote: SocketAddr,
    /// Next sequence number to send.
    seq: u32,
    /// Offset of the next byte handed to the reader.
    next_read: u32,
    /// Everything below this has been received contiguously.
    ack: u32,
    state: State,
    remote_state: State,
    /// Sequence number occupied by the peer's FIN.
    fin_seq: Option<u32>,
    /// Received segments sorted by sequence number, not yet fully read.
    arrivals: VecDeque<Segment>,
    /// Sent segments not yet acknowledged.
    sent: VecDeque<Segment>,
    window: u16,
    last_prod: Option<Instant>,
    last_progress: Instant,
}

impl Tcb {
    pub(crate) fn new(window: u16) -> Self {
        Self {
            local: SocketAddr::new(SocketAddr::UNSPECIFIED, 0),
            remote: SocketAddr::new(SocketAddr::UNSPECIFIED, 0),
            seq: 0,
            next_read: 0,
            ack: 0,
            state: State::Initial,
            remote_state: State::Initial,
            fin_seq: None,
            arrivals: VecDeque::new(),
            sent: VecDeque::new(),
            window,
            last_prod: None,
            last_progress: Instant::now(),
        }
    }

    fn socket(&self) -> Socket {
        Socket {
            local: self.local,
            remote: self.remote,
        }
    }

    fn set_state(&mut self, state: State) {
        if self.state != state {
            debug!("[{}] state: {:?} -> {:?}", self.socket(), self.state, state);
            self.state = state;
        }
    }

    fn set_remote_state(&mut self, state: State) {
        if self.remote_state != state {
            debug!(
                "[{}] remote state: {:?} -> {:?}",
                self.socket(),
                self.remote_state,
                state
            );
            self.remote_state = state;
        }
    }

    /// Builds a segment from this side's current sequence and acknowledgment
    /// numbers.
    fn outgoing(&self, payload: Option<&[u8]>, flags: Flags) -> Result<Segment> {
        Segment::build(payload, self.local, self.remote, self.seq, self.ack, flags)
    }

    /// Sends `segment` and, if it occupies sequence space, advances the send
    /// sequence and keeps it on the sent queue until acknowledged.
    fn transmit<T: Transport>(&mut self, segment: Segment, service: &Dispatcher<T>) -> Result<()> {
        service.send_segment(&segment, self.window)?;

        let flags = segment.flags();
        let mut consumed = segment.len() as u32;
        if flags.contains(Flags::SYN) {
            consumed += 1;
        }
        if flags.contains(Flags::FIN) {
            consumed += 1;
        }

        if consumed > 0 {
            self.seq = self.seq.wrapping_add(consumed);
            if self.sent.is_empty() {
                self.last_progress = Instant::now();
            }
            self.sent.push_back(segment);
        }

        Ok(())
    }

    fn send_ack<T: Transport>(&self, service: &Dispatcher<T>) {
        if let Err(err) = service.send(
            self.local.port,
            self.remote.addr,
            self.remote.port,
            self.seq,
            self.ack,
            Flags::ACK,
            self.window,
            &[],
        ) {
            warn!("[{}] failed to send ACK: {err}", self.socket());
        }
    }

    /// Drops every sent segment starting below `ack_number`.
    pub(crate) fn acknowledge(&mut self, ack_number: u32) {
        let mut removed = 0;

        while self
            .sent
            .front()
            .is_some_and(|segment| segment.seq() < ack_number)
        {
            self.sent.pop_front();
            removed += 1;
        }

        if removed > 0 {
            debug!(
                "[{}] {removed} segment(s) acknowledged up to {ack_number}",
                self.socket()
            );
            self.last_progress = Instant::now();
        }
    }

    /// Applies one received segment to the connection.
    ///
    /// Anything unexpected for the current state is ignored. A pure ACK is
    /// sent back when the acknowledgment boundary moves, or when the segment
    /// requires one (FIN, duplicate data, retransmitted SYN).
    pub(crate) fn process_packet<T: Transport>(&mut self, segment: Segment, service: &Dispatcher<T>) {
        let flags = segment.flags();
        let prior_ack = self.ack;
        let mut want_ack = false;

        if flags.contains(Flags::RST) {
            warn!("[{}] connection reset by peer", self.socket());
            self.set_state(State::Closed);
            self.set_remote_state(State::Closed);
            return;
        }

        let mut data_seq = segment.seq();

        match self.state {
            State::Initial => {
                debug!("[{}] (INITIAL) ignoring {flags:?}", self.socket());
                return;
            }
            State::SynSent => {
                if !flags.contains(Flags::SYN | Flags::ACK) {
                    debug!(
                        "[{}] (SYN_SENT) expected SYN|ACK, got {flags:?}: ignoring",
                        self.socket()
                    );
                    return;
                }

                data_seq = segment.seq().wrapping_add(1);
                self.next_read = data_seq;
                self.ack = data_seq;
                self.set_remote_state(State::Open);
                self.set_state(State::Open);
                info!("[{}] connection established", self.socket());

                want_ack = true;
            }
            _ if flags.contains(Flags::SYN) => {
                // Our handshake ACK was lost.
                debug!("[{}] duplicate SYN: re-acknowledging", self.socket());
                want_ack = true;
            }
            _ => {}
        }

        if flags.contains(Flags::FIN) {
            let fin = data_seq.wrapping_add(segment.len() as u32);
            if self.fin_seq.is_none() {
                debug!("[{}] peer FIN at {fin}", self.socket());
                self.fin_seq = Some(fin);
            }
            self.set_remote_state(State::FinSent);
            want_ack = true;
        }

        if self.state == State::FinSent
            && flags.contains(Flags::ACK)
            && self.remote_state == State::FinSent
        {
            self.set_state(State::Closed);
            info!("[{}] connection closed", self.socket());
        }

        if !segment.is_empty() {
            if flags.contains(Flags::SYN) {
                debug!("[{}] discarding payload carried on SYN", self.socket());
            } else if self.remote_state != State::Closed {
                want_ack |= self.enqueue(segment);
            }
        }

        self.catch_up();

        if (self.ack != prior_ack || want_ack) && self.remote_state != State::Closed {
            self.send_ack(service);
        }
    }

    /// Inserts a data segment into the arrival queue, keeping it sorted by
    /// sequence number. Returns `true` if the segment was discarded as a
    /// duplicate.
    fn enqueue(&mut self, segment: Segment) -> bool {
        // No wraparound protection.
        if segment.seq() < self.ack {
            debug!(
                "[{}] discarding duplicate segment {} (ack {})",
                self.socket(),
                segment.seq(),
                self.ack
            );
            return true;
        }

        let seq = segment.seq();
        let head = self.arrivals.front().map(Segment::seq);
        let tail = self.arrivals.back().map(Segment::seq);

        match (head, tail) {
            (None, _) => self.arrivals.push_back(segment),
            (_, Some(tail)) if seq > tail => self.arrivals.push_back(segment),
            (Some(head), _) if seq < head => self.arrivals.push_front(segment),
            _ => match self.arrivals.iter().position(|queued| queued.seq() >= seq) {
                Some(idx) if self.arrivals[idx].seq() == seq => {
                    debug!("[{}] discarding retransmitted segment {seq}", self.socket());
                    return true;
                }
                Some(idx) => self.arrivals.insert(idx, segment),
                None => self.arrivals.push_back(segment),
            },
        }

        false
    }

    /// Advances the acknowledgment boundary across every contiguous queued
    /// segment, then over the peer's FIN once all data before it is in.
    fn catch_up(&mut self) {
        for segment in &self.arrivals {
            if segment.seq() > self.ack {
                break;
            }
            if segment.contains_offset(self.ack) {
                self.ack = segment.end_seq();
            }
        }

        if self.fin_seq == Some(self.ack) {
            self.ack = self.ack.wrapping_add(1);
        }
    }

    /// Copies contiguous received data starting at the read offset into
    /// `buf`, dropping segments once fully consumed.
    fn read_into(&mut self, buf: &mut [u8]) -> usize {
        let mut copied = 0;

        while copied < buf.len() {
            let offset = self.next_read;
            let Some(segment) = self.arrivals.iter().find(|s| s.contains_offset(offset)) else {
                break;
            };

            let start = offset.wrapping_sub(segment.seq()) as usize;
            let available = &segment.payload()[start..];
            let n = available.len().min(buf.len() - copied);

            buf[copied..copied + n].copy_from_slice(&available[..n]);
            copied += n;
            self.next_read = offset.wrapping_add(n as u32);

            let next_read = self.next_read as u64;
            while self
                .arrivals
                .front()
                .is_some_and(|s| s.seq() as u64 + s.len() as u64 <= next_read)
            {
                self.arrivals.pop_front();
            }
        }

        copied
    }

    /// Returns `true` once no more data will ever be readable.
    fn peer_finished(&self) -> bool {
        self.remote_state == State::Closed
            || (self.remote_state == State::FinSent && self.fin_seq == Some(self.next_read))
    }
}

impl fmt::Debug for Tcb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tcb")
            .field("socket", &format_args!("{}", self.socket()))
            .field("state", &self.state)
            .field("remote_state", &self.remote_state)
            .field("seq", &self.seq)
            .field("ack", &self.ack)
            .field("next_read", &self.next_read)
            .field("arrivals", &self.arrivals.len())
            .field("sent", &self.sent.len())
            .finish()
    }
}

/// A client TCP connection bound to a [Dispatcher].
pub struct Connection<T: Transport> {
    service: Rc<Dispatcher<T>>,
    tcb: Rc<RefCell<Tcb>>,
}

impl<T: Transport> Connection<T> {
    /// Creates an unconnected connection that will send through `service`.
    pub fn new(service: &Rc<Dispatcher<T>>) -> Self {
        Self {
            service: Rc::clone(service),
            tcb: Rc::new(RefCell::new(Tcb::new(service.config().window_size))),
        }
    }

    /// Creates a connection and connects it to `remote` using the configured
    /// connect timeout.
    pub fn open(service: &Rc<Dispatcher<T>>, remote: SocketAddr) -> Result<Self> {
        let mut conn = Self::new(service);
        conn.connect(remote, service.config().connect_timeout)?;
        Ok(conn)
    }

    /// Performs the three-way handshake with `remote`.
    ///
    /// A random initial sequence number and ephemeral local port are chosen
    /// for each attempt. On failure the port is released and the connection
    /// returns to [State::Initial], so the call may be retried.
    ///
    /// # Errors
    ///
    /// - [Error::AlreadyConnected] if the connection has left `INITIAL`.
    /// - [Error::AddrInUse] if the chosen local port is taken.
    /// - [Error::ConnectionRefused] if the peer answers with RST.
    /// - [Error::TimedOut] if no SYN+ACK arrives within `timeout`.
    pub fn connect(&mut self, remote: SocketAddr, timeout: Duration) -> Result<()> {
        if self.tcb.borrow().state != State::Initial {
            return Err(Error::AlreadyConnected);
        }

        let (isn, port) = self.service.allocate();
        let local = SocketAddr::new(self.service.local_address(), port);

        self.service.bind_socket(local, &self.tcb)?;

        let result = self.handshake(local, remote, isn, timeout);

        if let Err(err) = &result {
            warn!("[{local} -> {remote}] connect failed: {err}");
            self.service.unbind_socket(local, &self.tcb);
            *self.tcb.borrow_mut() = Tcb::new(self.service.config().window_size);
        }

        result
    }

    fn handshake(
        &mut self,
        local: SocketAddr,
        remote: SocketAddr,
        isn: u32,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;

        {
            let mut tcb = self.tcb.borrow_mut();
            tcb.local = local;
            tcb.remote = remote;
            tcb.seq = isn;

            let syn = tcb.outgoing(None, Flags::SYN)?;
            tcb.transmit(syn, &*self.service)?;
            tcb.set_state(State::SynSent);
        }

        match self.poll_until(deadline, |tcb| tcb.state != State::SynSent) {
            Some(State::Open) => Ok(()),
            Some(_) => Err(Error::ConnectionRefused),
            None => Err(Error::TimedOut),
        }
    }

    /// Sends FIN+ACK and waits for the peer to acknowledge it and send its own
    /// FIN.
    ///
    /// Closing a connection that never connected, or is already closed, is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns [Error::TimedOut] if the connection does not reach `CLOSED`
    /// within `timeout`, or an error if the FIN cannot be sent.
    pub fn close(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;

        {
            let mut tcb = self.tcb.borrow_mut();

            match tcb.state {
                State::Initial | State::SynSent | State::Closed => return Ok(()),
                State::FinSent => {}
                State::Open => {
                    let fin = tcb.outgoing(None, Flags::FIN | Flags::ACK)?;
                    tcb.transmit(fin, &*self.service)?;
                    tcb.set_state(State::FinSent);
                }
            }
        }

        match self.poll_until(deadline, |tcb| tcb.state == State::Closed) {
            Some(_) => Ok(()),
            None => Err(Error::TimedOut),
        }
    }

    /// Closes the connection using the configured close timeout.
    pub fn shutdown(&mut self) -> Result<()> {
        self.close(self.service.config().close_timeout)
    }

    /// Reads in-order data into `buf`, waiting up to `timeout` for it to
    /// arrive.
    ///
    /// Returns once `buf` is full, the peer has finished, or the deadline
    /// passes. A partial read is not an error.
    ///
    /// # Errors
    ///
    /// - [Error::NotConnected] before the handshake completes.
    /// - [Error::ConnectionClosed] if nothing was read and the peer has
    ///   finished.
    /// - [Error::TimedOut] if nothing was read before the deadline.
    pub fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if matches!(self.state(), State::Initial | State::SynSent) {
            return Err(Error::NotConnected);
        }

        let deadline = Instant::now() + timeout;
        let mut copied = 0;
        let mut finished;

        loop {
            self.service.process_incoming();

            {
                let mut tcb = self.tcb.borrow_mut();
                copied += tcb.read_into(&mut buf[copied..]);
                finished = tcb.peer_finished();
            }

            if copied == buf.len() || finished || Instant::now() >= deadline {
                break;
            }

            self.prod();
            self.retransmit_if_stalled();
            std::hint::spin_loop();
        }

        match copied {
            0 if finished => Err(Error::ConnectionClosed),
            0 => Err(Error::TimedOut),
            n => Ok(n),
        }
    }

    /// Sends `buf` as a single segment. Does not block.
    ///
    /// # Errors
    ///
    /// - [Error::InvalidArgument] if `buf` is empty or too large for one
    ///   segment.
    /// - [Error::NotConnected] before the handshake completes.
    /// - [Error::ConnectionClosed] after a FIN was sent or the connection
    ///   was reset.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Err(Error::InvalidArgument("zero-length write"));
        }
        if buf.len() > MAX_PAYLOAD_LEN {
            return Err(Error::InvalidArgument("payload exceeds maximum segment size"));
        }

        let mut tcb = self.tcb.borrow_mut();

        match tcb.state {
            State::Open if tcb.remote_state != State::Closed => {}
            State::Initial | State::SynSent => return Err(Error::NotConnected),
            _ => return Err(Error::ConnectionClosed),
        }

        let segment = tcb.outgoing(Some(buf), Flags::ACK)?;
        tcb.transmit(segment, &*self.service)?;

        Ok(buf.len())
    }

    /// Drops every sent segment starting below `ack_number`.
    pub fn acknowledge(&self, ack_number: u32) {
        self.tcb.borrow_mut().acknowledge(ack_number);
    }

    /// Applies `segment` as if it had just been received.
    pub fn process_packet(&self, segment: Segment) {
        self.tcb.borrow_mut().process_packet(segment, &*self.service);
    }

    /// Re-sends every unacknowledged segment unchanged, returning how many
    /// were sent.
    pub fn resend_unacknowledged(&self) -> Result<usize> {
        let mut tcb = self.tcb.borrow_mut();

        for segment in &tcb.sent {
            self.service.send_segment(segment, tcb.window)?;
        }

        if !tcb.sent.is_empty() {
            debug!(
                "[{}] resent {} unacknowledged segment(s)",
                tcb.socket(),
                tcb.sent.len()
            );
        }
        tcb.last_progress = Instant::now();

        Ok(tcb.sent.len())
    }

    /// Returns the advertised receive window. Constant, not derived from
    /// queued data.
    pub fn window_size(&self) -> u16 {
        self.service.config().window_size
    }

    /// Returns the local state.
    pub fn state(&self) -> State {
        self.tcb.borrow().state
    }

    /// Returns the remote state as observed from received segments.
    pub fn remote_state(&self) -> State {
        self.tcb.borrow().remote_state
    }

    /// Returns the local socket address, unspecified before `connect`.
    pub fn local_addr(&self) -> SocketAddr {
        self.tcb.borrow().local
    }

    /// Returns the peer's socket address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.tcb.borrow().remote
    }

    /// Returns the next sequence number this side will send.
    pub fn sequence_number(&self) -> u32 {
        self.tcb.borrow().seq
    }

    /// Returns the acknowledgment boundary: everything before it has been
    /// received contiguously.
    pub fn ack_number(&self) -> u32 {
        self.tcb.borrow().ack
    }

    /// Returns the offset of the next byte [Connection::read] will return.
    pub fn read_offset(&self) -> u32 {
        self.tcb.borrow().next_read
    }

    /// Returns `(seq, len)` for every segment waiting in the arrival queue,
    /// in queue order.
    pub fn queued_segments(&self) -> Vec<(u32, usize)> {
        self.tcb
            .borrow()
            .arrivals
            .iter()
            .map(|s| (s.seq(), s.len()))
            .collect()
    }

    /// Returns `(seq, len)` for every sent segment not yet acknowledged.
    pub fn unacknowledged_segments(&self) -> Vec<(u32, usize)> {
        self.tcb
            .borrow()
            .sent
            .iter()
            .map(|s| (s.seq(), s.len()))
            .collect()
    }

    /// Pumps the dispatcher until `done` holds or `deadline` passes, returning
    /// the state reached on success.
    fn poll_until(&self, deadline: Instant, done: impl Fn(&Tcb) -> bool) -> Option<State> {
        loop {
            self.service.process_incoming();

            {
                let tcb = self.tcb.borrow();
                if done(&*tcb) {
                    return Some(tcb.state);
                }
            }

            if Instant::now() >= deadline {
                return None;
            }

            self.retransmit_if_stalled();
            std::hint::spin_loop();
        }
    }

    /// Sends a rate-limited ACK to nudge a sender waiting on duplicate ACKs.
    fn prod(&self) {
        let interval = self.service.config().prod_ack_interval;
        let mut tcb = self.tcb.borrow_mut();

        if tcb.remote_state == State::Closed {
            return;
        }
        if tcb.last_prod.is_some_and(|at| at.elapsed() < interval) {
            return;
        }

        tcb.send_ack(&*self.service);
        tcb.last_prod = Some(Instant::now());
    }

    fn retransmit_if_stalled(&self) {
        let Some(interval) = self.service.config().retransmit_interval else {
            return;
        };

        let stalled = {
            let tcb = self.tcb.borrow();
            !tcb.sent.is_empty() && tcb.last_progress.elapsed() >= interval
        };

        if stalled {
            if let Err(err) = self.resend_unacknowledged() {
                warn!("retransmission failed: {err}");
            }
        }
    }
}

impl<T: Transport> Drop for Connection<T> {
    fn drop(&mut self) {
        let local = self.tcb.borrow().local;
        self.service.unbind_socket(local, &self.tcb);
    }
}

impl<T: Transport> io::Read for Connection<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let timeout = self.service.config().read_timeout;

        match Connection::read(self, buf, timeout) {
            Err(Error::ConnectionClosed) => Ok(0),
            result => result.map_err(io::Error::from),
        }
    }
}

impl<T: Transport> io::Write for Connection<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        Connection::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: Transport> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("tcb", &*self.tcb.borrow())
            .finish_non_exhaustive()
    }
}
