//! Demultiplexing of inbound segments to connections, and the outgoing
//! send path.
//!
//! The dispatcher sits between the IP layer ([Transport]) and individual
//! connections. Inbound datagrams are checksummed, parsed and forwarded to the
//! connection bound to their destination; outgoing segments are framed,
//! checksummed and handed to the transport.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};

use super::checksum::{self, PROTOCOL_TCP};
use super::connection::Tcb;
use super::headers::{OptionKind, TcpHeader};
use super::random::{RandomSource, SequenceGenerator};
use super::transport::{Datagram, Transport};
use super::{Flags, Segment, SocketAddr};
use crate::config::Config;
use crate::{Error, Result};
use crate::{debug, error, warn};

/// Registry of live connections plus the transport they share.
///
/// Connections hold an `Rc` to the dispatcher; the dispatcher only holds weak
/// references back, so connections are created and dropped by their callers.
pub struct Dispatcher<T: Transport> {
    transport: RefCell<T>,
    registry: RefCell<HashMap<SocketAddr, Weak<RefCell<Tcb>>>>,
    random: RefCell<Box<dyn RandomSource>>,
    isn: RefCell<SequenceGenerator>,
    config: Config,
}

impl<T: Transport> Dispatcher<T> {
    /// Creates a dispatcher with the default [Config].
    pub fn new(transport: T, random: impl RandomSource + 'static) -> Rc<Self> {
        Self::with_config(transport, random, Config::default())
    }

    /// Creates a dispatcher with the provided [Config].
    pub fn with_config(
        transport: T,
        random: impl RandomSource + 'static,
        config: Config,
    ) -> Rc<Self> {
        Rc::new(Self {
            transport: RefCell::new(transport),
            registry: Default::default(),
            random: RefCell::new(Box::new(random)),
            isn: RefCell::new(SequenceGenerator::new()),
            config,
        })
    }

    /// Returns the configuration shared by every connection.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the address of the local interface.
    pub fn local_address(&self) -> [u8; 4] {
        self.transport.borrow().local_address()
    }

    /// Borrows the transport.
    ///
    /// # Panics
    ///
    /// Panics if the transport is currently borrowed mutably.
    pub fn transport(&self) -> Ref<'_, T> {
        self.transport.borrow()
    }

    /// Mutably borrows the transport.
    ///
    /// # Panics
    ///
    /// Panics if the transport is currently borrowed.
    pub fn transport_mut(&self) -> RefMut<'_, T> {
        self.transport.borrow_mut()
    }

    /// Returns `true` if a live connection is bound to exactly `addr`.
    pub fn is_bound(&self, addr: SocketAddr) -> bool {
        self.registry
            .borrow()
            .get(&addr)
            .is_some_and(|weak| weak.strong_count() > 0)
    }

    /// Returns the number of live bound connections.
    pub fn bound_count(&self) -> usize {
        self.registry
            .borrow()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Asks the transport for every pending datagram and handles each in
    /// arrival order.
    ///
    /// This is the only way inbound segments reach connections; every
    /// blocking connection operation loops on it.
    pub fn process_incoming(&self) {
        let mut pending = VecDeque::new();
        self.transport.borrow_mut().deliver_pending(&mut pending);

        for Datagram { src, dst, payload } in pending {
            self.handle_incoming(src, dst, &payload);
        }
    }

    /// Validates, parses and forwards one inbound segment.
    ///
    /// Short buffers, checksum failures, malformed headers and segments for
    /// which no connection is bound are dropped. A real stack would answer the
    /// latter with RST.
    pub fn handle_incoming(&self, src: [u8; 4], dst: [u8; 4], raw: &[u8]) {
        if raw.len() < TcpHeader::MIN_HEADER_LEN as usize {
            debug!(
                "dropping {} byte segment from {src:?}: shorter than TCP header",
                raw.len()
            );
            return;
        }

        // The pseudo-header carries a 16 bit length.
        if raw.len() > u16::MAX as usize {
            warn!(
                "dropping {} byte segment from {src:?}: longer than an IPv4 datagram can carry",
                raw.len()
            );
            return;
        }

        let sum = checksum::segment_checksum(src, dst, raw, &[]);
        if sum != 0 {
            warn!(
                "dropping segment from {src:?} to {dst:?}: checksum mismatch (residue 0x{sum:04x})"
            );
            return;
        }

        let header = match TcpHeader::try_from(raw) {
            Ok(header) => header,
            Err(err) => {
                warn!("dropping segment from {src:?}: {err}");
                return;
            }
        };

        log_segment(src, dst, &header, raw.len() - header.header_len());

        let local = SocketAddr::new(dst, header.dst_port());
        let Some(tcb) = self.lookup(local) else {
            debug!("no connection bound to {local}: dropping segment");
            return;
        };

        let flags = header.flags();
        let payload = &raw[header.header_len()..];

        let segment = match Segment::build(
            (!payload.is_empty()).then_some(payload),
            SocketAddr::new(src, header.src_port()),
            local,
            header.seq_number(),
            header.ack_number(),
            flags,
        ) {
            Ok(segment) => segment,
            Err(err) => {
                warn!("[{local}] dropping segment: {err}");
                return;
            }
        };

        let mut tcb = tcb.borrow_mut();

        if flags.contains(Flags::ACK) {
            tcb.acknowledge(header.ack_number());
        }

        tcb.process_packet(segment, self);
    }

    /// Frames and sends one segment.
    ///
    /// The header carries no options. The caller is responsible for keeping
    /// `payload` within whatever size the path can carry.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails to send the datagram.
    #[allow(clippy::too_many_arguments)]
    pub fn send(
        &self,
        local_port: u16,
        remote_addr: [u8; 4],
        remote_port: u16,
        seq: u32,
        ack: u32,
        flags: Flags,
        window: u16,
        payload: &[u8],
    ) -> Result<()> {
        let header = TcpHeader::new(local_port, remote_port, seq, ack, flags, window);

        let mut transport = self.transport.borrow_mut();
        let local_addr = transport.local_address();

        let (raw_header, len) = header.to_checksummed_bytes(local_addr, remote_addr, payload);
        let chain: [&[u8]; 2] = [&raw_header[..len], payload];

        debug!(
            "sending segment | {local_addr:?}:{local_port} -> {remote_addr:?}:{remote_port}, seq: {seq}, ack: {ack}, flags: {flags:?}, window: {window}, {} bytes of payload",
            payload.len()
        );

        transport
            .send(remote_addr, PROTOCOL_TCP, &chain)
            .map_err(|err| {
                error!("failed to send segment to {remote_addr:?}:{remote_port}: {err}");
                Error::Io(err)
            })
    }

    /// Sends `segment` from its source port to its destination.
    pub(crate) fn send_segment(&self, segment: &Segment, window: u16) -> Result<()> {
        self.send(
            segment.src().port,
            segment.dst().addr,
            segment.dst().port,
            segment.seq(),
            segment.ack(),
            segment.flags(),
            window,
            segment.payload(),
        )
    }

    /// Registers `tcb` under `addr`.
    ///
    /// # Errors
    ///
    /// Returns [Error::AddrInUse] if a live connection is already bound to
    /// exactly `addr`.
    pub(crate) fn bind_socket(&self, addr: SocketAddr, tcb: &Rc<RefCell<Tcb>>) -> Result<()> {
        let mut registry = self.registry.borrow_mut();

        if registry
            .get(&addr)
            .is_some_and(|weak| weak.strong_count() > 0)
        {
            return Err(Error::AddrInUse(addr));
        }

        registry.insert(addr, Rc::downgrade(tcb));
        debug!("bound connection to {addr}");

        Ok(())
    }

    /// Removes the binding for `addr` if it belongs to `tcb`.
    pub(crate) fn unbind_socket(&self, addr: SocketAddr, tcb: &Rc<RefCell<Tcb>>) {
        let mut registry = self.registry.borrow_mut();

        let owned = registry
            .get(&addr)
            .is_some_and(|weak| weak.as_ptr() == Rc::as_ptr(tcb));

        if owned {
            registry.remove(&addr);
            debug!("unbound connection from {addr}");
        }
    }

    /// Finds the connection for `local`: an exact binding first, then a
    /// binding on the unspecified address with the same port.
    fn lookup(&self, local: SocketAddr) -> Option<Rc<RefCell<Tcb>>> {
        let registry = self.registry.borrow();

        registry
            .get(&local)
            .and_then(Weak::upgrade)
            .or_else(|| registry.get(&local.wildcard()).and_then(Weak::upgrade))
    }

    /// Draws an initial sequence number and an ephemeral local port.
    pub(crate) fn allocate(&self) -> (u32, u16) {
        let mut random = self.random.borrow_mut();

        let isn = self.isn.borrow_mut().generate(&mut **random);
        let port = self.config.ephemeral_port_base | random.random14();

        (isn, port)
    }
}

impl<T: Transport> fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.borrow();
        let bound: Vec<_> = registry
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .map(|(addr, _)| addr)
            .collect();

        f.debug_struct("Dispatcher")
            .field("bound", &bound)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Logs an incoming TCP segment along with any options it carries.
fn log_segment(src: [u8; 4], dst: [u8; 4], header: &TcpHeader, payload_len: usize) {
    debug!(
        "received tcp segment | {src:?}:{} -> {dst:?}:{}, seq: {}, ack: {}, data offset: {}, flags: {:?}, window: {}, chksum: 0x{:04x}, {payload_len} bytes of payload",
        header.src_port(),
        header.dst_port(),
        header.seq_number(),
        header.ack_number(),
        header.data_offset(),
        header.flags(),
        header.window(),
        header.checksum(),
    );

    for opt in header.options() {
        match opt.kind {
            OptionKind::Mss => {
                // Logged only; outgoing segments are never split to fit.
                debug!(
                    "  option kind: 2 (MSS), length: {}, mss: {:?}",
                    opt.len,
                    header.options().mss()
                );
            }
            kind => debug!("  option kind: {}, length: {}", u8::from(kind), opt.len),
        }
    }
}
