mod common;

use std::time::Duration;

use boot_tcp::Error;
use boot_tcp::protocol::{Connection, Flags, State};

use common::{CLIENT_ADDR, PeerTransport, SERVER, SERVER_ADDR};

const TIMEOUT: Duration = Duration::from_millis(200);

#[test]
fn peer_closes_first_valid() {
    let service = common::dispatcher(21);
    let mut conn = Connection::open(&service, SERVER).unwrap();

    {
        let mut transport = service.transport_mut();
        transport.inject_data(0, b"kernel");
        transport.inject_fin(6);
    }

    let mut buf = [0u8; 64];
    assert_eq!(conn.read(&mut buf, TIMEOUT).unwrap(), 6);
    assert_eq!(&buf[..6], b"kernel");
    assert_eq!(conn.remote_state(), State::FinSent);
    assert_eq!(conn.state(), State::Open);

    assert!(matches!(
        conn.read(&mut buf, TIMEOUT),
        Err(Error::ConnectionClosed)
    ));

    conn.close(TIMEOUT).unwrap();
    assert_eq!(conn.state(), State::Closed);

    let transport = service.transport();
    let fin = transport
        .frames
        .iter()
        .find(|f| f.flags.contains(Flags::FIN))
        .unwrap();
    assert_eq!(fin.ack, PeerTransport::server_seq(6) + 1);
}

#[test]
fn close_waits_for_peer_fin_valid() {
    let service = common::dispatcher(22);
    service.transport_mut().answer_fin = false;

    let mut conn = Connection::open(&service, SERVER).unwrap();

    let err = conn.close(Duration::from_millis(30)).unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(conn.state(), State::FinSent);
    assert_eq!(conn.unacknowledged_segments().len(), 1);

    // Peer finally acknowledges our FIN and sends its own.
    let fin_ack = {
        let transport = service.transport();
        transport.server_segment(
            PeerTransport::server_seq(0),
            conn.sequence_number(),
            Flags::FIN | Flags::ACK,
            &[],
        )
    };
    service.transport_mut().inject_raw(fin_ack);

    conn.close(TIMEOUT).unwrap();
    assert_eq!(conn.state(), State::Closed);
    assert!(conn.unacknowledged_segments().is_empty());

    // FIN was sent once.
    let fins = service
        .transport()
        .frames
        .iter()
        .filter(|f| f.flags.contains(Flags::FIN))
        .count();
    assert_eq!(fins, 1);
}

#[test]
fn ack_without_peer_fin_keeps_fin_sent_valid() {
    let service = common::dispatcher(23);
    service.transport_mut().answer_fin = false;

    let mut conn = Connection::open(&service, SERVER).unwrap();
    let _ = conn.close(Duration::from_millis(10));

    let ack = {
        let transport = service.transport();
        transport.server_segment(
            PeerTransport::server_seq(0),
            conn.sequence_number(),
            Flags::ACK,
            &[],
        )
    };
    service.handle_incoming(SERVER_ADDR, CLIENT_ADDR, &ack);

    assert_eq!(conn.state(), State::FinSent);
    assert!(conn.unacknowledged_segments().is_empty());
}

#[test]
fn reset_during_transfer_invalid() {
    let service = common::dispatcher(24);
    let mut conn = Connection::open(&service, SERVER).unwrap();

    {
        let mut transport = service.transport_mut();
        transport.inject_data(0, b"partial");
        transport.inject_rst();
    }

    let mut buf = [0u8; 32];
    assert_eq!(conn.read(&mut buf, TIMEOUT).unwrap(), 7);
    assert_eq!(conn.state(), State::Closed);
    assert_eq!(conn.remote_state(), State::Closed);

    assert!(matches!(
        conn.read(&mut buf, TIMEOUT),
        Err(Error::ConnectionClosed)
    ));
    assert!(matches!(conn.write(b"more"), Err(Error::ConnectionClosed)));
    conn.close(TIMEOUT).unwrap();
}

#[test]
fn corrupted_datagram_dropped_invalid() {
    let service = common::dispatcher(25);
    let mut conn = Connection::open(&service, SERVER).unwrap();

    let mut raw = {
        let transport = service.transport();
        transport.server_segment(
            PeerTransport::server_seq(0),
            conn.sequence_number(),
            Flags::ACK | Flags::FIN,
            b"payload",
        )
    };
    raw[22] ^= 0x80;
    service.transport_mut().inject_raw(raw.clone());

    let mut buf = [0u8; 7];
    assert!(conn.read(&mut buf, Duration::from_millis(20)).unwrap_err().is_timeout());
    assert_eq!(conn.remote_state(), State::Open);

    raw[22] ^= 0x80;
    service.transport_mut().inject_raw(raw);

    assert_eq!(conn.read(&mut buf, TIMEOUT).unwrap(), 7);
    assert_eq!(&buf, b"payload");
    assert_eq!(conn.remote_state(), State::FinSent);
}

#[test]
fn drop_releases_binding_valid() {
    let service = common::dispatcher(26);
    let conn = Connection::open(&service, SERVER).unwrap();
    let local = conn.local_addr();

    assert_eq!(service.bound_count(), 1);
    drop(conn);
    assert_eq!(service.bound_count(), 0);

    // Late segments for the dropped connection go nowhere.
    let raw = {
        let transport = service.transport();
        transport.server_segment(PeerTransport::server_seq(0), 0, Flags::ACK, b"late")
    };
    let sent_before = service.transport().frames.len();
    service.handle_incoming(SERVER_ADDR, local.addr, &raw);
    assert_eq!(service.transport().frames.len(), sent_before);
}
