//! The six literal end-to-end scenarios: a real `mx_net::connection::Server`
//! driven against a fake TCP peer that scripts exactly the bytes a real MX
//! server would send back.

mod common;

use byteorder::{BigEndian, ByteOrder};
use common::FakePeer;
use mx_net::buffer::DataFormat;
use mx_net::codec::{codec_for, ValueShape};
use mx_net::request::opcode;
use mx_net::value::{DataType, Payload};
use mx_net::{ConnectOptions, Endpoint, NetworkField, RequestedFormat, Server};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn local_endpoint(listener: &TcpListener) -> Endpoint {
    Endpoint::Tcp {
        host: "127.0.0.1".to_string(),
        port: listener.local_addr().unwrap().port(),
    }
}

#[test]
fn negotiate_chooses_raw_when_peer_matches_local_format() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = local_endpoint(&listener);
    let local_endian = if cfg!(target_endian = "big") { 1 } else { 0 };
    let local_wordsize = std::mem::size_of::<usize>() as u32;

    let peer_thread = thread::spawn(move || {
        let mut peer = FakePeer::accept(&listener);
        common::perform_bring_up(&mut peer, Some((local_endian, local_wordsize)));
    });

    let options = ConnectOptions {
        requested_format: RequestedFormat::Negotiate,
        ..ConnectOptions::default()
    };
    let server = Server::with_default_logger(endpoint, options);
    server.ensure_connected().unwrap();
    assert_eq!(server.negotiated_format().0, DataFormat::Raw);

    peer_thread.join().unwrap();
}

#[test]
fn negotiate_falls_back_to_xdr_when_peer_format_differs() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = local_endpoint(&listener);
    let local_endian = if cfg!(target_endian = "big") { 1 } else { 0 };
    let mismatched_wordsize = std::mem::size_of::<usize>() as u32 + 4;

    let peer_thread = thread::spawn(move || {
        let mut peer = FakePeer::accept(&listener);
        common::perform_bring_up(&mut peer, Some((local_endian, mismatched_wordsize)));
    });

    let options = ConnectOptions {
        requested_format: RequestedFormat::Negotiate,
        ..ConnectOptions::default()
    };
    let server = Server::with_default_logger(endpoint, options);
    server.ensure_connected().unwrap();
    assert_eq!(server.negotiated_format().0, DataFormat::Xdr);

    peer_thread.join().unwrap();
}

#[test]
fn get_on_a_double_field_decodes_the_xdr_reply() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = local_endpoint(&listener);

    let peer_thread = thread::spawn(move || {
        let mut peer = FakePeer::accept(&listener);
        common::perform_bring_up(&mut peer, None);

        let (req, _) = peer.receive();
        assert_eq!(req.opcode(), opcode::GET_ARRAY_BY_NAME);
        // The literal scenario's XDR body for 12.5.
        peer.reply_typed(&req, DataType::Double.wire_tag(), &[0x40, 0x29, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    });

    let options = ConnectOptions {
        requested_format: RequestedFormat::Fixed(DataFormat::Xdr),
        ..ConnectOptions::default()
    };
    let server = Arc::new(Server::with_default_logger(endpoint, options));
    server.mark_network_handles_unsupported();
    let field = NetworkField::new(server, "theta.position");

    let value = field.get(&ValueShape::scalar(DataType::Double), None).unwrap();
    assert_eq!(value.payload, Payload::Double(vec![12.5]));

    peer_thread.join().unwrap();
}

#[test]
fn put_on_an_ascii_peer_sends_the_padded_name_and_nul_terminated_value() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = local_endpoint(&listener);

    let peer_thread = thread::spawn(move || {
        let mut peer = FakePeer::accept(&listener);
        common::perform_bring_up(&mut peer, None);

        let (req, body) = peer.receive();
        assert_eq!(req.opcode(), opcode::PUT_ARRAY_BY_NAME);
        let mut expected = b"edge_energy.value".to_vec();
        expected.resize(mx_net::request::NAME_FIELD_WIDTH, 0);
        expected.extend_from_slice(b"11567\0");
        assert_eq!(body, expected);
        peer.reply(&req, &[]);
    });

    let options = ConnectOptions {
        requested_format: RequestedFormat::Fixed(DataFormat::Ascii),
        ..ConnectOptions::default()
    };
    let server = Arc::new(Server::with_default_logger(endpoint, options));
    server.mark_network_handles_unsupported();
    let field = NetworkField::new(server, "edge_energy.value");

    field.put(&mx_net::Value::scalar(Payload::Double(vec![11567.0])), None).unwrap();

    peer_thread.join().unwrap();
}

#[test]
fn a_stale_reply_to_a_timed_out_get_is_dropped_not_delivered() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = local_endpoint(&listener);

    let peer_thread = thread::spawn(move || {
        let mut peer = FakePeer::accept(&listener);
        common::perform_bring_up(&mut peer, None);

        // First get: never answered promptly. The client times out waiting
        // for it; the peer then sends its answer anyway, late.
        let (req1, _) = peer.receive();
        assert_eq!(req1.opcode(), opcode::GET_ARRAY_BY_NAME);
        thread::sleep(Duration::from_millis(350));
        peer.reply_typed(&req1, DataType::Double.wire_tag(), &99.0f64.to_be_bytes());

        // Second get, on the same connection: answered promptly.
        let (req2, _) = peer.receive();
        assert_eq!(req2.opcode(), opcode::GET_ARRAY_BY_NAME);
        peer.reply_typed(&req2, DataType::Double.wire_tag(), &12.5f64.to_be_bytes());
    });

    let options = ConnectOptions {
        requested_format: RequestedFormat::Fixed(DataFormat::Xdr),
        ..ConnectOptions::default()
    };
    let server = Arc::new(Server::with_default_logger(endpoint, options));
    server.mark_network_handles_unsupported();
    let field = NetworkField::new(server.clone(), "theta.position");

    let short_deadline = Some(Instant::now() + Duration::from_millis(150));
    let err = field.get(&ValueShape::scalar(DataType::Double), short_deadline).unwrap_err();
    assert_eq!(err.kind, mx_net::ErrorKind::TimedOut);

    let value = field.get(&ValueShape::scalar(DataType::Double), None).unwrap();
    assert_eq!(value.payload, Payload::Double(vec![12.5]));

    peer_thread.join().unwrap();
}

#[test]
fn a_network_field_callback_is_re_registered_under_a_new_id_after_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = local_endpoint(&listener);
    let mut handle_body = [0u8; 8];
    BigEndian::write_u32(&mut handle_body[0..4], 1);
    BigEndian::write_u32(&mut handle_body[4..8], 2);

    let peer_thread = thread::spawn(move || {
        let mut peer = FakePeer::accept(&listener);
        common::perform_bring_up(&mut peer, None);

        let (req, _) = peer.receive();
        assert_eq!(req.opcode(), opcode::GET_NETWORK_HANDLE);
        peer.reply(&req, &handle_body);

        let (req, _) = peer.receive();
        assert_eq!(req.opcode(), opcode::ADD_CALLBACK);
        peer.reply_u32(&req, 0x8000_0001);

        // Kill the connection to simulate the peer restarting.
        drop(peer);

        let mut peer = FakePeer::accept(&listener);
        common::perform_bring_up(&mut peer, None);

        let (req, _) = peer.receive();
        assert_eq!(req.opcode(), opcode::GET_NETWORK_HANDLE);
        peer.reply(&req, &handle_body);

        let (req, _) = peer.receive();
        assert_eq!(req.opcode(), opcode::ADD_CALLBACK);
        peer.reply_u32(&req, 0x8000_0007);

        peer.push_callback(0x8000_0007, DataType::Double.wire_tag(), &42.0f64.to_be_bytes());
    });

    let options = ConnectOptions {
        requested_format: RequestedFormat::Fixed(DataFormat::Xdr),
        ..ConnectOptions::default()
    };
    let server = Arc::new(Server::with_default_logger(endpoint, options));
    let field = NetworkField::new(server.clone(), "theta.position");

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();
    let id = field
        .add_value_changed_callback(Arc::new(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }), None)
        .unwrap();
    assert_eq!(id, 0x8000_0001);

    // The first call after the restart is the one that discovers the dead
    // socket.
    let err = server
        .wait_for_messages(Some(Instant::now() + Duration::from_secs(5)))
        .unwrap_err();
    assert!(err.is_connection_loss());

    // The next call reconnects, re-registers under a new id, and delivers
    // the push that was waiting under it.
    server
        .wait_for_messages(Some(Instant::now() + Duration::from_secs(5)))
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(server.registered_callback_count(), 1);

    peer_thread.join().unwrap();
}

#[test]
fn field_type_round_trips_into_an_xdr_body_of_the_expected_length() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = local_endpoint(&listener);

    let peer_thread = thread::spawn(move || {
        let mut peer = FakePeer::accept(&listener);
        common::perform_bring_up(&mut peer, None);

        let (req, _) = peer.receive();
        assert_eq!(req.opcode(), opcode::GET_FIELD_TYPE);
        let mut body = [0u8; 12];
        BigEndian::write_u32(&mut body[0..4], DataType::ULong.wire_tag());
        BigEndian::write_u32(&mut body[4..8], 1);
        BigEndian::write_u32(&mut body[8..12], 8192);
        peer.reply(&req, &body);
    });

    let options = ConnectOptions {
        requested_format: RequestedFormat::Fixed(DataFormat::Xdr),
        ..ConnectOptions::default()
    };
    let server = Arc::new(Server::with_default_logger(endpoint, options));
    let field = NetworkField::new(server, "mca.channel_array");

    let shape = field.get_field_type(None).unwrap();
    assert_eq!(shape.data_type, DataType::ULong);
    assert_eq!(shape.dims, vec![8192]);

    let value = mx_net::Value::array(shape.dims.clone(), Payload::ULong(vec![0; 8192]));
    let mut buf = vec![0u8; 4 + 8192 * 4];
    let written = codec_for(DataFormat::Xdr).encode(&value, false, &mut buf).unwrap();
    assert_eq!(written, 4 + 8192 * 4);

    peer_thread.join().unwrap();
}
