//! Shared fake-peer harness for the end-to-end tests: a minimal server
//! that speaks just enough of the wire protocol to drive a real
//! `mx_net::connection::Server` through bring-up and a handful of scripted
//! RPCs, without pulling in an actual MX server.

use byteorder::{BigEndian, ByteOrder};
use mx_net::header::{MessageHeader, CALLBACK_FLAG, CURRENT_HEADER_LENGTH, RESPONSE_FLAG};
use mx_net::request::{opcode, option};
use mx_net::transport::{Socket, Transport};
use std::net::TcpListener;
use std::time::Duration;

pub struct FakePeer {
    transport: Transport,
    buffer: mx_net::buffer::MessageBuffer,
}

impl FakePeer {
    pub fn accept(listener: &TcpListener) -> FakePeer {
        let (stream, _) = listener.accept().unwrap();
        FakePeer {
            transport: Transport::new(Socket::Tcp(stream)),
            buffer: mx_net::buffer::MessageBuffer::allocate(8192),
        }
    }

    pub fn receive(&mut self) -> (MessageHeader, Vec<u8>) {
        let header = self
            .transport
            .receive(&mut self.buffer, Some(Duration::from_secs(5)))
            .unwrap();
        let start = header.header_length as usize;
        let end = start + header.message_length as usize;
        (header, self.buffer.as_bytes()[start..end].to_vec())
    }

    pub fn reply(&mut self, request: &MessageHeader, body: &[u8]) {
        self.reply_typed(request, 0, body);
    }

    pub fn reply_u32(&mut self, request: &MessageHeader, value: u32) {
        let mut body = [0u8; 4];
        BigEndian::write_u32(&mut body, value);
        self.reply(request, &body);
    }

    pub fn reply_typed(&mut self, request: &MessageHeader, data_type: u32, body: &[u8]) {
        let header = MessageHeader {
            header_length: CURRENT_HEADER_LENGTH,
            message_length: 0,
            message_type: RESPONSE_FLAG | request.opcode(),
            status_code: 0,
            data_type,
            message_id: request.message_id,
        };
        self.transport.send(header, body).unwrap();
    }

    /// Pushes an unsolicited server-initiated callback message.
    /// `callback_id` must already carry the top bit (e.g. `0x8000_0001`).
    pub fn push_callback(&mut self, callback_id: u32, data_type: u32, body: &[u8]) {
        assert_ne!(callback_id & CALLBACK_FLAG, 0, "callback ids carry the top bit");
        let header = MessageHeader {
            header_length: CURRENT_HEADER_LENGTH,
            message_length: 0,
            message_type: opcode::CALLBACK,
            status_code: 0,
            data_type,
            message_id: callback_id,
        };
        self.transport.send(header, body).unwrap();
    }
}

/// Drives `peer` through the exact bring-up sequence `ServerInner::bring_up`
/// issues: discovery, optional format-introspection queries, the data
/// format set, version fetch, and client info report.
///
/// `negotiate` is `Some((native_dataformat, wordsize))` when the client was
/// configured with `RequestedFormat::Negotiate`; `None` when it requested a
/// fixed format (which skips the two introspection round trips).
pub fn perform_bring_up(peer: &mut FakePeer, negotiate: Option<(u32, u32)>) {
    let (req, _) = peer.receive();
    assert_eq!(req.opcode(), opcode::GET_ARRAY_BY_NAME);
    peer.reply(&req, &[]);

    if let Some((native_dataformat, wordsize)) = negotiate {
        let (req, body) = peer.receive();
        assert_eq!(req.opcode(), opcode::GET_OPTION);
        assert_eq!(BigEndian::read_u32(&body[0..4]), option::NATIVE_DATAFMT);
        peer.reply_u32(&req, native_dataformat);

        let (req, body) = peer.receive();
        assert_eq!(req.opcode(), opcode::GET_OPTION);
        assert_eq!(BigEndian::read_u32(&body[0..4]), option::WORDSIZE);
        peer.reply_u32(&req, wordsize);
    }

    let (req, _) = peer.receive();
    assert_eq!(req.opcode(), opcode::SET_OPTION);
    peer.reply(&req, &[]);

    let (req, body) = peer.receive();
    assert_eq!(req.opcode(), opcode::GET_OPTION);
    assert_eq!(BigEndian::read_u32(&body[0..4]), option::CLIENT_VERSION);
    peer.reply_u32(&req, 2_000_000);

    let (req, body) = peer.receive();
    assert_eq!(req.opcode(), opcode::GET_OPTION);
    assert_eq!(BigEndian::read_u32(&body[0..4]), option::CLIENT_VERSION_TIME);
    peer.reply_u32(&req, 0);

    let (req, _) = peer.receive();
    assert_eq!(req.opcode(), opcode::SET_CLIENT_INFO);
    peer.reply(&req, &[]);
}
