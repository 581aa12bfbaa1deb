//! Header Codec (C3, `spec.md` §4.3 and §6 "Wire framing").

use crate::error::{ErrorKind, MxNetError, Result};
use byteorder::{BigEndian, ByteOrder};

/// Sentinel the magic word must equal (`spec.md` §6: `0x4d582020`, the
/// ASCII bytes `"MX  "`).
pub const MAGIC: u32 = 0x4d58_2020;

/// Legacy (pre-1.5) header length: magic, header length, message length,
/// message type, status code. No DATA_TYPE or MESSAGE_ID words.
pub const LEGACY_HEADER_LENGTH: u32 = 20;

/// Current header length: the legacy five words plus DATA_TYPE and
/// MESSAGE_ID.
pub const CURRENT_HEADER_LENGTH: u32 = 28;

/// Set on `MESSAGE_TYPE` for a server-to-client response.
pub const RESPONSE_FLAG: u32 = 0x8000_0000;

/// Set on `MESSAGE_ID` to mark a server-initiated callback delivery rather
/// than an RPC correlation id.
pub const CALLBACK_FLAG: u32 = 0x8000_0000;

const WORD: usize = 4;

/// The fixed-field message header (`spec.md` §3 "MessageHeader").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub header_length: u32,
    pub message_length: u32,
    pub message_type: u32,
    pub status_code: u32,
    pub data_type: u32,
    pub message_id: u32,
}

impl MessageHeader {
    pub fn new(header_length: u32, message_type: u32) -> MessageHeader {
        MessageHeader {
            header_length,
            message_length: 0,
            message_type,
            status_code: 0,
            data_type: 0,
            message_id: 0,
        }
    }

    #[inline]
    pub fn is_response(&self) -> bool {
        self.message_type & RESPONSE_FLAG != 0
    }

    #[inline]
    pub fn opcode(&self) -> u32 {
        self.message_type & !RESPONSE_FLAG
    }

    #[inline]
    pub fn is_callback_id(&self) -> bool {
        self.message_id & CALLBACK_FLAG != 0
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.status_code != 0
    }

    /// Supports short headers from pre-1.5 peers by omitting DATA_TYPE and
    /// MESSAGE_ID when `self.header_length < CURRENT_HEADER_LENGTH`
    /// (`spec.md` §4.3).
    pub fn encode(&self, buf: &mut [u8]) -> Result<()> {
        let header_length = self.header_length as usize;
        if buf.len() < header_length {
            return Err(MxNetError::new(
                ErrorKind::CorruptDataStructure,
                "buffer too small to hold header",
            ));
        }
        if header_length < LEGACY_HEADER_LENGTH as usize || header_length % WORD != 0 {
            return Err(MxNetError::new(
                ErrorKind::IllegalArgument,
                format!("illegal header length {}", header_length),
            ));
        }

        BigEndian::write_u32(&mut buf[0..4], MAGIC);
        BigEndian::write_u32(&mut buf[4..8], self.header_length);
        BigEndian::write_u32(&mut buf[8..12], self.message_length);
        BigEndian::write_u32(&mut buf[12..16], self.message_type);
        BigEndian::write_u32(&mut buf[16..20], self.status_code);

        if header_length >= CURRENT_HEADER_LENGTH as usize {
            BigEndian::write_u32(&mut buf[20..24], self.data_type);
            BigEndian::write_u32(&mut buf[24..28], self.message_id);
        }

        Ok(())
    }

    /// Parses a header out of `buf`. `peer_header_length` is the length
    /// *actually present in this message*, per `spec.md` §4.3's rule that
    /// `HEADER_LENGTH` is trusted as received, not as locally configured.
    pub fn decode(buf: &[u8], peer_header_length: u32) -> Result<MessageHeader> {
        if buf.len() < peer_header_length as usize || peer_header_length < LEGACY_HEADER_LENGTH {
            return Err(MxNetError::new(
                ErrorKind::CorruptDataStructure,
                "short message header",
            ));
        }

        let magic = BigEndian::read_u32(&buf[0..4]);
        if magic != MAGIC {
            return Err(MxNetError::new(
                ErrorKind::NetworkIo,
                format!("bad magic number {:#010x}", magic),
            ));
        }

        let header_length = BigEndian::read_u32(&buf[4..8]);
        let message_length = BigEndian::read_u32(&buf[8..12]);
        let message_type = BigEndian::read_u32(&buf[12..16]);
        let status_code = BigEndian::read_u32(&buf[16..20]);

        // Field presence is decided by what the peer told us is actually
        // present in this message, not by the wire-read HEADER_LENGTH word -
        // a peer lying about its own length shouldn't make us read past
        // what it said it sent.
        let (data_type, message_id) = if peer_header_length >= CURRENT_HEADER_LENGTH {
            (
                BigEndian::read_u32(&buf[20..24]),
                BigEndian::read_u32(&buf[24..28]),
            )
        } else {
            (0, 0)
        };

        Ok(MessageHeader {
            header_length,
            message_length,
            message_type,
            status_code,
            data_type,
            message_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_current_header() {
        let header = MessageHeader {
            header_length: CURRENT_HEADER_LENGTH,
            message_length: 42,
            message_type: RESPONSE_FLAG | 3,
            status_code: 0,
            data_type: 11,
            message_id: 7,
        };
        let mut buf = [0u8; CURRENT_HEADER_LENGTH as usize];
        header.encode(&mut buf).unwrap();
        let decoded = MessageHeader::decode(&buf, CURRENT_HEADER_LENGTH).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn legacy_header_omits_data_type_and_message_id() {
        let header = MessageHeader {
            header_length: LEGACY_HEADER_LENGTH,
            message_length: 10,
            message_type: 1,
            status_code: 0,
            data_type: 99,
            message_id: 99,
        };
        let mut buf = [0xffu8; LEGACY_HEADER_LENGTH as usize];
        header.encode(&mut buf).unwrap();
        let decoded = MessageHeader::decode(&buf, LEGACY_HEADER_LENGTH).unwrap();
        assert_eq!(decoded.data_type, 0);
        assert_eq!(decoded.message_id, 0);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = [0u8; CURRENT_HEADER_LENGTH as usize];
        BigEndian::write_u32(&mut buf[0..4], 0xdead_beef);
        let err = MessageHeader::decode(&buf, CURRENT_HEADER_LENGTH).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NetworkIo);
    }

    #[test]
    fn decode_uses_peer_header_length_not_local() {
        // Encode with the current (28-byte) layout, but have the decoder
        // trust a peer-reported legacy length - it must not read past it.
        let header = MessageHeader {
            header_length: CURRENT_HEADER_LENGTH,
            message_length: 5,
            message_type: 2,
            status_code: 0,
            data_type: 11,
            message_id: 55,
        };
        let mut buf = [0u8; CURRENT_HEADER_LENGTH as usize];
        header.encode(&mut buf).unwrap();
        let decoded = MessageHeader::decode(&buf, LEGACY_HEADER_LENGTH).unwrap();
        assert_eq!(decoded.data_type, 0);
        assert_eq!(decoded.message_id, 0);
    }
}
