//! Request Engine (C8, `spec.md` §4.8): the typed operations built on top
//! of [`crate::connection::Server::raw_call`].

use crate::codec::{codec_for, encode_with_growth, ValueShape};
use crate::connection::Server;
use crate::error::{ErrorKind, MxNetError, Result};
use crate::handle_cache::NetworkHandle;
use crate::value::{DataType, Value};
use byteorder::{BigEndian, ByteOrder};
use std::time::Instant;

/// Wire opcodes (`spec.md` §6 "Operation opcodes"). Numbered arbitrarily
/// since `spec.md` leaves the concrete integers unspecified; the ordering
/// mirrors the table in §4.8.
pub mod opcode {
    pub const GET_ARRAY_BY_NAME: u32 = 1;
    pub const PUT_ARRAY_BY_NAME: u32 = 2;
    pub const GET_ARRAY_BY_HANDLE: u32 = 3;
    pub const PUT_ARRAY_BY_HANDLE: u32 = 4;
    pub const GET_NETWORK_HANDLE: u32 = 5;
    pub const GET_FIELD_TYPE: u32 = 6;
    pub const SET_CLIENT_INFO: u32 = 7;
    pub const GET_OPTION: u32 = 8;
    pub const SET_OPTION: u32 = 9;
    pub const GET_ATTRIBUTE: u32 = 10;
    pub const SET_ATTRIBUTE: u32 = 11;
    pub const ADD_CALLBACK: u32 = 12;
    pub const DELETE_CALLBACK: u32 = 13;
    pub const CALLBACK: u32 = 14;
    pub const UNEXPECTED_ERROR: u32 = 15;
}

/// `spec.md` §6 "Options".
pub mod option {
    pub const DATAFMT: u32 = 1;
    pub const NATIVE_DATAFMT: u32 = 2;
    pub const USE_64BIT_LONG: u32 = 3;
    pub const WORDSIZE: u32 = 4;
    pub const CLIENT_VERSION: u32 = 5;
    pub const CLIENT_VERSION_TIME: u32 = 6;
}

/// `spec.md` §6 "Attributes".
pub mod attribute {
    pub const VALUE_CHANGE_THRESHOLD: u32 = 1;
    pub const POLL: u32 = 2;
    pub const READ_ONLY: u32 = 3;
    pub const NO_ACCESS: u32 = 4;
}

/// Right-pads `name` with NULs to `width` bytes, truncating if it is
/// already that long or longer. Mirrors `mx_net.c`'s fixed-width name
/// field (`spec.md` §8 scenario 3: `"edge_energy.value<pad to 40>11567\0"`).
pub const NAME_FIELD_WIDTH: usize = 40;

pub(crate) fn pad_name(name: &str) -> Vec<u8> {
    let mut bytes = name.as_bytes().to_vec();
    bytes.resize(NAME_FIELD_WIDTH.max(bytes.len() + 1), 0);
    bytes
}

pub(crate) fn encode_handle(handle: NetworkHandle) -> [u8; 8] {
    let mut buf = [0u8; 8];
    BigEndian::write_u32(&mut buf[0..4], handle.record_handle);
    BigEndian::write_u32(&mut buf[4..8], handle.field_handle);
    buf
}

pub(crate) fn decode_handle(body: &[u8]) -> Result<NetworkHandle> {
    if body.len() < 8 {
        return Err(MxNetError::new(ErrorKind::CorruptDataStructure, "short handle response"));
    }
    Ok(NetworkHandle {
        record_handle: BigEndian::read_u32(&body[0..4]),
        field_handle: BigEndian::read_u32(&body[4..8]),
    })
}

/// Encodes `value` in the Server's negotiated format, growing the output
/// buffer on `WouldExceedLimit` up to the bounded retry count
/// (`spec.md` §4.4, §4.8 "Buffer growth loop").
pub(crate) fn encode_value(server: &Server, value: &Value) -> Result<Vec<u8>> {
    let (format, use_64bit_longs) = server.negotiated_format();
    let codec = codec_for(format);
    let mut scratch = crate::buffer::MessageBuffer::allocate(crate::buffer::estimate_body_size(
        value.data_type(),
        value.element_count().max(1),
        use_64bit_longs,
    ));
    let written = encode_with_growth(&mut scratch, 0, |out| codec.encode(value, use_64bit_longs, out))
        .map_err(|e| MxNetError::new(ErrorKind::CorruptDataStructure, e.to_string()))?;
    Ok(scratch.as_bytes()[..written].to_vec())
}

fn decode_value(server: &Server, shape: &ValueShape, body: &[u8]) -> Result<Value> {
    let (format, use_64bit_longs) = server.negotiated_format();
    codec_for(format)
        .decode(shape, use_64bit_longs, body)
        .map_err(|e| MxNetError::new(ErrorKind::CorruptDataStructure, e.to_string()))
}

pub fn get_array_by_name(server: &Server, name: &str, shape: &ValueShape, deadline: Option<Instant>) -> Result<Value> {
    let (_, body) = server.raw_call(opcode::GET_ARRAY_BY_NAME, 0, &pad_name(name), deadline)?;
    decode_value(server, shape, &body)
}

pub fn get_array_by_handle(
    server: &Server,
    handle: NetworkHandle,
    shape: &ValueShape,
    deadline: Option<Instant>,
) -> Result<Value> {
    let (_, body) = server.raw_call(opcode::GET_ARRAY_BY_HANDLE, 0, &encode_handle(handle), deadline)?;
    decode_value(server, shape, &body)
}

pub fn put_array_by_name(server: &Server, name: &str, value: &Value, deadline: Option<Instant>) -> Result<()> {
    let mut body = pad_name(name);
    body.extend(encode_value(server, value)?);
    server.raw_call(opcode::PUT_ARRAY_BY_NAME, value.data_type().wire_tag(), &body, deadline)?;
    Ok(())
}

pub fn put_array_by_handle(
    server: &Server,
    handle: NetworkHandle,
    value: &Value,
    deadline: Option<Instant>,
) -> Result<()> {
    let mut body = encode_handle(handle).to_vec();
    body.extend(encode_value(server, value)?);
    server.raw_call(opcode::PUT_ARRAY_BY_HANDLE, value.data_type().wire_tag(), &body, deadline)?;
    Ok(())
}

pub fn get_network_handle(server: &Server, name: &str, deadline: Option<Instant>) -> Result<NetworkHandle> {
    let (_, body) = server.raw_call(opcode::GET_NETWORK_HANDLE, 0, &pad_name(name), deadline)?;
    decode_handle(&body)
}

/// Result of `get-field-type` (`spec.md` §4.8): the field's declared
/// datatype and dimension sizes.
pub fn get_field_type(server: &Server, name: &str, deadline: Option<Instant>) -> Result<ValueShape> {
    let (_, body) = server.raw_call(opcode::GET_FIELD_TYPE, 0, &pad_name(name), deadline)?;
    if body.len() < 8 {
        return Err(MxNetError::new(ErrorKind::CorruptDataStructure, "short get-field-type response"));
    }
    let data_type = DataType::from_wire(BigEndian::read_u32(&body[0..4]))?;
    let num_dims = BigEndian::read_u32(&body[4..8]) as usize;
    let mut dims = Vec::with_capacity(num_dims);
    for i in 0..num_dims {
        let start = 8 + i * 4;
        if body.len() < start + 4 {
            return Err(MxNetError::new(ErrorKind::CorruptDataStructure, "truncated dimension list"));
        }
        dims.push(BigEndian::read_u32(&body[start..start + 4]) as usize);
    }
    Ok(if dims.is_empty() {
        ValueShape::scalar(data_type)
    } else {
        ValueShape::array(data_type, dims)
    })
}

pub fn set_client_info(server: &Server, info: &str, deadline: Option<Instant>) -> Result<()> {
    let sanitized: String = info
        .chars()
        .map(|c| if c.is_whitespace() && c != ' ' { '_' } else { c })
        .collect();
    server.raw_call(opcode::SET_CLIENT_INFO, 0, sanitized.as_bytes(), deadline)?;
    Ok(())
}

pub fn get_option(server: &Server, option_id: u32, deadline: Option<Instant>) -> Result<u32> {
    let mut body = [0u8; 4];
    BigEndian::write_u32(&mut body, option_id);
    let (_, response) = server.raw_call(opcode::GET_OPTION, 0, &body, deadline)?;
    if response.len() < 4 {
        return Err(MxNetError::new(ErrorKind::CorruptDataStructure, "short get-option response"));
    }
    Ok(BigEndian::read_u32(&response[0..4]))
}

pub fn set_option(server: &Server, option_id: u32, value: u32, deadline: Option<Instant>) -> Result<()> {
    let mut body = [0u8; 8];
    BigEndian::write_u32(&mut body[0..4], option_id);
    BigEndian::write_u32(&mut body[4..8], value);
    server.raw_call(opcode::SET_OPTION, 0, &body, deadline)?;
    Ok(())
}

pub fn get_attribute(server: &Server, handle: NetworkHandle, attribute_id: u32, deadline: Option<Instant>) -> Result<f64> {
    let mut body = encode_handle(handle).to_vec();
    let mut attr = [0u8; 4];
    BigEndian::write_u32(&mut attr, attribute_id);
    body.extend_from_slice(&attr);
    let (_, response) = server.raw_call(opcode::GET_ATTRIBUTE, 0, &body, deadline)?;
    if response.len() < 8 {
        return Err(MxNetError::new(ErrorKind::CorruptDataStructure, "short get-attribute response"));
    }
    Ok(BigEndian::read_f64(&response[0..8]))
}

pub fn set_attribute(
    server: &Server,
    handle: NetworkHandle,
    attribute_id: u32,
    value: f64,
    deadline: Option<Instant>,
) -> Result<()> {
    let mut body = encode_handle(handle).to_vec();
    let mut rest = [0u8; 12];
    BigEndian::write_u32(&mut rest[0..4], attribute_id);
    BigEndian::write_f64(&mut rest[4..12], value);
    body.extend_from_slice(&rest);
    server.raw_call(opcode::SET_ATTRIBUTE, 0, &body, deadline)?;
    Ok(())
}

pub fn add_callback(server: &Server, handle: NetworkHandle, supported_types: u32, deadline: Option<Instant>) -> Result<u32> {
    let mut body = encode_handle(handle).to_vec();
    let mut mask = [0u8; 4];
    BigEndian::write_u32(&mut mask, supported_types);
    body.extend_from_slice(&mask);
    let (_, response) = server.raw_call(opcode::ADD_CALLBACK, 0, &body, deadline)?;
    if response.len() < 4 {
        return Err(MxNetError::new(ErrorKind::CorruptDataStructure, "short add-callback response"));
    }
    Ok(BigEndian::read_u32(&response[0..4]))
}

pub fn delete_callback(server: &Server, callback_id: u32, deadline: Option<Instant>) -> Result<()> {
    let mut body = [0u8; 4];
    BigEndian::write_u32(&mut body, callback_id);
    server.raw_call(opcode::DELETE_CALLBACK, 0, &body, deadline)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_name_right_pads_with_nuls_to_field_width() {
        let padded = pad_name("edge_energy.value");
        assert_eq!(padded.len(), NAME_FIELD_WIDTH);
        assert!(padded[..18].iter().zip(b"edge_energy.value").all(|(a, b)| a == b));
        assert!(padded[18..].iter().all(|b| *b == 0));
    }

    #[test]
    fn pad_name_grows_for_long_names() {
        let long = "a".repeat(50);
        let padded = pad_name(&long);
        assert_eq!(padded.len(), 51);
        assert_eq!(padded[50], 0);
    }

    #[test]
    fn handle_round_trips_through_wire_encoding() {
        let handle = NetworkHandle { record_handle: 7, field_handle: 9 };
        let encoded = encode_handle(handle);
        assert_eq!(decode_handle(&encoded).unwrap(), handle);
    }
}
