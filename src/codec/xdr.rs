//! XDR format (`spec.md` §4.4): big-endian IEEE encoding per RFC 1014, used
//! whenever RAW is unsafe (mismatched peer endianness or word size). Arrays
//! carry a 4-byte element count ahead of the elements, and the element
//! region is padded to a 4-byte boundary; both are counted in
//! `message_length` (`spec.md` §4.4 "XDR framing"). `use_64bit_longs` is
//! never honored here: XDR's LONG/ULONG/HEX are always 4 bytes
//! (`spec.md` §3 invariant - "XDR has no 64-bit-long mode").

use super::{CodecError, CodecResult, ValueCodec, ValueShape};
use crate::value::{DataType, Payload, Value};
use byteorder::{BigEndian, ByteOrder};

pub struct XdrCodec;

const COUNT_PREFIX: usize = 4;

fn pad4(len: usize) -> usize {
    (4 - (len % 4)) % 4
}

fn need(out_len: usize, required: usize) -> CodecResult<()> {
    if out_len < required {
        Err(CodecError::WouldExceedLimit(required - out_len))
    } else {
        Ok(())
    }
}

fn write_count(count: usize, out: &mut [u8]) -> CodecResult<usize> {
    need(out.len(), COUNT_PREFIX)?;
    BigEndian::write_u32(&mut out[..COUNT_PREFIX], count as u32);
    Ok(COUNT_PREFIX)
}

fn read_count(input: &[u8]) -> CodecResult<usize> {
    if input.len() < COUNT_PREFIX {
        return Err(CodecError::Truncated);
    }
    Ok(BigEndian::read_u32(&input[..COUNT_PREFIX]) as usize)
}

macro_rules! xdr_numeric {
    ($write_fn:ident, $read_fn:ident, $t:ty, $size:expr, $write_scalar:ident, $read_scalar:ident) => {
        fn $write_fn(values: &[$t], out: &mut [u8]) -> CodecResult<usize> {
            let body = values.len() * $size;
            let required = body + pad4(body);
            need(out.len(), required)?;
            for (i, v) in values.iter().enumerate() {
                $write_scalar(*v, &mut out[i * $size..i * $size + $size]);
            }
            for b in &mut out[body..required] {
                *b = 0;
            }
            Ok(required)
        }

        fn $read_fn(input: &[u8], count: usize) -> CodecResult<Vec<$t>> {
            let body = count * $size;
            let required = body + pad4(body);
            if input.len() < required {
                return Err(CodecError::Truncated);
            }
            Ok((0..count).map(|i| $read_scalar(&input[i * $size..i * $size + $size])).collect())
        }
    };
}

fn write_scalar_i32(v: i32, dst: &mut [u8]) {
    BigEndian::write_i32(dst, v)
}
fn read_scalar_i32(src: &[u8]) -> i32 {
    BigEndian::read_i32(src)
}
fn write_scalar_u32(v: u32, dst: &mut [u8]) {
    BigEndian::write_u32(dst, v)
}
fn read_scalar_u32(src: &[u8]) -> u32 {
    BigEndian::read_u32(src)
}
fn write_scalar_f32(v: f32, dst: &mut [u8]) {
    BigEndian::write_f32(dst, v)
}
fn read_scalar_f32(src: &[u8]) -> f32 {
    BigEndian::read_f32(src)
}
fn write_scalar_f64(v: f64, dst: &mut [u8]) {
    BigEndian::write_f64(dst, v)
}
fn read_scalar_f64(src: &[u8]) -> f64 {
    BigEndian::read_f64(src)
}
fn write_scalar_i64(v: i64, dst: &mut [u8]) {
    BigEndian::write_i64(dst, v)
}
fn read_scalar_i64(src: &[u8]) -> i64 {
    BigEndian::read_i64(src)
}
fn write_scalar_u64(v: u64, dst: &mut [u8]) {
    BigEndian::write_u64(dst, v)
}
fn read_scalar_u64(src: &[u8]) -> u64 {
    BigEndian::read_u64(src)
}
fn write_scalar_i16(v: i16, dst: &mut [u8]) {
    // XDR has no native 2-byte type; every integer is padded up to 4 bytes.
    BigEndian::write_i32(dst, v as i32)
}
fn read_scalar_i16(src: &[u8]) -> i16 {
    BigEndian::read_i32(src) as i16
}
fn write_scalar_u16(v: u16, dst: &mut [u8]) {
    BigEndian::write_u32(dst, v as u32)
}
fn read_scalar_u16(src: &[u8]) -> u16 {
    BigEndian::read_u32(src) as u32 as u16
}
fn write_scalar_u8(v: u8, dst: &mut [u8]) {
    BigEndian::write_u32(dst, v as u32)
}
fn read_scalar_u8(src: &[u8]) -> u8 {
    BigEndian::read_u32(src) as u8
}
fn write_scalar_i8(v: i8, dst: &mut [u8]) {
    BigEndian::write_i32(dst, v as i32)
}
fn read_scalar_i8(src: &[u8]) -> i8 {
    BigEndian::read_i32(src) as i8
}
fn write_scalar_bool(v: bool, dst: &mut [u8]) {
    BigEndian::write_u32(dst, v as u32)
}
fn read_scalar_bool(src: &[u8]) -> bool {
    BigEndian::read_u32(src) != 0
}

// Each of these pairs a 4-byte-wide XDR element with its scalar encoder.
fn write_i16_elems(values: &[i16], out: &mut [u8]) -> CodecResult<usize> {
    write_wide(values, out, write_scalar_i16)
}
fn read_i16_elems(input: &[u8], count: usize) -> CodecResult<Vec<i16>> {
    read_wide(input, count, read_scalar_i16)
}
fn write_u16_elems(values: &[u16], out: &mut [u8]) -> CodecResult<usize> {
    write_wide(values, out, write_scalar_u16)
}
fn read_u16_elems(input: &[u8], count: usize) -> CodecResult<Vec<u16>> {
    read_wide(input, count, read_scalar_u16)
}
fn write_u8_elems(values: &[u8], out: &mut [u8]) -> CodecResult<usize> {
    write_wide(values, out, write_scalar_u8)
}
fn read_u8_elems(input: &[u8], count: usize) -> CodecResult<Vec<u8>> {
    read_wide(input, count, read_scalar_u8)
}
fn write_i8_elems(values: &[i8], out: &mut [u8]) -> CodecResult<usize> {
    write_wide(values, out, write_scalar_i8)
}
fn read_i8_elems(input: &[u8], count: usize) -> CodecResult<Vec<i8>> {
    read_wide(input, count, read_scalar_i8)
}
fn write_bool_elems(values: &[bool], out: &mut [u8]) -> CodecResult<usize> {
    write_wide(values, out, write_scalar_bool)
}
fn read_bool_elems(input: &[u8], count: usize) -> CodecResult<Vec<bool>> {
    read_wide(input, count, read_scalar_bool)
}

fn write_wide<T: Copy>(values: &[T], out: &mut [u8], write_one: fn(T, &mut [u8])) -> CodecResult<usize> {
    let required = values.len() * 4;
    need(out.len(), required)?;
    for (i, v) in values.iter().enumerate() {
        write_one(*v, &mut out[i * 4..i * 4 + 4]);
    }
    Ok(required)
}

fn read_wide<T>(input: &[u8], count: usize, read_one: fn(&[u8]) -> T) -> CodecResult<Vec<T>> {
    let required = count * 4;
    if input.len() < required {
        return Err(CodecError::Truncated);
    }
    Ok((0..count).map(|i| read_one(&input[i * 4..i * 4 + 4])).collect())
}

xdr_numeric!(write_i32_elems, read_i32_elems, i32, 4, write_scalar_i32, read_scalar_i32);
xdr_numeric!(write_u32_elems, read_u32_elems, u32, 4, write_scalar_u32, read_scalar_u32);
xdr_numeric!(write_f32_elems, read_f32_elems, f32, 4, write_scalar_f32, read_scalar_f32);
xdr_numeric!(write_f64_elems, read_f64_elems, f64, 8, write_scalar_f64, read_scalar_f64);
xdr_numeric!(write_i64_elems, read_i64_elems, i64, 8, write_scalar_i64, read_scalar_i64);
xdr_numeric!(write_u64_elems, read_u64_elems, u64, 8, write_scalar_u64, read_scalar_u64);

fn write_strings(values: &[String], out: &mut [u8]) -> CodecResult<usize> {
    let mut offset = 0;
    for s in values {
        let count_size = write_count(s.len(), &mut out[offset..])?;
        offset += count_size;
        let body = s.len();
        let padded = body + pad4(body);
        need(out.len() - offset, padded)?;
        out[offset..offset + body].copy_from_slice(s.as_bytes());
        for b in &mut out[offset + body..offset + padded] {
            *b = 0;
        }
        offset += padded;
    }
    Ok(offset)
}

fn read_strings(input: &[u8], count: usize) -> CodecResult<Vec<String>> {
    let mut values = Vec::with_capacity(count);
    let mut offset = 0;
    for _ in 0..count {
        let len = read_count(&input[offset..])?;
        offset += COUNT_PREFIX;
        let padded = len + pad4(len);
        if input.len() < offset + padded {
            return Err(CodecError::Truncated);
        }
        let s = String::from_utf8(input[offset..offset + len].to_vec())
            .map_err(|e| CodecError::Invalid(e.to_string()))?;
        values.push(s);
        offset += padded;
    }
    Ok(values)
}

impl ValueCodec for XdrCodec {
    fn encode(&self, value: &Value, _use_64bit_longs: bool, out: &mut [u8]) -> CodecResult<usize> {
        // Strings carry their own RFC-1014 byte-length prefix regardless of
        // scalar/array shape; every other type is preceded by a 4-byte
        // element count only when it is an array (`spec.md` §4.4, §3).
        match &value.payload {
            Payload::String(v) => return write_strings(v, out),
            Payload::Name(s) => return write_strings(std::slice::from_ref(s), out),
            _ => {}
        }

        let is_array = !value.dims.is_empty();
        let prefix = if is_array { write_count(value.element_count(), out)? } else { 0 };
        let rest = &mut out[prefix..];
        let written = match &value.payload {
            Payload::Bool(v) => write_bool_elems(v, rest)?,
            Payload::Char(v) | Payload::Int8(v) => write_i8_elems(v, rest)?,
            Payload::UChar(v) | Payload::UInt8(v) => write_u8_elems(v, rest)?,
            Payload::Short(v) | Payload::Int16(v) => write_i16_elems(v, rest)?,
            Payload::UShort(v) | Payload::UInt16(v) => write_u16_elems(v, rest)?,
            Payload::Enum(v) | Payload::Int32(v) => write_i32_elems(v, rest)?,
            Payload::UInt32(v) => write_u32_elems(v, rest)?,
            Payload::Float(v) => write_f32_elems(v, rest)?,
            Payload::Double(v) => write_f64_elems(v, rest)?,
            Payload::Int64(v) => write_i64_elems(v, rest)?,
            Payload::UInt64(v) => write_u64_elems(v, rest)?,
            // LONG/ULONG/HEX always travel as the plain 4-byte XDR integer;
            // there is no 64-bit XDR long mode (`spec.md` §3).
            Payload::Long(v) => {
                let narrowed: Vec<i32> = v.iter().map(|x| *x as i32).collect();
                write_i32_elems(&narrowed, rest)?
            }
            Payload::ULong(v) | Payload::Hex(v) => {
                let narrowed: Vec<u32> = v.iter().map(|x| *x as u32).collect();
                write_u32_elems(&narrowed, rest)?
            }
            Payload::String(_) | Payload::Name(_) => unreachable!("handled above"),
        };
        Ok(prefix + written)
    }

    fn decode(&self, shape: &ValueShape, _use_64bit_longs: bool, input: &[u8]) -> CodecResult<Value> {
        if shape.data_type == DataType::String {
            let payload = Payload::String(read_strings(input, shape.element_count().max(1))?);
            return Ok(Value::array(shape.dims.clone(), payload));
        }
        if shape.data_type.is_name_type() {
            let payload = Payload::Name(read_strings(input, 1)?.remove(0));
            return Ok(Value::array(shape.dims.clone(), payload));
        }

        // The element count travels on the wire only to keep peers honest;
        // shape is still trusted for how many elements to actually decode
        // (mirrors the ASCII codec's shape-trust design).
        let is_array = !shape.dims.is_empty();
        let input = if is_array {
            if input.len() < COUNT_PREFIX {
                return Err(CodecError::Truncated);
            }
            &input[COUNT_PREFIX..]
        } else {
            input
        };
        let count = shape.element_count();

        let payload = match shape.data_type {
            DataType::Bool => Payload::Bool(read_bool_elems(input, count)?),
            DataType::Char => Payload::Char(read_i8_elems(input, count)?),
            DataType::Int8 => Payload::Int8(read_i8_elems(input, count)?),
            DataType::UChar => Payload::UChar(read_u8_elems(input, count)?),
            DataType::UInt8 => Payload::UInt8(read_u8_elems(input, count)?),
            DataType::Short => Payload::Short(read_i16_elems(input, count)?),
            DataType::Int16 => Payload::Int16(read_i16_elems(input, count)?),
            DataType::UShort => Payload::UShort(read_u16_elems(input, count)?),
            DataType::UInt16 => Payload::UInt16(read_u16_elems(input, count)?),
            DataType::Enum => Payload::Enum(read_i32_elems(input, count)?),
            DataType::Int32 => Payload::Int32(read_i32_elems(input, count)?),
            DataType::UInt32 => Payload::UInt32(read_u32_elems(input, count)?),
            DataType::Float => Payload::Float(read_f32_elems(input, count)?),
            DataType::Double => Payload::Double(read_f64_elems(input, count)?),
            DataType::Int64 => Payload::Int64(read_i64_elems(input, count)?),
            DataType::UInt64 => Payload::UInt64(read_u64_elems(input, count)?),
            DataType::Long => Payload::Long(read_i32_elems(input, count)?.into_iter().map(|v| v as i64).collect()),
            DataType::ULong => Payload::ULong(read_u32_elems(input, count)?.into_iter().map(|v| v as u64).collect()),
            DataType::Hex => Payload::Hex(read_u32_elems(input, count)?.into_iter().map(|v| v as u64).collect()),
            DataType::String | DataType::Record | DataType::RecordType | DataType::Interface | DataType::RecordField => {
                unreachable!("handled above")
            }
        };
        Ok(Value::array(shape.dims.clone(), payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_double_array() {
        let value = Value::array(vec![2], Payload::Double(vec![1.5, -2.25]));
        let mut buf = [0u8; 20];
        let written = XdrCodec.encode(&value, false, &mut buf).unwrap();
        assert_eq!(written, 20);
        let decoded = XdrCodec
            .decode(&ValueShape::array(DataType::Double, vec![2]), false, &buf)
            .unwrap();
        assert_eq!(decoded.payload, Payload::Double(vec![1.5, -2.25]));
    }

    #[test]
    fn short_values_pad_to_four_bytes() {
        let value = Value::array(vec![2], Payload::Short(vec![1, -1]));
        let mut buf = [0u8; 12];
        let written = XdrCodec.encode(&value, false, &mut buf).unwrap();
        assert_eq!(written, 12);
        let decoded = XdrCodec
            .decode(&ValueShape::array(DataType::Short, vec![2]), false, &buf)
            .unwrap();
        assert_eq!(decoded.payload, Payload::Short(vec![1, -1]));
    }

    #[test]
    fn long_ignores_use_64bit_longs() {
        let value = Value::scalar(Payload::Long(vec![-9]));
        let mut buf = [0u8; 4];
        XdrCodec.encode(&value, true, &mut buf).unwrap();
        let decoded = XdrCodec.decode(&ValueShape::scalar(DataType::Long), true, &buf).unwrap();
        assert_eq!(decoded.payload, Payload::Long(vec![-9]));
    }

    #[test]
    fn string_is_length_prefixed_and_padded() {
        let value = Value::scalar(Payload::String(vec!["abcde".to_string()]));
        let mut buf = [0u8; 16];
        // 4 (count) + 5 (bytes) + 3 (pad) = 12
        let written = XdrCodec.encode(&value, false, &mut buf).unwrap();
        assert_eq!(written, 12);
        let decoded = XdrCodec
            .decode(&ValueShape::scalar(DataType::String), false, &buf[..written])
            .unwrap();
        assert_eq!(decoded.payload, Payload::String(vec!["abcde".to_string()]));
    }

    #[test]
    fn would_exceed_limit_reports_shortfall() {
        let value = Value::array(vec![2], Payload::Double(vec![1.0, 2.0]));
        let mut buf = [0u8; 8];
        let err = XdrCodec.encode(&value, false, &mut buf).unwrap_err();
        assert_eq!(err, CodecError::WouldExceedLimit(12));
    }

    #[test]
    fn array_is_preceded_by_a_four_byte_element_count() {
        let value = Value::array(vec![8192], Payload::ULong(vec![0; 8192]));
        let mut buf = vec![0u8; 4 + 8192 * 4];
        let written = XdrCodec.encode(&value, false, &mut buf).unwrap();
        assert_eq!(written, 4 + 8192 * 4);
    }
}
