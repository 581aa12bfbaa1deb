//! RAW format (`spec.md` §4.4): the host-endian byte image of the array in
//! row-major order. Only selected during negotiation when the peer's
//! native endianness and word size match ours (`spec.md` §4.6), so native
//! endianness is the correct and only sane choice here.

use super::{CodecError, CodecResult, ValueCodec, ValueShape};
use crate::value::{DataType, Payload, Value};
use byteorder::{ByteOrder, NativeEndian};

pub struct RawCodec;

fn need(out_len: usize, required: usize) -> CodecResult<()> {
    if out_len < required {
        Err(CodecError::WouldExceedLimit(required - out_len))
    } else {
        Ok(())
    }
}

fn write_bytes(values: &[u8], out: &mut [u8]) -> CodecResult<usize> {
    need(out.len(), values.len())?;
    out[..values.len()].copy_from_slice(values);
    Ok(values.len())
}

fn write_i16(values: &[i16], out: &mut [u8]) -> CodecResult<usize> {
    let required = values.len() * 2;
    need(out.len(), required)?;
    for (i, v) in values.iter().enumerate() {
        NativeEndian::write_i16(&mut out[i * 2..i * 2 + 2], *v);
    }
    Ok(required)
}

fn write_u16(values: &[u16], out: &mut [u8]) -> CodecResult<usize> {
    let required = values.len() * 2;
    need(out.len(), required)?;
    for (i, v) in values.iter().enumerate() {
        NativeEndian::write_u16(&mut out[i * 2..i * 2 + 2], *v);
    }
    Ok(required)
}

fn write_i32(values: &[i32], out: &mut [u8]) -> CodecResult<usize> {
    let required = values.len() * 4;
    need(out.len(), required)?;
    for (i, v) in values.iter().enumerate() {
        NativeEndian::write_i32(&mut out[i * 4..i * 4 + 4], *v);
    }
    Ok(required)
}

fn write_u32(values: &[u32], out: &mut [u8]) -> CodecResult<usize> {
    let required = values.len() * 4;
    need(out.len(), required)?;
    for (i, v) in values.iter().enumerate() {
        NativeEndian::write_u32(&mut out[i * 4..i * 4 + 4], *v);
    }
    Ok(required)
}

fn write_f32(values: &[f32], out: &mut [u8]) -> CodecResult<usize> {
    let required = values.len() * 4;
    need(out.len(), required)?;
    for (i, v) in values.iter().enumerate() {
        NativeEndian::write_f32(&mut out[i * 4..i * 4 + 4], *v);
    }
    Ok(required)
}

fn write_f64(values: &[f64], out: &mut [u8]) -> CodecResult<usize> {
    let required = values.len() * 8;
    need(out.len(), required)?;
    for (i, v) in values.iter().enumerate() {
        NativeEndian::write_f64(&mut out[i * 8..i * 8 + 8], *v);
    }
    Ok(required)
}

fn write_i64(values: &[i64], out: &mut [u8]) -> CodecResult<usize> {
    let required = values.len() * 8;
    need(out.len(), required)?;
    for (i, v) in values.iter().enumerate() {
        NativeEndian::write_i64(&mut out[i * 8..i * 8 + 8], *v);
    }
    Ok(required)
}

fn write_u64(values: &[u64], out: &mut [u8]) -> CodecResult<usize> {
    let required = values.len() * 8;
    need(out.len(), required)?;
    for (i, v) in values.iter().enumerate() {
        NativeEndian::write_u64(&mut out[i * 8..i * 8 + 8], *v);
    }
    Ok(required)
}

/// Platform-long family width depends on the negotiated long-width,
/// regardless of the local machine's native word size (`spec.md` §3
/// invariant).
fn write_long(values: &[i64], use_64bit_longs: bool, out: &mut [u8]) -> CodecResult<usize> {
    if use_64bit_longs {
        write_i64(values, out)
    } else {
        let required = values.len() * 4;
        need(out.len(), required)?;
        for (i, v) in values.iter().enumerate() {
            NativeEndian::write_i32(&mut out[i * 4..i * 4 + 4], *v as i32);
        }
        Ok(required)
    }
}

fn write_ulong(values: &[u64], use_64bit_longs: bool, out: &mut [u8]) -> CodecResult<usize> {
    if use_64bit_longs {
        write_u64(values, out)
    } else {
        let required = values.len() * 4;
        need(out.len(), required)?;
        for (i, v) in values.iter().enumerate() {
            NativeEndian::write_u32(&mut out[i * 4..i * 4 + 4], *v as u32);
        }
        Ok(required)
    }
}

/// Strings in RAW format are written NUL-terminated and concatenated, same
/// as the C string arrays `mx_net.c` marshals directly into the buffer.
fn write_strings(values: &[String], out: &mut [u8]) -> CodecResult<usize> {
    let required: usize = values.iter().map(|s| s.len() + 1).sum();
    need(out.len(), required)?;
    let mut offset = 0;
    for s in values {
        out[offset..offset + s.len()].copy_from_slice(s.as_bytes());
        out[offset + s.len()] = 0;
        offset += s.len() + 1;
    }
    Ok(required)
}

fn read_bytes(input: &[u8], count: usize) -> CodecResult<Vec<u8>> {
    if input.len() < count {
        return Err(CodecError::Truncated);
    }
    Ok(input[..count].to_vec())
}

fn read_i16(input: &[u8], count: usize) -> CodecResult<Vec<i16>> {
    if input.len() < count * 2 {
        return Err(CodecError::Truncated);
    }
    Ok((0..count).map(|i| NativeEndian::read_i16(&input[i * 2..i * 2 + 2])).collect())
}

fn read_u16(input: &[u8], count: usize) -> CodecResult<Vec<u16>> {
    if input.len() < count * 2 {
        return Err(CodecError::Truncated);
    }
    Ok((0..count).map(|i| NativeEndian::read_u16(&input[i * 2..i * 2 + 2])).collect())
}

fn read_i32(input: &[u8], count: usize) -> CodecResult<Vec<i32>> {
    if input.len() < count * 4 {
        return Err(CodecError::Truncated);
    }
    Ok((0..count).map(|i| NativeEndian::read_i32(&input[i * 4..i * 4 + 4])).collect())
}

fn read_u32(input: &[u8], count: usize) -> CodecResult<Vec<u32>> {
    if input.len() < count * 4 {
        return Err(CodecError::Truncated);
    }
    Ok((0..count).map(|i| NativeEndian::read_u32(&input[i * 4..i * 4 + 4])).collect())
}

fn read_f32(input: &[u8], count: usize) -> CodecResult<Vec<f32>> {
    if input.len() < count * 4 {
        return Err(CodecError::Truncated);
    }
    Ok((0..count).map(|i| NativeEndian::read_f32(&input[i * 4..i * 4 + 4])).collect())
}

fn read_f64(input: &[u8], count: usize) -> CodecResult<Vec<f64>> {
    if input.len() < count * 8 {
        return Err(CodecError::Truncated);
    }
    Ok((0..count).map(|i| NativeEndian::read_f64(&input[i * 8..i * 8 + 8])).collect())
}

fn read_i64(input: &[u8], count: usize) -> CodecResult<Vec<i64>> {
    if input.len() < count * 8 {
        return Err(CodecError::Truncated);
    }
    Ok((0..count).map(|i| NativeEndian::read_i64(&input[i * 8..i * 8 + 8])).collect())
}

fn read_u64(input: &[u8], count: usize) -> CodecResult<Vec<u64>> {
    if input.len() < count * 8 {
        return Err(CodecError::Truncated);
    }
    Ok((0..count).map(|i| NativeEndian::read_u64(&input[i * 8..i * 8 + 8])).collect())
}

fn read_long(input: &[u8], count: usize, use_64bit_longs: bool) -> CodecResult<Vec<i64>> {
    if use_64bit_longs {
        read_i64(input, count)
    } else {
        Ok(read_i32(input, count)?.into_iter().map(|v| v as i64).collect())
    }
}

fn read_ulong(input: &[u8], count: usize, use_64bit_longs: bool) -> CodecResult<Vec<u64>> {
    if use_64bit_longs {
        read_u64(input, count)
    } else {
        Ok(read_u32(input, count)?.into_iter().map(|v| v as u64).collect())
    }
}

fn read_strings(input: &[u8], count: usize) -> CodecResult<Vec<String>> {
    let mut values = Vec::with_capacity(count);
    let mut offset = 0;
    for _ in 0..count {
        let nul = input[offset..]
            .iter()
            .position(|b| *b == 0)
            .ok_or(CodecError::Truncated)?;
        let s = String::from_utf8(input[offset..offset + nul].to_vec())
            .map_err(|e| CodecError::Invalid(e.to_string()))?;
        values.push(s);
        offset += nul + 1;
    }
    Ok(values)
}

impl ValueCodec for RawCodec {
    fn encode(&self, value: &Value, use_64bit_longs: bool, out: &mut [u8]) -> CodecResult<usize> {
        match &value.payload {
            Payload::Char(v) | Payload::Int8(v) => {
                let bytes: Vec<u8> = v.iter().map(|x| *x as u8).collect();
                write_bytes(&bytes, out)
            }
            Payload::UChar(v) | Payload::UInt8(v) => write_bytes(v, out),
            Payload::Bool(v) => {
                let bytes: Vec<u8> = v.iter().map(|x| *x as u8).collect();
                write_bytes(&bytes, out)
            }
            Payload::Short(v) | Payload::Int16(v) => write_i16(v, out),
            Payload::UShort(v) | Payload::UInt16(v) => write_u16(v, out),
            Payload::Enum(v) | Payload::Int32(v) => write_i32(v, out),
            Payload::UInt32(v) => write_u32(v, out),
            Payload::Float(v) => write_f32(v, out),
            Payload::Double(v) => write_f64(v, out),
            Payload::Int64(v) => write_i64(v, out),
            Payload::UInt64(v) => write_u64(v, out),
            Payload::Long(v) => write_long(v, use_64bit_longs, out),
            Payload::ULong(v) | Payload::Hex(v) => write_ulong(v, use_64bit_longs, out),
            Payload::String(v) => write_strings(v, out),
            Payload::Name(s) => write_strings(std::slice::from_ref(s), out),
        }
    }

    fn decode(&self, shape: &ValueShape, use_64bit_longs: bool, input: &[u8]) -> CodecResult<Value> {
        let count = shape.element_count();
        let payload = match shape.data_type {
            DataType::Char => Payload::Char(read_bytes(input, count)?.into_iter().map(|b| b as i8).collect()),
            DataType::Int8 => Payload::Int8(read_bytes(input, count)?.into_iter().map(|b| b as i8).collect()),
            DataType::UChar => Payload::UChar(read_bytes(input, count)?),
            DataType::UInt8 => Payload::UInt8(read_bytes(input, count)?),
            DataType::Bool => Payload::Bool(read_bytes(input, count)?.into_iter().map(|b| b != 0).collect()),
            DataType::Short => Payload::Short(read_i16(input, count)?),
            DataType::Int16 => Payload::Int16(read_i16(input, count)?),
            DataType::UShort => Payload::UShort(read_u16(input, count)?),
            DataType::UInt16 => Payload::UInt16(read_u16(input, count)?),
            DataType::Enum => Payload::Enum(read_i32(input, count)?),
            DataType::Int32 => Payload::Int32(read_i32(input, count)?),
            DataType::UInt32 => Payload::UInt32(read_u32(input, count)?),
            DataType::Float => Payload::Float(read_f32(input, count)?),
            DataType::Double => Payload::Double(read_f64(input, count)?),
            DataType::Int64 => Payload::Int64(read_i64(input, count)?),
            DataType::UInt64 => Payload::UInt64(read_u64(input, count)?),
            DataType::Long => Payload::Long(read_long(input, count, use_64bit_longs)?),
            DataType::ULong => Payload::ULong(read_ulong(input, count, use_64bit_longs)?),
            DataType::Hex => Payload::Hex(read_ulong(input, count, use_64bit_longs)?),
            DataType::String => Payload::String(read_strings(input, count.max(1))?),
            DataType::Record | DataType::RecordType | DataType::Interface | DataType::RecordField => {
                Payload::Name(read_strings(input, 1)?.remove(0))
            }
        };
        Ok(Value::array(shape.dims.clone(), payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_double_scalar() {
        let value = Value::scalar(Payload::Double(vec![12.5]));
        let mut buf = [0u8; 8];
        let written = RawCodec.encode(&value, false, &mut buf).unwrap();
        assert_eq!(written, 8);
        let decoded = RawCodec
            .decode(&ValueShape::scalar(DataType::Double), false, &buf)
            .unwrap();
        assert_eq!(decoded.payload, Payload::Double(vec![12.5]));
    }

    #[test]
    fn roundtrip_ulong_array_64bit() {
        let value = Value::array(vec![4], Payload::ULong(vec![1, 2, 3, 4]));
        let mut buf = [0u8; 32];
        let written = RawCodec.encode(&value, true, &mut buf).unwrap();
        assert_eq!(written, 32);
        let decoded = RawCodec
            .decode(&ValueShape::array(DataType::ULong, vec![4]), true, &buf)
            .unwrap();
        assert_eq!(decoded.payload, Payload::ULong(vec![1, 2, 3, 4]));
    }

    #[test]
    fn long_uses_32_bits_when_64bit_longs_disabled() {
        let value = Value::scalar(Payload::Long(vec![-7]));
        let mut buf = [0u8; 4];
        let written = RawCodec.encode(&value, false, &mut buf).unwrap();
        assert_eq!(written, 4);
        let decoded = RawCodec
            .decode(&ValueShape::scalar(DataType::Long), false, &buf)
            .unwrap();
        assert_eq!(decoded.payload, Payload::Long(vec![-7]));
    }

    #[test]
    fn would_exceed_limit_reports_shortfall() {
        let value = Value::scalar(Payload::Double(vec![1.0]));
        let mut buf = [0u8; 4];
        let err = RawCodec.encode(&value, false, &mut buf).unwrap_err();
        assert_eq!(err, CodecError::WouldExceedLimit(4));
    }

    #[test]
    fn roundtrip_string() {
        let value = Value::scalar(Payload::String(vec!["theta".to_string()]));
        let mut buf = [0u8; 16];
        let written = RawCodec.encode(&value, false, &mut buf).unwrap();
        let decoded = RawCodec
            .decode(&ValueShape::scalar(DataType::String), false, &buf[..written])
            .unwrap();
        assert_eq!(decoded.payload, Payload::String(vec!["theta".to_string()]));
    }
}
