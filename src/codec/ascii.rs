//! ASCII format (`spec.md` §4.4): the "archaic ASCII" textual rendering -
//! whitespace-separated scalar tokens, arrays bracketed with `{` `}` one
//! nesting level per dimension, and double-quoted strings. This is the
//! only format legible on the wire, and the only one negotiated when
//! either peer cannot agree on a binary layout.

use super::{CodecError, CodecResult, ValueCodec, ValueShape};
use crate::value::{DataType, Payload, Value};
use std::str::FromStr;

/// Longest single scalar token accepted while parsing (`spec.md` §4.4
/// "Limits"). Guards against an unbounded read off a corrupt or hostile
/// peer.
pub const DEFAULT_MAX_TOKEN_LENGTH: usize = 4096;

pub struct AsciiCodec;

fn need(out_len: usize, required: usize) -> CodecResult<()> {
    if out_len < required {
        Err(CodecError::WouldExceedLimit(required - out_len))
    } else {
        Ok(())
    }
}

/// Writes `text` followed by a NUL terminator - ASCII-format values travel
/// as C strings on the wire (`spec.md` §8 scenario 3: the put body ends
/// `..."11567\0"`).
fn write_text(text: &str, out: &mut [u8]) -> CodecResult<usize> {
    let required = text.len() + 1;
    need(out.len(), required)?;
    out[..text.len()].copy_from_slice(text.as_bytes());
    out[text.len()] = 0;
    Ok(required)
}

fn quote(s: &str) -> String {
    let mut q = String::with_capacity(s.len() + 2);
    q.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            q.push('\\');
        }
        q.push(c);
    }
    q.push('"');
    q
}

/// Renders a flat row-major element slice as nested `{ }` groups, one
/// level per entry in `dims` after the first, mirroring the C client's
/// recursive array printer.
fn bracket_rows<T, F: Fn(&T) -> String>(values: &[T], dims: &[usize], render: &F) -> String {
    if dims.len() <= 1 {
        return values.iter().map(render).collect::<Vec<_>>().join(" ");
    }
    let row_len: usize = dims[1..].iter().product();
    let rows = values.chunks(row_len.max(1));
    let mut parts = Vec::new();
    for row in rows {
        parts.push(format!("{{ {} }}", bracket_rows(row, &dims[1..], render)));
    }
    parts.join(" ")
}

fn render_value(value: &Value) -> String {
    let dims = &value.dims;
    match &value.payload {
        Payload::String(v) => v.iter().map(|s| quote(s)).collect::<Vec<_>>().join(" "),
        Payload::Name(s) => quote(s),
        Payload::Char(v) => bracket_rows(v, dims, &|x: &i8| x.to_string()),
        Payload::UChar(v) => bracket_rows(v, dims, &|x: &u8| x.to_string()),
        Payload::Int8(v) => bracket_rows(v, dims, &|x: &i8| x.to_string()),
        Payload::UInt8(v) => bracket_rows(v, dims, &|x: &u8| x.to_string()),
        Payload::Short(v) => bracket_rows(v, dims, &|x: &i16| x.to_string()),
        Payload::UShort(v) => bracket_rows(v, dims, &|x: &u16| x.to_string()),
        Payload::Int16(v) => bracket_rows(v, dims, &|x: &i16| x.to_string()),
        Payload::UInt16(v) => bracket_rows(v, dims, &|x: &u16| x.to_string()),
        Payload::Bool(v) => bracket_rows(v, dims, &|x: &bool| (*x as i32).to_string()),
        Payload::Enum(v) => bracket_rows(v, dims, &|x: &i32| x.to_string()),
        Payload::Int32(v) => bracket_rows(v, dims, &|x: &i32| x.to_string()),
        Payload::UInt32(v) => bracket_rows(v, dims, &|x: &u32| x.to_string()),
        Payload::Long(v) => bracket_rows(v, dims, &|x: &i64| x.to_string()),
        Payload::ULong(v) => bracket_rows(v, dims, &|x: &u64| x.to_string()),
        Payload::Hex(v) => bracket_rows(v, dims, &|x: &u64| format!("{:#x}", x)),
        Payload::Float(v) => bracket_rows(v, dims, &|x: &f32| x.to_string()),
        Payload::Double(v) => bracket_rows(v, dims, &|x: &f64| x.to_string()),
        Payload::Int64(v) => bracket_rows(v, dims, &|x: &i64| x.to_string()),
        Payload::UInt64(v) => bracket_rows(v, dims, &|x: &u64| x.to_string()),
    }
}

fn tokenize(input: &str) -> CodecResult<Vec<String>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() || c == '{' || c == '}' {
            chars.next();
            if c == '{' || c == '}' {
                tokens.push(c.to_string());
            }
            continue;
        }
        if c == '"' {
            chars.next();
            let mut s = String::from("\"");
            loop {
                match chars.next() {
                    Some('\\') => {
                        if let Some(escaped) = chars.next() {
                            s.push(escaped);
                        }
                    }
                    Some('"') => {
                        s.push('"');
                        break;
                    }
                    Some(other) => s.push(other),
                    None => return Err(CodecError::Truncated),
                }
                if s.len() > DEFAULT_MAX_TOKEN_LENGTH {
                    return Err(CodecError::Invalid("string token too long".into()));
                }
            }
            tokens.push(s);
            continue;
        }
        let mut tok = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() || c == '{' || c == '}' {
                break;
            }
            tok.push(c);
            chars.next();
            if tok.len() > DEFAULT_MAX_TOKEN_LENGTH {
                return Err(CodecError::Invalid("token too long".into()));
            }
        }
        tokens.push(tok);
    }
    Ok(tokens)
}

fn unquote(tok: &str) -> CodecResult<String> {
    let inner = tok
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(|| CodecError::Invalid(format!("expected quoted string, got {}", tok)))?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

fn parse_scalar<T: FromStr>(tok: &str) -> CodecResult<T> {
    tok.parse::<T>()
        .map_err(|_| CodecError::Invalid(format!("cannot parse {:?} as scalar", tok)))
}

/// Consumes exactly `count` leaf tokens from `tokens[*pos..]`, skipping the
/// `{`/`}` grouping markers (which carry no information beyond what `dims`
/// already specifies - the decoder trusts the shape it was told to expect,
/// matching `spec.md` §4.4's "shape comes from `get_field_type`, not from
/// the wire").
fn take_leaves<'a>(tokens: &'a [String], pos: &mut usize, count: usize) -> CodecResult<Vec<&'a str>> {
    let mut leaves = Vec::with_capacity(count);
    while leaves.len() < count {
        let tok = tokens.get(*pos).ok_or(CodecError::Truncated)?;
        *pos += 1;
        if tok == "{" || tok == "}" {
            continue;
        }
        leaves.push(tok.as_str());
    }
    Ok(leaves)
}

impl ValueCodec for AsciiCodec {
    fn encode(&self, value: &Value, _use_64bit_longs: bool, out: &mut [u8]) -> CodecResult<usize> {
        write_text(&render_value(value), out)
    }

    fn decode(&self, shape: &ValueShape, _use_64bit_longs: bool, input: &[u8]) -> CodecResult<Value> {
        // ASCII values are NUL-terminated C strings on the wire; a peer
        // that omits the terminator is tolerated too.
        let trimmed = match input.iter().position(|&b| b == 0) {
            Some(nul) => &input[..nul],
            None => input,
        };
        let text = std::str::from_utf8(trimmed).map_err(|e| CodecError::Invalid(e.to_string()))?;
        let tokens = tokenize(text)?;
        let count = shape.element_count();

        if shape.data_type.is_name_type() {
            let mut pos = 0;
            let leaf = take_leaves(&tokens, &mut pos, 1)?;
            return Ok(Value::array(shape.dims.clone(), Payload::Name(unquote(leaf[0])?)));
        }

        if shape.data_type == DataType::String {
            let mut pos = 0;
            let leaves = take_leaves(&tokens, &mut pos, count.max(1))?;
            let strings = leaves
                .into_iter()
                .map(unquote)
                .collect::<CodecResult<Vec<_>>>()?;
            return Ok(Value::array(shape.dims.clone(), Payload::String(strings)));
        }

        let mut pos = 0;
        let leaves = take_leaves(&tokens, &mut pos, count)?;
        let payload = match shape.data_type {
            DataType::Char => Payload::Char(leaves.iter().map(|t| parse_scalar(t)).collect::<CodecResult<_>>()?),
            DataType::UChar => Payload::UChar(leaves.iter().map(|t| parse_scalar(t)).collect::<CodecResult<_>>()?),
            DataType::Int8 => Payload::Int8(leaves.iter().map(|t| parse_scalar(t)).collect::<CodecResult<_>>()?),
            DataType::UInt8 => Payload::UInt8(leaves.iter().map(|t| parse_scalar(t)).collect::<CodecResult<_>>()?),
            DataType::Short => Payload::Short(leaves.iter().map(|t| parse_scalar(t)).collect::<CodecResult<_>>()?),
            DataType::UShort => Payload::UShort(leaves.iter().map(|t| parse_scalar(t)).collect::<CodecResult<_>>()?),
            DataType::Int16 => Payload::Int16(leaves.iter().map(|t| parse_scalar(t)).collect::<CodecResult<_>>()?),
            DataType::UInt16 => Payload::UInt16(leaves.iter().map(|t| parse_scalar(t)).collect::<CodecResult<_>>()?),
            DataType::Bool => Payload::Bool(
                leaves
                    .iter()
                    .map(|t| parse_scalar::<i32>(t).map(|v| v != 0))
                    .collect::<CodecResult<_>>()?,
            ),
            DataType::Enum => Payload::Enum(leaves.iter().map(|t| parse_scalar(t)).collect::<CodecResult<_>>()?),
            DataType::Int32 => Payload::Int32(leaves.iter().map(|t| parse_scalar(t)).collect::<CodecResult<_>>()?),
            DataType::UInt32 => Payload::UInt32(leaves.iter().map(|t| parse_scalar(t)).collect::<CodecResult<_>>()?),
            DataType::Long => Payload::Long(leaves.iter().map(|t| parse_scalar(t)).collect::<CodecResult<_>>()?),
            DataType::ULong => Payload::ULong(leaves.iter().map(|t| parse_scalar(t)).collect::<CodecResult<_>>()?),
            DataType::Hex => Payload::Hex(
                leaves
                    .iter()
                    .map(|t| {
                        let trimmed = t.trim_start_matches("0x").trim_start_matches("0X");
                        u64::from_str_radix(trimmed, 16)
                            .map_err(|_| CodecError::Invalid(format!("cannot parse {:?} as hex", t)))
                    })
                    .collect::<CodecResult<_>>()?,
            ),
            DataType::Float => Payload::Float(leaves.iter().map(|t| parse_scalar(t)).collect::<CodecResult<_>>()?),
            DataType::Double => Payload::Double(leaves.iter().map(|t| parse_scalar(t)).collect::<CodecResult<_>>()?),
            DataType::Int64 => Payload::Int64(leaves.iter().map(|t| parse_scalar(t)).collect::<CodecResult<_>>()?),
            DataType::UInt64 => Payload::UInt64(leaves.iter().map(|t| parse_scalar(t)).collect::<CodecResult<_>>()?),
            DataType::String
            | DataType::Record
            | DataType::RecordType
            | DataType::Interface
            | DataType::RecordField => unreachable!("handled above"),
        };
        Ok(Value::array(shape.dims.clone(), payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_double_round_trip() {
        let value = Value::scalar(Payload::Double(vec![3.5]));
        let mut buf = [0u8; 32];
        let written = AsciiCodec.encode(&value, false, &mut buf).unwrap();
        let decoded = AsciiCodec
            .decode(&ValueShape::scalar(DataType::Double), false, &buf[..written])
            .unwrap();
        assert_eq!(decoded.payload, Payload::Double(vec![3.5]));
    }

    #[test]
    fn array_is_space_separated() {
        let value = Value::array(vec![3], Payload::Int32(vec![1, 2, 3]));
        let mut buf = [0u8; 32];
        let written = AsciiCodec.encode(&value, false, &mut buf).unwrap();
        assert_eq!(&buf[..written], b"1 2 3\0");
    }

    #[test]
    fn two_dimensional_array_is_bracketed() {
        let value = Value::array(vec![2, 2], Payload::Int32(vec![1, 2, 3, 4]));
        let mut buf = [0u8; 64];
        let written = AsciiCodec.encode(&value, false, &mut buf).unwrap();
        assert_eq!(&buf[..written], b"{ 1 2 } { 3 4 }\0");
        let decoded = AsciiCodec
            .decode(&ValueShape::array(DataType::Int32, vec![2, 2]), false, &buf[..written])
            .unwrap();
        assert_eq!(decoded.payload, Payload::Int32(vec![1, 2, 3, 4]));
    }

    #[test]
    fn string_round_trips_through_quoting() {
        let value = Value::scalar(Payload::String(vec!["has \"quotes\"".to_string()]));
        let mut buf = [0u8; 64];
        let written = AsciiCodec.encode(&value, false, &mut buf).unwrap();
        let decoded = AsciiCodec
            .decode(&ValueShape::scalar(DataType::String), false, &buf[..written])
            .unwrap();
        assert_eq!(decoded.payload, Payload::String(vec!["has \"quotes\"".to_string()]));
    }

    #[test]
    fn hex_round_trips() {
        let value = Value::scalar(Payload::Hex(vec![0xdead_beef]));
        let mut buf = [0u8; 32];
        let written = AsciiCodec.encode(&value, false, &mut buf).unwrap();
        let decoded = AsciiCodec
            .decode(&ValueShape::scalar(DataType::Hex), false, &buf[..written])
            .unwrap();
        assert_eq!(decoded.payload, Payload::Hex(vec![0xdead_beef]));
    }

    #[test]
    fn would_exceed_limit_reports_shortfall() {
        let value = Value::array(vec![3], Payload::Int32(vec![1, 2, 3]));
        let mut buf = [0u8; 3];
        let err = AsciiCodec.encode(&value, false, &mut buf).unwrap_err();
        assert_eq!(err, CodecError::WouldExceedLimit(3));
    }
}
