//! Value Codec (C4, `spec.md` §4.4): three mutually exclusive wire formats
//! behind one typed encode/decode surface, following the sum-type-over-
//! formats strategy of `spec.md` §9.

pub mod ascii;
pub mod raw;
pub mod xdr;

use crate::buffer::DataFormat;
use crate::value::{DataType, Value};

/// Codec-local error: either a hard failure, or the buffer-growth signal
/// the Request Engine's retry loop drives (`spec.md` §4.4 "Error policy").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The target buffer cannot hold the payload; carries the number of
    /// additional bytes needed.
    WouldExceedLimit(usize),
    /// Not enough bytes were present to decode a complete value.
    Truncated,
    /// The bytes present do not parse as the requested datatype.
    Invalid(String),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::WouldExceedLimit(n) => write!(f, "would exceed limit by {} bytes", n),
            CodecError::Truncated => write!(f, "truncated payload"),
            CodecError::Invalid(msg) => write!(f, "invalid payload: {}", msg),
        }
    }
}

impl std::error::Error for CodecError {}

pub type CodecResult<T> = Result<T, CodecError>;

/// Shape of the value being decoded: the peer's `DATA_TYPE` word plus the
/// dimension sizes obtained separately (typically via `get_field_type`).
#[derive(Debug, Clone)]
pub struct ValueShape {
    pub data_type: DataType,
    pub dims: Vec<usize>,
}

impl ValueShape {
    pub fn scalar(data_type: DataType) -> ValueShape {
        ValueShape {
            data_type,
            dims: Vec::new(),
        }
    }

    pub fn array(data_type: DataType, dims: Vec<usize>) -> ValueShape {
        ValueShape { data_type, dims }
    }

    pub fn element_count(&self) -> usize {
        if self.dims.is_empty() {
            1
        } else {
            self.dims.iter().product()
        }
    }
}

/// One of the three wire encoders/decoders (`spec.md` §9: "a sum type over
/// `{Ascii, Raw, Xdr}`... each case implements the same encode/decode
/// trait").
pub trait ValueCodec {
    /// Encodes `value` into `out`, returning the number of bytes written.
    /// Returns `CodecError::WouldExceedLimit(n)` if `out` is `n` bytes too
    /// small; the caller grows the buffer by `n` and retries
    /// (`spec.md` §4.4, §4.8).
    fn encode(&self, value: &Value, use_64bit_longs: bool, out: &mut [u8]) -> CodecResult<usize>;

    /// Decodes a value of `shape` out of `input`.
    fn decode(&self, shape: &ValueShape, use_64bit_longs: bool, input: &[u8]) -> CodecResult<Value>;
}

/// Returns the codec implementation for a negotiated [`DataFormat`].
pub fn codec_for(format: DataFormat) -> &'static dyn ValueCodec {
    match format {
        DataFormat::Ascii => &ascii::AsciiCodec,
        DataFormat::Raw => &raw::RawCodec,
        DataFormat::Xdr => &xdr::XdrCodec,
    }
}

/// Bounded retry count for the buffer-growth loop (`spec.md` §4.4, §4.8).
pub const MAX_GROW_RETRIES: usize = 10;

/// Runs `encode_once` against `buffer`, growing it by exactly the reported
/// shortfall and retrying up to [`MAX_GROW_RETRIES`] times
/// (`spec.md` §4.8 "Buffer growth loop").
pub fn encode_with_growth<F>(
    buffer: &mut crate::buffer::MessageBuffer,
    start_offset: usize,
    mut encode_once: F,
) -> CodecResult<usize>
where
    F: FnMut(&mut [u8]) -> CodecResult<usize>,
{
    let mut attempts = 0;
    loop {
        let len = buffer.capacity();
        let slice = &mut buffer.as_bytes_mut()[start_offset..len];
        match encode_once(slice) {
            Ok(written) => return Ok(written),
            Err(CodecError::WouldExceedLimit(shortfall)) => {
                attempts += 1;
                if attempts > MAX_GROW_RETRIES {
                    return Err(CodecError::WouldExceedLimit(shortfall));
                }
                buffer.reallocate(len + shortfall);
            }
            Err(other) => return Err(other),
        }
    }
}
