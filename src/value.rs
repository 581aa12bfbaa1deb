//! The typed, possibly multi-dimensional record field value (`spec.md` §3,
//! `Value`) and the wire data-type tags (`spec.md` §6).

use crate::error::{ErrorKind, MxNetError, Result};

/// Wire data-type tag. Values match the numbering in `spec.md` §6 exactly;
/// a peer that sends an unrecognized tag is a protocol violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DataType {
    String = 1,
    Char = 2,
    UChar = 3,
    Short = 4,
    UShort = 5,
    Bool = 6,
    Enum = 7,
    Long = 8,
    ULong = 9,
    Float = 10,
    Double = 11,
    Hex = 12,
    Int64 = 14,
    UInt64 = 15,
    Int8 = 16,
    UInt8 = 17,
    Int16 = 18,
    UInt16 = 19,
    Int32 = 20,
    UInt32 = 21,
    Record = 31,
    RecordType = 32,
    Interface = 33,
    RecordField = 34,
}

impl DataType {
    pub fn from_wire(tag: u32) -> Result<DataType> {
        Ok(match tag {
            0 => return Err(MxNetError::new(ErrorKind::TypeMismatch, "absent data type")),
            1 => DataType::String,
            2 => DataType::Char,
            3 => DataType::UChar,
            4 => DataType::Short,
            5 => DataType::UShort,
            6 => DataType::Bool,
            7 => DataType::Enum,
            8 => DataType::Long,
            9 => DataType::ULong,
            10 => DataType::Float,
            11 => DataType::Double,
            12 => DataType::Hex,
            14 => DataType::Int64,
            15 => DataType::UInt64,
            16 => DataType::Int8,
            17 => DataType::UInt8,
            18 => DataType::Int16,
            19 => DataType::UInt16,
            20 => DataType::Int32,
            21 => DataType::UInt32,
            31 => DataType::Record,
            32 => DataType::RecordType,
            33 => DataType::Interface,
            34 => DataType::RecordField,
            other => {
                return Err(MxNetError::new(
                    ErrorKind::TypeMismatch,
                    format!("unrecognized data type tag {}", other),
                ))
            }
        })
    }

    #[inline]
    pub fn wire_tag(self) -> u32 {
        self as u32
    }

    /// Name-string types (`spec.md` §6: "Tags 31-34 are name strings on the
    /// wire regardless of data-format").
    #[inline]
    pub fn is_name_type(self) -> bool {
        matches!(
            self,
            DataType::Record | DataType::RecordType | DataType::Interface | DataType::RecordField
        )
    }

    /// Platform-dependent width types affected by `use_64bit_network_longs`
    /// (`spec.md` §4.4 "Numeric remapping").
    #[inline]
    pub fn is_platform_long(self) -> bool {
        matches!(self, DataType::Long | DataType::ULong | DataType::Hex)
    }

    /// Fixed element size in bytes for RAW/XDR encoding, independent of the
    /// 64-bit-long negotiation (platform-long types resolve through
    /// [`DataType::wire_element_size`] instead).
    pub fn native_element_size(self) -> usize {
        match self {
            DataType::Char | DataType::UChar | DataType::Int8 | DataType::UInt8 | DataType::Bool => 1,
            DataType::Short | DataType::UShort | DataType::Int16 | DataType::UInt16 => 2,
            DataType::Enum | DataType::Int32 | DataType::UInt32 | DataType::Float => 4,
            DataType::Double | DataType::Int64 | DataType::UInt64 => 8,
            DataType::Long | DataType::ULong | DataType::Hex => 4,
            DataType::String | DataType::Record | DataType::RecordType | DataType::Interface | DataType::RecordField => 1,
        }
    }

    /// Element size actually placed on the wire, taking the negotiated
    /// long-width into account (`spec.md` §4.4).
    pub fn wire_element_size(self, use_64bit_longs: bool) -> usize {
        if self.is_platform_long() {
            if use_64bit_longs {
                8
            } else {
                4
            }
        } else {
            self.native_element_size()
        }
    }
}

/// The homogeneous array payload carried by a [`Value`]. One variant per
/// `DataType`; the element count is the product of [`Value::dims`] (or 1
/// for a scalar).
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    String(Vec<String>),
    Char(Vec<i8>),
    UChar(Vec<u8>),
    Short(Vec<i16>),
    UShort(Vec<u16>),
    Bool(Vec<bool>),
    Enum(Vec<i32>),
    Long(Vec<i64>),
    ULong(Vec<u64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Hex(Vec<u64>),
    Int64(Vec<i64>),
    UInt64(Vec<u64>),
    Int8(Vec<i8>),
    UInt8(Vec<u8>),
    Int16(Vec<i16>),
    UInt16(Vec<u16>),
    Int32(Vec<i32>),
    UInt32(Vec<u32>),
    /// RECORD / RECORDTYPE / INTERFACE / RECORD_FIELD - name strings
    /// regardless of data format (`spec.md` §6).
    Name(String),
}

impl Payload {
    pub fn data_type(&self) -> DataType {
        match self {
            Payload::String(_) => DataType::String,
            Payload::Char(_) => DataType::Char,
            Payload::UChar(_) => DataType::UChar,
            Payload::Short(_) => DataType::Short,
            Payload::UShort(_) => DataType::UShort,
            Payload::Bool(_) => DataType::Bool,
            Payload::Enum(_) => DataType::Enum,
            Payload::Long(_) => DataType::Long,
            Payload::ULong(_) => DataType::ULong,
            Payload::Float(_) => DataType::Float,
            Payload::Double(_) => DataType::Double,
            Payload::Hex(_) => DataType::Hex,
            Payload::Int64(_) => DataType::Int64,
            Payload::UInt64(_) => DataType::UInt64,
            Payload::Int8(_) => DataType::Int8,
            Payload::UInt8(_) => DataType::UInt8,
            Payload::Int16(_) => DataType::Int16,
            Payload::UInt16(_) => DataType::UInt16,
            Payload::Int32(_) => DataType::Int32,
            Payload::UInt32(_) => DataType::UInt32,
            Payload::Name(_) => DataType::Record,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Payload::String(v) => v.len(),
            Payload::Char(v) => v.len(),
            Payload::UChar(v) => v.len(),
            Payload::Short(v) => v.len(),
            Payload::UShort(v) => v.len(),
            Payload::Bool(v) => v.len(),
            Payload::Enum(v) => v.len(),
            Payload::Long(v) => v.len(),
            Payload::ULong(v) => v.len(),
            Payload::Float(v) => v.len(),
            Payload::Double(v) => v.len(),
            Payload::Hex(v) => v.len(),
            Payload::Int64(v) => v.len(),
            Payload::UInt64(v) => v.len(),
            Payload::Int8(v) => v.len(),
            Payload::UInt8(v) => v.len(),
            Payload::Int16(v) => v.len(),
            Payload::UInt16(v) => v.len(),
            Payload::Int32(v) => v.len(),
            Payload::UInt32(v) => v.len(),
            Payload::Name(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A typed, possibly multi-dimensional record field value (`spec.md` §3).
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    /// Dimension sizes. Empty means scalar (`num_dims == 0`).
    pub dims: Vec<usize>,
    pub payload: Payload,
}

impl Value {
    pub fn scalar(payload: Payload) -> Value {
        Value {
            dims: Vec::new(),
            payload,
        }
    }

    pub fn array(dims: Vec<usize>, payload: Payload) -> Value {
        Value { dims, payload }
    }

    #[inline]
    pub fn num_dims(&self) -> usize {
        self.dims.len()
    }

    #[inline]
    pub fn data_type(&self) -> DataType {
        self.payload.data_type()
    }

    #[inline]
    pub fn element_count(&self) -> usize {
        self.payload.len()
    }
}
