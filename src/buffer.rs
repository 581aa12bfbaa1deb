//! Message Buffer (C1, `spec.md` §4.1).
//!
//! Grounded on the teacher's `net::buffer::Buffer` / `networking::chunk::Chunk`
//! pair: those types implement a chunked, double-ended FIFO byte queue for a
//! continuously streamed game protocol. The MX wire protocol instead holds
//! exactly one message at a time and grows on demand mid-RPC, so the FIFO
//! chunking does not fit; what *does* carry over is the grow-never-shrink
//! discipline and the "caller re-reads pointers after any grow" contract.

use crate::value::DataType;

/// Minimum buffer capacity (`spec.md` §3: "≥1 KiB").
pub const MIN_BUFFER_LENGTH: usize = 1024;

/// Wire data format negotiated for a [`crate::connection::Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Ascii,
    Raw,
    Xdr,
}

impl DataFormat {
    pub fn wire_tag(self) -> u32 {
        match self {
            DataFormat::Ascii => 1,
            DataFormat::Raw => 2,
            DataFormat::Xdr => 3,
        }
    }

    pub fn from_wire(tag: u32) -> Option<DataFormat> {
        match tag {
            1 => Some(DataFormat::Ascii),
            2 => Some(DataFormat::Raw),
            3 => Some(DataFormat::Xdr),
            _ => None,
        }
    }
}

/// A growable byte buffer holding exactly one message, bound to its owning
/// [`crate::connection::Server`] (`spec.md` §4.1 - "specifying both [a
/// server and a socket handler] is a programming error"; this client-only
/// runtime has no socket-handler side, so the buffer is unconditionally
/// Server-exclusive).
pub struct MessageBuffer {
    data: Vec<u8>,
    format: DataFormat,
}

impl MessageBuffer {
    /// `allocate` (`spec.md` §4.1): returns a buffer sized
    /// `max(initial_length, MIN_BUFFER_LENGTH)`, zeroed, format ASCII.
    pub fn allocate(initial_length: usize) -> MessageBuffer {
        let length = initial_length.max(MIN_BUFFER_LENGTH);
        MessageBuffer {
            data: vec![0u8; length],
            format: DataFormat::Ascii,
        }
    }

    /// `reallocate` (`spec.md` §4.1): grows the buffer, preserving its
    /// prefix and zeroing the new tail. Never shrinks.
    pub fn reallocate(&mut self, new_length: usize) {
        let new_length = new_length.max(MIN_BUFFER_LENGTH);
        if new_length > self.data.len() {
            self.data.resize(new_length, 0);
        }
    }

    /// Grows the buffer if it is smaller than `required`, leaving it
    /// untouched otherwise.
    #[inline]
    pub fn ensure_capacity(&mut self, required: usize) {
        if self.data.len() < required {
            self.reallocate(required);
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn format(&self) -> DataFormat {
        self.format
    }

    #[inline]
    pub fn set_format(&mut self, format: DataFormat) {
        self.format = format;
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Byte slice of exactly `len` bytes, growing first if necessary.
    pub fn slice_mut(&mut self, len: usize) -> &mut [u8] {
        self.ensure_capacity(len);
        &mut self.data[..len]
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        MessageBuffer::allocate(MIN_BUFFER_LENGTH)
    }
}

/// Body-buffer sizing helper shared by the Value Codec (`spec.md` §4.4): a
/// best-effort upper bound used to pre-size a [`MessageBuffer`] before the
/// first encode attempt, to cut down on grow-and-retry cycles in the common
/// case. Always allowed to undershoot; the codec's `WouldExceedLimit`
/// feedback loop (see `crate::codec`) makes the actual size authoritative.
pub fn estimate_body_size(data_type: DataType, element_count: usize, use_64bit_longs: bool) -> usize {
    let element_size = data_type.wire_element_size(use_64bit_longs);
    // +4 for an XDR array length prefix, +3 for alignment padding; harmless
    // slack for ASCII/RAW encodings which don't need it.
    element_count.saturating_mul(element_size) + 8
}
