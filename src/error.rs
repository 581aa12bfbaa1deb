use std::fmt;
use std::io;
use std::net::AddrParseError;

/// Transport-level error kinds, carried unchanged across the wire when the
/// peer is the one reporting the failure (`spec.md` §7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    NullArgument,
    IllegalArgument,
    CorruptDataStructure,
    OutOfMemory,
    NetworkIo,
    NetworkConnectionLost,
    NetworkConnectionRefused,
    TimedOut,
    WouldExceedLimit,
    BadHandle,
    NotYetImplemented,
    Unsupported,
    RecordDisabledByUser,
    CallbackInProgress,
    TypeMismatch,
    UnparseableString,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NullArgument => "null argument",
            ErrorKind::IllegalArgument => "illegal argument",
            ErrorKind::CorruptDataStructure => "corrupt data structure",
            ErrorKind::OutOfMemory => "out of memory",
            ErrorKind::NetworkIo => "network io error",
            ErrorKind::NetworkConnectionLost => "network connection lost",
            ErrorKind::NetworkConnectionRefused => "network connection refused",
            ErrorKind::TimedOut => "timed out",
            ErrorKind::WouldExceedLimit => "would exceed limit",
            ErrorKind::BadHandle => "bad handle",
            ErrorKind::NotYetImplemented => "not yet implemented",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::RecordDisabledByUser => "record disabled by user",
            ErrorKind::CallbackInProgress => "callback in progress",
            ErrorKind::TypeMismatch => "type mismatch",
            ErrorKind::UnparseableString => "unparseable string",
        };
        f.write_str(name)
    }
}

/// A transport error: a kind plus the message string that would travel in
/// the body of an error reply (`spec.md` §7 - "the client propagates both
/// unchanged").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MxNetError {
    pub kind: ErrorKind,
    pub message: String,
}

impl MxNetError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> MxNetError {
        MxNetError {
            kind,
            message: message.into(),
        }
    }

    #[inline]
    pub fn is_would_exceed_limit(&self) -> bool {
        self.kind == ErrorKind::WouldExceedLimit
    }

    #[inline]
    pub fn is_not_yet_implemented(&self) -> bool {
        self.kind == ErrorKind::NotYetImplemented
    }

    #[inline]
    pub fn is_bad_handle(&self) -> bool {
        self.kind == ErrorKind::BadHandle
    }

    #[inline]
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::NetworkConnectionLost | ErrorKind::NetworkIo
        )
    }
}

/// Order fixes the numeric `STATUS_CODE` each kind travels as on the wire
/// (`spec.md` §7 - "STATUS_CODE carries the kind"). 0 is reserved for
/// success and never produced by `to_wire`.
const WIRE_KINDS: [ErrorKind; 16] = [
    ErrorKind::NullArgument,
    ErrorKind::IllegalArgument,
    ErrorKind::CorruptDataStructure,
    ErrorKind::OutOfMemory,
    ErrorKind::NetworkIo,
    ErrorKind::NetworkConnectionLost,
    ErrorKind::NetworkConnectionRefused,
    ErrorKind::TimedOut,
    ErrorKind::WouldExceedLimit,
    ErrorKind::BadHandle,
    ErrorKind::NotYetImplemented,
    ErrorKind::Unsupported,
    ErrorKind::RecordDisabledByUser,
    ErrorKind::CallbackInProgress,
    ErrorKind::TypeMismatch,
    ErrorKind::UnparseableString,
];

impl ErrorKind {
    pub fn to_wire(&self) -> u32 {
        WIRE_KINDS.iter().position(|k| k == self).unwrap() as u32 + 1
    }

    pub fn from_wire(code: u32) -> ErrorKind {
        WIRE_KINDS
            .get(code.wrapping_sub(1) as usize)
            .cloned()
            .unwrap_or(ErrorKind::NetworkIo)
    }
}

impl MxNetError {
    pub fn from_wire_status(code: u32, message: impl Into<String>) -> MxNetError {
        MxNetError::new(ErrorKind::from_wire(code), message)
    }
}

impl fmt::Display for MxNetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for MxNetError {}

impl From<io::Error> for MxNetError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        let message = io_error.to_string();
        let kind = match io_error.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorKind::TimedOut,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => ErrorKind::NetworkConnectionLost,
            io::ErrorKind::ConnectionRefused => ErrorKind::NetworkConnectionRefused,
            _ => ErrorKind::NetworkIo,
        };
        MxNetError::new(kind, message)
    }
}

impl From<AddrParseError> for MxNetError {
    #[inline]
    fn from(e: AddrParseError) -> Self {
        MxNetError::new(ErrorKind::IllegalArgument, e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MxNetError>;
