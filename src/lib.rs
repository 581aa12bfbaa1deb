//! Client runtime for the MX beamline instrumentation network protocol:
//! a length-prefixed, message-typed RPC and callback transport over TCP
//! or Unix-domain sockets.
//!
//! [`connection::Server`] owns one connection and brings it up, tears it
//! down, and reconnects it transparently; [`field::NetworkField`] is the
//! per-field handle callers interact with day to day.

pub mod address;
pub mod buffer;
pub mod callback;
pub mod codec;
pub mod connection;
pub mod error;
pub mod field;
pub mod handle_cache;
pub mod header;
pub mod logging;
pub mod message_id;
pub mod request;
pub mod transport;
pub mod value;

pub use address::{Endpoint, NetworkAddress, ResolveDefaults, ServerDirectory};
pub use callback::{Callback, CallbackHandler, CallbackKind};
pub use connection::{ConnectOptions, ConnectionStatus, RequestedFormat, Server};
pub use error::{ErrorKind, MxNetError, Result};
pub use field::NetworkField;
pub use handle_cache::NetworkHandle;
pub use value::{DataType, Payload, Value};
