//! Structured logging for the runtime's own diagnostics (stale replies,
//! renegotiation, reconnects). Not a product feature of the core - the
//! Non-goals exclude a logging *subsystem* - but the ambient diagnostics
//! themselves still go through `slog` the way the rest of this codebase
//! does, rather than `eprintln!`.

pub use slog::{debug, info, o, warn, Logger};
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

/// Builds a terminal logger at the given severity. Used by hosts that embed
/// this crate and don't already have a `slog::Logger` of their own to pass
/// in via [`crate::connection::ConnectOptions::logger`].
pub fn default_logger(level: Severity) -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(level);
    builder.destination(Destination::Stderr);
    builder
        .build()
        .expect("terminal logger configuration is always valid")
}

/// A logger that discards everything, used in tests and whenever the host
/// application has not supplied its own.
pub fn discard() -> Logger {
    Logger::root(slog::Discard, o!())
}
