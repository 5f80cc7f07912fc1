//! # tether-log
//!
//! Structured log entries for tether errors.
//!
//! Everything goes through one process-wide [`Logger`]. The default
//! [`TracingLogger`] forwards entries as `tracing` events; tests install a
//! recording logger with [`set_logger_for_testing`].
//!
//! ```rust
//! use tether_error::Error;
//!
//! tether_log::info("performing a hop", [("hops", "3")]);
//! tether_log::error(&Error::new("hop failed").with_kv("hops", 3));
//! ```

mod entry;
mod logger;

pub use entry::{Entry, Level};
pub use logger::{logger, set_logger, set_logger_for_testing, Logger, LoggerGuard, TracingLogger};

use tether_error::{Error, KeyValue};

/// Emit an info entry
pub fn info<I>(message: impl Into<String>, kvs: I)
where
    I: IntoIterator,
    I::Item: Into<KeyValue>,
{
    emit(&Entry::new(Level::Info, message).with_parameters(kvs));
}

/// Emit an error entry for a structured error.
///
/// The entry message is the plain chain text, the parameters are the
/// outermost link's key/values.
pub fn error(err: &Error) {
    emit(&Entry::from_error(err));
}

/// Emit an error entry carrying extra key/values after the error's own,
/// e.g. those attached to the call's context.
pub fn error_with<I>(err: &Error, kvs: I)
where
    I: IntoIterator,
    I::Item: Into<KeyValue>,
{
    emit(&Entry::from_error(err).with_parameters(kvs));
}

/// Hand an entry to the installed logger
pub fn emit(entry: &Entry) {
    logger().emit(entry);
}
