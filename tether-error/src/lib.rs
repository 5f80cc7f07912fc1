//! # tether-error
//!
//! Structured error chains that keep their meaning across wrapping layers
//! and process boundaries.
//!
//! ## Design Philosophy
//!
//! - **Message**: each link adds its own words; text is `outer: inner: root`
//! - **Codes**: stable classification tokens, the key for matching
//! - **Key/values**: ordered diagnostics per link
//! - **Stack**: call sites captured when a link is created or wrapped
//!
//! ## Usage
//!
//! ```rust
//! use tether_error::{is, Error};
//!
//! fn lookup(id: u64) -> Result<(), Error> {
//!     Err(Error::new("user not found")
//!         .with_code("not_found")
//!         .with_kv("user_id", id))
//! }
//!
//! let err = lookup(7)
//!     .map_err(|e| Error::wrap(e, "load profile"))
//!     .unwrap_err();
//!
//! let not_found = Error::new("not found").with_code("not_found");
//! assert!(is(&err, &not_found));
//! assert_eq!(err.codes(), vec!["not_found"]);
//! ```
//!
//! ## Principles
//!
//! - Links are immutable once built; wrapping makes a new outer link
//! - Match on codes, not on message text
//! - Foreign errors are wrapped as opaque causes, never converted silently
//! - Trace configuration is set once per process, overridden only in tests

mod error;
mod kv;
pub mod matching;
pub mod trace;

pub use error::{Cause, Error, Links};
pub use kv::KeyValue;
pub use matching::{
    is, is_ref, legacy_callback_for_testing, set_legacy_callback, ErrorRef, LegacyCallback,
    LegacyCallbackGuard,
};
pub use trace::{
    set_trace_config, set_trace_config_testing, Frame, StackCapturer, TraceConfig,
    TraceConfigError, TraceConfigGuard,
};

/// Result type alias using tether Error
pub type Result<T> = std::result::Result<T, Error>;
