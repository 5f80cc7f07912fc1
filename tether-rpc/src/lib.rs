//! # tether-rpc
//!
//! Carries tether error chains across a call boundary.
//!
//! ## Core Concepts
//! - **Status**: terminal outcome of a call, a `Code`, a message and a bag of details
//! - **Codec**: flattens a chain into a status detail and rebuilds it on the client
//! - **Interceptors**: unary and streaming hooks for both sides of a call
//! - **Context**: cancellation and deadline, surfaced as matchable errors
//! - **Transport**: an in-process server/channel pair running the interceptors
//!
//! ```rust,no_run
//! use tether_error::Error;
//! use tether_rpc::{Context, Server};
//!
//! # async fn run() {
//! let server = Server::new();
//! server.add_unary("lookup", |_, id: u64| async move {
//!     Err::<(), _>(Error::new("user not found").with_code("not_found").with_kv("id", id))
//! });
//!
//! let err = server
//!     .channel()
//!     .unary::<_, ()>(&Context::background(), "lookup", &7u64)
//!     .await
//!     .unwrap_err();
//! assert!(err.is(&Error::bare("reference").with_code("not_found")));
//! # }
//! ```

pub mod code;
pub mod codec;
pub mod context;
pub mod interceptor;
pub mod status;
pub mod transport;

pub use code::Code;
pub use codec::{decode, encode, from_status, CodecError, WireError, CHAIN_TYPE_URL, CODE_KEY};
pub use context::{
    canceled, deadline_exceeded, Context, ContextError, CANCELED_MESSAGE, DEADLINE_MESSAGE,
};
pub use interceptor::{
    stream_client, stream_server, unary_client, unary_server, ClientStream, ServerStream,
    STREAM_CLOSED,
};
pub use status::{Detail, Status};
pub use transport::{Channel, Server};
