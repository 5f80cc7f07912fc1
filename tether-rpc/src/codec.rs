//! Error chain <-> status encoding
//!
//! A chain cannot travel as-is: the status only has a message and a bag of
//! details. The server flattens the chain into one detail, the client turns
//! a failed status back into a structured link.

use crate::code::Code;
use crate::status::{Detail, Status};
use serde::{Deserialize, Serialize};
use tether_error::{Cause, Error, Frame, KeyValue};

/// Detail type carrying a flattened chain
pub const CHAIN_TYPE_URL: &str = "tether.errors.v1.Chain";

/// Key under which transport-native failures record their category
pub const CODE_KEY: &str = "code";

/// Flattened chain as carried in a status detail
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub codes: Vec<String>,
    #[serde(default)]
    pub params: Vec<KeyValue>,
    #[serde(default)]
    pub stack: Vec<Frame>,
}

/// Why a status could not be turned back into a chain
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("no chain detail attached")]
    Missing,
    #[error("malformed chain detail: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl WireError {
    /// Flatten a chain: every code and param, the innermost stack, then
    /// `site` appended as the outermost server frame.
    pub fn from_error(err: &Error, site: Frame) -> Self {
        let mut stack = err
            .last_stack()
            .map(|link| link.stack().to_vec())
            .unwrap_or_default();
        stack.push(site);

        Self {
            message: err.to_string(),
            codes: err.codes().into_iter().map(String::from).collect(),
            params: err.key_values().into_iter().cloned().collect(),
            stack,
        }
    }
}

/// Encode a handler error into the terminal status of its call
pub fn encode(err: &Error, site: Frame) -> Status {
    let wire = WireError::from_error(err, site);
    let status = Status::new(Code::Unknown, wire.message.clone());

    match serde_json::to_vec(&wire) {
        Ok(value) => status.with_detail(Detail::new(CHAIN_TYPE_URL, value)),
        Err(e) => {
            tracing::warn!(error = %e, "dropping chain detail");
            status
        }
    }
}

/// Read the chain detail back out of a status
pub fn decode(status: &Status) -> Result<WireError, CodecError> {
    let detail = status.detail(CHAIN_TYPE_URL).ok_or(CodecError::Missing)?;
    Ok(serde_json::from_slice(&detail.value)?)
}

/// Rebuild a structured link from a failed status.
///
/// The link has an empty message and wraps the status itself, so its text
/// is exactly the server's. `client` frames (the client interceptor site
/// and its callers) are appended after the decoded server frames.
pub fn from_status(status: Status, client: Vec<Frame>) -> Error {
    match decode(&status) {
        Ok(wire) => {
            let mut stack = wire.stack;
            stack.extend(client);
            Error::bare("")
                .with_codes(wire.codes)
                .with_kvs(wire.params)
                .with_stack(stack)
                .with_cause(Cause::opaque(status))
        }
        Err(CodecError::Missing) => {
            // never reached a handler: classify by the transport category
            let code = status.code;
            Error::bare("")
                .with_code(status.message.clone())
                .with_kv(CODE_KEY, code)
                .with_stack(client)
                .with_cause(Cause::opaque(status))
        }
        Err(e) => {
            tracing::debug!(error = %e, "status detail ignored");
            Error::bare("").with_cause(Cause::opaque(status))
        }
    }
}
