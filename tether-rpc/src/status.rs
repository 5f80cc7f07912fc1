//! Terminal call status

use crate::code::Code;
use crate::context::ContextError;
use serde::{Deserialize, Serialize};

/// One entry of a status' extensible details bag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detail {
    pub type_url: String,
    pub value: Vec<u8>,
}

impl Detail {
    /// Detail holding `value`, tagged with its type
    pub fn new(type_url: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            type_url: type_url.into(),
            value,
        }
    }
}

/// Outcome of a failed call as seen on the wire.
///
/// Its text is the plain message, so a status wrapped as an opaque cause
/// renders exactly what the server said. A status produced locally from a
/// done context keeps the [`ContextError`] as its source; one decoded from
/// the wire never has a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct Status {
    pub code: Code,
    pub message: String,
    #[serde(default)]
    pub details: Vec<Detail>,
    #[serde(skip)]
    #[source]
    reason: Option<ContextError>,
}

impl Status {
    /// Status with no details
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Vec::new(),
            reason: None,
        }
    }

    pub(crate) fn with_reason(mut self, reason: ContextError) -> Self {
        self.reason = Some(reason);
        self
    }

    /// The local context failure behind this status, if any
    pub fn reason(&self) -> Option<ContextError> {
        self.reason
    }

    /// Transport could not reach the server
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }

    /// Failure inside the transport or a crashed handler
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    /// Attach one more detail
    pub fn with_detail(mut self, detail: Detail) -> Self {
        self.details.push(detail);
        self
    }

    /// First detail with the given type
    pub fn detail(&self, type_url: &str) -> Option<&Detail> {
        self.details.iter().find(|d| d.type_url == type_url)
    }
}
