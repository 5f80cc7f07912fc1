//! Canonical transport status categories

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a terminal call status.
///
/// The names are stable: the client interceptor records them under the
/// `code` key of transport-native failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Code {
    Ok,

    // =========================================================================
    // Caller side
    // =========================================================================
    /// The caller canceled the call
    Canceled,

    /// The call's deadline elapsed before it completed
    DeadlineExceeded,

    /// The request could not be decoded
    InvalidArgument,

    // =========================================================================
    // Handler side
    // =========================================================================
    /// Handler failed; structured errors travel under this code
    Unknown,

    NotFound,

    AlreadyExists,

    PermissionDenied,

    ResourceExhausted,

    FailedPrecondition,

    Aborted,

    OutOfRange,

    /// No handler registered for the method
    Unimplemented,

    Internal,

    DataLoss,

    Unauthenticated,

    // =========================================================================
    // Transport
    // =========================================================================
    /// The peer is not serving
    Unavailable,
}

impl Code {
    /// Stable name of the category
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Ok => "OK",
            Code::Canceled => "Canceled",
            Code::DeadlineExceeded => "DeadlineExceeded",
            Code::InvalidArgument => "InvalidArgument",
            Code::Unknown => "Unknown",
            Code::NotFound => "NotFound",
            Code::AlreadyExists => "AlreadyExists",
            Code::PermissionDenied => "PermissionDenied",
            Code::ResourceExhausted => "ResourceExhausted",
            Code::FailedPrecondition => "FailedPrecondition",
            Code::Aborted => "Aborted",
            Code::OutOfRange => "OutOfRange",
            Code::Unimplemented => "Unimplemented",
            Code::Internal => "Internal",
            Code::DataLoss => "DataLoss",
            Code::Unauthenticated => "Unauthenticated",
            Code::Unavailable => "Unavailable",
        }
    }

    /// Failures raised by the transport itself rather than a handler
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Code::Canceled | Code::DeadlineExceeded | Code::Unavailable
        )
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
