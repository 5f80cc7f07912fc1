//! Call context: cancellation and deadline
//!
//! A `Context` travels with every call. Derived contexts share the parent's
//! cancellation, can only tighten its deadline and inherit its key/values.

use crate::code::Code;
use crate::status::Status;
use std::fmt;
use std::time::Duration;
use tether_error::{Error, KeyValue};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Text of a canceled call
pub const CANCELED_MESSAGE: &str = "context canceled";
/// Text of a call whose deadline elapsed
pub const DEADLINE_MESSAGE: &str = "context deadline exceeded";

/// Why a context is done
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

impl ContextError {
    /// Transport category reported for this failure
    pub fn code(&self) -> Code {
        match self {
            ContextError::Canceled => Code::Canceled,
            ContextError::DeadlineExceeded => Code::DeadlineExceeded,
        }
    }

    /// Status of a call ended by this failure, keeping `self` as its source
    pub fn to_status(self) -> Status {
        Status::new(self.code(), self.to_string()).with_reason(self)
    }
}

impl From<ContextError> for Status {
    fn from(err: ContextError) -> Self {
        err.to_status()
    }
}

/// Reference error matching any canceled call
pub fn canceled() -> Error {
    Error::bare(CANCELED_MESSAGE).with_code(CANCELED_MESSAGE)
}

/// Reference error matching any call that ran out of time
pub fn deadline_exceeded() -> Error {
    Error::bare(DEADLINE_MESSAGE).with_code(DEADLINE_MESSAGE)
}

/// Cancellation, deadline and key/values of a call
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
    kvs: Vec<KeyValue>,
}

impl Context {
    /// Root context: never canceled, no deadline
    pub fn background() -> Self {
        Self::default()
    }

    /// Child context that can be canceled on its own
    pub fn with_cancel(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            kvs: self.kvs.clone(),
        }
    }

    /// Child context expiring `timeout` from now, or earlier if the parent does
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Child context with the earlier of both deadlines
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
            kvs: self.kvs.clone(),
        }
    }

    /// Context carrying one more key/value.
    ///
    /// Key/values reach the handlers of every call made with the context and
    /// are logged alongside any error those handlers return. Keys are not
    /// validated. They never become codes or params of the error itself.
    /// The result shares this context's cancellation.
    pub fn with_kv(&self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        let mut ctx = self.clone();
        ctx.kvs.push(KeyValue::new(key, value));
        ctx
    }

    /// Key/values attached so far, oldest first
    pub fn key_values(&self) -> &[KeyValue] {
        &self.kvs
    }

    /// Cancel this context and everything derived from it
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// When the context expires, if ever
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Why the context is done, if it is
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is canceled or its deadline passes
    pub async fn done(&self) -> ContextError {
        let deadline = self.deadline;
        tokio::select! {
            biased;
            _ = self.token.cancelled() => ContextError::Canceled,
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                ContextError::DeadlineExceeded
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_is_live() {
        let ctx = Context::background();
        assert!(ctx.err().is_none());
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn test_cancel_propagates_to_children() {
        let parent = Context::background().with_cancel();
        let child = parent.with_cancel();
        parent.cancel();
        assert_eq!(child.err(), Some(ContextError::Canceled));

        let parent = Context::background().with_cancel();
        let child = parent.with_cancel();
        child.cancel();
        assert!(parent.err().is_none());
    }

    #[tokio::test]
    async fn test_deadline_only_tightens() {
        let ctx = Context::background().with_timeout(Duration::from_millis(10));
        let child = ctx.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), ctx.deadline());
    }

    #[tokio::test]
    async fn test_done_on_deadline() {
        let ctx = Context::background().with_timeout(Duration::from_millis(1));
        assert_eq!(ctx.done().await, ContextError::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_done_on_cancel() {
        let ctx = Context::background().with_cancel();
        let waiter = ctx.clone();
        let handle = tokio::spawn(async move { waiter.done().await });
        ctx.cancel();
        assert_eq!(handle.await.unwrap(), ContextError::Canceled);
    }

    #[test]
    fn test_key_values_are_inherited() {
        let parent = Context::background().with_kv("request", "r1");
        let child = parent
            .with_cancel()
            .with_timeout(Duration::from_secs(60))
            .with_kv("09%-_MANYproblems", "hello");

        assert_eq!(parent.key_values(), &[KeyValue::new("request", "r1")]);
        assert_eq!(
            child.key_values(),
            &[
                KeyValue::new("request", "r1"),
                KeyValue::new("09%-_MANYproblems", "hello")
            ]
        );

        // same cancellation as the parent
        parent.cancel();
        assert_eq!(child.err(), Some(ContextError::Canceled));
    }

    #[test]
    fn test_reference_errors() {
        assert_eq!(canceled().to_string(), "context canceled");
        assert_eq!(deadline_exceeded().codes(), vec![DEADLINE_MESSAGE]);
        assert_eq!(ContextError::Canceled.to_status().code, Code::Canceled);
    }
}
