//! Unary and streaming interceptors for both sides of a call
//!
//! Server side: a handler's `Error` becomes the call's terminal `Status`.
//! Client side: a failed `Status` (or a canceled/expired context) becomes an
//! `Error` whose stack spans the server handler, both interceptors and the
//! local caller.
//!
//! The client entry points are plain functions returning futures so the
//! caller's stack is captured synchronously, before the first poll.

use crate::codec;
use crate::context::Context;
use crate::status::Status;
use futures_core::Stream;
use futures_util::StreamExt;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use tether_error::{trace, Cause, Error, Frame};
use tokio::sync::mpsc;

const PACKAGE: &str = module_path!();

/// Code of the error returned when sending on a stream the client left
pub const STREAM_CLOSED: &str = "stream closed";

/// Items exchanged on an in-flight stream
pub(crate) type StreamItem = Result<serde_json::Value, Status>;

// =============================================================================
// Server side
// =============================================================================

/// Run a unary handler, encoding its error into the call status.
///
/// The error is logged with the context's key/values.
pub async fn unary_server<T, F, Fut>(ctx: Context, handler: F) -> Result<T, Status>
where
    F: FnOnce(Context) -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let kvs = ctx.key_values().to_vec();
    match handler(ctx).await {
        Ok(resp) => Ok(resp),
        Err(err) => {
            tether_log::error_with(&err, kvs);
            Err(codec::encode(&err, Frame::here(PACKAGE, "unary_server")))
        }
    }
}

/// Run a streaming handler. On error the encoded status is sent as the
/// stream's terminal item, unless the stream is already gone.
pub async fn stream_server<T, F, Fut>(ctx: Context, sink: ServerStream<T>, handler: F)
where
    F: FnOnce(Context, ServerStream<T>) -> Fut,
    Fut: Future<Output = Result<(), Error>>,
{
    let tx = sink.tx.clone();
    let err = match handler(ctx.clone(), sink).await {
        Ok(()) => return,
        Err(err) => err,
    };

    tether_log::error_with(&err, ctx.key_values().iter().cloned());
    if tx.is_closed() || ctx.err().is_some() {
        tracing::debug!(error = %err, "stream closed before terminal status");
        return;
    }

    let status = codec::encode(&err, Frame::here(PACKAGE, "stream_server"));
    if tx.send(Err(status)).await.is_err() {
        tracing::debug!("client left before terminal status");
    }
}

/// Sending half of a server stream
pub struct ServerStream<T> {
    ctx: Context,
    tx: mpsc::Sender<StreamItem>,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T: Serialize> ServerStream<T> {
    pub(crate) fn new(ctx: Context, tx: mpsc::Sender<StreamItem>) -> Self {
        Self {
            ctx,
            tx,
            _marker: std::marker::PhantomData,
        }
    }

    /// Send one message, waiting for buffer space.
    ///
    /// Fails once the client is gone or the call's context is done.
    pub async fn send(&self, msg: &T) -> Result<(), Error> {
        let value = serde_json::to_value(msg)
            .map_err(|e| Error::wrap(Cause::opaque(e), "encode stream message"))?;

        tokio::select! {
            biased;
            reason = self.ctx.done() => Err(Error::wrap(Cause::opaque(reason), "send")),
            sent = self.tx.send(Ok(value)) => sent.map_err(|_| {
                Error::new(STREAM_CLOSED).with_code(STREAM_CLOSED)
            }),
        }
    }

    /// Whether the client has dropped its end
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// =============================================================================
// Client side
// =============================================================================

/// Wrap a unary invocation.
///
/// Fails fast when `ctx` is already done, otherwise races the call against
/// cancellation and the deadline.
#[inline(never)]
pub fn unary_client<T, F, Fut>(ctx: &Context, invoker: F) -> impl Future<Output = Result<T, Error>>
where
    F: FnOnce(Context) -> Fut,
    Fut: Future<Output = Result<T, Status>>,
{
    let mut client = vec![Frame::here(PACKAGE, "unary_client")];
    client.extend(trace::capture(1));
    let ctx = ctx.clone();

    async move {
        if let Some(reason) = ctx.err() {
            return Err(codec::from_status(reason.to_status(), client));
        }

        let result = tokio::select! {
            biased;
            reason = ctx.done() => Err(reason.to_status()),
            result = invoker(ctx.clone()) => result,
        };

        result.map_err(|status| {
            tracing::debug!(code = %status.code, message = %status.message, "call failed");
            codec::from_status(status, client)
        })
    }
}

/// Wrap the receiving half of a server stream
#[inline(never)]
pub fn stream_client<T, S>(ctx: &Context, inner: S) -> ClientStream<T>
where
    S: Stream<Item = Result<T, Status>> + Send + 'static,
{
    let mut client = vec![Frame::here(PACKAGE, "stream_client")];
    client.extend(trace::capture(1));

    ClientStream {
        ctx: ctx.clone(),
        inner: Box::pin(inner),
        client,
        finished: false,
    }
}

/// Receiving half of a server stream.
///
/// Yields messages, then at most one terminal error, then `None` forever.
pub struct ClientStream<T> {
    ctx: Context,
    inner: Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>,
    client: Vec<Frame>,
    finished: bool,
}

impl<T> ClientStream<T> {
    /// Next message, `Ok(None)` once the stream has ended
    pub async fn recv(&mut self) -> Result<Option<T>, Error> {
        if self.finished {
            return Ok(None);
        }

        let item = tokio::select! {
            biased;
            reason = self.ctx.done() => Some(Err(reason.to_status())),
            item = self.inner.next() => item,
        };

        match item {
            Some(Ok(msg)) => Ok(Some(msg)),
            Some(Err(status)) => {
                self.finished = true;
                Err(codec::from_status(status, self.client.clone()))
            }
            None => {
                self.finished = true;
                Ok(None)
            }
        }
    }

    /// Drain the stream, returning the messages and the terminal error
    pub async fn collect(mut self) -> (Vec<T>, Option<Error>) {
        let mut msgs = Vec::new();
        loop {
            match self.recv().await {
                Ok(Some(msg)) => msgs.push(msg),
                Ok(None) => return (msgs, None),
                Err(err) => return (msgs, Some(err)),
            }
        }
    }
}
