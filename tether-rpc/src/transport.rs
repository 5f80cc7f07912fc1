//! In-process transport
//!
//! Handlers are registered by method name on a [`Server`]; a [`Channel`]
//! calls them with typed requests. Messages travel as JSON values and every
//! call runs on its own tokio task, so errors cross the same encode/decode
//! boundary a network transport would impose.

use crate::code::Code;
use crate::context::Context;
use crate::interceptor::{self, ClientStream, ServerStream, StreamItem};
use crate::status::Status;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};

/// Buffered messages per stream
const STREAM_BUFFER: usize = 16;

type UnaryHandler = Arc<dyn Fn(Context, Value) -> BoxFuture<'static, Result<Value, Status>> + Send + Sync>;
type StreamHandler =
    Arc<dyn Fn(Context, Value, mpsc::Sender<StreamItem>) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Default)]
struct Registry {
    unary: RwLock<HashMap<String, UnaryHandler>>,
    streams: RwLock<HashMap<String, StreamHandler>>,
    stopped: AtomicBool,
}

impl Registry {
    fn check_serving(&self) -> Result<(), Status> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(Status::unavailable("connection error: server is not serving"));
        }
        Ok(())
    }

    fn unary(&self, method: &str) -> Result<UnaryHandler, Status> {
        self.check_serving()?;
        self.unary
            .read()
            .get(method)
            .cloned()
            .ok_or_else(|| unimplemented(method))
    }

    fn stream(&self, method: &str) -> Result<StreamHandler, Status> {
        self.check_serving()?;
        self.streams
            .read()
            .get(method)
            .cloned()
            .ok_or_else(|| unimplemented(method))
    }
}

fn unimplemented(method: &str) -> Status {
    Status::new(Code::Unimplemented, format!("unknown method {}", method))
}

/// Handler task that is aborted when the call awaiting it goes away
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Future for AbortOnDrop<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn task_failed(err: JoinError) -> Status {
    Status::internal(format!("handler task failed: {}", err))
}

fn decode_request<Req: DeserializeOwned>(value: Value) -> Result<Req, Status> {
    serde_json::from_value(value)
        .map_err(|e| Status::new(Code::InvalidArgument, format!("decode request: {}", e)))
}

// =============================================================================
// Server
// =============================================================================

/// Handler registry with the server interceptors applied
#[derive(Clone, Default)]
pub struct Server {
    registry: Arc<Registry>,
}

impl Server {
    /// Server with no handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unary handler
    pub fn add_unary<Req, Resp, F, Fut>(&self, method: impl Into<String>, handler: F) -> &Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Context, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = tether_error::Result<Resp>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: UnaryHandler = Arc::new(move |ctx, value| {
            let handler = handler.clone();
            async move {
                let req: Req = decode_request(value)?;
                let resp = interceptor::unary_server(ctx, |ctx| handler(ctx, req)).await?;
                serde_json::to_value(resp)
                    .map_err(|e| Status::internal(format!("encode response: {}", e)))
            }
            .boxed()
        });

        self.registry.unary.write().insert(method.into(), erased);
        self
    }

    /// Register a server-streaming handler
    pub fn add_stream<Req, Resp, F, Fut>(&self, method: impl Into<String>, handler: F) -> &Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Context, Req, ServerStream<Resp>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = tether_error::Result<()>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: StreamHandler = Arc::new(move |ctx, value, tx| {
            let handler = handler.clone();
            async move {
                let req: Req = match decode_request(value) {
                    Ok(req) => req,
                    Err(status) => {
                        let _ = tx.send(Err(status)).await;
                        return;
                    }
                };
                let sink = ServerStream::new(ctx.clone(), tx);
                interceptor::stream_server(ctx, sink, |ctx, sink| handler(ctx, req, sink)).await;
            }
            .boxed()
        });

        self.registry.streams.write().insert(method.into(), erased);
        self
    }

    /// Stop accepting calls; later calls fail with `Unavailable`
    pub fn stop(&self) {
        self.registry.stopped.store(true, Ordering::Release);
        tracing::debug!("server stopped");
    }

    /// Client connection to this server
    pub fn channel(&self) -> Channel {
        Channel {
            registry: self.registry.clone(),
        }
    }
}

// =============================================================================
// Channel
// =============================================================================

/// Client connection running calls through the client interceptors
#[derive(Clone)]
pub struct Channel {
    registry: Arc<Registry>,
}

impl Channel {
    /// Unary call
    #[inline(never)]
    pub fn unary<Req, Resp>(
        &self,
        ctx: &Context,
        method: &str,
        req: &Req,
    ) -> impl Future<Output = tether_error::Result<Resp>> + Send
    where
        Req: Serialize,
        Resp: DeserializeOwned + Send + 'static,
    {
        let registry = self.registry.clone();
        let method = method.to_string();
        let request = serde_json::to_value(req);

        interceptor::unary_client(ctx, move |ctx| async move {
            let request = request
                .map_err(|e| Status::new(Code::InvalidArgument, format!("encode request: {}", e)))?;
            let handler = registry.unary(&method)?;

            let value = AbortOnDrop(tokio::spawn(handler(ctx, request)))
                .await
                .map_err(task_failed)??;

            serde_json::from_value::<Resp>(value)
                .map_err(|e| Status::internal(format!("decode response: {}", e)))
        })
    }

    /// Server-streaming call. Failures to start the call surface on the
    /// first `recv`.
    #[inline(never)]
    pub fn stream<Req, Resp>(&self, ctx: &Context, method: &str, req: &Req) -> ClientStream<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned + Send + 'static,
    {
        let started = self.start_stream(ctx, method, req);

        let inner = async_stream::stream! {
            match started {
                Err(status) => yield Err(status),
                Ok(mut rx) => {
                    while let Some(item) = rx.recv().await {
                        yield item.and_then(|value| {
                            serde_json::from_value::<Resp>(value)
                                .map_err(|e| Status::internal(format!("decode message: {}", e)))
                        });
                    }
                }
            }
        };

        interceptor::stream_client(ctx, inner)
    }

    fn start_stream<Req: Serialize>(
        &self,
        ctx: &Context,
        method: &str,
        req: &Req,
    ) -> Result<mpsc::Receiver<StreamItem>, Status> {
        if let Some(reason) = ctx.err() {
            return Err(reason.to_status());
        }
        let request = serde_json::to_value(req)
            .map_err(|e| Status::new(Code::InvalidArgument, format!("encode request: {}", e)))?;
        let handler = self.registry.stream(method)?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let status_tx = tx.clone();
        let task = tokio::spawn(handler(ctx.clone(), request, tx));

        // a panicking handler must not look like a clean end of stream
        tokio::spawn(async move {
            if let Err(err) = task.await {
                tracing::debug!(error = %err, "stream handler task failed");
                if !status_tx.is_closed() {
                    let _ = status_tx.send(Err(task_failed(err))).await;
                }
            }
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tether_error::Error;

    #[tokio::test]
    async fn test_unary_roundtrip() {
        let server = Server::new();
        server.add_unary("double", |_, n: u64| async move { Ok::<_, Error>(n * 2) });

        let out: u64 = tokio_test::assert_ok!(
            server
                .channel()
                .unary(&Context::background(), "double", &21u64)
                .await
        );
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let server = Server::new();
        let err = tokio_test::assert_err!(
            server
                .channel()
                .unary::<_, ()>(&Context::background(), "missing", &())
                .await
        );
        assert_eq!(err.key_value_map()["code"], "Unimplemented");
    }

    #[tokio::test]
    async fn test_bad_request() {
        let server = Server::new();
        server.add_unary("double", |_, n: u64| async move { Ok::<_, Error>(n * 2) });

        let err = server
            .channel()
            .unary::<_, u64>(&Context::background(), "double", &"nope")
            .await
            .unwrap_err();
        assert_eq!(err.key_value_map()["code"], "InvalidArgument");
    }

    #[tokio::test]
    async fn test_stream_roundtrip() {
        let server = Server::new();
        server.add_stream("count", |_, n: u32, sink: ServerStream<u32>| async move {
            for i in 0..n {
                sink.send(&i).await?;
            }
            Ok::<_, Error>(())
        });

        let (msgs, err) = server
            .channel()
            .stream::<_, u32>(&Context::background(), "count", &3u32)
            .collect()
            .await;
        assert_eq!(msgs, vec![0, 1, 2]);
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn test_stopped_stream() {
        let server = Server::new();
        server.add_stream("count", |_, _: u32, _: ServerStream<u32>| async move {
            Err::<(), _>(Error::new("unreachable"))
        });
        server.stop();

        let mut stream = server.channel().stream::<_, u32>(&Context::background(), "count", &1u32);
        let err = stream.recv().await.unwrap_err();
        assert_eq!(err.key_value_map()["code"], "Unavailable");
        assert_eq!(stream.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stream_handler_panic_is_an_error() {
        let server = Server::new();
        server.add_stream("explode", |_, n: u32, sink: ServerStream<u32>| async move {
            sink.send(&1).await?;
            if n > 0 {
                panic!("handler exploded");
            }
            Ok::<_, Error>(())
        });

        let mut stream = server.channel().stream::<_, u32>(&Context::background(), "explode", &1u32);
        assert_eq!(stream.recv().await.unwrap(), Some(1));

        let err = stream.recv().await.unwrap_err();
        assert_eq!(err.key_value_map()["code"], "Internal");
        assert!(err.to_string().starts_with("handler task failed"), "{}", err);
        assert_eq!(stream.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unary_handler_panic_is_an_error() {
        let server = Server::new();
        server.add_unary("explode", |_, n: u32| async move {
            if n > 0 {
                panic!("handler exploded");
            }
            Ok::<_, Error>(n)
        });

        let err = server
            .channel()
            .unary::<_, u32>(&Context::background(), "explode", &1u32)
            .await
            .unwrap_err();
        assert_eq!(err.key_value_map()["code"], "Internal");
    }

    #[tokio::test]
    async fn test_unary_handler_aborted_when_call_ends() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        let server = Server::new();
        server.add_unary("slow", move |_, n: u32| {
            let flag = flag.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                flag.store(true, Ordering::SeqCst);
                Ok::<_, Error>(n)
            }
        });

        let ctx = Context::background().with_timeout(Duration::from_millis(5));
        let err = server
            .channel()
            .unary::<_, u32>(&ctx, "slow", &1u32)
            .await
            .unwrap_err();
        assert_eq!(err.key_value_map()["code"], "DeadlineExceeded");

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }
}
