//! The duplex channel: writer task, pending-request map, serve loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use barls_protocol::{Notification, Request, Response, ResponseError};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc, oneshot};

use crate::codec::{FrameDecoder, FrameEncoder};
use crate::error::RpcError;
use crate::router::{Context, Router};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const WRITER_QUEUE_CAPACITY: usize = 64;

enum WriterCommand {
    Send(Value),
    Shutdown,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// Where the writer task parks the error that stopped it, so the serve loop
/// can report a broken transport instead of a generic closed channel.
type WriteFailure = Arc<std::sync::Mutex<Option<RpcError>>>;

/// Inbound frames fall into three shapes. Anything else is malformed and
/// skipped.
enum Inbound {
    Response {
        id: u64,
        body: Value,
    },
    Request {
        id: Value,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
}

fn classify(frame: &Value) -> Option<Inbound> {
    let id = frame.get("id");
    let method = frame
        .get("method")
        .and_then(|m| m.as_str())
        .map(String::from);
    let is_reply = frame.get("result").is_some() || frame.get("error").is_some();

    match (id, method, is_reply) {
        (Some(id), None, true) => Some(Inbound::Response {
            id: id.as_u64()?,
            body: frame.clone(),
        }),
        (Some(id), Some(method), _) => Some(Inbound::Request {
            id: id.clone(),
            method,
            params: frame.get("params").cloned(),
        }),
        (None, Some(method), _) => Some(Inbound::Notification {
            method,
            params: frame.get("params").cloned(),
        }),
        _ => None,
    }
}

/// Clone-cheap handle for issuing outbound traffic.
///
/// Notifications are fire-and-forget enqueues onto the writer task; requests
/// park a oneshot respondent in the pending map until the peer answers or
/// the timeout elapses. Either way the pending entry never leaks.
#[derive(Clone)]
pub struct RpcSender {
    writer_tx: mpsc::Sender<WriterCommand>,
    pending: PendingMap,
    next_id: Arc<AtomicU64>,
    request_timeout: Duration,
}

impl RpcSender {
    /// Override the per-request response bound (default 30s).
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Enqueue a notification. Returns once the frame is queued; delivery is
    /// not confirmed.
    pub fn notify(&self, method: &'static str, params: Option<Value>) -> Result<(), RpcError> {
        let frame = serde_json::to_value(Notification::new(method, params))
            .map_err(|e| RpcError::Codec(e.to_string()))?;
        self.writer_tx
            .try_send(WriterCommand::Send(frame))
            .map_err(|_| RpcError::ChannelClosed)
    }

    /// Send a request and await the matching response.
    ///
    /// Returns the `result` member; a peer `error` object becomes
    /// [`RpcError::Peer`].
    pub async fn request(
        &self,
        method: &'static str,
        params: Option<Value>,
    ) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = serde_json::to_value(Request::new(id, method, params))
            .map_err(|e| RpcError::Codec(e.to_string()))?;
        if self
            .writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .is_err()
        {
            self.pending.lock().await.remove(&id);
            return Err(RpcError::ChannelClosed);
        }

        let body = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(body)) => body,
            Ok(Err(_)) => {
                // Reader stopped; the respondent was dropped with it.
                self.pending.lock().await.remove(&id);
                return Err(RpcError::ResponseDropped);
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(RpcError::RequestTimeout(self.request_timeout));
            }
        };

        if let Some(error) = body.get("error") {
            let error: ResponseError = serde_json::from_value(error.clone())
                .unwrap_or_else(|_| ResponseError::internal("unparseable error object"));
            return Err(RpcError::Peer(error));
        }
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }

    #[cfg(test)]
    pub(crate) async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }
}

/// A bidirectional JSON-RPC channel over one inbound and one outbound byte
/// stream.
///
/// Construction spawns the writer task; [`run`](RpcChannel::run) drives the
/// read/dispatch loop until the peer closes the stream, a handler requests
/// close, or the transport fails. Inbound messages are processed strictly in
/// arrival order, one at a time.
pub struct RpcChannel<R> {
    decoder: FrameDecoder<R>,
    sender: RpcSender,
    writer_handle: tokio::task::JoinHandle<()>,
    write_failure: WriteFailure,
}

impl<R: AsyncRead + Unpin> RpcChannel<R> {
    pub fn new<W>(reader: R, writer: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_QUEUE_CAPACITY);
        let write_failure: WriteFailure = Arc::new(std::sync::Mutex::new(None));
        let failure = Arc::clone(&write_failure);
        let writer_handle = tokio::spawn(async move {
            let mut encoder = FrameEncoder::new(writer);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = encoder.encode(&frame).await {
                            tracing::warn!(error = %e, "outbound write failed, stopping writer");
                            *failure
                                .lock()
                                .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(e);
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
        });

        Self {
            decoder: FrameDecoder::new(reader),
            sender: RpcSender {
                writer_tx,
                pending: Arc::new(Mutex::new(HashMap::new())),
                next_id: Arc::new(AtomicU64::new(1)),
                request_timeout: DEFAULT_REQUEST_TIMEOUT,
            },
            writer_handle,
            write_failure,
        }
    }

    /// Handle for issuing outbound calls while the serve loop runs.
    #[must_use]
    pub fn sender(&self) -> RpcSender {
        self.sender.clone()
    }

    /// Read and dispatch inbound frames until the stream ends, a handler
    /// calls [`Context::close`], or the transport breaks.
    ///
    /// `Ok(())` is a clean end (EOF or requested close); fatal errors
    /// propagate so the host can tear the session down. A write failure in
    /// the writer task is reported here as [`RpcError::Transport`] even when
    /// the read side ended cleanly.
    pub async fn run<S>(mut self, state: &mut S, router: &Router<S>) -> Result<(), RpcError> {
        let result = self.serve(state, router).await;

        // Stop the writer after any already-queued frames are flushed, then
        // wait for it so the streams are quiescent when we return.
        let _ = self
            .sender
            .writer_tx
            .send(WriterCommand::Shutdown)
            .await;
        let _ = self.writer_handle.await;

        let write_failure = self
            .write_failure
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        match (result, write_failure) {
            // The reader's own diagnosis wins over the secondary failures
            // (ChannelClosed) it produces once the writer is gone.
            (Err(e), _) if e.is_fatal() => Err(e),
            (_, Some(e)) => Err(e),
            (result, None) => result,
        }
    }

    async fn serve<S>(&mut self, state: &mut S, router: &Router<S>) -> Result<(), RpcError> {
        loop {
            let frame = match self.decoder.decode().await? {
                Some(frame) => frame,
                None => {
                    tracing::debug!("peer closed the inbound stream");
                    return Ok(());
                }
            };

            let Some(inbound) = classify(&frame) else {
                tracing::trace!("skipping malformed JSON-RPC frame");
                continue;
            };

            match inbound {
                Inbound::Response { id, body } => {
                    let respondent = self.sender.pending.lock().await.remove(&id);
                    match respondent {
                        Some(tx) => {
                            let _ = tx.send(body);
                        }
                        None => tracing::trace!(id, "response for unknown request id"),
                    }
                }
                Inbound::Request { id, method, params } => {
                    let mut ctx = Context::new(&self.sender);
                    let response = match router.request_handler(&method) {
                        Some(handler) => match handler(state, &mut ctx, params) {
                            Ok(result) => Response::success(id, result),
                            Err(error) => Response::failure(id, error),
                        },
                        None => {
                            tracing::warn!(%method, "no handler registered for request");
                            Response::failure(id, ResponseError::method_not_found(&method))
                        }
                    };

                    let frame = serde_json::to_value(&response)
                        .map_err(|e| RpcError::Codec(e.to_string()))?;
                    if self
                        .sender
                        .writer_tx
                        .send(WriterCommand::Send(frame))
                        .await
                        .is_err()
                    {
                        return Err(RpcError::ChannelClosed);
                    }

                    if let Some(failure) = ctx.take_send_failure() {
                        return Err(failure);
                    }
                    if ctx.close_requested() {
                        return Ok(());
                    }
                }
                Inbound::Notification { method, params } => {
                    let mut ctx = Context::new(&self.sender);
                    match router.notification_handler(&method) {
                        Some(handler) => handler(state, &mut ctx, params),
                        None => {
                            tracing::warn!(%method, "no handler registered for notification");
                        }
                    }

                    if let Some(failure) = ctx.take_send_failure() {
                        return Err(failure);
                    }
                    if ctx.close_requested() {
                        return Ok(());
                    }
                }
            }
        }
    }
}
