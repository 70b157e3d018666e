//! RPC transport over a single byte stream.
//!
//! The transport owns two background tasks:
//!
//! - **reader**: frames inbound bytes, routes responses to pending calls by
//!   id, hands notifications to the handler registered for their method, and
//!   answers server `echo` requests itself
//! - **writer**: drains the outbound queue onto the stream
//!
//! When either side fails, or [`RpcTransport::close`] is called, every pending
//! call fails with `ConnectionLost`, the state watch flips to
//! [`TransportState::Closed`], and no further calls are accepted.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value as Json;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Sleep;
use tracing::{debug, info, trace, warn};

use super::codec::JsonFramer;
use super::error::{OvsdbError, OvsdbResult};
use super::wire::{methods, Incoming, Request, Response};
use super::{DEFAULT_REQUEST_TIMEOUT_MS, MAX_MESSAGE_SIZE};

const READ_CHUNK: usize = 8 * 1024;

/// Callback for server notifications of one method. Runs on the reader task,
/// so it must not block.
pub type NotificationHandler = Arc<dyn Fn(Json) + Send + Sync>;

/// Connection liveness as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportState {
    Open,
    Closed { reason: String },
}

/// Tunables for a transport.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Per-call timeout; `None` waits forever
    pub request_timeout: Option<Duration>,
    /// Largest inbound message accepted
    pub max_message_size: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        TransportOptions {
            request_timeout: Some(Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS)),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

struct Waiter {
    method: String,
    tx: oneshot::Sender<OvsdbResult<Json>>,
}

#[derive(Default)]
struct PendingTable {
    /// Set once the transport has shut down
    closed: Option<String>,
    waiters: HashMap<u64, Waiter>,
}

struct Shared {
    pending: Mutex<PendingTable>,
    handlers: DashMap<String, NotificationHandler>,
    outbound: mpsc::UnboundedSender<String>,
    next_id: AtomicU64,
    state: watch::Sender<TransportState>,
    request_timeout: Option<Duration>,
}

/// Handle to a running JSON-RPC connection. Cheap to clone.
#[derive(Clone)]
pub struct RpcTransport {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for RpcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcTransport")
            .field("state", &*self.shared.state.borrow())
            .finish()
    }
}

impl RpcTransport {
    /// Start the reader and writer tasks on `stream`. Must be called inside a
    /// Tokio runtime.
    pub fn start<S>(stream: S, options: TransportOptions) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(TransportState::Open);

        let shared = Arc::new(Shared {
            pending: Mutex::new(PendingTable::default()),
            handlers: DashMap::new(),
            outbound: outbound_tx,
            next_id: AtomicU64::new(1),
            state,
            request_timeout: options.request_timeout,
        });

        tokio::spawn(read_loop(
            Arc::clone(&shared),
            reader,
            options.max_message_size,
        ));
        tokio::spawn(write_loop(Arc::clone(&shared), writer, outbound_rx));

        RpcTransport { shared }
    }

    /// Send a request now and return a future for its reply.
    ///
    /// The request is queued before this returns. Dropping the returned
    /// future does not recall it; the reply is discarded when it arrives.
    pub fn submit(&self, method: &str, params: Json) -> PendingCall {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let call = PendingCall {
            id,
            method: method.to_string(),
            rx,
            deadline: self
                .shared
                .request_timeout
                .map(|t| Box::pin(tokio::time::sleep(t))),
            timeout_ms: self.shared.request_timeout.map_or(0, |t| t.as_millis() as u64),
            shared: Arc::clone(&self.shared),
        };

        {
            let mut pending = self.shared.pending.lock();
            if pending.closed.is_some() {
                let _ = tx.send(Err(OvsdbError::TransportClosed));
                return call;
            }
            pending.waiters.insert(
                id,
                Waiter {
                    method: method.to_string(),
                    tx,
                },
            );
        }

        let text = match serde_json::to_string(&Request::new(method, params, id)) {
            Ok(text) => text,
            Err(e) => {
                self.shared.fail(id, e.into());
                return call;
            }
        };
        trace!(id, method, "rpc_send");
        if self.shared.outbound.send(text).is_err() {
            self.shared.fail(id, OvsdbError::TransportClosed);
        }
        call
    }

    /// Send a request and wait for its reply.
    pub async fn call(&self, method: &str, params: Json) -> OvsdbResult<Json> {
        self.submit(method, params).await
    }

    /// Round-trip an `echo` to check liveness.
    pub async fn echo(&self, payload: Json) -> OvsdbResult<Json> {
        self.call(methods::ECHO, payload).await
    }

    /// Route notifications of `method` to `handler`, replacing any previous one.
    pub fn on_notification(&self, method: &str, handler: NotificationHandler) {
        self.shared.handlers.insert(method.to_string(), handler);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.pending.lock().closed.is_some()
    }

    /// Watch connection state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<TransportState> {
        self.shared.state.subscribe()
    }

    /// Number of calls still awaiting a reply.
    pub fn pending_calls(&self) -> usize {
        self.shared.pending.lock().waiters.len()
    }

    /// Shut the connection down, failing all pending calls.
    pub fn close(&self) {
        self.shared.shutdown("closed by client".to_string());
    }
}

impl Shared {
    fn fail(&self, id: u64, err: OvsdbError) {
        if let Some(waiter) = self.pending.lock().waiters.remove(&id) {
            let _ = waiter.tx.send(Err(err));
        }
    }

    fn forget(&self, id: u64) {
        self.pending.lock().waiters.remove(&id);
    }

    fn is_closed(&self) -> bool {
        self.pending.lock().closed.is_some()
    }

    fn shutdown(&self, reason: String) {
        let waiters = {
            let mut pending = self.pending.lock();
            if pending.closed.is_some() {
                return;
            }
            pending.closed = Some(reason.clone());
            std::mem::take(&mut pending.waiters)
        };
        info!(reason = %reason, failed_calls = waiters.len(), "transport_closed");
        for (_, waiter) in waiters {
            let _ = waiter.tx.send(Err(OvsdbError::ConnectionLost {
                reason: reason.clone(),
            }));
        }
        self.state.send_replace(TransportState::Closed { reason });
    }

    fn dispatch(&self, message: Json) {
        match Incoming::classify(message) {
            Ok(Incoming::Response(response)) => self.complete(response),
            Ok(Incoming::Request { id, method, params }) => {
                let reply = if method == methods::ECHO {
                    Response::success(id, params)
                } else {
                    warn!(method = %method, "rpc_unsupported_server_request");
                    Response::failure(id, format!("unknown method '{method}'"))
                };
                match serde_json::to_string(&reply) {
                    Ok(text) => {
                        let _ = self.outbound.send(text);
                    }
                    Err(e) => warn!(error = %e, "rpc_reply_encode_failed"),
                }
            }
            Ok(Incoming::Notification { method, params }) => {
                let handler = self.handlers.get(&method).map(|h| Arc::clone(h.value()));
                match handler {
                    Some(handler) => handler(params),
                    None => debug!(method = %method, "rpc_notification_unhandled"),
                }
            }
            Err(e) => warn!(error = %e, "rpc_message_dropped"),
        }
    }

    fn complete(&self, response: Response) {
        let Some(id) = response.id.as_u64() else {
            warn!(id = %response.id, "rpc_response_foreign_id");
            return;
        };
        let Some(waiter) = self.pending.lock().waiters.remove(&id) else {
            warn!(id, "rpc_response_unknown_id");
            return;
        };
        trace!(id, method = %waiter.method, "rpc_reply");
        let outcome = response.into_result(&waiter.method);
        if waiter.tx.send(outcome).is_err() {
            debug!(id, method = %waiter.method, "rpc_reply_discarded");
        }
    }
}

async fn read_loop<R>(shared: Arc<Shared>, mut reader: R, max_message_size: usize)
where
    R: AsyncRead + Unpin,
{
    let mut framer = JsonFramer::new(max_message_size);
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut state_rx = shared.state.subscribe();

    let reason = loop {
        tokio::select! {
            read = reader.read(&mut chunk) => match read {
                Ok(0) => break "connection closed by peer".to_string(),
                Ok(n) => {
                    framer.push(&chunk[..n]);
                    if let Err(e) = drain_frames(&shared, &mut framer) {
                        warn!(error = %e, "rpc_stream_corrupt");
                        break e.to_string();
                    }
                }
                Err(e) => break format!("read failed: {e}"),
            },
            _ = state_rx.changed() => {
                if shared.is_closed() {
                    return;
                }
            }
        }
    };
    shared.shutdown(reason);
}

fn drain_frames(shared: &Shared, framer: &mut JsonFramer) -> OvsdbResult<()> {
    while let Some(message) = framer.next_message()? {
        shared.dispatch(message);
    }
    Ok(())
}

async fn write_loop<W>(
    shared: Arc<Shared>,
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<String>,
) where
    W: AsyncWrite + Unpin,
{
    let mut state_rx = shared.state.subscribe();
    loop {
        tokio::select! {
            next = outbound.recv() => {
                let Some(text) = next else { break };
                let written = async {
                    writer.write_all(text.as_bytes()).await?;
                    writer.flush().await
                }
                .await;
                if let Err(e) = written {
                    shared.shutdown(format!("write failed: {e}"));
                    break;
                }
            }
            _ = state_rx.changed() => {
                if shared.is_closed() {
                    break;
                }
            }
        }
    }
    let _ = writer.shutdown().await;
}

/// Reply future for a submitted call.
pub struct PendingCall {
    id: u64,
    method: String,
    rx: oneshot::Receiver<OvsdbResult<Json>>,
    deadline: Option<Pin<Box<Sleep>>>,
    timeout_ms: u64,
    shared: Arc<Shared>,
}

impl PendingCall {
    /// Request id on the wire.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("id", &self.id)
            .field("method", &self.method)
            .finish()
    }
}

impl Future for PendingCall {
    type Output = OvsdbResult<Json>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        if let Poll::Ready(outcome) = Pin::new(&mut this.rx).poll(cx) {
            return Poll::Ready(outcome.unwrap_or_else(|_| {
                Err(OvsdbError::ConnectionLost {
                    reason: "transport dropped the call".to_string(),
                })
            }));
        }
        if let Some(deadline) = this.deadline.as_mut() {
            if deadline.as_mut().poll(cx).is_ready() {
                this.shared.forget(this.id);
                warn!(id = this.id, method = %this.method, "rpc_call_timed_out");
                return Poll::Ready(Err(OvsdbError::Timeout {
                    method: this.method.clone(),
                    timeout_ms: this.timeout_ms,
                }));
            }
        }
        Poll::Pending
    }
}
