//! Monitor sessions.
//!
//! ## State Machine
//!
//! ```text
//! Unsubscribed --monitor()--> Subscribing --reply--> Active
//!                                  |                   |
//!                                  | error             | transport closed -> Stale
//!                                  v                   | cancel()          -> Closed
//!                               Closed
//! ```
//!
//! Each session owns one dispatch task. The transport's reader only pushes
//! raw `update` params into the session's queue; the dispatch task decodes
//! them, folds them into the session's [`TableMirror`], and runs the
//! callback on the blocking pool, one update at a time. A slow callback
//! therefore delays only its own session.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{json, Value as Json};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{requests_json, MonitorRequest, TableMirror, TableUpdates};
use crate::protocol::{methods, OvsdbError, OvsdbResult, RpcTransport, TransportState};
use crate::schema::DatabaseSchema;
use crate::value::Row;

/// Lifecycle of a monitor session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorState {
    Unsubscribed,
    Subscribing,
    Active,
    /// The connection dropped; resubscribe on a new connection
    Stale,
    Closed,
}

/// Receives the changes of one monitor.
///
/// Methods run on the blocking pool and may block. Calls for one monitor
/// never overlap and arrive in server-send order.
pub trait MonitorCallback: Send + Sync + 'static {
    /// A batch of changes. The first call carries the initial contents,
    /// every row as an insertion.
    fn update(&self, updates: &TableUpdates);

    /// The session stopped delivering because of `error`.
    fn exception(&self, error: &OvsdbError);
}

/// Routes `update` notifications to sessions by monitor id.
#[derive(Debug, Default)]
pub struct MonitorRegistry {
    sessions: DashMap<String, mpsc::UnboundedSender<Json>>,
}

impl MonitorRegistry {
    pub fn new() -> Self {
        MonitorRegistry::default()
    }

    /// Create a registry and route the transport's `update` notifications to it.
    pub fn install(transport: &RpcTransport) -> Arc<Self> {
        let registry = Arc::new(MonitorRegistry::new());
        let routed = Arc::clone(&registry);
        transport.on_notification(methods::UPDATE, Arc::new(move |params| routed.route(params)));
        registry
    }

    fn route(&self, params: Json) {
        let (monitor_id, updates) = match params {
            Json::Array(mut items) if items.len() == 2 => {
                let updates = items.pop().unwrap_or(Json::Null);
                let id = items.pop().unwrap_or(Json::Null);
                (id, updates)
            }
            other => {
                warn!(params = %other, "monitor_update_malformed");
                return;
            }
        };
        let Some(monitor_id) = monitor_id.as_str() else {
            warn!(monitor_id = %monitor_id, "monitor_update_foreign_id");
            return;
        };
        match self.sessions.get(monitor_id) {
            Some(queue) => {
                if queue.send(updates).is_err() {
                    debug!(monitor_id, "monitor_update_after_close");
                }
            }
            None => warn!(monitor_id, "monitor_update_unknown_id"),
        }
    }

    fn register(&self, monitor_id: &str) -> mpsc::UnboundedReceiver<Json> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.insert(monitor_id.to_string(), tx);
        rx
    }

    fn unregister(&self, monitor_id: &str) {
        self.sessions.remove(monitor_id);
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Handle to a running monitor session.
#[derive(Debug)]
pub struct MonitorHandle {
    id: String,
    state: watch::Receiver<MonitorState>,
    state_tx: Arc<watch::Sender<MonitorState>>,
    mirror: Arc<RwLock<TableMirror>>,
    transport: RpcTransport,
    registry: Arc<MonitorRegistry>,
}

impl MonitorHandle {
    /// Monitor id used on the wire.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> MonitorState {
        self.state.borrow().clone()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<MonitorState> {
        self.state.clone()
    }

    /// Wait until the session reaches `target`.
    pub async fn wait_for_state(&self, target: MonitorState) -> OvsdbResult<()> {
        let mut state = self.state.clone();
        state
            .wait_for(|s| *s == target)
            .await
            .map(|_| ())
            .map_err(|_| OvsdbError::ConnectionLost {
                reason: "monitor session ended".to_string(),
            })
    }

    /// Copy of the mirrored rows.
    pub fn snapshot(&self) -> TableMirror {
        self.mirror.read().clone()
    }

    /// Copy of one mirrored row.
    pub fn row(&self, table: &str, uuid: &Uuid) -> Option<Row> {
        self.mirror.read().get(table, uuid).cloned()
    }

    /// Cancel the subscription. Local delivery stops whether or not the
    /// server acknowledges.
    pub async fn cancel(&self) -> OvsdbResult<()> {
        let outcome = self
            .transport
            .call(methods::MONITOR_CANCEL, json!([self.id]))
            .await;
        self.registry.unregister(&self.id);
        self.state_tx.send_if_modified(|s| {
            if *s == MonitorState::Closed {
                false
            } else {
                *s = MonitorState::Closed;
                true
            }
        });
        info!(monitor_id = %self.id, "monitor_cancelled");
        outcome.map(|_| ())
    }
}

impl Drop for MonitorHandle {
    /// Stop local delivery and tell the server, without waiting for its reply.
    fn drop(&mut self) {
        self.registry.unregister(&self.id);
        let was_live = self.state_tx.send_if_modified(|s| match s {
            MonitorState::Subscribing | MonitorState::Active => {
                *s = MonitorState::Closed;
                true
            }
            _ => false,
        });
        if !was_live || self.transport.is_closed() {
            return;
        }
        // submit needs a runtime for its timeout timer
        if tokio::runtime::Handle::try_current().is_ok() {
            drop(self.transport.submit(methods::MONITOR_CANCEL, json!([self.id])));
            debug!(monitor_id = %self.id, "monitor_dropped");
        }
    }
}

/// Subscribe to `requests` and start delivering to `callback`.
///
/// Returns once the server has acknowledged the subscription. The initial
/// contents are delivered to the callback as the first update.
pub async fn start(
    transport: &RpcTransport,
    registry: &Arc<MonitorRegistry>,
    schema: Arc<DatabaseSchema>,
    requests: &[MonitorRequest],
    callback: Arc<dyn MonitorCallback>,
) -> OvsdbResult<MonitorHandle> {
    for request in requests {
        request.validate(&schema)?;
    }

    let (state_tx, state_rx) = watch::channel(MonitorState::Unsubscribed);
    let state_tx = Arc::new(state_tx);
    let monitor_id = Uuid::new_v4().to_string();

    // register before sending so no update can race the reply
    let queue = registry.register(&monitor_id);
    // a close between the reply and the dispatch task must still be seen
    let transport_state = transport.subscribe_state();
    state_tx.send_replace(MonitorState::Subscribing);

    let params = json!([schema.name, monitor_id, requests_json(requests)]);
    let reply = match transport.call(methods::MONITOR, params).await {
        Ok(reply) => reply,
        Err(e) => {
            registry.unregister(&monitor_id);
            state_tx.send_replace(MonitorState::Closed);
            return Err(e);
        }
    };
    let initial = match TableUpdates::from_json(&reply, &schema) {
        Ok(initial) => initial,
        Err(e) => {
            registry.unregister(&monitor_id);
            state_tx.send_replace(MonitorState::Closed);
            return Err(e);
        }
    };

    info!(
        monitor_id = %monitor_id,
        tables = requests.len(),
        initial_rows = initial.row_count(),
        "monitor_subscribed"
    );
    state_tx.send_replace(MonitorState::Active);

    let mirror = Arc::new(RwLock::new(TableMirror::new()));
    tokio::spawn(
        Dispatcher {
            monitor_id: monitor_id.clone(),
            schema,
            callback,
            mirror: Arc::clone(&mirror),
            state: Arc::clone(&state_tx),
        }
        .run(initial, queue, transport_state),
    );

    Ok(MonitorHandle {
        id: monitor_id,
        state: state_rx,
        state_tx,
        mirror,
        transport: transport.clone(),
        registry: Arc::clone(registry),
    })
}

struct Dispatcher {
    monitor_id: String,
    schema: Arc<DatabaseSchema>,
    callback: Arc<dyn MonitorCallback>,
    mirror: Arc<RwLock<TableMirror>>,
    state: Arc<watch::Sender<MonitorState>>,
}

impl Dispatcher {
    async fn run(
        self,
        initial: TableUpdates,
        mut queue: mpsc::UnboundedReceiver<Json>,
        mut transport_state: watch::Receiver<TransportState>,
    ) {
        self.deliver(initial).await;

        let closed_early = match &*transport_state.borrow_and_update() {
            TransportState::Closed { reason } => Some(reason.clone()),
            TransportState::Open => None,
        };
        if let Some(reason) = closed_early {
            self.go_stale(reason).await;
            return;
        }

        loop {
            tokio::select! {
                biased;
                next = queue.recv() => match next {
                    Some(raw) => match TableUpdates::from_json(&raw, &self.schema) {
                        Ok(updates) => self.deliver(updates).await,
                        Err(e) => warn!(monitor_id = %self.monitor_id, error = %e, "monitor_update_dropped"),
                    },
                    None => break,
                },
                changed = transport_state.changed() => {
                    let closed = match changed {
                        Ok(()) => match &*transport_state.borrow() {
                            TransportState::Closed { reason } => Some(reason.clone()),
                            TransportState::Open => None,
                        },
                        Err(_) => Some("transport dropped".to_string()),
                    };
                    if let Some(reason) = closed {
                        self.go_stale(reason).await;
                        return;
                    }
                }
            }
        }

        self.state.send_if_modified(|s| {
            if *s == MonitorState::Active {
                *s = MonitorState::Closed;
                true
            } else {
                false
            }
        });
        debug!(monitor_id = %self.monitor_id, "monitor_dispatch_stopped");
    }

    async fn deliver(&self, updates: TableUpdates) {
        self.mirror.write().apply(&updates);
        let callback = Arc::clone(&self.callback);
        let outcome = tokio::task::spawn_blocking(move || callback.update(&updates)).await;
        if let Err(e) = outcome {
            warn!(monitor_id = %self.monitor_id, error = %e, "monitor_callback_panicked");
        }
    }

    async fn go_stale(&self, reason: String) {
        let became_stale = self.state.send_if_modified(|s| {
            if *s == MonitorState::Active {
                *s = MonitorState::Stale;
                true
            } else {
                false
            }
        });
        if !became_stale {
            return;
        }
        warn!(monitor_id = %self.monitor_id, reason = %reason, "monitor_stale");
        let callback = Arc::clone(&self.callback);
        let error = OvsdbError::ConnectionLost { reason };
        let _ = tokio::task::spawn_blocking(move || callback.exception(&error)).await;
    }
}
