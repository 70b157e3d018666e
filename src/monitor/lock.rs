//! Lock-token protocol.
//!
//! `lock` asks for a named lock and queues behind any current owner; `steal`
//! takes it unconditionally. The server pushes `locked` when a queued
//! request is granted and `stolen` when another client steals a lock this
//! connection held. Losing a lock is a normal event, not an error.
//!
//! This is cooperative mutual exclusion only. Transactions that must run
//! under the lock include an `assert` operation naming it.
//!
//! The server releases a connection's locks when it disconnects, so every
//! lock counts as lost once the transport closes.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{json, Value as Json};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::protocol::{methods, OvsdbError, OvsdbResult, RpcTransport, TransportState};

/// Receives lock ownership changes. Runs on the blocking pool.
pub trait LockCallback: Send + Sync + 'static {
    /// This connection now owns the lock.
    fn locked(&self, lock: &str);

    /// Another client took the lock; this connection no longer owns it.
    fn stolen(&self, lock: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockEvent {
    Locked,
    Stolen,
    /// Granted in the reply to our own request; ownership is already recorded
    Granted,
}

struct LockEntry {
    callback: Arc<dyn LockCallback>,
    held: bool,
}

/// Tracks requested locks and dispatches `locked`/`stolen` pushes.
pub struct LockManager {
    transport: RpcTransport,
    locks: DashMap<String, LockEntry>,
    events: mpsc::UnboundedSender<(String, LockEvent)>,
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("locks", &self.locks.len())
            .finish()
    }
}

impl LockManager {
    /// Create a manager, route the transport's lock notifications to it, and
    /// start its dispatch task.
    pub fn install(transport: &RpcTransport) -> Arc<Self> {
        let (events, queue) = mpsc::unbounded_channel();
        let manager = Arc::new(LockManager {
            transport: transport.clone(),
            locks: DashMap::new(),
            events,
        });

        for (method, event) in [
            (methods::LOCKED, LockEvent::Locked),
            (methods::STOLEN, LockEvent::Stolen),
        ] {
            let sender = manager.events.clone();
            transport.on_notification(
                method,
                Arc::new(move |params: Json| match lock_name(&params) {
                    Some(name) => {
                        let _ = sender.send((name, event));
                    }
                    None => warn!(method, params = %params, "lock_notification_malformed"),
                }),
            );
        }

        tokio::spawn(dispatch(
            Arc::downgrade(&manager),
            queue,
            transport.subscribe_state(),
        ));
        manager
    }

    /// Request `lock`. Returns whether it was granted immediately; otherwise
    /// `callback.locked` fires once the server grants it.
    pub async fn lock(&self, lock: &str, callback: Arc<dyn LockCallback>) -> OvsdbResult<bool> {
        self.acquire(methods::LOCK, lock, callback).await
    }

    /// Take `lock` from its current owner.
    pub async fn steal(&self, lock: &str, callback: Arc<dyn LockCallback>) -> OvsdbResult<bool> {
        self.acquire(methods::STEAL, lock, callback).await
    }

    async fn acquire(
        &self,
        method: &str,
        lock: &str,
        callback: Arc<dyn LockCallback>,
    ) -> OvsdbResult<bool> {
        self.locks.insert(
            lock.to_string(),
            LockEntry {
                callback,
                held: false,
            },
        );
        let reply = match self.transport.call(method, json!([lock])).await {
            Ok(reply) => reply,
            Err(e) => {
                self.locks.remove(lock);
                return Err(e);
            }
        };
        let granted = reply
            .get("locked")
            .and_then(Json::as_bool)
            .ok_or_else(|| OvsdbError::MalformedMessage {
                message: format!("{method} reply without 'locked': {reply}"),
            })?;
        info!(lock, method, granted, "lock_requested");
        if granted {
            if let Some(mut entry) = self.locks.get_mut(lock) {
                entry.held = true;
            }
            let _ = self.events.send((lock.to_string(), LockEvent::Granted));
        }
        Ok(granted)
    }

    /// Release `lock` (or withdraw a queued request).
    pub async fn unlock(&self, lock: &str) -> OvsdbResult<()> {
        self.locks.remove(lock);
        self.transport.call(methods::UNLOCK, json!([lock])).await?;
        info!(lock, "lock_released");
        Ok(())
    }

    /// Whether this connection currently owns `lock`, as far as the server
    /// has told us.
    pub fn is_held(&self, lock: &str) -> bool {
        !self.transport.is_closed() && self.locks.get(lock).is_some_and(|entry| entry.held)
    }

    /// Number of locks requested and not yet released.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    fn release_all(&self, reason: &str) {
        let held = self.locks.iter().filter(|entry| entry.held).count();
        self.locks.clear();
        if held > 0 {
            warn!(held, reason, "locks_lost_on_close");
        }
    }
}

fn lock_name(params: &Json) -> Option<String> {
    params.get(0).and_then(Json::as_str).map(String::from)
}

fn closed_reason(state: &TransportState) -> Option<String> {
    match state {
        TransportState::Closed { reason } => Some(reason.clone()),
        TransportState::Open => None,
    }
}

async fn dispatch(
    manager: std::sync::Weak<LockManager>,
    mut queue: mpsc::UnboundedReceiver<(String, LockEvent)>,
    mut transport_state: watch::Receiver<TransportState>,
) {
    loop {
        let (lock, event) = tokio::select! {
            biased;
            next = queue.recv() => match next {
                Some(next) => next,
                None => break,
            },
            changed = transport_state.changed() => {
                let reason = match changed {
                    Ok(()) => closed_reason(&transport_state.borrow_and_update()),
                    Err(_) => Some("transport dropped".to_string()),
                };
                if let Some(reason) = reason {
                    if let Some(manager) = manager.upgrade() {
                        manager.release_all(&reason);
                    }
                    break;
                }
                continue;
            }
        };
        let Some(manager) = manager.upgrade() else {
            break;
        };
        let callback = match manager.locks.get_mut(&lock) {
            Some(mut entry) => {
                match event {
                    LockEvent::Locked => entry.held = true,
                    LockEvent::Stolen => entry.held = false,
                    LockEvent::Granted => {}
                }
                Arc::clone(&entry.callback)
            }
            None => {
                warn!(lock = %lock, ?event, "lock_notification_unknown_lock");
                continue;
            }
        };
        drop(manager);
        debug!(lock = %lock, ?event, "lock_event");
        let outcome = tokio::task::spawn_blocking(move || match event {
            LockEvent::Locked | LockEvent::Granted => callback.locked(&lock),
            LockEvent::Stolen => callback.stolen(&lock),
        })
        .await;
        if let Err(e) = outcome {
            warn!(error = %e, "lock_callback_panicked");
        }
    }
}
