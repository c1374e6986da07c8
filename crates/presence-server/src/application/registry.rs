//! Session registry: the server's in-memory table of active device sessions.
//!
//! Every session that completes the handshake is registered under its
//! `ClientInfo.id`.  The table maps that id to a [`SessionHandle`], which is the
//! outside world's only way to observe or stop the session.
//!
//! ```text
//! register ──► Registered ──► (session ends) ──► remove_if_current ──► Removed
//!                   │
//!       same id registers again, Replace policy
//!                   ▼
//!               Replaced  (old session is told to shut down)
//! ```
//!
//! Observers may [`SessionRegistry::subscribe`] to a stream of
//! [`RegistryEvent`]s.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use presence_core::{ClientInfo, SessionState};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 64;

/// What to do when a device registers while a session with the same id is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateIdPolicy {
    /// Shut the old session down and register the new one.
    #[default]
    Replace,
    /// Refuse the new connection.
    Reject,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("device {0} already has an active session")]
    DuplicateId(String),

    #[error("server is shutting down")]
    ShuttingDown,
}

/// Change notifications published by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Registered {
        id: String,
        session_id: Uuid,
    },
    Replaced {
        id: String,
        old_session_id: Uuid,
        new_session_id: Uuid,
    },
    Removed {
        id: String,
        session_id: Uuid,
    },
}

// ── SessionHandle ─────────────────────────────────────────────────────────────

/// External view of one device session.  Cheap to clone.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session_id: Uuid,
    info: Arc<ClientInfo>,
    peer_addr: Option<SocketAddr>,
    state: watch::Receiver<SessionState>,
    shutdown: Arc<watch::Sender<bool>>,
}

/// The session task's side of a [`SessionHandle`].
#[derive(Debug)]
pub struct SessionControl {
    pub session_id: Uuid,
    pub shutdown: watch::Receiver<bool>,
    pub state: watch::Sender<SessionState>,
}

impl SessionHandle {
    /// Creates a handle for a session that has just become active, plus the
    /// control half the session loop drives.
    pub fn new(info: ClientInfo, peer_addr: Option<SocketAddr>) -> (Self, SessionControl) {
        let session_id = Uuid::new_v4();
        let (state_tx, state_rx) = watch::channel(SessionState::Active);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        (
            Self {
                session_id,
                info: Arc::new(info),
                peer_addr,
                state: state_rx,
                shutdown: Arc::new(shutdown_tx),
            },
            SessionControl {
                session_id,
                shutdown: shutdown_rx,
                state: state_tx,
            },
        )
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// The device id this session is registered under.
    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn info(&self) -> &ClientInfo {
        &self.info
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Asks the session to close.  Idempotent; returns immediately.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Waits until the session reports `Closed` (or its task is gone).
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| s.is_closed()).await;
    }
}

// ── SessionRegistry ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Table {
    sessions: HashMap<String, SessionHandle>,
    /// Set by `shutdown_all`; no session is admitted afterwards.
    closed: bool,
}

/// Shared table of live sessions keyed by device id.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    table: Arc<RwLock<Table>>,
    events: broadcast::Sender<RegistryEvent>,
    policy: DuplicateIdPolicy,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DuplicateIdPolicy::default())
    }
}

impl SessionRegistry {
    pub fn new(policy: DuplicateIdPolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            table: Arc::new(RwLock::new(Table::default())),
            events,
            policy,
        }
    }

    pub fn policy(&self) -> DuplicateIdPolicy {
        self.policy
    }

    /// Registers `handle` under its device id.
    ///
    /// Under [`DuplicateIdPolicy::Replace`] an existing session with the same
    /// id is told to shut down and returned.
    ///
    /// # Errors
    ///
    /// * [`RegistryError::DuplicateId`] under [`DuplicateIdPolicy::Reject`]
    ///   when the id is already registered.
    /// * [`RegistryError::ShuttingDown`] once [`shutdown_all`](Self::shutdown_all)
    ///   has run.
    pub async fn register(&self, handle: SessionHandle) -> Result<Option<SessionHandle>, RegistryError> {
        let id = handle.id().to_string();
        let new_session_id = handle.session_id();

        let mut table = self.table.write().await;
        if table.closed {
            return Err(RegistryError::ShuttingDown);
        }
        if self.policy == DuplicateIdPolicy::Reject && table.sessions.contains_key(&id) {
            return Err(RegistryError::DuplicateId(id));
        }

        let replaced = table.sessions.insert(id.clone(), handle);
        drop(table);

        match &replaced {
            Some(old) => {
                info!(device = %id, old = %old.session_id(), new = %new_session_id, "replacing session");
                old.shutdown();
                self.publish(RegistryEvent::Replaced {
                    id,
                    old_session_id: old.session_id(),
                    new_session_id,
                });
            }
            None => {
                info!(device = %id, session = %new_session_id, "session registered");
                self.publish(RegistryEvent::Registered {
                    id,
                    session_id: new_session_id,
                });
            }
        }
        Ok(replaced)
    }

    /// Returns the live session for device `id`, if any.
    pub async fn find_session(&self, id: &str) -> Option<SessionHandle> {
        self.table.read().await.sessions.get(id).cloned()
    }

    /// Removes the entry for `id` only if it still belongs to `session_id`.
    ///
    /// A session replaced by a newer one must not evict its successor when it
    /// finishes closing.  Returns `true` if an entry was removed.
    pub async fn remove_if_current(&self, id: &str, session_id: Uuid) -> bool {
        let mut table = self.table.write().await;
        let is_current = table
            .sessions
            .get(id)
            .is_some_and(|h| h.session_id() == session_id);
        if !is_current {
            debug!(device = %id, session = %session_id, "stale session not removed");
            return false;
        }
        table.sessions.remove(id);
        drop(table);

        info!(device = %id, session = %session_id, "session removed");
        self.publish(RegistryEvent::Removed {
            id: id.to_string(),
            session_id,
        });
        true
    }

    /// Device ids of all registered sessions, sorted.
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.table.read().await.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.table.read().await.sessions.is_empty()
    }

    /// Stops admitting sessions and tells every registered one to shut down.
    ///
    /// Returns the signalled handles so the caller can await
    /// [`SessionHandle::closed`] on each.  Sessions remove themselves as they
    /// finish.  Any later [`register`](Self::register) fails with
    /// [`RegistryError::ShuttingDown`].
    pub async fn shutdown_all(&self) -> Vec<SessionHandle> {
        let handles: Vec<SessionHandle> = {
            let mut table = self.table.write().await;
            table.closed = true;
            table.sessions.values().cloned().collect()
        };
        info!(count = handles.len(), "shutting down all sessions");
        for handle in &handles {
            handle.shutdown();
        }
        handles
    }

    /// Subscribes to registry change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: RegistryEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_handle(id: &str) -> (SessionHandle, SessionControl) {
        SessionHandle::new(ClientInfo::new(id, "sensor1", "temp"), None)
    }

    #[tokio::test]
    async fn test_registry_starts_empty() {
        let registry = SessionRegistry::default();
        assert!(registry.is_empty().await);
        assert!(registry.ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_register_then_find_session() {
        // Arrange
        let registry = SessionRegistry::default();
        let (handle, _ctl) = make_handle("dev-a");
        let session_id = handle.session_id();

        // Act
        let replaced = registry.register(handle).await.unwrap();

        // Assert
        assert!(replaced.is_none());
        let found = registry.find_session("dev-a").await.expect("registered");
        assert_eq!(found.session_id(), session_id);
        assert_eq!(found.info().name, "sensor1");
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_replace_policy_shuts_down_old_session() {
        let registry = SessionRegistry::new(DuplicateIdPolicy::Replace);
        let (old, old_ctl) = make_handle("dev-a");
        let (new, _new_ctl) = make_handle("dev-a");
        let new_id = new.session_id();
        registry.register(old).await.unwrap();

        let replaced = registry.register(new).await.unwrap().expect("old handle returned");

        assert!(*old_ctl.shutdown.borrow(), "old session must be told to stop");
        assert_ne!(replaced.session_id(), new_id);
        assert_eq!(registry.find_session("dev-a").await.unwrap().session_id(), new_id);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_reject_policy_refuses_duplicate() {
        let registry = SessionRegistry::new(DuplicateIdPolicy::Reject);
        let (first, first_ctl) = make_handle("dev-a");
        let first_id = first.session_id();
        registry.register(first).await.unwrap();

        let (second, _ctl) = make_handle("dev-a");
        let result = registry.register(second).await;

        assert_eq!(result.unwrap_err(), RegistryError::DuplicateId("dev-a".into()));
        assert!(!*first_ctl.shutdown.borrow());
        assert_eq!(registry.find_session("dev-a").await.unwrap().session_id(), first_id);
    }

    #[tokio::test]
    async fn test_remove_if_current_ignores_stale_session() {
        let registry = SessionRegistry::default();
        let (old, _old_ctl) = make_handle("dev-a");
        let old_id = old.session_id();
        let (new, _new_ctl) = make_handle("dev-a");
        let new_id = new.session_id();
        registry.register(old).await.unwrap();
        registry.register(new).await.unwrap();

        assert!(!registry.remove_if_current("dev-a", old_id).await);
        assert!(registry.find_session("dev-a").await.is_some());
        assert!(registry.remove_if_current("dev-a", new_id).await);
        assert!(registry.find_session("dev-a").await.is_none());
    }

    #[tokio::test]
    async fn test_ids_are_sorted() {
        let registry = SessionRegistry::default();
        for id in ["c", "a", "b"] {
            let (h, _ctl) = make_handle(id);
            registry.register(h).await.unwrap();
        }
        assert_eq!(registry.ids().await, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_shutdown_all_signals_every_session() {
        let registry = SessionRegistry::default();
        let (a, a_ctl) = make_handle("a");
        let (b, b_ctl) = make_handle("b");
        registry.register(a).await.unwrap();
        registry.register(b).await.unwrap();

        let handles = registry.shutdown_all().await;

        assert_eq!(handles.len(), 2);
        assert!(*a_ctl.shutdown.borrow());
        assert!(*b_ctl.shutdown.borrow());
    }

    #[tokio::test]
    async fn test_register_after_shutdown_all_is_refused() {
        // Arrange
        let registry = SessionRegistry::default();
        let mut events = registry.subscribe();
        registry.shutdown_all().await;

        // Act
        let (late, late_ctl) = make_handle("late");
        let result = registry.register(late).await;

        // Assert
        assert_eq!(result.unwrap_err(), RegistryError::ShuttingDown);
        assert!(registry.is_empty().await);
        assert!(!*late_ctl.shutdown.borrow());
        assert!(events.try_recv().is_err(), "no event for a refused session");
    }

    #[tokio::test]
    async fn test_subscribe_sees_registered_replaced_removed() {
        // Arrange
        let registry = SessionRegistry::default();
        let mut events = registry.subscribe();
        let (first, _c1) = make_handle("dev-a");
        let (second, _c2) = make_handle("dev-a");
        let (first_id, second_id) = (first.session_id(), second.session_id());

        // Act
        registry.register(first).await.unwrap();
        registry.register(second).await.unwrap();
        registry.remove_if_current("dev-a", second_id).await;

        // Assert
        assert_eq!(
            events.recv().await.unwrap(),
            RegistryEvent::Registered { id: "dev-a".into(), session_id: first_id }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            RegistryEvent::Replaced {
                id: "dev-a".into(),
                old_session_id: first_id,
                new_session_id: second_id
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            RegistryEvent::Removed { id: "dev-a".into(), session_id: second_id }
        );
    }

    #[tokio::test]
    async fn test_handle_closed_resolves_when_state_is_closed() {
        let (handle, ctl) = make_handle("dev-a");
        assert_eq!(handle.state(), SessionState::Active);

        ctl.state.send_replace(SessionState::Closed);
        handle.closed().await;

        assert!(handle.state().is_closed());
    }
}
