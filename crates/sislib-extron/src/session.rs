//! Session store: per-key caches, command locks, and keepalive pollers.
//!
//! Every [`SessionKey`] maps to one [`Session`]. The session owns the
//! command lock that serializes round trips (`tokio::sync::Mutex` queues
//! waiters in FIFO order) and the lazily filled device classification.
//! Pollers are tracked separately behind their own lock so that stopping
//! one never waits for a command in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sislib_core::{DeviceCategory, SessionKey};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Login state of a session's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Negotiating,
    Ready,
}

/// Device identity learned from the `2I` query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: DeviceCategory,
    pub description: String,
}

/// State guarded by the command lock.
#[derive(Debug, Default)]
pub struct SessionState {
    pub link: LinkState,
    /// Model name parsed from the login banner.
    pub model: Option<String>,
}

/// One logical control connection.
#[derive(Debug)]
pub struct Session {
    key: SessionKey,
    state: tokio::sync::Mutex<SessionState>,
    classification: OnceCell<Classification>,
}

impl Session {
    fn new(key: SessionKey) -> Self {
        Session {
            key,
            state: tokio::sync::Mutex::new(SessionState::default()),
            classification: OnceCell::new(),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Acquire the command lock.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, SessionState> {
        self.state.lock().await
    }

    pub fn classification_cell(&self) -> &OnceCell<Classification> {
        &self.classification
    }

    pub fn classification(&self) -> Option<&Classification> {
        self.classification.get()
    }

    /// Cached model name, waiting for any command in flight.
    pub async fn model(&self) -> Option<String> {
        self.state.lock().await.model.clone()
    }

    pub async fn link_state(&self) -> LinkState {
        self.state.lock().await.link
    }
}

// ---------------------------------------------------------------
// Poller registry
// ---------------------------------------------------------------

struct Poller {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct PollerRegistry {
    enabled: bool,
    pollers: HashMap<SessionKey, Poller>,
}

/// Registry of sessions and their keepalive pollers.
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionKey, Arc<Session>>>,
    pollers: Mutex<PollerRegistry>,
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionStore {
    pub fn new(polling_enabled: bool) -> Self {
        SessionStore {
            sessions: Mutex::new(HashMap::new()),
            pollers: Mutex::new(PollerRegistry {
                enabled: polling_enabled,
                pollers: HashMap::new(),
            }),
        }
    }

    /// Get the session for `key`, creating it on first use.
    pub fn session(&self, key: &SessionKey) -> Arc<Session> {
        let mut sessions = locked(&self.sessions);
        sessions
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(session = %key, "new session");
                Arc::new(Session::new(key.clone()))
            })
            .clone()
    }

    pub fn get(&self, key: &SessionKey) -> Option<Arc<Session>> {
        locked(&self.sessions).get(key).cloned()
    }

    pub fn len(&self) -> usize {
        locked(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget a session and stop its poller.
    ///
    /// Callers holding the old `Arc<Session>` finish their command; the next
    /// request for the key starts from a fresh session.
    pub fn remove(&self, key: &SessionKey) -> bool {
        let mut sessions = locked(&self.sessions);
        let removed = sessions.remove(key).is_some();
        self.stop_poller(key);
        removed
    }

    /// Whether pollers may be started.
    pub fn polling_enabled(&self) -> bool {
        locked(&self.pollers).enabled
    }

    /// Start a poller for `session` unless one is running, polling is
    /// disabled, or the session has been removed from the store.
    ///
    /// `spawn` receives the cancellation token for the new task.
    pub fn start_poller<F>(&self, session: &Arc<Session>, spawn: F) -> bool
    where
        F: FnOnce(CancellationToken) -> JoinHandle<()>,
    {
        let key = session.key();
        // Held until the poller is registered so `remove` cannot interleave.
        let sessions = locked(&self.sessions);
        if !sessions.get(key).is_some_and(|s| Arc::ptr_eq(s, session)) {
            debug!(session = %key, "session is gone, no poller started");
            return false;
        }
        let mut registry = locked(&self.pollers);
        if !registry.enabled {
            return false;
        }
        if let Some(existing) = registry.pollers.get(key) {
            if !existing.task.is_finished() {
                return false;
            }
        }
        let cancel = CancellationToken::new();
        let task = spawn(cancel.clone());
        registry.pollers.insert(key.clone(), Poller { cancel, task });
        drop(registry);
        drop(sessions);
        debug!(session = %key, "keepalive poller started");
        true
    }

    /// Cancel the poller for `key`.
    pub fn stop_poller(&self, key: &SessionKey) -> bool {
        match locked(&self.pollers).pollers.remove(key) {
            Some(poller) => {
                poller.cancel.cancel();
                debug!(session = %key, "keepalive poller stopped");
                true
            }
            None => false,
        }
    }

    /// Cancel every poller and disable auto-start. Returns how many were
    /// cancelled.
    pub fn stop_all_pollers(&self) -> usize {
        let mut registry = locked(&self.pollers);
        registry.enabled = false;
        let count = registry.pollers.len();
        for (_, poller) in registry.pollers.drain() {
            poller.cancel.cancel();
        }
        debug!(count, "all keepalive pollers stopped");
        count
    }

    /// Re-enable auto-start. Pollers come back with the next command.
    pub fn enable_polling(&self) {
        locked(&self.pollers).enabled = true;
    }

    pub fn has_poller(&self, key: &SessionKey) -> bool {
        locked(&self.pollers)
            .pollers
            .get(key)
            .is_some_and(|p| !p.task.is_finished())
    }

    pub fn poller_count(&self) -> usize {
        locked(&self.pollers)
            .pollers
            .values()
            .filter(|p| !p.task.is_finished())
            .count()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        SessionStore::new(true)
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.len())
            .field("pollers", &self.poller_count())
            .finish()
    }
}
