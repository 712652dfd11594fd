//! Downstream session management.
//!
//! Sessions are minted on demand (UUIDv4 when the client supplies no id)
//! and expire after a TTL refreshed by every request that carries the
//! session id. Expired sessions are reaped lazily on access and by a
//! 60-second background sweep. Nothing is persisted.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use uuid::Uuid;

use hatago_core::messages::Capabilities;

use crate::events::EventBus;

/// Interval of the background expiry sweep.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// One downstream session.
pub struct Session {
    /// Session id, echoed in the `mcp-session-id` header
    pub id: String,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// Time-to-live since last access
    pub ttl: Duration,
    last_accessed: Mutex<Instant>,
    // tokio's mutex hands the lock out in FIFO order, which is exactly
    // the per-session capability-update contract.
    capabilities: tokio::sync::Mutex<Option<Capabilities>>,
}

impl Session {
    fn new(id: String, ttl: Duration) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            ttl,
            last_accessed: Mutex::new(Instant::now()),
            capabilities: tokio::sync::Mutex::new(None),
        }
    }

    /// Refresh the TTL window.
    pub fn touch(&self) {
        *self.last_accessed.lock().unwrap() = Instant::now();
    }

    /// Whether the TTL window has elapsed.
    pub fn is_expired(&self) -> bool {
        self.last_accessed.lock().unwrap().elapsed() >= self.ttl
    }

    /// Store the client capabilities announced at initialize.
    pub async fn set_capabilities(&self, capabilities: Capabilities) {
        *self.capabilities.lock().await = Some(capabilities);
    }

    /// The client capabilities, when the session has initialized.
    pub async fn capabilities(&self) -> Option<Capabilities> {
        self.capabilities.lock().await.clone()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("expired", &self.is_expired())
            .finish()
    }
}

/// The session store.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    ttl: Duration,
    events: Arc<EventBus>,
}

impl SessionManager {
    /// Create a store with the given default TTL.
    pub fn new(ttl: Duration, events: Arc<EventBus>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
            events,
        }
    }

    /// Fetch the session for `id`, or create one.
    ///
    /// With no id a fresh UUIDv4 session is minted; with an id the
    /// existing session is refreshed, or a session is created bound to
    /// the supplied id. An expired session under the supplied id is
    /// replaced.
    pub fn get_or_create(&self, id: Option<&str>) -> Arc<Session> {
        if let Some(id) = id {
            if let Some(session) = self.get(id) {
                return session;
            }
        }

        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let session = Arc::new(Session::new(id.clone(), self.ttl));
        self.sessions
            .write()
            .unwrap()
            .insert(id.clone(), Arc::clone(&session));
        self.events
            .emit("session:created", &serde_json::json!({ "id": id }));
        session
    }

    /// Fetch a live session, refreshing its TTL. Expired sessions are
    /// reaped on the way.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.read().unwrap().get(id).cloned()?;
        if session.is_expired() {
            self.expire(id);
            return None;
        }
        session.touch();
        Some(session)
    }

    fn expire(&self, id: &str) {
        if self.sessions.write().unwrap().remove(id).is_some() {
            self.events
                .emit("session:expired", &serde_json::json!({ "id": id }));
        }
    }

    /// Remove a session explicitly.
    pub fn destroy(&self, id: &str) -> bool {
        let removed = self.sessions.write().unwrap().remove(id).is_some();
        if removed {
            self.events
                .emit("session:destroyed", &serde_json::json!({ "id": id }));
        }
        removed
    }

    /// Remove every session.
    pub fn destroy_all(&self) -> Vec<String> {
        let drained: Vec<String> = self.sessions.write().unwrap().drain().map(|(id, _)| id).collect();
        for id in &drained {
            self.events
                .emit("session:destroyed", &serde_json::json!({ "id": id }));
        }
        drained
    }

    /// Reap expired sessions; returns the reaped ids.
    pub fn sweep(&self) -> Vec<String> {
        let expired: Vec<String> = {
            let sessions = self.sessions.read().unwrap();
            sessions
                .iter()
                .filter(|(_, session)| session.is_expired())
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in &expired {
            self.expire(id);
        }
        expired
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Run the periodic expiry sweep until the manager is dropped.
pub fn spawn_sweeper(manager: Arc<SessionManager>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            let reaped = manager.sweep();
            if !reaped.is_empty() {
                tracing::debug!(count = reaped.len(), "reaped expired sessions");
            }
        }
    })
}
