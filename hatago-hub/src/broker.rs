//! Progress and notification fan-out.
//!
//! The broker owns three maps: progress routes (token to owning
//! session/upstream), per-session outbound channels installed by the
//! downstream adapters, and standalone SSE subscribers. A progress
//! notification is delivered only to the session that registered its
//! token; list_changed-style notifications broadcast to every attached
//! channel. Channels are bounded: a consumer that is gone or too slow
//! to drain its buffer fails the write and is dropped on that first
//! failure (it re-attaches on its next connect).

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use hatago_core::messages::{JsonRpcNotification, ProgressParams, ProgressToken};

/// How many undelivered notifications one channel may buffer before its
/// consumer counts as too slow.
pub const NOTIFICATION_BUFFER: usize = 256;

/// Where progress updates for one token go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressRoute {
    /// The session that supplied the token
    pub session_id: String,
    /// The upstream serving the call
    pub upstream_id: String,
}

/// Outbound notification channel for one session or subscriber.
pub type NotificationReceiver = mpsc::Receiver<JsonRpcNotification>;

/// The notification broker.
#[derive(Default)]
pub struct Broker {
    routes: RwLock<HashMap<String, ProgressRoute>>,
    sessions: RwLock<HashMap<String, mpsc::Sender<JsonRpcNotification>>>,
    subscribers: RwLock<HashMap<String, mpsc::Sender<JsonRpcNotification>>>,
    token_subscribers: RwLock<HashMap<String, String>>,
}

impl Broker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    // --- progress routes ---------------------------------------------

    /// Install a route for `token`. Overwrites any stale route under the
    /// same token.
    pub fn register_route(&self, token: &ProgressToken, session_id: &str, upstream_id: &str) {
        self.routes.write().unwrap().insert(
            token.to_string(),
            ProgressRoute {
                session_id: session_id.to_string(),
                upstream_id: upstream_id.to_string(),
            },
        );
    }

    /// Remove the route for `token`.
    pub fn remove_route(&self, token: &ProgressToken) {
        self.routes.write().unwrap().remove(&token.to_string());
    }

    /// Look up the route for `token`.
    pub fn route(&self, token: &ProgressToken) -> Option<ProgressRoute> {
        self.routes.read().unwrap().get(&token.to_string()).cloned()
    }

    /// Drop every route owned by one session.
    pub fn remove_routes_for_session(&self, session_id: &str) {
        self.routes
            .write()
            .unwrap()
            .retain(|_, route| route.session_id != session_id);
    }

    /// Drop every route pointing at one upstream.
    pub fn remove_routes_for_upstream(&self, upstream_id: &str) {
        self.routes
            .write()
            .unwrap()
            .retain(|_, route| route.upstream_id != upstream_id);
    }

    /// How many routes reference `upstream_id`.
    pub fn routes_for_upstream(&self, upstream_id: &str) -> usize {
        self.routes
            .read()
            .unwrap()
            .values()
            .filter(|route| route.upstream_id == upstream_id)
            .count()
    }

    // --- session channels --------------------------------------------

    /// Install the outbound channel for a session, replacing any earlier
    /// one. The adapter drains the returned receiver.
    pub fn attach_session(&self, session_id: &str) -> NotificationReceiver {
        let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);
        self.sessions
            .write()
            .unwrap()
            .insert(session_id.to_string(), tx);
        rx
    }

    /// Remove a session's outbound channel and its routes.
    pub fn detach_session(&self, session_id: &str) {
        self.sessions.write().unwrap().remove(session_id);
        self.remove_routes_for_session(session_id);
    }

    // --- standalone subscribers --------------------------------------

    /// Register a standalone SSE subscriber.
    pub fn subscribe(&self, client_id: &str) -> NotificationReceiver {
        let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);
        self.subscribers
            .write()
            .unwrap()
            .insert(client_id.to_string(), tx);
        rx
    }

    /// Remove a standalone subscriber and its token registrations.
    pub fn unsubscribe(&self, client_id: &str) {
        self.subscribers.write().unwrap().remove(client_id);
        self.token_subscribers
            .write()
            .unwrap()
            .retain(|_, id| id != client_id);
    }

    /// Bind a progress token to a standalone subscriber.
    pub fn register_progress_token(&self, token: &ProgressToken, client_id: &str) {
        self.token_subscribers
            .write()
            .unwrap()
            .insert(token.to_string(), client_id.to_string());
    }

    // --- delivery ----------------------------------------------------

    /// Deliver a progress notification to exactly the session (and any
    /// standalone subscriber) that registered its token.
    ///
    /// Returns whether a route existed.
    pub fn deliver_progress(&self, params: &ProgressParams) -> bool {
        let Some(route) = self.route(&params.progress_token) else {
            debug!(token = %params.progress_token, "progress for unknown token dropped");
            return false;
        };

        let notification = JsonRpcNotification::new(
            "notifications/progress",
            serde_json::to_value(params).unwrap_or(Value::Null),
        );

        let delivered = {
            let sessions = self.sessions.read().unwrap();
            match sessions.get(&route.session_id) {
                Some(tx) => tx.try_send(notification.clone()).is_ok(),
                None => false,
            }
        };
        if !delivered {
            debug!(
                session = %route.session_id,
                token = %params.progress_token,
                "session channel gone or stalled, dropping it"
            );
            self.sessions.write().unwrap().remove(&route.session_id);
        }

        let subscriber = self
            .token_subscribers
            .read()
            .unwrap()
            .get(&params.progress_token.to_string())
            .cloned();
        if let Some(client_id) = subscriber {
            let failed = {
                let subscribers = self.subscribers.read().unwrap();
                match subscribers.get(&client_id) {
                    Some(tx) => tx.try_send(notification).is_err(),
                    None => true,
                }
            };
            if failed {
                warn!(client = %client_id, "subscriber gone or stalled, dropping");
                self.unsubscribe(&client_id);
            }
        }

        true
    }

    /// Broadcast a notification to every attached session channel and
    /// standalone subscriber.
    ///
    /// A channel whose consumer is gone, or whose buffer is full because
    /// the consumer cannot keep up, fails the write and is removed after
    /// that one failure.
    pub fn broadcast(&self, notification: &JsonRpcNotification) {
        let dead_sessions: Vec<String> = {
            let sessions = self.sessions.read().unwrap();
            sessions
                .iter()
                .filter(|(_, tx)| tx.try_send(notification.clone()).is_err())
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in dead_sessions {
            debug!(session = %id, "dropping dead or stalled session channel");
            self.sessions.write().unwrap().remove(&id);
        }

        let dead_subscribers: Vec<String> = {
            let subscribers = self.subscribers.read().unwrap();
            subscribers
                .iter()
                .filter(|(_, tx)| tx.try_send(notification.clone()).is_err())
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in dead_subscribers {
            debug!(client = %id, "dropping dead or stalled subscriber");
            self.unsubscribe(&id);
        }
    }
}
