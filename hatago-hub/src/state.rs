//! Per-upstream lifecycle state machine.
//!
//! Six states, an explicit transition table, and a bounded history ring.
//! Transitions are a pure table lookup plus a mutation under one lock,
//! so they never yield; each applied transition is emitted on three
//! event channels (`transition`, `transition:<id>`, `state:<to>`).

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use hatago_core::error::{HubResult, LifecycleError};

use crate::events::EventBus;

/// How many transitions are kept per upstream.
pub const HISTORY_LIMIT: usize = 100;

/// Lifecycle state of one upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpstreamState {
    /// Registered but not connected
    Inactive,
    /// Connect and handshake in progress
    Activating,
    /// Connected and serving
    Active,
    /// Graceful shutdown in progress
    Stopping,
    /// Failed; awaiting removal or re-add
    Error,
    /// Managed outside the hub; no transitions allowed
    Manual,
}

impl UpstreamState {
    /// The transition table. Exclusive: anything not listed is invalid.
    pub fn can_transition_to(self, to: UpstreamState) -> bool {
        use UpstreamState::*;
        matches!(
            (self, to),
            (Inactive, Activating)
                | (Activating, Active)
                | (Activating, Error)
                | (Active, Stopping)
                | (Active, Error)
                | (Stopping, Inactive)
                | (Stopping, Error)
                | (Error, Inactive)
        )
    }

    /// Canonical uppercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inactive => "INACTIVE",
            Self::Activating => "ACTIVATING",
            Self::Active => "ACTIVE",
            Self::Stopping => "STOPPING",
            Self::Error => "ERROR",
            Self::Manual => "MANUAL",
        }
    }
}

impl std::fmt::Display for UpstreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One applied transition.
#[derive(Debug, Clone, Serialize)]
pub struct StateTransition {
    /// The upstream the transition belongs to
    pub upstream_id: String,
    /// State before
    pub from: UpstreamState,
    /// State after
    pub to: UpstreamState,
    /// Optional reason string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When the transition was applied
    pub timestamp: DateTime<Utc>,
}

/// The lifecycle controller for one upstream.
pub struct StateMachine {
    upstream_id: String,
    inner: Mutex<MachineInner>,
    events: Arc<EventBus>,
}

struct MachineInner {
    state: UpstreamState,
    history: VecDeque<StateTransition>,
}

impl StateMachine {
    /// A fresh machine in `INACTIVE`.
    pub fn new(upstream_id: impl Into<String>, events: Arc<EventBus>) -> Self {
        Self {
            upstream_id: upstream_id.into(),
            inner: Mutex::new(MachineInner {
                state: UpstreamState::Inactive,
                history: VecDeque::with_capacity(HISTORY_LIMIT),
            }),
            events,
        }
    }

    /// The current state.
    pub fn state(&self) -> UpstreamState {
        self.inner.lock().unwrap().state
    }

    /// Snapshot of the transition history, oldest first.
    pub fn history(&self) -> Vec<StateTransition> {
        self.inner.lock().unwrap().history.iter().cloned().collect()
    }

    /// Apply one transition.
    ///
    /// The lock serializes concurrent callers: when two race toward the
    /// same target, the first succeeds and the second observes the new
    /// state and is rejected.
    pub fn transition(
        &self,
        to: UpstreamState,
        reason: Option<String>,
    ) -> HubResult<StateTransition> {
        let event = {
            let mut inner = self.inner.lock().unwrap();
            let from = inner.state;
            if !from.can_transition_to(to) {
                return Err(LifecycleError::InvalidTransition {
                    from: from.as_str().to_string(),
                    to: to.as_str().to_string(),
                }
                .into());
            }
            inner.state = to;
            let event = StateTransition {
                upstream_id: self.upstream_id.clone(),
                from,
                to,
                reason,
                timestamp: Utc::now(),
            };
            inner.history.push_back(event.clone());
            if inner.history.len() > HISTORY_LIMIT {
                inner.history.pop_front();
            }
            event
        };

        let payload = serde_json::to_value(&event).unwrap_or(serde_json::Value::Null);
        self.events.emit("transition", &payload);
        self.events
            .emit(&format!("transition:{}", self.upstream_id), &payload);
        self.events.emit(&format!("state:{}", to.as_str()), &payload);
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn machine(id: &str) -> StateMachine {
        StateMachine::new(id, Arc::new(EventBus::new()))
    }

    #[test]
    fn test_full_lifecycle() {
        let machine = machine("s1");
        assert_eq!(machine.state(), UpstreamState::Inactive);

        machine.transition(UpstreamState::Activating, None).unwrap();
        machine.transition(UpstreamState::Active, None).unwrap();
        machine.transition(UpstreamState::Stopping, None).unwrap();
        machine.transition(UpstreamState::Inactive, None).unwrap();

        let history = machine.history();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].from, UpstreamState::Inactive);
        assert_eq!(history[3].to, UpstreamState::Inactive);
    }

    #[test]
    fn test_invalid_transition_rejected_and_state_unchanged() {
        let machine = machine("s1");
        machine.transition(UpstreamState::Activating, None).unwrap();
        machine.transition(UpstreamState::Active, None).unwrap();

        let before = machine.history().len();
        let err = machine
            .transition(UpstreamState::Activating, None)
            .unwrap_err();
        assert!(err.to_string().contains("ACTIVE"));
        assert!(err.to_string().contains("ACTIVATING"));
        assert_eq!(machine.state(), UpstreamState::Active);
        assert_eq!(machine.history().len(), before);
    }

    #[test]
    fn test_manual_is_terminal() {
        use UpstreamState::*;
        for to in [Inactive, Activating, Active, Stopping, Error, Manual] {
            assert!(!Manual.can_transition_to(to));
        }
    }

    #[test]
    fn test_history_ring_is_bounded() {
        let machine = machine("s1");
        machine.transition(UpstreamState::Activating, None).unwrap();
        machine.transition(UpstreamState::Active, None).unwrap();
        for _ in 0..60 {
            machine.transition(UpstreamState::Stopping, None).unwrap();
            machine.transition(UpstreamState::Inactive, None).unwrap();
            machine.transition(UpstreamState::Activating, None).unwrap();
            machine.transition(UpstreamState::Active, None).unwrap();
        }
        assert_eq!(machine.history().len(), HISTORY_LIMIT);
    }

    #[test]
    fn test_transitions_emit_on_three_channels() {
        let events = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        for channel in ["transition", "transition:s1", "state:ACTIVATING"] {
            let counter = Arc::clone(&count);
            events.on(channel, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        let machine = StateMachine::new("s1", Arc::clone(&events));
        machine.transition(UpstreamState::Activating, None).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_racing_transitions_yield_one_success() {
        let machine = Arc::new(machine("s1"));
        machine.transition(UpstreamState::Activating, None).unwrap();

        let results: Vec<_> = (0..2)
            .map(|_| machine.transition(UpstreamState::Active, None))
            .collect();
        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
    }
}
