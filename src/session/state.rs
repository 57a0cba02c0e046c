//! Session state machine
//!
//! Owns the single authoritative session state. `begin_transition`,
//! `complete_transition`, `set_error` and `clear_error` are the only
//! mutators; every change is applied atomically under one lock and
//! broadcast to subscribers in order.

use crate::capture::traits::DeviceRef;
use crate::recovery::policy::ErrorRecord;
use crate::utils::error::{SessionError, SessionResult};
use parking_lot::Mutex;
use std::fmt;
use tokio::sync::broadcast;

/// A state a transition can leave from or land on
#[derive(Debug, Clone)]
pub enum StateSnapshot {
    Uninitialized,
    Single(DeviceRef),
    Dual { primary: DeviceRef, secondary: DeviceRef },
}

impl StateSnapshot {
    /// Devices that are active in this state
    pub fn devices(&self) -> Vec<DeviceRef> {
        match self {
            StateSnapshot::Uninitialized => Vec::new(),
            StateSnapshot::Single(device) => vec![device.clone()],
            StateSnapshot::Dual { primary, secondary } => vec![primary.clone(), secondary.clone()],
        }
    }

    fn is_active(&self) -> bool {
        !matches!(self, StateSnapshot::Uninitialized)
    }

    fn label(&self) -> &'static str {
        match self {
            StateSnapshot::Uninitialized => "uninitialized",
            StateSnapshot::Single(_) => "single",
            StateSnapshot::Dual { .. } => "dual",
        }
    }
}

impl PartialEq for StateSnapshot {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (StateSnapshot::Uninitialized, StateSnapshot::Uninitialized) => true,
            (StateSnapshot::Single(a), StateSnapshot::Single(b)) => a.id == b.id,
            (
                StateSnapshot::Dual { primary: p1, secondary: s1 },
                StateSnapshot::Dual { primary: p2, secondary: s2 },
            ) => p1.id == p2.id && s1.id == s2.id,
            _ => false,
        }
    }
}

impl Eq for StateSnapshot {}

impl fmt::Display for StateSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateSnapshot::Uninitialized => write!(f, "Not started"),
            StateSnapshot::Single(device) => write!(f, "Single camera: {}", device.name),
            StateSnapshot::Dual { primary, secondary } => {
                write!(f, "Dual camera: {} + {}", primary.name, secondary.name)
            }
        }
    }
}

/// Current state of the capture session
#[derive(Debug, Clone)]
pub enum SessionState {
    Uninitialized,
    Single(DeviceRef),
    Dual {
        primary: DeviceRef,
        secondary: DeviceRef,
    },
    /// Reconfiguration in flight; always resolves to `Single`, `Dual` or `Error`
    Transitioning {
        from: StateSnapshot,
        to: StateSnapshot,
        progress: String,
    },
    Error(ErrorRecord),
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Uninitialized
    }
}

impl From<StateSnapshot> for SessionState {
    fn from(snapshot: StateSnapshot) -> Self {
        match snapshot {
            StateSnapshot::Uninitialized => SessionState::Uninitialized,
            StateSnapshot::Single(device) => SessionState::Single(device),
            StateSnapshot::Dual { primary, secondary } => SessionState::Dual { primary, secondary },
        }
    }
}

impl SessionState {
    /// The leaf this state corresponds to, if it is one
    pub fn snapshot(&self) -> Option<StateSnapshot> {
        match self {
            SessionState::Uninitialized => Some(StateSnapshot::Uninitialized),
            SessionState::Single(device) => Some(StateSnapshot::Single(device.clone())),
            SessionState::Dual { primary, secondary } => Some(StateSnapshot::Dual {
                primary: primary.clone(),
                secondary: secondary.clone(),
            }),
            SessionState::Transitioning { .. } | SessionState::Error(_) => None,
        }
    }

    /// Devices streaming in this state. A transition reports the devices it
    /// is leaving until it lands.
    pub fn active_devices(&self) -> Vec<DeviceRef> {
        match self {
            SessionState::Transitioning { from, .. } => from.devices(),
            SessionState::Error(_) => Vec::new(),
            other => other.snapshot().map(|s| s.devices()).unwrap_or_default(),
        }
    }

    pub fn is_transitioning(&self) -> bool {
        matches!(self, SessionState::Transitioning { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SessionState::Error(_))
    }

    pub fn error(&self) -> Option<&ErrorRecord> {
        match self {
            SessionState::Error(record) => Some(record),
            _ => None,
        }
    }

    /// Human-readable description for display
    pub fn description(&self) -> String {
        self.to_string()
    }

    fn label(&self) -> String {
        match self {
            SessionState::Transitioning { to, .. } => format!("transitioning to {}", to.label()),
            SessionState::Error(_) => "error".to_string(),
            other => other
                .snapshot()
                .map(|s| s.label().to_string())
                .unwrap_or_default(),
        }
    }
}

/// Transitioning states compare equal regardless of their progress label
impl PartialEq for SessionState {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                SessionState::Transitioning { from: f1, to: t1, .. },
                SessionState::Transitioning { from: f2, to: t2, .. },
            ) => f1 == f2 && t1 == t2,
            (SessionState::Error(a), SessionState::Error(b)) => a == b,
            (a, b) => match (a.snapshot(), b.snapshot()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl Eq for SessionState {}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Transitioning { to, progress, .. } => {
                write!(f, "Switching to {} ({})", to, progress)
            }
            SessionState::Error(record) => write!(f, "Error: {}", record.kind),
            other => match other.snapshot() {
                Some(snapshot) => write!(f, "{}", snapshot),
                None => Ok(()),
            },
        }
    }
}

/// Proof that the holder began the transition currently in flight
#[derive(Debug)]
pub struct TransitionTicket {
    generation: u64,
    pub from: StateSnapshot,
    pub to: StateSnapshot,
}

struct Inner {
    state: SessionState,
    /// Bumped on every mutation; stale tickets are detected by mismatch
    generation: u64,
}

/// Exclusive owner of the session state
pub struct SessionStateMachine {
    inner: Mutex<Inner>,
    events: broadcast::Sender<SessionState>,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Mutex::new(Inner {
                state: SessionState::Uninitialized,
                generation: 0,
            }),
            events,
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.inner.lock().state.clone()
    }

    pub fn description(&self) -> String {
        self.inner.lock().state.description()
    }

    /// Receive every state the machine enters, in order
    pub fn subscribe(&self) -> broadcast::Receiver<SessionState> {
        self.events.subscribe()
    }

    fn publish(&self, inner: &mut Inner, state: SessionState) {
        tracing::debug!("Session state: {} -> {}", inner.state.label(), state.label());
        inner.state = state;
        inner.generation += 1;
        let _ = self.events.send(inner.state.clone());
    }

    /// Enter `Transitioning` towards `to`. Rejected while another transition
    /// is in flight.
    pub fn begin_transition(
        &self,
        to: StateSnapshot,
        progress: impl Into<String>,
    ) -> SessionResult<TransitionTicket> {
        let mut inner = self.inner.lock();

        let from = match &inner.state {
            SessionState::Transitioning { .. } => return Err(SessionError::TransitionInFlight),
            SessionState::Error(_) => {
                return Err(SessionError::IllegalTransition {
                    from: inner.state.label(),
                    to: to.label().to_string(),
                })
            }
            other => other.snapshot().unwrap_or(StateSnapshot::Uninitialized),
        };

        let legal = match (&from, &to) {
            (StateSnapshot::Uninitialized, StateSnapshot::Single(_))
            | (StateSnapshot::Uninitialized, StateSnapshot::Dual { .. })
            | (StateSnapshot::Single(_), StateSnapshot::Dual { .. })
            | (StateSnapshot::Dual { .. }, StateSnapshot::Single(_)) => true,
            // Device change
            (StateSnapshot::Single(a), StateSnapshot::Single(b)) => a.id != b.id,
            _ => false,
        };
        if !legal {
            return Err(SessionError::IllegalTransition {
                from: from.label().to_string(),
                to: to.label().to_string(),
            });
        }

        let progress = progress.into();
        tracing::info!("Beginning transition: {} -> {} ({})", from, to, progress);

        let state = SessionState::Transitioning {
            from: from.clone(),
            to: to.clone(),
            progress,
        };
        self.publish(&mut inner, state);

        Ok(TransitionTicket {
            generation: inner.generation,
            from,
            to,
        })
    }

    /// Land the transition described by `ticket`
    pub fn complete_transition(&self, ticket: TransitionTicket) -> SessionResult<SessionState> {
        let mut inner = self.inner.lock();
        if inner.generation != ticket.generation || !inner.state.is_transitioning() {
            return Err(SessionError::StaleTransition);
        }

        tracing::info!("Transition complete: {}", ticket.to);
        self.publish(&mut inner, ticket.to.into());
        Ok(inner.state.clone())
    }

    /// Resolve a transition its owner gave up on. No-op when the ticket is
    /// already stale.
    pub fn abandon_transition(&self, ticket: TransitionTicket, record: ErrorRecord) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != ticket.generation || !inner.state.is_transitioning() {
            return false;
        }

        tracing::warn!("Transition to {} abandoned: {}", ticket.to, record.kind);
        self.publish(&mut inner, SessionState::Error(record));
        true
    }

    /// Enter `Error` from any state, resolving an in-flight transition
    pub fn set_error(&self, record: ErrorRecord) {
        let mut inner = self.inner.lock();
        tracing::warn!("Session error: {} (retry {})", record.kind, record.retry_count);
        self.publish(&mut inner, SessionState::Error(record));
    }

    /// Leave `Error` for the caller-supplied state
    pub fn clear_error(&self, return_to: StateSnapshot) -> SessionResult<()> {
        let mut inner = self.inner.lock();
        if !inner.state.is_error() {
            return Err(SessionError::NotInError);
        }
        if !return_to.is_active() {
            return Err(SessionError::IllegalTransition {
                from: "error".to_string(),
                to: return_to.label().to_string(),
            });
        }

        tracing::info!("Clearing session error, restoring {}", return_to);
        self.publish(&mut inner, return_to.into());
        Ok(())
    }
}
