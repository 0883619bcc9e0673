//! Connection lifecycle state machine.
//!
//! [`Lifecycle`] is pure: every input (a lifecycle call, a socket event, a
//! timer firing) is a method that updates the single authoritative
//! [`ConnectionState`] and returns the [`Effect`]s the caller must perform.
//! It never touches a socket or a clock itself, so every transition can be
//! exercised without a runtime.
//!
//! ```text
//! disconnected --start()--> connecting
//! connecting --opened--> connected
//! connecting --error/close--> disconnected (reconnect scheduled)
//! connected --close (non-normal)--> disconnected (reconnect scheduled)
//! connected --close (normal)--> disconnected (terminal)
//! any --stop()--> disconnected (terminal until start())
//! ```
//!
//! Each socket is opened under a fresh generation number. Events carrying a
//! generation other than the live one belong to a socket that was already
//! abandoned and are ignored.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use super::backoff::ReconnectPolicy;
use super::protocol::{InboundMessage, NORMAL_CLOSURE};

/// Connectivity as shown to the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Read-only snapshot of the connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Reconnects scheduled since the last successful open.
    pub attempt_count: u32,
    /// When the last non-heartbeat message arrived.
    pub last_message_at: Option<DateTime<Utc>>,
    /// When the last heartbeat arrived.
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// When the pending reconnect fires, if one is armed.
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn is_reconnect_pending(&self) -> bool {
        self.next_retry_at.is_some()
    }
}

/// Work the owner of a [`Lifecycle`] must carry out.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Open a new socket tagged with `generation`.
    Open { generation: u64 },
    /// Close the socket tagged with `generation`.
    Close { generation: u64, code: u16 },
    /// Arm the single reconnect timer.
    ArmReconnect { delay: Duration },
    /// Disarm the reconnect timer.
    CancelReconnect,
    /// Hand a message to the router.
    Route(InboundMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Not running. Only `start()` leaves this phase.
    Stopped,
    /// The reconnect limit was reached.
    Exhausted,
    Connecting { generation: u64 },
    Open { generation: u64 },
    /// The socket reported an error; its close event is still to come.
    Failing { generation: u64 },
    /// Waiting for the reconnect timer.
    Backoff,
}

impl Phase {
    fn status(self) -> ConnectionStatus {
        match self {
            Phase::Stopped | Phase::Backoff => ConnectionStatus::Disconnected,
            Phase::Exhausted | Phase::Failing { .. } => ConnectionStatus::Error,
            Phase::Connecting { .. } => ConnectionStatus::Connecting,
            Phase::Open { .. } => ConnectionStatus::Connected,
        }
    }

    fn generation(self) -> Option<u64> {
        match self {
            Phase::Connecting { generation }
            | Phase::Open { generation }
            | Phase::Failing { generation } => Some(generation),
            Phase::Stopped | Phase::Exhausted | Phase::Backoff => None,
        }
    }
}

/// The connection state machine.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    phase: Phase,
    state: ConnectionState,
    policy: ReconnectPolicy,
    last_generation: u64,
}

impl Lifecycle {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            phase: Phase::Stopped,
            state: ConnectionState::default(),
            policy,
            last_generation: 0,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Generation of the socket that may currently exist, if any.
    pub fn live_generation(&self) -> Option<u64> {
        self.phase.generation()
    }

    /// Generation of the socket that may be written to, if connected.
    pub fn sendable_generation(&self) -> Option<u64> {
        match self.phase {
            Phase::Open { generation } => Some(generation),
            _ => None,
        }
    }

    /// Whether the manager has been stopped (or gave up) and awaits `start()`.
    pub fn is_stopped(&self) -> bool {
        matches!(self.phase, Phase::Stopped | Phase::Exhausted)
    }

    /// Begin connecting. A no-op unless stopped; a pending reconnect is kept.
    pub fn start(&mut self) -> Vec<Effect> {
        if !self.is_stopped() {
            tracing::debug!(status = %self.state.status, "start ignored; already running");
            return Vec::new();
        }
        self.state.attempt_count = 0;
        vec![self.open_next()]
    }

    /// Close everything and disable auto-reconnect until `start()`.
    pub fn stop(&mut self) -> Vec<Effect> {
        let effects = match self.phase {
            Phase::Connecting { generation }
            | Phase::Open { generation }
            | Phase::Failing { generation } => vec![Effect::Close {
                generation,
                code: NORMAL_CLOSURE,
            }],
            Phase::Backoff => vec![Effect::CancelReconnect],
            Phase::Stopped | Phase::Exhausted => Vec::new(),
        };
        self.state.next_retry_at = None;
        self.enter(Phase::Stopped);
        effects
    }

    /// The reconnect timer fired.
    pub fn reconnect_due(&mut self) -> Vec<Effect> {
        if self.phase != Phase::Backoff {
            return Vec::new();
        }
        self.state.next_retry_at = None;
        vec![self.open_next()]
    }

    /// The socket finished its handshake.
    pub fn opened(&mut self, generation: u64) -> Vec<Effect> {
        if self.phase != (Phase::Connecting { generation }) {
            tracing::debug!(generation, "ignoring open from superseded socket");
            return Vec::new();
        }
        self.state.attempt_count = 0;
        self.enter(Phase::Open { generation });
        tracing::info!(generation, "live connection established");
        Vec::new()
    }

    /// The socket reported an error. Its close event follows.
    pub fn errored(&mut self, generation: u64, reason: &str) -> Vec<Effect> {
        match self.phase {
            Phase::Connecting { generation: live } | Phase::Open { generation: live }
                if live == generation =>
            {
                tracing::warn!(generation, reason, "live connection error");
                self.enter(Phase::Failing { generation });
            }
            _ => {}
        }
        Vec::new()
    }

    /// The socket closed.
    pub fn closed(&mut self, generation: u64, code: u16, now: DateTime<Utc>) -> Vec<Effect> {
        if self.phase.generation() != Some(generation) {
            return Vec::new();
        }

        if code == NORMAL_CLOSURE {
            tracing::info!(generation, "live connection closed normally");
            self.enter(Phase::Stopped);
            return Vec::new();
        }

        let attempt = self.state.attempt_count;
        if self.policy.is_exhausted(attempt) {
            tracing::warn!(attempt, "reconnect limit reached; giving up");
            self.enter(Phase::Exhausted);
            return Vec::new();
        }

        let delay = self.policy.delay(attempt);
        self.state.attempt_count = attempt.saturating_add(1);
        self.state.next_retry_at = TimeDelta::from_std(delay).ok().map(|d| now + d);
        self.enter(Phase::Backoff);
        tracing::info!(
            generation,
            code,
            attempt = self.state.attempt_count,
            delay_ms = delay.as_millis() as u64,
            "live connection lost; reconnect scheduled"
        );
        vec![Effect::ArmReconnect { delay }]
    }

    /// A text frame arrived.
    ///
    /// Heartbeats only refresh `last_heartbeat_at`. Malformed frames are
    /// dropped without touching the state.
    pub fn frame(&mut self, generation: u64, text: &str, now: DateTime<Utc>) -> Vec<Effect> {
        if self.phase != (Phase::Open { generation }) {
            return Vec::new();
        }

        let message = match InboundMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed frame");
                return Vec::new();
            }
        };

        if message.is_heartbeat() {
            self.state.last_heartbeat_at = Some(now);
            return Vec::new();
        }

        self.state.last_message_at = Some(now);
        vec![Effect::Route(message)]
    }

    fn open_next(&mut self) -> Effect {
        self.last_generation += 1;
        let generation = self.last_generation;
        self.enter(Phase::Connecting { generation });
        Effect::Open { generation }
    }

    fn enter(&mut self, phase: Phase) {
        self.phase = phase;
        self.state.status = phase.status();
    }
}
