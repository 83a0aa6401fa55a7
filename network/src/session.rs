//! Per-link connection state machine.
//!
//! The tracker is pure state so the transition rules are testable without
//! sockets or timers; the supervisor in `link` drives it from async tasks.

use std::time::{Duration, Instant};

use crate::backoff::{Backoff, BackoffPolicy};

/// Connection state of one logical link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No connection and none being attempted.
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Handshake acknowledged; traffic flows.
    Connected,
    /// Connection lost; retrying on a backoff schedule.
    Reconnecting,
}

/// Point-in-time view of a link session for diagnostics and tests.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: LinkState,
    pub backoff_ms: u64,
    pub attempt_count: u32,
    pub missed_acks: u32,
    pub last_heartbeat_sent_at: Option<Instant>,
    pub last_heartbeat_ack_at: Option<Instant>,
}

/// Drives the `Disconnected → Connecting → Connected ⇄ Reconnecting`
/// machine and owns the backoff schedule.
#[derive(Debug)]
pub struct SessionTracker {
    state: LinkState,
    backoff: Backoff,
    missed_threshold: u32,
    attempt_count: u32,
    missed_acks: u32,
    awaiting_ack: bool,
    last_heartbeat_sent_at: Option<Instant>,
    last_heartbeat_ack_at: Option<Instant>,
}

impl SessionTracker {
    pub fn new(policy: BackoffPolicy, missed_threshold: u32) -> Self {
        Self {
            state: LinkState::Disconnected,
            backoff: Backoff::new(policy),
            // A single dropped packet must not tear down a healthy link.
            missed_threshold: missed_threshold.max(2),
            attempt_count: 0,
            missed_acks: 0,
            awaiting_ack: false,
            last_heartbeat_sent_at: None,
            last_heartbeat_ack_at: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// A connection attempt is starting. From `Disconnected` this enters
    /// `Connecting`; retries while `Reconnecting` stay in `Reconnecting`.
    pub fn begin_connect(&mut self) {
        if self.state == LinkState::Disconnected {
            self.state = LinkState::Connecting;
        }
    }

    /// A connection or handshake attempt failed. Multiplies the backoff
    /// and returns the jittered delay to wait before retrying.
    pub fn connect_failed(&mut self) -> Duration {
        self.attempt_count += 1;
        self.state = LinkState::Reconnecting;
        self.backoff.record_failure();
        self.backoff.delay()
    }

    /// The remote acknowledged the handshake. Only now does backoff reset
    /// to its floor; a bare socket open is not enough.
    pub fn handshake_acked(&mut self, now: Instant) {
        self.state = LinkState::Connected;
        self.backoff.reset();
        self.missed_acks = 0;
        self.awaiting_ack = false;
        self.last_heartbeat_ack_at = Some(now);
    }

    /// An established connection dropped (send failure, reader error, or
    /// the missed-ack threshold). Returns the delay before the first retry;
    /// the drop itself is not a failed attempt, so backoff is not
    /// multiplied here.
    pub fn connection_lost(&mut self) -> Duration {
        self.state = LinkState::Reconnecting;
        self.awaiting_ack = false;
        self.backoff.delay()
    }

    /// Explicit shutdown.
    pub fn disconnected(&mut self) {
        self.state = LinkState::Disconnected;
        self.awaiting_ack = false;
        self.missed_acks = 0;
    }

    /// A heartbeat probe is being sent. If the previous probe was never
    /// acknowledged it counts as one consecutive miss.
    pub fn heartbeat_sent(&mut self, now: Instant) {
        if self.awaiting_ack {
            self.missed_acks += 1;
        }
        self.awaiting_ack = true;
        self.last_heartbeat_sent_at = Some(now);
    }

    /// A heartbeat acknowledgment arrived; the miss streak resets.
    pub fn heartbeat_acked(&mut self, now: Instant) {
        self.awaiting_ack = false;
        self.missed_acks = 0;
        self.last_heartbeat_ack_at = Some(now);
    }

    /// Whether the consecutive-miss streak has crossed the threshold.
    pub fn heartbeat_expired(&self) -> bool {
        self.missed_acks >= self.missed_threshold
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            backoff_ms: self.backoff.current_ms(),
            attempt_count: self.attempt_count,
            missed_acks: self.missed_acks,
            last_heartbeat_sent_at: self.last_heartbeat_sent_at,
            last_heartbeat_ack_at: self.last_heartbeat_ack_at,
        }
    }
}
