//! Connectivity layer for stagelight.
//!
//! Every logical link (capture to relay, relay to render host, render host
//! to viewer) is wrapped in the same reliability machinery: heartbeat
//! liveness, exponential-backoff reconnection, and a bounded outbound queue
//! that favors freshness over completeness.

pub mod backoff;
pub mod events;
pub mod link;
pub mod protocol;
pub mod queue;
pub mod session;
pub mod udp;

pub use backoff::{Backoff, BackoffPolicy};
pub use events::LinkEvent;
pub use link::{LinkConfig, LinkHandle, LinkSupervisor, SessionPair, SessionRx, SessionTx, Transport};
pub use protocol::{DecodeError, WireMessage};
pub use queue::OutboundQueue;
pub use session::{LinkState, SessionSnapshot, SessionTracker};
