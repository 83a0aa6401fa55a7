//! Message routing and dispatch for stagelight.
//!
//! Inbound wire messages flow through decode → sanitize → route → dispatch.
//! The router task owns the zone/stage registries, the proxy pools and the
//! effect registry; it is the single writer for all of them, which is what
//! lets the rest of the system stay lock-free.

mod assist;
mod effects;
mod handler;
mod ingest;

pub use assist::{AssistConfig, BeatAssist};
pub use effects::{BeatEvent, Effect, EffectContext, EffectRegistry};
pub use handler::{ReplySink, RouterCommand, RouterHandler};
