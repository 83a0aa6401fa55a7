//! The render host's cooperative tick loop.
//!
//! One logical frame runs at a fixed cadence. Each tick drains the command
//! queue and performs every proxy mutation synchronously within the tick
//! boundary, with no re-entrant callbacks and no per-proxy thread
//! crossings. The mpsc channel feeding the loop is the single sanctioned
//! handoff point from the decode side.

use std::time::Duration;

use log::{debug, warn};
use stage_core::Error;
use tokio::sync::mpsc;

use crate::{HostBatch, HostBridge, ParticleSpawn, ProxySpawn, ProxyWrite};

/// Batches drained per tick. Keeps a tick's work bounded no matter how fast
/// the decode side produces.
const MAX_BATCHES_PER_TICK: usize = 64;

/// Default queue depth between decode tasks and the render tick.
const DEFAULT_CHANNEL_CAPACITY: usize = 128;

/// Applies resolved writes to the actual host objects.
///
/// Per-proxy operations are independent: a failure applying one proxy's
/// property must not prevent writes to the remaining proxies in the same
/// batch, so each method reports its own result.
pub trait HostSink: Send {
    fn spawn(&mut self, zone: &str, spawn: &ProxySpawn) -> Result<(), Error>;
    fn apply(&mut self, zone: &str, write: &ProxyWrite) -> Result<(), Error>;
    fn remove(&mut self, zone: &str, id: &str) -> Result<(), Error>;
    fn particles(&mut self, zone: &str, particles: &[ParticleSpawn]) -> Result<(), Error>;

    /// Called once after each batch's items have been applied. Sinks that
    /// buffer per-batch output (e.g. mirroring to viewers) flush here.
    fn commit(&mut self, _zone: &str) -> Result<(), Error> {
        Ok(())
    }
}

/// Producer half of the render handoff. One `submit` is one channel send.
#[derive(Clone)]
pub struct ChannelBridge {
    tx: mpsc::Sender<HostBatch>,
}

impl HostBridge for ChannelBridge {
    fn submit(&self, batch: HostBatch) -> Result<(), Error> {
        match self.tx.try_send(batch) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(batch)) => {
                // Stale visual updates are worse than missing ones; drop the
                // newest rather than stall the decode side.
                warn!(
                    "render queue full, dropping batch for zone '{}'",
                    batch.zone
                );
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::HostApply(
                "render tick loop has shut down".to_string(),
            )),
        }
    }
}

/// Create the bridge/receiver pair connecting decode tasks to a tick loop.
pub fn host_channel(capacity: usize) -> (ChannelBridge, mpsc::Receiver<HostBatch>) {
    let capacity = if capacity == 0 {
        DEFAULT_CHANNEL_CAPACITY
    } else {
        capacity
    };
    let (tx, rx) = mpsc::channel(capacity);
    (ChannelBridge { tx }, rx)
}

/// The render thread's tick loop.
pub struct RenderTick {
    rx: mpsc::Receiver<HostBatch>,
    sink: Box<dyn HostSink>,
    interval: Duration,
}

impl RenderTick {
    pub fn new(rx: mpsc::Receiver<HostBatch>, sink: Box<dyn HostSink>, interval: Duration) -> Self {
        Self { rx, sink, interval }
    }

    /// Run until the bridge side is dropped.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if self.drain_tick().is_none() {
                debug!("render bridge closed, stopping tick loop");
                break;
            }
        }
    }

    /// Drain up to the per-tick ceiling of pending batches. Returns `None`
    /// once the channel is closed and empty.
    fn drain_tick(&mut self) -> Option<usize> {
        let mut drained = 0;
        while drained < MAX_BATCHES_PER_TICK {
            match self.rx.try_recv() {
                Ok(batch) => {
                    self.apply(&batch);
                    drained += 1;
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => return None,
            }
        }
        Some(drained)
    }

    fn apply(&mut self, batch: &HostBatch) {
        for spawn in &batch.spawns {
            if let Err(e) = self.sink.spawn(&batch.zone, spawn) {
                warn!("failed to spawn proxy '{}': {}", spawn.id, e);
            }
        }
        for write in &batch.writes {
            if let Err(e) = self.sink.apply(&batch.zone, write) {
                warn!("failed to apply write to proxy '{}': {}", write.id, e);
            }
        }
        for id in &batch.removals {
            if let Err(e) = self.sink.remove(&batch.zone, id) {
                warn!("failed to remove proxy '{}': {}", id, e);
            }
        }
        if !batch.particles.is_empty() {
            if let Err(e) = self.sink.particles(&batch.zone, &batch.particles) {
                warn!("failed to spawn particles in zone '{}': {}", batch.zone, e);
            }
        }
        if let Err(e) = self.sink.commit(&batch.zone) {
            warn!("failed to commit batch for zone '{}': {}", batch.zone, e);
        }
    }
}
