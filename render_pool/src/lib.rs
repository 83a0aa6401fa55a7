//! Render-proxy pool for stagelight.
//!
//! Render proxies are long-lived, reusable renderable objects mutated in
//! place rather than recreated each frame. Creation is the most expensive
//! operation in the whole pipeline, so pools grow and shrink incrementally
//! and all per-frame mutation flows through one batched handoff to the
//! render thread.

use serde::{Deserialize, Serialize};
use spatial::Vec3;
use stage_core::Error;

mod pool;
mod tick;

pub use pool::{PoolService, RenderMode, MAX_PROXIES_PER_ZONE, PARTICLE_CEILING_FULL};
pub use tick::{host_channel, ChannelBridge, HostSink, RenderTick};

/// Visual category of a render proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyKind {
    Block,
    Item,
    Text,
}

impl ProxyKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "block" => Some(ProxyKind::Block),
            "item" => Some(ProxyKind::Item),
            "text" => Some(ProxyKind::Text),
            _ => None,
        }
    }
}

/// Full placement of a proxy: position, per-axis scale and yaw.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub scale: Vec3,
    pub yaw_degrees: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::default(),
            scale: Vec3::new(1.0, 1.0, 1.0),
            yaw_degrees: 0.0,
        }
    }
}

/// A pooled render proxy and the last property values pushed to the host.
///
/// The last-applied values let `apply_batch` suppress redundant transform
/// writes, which would otherwise reset the client side's in-flight
/// interpolation.
#[derive(Debug, Clone)]
pub struct RenderProxy {
    pub id: String,
    pub kind: ProxyKind,
    pub last_transform: Transform,
    pub last_brightness: u8,
    pub last_glow: bool,
    pub visible: bool,
}

impl RenderProxy {
    fn new(id: String, kind: ProxyKind) -> Self {
        Self {
            id,
            kind,
            last_transform: Transform::default(),
            last_brightness: 15,
            last_glow: false,
            visible: true,
        }
    }
}

/// An ephemeral, write-only instruction for one proxy.
///
/// Optional fields are applied only if present, so unrelated properties are
/// left untouched. `brightness` is clamped into `0..=15` at application
/// time. When both `transform` and `position` are present, the full
/// transform wins.
#[derive(Debug, Clone, Default)]
pub struct ProxyUpdate {
    pub id: String,
    pub position: Option<Vec3>,
    pub transform: Option<Transform>,
    pub brightness: Option<i32>,
    pub glow: Option<bool>,
    pub interpolation_ticks: Option<u32>,
}

/// A particle burst request riding alongside a proxy batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleSpawn {
    pub position: Vec3,
    pub effect: String,
    pub count: u32,
}

/// Creation order for a new proxy, shipped once at pool init/grow.
#[derive(Debug, Clone)]
pub struct ProxySpawn {
    pub id: String,
    pub kind: ProxyKind,
    pub hint: Option<String>,
    pub position: Vec3,
}

/// A resolved property write for one proxy. All fields have already been
/// clamped and diffed; the render thread applies them verbatim.
#[derive(Debug, Clone, Default)]
pub struct ProxyWrite {
    pub id: String,
    pub position: Option<Vec3>,
    pub transform: Option<Transform>,
    pub brightness: Option<u8>,
    pub glow: Option<bool>,
    pub visible: Option<bool>,
    pub interpolation_ticks: Option<u32>,
}

impl ProxyWrite {
    fn is_empty(&self) -> bool {
        self.position.is_none()
            && self.transform.is_none()
            && self.brightness.is_none()
            && self.glow.is_none()
            && self.visible.is_none()
    }
}

/// One host-thread handoff: everything the render thread must do for a zone
/// in a single tick crossing.
#[derive(Debug, Clone, Default)]
pub struct HostBatch {
    pub zone: String,
    pub spawns: Vec<ProxySpawn>,
    pub writes: Vec<ProxyWrite>,
    pub removals: Vec<String>,
    pub particles: Vec<ParticleSpawn>,
}

impl HostBatch {
    fn new(zone: String) -> Self {
        Self {
            zone,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.spawns.is_empty()
            && self.writes.is_empty()
            && self.removals.is_empty()
            && self.particles.is_empty()
    }
}

/// The only sanctioned crossing point from decode threads into the render
/// thread. One `submit` call is one handoff, regardless of batch size.
pub trait HostBridge: Send + Sync {
    fn submit(&self, batch: HostBatch) -> Result<(), Error>;
}
