//! Per-zone proxy pools and the batched-apply service.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use stage_core::Error;

use crate::{
    HostBatch, HostBridge, ParticleSpawn, ProxyKind, ProxySpawn, ProxyUpdate, ProxyWrite,
    RenderProxy,
};

/// Upper bound on proxies in a single zone's pool.
pub const MAX_PROXIES_PER_ZONE: usize = 512;

/// Particle ceiling per batch in full render mode.
pub const PARTICLE_CEILING_FULL: usize = 256;

/// Global rendering intensity, adjustable at runtime from the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    #[default]
    Full,
    Reduced,
    Off,
}

impl RenderMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "full" => Some(RenderMode::Full),
            "reduced" => Some(RenderMode::Reduced),
            "off" => Some(RenderMode::Off),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RenderMode::Full => "full",
            RenderMode::Reduced => "reduced",
            RenderMode::Off => "off",
        }
    }

    fn particle_ceiling(&self) -> usize {
        match self {
            RenderMode::Full => PARTICLE_CEILING_FULL,
            RenderMode::Reduced => PARTICLE_CEILING_FULL / 4,
            RenderMode::Off => 0,
        }
    }
}

/// A zone's fixed collection of long-lived proxies.
#[derive(Debug)]
struct ProxyPool {
    kind: ProxyKind,
    hint: Option<String>,
    /// Creation order; shrink removes from the tail so the first N proxies
    /// survive a resize untouched.
    order: Vec<String>,
    proxies: HashMap<String, RenderProxy>,
}

impl ProxyPool {
    fn new(kind: ProxyKind, hint: Option<String>) -> Self {
        Self {
            kind,
            hint,
            order: Vec::new(),
            proxies: HashMap::new(),
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Owns every zone's proxy pool and funnels all mutation into batched
/// host-thread handoffs.
pub struct PoolService {
    pools: HashMap<String, ProxyPool>,
    bridge: Arc<dyn HostBridge>,
    render_mode: RenderMode,
}

impl PoolService {
    pub fn new(bridge: Arc<dyn HostBridge>) -> Self {
        Self {
            pools: HashMap::new(),
            bridge,
            render_mode: RenderMode::Full,
        }
    }

    pub fn render_mode(&self) -> RenderMode {
        self.render_mode
    }

    pub fn set_render_mode(&mut self, mode: RenderMode) {
        self.render_mode = mode;
    }

    /// Initialize or resize a zone's pool to `target` proxies.
    ///
    /// Incremental by contract: an existing pool only grows or shrinks by
    /// the delta, never a full teardown and recreate. Requests beyond the
    /// per-zone cap are clamped with a warning, never a hard failure.
    /// Returns the pool's new size.
    pub fn init_pool(
        &mut self,
        zone: &str,
        target: usize,
        kind: ProxyKind,
        hint: Option<String>,
    ) -> Result<usize, Error> {
        let target = if target > MAX_PROXIES_PER_ZONE {
            warn!(
                "pool request for zone '{}' clamped from {} to {}",
                zone, target, MAX_PROXIES_PER_ZONE
            );
            MAX_PROXIES_PER_ZONE
        } else {
            target
        };

        let key = spatial::zone_key(zone);
        let pool = self
            .pools
            .entry(key.clone())
            .or_insert_with(|| ProxyPool::new(kind, hint));

        let mut batch = HostBatch::new(key.clone());
        let current = pool.len();

        if target > current {
            for index in current..target {
                let id = format!("{}-{}", key, index);
                let proxy = RenderProxy::new(id.clone(), pool.kind);
                batch.spawns.push(ProxySpawn {
                    id: id.clone(),
                    kind: pool.kind,
                    hint: pool.hint.clone(),
                    position: proxy.last_transform.position,
                });
                pool.order.push(id.clone());
                pool.proxies.insert(id, proxy);
            }
        } else if target < current {
            for id in pool.order.drain(target..) {
                pool.proxies.remove(&id);
                batch.removals.push(id);
            }
        }

        let count = pool.len();
        if !batch.is_empty() {
            self.bridge.submit(batch)?;
        }
        Ok(count)
    }

    /// Apply a batch of property updates to one zone's pool.
    ///
    /// Exactly one host-thread handoff per call regardless of list size,
    /// and zero when there is nothing to ship. Unknown proxy ids are
    /// silently skipped (the pool may have shrunk concurrently). Transforms
    /// are diffed against the last-applied value so an identical transform
    /// never resets in-flight client interpolation. Returns the number of
    /// updates that matched a live proxy.
    pub fn apply_batch(
        &mut self,
        zone: &str,
        updates: &[ProxyUpdate],
        particles: Vec<ParticleSpawn>,
    ) -> Result<usize, Error> {
        let key = spatial::zone_key(zone);
        let pool = self
            .pools
            .get_mut(&key)
            .ok_or_else(|| Error::NotFound(format!("pool for zone '{}'", zone)))?;

        if updates.is_empty() && particles.is_empty() {
            return Ok(0);
        }

        let mut batch = HostBatch::new(key);
        let mut matched = 0;

        for update in updates {
            let Some(proxy) = pool.proxies.get_mut(&update.id) else {
                debug!("skipping update for unknown proxy '{}'", update.id);
                continue;
            };
            matched += 1;

            let mut write = ProxyWrite {
                id: update.id.clone(),
                interpolation_ticks: update.interpolation_ticks,
                ..Default::default()
            };

            if let Some(transform) = update.transform {
                if transform != proxy.last_transform {
                    proxy.last_transform = transform;
                    write.transform = Some(transform);
                }
            } else if let Some(position) = update.position {
                if position != proxy.last_transform.position {
                    proxy.last_transform.position = position;
                    write.position = Some(position);
                }
            }

            if let Some(brightness) = update.brightness {
                let clamped = brightness.clamp(0, 15) as u8;
                proxy.last_brightness = clamped;
                write.brightness = Some(clamped);
            }

            if let Some(glow) = update.glow {
                proxy.last_glow = glow;
                write.glow = Some(glow);
            }

            if !write.is_empty() {
                batch.writes.push(write);
            }
        }

        batch.particles = self.clamp_particles(particles);

        if !batch.is_empty() {
            self.bridge.submit(batch)?;
        }
        Ok(matched)
    }

    /// Show or hide every proxy in a zone, in one handoff.
    pub fn set_visible(&mut self, zone: &str, visible: bool) -> Result<usize, Error> {
        let key = spatial::zone_key(zone);
        let pool = self
            .pools
            .get_mut(&key)
            .ok_or_else(|| Error::NotFound(format!("pool for zone '{}'", zone)))?;

        let mut batch = HostBatch::new(key);
        for id in &pool.order {
            if let Some(proxy) = pool.proxies.get_mut(id) {
                proxy.visible = visible;
                batch.writes.push(ProxyWrite {
                    id: id.clone(),
                    visible: Some(visible),
                    ..Default::default()
                });
            }
        }

        let affected = batch.writes.len();
        if !batch.is_empty() {
            self.bridge.submit(batch)?;
        }
        Ok(affected)
    }

    /// Tear down a zone's pool. Idempotent: a second call for the same zone
    /// is a no-op and reports zero removals.
    pub fn cleanup(&mut self, zone: &str) -> Result<usize, Error> {
        let key = spatial::zone_key(zone);
        let Some(mut pool) = self.pools.remove(&key) else {
            return Ok(0);
        };

        let mut batch = HostBatch::new(key);
        batch.removals = pool.order.drain(..).collect();
        let removed = batch.removals.len();
        if !batch.is_empty() {
            self.bridge.submit(batch)?;
        }
        Ok(removed)
    }

    pub fn entity_count(&self, zone: &str) -> usize {
        self.pools
            .get(&spatial::zone_key(zone))
            .map(|p| p.len())
            .unwrap_or(0)
    }

    pub fn entity_ids(&self, zone: &str) -> Vec<String> {
        self.pools
            .get(&spatial::zone_key(zone))
            .map(|p| p.order.clone())
            .unwrap_or_default()
    }

    pub fn has_pool(&self, zone: &str) -> bool {
        self.pools.contains_key(&spatial::zone_key(zone))
    }

    fn clamp_particles(&self, mut particles: Vec<ParticleSpawn>) -> Vec<ParticleSpawn> {
        let ceiling = self.render_mode.particle_ceiling();
        if particles.len() > ceiling {
            warn!(
                "particle burst clamped from {} to {} ({} mode)",
                particles.len(),
                ceiling,
                self.render_mode.as_str()
            );
            particles.truncate(ceiling);
        }
        particles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Transform;
    use spatial::Vec3;
    use std::sync::Mutex;

    /// Bridge that records every handoff for inspection.
    #[derive(Default)]
    struct RecordingBridge {
        batches: Mutex<Vec<HostBatch>>,
    }

    impl HostBridge for RecordingBridge {
        fn submit(&self, batch: HostBatch) -> Result<(), Error> {
            self.batches.lock().unwrap().push(batch);
            Ok(())
        }
    }

    fn service() -> (PoolService, Arc<RecordingBridge>) {
        let bridge = Arc::new(RecordingBridge::default());
        (PoolService::new(bridge.clone()), bridge)
    }

    fn handoffs(bridge: &RecordingBridge) -> usize {
        bridge.batches.lock().unwrap().len()
    }

    #[test]
    fn init_creates_requested_proxies() {
        let (mut pools, bridge) = service();
        let count = pools.init_pool("Pit", 10, ProxyKind::Block, None).unwrap();
        assert_eq!(count, 10);
        assert_eq!(pools.entity_count("pit"), 10);

        let batches = bridge.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].spawns.len(), 10);
    }

    #[test]
    fn resize_grows_incrementally() {
        let (mut pools, bridge) = service();
        pools.init_pool("pit", 5, ProxyKind::Block, None).unwrap();
        let ids_before = pools.entity_ids("pit");

        // Establish applied state on a surviving proxy.
        let transform = Transform {
            position: Vec3::new(3.0, 0.0, 3.0),
            ..Default::default()
        };
        let update = ProxyUpdate {
            id: "pit-0".to_string(),
            transform: Some(transform),
            ..Default::default()
        };
        pools.apply_batch("pit", &[update.clone()], Vec::new()).unwrap();

        let count = pools.init_pool("pit", 8, ProxyKind::Block, None).unwrap();
        assert_eq!(count, 8);

        // Exactly 3 new spawns in the growth handoff, first 5 ids untouched.
        {
            let batches = bridge.batches.lock().unwrap();
            assert_eq!(batches.last().unwrap().spawns.len(), 3);
            assert!(batches.last().unwrap().removals.is_empty());
        }
        let ids_after = pools.entity_ids("pit");
        assert_eq!(&ids_after[..5], &ids_before[..]);

        // Surviving proxies kept their applied state: the same transform is
        // still suppressed as a duplicate after the resize.
        let before = handoffs(&bridge);
        pools.apply_batch("pit", &[update], Vec::new()).unwrap();
        assert_eq!(handoffs(&bridge), before);
    }

    #[test]
    fn resize_shrinks_from_the_tail() {
        let (mut pools, bridge) = service();
        pools.init_pool("pit", 8, ProxyKind::Block, None).unwrap();
        pools.init_pool("pit", 5, ProxyKind::Block, None).unwrap();

        assert_eq!(pools.entity_count("pit"), 5);
        let batches = bridge.batches.lock().unwrap();
        assert_eq!(batches[1].removals.len(), 3);
        assert!(batches[1].removals.contains(&"pit-7".to_string()));
    }

    #[test]
    fn pool_cap_clamps_with_warning() {
        let (mut pools, _) = service();
        let count = pools
            .init_pool("pit", MAX_PROXIES_PER_ZONE + 100, ProxyKind::Block, None)
            .unwrap();
        assert_eq!(count, MAX_PROXIES_PER_ZONE);
    }

    #[test]
    fn empty_batch_performs_zero_handoffs() {
        let (mut pools, bridge) = service();
        pools.init_pool("pit", 4, ProxyKind::Block, None).unwrap();
        let before = handoffs(&bridge);

        let matched = pools.apply_batch("pit", &[], Vec::new()).unwrap();
        assert_eq!(matched, 0);
        assert_eq!(handoffs(&bridge), before);
    }

    #[test]
    fn many_updates_one_handoff() {
        let (mut pools, bridge) = service();
        pools.init_pool("pit", 16, ProxyKind::Block, None).unwrap();
        let before = handoffs(&bridge);

        let updates: Vec<ProxyUpdate> = (0..16)
            .map(|i| ProxyUpdate {
                id: format!("pit-{}", i),
                position: Some(Vec3::new(i as f32, 0.0, 0.0)),
                brightness: Some(i),
                ..Default::default()
            })
            .collect();

        let matched = pools.apply_batch("pit", &updates, Vec::new()).unwrap();
        assert_eq!(matched, 16);
        assert_eq!(handoffs(&bridge), before + 1);
    }

    #[test]
    fn unknown_ids_skipped_rest_applied() {
        let (mut pools, bridge) = service();
        pools.init_pool("pit", 2, ProxyKind::Block, None).unwrap();

        let updates = vec![
            ProxyUpdate {
                id: "pit-0".to_string(),
                brightness: Some(9),
                ..Default::default()
            },
            ProxyUpdate {
                id: "pit-99".to_string(),
                brightness: Some(9),
                ..Default::default()
            },
            ProxyUpdate {
                id: "pit-1".to_string(),
                brightness: Some(9),
                ..Default::default()
            },
        ];

        let matched = pools.apply_batch("pit", &updates, Vec::new()).unwrap();
        assert_eq!(matched, 2);

        let batches = bridge.batches.lock().unwrap();
        let writes = &batches.last().unwrap().writes;
        assert_eq!(writes.len(), 2);
        assert!(writes.iter().all(|w| w.id != "pit-99"));
    }

    #[test]
    fn identical_transform_suppressed() {
        let (mut pools, bridge) = service();
        pools.init_pool("pit", 1, ProxyKind::Block, None).unwrap();

        let transform = Transform {
            position: Vec3::new(1.0, 2.0, 3.0),
            ..Default::default()
        };
        let update = ProxyUpdate {
            id: "pit-0".to_string(),
            transform: Some(transform),
            ..Default::default()
        };

        pools.apply_batch("pit", &[update.clone()], Vec::new()).unwrap();
        let before = handoffs(&bridge);

        // Same transform again: matched, but nothing shipped.
        let matched = pools.apply_batch("pit", &[update], Vec::new()).unwrap();
        assert_eq!(matched, 1);
        assert_eq!(handoffs(&bridge), before);
    }

    #[test]
    fn brightness_clamped_before_application() {
        let (mut pools, bridge) = service();
        pools.init_pool("pit", 2, ProxyKind::Block, None).unwrap();

        let updates = vec![
            ProxyUpdate {
                id: "pit-0".to_string(),
                brightness: Some(99),
                ..Default::default()
            },
            ProxyUpdate {
                id: "pit-1".to_string(),
                brightness: Some(-3),
                ..Default::default()
            },
        ];
        pools.apply_batch("pit", &updates, Vec::new()).unwrap();

        let batches = bridge.batches.lock().unwrap();
        let writes = &batches.last().unwrap().writes;
        assert_eq!(writes[0].brightness, Some(15));
        assert_eq!(writes[1].brightness, Some(0));
    }

    #[test]
    fn unknown_zone_is_not_found() {
        let (mut pools, _) = service();
        let err = pools.apply_batch("nowhere", &[], Vec::new());
        assert!(matches!(err, Err(Error::NotFound(_))));
    }

    #[test]
    fn cleanup_is_idempotent() {
        let (mut pools, _) = service();
        pools.init_pool("pit", 6, ProxyKind::Block, None).unwrap();

        assert_eq!(pools.cleanup("pit").unwrap(), 6);
        assert_eq!(pools.cleanup("pit").unwrap(), 0);
        assert_eq!(pools.entity_count("pit"), 0);
    }

    #[test]
    fn particles_clamped_by_render_mode() {
        let (mut pools, bridge) = service();
        pools.init_pool("pit", 1, ProxyKind::Block, None).unwrap();
        pools.set_render_mode(RenderMode::Off);

        let particles = vec![ParticleSpawn {
            position: Vec3::default(),
            effect: "note".to_string(),
            count: 4,
        }];
        let before = handoffs(&bridge);
        pools.apply_batch("pit", &[], particles).unwrap();
        // Everything clamped away in off mode: no handoff at all.
        assert_eq!(handoffs(&bridge), before);
    }
}
