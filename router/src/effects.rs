//! Audio-reactive effects dispatched by the router.
//!
//! Effects are a closed capability (activate, deactivate, tick, on_beat)
//! behind a registry of factories keyed by stable id strings. New effect
//! types register a factory; nothing inherits from anything.

use std::collections::HashMap;

use log::{debug, warn};
use render_pool::{ParticleSpawn, PoolService, ProxyKind, ProxyUpdate};
use settings_manager::EffectSettings;
use spatial::{Zone, ZoneRegistry};
use stage_core::{AudioState, Error, BAND_COUNT};

/// A beat, real or projected, flowing to the effect layer.
#[derive(Debug, Clone, PartialEq)]
pub struct BeatEvent {
    /// Strength in [0, 1]. Real beats carry the detector's intensity;
    /// projected beats derive theirs from the frame amplitude.
    pub intensity: f32,
    /// Whether this beat was synthesized by the phase assist.
    pub projected: bool,
}

/// What an effect sees when it runs: its zone's definition and the pool
/// service to write through.
pub struct EffectContext<'a> {
    pub zone: &'a Zone,
    pub pools: &'a mut PoolService,
}

/// One active audio-reactive layer bound to a zone.
pub trait Effect: Send {
    fn id(&self) -> &str;
    /// Registry key of the zone this effect renders into.
    fn zone(&self) -> &str;
    fn activate(&mut self, ctx: &mut EffectContext) -> Result<(), Error>;
    /// Tear down whatever the effect set up. The zone may already be gone,
    /// so only the pool service is available here.
    fn deactivate(&mut self, pools: &mut PoolService) -> Result<(), Error>;
    fn tick(&mut self, audio: &AudioState, ctx: &mut EffectContext) -> Result<(), Error>;
    fn on_beat(&mut self, beat: &BeatEvent, ctx: &mut EffectContext) -> Result<(), Error>;
}

pub type EffectFactory = Box<dyn Fn(String, &EffectSettings) -> Box<dyn Effect> + Send>;

/// Factories keyed by effect id, plus the currently active instances.
#[derive(Default)]
pub struct EffectRegistry {
    factories: HashMap<String, EffectFactory>,
    active: Vec<Box<dyn Effect>>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in effects available.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("band_columns", |zone, settings| {
            Box::new(BandColumns {
                zone,
                settings: settings.clone(),
            })
        });
        registry.register("beat_flash", |zone, settings| {
            Box::new(BeatFlash {
                zone,
                settings: settings.clone(),
            })
        });
        registry
    }

    pub fn register<F>(&mut self, id: &str, factory: F)
    where
        F: Fn(String, &EffectSettings) -> Box<dyn Effect> + Send + 'static,
    {
        self.factories.insert(id.to_string(), Box::new(factory));
    }

    /// Instantiate and activate an effect on a zone.
    pub fn activate(
        &mut self,
        effect_id: &str,
        zone_name: &str,
        settings: &EffectSettings,
        zones: &ZoneRegistry,
        pools: &mut PoolService,
    ) -> Result<(), Error> {
        let factory = self
            .factories
            .get(effect_id)
            .ok_or_else(|| Error::NotFound(format!("effect '{}'", effect_id)))?;
        let zone = zones
            .get(zone_name)
            .ok_or_else(|| Error::NotFound(format!("zone '{}'", zone_name)))?;

        let mut effect = factory(zone.key(), settings);
        effect.activate(&mut EffectContext { zone, pools })?;
        self.active.push(effect);
        Ok(())
    }

    /// Deactivate and drop every effect bound to `zone`. Returns how many
    /// were removed.
    pub fn deactivate_zone(&mut self, zone: &str, pools: &mut PoolService) -> usize {
        let key = spatial::zone_key(zone);
        let mut removed = 0;
        let mut remaining = Vec::with_capacity(self.active.len());
        for mut effect in self.active.drain(..) {
            if effect.zone() == key {
                if let Err(e) = effect.deactivate(pools) {
                    warn!("effect '{}' failed to deactivate: {}", effect.id(), e);
                }
                removed += 1;
            } else {
                remaining.push(effect);
            }
        }
        self.active = remaining;
        removed
    }

    pub fn tick_all(&mut self, audio: &AudioState, zones: &ZoneRegistry, pools: &mut PoolService) {
        for effect in &mut self.active {
            let Some(zone) = zones.get(effect.zone()) else {
                debug!("effect '{}' zone '{}' is gone", effect.id(), effect.zone());
                continue;
            };
            if let Err(e) = effect.tick(audio, &mut EffectContext { zone, pools }) {
                warn!("effect '{}' tick failed: {}", effect.id(), e);
            }
        }
    }

    pub fn beat_all(&mut self, beat: &BeatEvent, zones: &ZoneRegistry, pools: &mut PoolService) {
        for effect in &mut self.active {
            let Some(zone) = zones.get(effect.zone()) else {
                continue;
            };
            if let Err(e) = effect.on_beat(beat, &mut EffectContext { zone, pools }) {
                warn!("effect '{}' beat dispatch failed: {}", effect.id(), e);
            }
        }
    }

    /// Dispatch a beat only to effects on one zone (the assist path).
    pub fn beat_zone(
        &mut self,
        zone_key: &str,
        beat: &BeatEvent,
        zones: &ZoneRegistry,
        pools: &mut PoolService,
    ) {
        for effect in &mut self.active {
            if effect.zone() != zone_key {
                continue;
            }
            let Some(zone) = zones.get(zone_key) else {
                continue;
            };
            if let Err(e) = effect.on_beat(beat, &mut EffectContext { zone, pools }) {
                warn!("effect '{}' beat dispatch failed: {}", effect.id(), e);
            }
        }
    }

    /// Distinct zone keys with at least one active effect.
    pub fn active_zones(&self) -> Vec<String> {
        let mut zones: Vec<String> = self.active.iter().map(|e| e.zone().to_string()).collect();
        zones.sort();
        zones.dedup();
        zones
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn insert_active(&mut self, effect: Box<dyn Effect>) {
        self.active.push(effect);
    }
}

/// Columns of proxies whose height and brightness track one frequency band.
struct BandColumns {
    zone: String,
    settings: EffectSettings,
}

impl Effect for BandColumns {
    fn id(&self) -> &str {
        "band_columns"
    }

    fn zone(&self) -> &str {
        &self.zone
    }

    fn activate(&mut self, ctx: &mut EffectContext) -> Result<(), Error> {
        ctx.pools
            .init_pool(&self.zone, self.settings.proxy_count, ProxyKind::Block, None)?;
        Ok(())
    }

    fn deactivate(&mut self, pools: &mut PoolService) -> Result<(), Error> {
        pools.cleanup(&self.zone)?;
        Ok(())
    }

    fn tick(&mut self, audio: &AudioState, ctx: &mut EffectContext) -> Result<(), Error> {
        let ids = ctx.pools.entity_ids(&self.zone);
        if ids.is_empty() {
            return Ok(());
        }
        let band = self.settings.band.min(BAND_COUNT - 1);
        let energy = audio.bands[band];
        let span = (ids.len().saturating_sub(1)).max(1) as f32;

        let brightness_range = (15 - self.settings.base_brightness).max(0) as f32;
        let brightness = self.settings.base_brightness + (audio.amplitude * brightness_range) as i32;

        let updates: Vec<ProxyUpdate> = ids
            .iter()
            .enumerate()
            .map(|(index, id)| {
                let u = index as f32 / span;
                ProxyUpdate {
                    id: id.clone(),
                    position: Some(ctx.zone.local_to_world(u, energy, 0.5)),
                    brightness: Some(brightness),
                    interpolation_ticks: Some(2),
                    ..Default::default()
                }
            })
            .collect();

        ctx.pools.apply_batch(&self.zone, &updates, Vec::new())?;
        Ok(())
    }

    fn on_beat(&mut self, beat: &BeatEvent, ctx: &mut EffectContext) -> Result<(), Error> {
        let updates: Vec<ProxyUpdate> = ctx
            .pools
            .entity_ids(&self.zone)
            .into_iter()
            .map(|id| ProxyUpdate {
                id,
                brightness: Some(self.settings.beat_brightness),
                glow: Some(beat.intensity >= 0.5),
                ..Default::default()
            })
            .collect();
        ctx.pools.apply_batch(&self.zone, &updates, Vec::new())?;
        Ok(())
    }
}

/// Glow pulse plus a particle burst at the zone center on every beat.
struct BeatFlash {
    zone: String,
    settings: EffectSettings,
}

impl Effect for BeatFlash {
    fn id(&self) -> &str {
        "beat_flash"
    }

    fn zone(&self) -> &str {
        &self.zone
    }

    fn activate(&mut self, ctx: &mut EffectContext) -> Result<(), Error> {
        ctx.pools
            .init_pool(&self.zone, self.settings.proxy_count, ProxyKind::Block, None)?;
        Ok(())
    }

    fn deactivate(&mut self, pools: &mut PoolService) -> Result<(), Error> {
        pools.cleanup(&self.zone)?;
        Ok(())
    }

    fn tick(&mut self, _audio: &AudioState, _ctx: &mut EffectContext) -> Result<(), Error> {
        Ok(())
    }

    fn on_beat(&mut self, beat: &BeatEvent, ctx: &mut EffectContext) -> Result<(), Error> {
        let updates: Vec<ProxyUpdate> = ctx
            .pools
            .entity_ids(&self.zone)
            .into_iter()
            .map(|id| ProxyUpdate {
                id,
                glow: Some(true),
                brightness: Some(self.settings.beat_brightness),
                ..Default::default()
            })
            .collect();

        let particles = vec![ParticleSpawn {
            position: ctx.zone.local_to_world(0.5, 0.5, 0.5),
            effect: "flash".to_string(),
            count: 1 + (beat.intensity * 15.0) as u32,
        }];

        ctx.pools.apply_batch(&self.zone, &updates, particles)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use render_pool::{HostBatch, HostBridge};
    use spatial::{StageRegistry, Vec3};
    use std::sync::{Arc, Mutex};

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

    fn fixtures() -> (ZoneRegistry, StageRegistry, PoolService, Arc<RecordingBridge>) {
        let mut zones = ZoneRegistry::new();
        zones
            .create(
                spatial::Zone::new(
                    "pit",
                    "main",
                    Vec3::new(0.0, 64.0, 0.0),
                    Vec3::new(10.0, 5.0, 10.0),
                    0.0,
                )
                .unwrap(),
            )
            .unwrap();
        let bridge = Arc::new(RecordingBridge::default());
        let pools = PoolService::new(bridge.clone());
        (zones, StageRegistry::new(), pools, bridge)
    }

    #[test]
    fn activation_builds_the_zone_pool() {
        let (zones, _stages, mut pools, _bridge) = fixtures();
        let mut registry = EffectRegistry::with_builtins();

        registry
            .activate("band_columns", "pit", &EffectSettings::default(), &zones, &mut pools)
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(pools.entity_count("pit"), 16);
    }

    #[test]
    fn unknown_effect_id_is_not_found() {
        let (zones, _stages, mut pools, _bridge) = fixtures();
        let mut registry = EffectRegistry::with_builtins();

        let err = registry.activate("lasers", "pit", &EffectSettings::default(), &zones, &mut pools);
        assert!(matches!(err, Err(Error::NotFound(_))));
    }

    #[test]
    fn tick_moves_columns_with_band_energy() {
        let (zones, _stages, mut pools, bridge) = fixtures();
        let mut registry = EffectRegistry::with_builtins();
        registry
            .activate("band_columns", "pit", &EffectSettings::default(), &zones, &mut pools)
            .unwrap();
        let before = bridge.batches.lock().unwrap().len();

        let audio = AudioState {
            bands: [0.8, 0.0, 0.0, 0.0, 0.0],
            amplitude: 0.5,
            ..AudioState::default()
        };
        registry.tick_all(&audio, &zones, &mut pools);

        let batches = bridge.batches.lock().unwrap();
        // One batched handoff for the whole tick, not one per proxy.
        assert_eq!(batches.len(), before + 1);
        let writes = &batches.last().unwrap().writes;
        assert_eq!(writes.len(), 16);
        // Column height follows band energy: y = 64 + 0.8 * 5.
        let position = writes[0].position.unwrap();
        assert!((position.y - 68.0).abs() < 1e-3);
    }

    #[test]
    fn beat_flash_emits_particles_with_the_glow_batch() {
        let (zones, _stages, mut pools, bridge) = fixtures();
        let mut registry = EffectRegistry::with_builtins();
        registry
            .activate("beat_flash", "pit", &EffectSettings::default(), &zones, &mut pools)
            .unwrap();

        registry.beat_all(
            &BeatEvent {
                intensity: 1.0,
                projected: false,
            },
            &zones,
            &mut pools,
        );

        let batches = bridge.batches.lock().unwrap();
        let last = batches.last().unwrap();
        assert!(!last.particles.is_empty());
        assert!(last.writes.iter().all(|w| w.glow == Some(true)));
    }

    #[test]
    fn deactivate_zone_cleans_up_its_pool() {
        let (zones, _stages, mut pools, _bridge) = fixtures();
        let mut registry = EffectRegistry::with_builtins();
        registry
            .activate("band_columns", "pit", &EffectSettings::default(), &zones, &mut pools)
            .unwrap();

        let removed = registry.deactivate_zone("pit", &mut pools);
        assert_eq!(removed, 1);
        assert!(registry.is_empty());
        assert_eq!(pools.entity_count("pit"), 0);
    }

    #[test]
    fn active_zones_deduplicates() {
        let (zones, _stages, mut pools, _bridge) = fixtures();
        let mut registry = EffectRegistry::with_builtins();
        registry
            .activate("band_columns", "pit", &EffectSettings::default(), &zones, &mut pools)
            .unwrap();
        registry
            .activate("beat_flash", "pit", &EffectSettings::default(), &zones, &mut pools)
            .unwrap();

        assert_eq!(registry.active_zones(), vec!["pit".to_string()]);
    }
}
