//! Host sink that mirrors applied batches to viewer links.
//!
//! The render host is authoritative for proxy state; viewers get a
//! best-effort mirror. Each host batch becomes exactly one `batch_update`
//! wire message fanned out to every viewer link's outbound queue, so the
//! per-batch handoff discipline survives the hop downstream.

use network::protocol::{BatchUpdatePayload, EntityUpdatePayload, ParticlePayload, WireMessage};
use network::LinkHandle;
use render_pool::{HostSink, ParticleSpawn, ProxySpawn, ProxyWrite};
use stage_core::Error;

pub struct ViewerSink {
    viewers: Vec<LinkHandle>,
    pending_entities: Vec<EntityUpdatePayload>,
    pending_particles: Vec<ParticlePayload>,
}

impl ViewerSink {
    pub fn new(viewers: Vec<LinkHandle>) -> Self {
        Self {
            viewers,
            pending_entities: Vec::new(),
            pending_particles: Vec::new(),
        }
    }
}

fn coords(v: spatial::Vec3) -> [f64; 3] {
    [v.x as f64, v.y as f64, v.z as f64]
}

impl HostSink for ViewerSink {
    fn spawn(&mut self, _zone: &str, spawn: &ProxySpawn) -> Result<(), Error> {
        self.pending_entities.push(EntityUpdatePayload {
            id: spawn.id.clone(),
            position: Some(coords(spawn.position)),
            transform: None,
            brightness: None,
            glow: None,
            interpolation_ticks: None,
        });
        Ok(())
    }

    fn apply(&mut self, _zone: &str, write: &ProxyWrite) -> Result<(), Error> {
        let position = write
            .position
            .or_else(|| write.transform.map(|t| t.position))
            .map(coords);
        self.pending_entities.push(EntityUpdatePayload {
            id: write.id.clone(),
            position,
            transform: None,
            brightness: write.brightness.map(i64::from),
            glow: write.glow,
            interpolation_ticks: write.interpolation_ticks,
        });
        Ok(())
    }

    fn remove(&mut self, _zone: &str, _id: &str) -> Result<(), Error> {
        // Viewers skip unknown ids on their side; no removal traffic needed.
        Ok(())
    }

    fn particles(&mut self, _zone: &str, particles: &[ParticleSpawn]) -> Result<(), Error> {
        self.pending_particles
            .extend(particles.iter().map(|p| ParticlePayload {
                position: coords(p.position),
                effect: p.effect.clone(),
                count: p.count,
            }));
        Ok(())
    }

    fn commit(&mut self, zone: &str) -> Result<(), Error> {
        if self.pending_entities.is_empty() && self.pending_particles.is_empty() {
            return Ok(());
        }
        let message = WireMessage::BatchUpdate(BatchUpdatePayload {
            zone: zone.to_string(),
            entities: std::mem::take(&mut self.pending_entities),
            particles: std::mem::take(&mut self.pending_particles),
            v: None,
        });
        for viewer in &self.viewers {
            viewer.enqueue(message.clone());
        }
        Ok(())
    }
}
