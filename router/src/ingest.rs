//! Sanitized conversion from raw wire payloads into internal types.
//!
//! Every numeric field crossing this boundary goes through the sanitize
//! helpers: non-finite values take the field's documented default, finite
//! out-of-range values clamp to the nearest bound. Defaults are 0.0 for
//! unit-interval audio fields and the origin for world coordinates.

use network::protocol::{
    AudioStatePayload, EntityUpdatePayload, ParticlePayload, TransformPayload,
};
use render_pool::{ParticleSpawn, ProxyUpdate, Transform};
use spatial::Vec3;
use stage_core::sanitize::{sanitize_bpm, sanitize_coord, sanitize_phase, sanitize_unit};
use stage_core::{AudioState, Error, BAND_COUNT};

/// Largest particle count a single burst may request.
const MAX_PARTICLE_COUNT: u32 = 64;

/// Build an immutable audio snapshot from a wire payload.
///
/// The band array is fixed at exactly [`BAND_COUNT`] elements; any other
/// arity is a malformed payload. Individual values are clamped, never
/// rejected.
pub fn audio_state(payload: &AudioStatePayload) -> Result<AudioState, Error> {
    if payload.bands.len() != BAND_COUNT {
        return Err(Error::Validation(format!(
            "bands must have exactly {} elements, got {}",
            BAND_COUNT,
            payload.bands.len()
        )));
    }

    let mut bands = [0.0f32; BAND_COUNT];
    for (slot, value) in bands.iter_mut().zip(&payload.bands) {
        *slot = sanitize_unit(*value, 0.0);
    }

    Ok(AudioState {
        bands,
        amplitude: sanitize_unit(payload.amplitude, 0.0),
        is_beat: payload.is_beat,
        beat_intensity: sanitize_unit(payload.beat_intensity, 0.0),
        bpm: sanitize_bpm(payload.bpm),
        tempo_confidence: payload
            .tempo_confidence
            .map(|v| sanitize_unit(v, 0.0))
            .unwrap_or(0.0),
        beat_phase: payload
            .beat_phase
            .map(|v| sanitize_phase(v, 0.0))
            .unwrap_or(0.0),
        frame_seq: payload.frame,
    })
}

pub fn vec3(raw: &[f64; 3]) -> Vec3 {
    Vec3::new(
        sanitize_coord(raw[0]),
        sanitize_coord(raw[1]),
        sanitize_coord(raw[2]),
    )
}

fn transform(raw: &TransformPayload) -> Transform {
    Transform {
        position: vec3(&raw.position),
        scale: vec3(&raw.scale),
        yaw_degrees: spatial::normalize_rotation(sanitize_coord(raw.yaw)),
    }
}

/// Convert one wire entity update. Brightness stays an integer here; the
/// pool clamps it into `0..=15` at application time.
pub fn proxy_update(entity: &EntityUpdatePayload) -> ProxyUpdate {
    ProxyUpdate {
        id: entity.id.clone(),
        position: entity.position.as_ref().map(vec3),
        transform: entity.transform.as_ref().map(transform),
        brightness: entity
            .brightness
            .map(|b| b.clamp(i32::MIN as i64, i32::MAX as i64) as i32),
        glow: entity.glow,
        interpolation_ticks: entity.interpolation_ticks,
    }
}

pub fn particles(raw: &[ParticlePayload]) -> Vec<ParticleSpawn> {
    raw.iter()
        .map(|p| ParticleSpawn {
            position: vec3(&p.position),
            effect: p.effect.clone(),
            count: p.count.clamp(1, MAX_PARTICLE_COUNT),
        })
        .collect()
}
