//! Beat-phase assist: synthesizes beat events the capture-side detector
//! missed.
//!
//! Some detectors under-report beats on busy material. When the tempo
//! estimate is trustworthy and the reported phase sits at the edge of a
//! beat period, the assist projects the beat the detector should have
//! flagged and feeds it down the same dispatch path as a real one. A
//! per-zone cooldown keeps phase jitter around the wrap point from firing
//! several synthetic beats for one real beat.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use stage_core::AudioState;

use crate::effects::BeatEvent;

/// Assist tunables.
#[derive(Debug, Clone)]
pub struct AssistConfig {
    /// Minimum tempo confidence before any projection happens.
    pub confidence_threshold: f32,
    /// Phase at or beyond which we are "at the edge" of the beat period.
    pub phase_edge: f32,
    /// Nominal duration of one render frame, used to project whether the
    /// phase will wrap before the next snapshot arrives.
    pub frame_dt: Duration,
    /// Cooldown as a fraction of the beat period at the reported tempo.
    pub cooldown_beat_fraction: f32,
    /// Cooldown floor for very fast tempi.
    pub min_cooldown: Duration,
    /// Floor for projected-beat intensity so quiet passages still read.
    pub min_intensity: f32,
}

impl Default for AssistConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            phase_edge: 0.95,
            frame_dt: Duration::from_millis(50),
            cooldown_beat_fraction: 0.6,
            min_cooldown: Duration::from_millis(150),
            min_intensity: 0.2,
        }
    }
}

/// Per-zone assist state.
#[derive(Debug, Default)]
pub struct BeatAssist {
    config: AssistConfig,
    last_fired: HashMap<String, Instant>,
}

impl BeatAssist {
    pub fn new(config: AssistConfig) -> Self {
        Self {
            config,
            last_fired: HashMap::new(),
        }
    }

    /// Decide whether to synthesize a projected beat for `zone`.
    ///
    /// Fires only when the snapshot carries no real beat, the tempo
    /// estimate is confident and present, and the phase either sits past
    /// the edge window or will wrap before the next frame. Once fired, the
    /// zone's cooldown gates further projections no matter how many
    /// qualifying snapshots arrive.
    pub fn maybe_project(
        &mut self,
        zone: &str,
        audio: &AudioState,
        now: Instant,
    ) -> Option<BeatEvent> {
        if audio.is_beat {
            return None;
        }
        if audio.tempo_confidence < self.config.confidence_threshold {
            return None;
        }
        let bpm = audio.bpm?;

        let phase_per_frame = bpm / 60.0 * self.config.frame_dt.as_secs_f32();
        let at_edge = audio.beat_phase >= self.config.phase_edge
            || audio.beat_phase + phase_per_frame >= 1.0;
        if !at_edge {
            return None;
        }

        let cooldown = self.cooldown_for(bpm);
        if let Some(last) = self.last_fired.get(zone) {
            if now.duration_since(*last) < cooldown {
                return None;
            }
        }
        self.last_fired.insert(zone.to_string(), now);

        Some(BeatEvent {
            intensity: audio.amplitude.max(self.config.min_intensity).min(1.0),
            projected: true,
        })
    }

    /// Drop cooldown state for a deleted zone.
    pub fn forget_zone(&mut self, zone: &str) {
        self.last_fired.remove(zone);
    }

    fn cooldown_for(&self, bpm: f32) -> Duration {
        let beat_period = Duration::from_secs_f32(60.0 / bpm);
        beat_period
            .mul_f32(self.config.cooldown_beat_fraction)
            .max(self.config.min_cooldown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(bpm: Option<f32>, confidence: f32, phase: f32) -> AudioState {
        AudioState {
            amplitude: 0.6,
            bpm,
            tempo_confidence: confidence,
            beat_phase: phase,
            ..AudioState::default()
        }
    }

    #[test]
    fn confident_edge_phase_fires_once() {
        let mut assist = BeatAssist::new(AssistConfig::default());
        let now = Instant::now();

        let beat = assist.maybe_project("pit", &snapshot(Some(140.0), 0.9, 0.95), now);
        let beat = beat.expect("should project a beat");
        assert!(beat.projected);
        assert_eq!(beat.intensity, 0.6);
    }

    #[test]
    fn cooldown_swallows_repeat_triggers() {
        let mut assist = BeatAssist::new(AssistConfig::default());
        let now = Instant::now();
        let state = snapshot(Some(140.0), 0.9, 0.95);

        assert!(assist.maybe_project("pit", &state, now).is_some());
        // Same qualifying payload a frame later: still inside cooldown.
        let next_frame = now + Duration::from_millis(50);
        assert!(assist.maybe_project("pit", &state, next_frame).is_none());
    }

    #[test]
    fn cooldown_expires_with_the_beat_period() {
        let mut assist = BeatAssist::new(AssistConfig::default());
        let now = Instant::now();
        let state = snapshot(Some(140.0), 0.9, 0.95);

        assert!(assist.maybe_project("pit", &state, now).is_some());
        // 140 bpm -> ~428 ms period, cooldown 60% of that (~257 ms).
        let later = now + Duration::from_millis(300);
        assert!(assist.maybe_project("pit", &state, later).is_some());
    }

    #[test]
    fn low_confidence_never_fires() {
        let mut assist = BeatAssist::new(AssistConfig::default());
        let state = snapshot(Some(140.0), 0.3, 0.95);
        assert!(assist.maybe_project("pit", &state, Instant::now()).is_none());
    }

    #[test]
    fn mid_phase_never_fires() {
        let mut assist = BeatAssist::new(AssistConfig::default());
        let state = snapshot(Some(140.0), 0.82, 0.2);
        assert!(assist.maybe_project("pit", &state, Instant::now()).is_none());
    }

    #[test]
    fn projected_wrap_within_next_frame_fires() {
        let mut assist = BeatAssist::new(AssistConfig::default());
        // 140 bpm advances phase ~0.117 per 50 ms frame: 0.9 wraps next frame.
        let state = snapshot(Some(140.0), 0.9, 0.9);
        assert!(assist.maybe_project("pit", &state, Instant::now()).is_some());
    }

    #[test]
    fn missing_bpm_never_fires() {
        let mut assist = BeatAssist::new(AssistConfig::default());
        let state = snapshot(None, 0.9, 0.99);
        assert!(assist.maybe_project("pit", &state, Instant::now()).is_none());
    }

    #[test]
    fn real_beat_frames_are_left_alone() {
        let mut assist = BeatAssist::new(AssistConfig::default());
        let mut state = snapshot(Some(140.0), 0.9, 0.95);
        state.is_beat = true;
        assert!(assist.maybe_project("pit", &state, Instant::now()).is_none());
    }

    #[test]
    fn zones_cool_down_independently() {
        let mut assist = BeatAssist::new(AssistConfig::default());
        let now = Instant::now();
        let state = snapshot(Some(140.0), 0.9, 0.95);

        assert!(assist.maybe_project("pit", &state, now).is_some());
        assert!(assist.maybe_project("balcony", &state, now).is_some());
        assert!(assist.maybe_project("pit", &state, now).is_none());
    }

    #[test]
    fn quiet_passages_keep_a_floor_intensity() {
        let mut assist = BeatAssist::new(AssistConfig::default());
        let mut state = snapshot(Some(140.0), 0.9, 0.95);
        state.amplitude = 0.05;

        let beat = assist.maybe_project("pit", &state, Instant::now()).unwrap();
        assert_eq!(beat.intensity, 0.2);
    }
}
