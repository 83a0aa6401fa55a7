use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod sanitize;

/// Unique identifier for a logical link (capture, relay, viewer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct LinkId(Uuid);

impl LinkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LinkId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Display only the first 8 characters for brevity
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Unified error type for the application.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    #[error("Link error: {0}")]
    Link(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Host apply error: {0}")]
    HostApply(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Number of frequency bands carried by every audio frame.
pub const BAND_COUNT: usize = 5;

/// Snapshot of the capture side's audio analysis for one frame.
///
/// A new snapshot fully replaces the previous one; nothing is merged. The
/// capture tier has already done the DSP work, so every field here is a
/// sanitized, ready-to-consume value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioState {
    /// Per-band energies, each in [0, 1].
    pub bands: [f32; BAND_COUNT],
    /// Overall amplitude in [0, 1].
    pub amplitude: f32,
    /// Whether the capture-side detector flagged this frame as a beat.
    pub is_beat: bool,
    /// Strength of the detected beat in [0, 1].
    pub beat_intensity: f32,
    /// Tempo estimate in beats per minute, when the detector has one.
    pub bpm: Option<f32>,
    /// Confidence of the tempo estimate in [0, 1].
    pub tempo_confidence: f32,
    /// Position within the current beat period in [0, 1).
    pub beat_phase: f32,
    /// Monotonic frame counter from the capture source.
    pub frame_seq: u64,
}

impl Default for AudioState {
    fn default() -> Self {
        Self {
            bands: [0.0; BAND_COUNT],
            amplitude: 0.0,
            is_beat: false,
            beat_intensity: 0.0,
            bpm: None,
            tempo_confidence: 0.0,
            beat_phase: 0.0,
            frame_seq: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_id_display() {
        let link_id = LinkId::new();
        let display = format!("{}", link_id);
        assert_eq!(display.len(), 8);
        assert_eq!(display, &link_id.0.to_string()[..8]);
    }

    #[test]
    fn link_id_equality() {
        let id1 = LinkId::new();
        let id2 = LinkId(id1.0); // Same UUID
        let id3 = LinkId::new(); // Different UUID
        assert_eq!(id1, id2);
        assert_ne!(id1, id3);
    }

    #[test]
    fn audio_state_default_is_silent() {
        let state = AudioState::default();
        assert_eq!(state.bands, [0.0; BAND_COUNT]);
        assert!(!state.is_beat);
        assert!(state.bpm.is_none());
        assert_eq!(state.frame_seq, 0);
    }

    #[test]
    fn error_display() {
        let io_err = Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));
        assert!(format!("{}", io_err).contains("I/O error: file not found"));

        let not_found = Error::NotFound("zone 'stage_left'".to_string());
        assert!(format!("{}", not_found).contains("Resource not found: zone 'stage_left'"));

        let anyhow_err = Error::Other(anyhow::anyhow!("Something went wrong"));
        assert!(format!("{}", anyhow_err).contains("Something went wrong"));
    }
}
