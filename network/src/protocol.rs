//! The JSON wire protocol shared by every link.
//!
//! Messages are JSON objects with a mandatory `type` tag and an optional
//! `v` version field. Minor versions are additive-only, so unknown fields
//! are ignored on ingestion and optional fields carry defaults.

use serde::{Deserialize, Serialize};
use stage_core::{Error, LinkId};

/// Maximum size of a UDP payload we expect to handle.
pub const MAX_UDP_PAYLOAD_SIZE: usize = 8192;

/// Protocol version advertised in outbound messages.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Every message that can cross a link, inbound or outbound.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// A full audio analysis snapshot from the capture tier.
    AudioState(AudioStatePayload),

    /// A batch of proxy property updates for one zone.
    BatchUpdate(BatchUpdatePayload),

    /// Initialize or resize a zone's proxy pool.
    InitPool(InitPoolPayload),

    /// Create a zone or mutate its placement.
    SetZoneConfig(ZoneConfigPayload),

    /// Switch the global render intensity.
    SetRenderMode {
        mode: String,
        #[serde(default)]
        v: Option<String>,
    },

    /// Show or hide every proxy in a zone.
    SetVisible {
        zone: String,
        visible: bool,
        #[serde(default)]
        v: Option<String>,
    },

    /// Destroy a zone. Its proxy pool is torn down first so no orphan
    /// proxies survive.
    DeleteZone {
        zone: String,
        #[serde(default)]
        v: Option<String>,
    },

    /// Request a listing of all registered zones.
    ListZones {
        #[serde(default)]
        v: Option<String>,
    },

    /// Liveness probe; the remote answers with `pong`.
    Ping {
        #[serde(default)]
        seq: Option<u64>,
    },

    /// Liveness acknowledgment.
    Pong {
        #[serde(default)]
        seq: Option<u64>,
    },

    /// Link handshake: sent once per (re)connection attempt.
    Hello { link: LinkId, role: String },

    /// Handshake acknowledgment. Receiving this completes the handshake;
    /// only then does reconnection backoff reset.
    HelloAck { link: LinkId },

    // --- Replies ---
    PoolInitialized {
        zone: String,
        count: usize,
    },
    BatchUpdated {
        updated: usize,
    },
    Zones {
        zones: Vec<ZoneSummary>,
    },
    Zone {
        zone: ZoneSummary,
    },
    VisibilityUpdated {
        zone: String,
        visible: bool,
    },
    RenderModeUpdated {
        mode: String,
    },
    ZoneDeleted {
        zone: String,
    },
    Error {
        message: String,
    },
}

/// Raw audio-state fields as they arrive off the wire. Everything numeric
/// is `f64` here; sanitization into internal ranges happens in the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioStatePayload {
    pub bands: Vec<f64>,
    pub amplitude: f64,
    pub is_beat: bool,
    pub beat_intensity: f64,
    #[serde(default)]
    pub bpm: Option<f64>,
    /// Accepted under `tempo_confidence` or the legacy `tempo_conf` name;
    /// both populate the same value.
    #[serde(default, alias = "tempo_conf")]
    pub tempo_confidence: Option<f64>,
    #[serde(default)]
    pub beat_phase: Option<f64>,
    pub frame: u64,
    #[serde(default)]
    pub v: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchUpdatePayload {
    pub zone: String,
    pub entities: Vec<EntityUpdatePayload>,
    #[serde(default)]
    pub particles: Vec<ParticlePayload>,
    #[serde(default)]
    pub v: Option<String>,
}

/// One proxy's worth of optional property writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityUpdatePayload {
    pub id: String,
    #[serde(default)]
    pub position: Option<[f64; 3]>,
    #[serde(default)]
    pub transform: Option<TransformPayload>,
    #[serde(default)]
    pub brightness: Option<i64>,
    #[serde(default)]
    pub glow: Option<bool>,
    #[serde(default)]
    pub interpolation_ticks: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformPayload {
    pub position: [f64; 3],
    #[serde(default = "default_scale")]
    pub scale: [f64; 3],
    #[serde(default)]
    pub yaw: f64,
}

fn default_scale() -> [f64; 3] {
    [1.0, 1.0, 1.0]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticlePayload {
    pub position: [f64; 3],
    pub effect: String,
    #[serde(default = "default_particle_count")]
    pub count: u32,
}

fn default_particle_count() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitPoolPayload {
    pub zone: String,
    #[serde(default)]
    pub count: Option<i64>,
    /// Proxy kind hint; `material` is the legacy field name.
    #[serde(default, alias = "material")]
    pub kind: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
    #[serde(default)]
    pub v: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneConfigPayload {
    pub zone: String,
    #[serde(default)]
    pub world: Option<String>,
    #[serde(default)]
    pub origin: Option<[f64; 3]>,
    #[serde(default)]
    pub size: Option<[f64; 3]>,
    #[serde(default)]
    pub rotation: Option<f64>,
    #[serde(default)]
    pub v: Option<String>,
}

/// A zone definition as reported in `zones` / `zone` replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneSummary {
    pub name: String,
    pub world: String,
    pub origin: [f32; 3],
    pub size: [f32; 3],
    pub rotation: f32,
    pub entities: usize,
}

/// Why an inbound frame could not become a `WireMessage`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DecodeError {
    /// Not JSON, missing the `type` tag, or a known type with a bad payload.
    #[error("malformed payload: {0}")]
    Malformed(String),
    /// A well-formed message of a type this protocol does not know.
    #[error("unknown message type '{0}'")]
    UnknownType(String),
}

/// Decode one wire frame.
///
/// The two failure classes are distinguished so the router can answer with
/// the right structured error: a recognized tag with a broken payload is
/// malformed, an unrecognized tag is an unknown message type.
pub fn decode(raw: &[u8]) -> Result<WireMessage, DecodeError> {
    let value: serde_json::Value = serde_json::from_slice(raw)
        .map_err(|e| DecodeError::Malformed(format!("invalid JSON: {}", e)))?;

    let tag = value
        .get("type")
        .and_then(|t| t.as_str())
        .map(String::from)
        .ok_or_else(|| DecodeError::Malformed("missing 'type' field".to_string()))?;

    match serde_json::from_value::<WireMessage>(value) {
        Ok(message) => Ok(message),
        Err(e) => {
            if is_known_type(&tag) {
                Err(DecodeError::Malformed(format!(
                    "invalid '{}' payload: {}",
                    tag, e
                )))
            } else {
                Err(DecodeError::UnknownType(tag))
            }
        }
    }
}

/// Serialize a message to wire bytes.
pub fn encode(message: &WireMessage) -> Result<Vec<u8>, Error> {
    serde_json::to_vec(message)
        .map_err(|e| Error::Serialization(format!("failed to serialize message: {}", e)))
}

fn is_known_type(tag: &str) -> bool {
    matches!(
        tag,
        "audio_state"
            | "batch_update"
            | "init_pool"
            | "set_zone_config"
            | "set_render_mode"
            | "set_visible"
            | "delete_zone"
            | "list_zones"
            | "ping"
            | "pong"
            | "hello"
            | "hello_ack"
            | "pool_initialized"
            | "batch_updated"
            | "zones"
            | "zone"
            | "visibility_updated"
            | "render_mode_updated"
            | "zone_deleted"
            | "error"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_state_decodes_with_canonical_field() {
        let raw = br#"{
            "type": "audio_state",
            "bands": [0.1, 0.2, 0.3, 0.4, 0.5],
            "amplitude": 0.8,
            "is_beat": true,
            "beat_intensity": 0.9,
            "bpm": 128.0,
            "tempo_confidence": 0.75,
            "beat_phase": 0.4,
            "frame": 42
        }"#;
        let message = decode(raw).unwrap();
        match message {
            WireMessage::AudioState(payload) => {
                assert_eq!(payload.bands.len(), 5);
                assert_eq!(payload.tempo_confidence, Some(0.75));
                assert_eq!(payload.frame, 42);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn tempo_conf_alias_accepted() {
        let raw = br#"{
            "type": "audio_state",
            "bands": [0, 0, 0, 0, 0],
            "amplitude": 0.5,
            "is_beat": false,
            "beat_intensity": 0.0,
            "tempo_conf": 0.82,
            "frame": 7
        }"#;
        match decode(raw).unwrap() {
            WireMessage::AudioState(payload) => {
                assert_eq!(payload.tempo_confidence, Some(0.82));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn missing_type_is_malformed() {
        let err = decode(br#"{"zone": "pit"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn unknown_type_is_distinguished() {
        let err = decode(br#"{"type": "telepathy", "zone": "pit"}"#).unwrap_err();
        match err {
            DecodeError::UnknownType(tag) => assert_eq!(tag, "telepathy"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn known_type_with_broken_payload_is_malformed() {
        // batch_update without its required zone field
        let err = decode(br#"{"type": "batch_update", "entities": []}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn encode_decode_roundtrip() {
        let original = WireMessage::BatchUpdated { updated: 12 };
        let bytes = encode(&original).unwrap();
        match decode(&bytes).unwrap() {
            WireMessage::BatchUpdated { updated } => assert_eq!(updated, 12),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn unknown_fields_ignored_for_forward_compat() {
        let raw = br#"{"type": "ping", "seq": 3, "introduced_in_v1_1": true}"#;
        match decode(raw).unwrap() {
            WireMessage::Ping { seq } => assert_eq!(seq, Some(3)),
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
