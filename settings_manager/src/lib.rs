//! Layout persistence for stagelight.
//!
//! The core never touches disk directly: zone and stage definitions are
//! read through this store at startup and written back on mutation. The
//! default backend is a TOML file in the user's config directory.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use spatial::{StageRegistry, StageRole, Vec3, Zone, ZoneRegistry};
use stage_core::Error;
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted form of one zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneLayout {
    pub name: String,
    pub world: String,
    pub origin: [f32; 3],
    pub size: [f32; 3],
    pub rotation: f32,
}

impl ZoneLayout {
    pub fn from_zone(zone: &Zone) -> Self {
        Self {
            name: zone.name.clone(),
            world: zone.world.clone(),
            origin: [zone.origin.x, zone.origin.y, zone.origin.z],
            size: [zone.size.x, zone.size.y, zone.size.z],
            rotation: zone.rotation_degrees,
        }
    }
}

/// One role binding inside a persisted stage. Member zones are persisted
/// flat in `zones`, so a binding only references a zone by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleBinding {
    pub role: String,
    pub zone: String,
}

/// Persisted form of one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageLayout {
    pub name: String,
    pub anchor: [f32; 3],
    pub rotation: f32,
    pub roles: Vec<RoleBinding>,
}

/// Per-effect configuration with explicit defaults, resolved once at load
/// time. No stringly-typed lookups happen on the hot path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectSettings {
    #[serde(default = "default_proxy_count")]
    pub proxy_count: usize,
    #[serde(default)]
    pub band: usize,
    #[serde(default = "default_base_brightness")]
    pub base_brightness: i32,
    #[serde(default = "default_beat_brightness")]
    pub beat_brightness: i32,
}

fn default_proxy_count() -> usize {
    16
}

fn default_base_brightness() -> i32 {
    6
}

fn default_beat_brightness() -> i32 {
    15
}

impl Default for EffectSettings {
    fn default() -> Self {
        Self {
            proxy_count: default_proxy_count(),
            band: 0,
            base_brightness: default_base_brightness(),
            beat_brightness: default_beat_brightness(),
        }
    }
}

/// An effect activated on a zone at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectBinding {
    pub effect: String,
    pub zone: String,
    #[serde(default)]
    pub config: EffectSettings,
}

/// The whole persisted layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default)]
    pub zones: Vec<ZoneLayout>,
    #[serde(default)]
    pub stages: Vec<StageLayout>,
    #[serde(default)]
    pub effects: Vec<EffectBinding>,
}

impl LayoutConfig {
    /// Populate registries from this layout. Invalid entries are skipped
    /// with a warning rather than failing startup; a damaged layout file
    /// should degrade, not brick the host.
    pub fn populate(&self, zones: &mut ZoneRegistry, stages: &mut StageRegistry) {
        for entry in &self.zones {
            let zone = Zone::new(
                entry.name.clone(),
                entry.world.clone(),
                Vec3::new(entry.origin[0], entry.origin[1], entry.origin[2]),
                Vec3::new(entry.size[0], entry.size[1], entry.size[2]),
                entry.rotation,
            );
            match zone.and_then(|z| zones.create(z).map(|_| ())) {
                Ok(()) => {}
                Err(e) => warn!("skipping persisted zone '{}': {}", entry.name, e),
            }
        }

        for entry in &self.stages {
            let mut members = Vec::new();
            let mut valid = true;
            for binding in &entry.roles {
                match StageRole::parse(&binding.role) {
                    Some(role) => members.push((role, binding.zone.clone())),
                    None => {
                        warn!(
                            "skipping persisted stage '{}': unknown role '{}'",
                            entry.name, binding.role
                        );
                        valid = false;
                        break;
                    }
                }
            }
            if !valid {
                continue;
            }
            let anchor = Vec3::new(entry.anchor[0], entry.anchor[1], entry.anchor[2]);
            if let Err(e) =
                stages.restore_stage(entry.name.clone(), anchor, entry.rotation, &members, zones)
            {
                warn!("skipping persisted stage '{}': {}", entry.name, e);
            }
        }
    }

    /// Capture the current registries into persistable form, keeping the
    /// existing effect bindings.
    pub fn capture(zones: &ZoneRegistry, stages: &StageRegistry, effects: Vec<EffectBinding>) -> Self {
        let zones = zones.list().into_iter().map(ZoneLayout::from_zone).collect();
        let stages = stages
            .list()
            .into_iter()
            .map(|stage| StageLayout {
                name: stage.name.clone(),
                anchor: [stage.anchor.x, stage.anchor.y, stage.anchor.z],
                rotation: stage.rotation_degrees,
                roles: roles_of(stage)
                    .map(|role| RoleBinding {
                        role: role.as_str().to_string(),
                        zone: stage.zone_for_role(role).unwrap_or_default().to_string(),
                    })
                    .collect(),
            })
            .collect();
        Self {
            zones,
            stages,
            effects,
        }
    }
}

fn roles_of(stage: &spatial::Stage) -> impl Iterator<Item = StageRole> + '_ {
    [
        StageRole::MainArea,
        StageRole::LeftFlank,
        StageRole::RightFlank,
        StageRole::ElevatedBand,
        StageRole::Perimeter,
    ]
    .into_iter()
    .filter(|role| stage.zone_for_role(*role).is_some())
}

/// TOML-file-backed layout store.
pub struct LayoutStore {
    layout: LayoutConfig,
    layout_file: PathBuf,
}

impl LayoutStore {
    /// Open the store at the default location in the user's config
    /// directory, loading the existing layout if present.
    pub fn new() -> Result<Self, Error> {
        let mut config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Failed to determine config directory".to_string()))?;
        config_dir.push("stagelight");

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .map_err(|e| Error::Config(format!("Failed to create config directory: {}", e)))?;
        }

        Self::with_file(config_dir.join("layout.toml"))
    }

    /// Open a store at a custom path (mainly for testing).
    pub fn with_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let layout_file = path.as_ref().to_path_buf();
        let layout = if layout_file.exists() {
            Self::load_from_file(&layout_file)?
        } else {
            debug!("layout file not found, starting empty");
            LayoutConfig::default()
        };

        Ok(Self {
            layout,
            layout_file,
        })
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<LayoutConfig, Error> {
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read layout file: {}", e)))?;

        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse layout file: {}", e)))
    }

    /// Write the current layout to disk.
    pub fn save(&self) -> Result<(), Error> {
        let toml = toml::to_string_pretty(&self.layout)
            .map_err(|e| Error::Config(format!("Failed to serialize layout: {}", e)))?;

        if let Some(parent) = self.layout_file.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    Error::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        fs::write(&self.layout_file, toml)
            .map_err(|e| Error::Config(format!("Failed to write layout file: {}", e)))?;

        debug!("saved layout to {:?}", self.layout_file);
        Ok(())
    }

    pub fn layout(&self) -> &LayoutConfig {
        &self.layout
    }

    /// Replace the stored layout. Callers follow up with `save` to persist.
    pub fn set_layout(&mut self, layout: LayoutConfig) {
        self.layout = layout;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_starts_empty() {
        let temp_dir = tempdir().unwrap();
        let store = LayoutStore::with_file(temp_dir.path().join("nonexistent.toml")).unwrap();
        assert!(store.layout().zones.is_empty());
        assert!(store.layout().stages.is_empty());
    }

    #[test]
    fn save_and_reload_round_trips() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("layout.toml");

        let mut store = LayoutStore::with_file(&path).unwrap();
        store.set_layout(LayoutConfig {
            zones: vec![ZoneLayout {
                name: "pit".to_string(),
                world: "main".to_string(),
                origin: [10.0, 64.0, -20.0],
                size: [8.0, 4.0, 6.0],
                rotation: 45.0,
            }],
            stages: vec![StageLayout {
                name: "festival".to_string(),
                anchor: [0.0, 64.0, 0.0],
                rotation: 0.0,
                roles: vec![RoleBinding {
                    role: "main_area".to_string(),
                    zone: "pit".to_string(),
                }],
            }],
            effects: vec![EffectBinding {
                effect: "band_columns".to_string(),
                zone: "pit".to_string(),
                config: EffectSettings::default(),
            }],
        });
        store.save().unwrap();
        assert!(path.exists());

        let reloaded = LayoutStore::with_file(&path).unwrap();
        assert_eq!(reloaded.layout().zones.len(), 1);
        assert_eq!(reloaded.layout().zones[0].name, "pit");
        assert_eq!(reloaded.layout().stages[0].roles[0].role, "main_area");
        assert_eq!(reloaded.layout().effects[0].effect, "band_columns");
    }

    #[test]
    fn populate_builds_registries_and_skips_bad_entries() {
        let layout = LayoutConfig {
            zones: vec![
                ZoneLayout {
                    name: "pit".to_string(),
                    world: "main".to_string(),
                    origin: [0.0, 64.0, 0.0],
                    size: [8.0, 4.0, 6.0],
                    rotation: 0.0,
                },
                // Zero-size zone must be skipped, not fail startup.
                ZoneLayout {
                    name: "broken".to_string(),
                    world: "main".to_string(),
                    origin: [0.0, 0.0, 0.0],
                    size: [0.0, 1.0, 1.0],
                    rotation: 0.0,
                },
            ],
            stages: vec![StageLayout {
                name: "festival".to_string(),
                anchor: [0.0, 64.0, 0.0],
                rotation: 0.0,
                roles: vec![RoleBinding {
                    role: "main_area".to_string(),
                    zone: "pit".to_string(),
                }],
            }],
            effects: Vec::new(),
        };

        let mut zones = ZoneRegistry::new();
        let mut stages = StageRegistry::new();
        layout.populate(&mut zones, &mut stages);

        assert_eq!(zones.len(), 1);
        assert!(zones.get("pit").is_some());
        assert_eq!(stages.len(), 1);
        assert_eq!(
            stages.get("festival").unwrap().zone_for_role(StageRole::MainArea),
            Some("pit")
        );
    }

    #[test]
    fn capture_round_trips_through_populate() {
        let mut zones = ZoneRegistry::new();
        let mut stages = StageRegistry::new();
        zones
            .create(
                Zone::new(
                    "pit",
                    "main",
                    Vec3::new(1.0, 2.0, 3.0),
                    Vec3::new(4.0, 5.0, 6.0),
                    30.0,
                )
                .unwrap(),
            )
            .unwrap();
        stages
            .restore_stage(
                "festival",
                Vec3::default(),
                0.0,
                &[(StageRole::MainArea, "pit".to_string())],
                &zones,
            )
            .unwrap();

        let captured = LayoutConfig::capture(&zones, &stages, Vec::new());

        let mut zones2 = ZoneRegistry::new();
        let mut stages2 = StageRegistry::new();
        captured.populate(&mut zones2, &mut stages2);

        assert_eq!(zones2.get("pit").unwrap(), zones.get("pit").unwrap());
        assert_eq!(stages2.len(), 1);
    }
}
