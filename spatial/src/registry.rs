//! Owned zone and stage collections behind narrow service interfaces.
//!
//! All external mutation goes through these methods; there are no ambient
//! singletons and no direct map access. Zones are independent units of
//! concurrency, so the registries themselves carry no locking; a single
//! owner (the router task) drives them.

use std::collections::HashMap;

use log::warn;
use stage_core::Error;

use crate::{zone_key, RolePlacement, Stage, Vec3, Zone};

/// Upper bound on concurrently registered zones.
pub const MAX_ZONES: usize = 64;

/// Registry of zones keyed by case-insensitive name.
#[derive(Debug, Default)]
pub struct ZoneRegistry {
    zones: HashMap<String, Zone>,
}

impl ZoneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new zone. Duplicate names (case-insensitive) are rejected;
    /// the zone cap produces a capacity error with a warning rather than a
    /// silent drop.
    pub fn create(&mut self, zone: Zone) -> Result<&Zone, Error> {
        let key = zone.key();
        if self.zones.contains_key(&key) {
            return Err(Error::Validation(format!(
                "zone '{}' already exists",
                zone.name
            )));
        }
        if self.zones.len() >= MAX_ZONES {
            warn!(
                "zone cap reached ({}), refusing to create '{}'",
                MAX_ZONES, zone.name
            );
            return Err(Error::Capacity(format!(
                "zone limit of {} reached",
                MAX_ZONES
            )));
        }
        Ok(self.zones.entry(key).or_insert(zone))
    }

    pub fn get(&self, name: &str) -> Option<&Zone> {
        self.zones.get(&zone_key(name))
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.zones.contains_key(&zone_key(name))
    }

    /// Move a zone to a new origin.
    pub fn move_zone(&mut self, name: &str, origin: Vec3) -> Result<&Zone, Error> {
        let zone = self.get_mut(name)?;
        zone.origin = origin;
        Ok(zone)
    }

    /// Resize a zone. Size components must stay strictly positive.
    pub fn resize_zone(&mut self, name: &str, size: Vec3) -> Result<&Zone, Error> {
        if !(size.x > 0.0 && size.y > 0.0 && size.z > 0.0) {
            return Err(Error::Validation(format!(
                "zone size components must be positive, got ({}, {}, {})",
                size.x, size.y, size.z
            )));
        }
        let zone = self.get_mut(name)?;
        zone.size = size;
        Ok(zone)
    }

    /// Rotate a zone. The stored rotation is re-normalized into `[0, 360)`.
    pub fn rotate_zone(&mut self, name: &str, degrees: f32) -> Result<&Zone, Error> {
        let zone = self.get_mut(name)?;
        zone.rotation_degrees = crate::normalize_rotation(degrees);
        Ok(zone)
    }

    /// Remove a zone, returning it if it existed. Callers are responsible
    /// for cleaning up the zone's proxy pool before removal so no orphan
    /// proxies survive.
    pub fn remove(&mut self, name: &str) -> Option<Zone> {
        self.zones.remove(&zone_key(name))
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Snapshot of all zones, sorted by key for deterministic listings.
    pub fn list(&self) -> Vec<&Zone> {
        let mut zones: Vec<&Zone> = self.zones.values().collect();
        zones.sort_by(|a, b| a.key().cmp(&b.key()));
        zones
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut Zone, Error> {
        self.zones
            .get_mut(&zone_key(name))
            .ok_or_else(|| Error::NotFound(format!("zone '{}'", name)))
    }
}

/// Registry of stages keyed by case-insensitive name.
#[derive(Debug, Default)]
pub struct StageRegistry {
    stages: HashMap<String, Stage>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a stage and materialize one zone per role placement.
    ///
    /// Member zones are named `<stage>_<role>` and placed by rotating the
    /// role offset around the anchor by the stage rotation. A role may
    /// appear at most once; duplicates reject the whole request. On any
    /// member-zone failure, zones created so far are rolled back.
    pub fn create_stage(
        &mut self,
        name: impl Into<String>,
        world: impl Into<String>,
        anchor: Vec3,
        rotation_degrees: f32,
        placements: &[RolePlacement],
        zones: &mut ZoneRegistry,
    ) -> Result<&Stage, Error> {
        let name = name.into();
        let world = world.into();
        let key = zone_key(&name);
        if self.stages.contains_key(&key) {
            return Err(Error::Validation(format!("stage '{}' already exists", name)));
        }

        let mut seen = Vec::new();
        for placement in placements {
            if seen.contains(&placement.role) {
                return Err(Error::Validation(format!(
                    "role '{}' appears more than once in stage '{}'",
                    placement.role, name
                )));
            }
            seen.push(placement.role);
        }

        let mut stage = Stage::new(name.clone(), anchor, rotation_degrees);
        let mut created: Vec<String> = Vec::new();
        for placement in placements {
            let zone_name = format!("{}_{}", name, placement.role.as_str());
            let origin = anchor.add(placement.offset.rotate_yaw(stage.rotation_degrees));
            let zone = Zone::new(
                zone_name.clone(),
                world.clone(),
                origin,
                placement.size,
                stage.rotation_degrees,
            )
            .and_then(|z| zones.create(z).map(|z| z.name.clone()));

            match zone {
                Ok(created_name) => {
                    created.push(created_name.clone());
                    stage.push_member(placement.role, created_name);
                }
                Err(e) => {
                    for rollback in &created {
                        zones.remove(rollback);
                    }
                    return Err(e);
                }
            }
        }

        Ok(self.stages.entry(key).or_insert(stage))
    }

    /// Rebuild a stage from persisted state, binding roles to zones that
    /// already exist in the registry. Used by layout restore, where member
    /// zones were created flat beforehand.
    pub fn restore_stage(
        &mut self,
        name: impl Into<String>,
        anchor: Vec3,
        rotation_degrees: f32,
        members: &[(crate::StageRole, String)],
        zones: &ZoneRegistry,
    ) -> Result<&Stage, Error> {
        let name = name.into();
        let key = zone_key(&name);
        if self.stages.contains_key(&key) {
            return Err(Error::Validation(format!("stage '{}' already exists", name)));
        }

        let mut stage = Stage::new(name.clone(), anchor, rotation_degrees);
        let mut seen = Vec::new();
        for (role, zone) in members {
            if seen.contains(role) {
                return Err(Error::Validation(format!(
                    "role '{}' appears more than once in stage '{}'",
                    role, name
                )));
            }
            seen.push(*role);
            if !zones.contains_name(zone) {
                return Err(Error::NotFound(format!("zone '{}'", zone)));
            }
            stage.push_member(*role, zone.clone());
        }

        Ok(self.stages.entry(key).or_insert(stage))
    }

    pub fn get(&self, name: &str) -> Option<&Stage> {
        self.stages.get(&zone_key(name))
    }

    /// Remove a stage and every zone it owns, returning the removed zone
    /// names. Callers clean up proxy pools for those zones first.
    pub fn delete_stage(
        &mut self,
        name: &str,
        zones: &mut ZoneRegistry,
    ) -> Result<Vec<String>, Error> {
        let stage = self
            .stages
            .remove(&zone_key(name))
            .ok_or_else(|| Error::NotFound(format!("stage '{}'", name)))?;
        let removed: Vec<String> = stage.member_zones().map(String::from).collect();
        for zone in &removed {
            zones.remove(zone);
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn list(&self) -> Vec<&Stage> {
        let mut stages: Vec<&Stage> = self.stages.values().collect();
        stages.sort_by(|a, b| a.name.cmp(&b.name));
        stages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StageRole;

    fn sample_zone(name: &str) -> Zone {
        Zone::new(
            name,
            "main",
            Vec3::new(0.0, 64.0, 0.0),
            Vec3::new(4.0, 4.0, 4.0),
            0.0,
        )
        .unwrap()
    }

    #[test]
    fn create_and_lookup_is_case_insensitive() {
        let mut registry = ZoneRegistry::new();
        registry.create(sample_zone("FrontRow")).unwrap();
        assert!(registry.get("frontrow").is_some());
        assert!(registry.get("FRONTROW").is_some());
        assert!(registry.contains_name("frontRow"));
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut registry = ZoneRegistry::new();
        registry.create(sample_zone("pit")).unwrap();
        let err = registry.create(sample_zone("PIT"));
        assert!(matches!(err, Err(Error::Validation(_))));
    }

    #[test]
    fn zone_cap_enforced() {
        let mut registry = ZoneRegistry::new();
        for i in 0..MAX_ZONES {
            registry.create(sample_zone(&format!("zone{}", i))).unwrap();
        }
        let err = registry.create(sample_zone("one_too_many"));
        assert!(matches!(err, Err(Error::Capacity(_))));
        assert_eq!(registry.len(), MAX_ZONES);
    }

    #[test]
    fn mutations_apply_and_validate() {
        let mut registry = ZoneRegistry::new();
        registry.create(sample_zone("pit")).unwrap();

        registry.move_zone("pit", Vec3::new(5.0, 70.0, 5.0)).unwrap();
        assert_eq!(registry.get("pit").unwrap().origin, Vec3::new(5.0, 70.0, 5.0));

        let err = registry.resize_zone("pit", Vec3::new(-1.0, 2.0, 2.0));
        assert!(matches!(err, Err(Error::Validation(_))));

        registry.rotate_zone("pit", -45.0).unwrap();
        assert_eq!(registry.get("pit").unwrap().rotation_degrees, 315.0);

        let err = registry.move_zone("nope", Vec3::default());
        assert!(matches!(err, Err(Error::NotFound(_))));
    }

    #[test]
    fn stage_materializes_member_zones() {
        let mut zones = ZoneRegistry::new();
        let mut stages = StageRegistry::new();

        let placements = vec![
            RolePlacement {
                role: StageRole::MainArea,
                offset: Vec3::new(0.0, 0.0, 0.0),
                size: Vec3::new(10.0, 5.0, 10.0),
            },
            RolePlacement {
                role: StageRole::LeftFlank,
                offset: Vec3::new(-12.0, 0.0, 0.0),
                size: Vec3::new(6.0, 5.0, 6.0),
            },
        ];

        let anchor = Vec3::new(100.0, 64.0, 100.0);
        stages
            .create_stage("festival", "main", anchor, 90.0, &placements, &mut zones)
            .unwrap();

        let stage = stages.get("festival").unwrap();
        assert_eq!(stage.member_zones().count(), 2);
        assert_eq!(
            stage.zone_for_role(StageRole::MainArea),
            Some("festival_main_area")
        );

        // Left flank offset (-12, 0, 0) rotated 90° lands at (0, 0, -12).
        let flank = zones.get("festival_left_flank").unwrap();
        assert!((flank.origin.x - 100.0).abs() < 1e-3);
        assert!((flank.origin.z - 88.0).abs() < 1e-3);
        assert_eq!(flank.rotation_degrees, 90.0);
    }

    #[test]
    fn duplicate_role_rejected() {
        let mut zones = ZoneRegistry::new();
        let mut stages = StageRegistry::new();
        let placements = vec![
            RolePlacement {
                role: StageRole::Perimeter,
                offset: Vec3::default(),
                size: Vec3::new(2.0, 2.0, 2.0),
            },
            RolePlacement {
                role: StageRole::Perimeter,
                offset: Vec3::new(1.0, 0.0, 0.0),
                size: Vec3::new(2.0, 2.0, 2.0),
            },
        ];
        let err = stages.create_stage(
            "dup",
            "main",
            Vec3::default(),
            0.0,
            &placements,
            &mut zones,
        );
        assert!(matches!(err, Err(Error::Validation(_))));
        assert!(zones.is_empty());
    }

    #[test]
    fn delete_stage_removes_member_zones() {
        let mut zones = ZoneRegistry::new();
        let mut stages = StageRegistry::new();
        let placements = vec![RolePlacement {
            role: StageRole::ElevatedBand,
            offset: Vec3::new(0.0, 8.0, 0.0),
            size: Vec3::new(4.0, 2.0, 4.0),
        }];
        stages
            .create_stage("club", "main", Vec3::default(), 0.0, &placements, &mut zones)
            .unwrap();
        assert_eq!(zones.len(), 1);

        let removed = stages.delete_stage("club", &mut zones).unwrap();
        assert_eq!(removed, vec!["club_elevated_band".to_string()]);
        assert!(zones.is_empty());
        assert!(stages.is_empty());
    }
}
