//! Spatial model for stagelight.
//!
//! Zones are rotated, sized bounding volumes in world space that host render
//! proxies. Stages group zones under semantic roles around a shared anchor.
//! This crate owns the coordinate math that maps normalized pattern output
//! into absolute world coordinates.

use serde::{Deserialize, Serialize};
use stage_core::Error;

mod registry;

pub use registry::{StageRegistry, ZoneRegistry, MAX_ZONES};

/// A point or direction in world space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn add(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    pub fn sub(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    /// Rotate this vector around the Y axis by `degrees`.
    pub fn rotate_yaw(self, degrees: f32) -> Vec3 {
        let rad = degrees.to_radians();
        let (sin, cos) = rad.sin_cos();
        Vec3::new(
            self.x * cos - self.z * sin,
            self.y,
            self.x * sin + self.z * cos,
        )
    }
}

/// Normalize a rotation into `[0, 360)` degrees.
pub fn normalize_rotation(degrees: f32) -> f32 {
    degrees.rem_euclid(360.0)
}

/// A named, rotated, sized bounding volume hosting a pool of render proxies.
///
/// Zone names are unique case-insensitively; the lowercase form is the
/// registry key. Rotation is always stored normalized to `[0, 360)` and size
/// components are always strictly positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,
    pub world: String,
    pub origin: Vec3,
    pub size: Vec3,
    pub rotation_degrees: f32,
}

impl Zone {
    pub fn new(
        name: impl Into<String>,
        world: impl Into<String>,
        origin: Vec3,
        size: Vec3,
        rotation_degrees: f32,
    ) -> Result<Self, Error> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::Validation("zone name must not be empty".to_string()));
        }
        validate_size(&size)?;
        Ok(Self {
            name,
            world: world.into(),
            origin,
            size,
            rotation_degrees: normalize_rotation(rotation_degrees),
        })
    }

    /// Registry key: the case-insensitive form of the name.
    pub fn key(&self) -> String {
        zone_key(&self.name)
    }

    /// Map normalized pattern coordinates `u, v, w ∈ [0, 1]` into world space.
    ///
    /// Order is scale → rotate → translate. Reversing rotate and scale would
    /// change the zone's apparent aspect ratio under non-uniform sizes, so
    /// the ordering is load-bearing. Rotation is yaw-only; Y is untouched.
    pub fn local_to_world(&self, u: f32, v: f32, w: f32) -> Vec3 {
        let scaled = Vec3::new(u * self.size.x, v * self.size.y, w * self.size.z);
        scaled.rotate_yaw(self.rotation_degrees).add(self.origin)
    }

    /// Coarse membership test in the zone's local, unrotated frame.
    ///
    /// Rotation is intentionally ignored: this is an O(1) axis-aligned check
    /// used only for coarse audience detection, and the approximation is
    /// documented behavior rather than a bug.
    pub fn contains(&self, point: Vec3) -> bool {
        let local = point.sub(self.origin);
        local.x >= 0.0
            && local.x <= self.size.x
            && local.y >= 0.0
            && local.y <= self.size.y
            && local.z >= 0.0
            && local.z <= self.size.z
    }
}

/// Canonical registry key for a zone name.
pub fn zone_key(name: &str) -> String {
    name.to_lowercase()
}

fn validate_size(size: &Vec3) -> Result<(), Error> {
    if size.x > 0.0 && size.y > 0.0 && size.z > 0.0 {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "zone size components must be positive, got ({}, {}, {})",
            size.x, size.y, size.z
        )))
    }
}

/// Semantic roles a zone can occupy within a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageRole {
    MainArea,
    LeftFlank,
    RightFlank,
    ElevatedBand,
    Perimeter,
}

impl StageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageRole::MainArea => "main_area",
            StageRole::LeftFlank => "left_flank",
            StageRole::RightFlank => "right_flank",
            StageRole::ElevatedBand => "elevated_band",
            StageRole::Perimeter => "perimeter",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "main_area" => Some(StageRole::MainArea),
            "left_flank" => Some(StageRole::LeftFlank),
            "right_flank" => Some(StageRole::RightFlank),
            "elevated_band" => Some(StageRole::ElevatedBand),
            "perimeter" => Some(StageRole::Perimeter),
            _ => None,
        }
    }
}

impl std::fmt::Display for StageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Placement of one role's zone relative to the stage anchor.
#[derive(Debug, Clone, PartialEq)]
pub struct RolePlacement {
    pub role: StageRole,
    /// Offset from the stage anchor, in the stage's unrotated frame.
    pub offset: Vec3,
    pub size: Vec3,
}

/// A named group of zones bound to semantic roles around one anchor.
///
/// The stage rotation is applied uniformly to every member zone's placement
/// offset, so rotating a stage swings the whole layout as a rigid unit.
#[derive(Debug, Clone)]
pub struct Stage {
    pub name: String,
    pub anchor: Vec3,
    pub rotation_degrees: f32,
    members: Vec<(StageRole, String)>,
}

impl Stage {
    /// Zone names owned by this stage, in role declaration order.
    pub fn member_zones(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|(_, zone)| zone.as_str())
    }

    pub fn zone_for_role(&self, role: StageRole) -> Option<&str> {
        self.members
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, zone)| zone.as_str())
    }

    pub(crate) fn new(name: String, anchor: Vec3, rotation_degrees: f32) -> Self {
        Self {
            name,
            anchor,
            rotation_degrees: normalize_rotation(rotation_degrees),
            members: Vec::new(),
        }
    }

    pub(crate) fn push_member(&mut self, role: StageRole, zone: String) {
        self.members.push((role, zone));
    }
}
