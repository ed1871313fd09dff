use std::fmt;

use glam::{DVec3, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Server-assigned identifier for a world object or avatar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a land parcel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParcelId(pub u32);

/// Identifier of a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub u32);

/// Tagged reference to anything that can carry a mesh.
///
/// Objects and avatars share an id space on the server but live in separate
/// registry maps, so the kind travels with the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKey {
    Object(EntityId),
    Avatar(EntityId),
}

impl EntityKey {
    pub fn id(&self) -> EntityId {
        match self {
            EntityKey::Object(id) | EntityKey::Avatar(id) => *id,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Object(id) => write!(f, "object:{id}"),
            EntityKey::Avatar(id) => write!(f, "avatar:{id}"),
        }
    }
}

/// Load progress of an entity's mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MeshState {
    #[default]
    NotLoaded,
    Loading,
    Loaded,
}

/// Spatial transform: position, rotation, scale.
///
/// Positions are double precision; worlds are large enough that f32 jitters
/// a few kilometres out.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: DVec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: DVec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    /// Build a transform from the axis/angle form used on the wire.
    ///
    /// A zero-length axis yields the identity rotation.
    pub fn from_axis_angle(position: DVec3, axis: Vec3, angle: f32, scale: Vec3) -> Self {
        let rotation = match axis.try_normalize() {
            Some(axis) => Quat::from_axis_angle(axis, angle),
            None => Quat::IDENTITY,
        };
        Self {
            position,
            rotation,
            scale,
        }
    }
}

/// World-space axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self {
            min: Vec3::ZERO,
            max: Vec3::ZERO,
        }
    }
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Cube of half-width `half` centred on `centre`.
    pub fn around(centre: DVec3, half: f32) -> Self {
        let c = centre.as_vec3();
        Self {
            min: c - Vec3::splat(half),
            max: c + Vec3::splat(half),
        }
    }

    pub fn centroid(&self) -> DVec3 {
        ((self.min + self.max) * 0.5).as_dvec3()
    }

    /// Length of the longest edge.
    pub fn longest_len(&self) -> f32 {
        (self.max - self.min).max_element()
    }

    pub fn translated(&self, delta: Vec3) -> Self {
        Self {
            min: self.min + delta,
            max: self.max + delta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_key_carries_id_and_kind() {
        let ob = EntityKey::Object(EntityId(7));
        let av = EntityKey::Avatar(EntityId(7));
        assert_eq!(ob.id(), av.id());
        assert_ne!(ob, av);
        assert_eq!(ob.to_string(), "object:7");
    }

    #[test]
    fn transform_default_is_identity() {
        let t = Transform::default();
        assert_eq!(t.position, DVec3::ZERO);
        assert_eq!(t.rotation, Quat::IDENTITY);
        assert_eq!(t.scale, Vec3::ONE);
    }

    #[test]
    fn zero_axis_gives_identity_rotation() {
        let t = Transform::from_axis_angle(DVec3::ONE, Vec3::ZERO, 1.0, Vec3::ONE);
        assert_eq!(t.rotation, Quat::IDENTITY);
    }

    #[test]
    fn aabb_longest_len_and_centroid() {
        let b = Aabb::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(2.0, 6.0, 4.0));
        assert_eq!(b.longest_len(), 6.0);
        assert_eq!(b.centroid(), DVec3::new(1.0, 3.0, 2.0));
        let moved = b.translated(Vec3::X);
        assert_eq!(moved.min.x, 1.0);
    }
}
