use glam::DVec3;
use worldview_assets::ResourceKey;
use worldview_common::{EntityKey, MeshState, Transform};
use worldview_protocol::MaterialData;

/// Loading bookkeeping the viewer keeps on each entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadState {
    /// Eligible for resources under the last proximity pass.
    pub in_proximity: bool,
    /// LOD computed by the last proximity pass.
    pub current_lod: i32,
    pub mesh_state: MeshState,
    /// Mesh key this entity holds a cache reference to.
    pub mesh_key: Option<ResourceKey>,
    pub loaded_lod: Option<i32>,
    pub loaded_model_lod: Option<i32>,
    /// Key the collision shape was registered under.
    pub collision_key: Option<ResourceKey>,
    /// Texture key held per material slot.
    pub textures: Vec<Option<ResourceKey>>,
}

/// Bounds on the LOD an entity can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LodLimits {
    pub min_lod: i32,
    pub max_lod: i32,
    pub max_model_lod: i32,
}

impl LodLimits {
    pub fn clamp_lod(&self, lod: i32) -> i32 {
        lod.clamp(self.min_lod, self.max_lod.max(self.min_lod))
    }

    /// Model variants start at 0; LOD -1 reuses the base model.
    pub fn model_lod(&self, lod: i32) -> i32 {
        lod.clamp(0, self.max_model_lod.max(0))
    }
}

/// What has to be loaded to give an entity a mesh.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelSource {
    Mesh(ResourceKey),
    Voxels {
        key: ResourceKey,
        compressed: Vec<u8>,
    },
}

impl ModelSource {
    pub fn key(&self) -> &ResourceKey {
        match self {
            ModelSource::Mesh(key) | ModelSource::Voxels { key, .. } => key,
        }
    }
}

/// Shared capabilities of objects and avatars: positioned, LOD-selectable,
/// and carrying a mesh slot.
pub trait Loadable {
    fn entity_key(&self) -> EntityKey;

    /// Point distances are measured to.
    fn centroid(&self) -> DVec3;

    /// Longest edge of the world-space bounds.
    fn bounding_len(&self) -> f32;

    fn transform(&self) -> Transform;

    fn materials(&self) -> &[MaterialData];

    fn lod_limits(&self) -> LodLimits;

    /// Source of the model at `model_lod`, or `None` if there is nothing to load.
    fn model_source(&self, model_lod: i32) -> Option<ModelSource>;

    /// Divides queue priority; larger loads sooner.
    fn importance(&self) -> f32 {
        1.0
    }

    fn load_state(&self) -> &LoadState;

    fn load_state_mut(&mut self) -> &mut LoadState;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_lod_never_goes_negative() {
        let limits = LodLimits {
            min_lod: -1,
            max_lod: 2,
            max_model_lod: 2,
        };
        assert_eq!(limits.model_lod(-1), 0);
        assert_eq!(limits.model_lod(1), 1);
        assert_eq!(limits.clamp_lod(5), 2);
    }

    #[test]
    fn model_lod_capped_by_available_variants() {
        let limits = LodLimits {
            min_lod: 0,
            max_lod: 2,
            max_model_lod: 0,
        };
        assert_eq!(limits.model_lod(2), 0);
        assert_eq!(limits.clamp_lod(-1), 0);
    }
}
