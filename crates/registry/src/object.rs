use glam::{DVec3, Vec3};
use worldview_assets::lod;
use worldview_common::{EntityId, EntityKey, Transform};
use worldview_protocol::{MaterialData, ObjectData};

use crate::entity::{LoadState, Loadable, LodLimits, ModelSource};

/// A world object as last described by the server, plus its load state.
#[derive(Debug, Clone)]
pub struct WorldObject {
    pub uid: EntityId,
    pub data: ObjectData,
    centroid: DVec3,
    /// Hash of `data.compressed_voxels`, part of the voxel mesh key.
    voxel_digest: u64,
    pub state: LoadState,
}

impl WorldObject {
    pub fn new(uid: EntityId, data: ObjectData) -> Self {
        let centroid = data.aabb_ws.centroid();
        let voxel_digest = lod::voxel_digest(&data.compressed_voxels);
        Self {
            uid,
            data,
            centroid,
            voxel_digest,
            state: LoadState::default(),
        }
    }

    /// Move the object, carrying its bounds along.
    pub fn set_transform(&mut self, pos: DVec3, axis: Vec3, angle: f32) {
        let delta = (pos - self.data.pos).as_vec3();
        self.data.aabb_ws = self.data.aabb_ws.translated(delta);
        self.data.pos = pos;
        self.data.axis = axis;
        self.data.angle = angle;
        self.centroid = self.data.aabb_ws.centroid();
    }

    /// Replace the network state, keeping load state.
    ///
    /// Returns true if what the object looks like changed (model, voxels or
    /// materials), meaning loaded resources must be reconciled.
    pub fn replace_data(&mut self, data: ObjectData) -> bool {
        let appearance_changed = data.model_url != self.data.model_url
            || data.compressed_voxels != self.data.compressed_voxels
            || data.max_model_lod_level != self.data.max_model_lod_level
            || data.materials != self.data.materials;
        if data.compressed_voxels != self.data.compressed_voxels {
            self.voxel_digest = lod::voxel_digest(&data.compressed_voxels);
        }
        self.data = data;
        self.centroid = self.data.aabb_ws.centroid();
        appearance_changed
    }

    pub fn is_voxel(&self) -> bool {
        self.data.is_voxel()
    }
}

impl Loadable for WorldObject {
    fn entity_key(&self) -> EntityKey {
        EntityKey::Object(self.uid)
    }

    fn centroid(&self) -> DVec3 {
        self.centroid
    }

    fn bounding_len(&self) -> f32 {
        self.data.aabb_ws.longest_len()
    }

    fn transform(&self) -> Transform {
        Transform::from_axis_angle(self.data.pos, self.data.axis, self.data.angle, self.data.scale)
    }

    fn materials(&self) -> &[MaterialData] {
        &self.data.materials
    }

    fn lod_limits(&self) -> LodLimits {
        let min_lod = if self.data.flags & ObjectData::MIN_LOD_LEVEL_IS_NEGATIVE_1 != 0 {
            -1
        } else {
            0
        };
        LodLimits {
            min_lod,
            max_lod: 2,
            max_model_lod: self.data.max_model_lod_level,
        }
    }

    fn model_source(&self, model_lod: i32) -> Option<ModelSource> {
        if self.is_voxel() {
            Some(ModelSource::Voxels {
                key: lod::voxel_key(self.uid, self.voxel_digest, model_lod),
                compressed: self.data.compressed_voxels.clone(),
            })
        } else if !self.data.model_url.is_empty() {
            Some(ModelSource::Mesh(lod::model_key_for_level(
                &self.data.model_url,
                model_lod,
            )))
        } else {
            None
        }
    }

    fn load_state(&self) -> &LoadState {
        &self.state
    }

    fn load_state_mut(&mut self) -> &mut LoadState {
        &mut self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use worldview_common::Aabb;

    fn chair() -> ObjectData {
        ObjectData {
            model_url: "chair.bmesh".into(),
            pos: DVec3::new(10.0, 0.0, 0.0),
            scale: Vec3::ONE,
            aabb_ws: Aabb::new(Vec3::new(9.0, -1.0, 0.0), Vec3::new(11.0, 1.0, 4.0)),
            max_model_lod_level: 2,
            ..ObjectData::default()
        }
    }

    #[test]
    fn centroid_comes_from_world_bounds() {
        let ob = WorldObject::new(EntityId(1), chair());
        assert_eq!(ob.centroid(), DVec3::new(10.0, 0.0, 2.0));
        assert_eq!(ob.bounding_len(), 4.0);
    }

    #[test]
    fn moving_translates_bounds_and_centroid() {
        let mut ob = WorldObject::new(EntityId(1), chair());
        ob.set_transform(DVec3::new(20.0, 0.0, 0.0), Vec3::Z, 0.5);
        assert_eq!(ob.centroid(), DVec3::new(20.0, 0.0, 2.0));
        assert_eq!(ob.bounding_len(), 4.0);
        assert_eq!(ob.data.angle, 0.5);
    }

    #[test]
    fn replacing_data_reports_appearance_changes_only() {
        let mut ob = WorldObject::new(EntityId(1), chair());
        ob.state.in_proximity = true;

        let mut moved = chair();
        moved.pos.x += 1.0;
        assert!(!ob.replace_data(moved));
        assert!(ob.state.in_proximity);

        let mut remodelled = chair();
        remodelled.model_url = "table.bmesh".into();
        assert!(ob.replace_data(remodelled));
    }

    #[test]
    fn model_source_by_kind() {
        let ob = WorldObject::new(EntityId(3), chair());
        assert_eq!(
            ob.model_source(1),
            Some(ModelSource::Mesh("chair_lod1.bmesh".into()))
        );

        let mut voxels = chair();
        voxels.compressed_voxels = vec![1, 2, 3];
        let ob = WorldObject::new(EntityId(3), voxels);
        match ob.model_source(0) {
            Some(ModelSource::Voxels { key, compressed }) => {
                assert_eq!(key, lod::voxel_key(EntityId(3), lod::voxel_digest(&[1, 2, 3]), 0));
                assert_eq!(compressed, vec![1, 2, 3]);
            }
            other => panic!("expected voxels, got {other:?}"),
        }

        let empty = WorldObject::new(EntityId(4), ObjectData::default());
        assert_eq!(empty.model_source(0), None);
    }

    #[test]
    fn voxel_edit_changes_the_mesh_key() {
        let mut data = chair();
        data.compressed_voxels = vec![1, 2, 3];
        let mut ob = WorldObject::new(EntityId(3), data.clone());
        let before = ob.model_source(0).map(|s| s.key().clone());

        data.compressed_voxels.push(4);
        assert!(ob.replace_data(data));
        let after = ob.model_source(0).map(|s| s.key().clone());
        assert_ne!(before, after);
        assert_eq!(
            after,
            Some(lod::voxel_key(EntityId(3), lod::voxel_digest(&[1, 2, 3, 4]), 0))
        );
    }

    #[test]
    fn min_lod_follows_object_flag() {
        let mut data = chair();
        data.flags = ObjectData::MIN_LOD_LEVEL_IS_NEGATIVE_1;
        let ob = WorldObject::new(EntityId(1), data);
        assert_eq!(ob.lod_limits().min_lod, -1);
        assert_eq!(WorldObject::new(EntityId(2), chair()).lod_limits().min_lod, 0);
    }
}
