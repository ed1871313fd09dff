use glam::{DVec3, Quat, Vec3};
use worldview_assets::lod;
use worldview_common::{EntityId, EntityKey, Transform};
use worldview_protocol::{AvatarData, AvatarSettings, MaterialData, ScalarVal};

use crate::entity::{LoadState, Loadable, LodLimits, ModelSource};

/// Model used when an avatar has not chosen one.
pub const DEFAULT_AVATAR_MODEL: &str = "xbot_glb_3242545562312850498.bmesh";

/// Avatars have no server-side bounds; treat them as person-sized.
pub const AVATAR_BOUNDING_LEN: f32 = 1.8;

/// Queue priority boost for the client's own avatar.
pub const OWN_AVATAR_IMPORTANCE: f32 = 1.0e4;

#[derive(Debug, Clone)]
pub struct Avatar {
    pub uid: EntityId,
    pub name: String,
    pub pos: DVec3,
    /// Euler angles (roll, pitch, heading).
    pub rotation: Vec3,
    pub anim_state: u32,
    pub settings: AvatarSettings,
    /// This avatar is the one the client is driving.
    pub is_own: bool,
    pub state: LoadState,
}

fn default_settings() -> AvatarSettings {
    let body = MaterialData {
        colour_rgb: Vec3::new(0.5, 0.6, 0.7),
        metallic_fraction: ScalarVal::new(0.5),
        roughness: ScalarVal::new(0.3),
        ..MaterialData::default()
    };
    let joints = MaterialData {
        colour_rgb: Vec3::new(0.8, 0.8, 0.8),
        roughness: ScalarVal::new(0.3),
        ..MaterialData::default()
    };
    AvatarSettings {
        model_url: DEFAULT_AVATAR_MODEL.to_string(),
        materials: vec![body, joints],
    }
}

impl Avatar {
    pub fn from_data(data: AvatarData, is_own: bool) -> Self {
        let mut avatar = Self {
            uid: data.uid,
            name: data.name,
            pos: data.pos,
            rotation: data.rotation,
            anim_state: 0,
            settings: AvatarSettings::default(),
            is_own,
            state: LoadState::default(),
        };
        avatar.set_settings(data.settings);
        avatar
    }

    /// Apply new appearance settings, substituting the default model when
    /// none is set. Returns true if the appearance changed.
    pub fn set_settings(&mut self, settings: AvatarSettings) -> bool {
        let settings = if settings.model_url.is_empty() {
            default_settings()
        } else {
            settings
        };
        let changed = settings != self.settings;
        self.settings = settings;
        changed
    }

    pub fn set_transform(&mut self, pos: DVec3, rotation: Vec3, anim_state: u32) {
        self.pos = pos;
        self.rotation = rotation;
        self.anim_state = anim_state;
    }
}

impl Loadable for Avatar {
    fn entity_key(&self) -> EntityKey {
        EntityKey::Avatar(self.uid)
    }

    fn centroid(&self) -> DVec3 {
        self.pos
    }

    fn bounding_len(&self) -> f32 {
        AVATAR_BOUNDING_LEN
    }

    fn transform(&self) -> Transform {
        Transform {
            position: self.pos,
            rotation: Quat::from_rotation_z(self.rotation.z),
            scale: Vec3::ONE,
        }
    }

    fn materials(&self) -> &[MaterialData] {
        &self.settings.materials
    }

    fn lod_limits(&self) -> LodLimits {
        LodLimits {
            min_lod: 0,
            max_lod: 0,
            max_model_lod: 0,
        }
    }

    fn model_source(&self, model_lod: i32) -> Option<ModelSource> {
        Some(ModelSource::Mesh(lod::model_key_for_level(
            &self.settings.model_url,
            model_lod,
        )))
    }

    fn importance(&self) -> f32 {
        if self.is_own { OWN_AVATAR_IMPORTANCE } else { 1.0 }
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

    fn data(model_url: &str) -> AvatarData {
        AvatarData {
            uid: EntityId(5),
            name: "ann".into(),
            pos: DVec3::new(1.0, 2.0, 0.0),
            rotation: Vec3::ZERO,
            settings: AvatarSettings {
                model_url: model_url.into(),
                materials: Vec::new(),
            },
        }
    }

    #[test]
    fn empty_model_falls_back_to_default() {
        let av = Avatar::from_data(data(""), false);
        assert_eq!(av.settings.model_url, DEFAULT_AVATAR_MODEL);
        assert_eq!(av.materials().len(), 2);
        assert_eq!(
            av.model_source(0),
            Some(ModelSource::Mesh(DEFAULT_AVATAR_MODEL.into()))
        );
    }

    #[test]
    fn settings_change_detection() {
        let mut av = Avatar::from_data(data("robot.bmesh"), false);
        assert!(!av.set_settings(data("robot.bmesh").settings));
        assert!(av.set_settings(data("cat.bmesh").settings));
    }

    #[test]
    fn avatars_always_use_base_model() {
        let av = Avatar::from_data(data("robot.bmesh"), false);
        let limits = av.lod_limits();
        assert_eq!(limits.clamp_lod(2), 0);
        assert_eq!(limits.model_lod(2), 0);
    }

    #[test]
    fn own_avatar_is_prioritised() {
        assert_eq!(Avatar::from_data(data("a"), true).importance(), OWN_AVATAR_IMPORTANCE);
        assert_eq!(Avatar::from_data(data("a"), false).importance(), 1.0);
    }
}
