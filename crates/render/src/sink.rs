use std::collections::BTreeMap;
use std::fmt::Write as _;

use worldview_assets::{CollisionShape, MeshHandle, ResourceKey, TextureInstance};
use worldview_common::{EntityKey, Transform};

/// Rendering and physics collaborator.
///
/// The viewer decides which mesh and textures belong to which entity; an
/// implementation decides how to draw and collide them.
pub trait SceneSink {
    /// Give `entity` a drawable for `mesh`, replacing any previous one.
    fn attach(&mut self, entity: EntityKey, mesh: &MeshHandle, transform: &Transform);

    /// Remove the entity's drawable and texture bindings.
    fn detach(&mut self, entity: EntityKey);

    fn set_transform(&mut self, entity: EntityKey, transform: &Transform);

    fn bind_texture(&mut self, entity: EntityKey, material: usize, texture: TextureInstance);

    fn register_collision(&mut self, entity: EntityKey, key: &ResourceKey, shape: &CollisionShape);

    fn unregister_collision(&mut self, entity: EntityKey);
}

/// One call received by a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SceneCall {
    Attach(EntityKey),
    Detach(EntityKey),
    SetTransform(EntityKey),
    BindTexture(EntityKey, usize),
    RegisterCollision(EntityKey, ResourceKey),
    UnregisterCollision(EntityKey),
}

/// What the recording sink holds for one entity.
#[derive(Debug, Clone)]
pub struct SceneEntity {
    pub mesh: MeshHandle,
    pub transform: Transform,
    pub textures: BTreeMap<usize, TextureInstance>,
}

/// In-memory scene that records every call made to it.
#[derive(Debug, Default)]
pub struct RecordingSink {
    entities: BTreeMap<EntityKey, SceneEntity>,
    collisions: BTreeMap<EntityKey, ResourceKey>,
    calls: Vec<SceneCall>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(&self, key: EntityKey) -> Option<&SceneEntity> {
        self.entities.get(&key)
    }

    pub fn attached_count(&self) -> usize {
        self.entities.len()
    }

    pub fn collision_key(&self, key: EntityKey) -> Option<&ResourceKey> {
        self.collisions.get(&key)
    }

    pub fn collision_count(&self) -> usize {
        self.collisions.len()
    }

    pub fn calls(&self) -> &[SceneCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Human-readable dump of the current scene.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "=== Scene ({} attached, {} colliders) ===",
            self.entities.len(),
            self.collisions.len()
        );
        for (key, ent) in &self.entities {
            let p = ent.transform.position;
            let _ = writeln!(
                out,
                "  [{key}] pos=({:.2}, {:.2}, {:.2}) tris={} textures={}",
                p.x,
                p.y,
                p.z,
                ent.mesh.data().triangle_count,
                ent.textures.len()
            );
        }
        out
    }
}

impl SceneSink for RecordingSink {
    fn attach(&mut self, entity: EntityKey, mesh: &MeshHandle, transform: &Transform) {
        tracing::trace!(%entity, "attach");
        let textures = self
            .entities
            .remove(&entity)
            .map(|e| e.textures)
            .unwrap_or_default();
        self.entities.insert(
            entity,
            SceneEntity {
                mesh: mesh.clone(),
                transform: *transform,
                textures,
            },
        );
        self.calls.push(SceneCall::Attach(entity));
    }

    fn detach(&mut self, entity: EntityKey) {
        tracing::trace!(%entity, "detach");
        self.entities.remove(&entity);
        self.calls.push(SceneCall::Detach(entity));
    }

    fn set_transform(&mut self, entity: EntityKey, transform: &Transform) {
        if let Some(ent) = self.entities.get_mut(&entity) {
            ent.transform = *transform;
        }
        self.calls.push(SceneCall::SetTransform(entity));
    }

    fn bind_texture(&mut self, entity: EntityKey, material: usize, texture: TextureInstance) {
        match self.entities.get_mut(&entity) {
            Some(ent) => {
                ent.textures.insert(material, texture);
            }
            None => tracing::warn!(%entity, material, "texture bound to detached entity"),
        }
        self.calls.push(SceneCall::BindTexture(entity, material));
    }

    fn register_collision(&mut self, entity: EntityKey, key: &ResourceKey, _shape: &CollisionShape) {
        self.collisions.insert(entity, key.clone());
        self.calls
            .push(SceneCall::RegisterCollision(entity, key.clone()));
    }

    fn unregister_collision(&mut self, entity: EntityKey) {
        self.collisions.remove(&entity);
        self.calls.push(SceneCall::UnregisterCollision(entity));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;
    use worldview_assets::{MeshData, TextureData, TextureHandle};
    use worldview_common::{Aabb, EntityId};

    fn mesh(tris: u32) -> MeshHandle {
        MeshHandle::new(MeshData {
            vertex_count: tris * 3,
            triangle_count: tris,
            aabb: Aabb::around(DVec3::ZERO, 1.0),
            collision: None,
        })
    }

    const E: EntityKey = EntityKey::Object(EntityId(1));

    #[test]
    fn reattach_keeps_texture_bindings() {
        let mut sink = RecordingSink::new();
        sink.attach(E, &mesh(10), &Transform::default());
        let tex = TextureHandle::new(TextureData {
            width: 4,
            height: 4,
            has_alpha: false,
            byte_len: 64,
        });
        sink.bind_texture(E, 0, tex.instance([1.0, 0.0, 0.0, 1.0]));
        sink.attach(E, &mesh(5), &Transform::default());

        let ent = sink.entity(E).unwrap();
        assert_eq!(ent.mesh.data().triangle_count, 5);
        assert_eq!(ent.textures.len(), 1);
    }

    #[test]
    fn detach_and_collision_lifecycle() {
        let mut sink = RecordingSink::new();
        sink.attach(E, &mesh(1), &Transform::default());
        let shape = CollisionShape {
            triangle_count: 1,
            aabb: Aabb::around(DVec3::ZERO, 1.0),
        };
        sink.register_collision(E, &"m.bmesh".into(), &shape);
        assert_eq!(sink.collision_key(E).map(|k| k.as_str()), Some("m.bmesh"));

        sink.detach(E);
        sink.unregister_collision(E);
        assert_eq!(sink.attached_count(), 0);
        assert_eq!(sink.collision_count(), 0);
        assert_eq!(
            sink.calls(),
            [
                SceneCall::Attach(E),
                SceneCall::RegisterCollision(E, "m.bmesh".into()),
                SceneCall::Detach(E),
                SceneCall::UnregisterCollision(E),
            ]
        );
    }

    #[test]
    fn describe_lists_attached_entities() {
        let mut sink = RecordingSink::new();
        sink.attach(
            E,
            &mesh(12),
            &Transform {
                position: DVec3::new(1.0, 2.0, 3.0),
                ..Transform::default()
            },
        );
        let text = sink.describe();
        assert!(text.contains("1 attached"));
        assert!(text.contains("[object:1] pos=(1.00, 2.00, 3.00) tris=12"));
    }
}
