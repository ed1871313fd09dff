use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use worldview_common::Aabb;

/// Stable string naming one fetchable or buildable resource variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ResourceKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Which cache and which build path a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetKind {
    Mesh,
    Texture,
}

/// Triangle soup summary handed to the physics collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollisionShape {
    pub triangle_count: u32,
    pub aabb: Aabb,
}

/// CPU-side result of building a mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshData {
    pub vertex_count: u32,
    pub triangle_count: u32,
    pub aabb: Aabb,
    pub collision: Option<CollisionShape>,
}

/// Shared handle to a built mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshHandle(pub Arc<MeshData>);

impl MeshHandle {
    pub fn new(data: MeshData) -> Self {
        Self(Arc::new(data))
    }

    pub fn data(&self) -> &MeshData {
        &self.0
    }
}

/// CPU-side result of decoding a texture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub has_alpha: bool,
    pub byte_len: usize,
}

/// Shared handle to decoded texture data.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureHandle(pub Arc<TextureData>);

impl TextureHandle {
    pub fn new(data: TextureData) -> Self {
        Self(Arc::new(data))
    }

    pub fn data(&self) -> &TextureData {
        &self.0
    }

    /// Per-binding copy carrying its own texture matrix. The pixel data stays
    /// shared with the cached handle.
    pub fn instance(&self, matrix: [f32; 4]) -> TextureInstance {
        TextureInstance {
            base: self.clone(),
            matrix,
        }
    }
}

/// A texture bound to one material slot.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureInstance {
    pub base: TextureHandle,
    pub matrix: [f32; 4],
}

/// Output of the build stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Asset {
    Mesh(MeshHandle),
    Texture(TextureHandle),
}

impl Asset {
    pub fn kind(&self) -> AssetKind {
        match self {
            Asset::Mesh(_) => AssetKind::Mesh,
            Asset::Texture(_) => AssetKind::Texture,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texture_instances_share_pixels_but_not_matrices() {
        let tex = TextureHandle::new(TextureData {
            width: 4,
            height: 4,
            has_alpha: false,
            byte_len: 64,
        });
        let a = tex.instance([1.0, 0.0, 0.0, 1.0]);
        let b = tex.instance([2.0, 0.0, 0.0, 2.0]);
        assert!(Arc::ptr_eq(&a.base.0, &b.base.0));
        assert_ne!(a.matrix, b.matrix);
        // Two instances plus the original handle.
        assert_eq!(Arc::strong_count(&tex.0), 3);
    }

    #[test]
    fn resource_key_display_is_the_raw_string() {
        let key = ResourceKey::from("models/chair_lod1.bmesh");
        assert_eq!(key.to_string(), "models/chair_lod1.bmesh");
        assert_eq!(key.as_str(), "models/chair_lod1.bmesh");
    }
}
