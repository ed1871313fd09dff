//! Asset source backed by a resource directory.
//!
//! Meshes and textures are stored in small summary formats: enough for the
//! viewer to size, cache and hand them to a scene, without real geometry.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use glam::DVec3;
use worldview_assets::{
    Asset, AssetKind, AssetSource, BuildInput, CollisionShape, MeshData, MeshHandle, ResourceKey,
    SourceError, TextureData, TextureHandle,
};
use worldview_common::Aabb;
use worldview_protocol::{BufferIn, BufferOut, ProtocolError};

pub const MESH_MAGIC: &[u8; 4] = b"WVMS";
pub const TEXTURE_MAGIC: &[u8; 4] = b"WVTX";

/// Mesh file: magic, vertex and triangle counts, bounds, collision flag.
pub fn encode_mesh(data: &MeshData) -> Vec<u8> {
    let mut out = BufferOut::new();
    out.write_raw(MESH_MAGIC);
    out.write_u32(data.vertex_count);
    out.write_u32(data.triangle_count);
    out.write_vec3f(data.aabb.min);
    out.write_vec3f(data.aabb.max);
    out.write_u8(u8::from(data.collision.is_some()));
    out.into_bytes()
}

/// Texture file: magic, dimensions, alpha flag, then the pixel bytes.
pub fn encode_texture(width: u32, height: u32, has_alpha: bool) -> Vec<u8> {
    let channels = if has_alpha { 4 } else { 3 };
    let mut out = BufferOut::new();
    out.write_raw(TEXTURE_MAGIC);
    out.write_u32(width);
    out.write_u32(height);
    out.write_u8(u8::from(has_alpha));
    out.write_raw(&vec![0x80; (width * height * channels) as usize]);
    out.into_bytes()
}

fn read_mesh(buf: &mut BufferIn<'_>) -> Result<MeshData, ProtocolError> {
    let vertex_count = buf.read_u32()?;
    let triangle_count = buf.read_u32()?;
    let aabb = Aabb::new(buf.read_vec3f()?, buf.read_vec3f()?);
    let collision = (buf.read_u8()? != 0).then_some(CollisionShape {
        triangle_count,
        aabb,
    });
    Ok(MeshData {
        vertex_count,
        triangle_count,
        aabb,
        collision,
    })
}

fn read_texture(buf: &mut BufferIn<'_>) -> Result<TextureData, ProtocolError> {
    Ok(TextureData {
        width: buf.read_u32()?,
        height: buf.read_u32()?,
        has_alpha: buf.read_u8()? != 0,
        byte_len: buf.remaining(),
    })
}

/// Stand-in mesher: a triangle budget proportional to the voxel data,
/// halved per model LOD.
fn mesh_voxels(compressed: &[u8], model_lod: i32) -> MeshData {
    let shift = model_lod.clamp(0, 2) as u32;
    let triangle_count = (compressed.len() as u32).saturating_mul(12) >> shift;
    let aabb = Aabb::around(DVec3::ZERO, 0.5);
    MeshData {
        vertex_count: triangle_count.saturating_mul(3),
        triangle_count,
        aabb,
        collision: Some(CollisionShape {
            triangle_count,
            aabb,
        }),
    }
}

pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Only plain relative paths map into the directory.
    fn path_for(&self, key: &ResourceKey) -> Option<PathBuf> {
        let rel = Path::new(key.as_str());
        let plain = !key.as_str().contains("://")
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        plain.then(|| self.root.join(rel))
    }

    fn decode<'a>(
        key: &ResourceKey,
        bytes: &'a [u8],
        magic: &[u8; 4],
    ) -> Result<BufferIn<'a>, SourceError> {
        if bytes.get(..4) != Some(magic.as_slice()) {
            return Err(SourceError::Malformed {
                key: key.clone(),
                reason: "bad magic".into(),
            });
        }
        Ok(BufferIn::new(&bytes[4..]))
    }
}

impl AssetSource for DirSource {
    fn fetch(&self, key: &ResourceKey, _kind: AssetKind) -> Result<Vec<u8>, SourceError> {
        let Some(path) = self.path_for(key) else {
            return Err(SourceError::NotFound { key: key.clone() });
        };
        std::fs::read(&path).map_err(|source| match source.kind() {
            ErrorKind::NotFound => SourceError::NotFound { key: key.clone() },
            _ => SourceError::Io {
                key: key.clone(),
                source,
            },
        })
    }

    fn build(&self, input: BuildInput) -> Result<Asset, SourceError> {
        let malformed = |key: &ResourceKey, e: ProtocolError| SourceError::Malformed {
            key: key.clone(),
            reason: e.to_string(),
        };
        match input {
            BuildInput::Fetched {
                key,
                kind: AssetKind::Mesh,
                bytes,
            } => {
                let mut buf = Self::decode(&key, &bytes, MESH_MAGIC)?;
                let data = read_mesh(&mut buf).map_err(|e| malformed(&key, e))?;
                Ok(Asset::Mesh(MeshHandle::new(data)))
            }
            BuildInput::Fetched {
                key,
                kind: AssetKind::Texture,
                bytes,
            } => {
                let mut buf = Self::decode(&key, &bytes, TEXTURE_MAGIC)?;
                let data = read_texture(&mut buf).map_err(|e| malformed(&key, e))?;
                Ok(Asset::Texture(TextureHandle::new(data)))
            }
            BuildInput::Voxels {
                compressed,
                model_lod,
                ..
            } => Ok(Asset::Mesh(MeshHandle::new(mesh_voxels(
                &compressed,
                model_lod,
            )))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetch_and_build(source: &DirSource, key: &str, kind: AssetKind) -> Result<Asset, SourceError> {
        let key = ResourceKey::from(key);
        let bytes = source.fetch(&key, kind)?;
        source.build(BuildInput::Fetched { key, kind, bytes })
    }

    #[test]
    fn reads_meshes_and_textures_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mesh = MeshData {
            vertex_count: 30,
            triangle_count: 10,
            aabb: Aabb::around(DVec3::ZERO, 2.0),
            collision: None,
        };
        std::fs::write(dir.path().join("a.bmesh"), encode_mesh(&mesh)).unwrap();
        std::fs::write(dir.path().join("a.png"), encode_texture(4, 2, true)).unwrap();
        let source = DirSource::new(dir.path());

        match fetch_and_build(&source, "a.bmesh", AssetKind::Mesh).unwrap() {
            Asset::Mesh(handle) => assert_eq!(handle.data(), &mesh),
            other => panic!("unexpected {other:?}"),
        }
        match fetch_and_build(&source, "a.png", AssetKind::Texture).unwrap() {
            Asset::Texture(tex) => {
                assert_eq!((tex.data().width, tex.data().height), (4, 2));
                assert!(tex.data().has_alpha);
                assert_eq!(tex.data().byte_len, 32);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_and_escaping_keys_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirSource::new(dir.path().join("res"));
        for key in ["absent.bmesh", "../secret", "/etc/passwd", "https://x.org/a.glb"] {
            let err = source
                .fetch(&ResourceKey::from(key), AssetKind::Mesh)
                .unwrap_err();
            assert!(matches!(err, SourceError::NotFound { .. }), "{key}: {err}");
        }
    }

    #[test]
    fn wrong_format_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("t.jpg"), encode_texture(1, 1, false)).unwrap();
        let source = DirSource::new(dir.path());
        let err = fetch_and_build(&source, "t.jpg", AssetKind::Mesh).unwrap_err();
        assert!(matches!(err, SourceError::Malformed { .. }));
    }

    #[test]
    fn voxel_detail_drops_with_lod() {
        let data = vec![0u8; 10];
        assert_eq!(mesh_voxels(&data, 0).triangle_count, 120);
        assert_eq!(mesh_voxels(&data, 1).triangle_count, 60);
        assert_eq!(mesh_voxels(&data, 5).triangle_count, 30);
    }
}
