//! Resource keys for LOD variants.
//!
//! The server publishes each model and texture under a base URL, plus
//! `_lod1`/`_lod2` (and for textures `_lod0`) siblings of decreasing detail.

use sha2::{Digest, Sha256};
use worldview_common::EntityId;

use crate::handle::ResourceKey;

fn has_extension(url: &str, ext: &str) -> bool {
    url.rsplit_once('.')
        .is_some_and(|(_, e)| e.eq_ignore_ascii_case(ext))
}

fn is_remote(url: &str) -> bool {
    url.starts_with("http:") || url.starts_with("https:")
}

fn remove_dot_and_extension(url: &str) -> &str {
    match url.rfind('.') {
        // A dot inside a directory name is not an extension.
        Some(i) if !url[i..].contains('/') => &url[..i],
        _ => url,
    }
}

/// Key of the mesh to load for `level`. Level 0 and below use the base model.
pub fn model_key_for_level(base_url: &str, level: i32) -> ResourceKey {
    if level <= 0 || is_remote(base_url) {
        ResourceKey::from(base_url)
    } else {
        ResourceKey::new(format!(
            "{}_lod{level}.bmesh",
            remove_dot_and_extension(base_url)
        ))
    }
}

/// Key of the texture to load for `level`.
///
/// At or below the material's minimum LOD the base texture is used. Video
/// and remote textures have no LOD variants. Gif variants stay gifs; other
/// variants are png when the texture has alpha and jpg otherwise, or ktx2
/// when compressed textures are preferred.
pub fn texture_key_for_level(
    base_url: &str,
    level: i32,
    min_lod_level: i32,
    has_alpha: bool,
    prefer_ktx2: bool,
) -> ResourceKey {
    if level <= min_lod_level || has_extension(base_url, "mp4") || is_remote(base_url) {
        return ResourceKey::from(base_url);
    }

    let ext = if has_extension(base_url, "gif") {
        "gif"
    } else if prefer_ktx2 {
        "ktx2"
    } else if has_alpha {
        "png"
    } else {
        "jpg"
    };
    let level = level.clamp(0, 2);
    ResourceKey::new(format!(
        "{}_lod{level}.{ext}",
        remove_dot_and_extension(base_url)
    ))
}

/// Content hash of a voxel object's compressed data.
pub fn voxel_digest(compressed: &[u8]) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(compressed);
    let result = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&result[..8]);
    u64::from_le_bytes(bytes)
}

/// Key of a voxel object's built mesh.
///
/// Voxel meshes are per object and per content: after an edit the key
/// changes, so nothing built from the old data can match it.
pub fn voxel_key(uid: EntityId, digest: u64, model_lod: i32) -> ResourceKey {
    ResourceKey::new(format!("voxels:{uid}:{digest:016x}:lod{model_lod}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_keys() {
        assert_eq!(model_key_for_level("chair.bmesh", 0).as_str(), "chair.bmesh");
        assert_eq!(model_key_for_level("chair.bmesh", -1).as_str(), "chair.bmesh");
        assert_eq!(
            model_key_for_level("chair.glb", 2).as_str(),
            "chair_lod2.bmesh"
        );
        assert_eq!(
            model_key_for_level("https://x.org/a.glb", 1).as_str(),
            "https://x.org/a.glb"
        );
    }

    #[test]
    fn texture_keys_follow_alpha_and_format() {
        assert_eq!(
            texture_key_for_level("wall.png", 1, 0, false, false).as_str(),
            "wall_lod1.jpg"
        );
        assert_eq!(
            texture_key_for_level("wall.png", 2, 0, true, false).as_str(),
            "wall_lod2.png"
        );
        assert_eq!(
            texture_key_for_level("anim.gif", 1, 0, true, true).as_str(),
            "anim_lod1.gif"
        );
        assert_eq!(
            texture_key_for_level("wall.png", 1, 0, false, true).as_str(),
            "wall_lod1.ktx2"
        );
    }

    #[test]
    fn texture_at_or_below_min_lod_uses_base() {
        assert_eq!(
            texture_key_for_level("wall.png", 0, 0, false, false).as_str(),
            "wall.png"
        );
        // Materials with a -1 minimum get an explicit _lod0 variant.
        assert_eq!(
            texture_key_for_level("wall.png", 0, -1, false, false).as_str(),
            "wall_lod0.jpg"
        );
        assert_eq!(
            texture_key_for_level("wall.png", -1, -1, false, false).as_str(),
            "wall.png"
        );
    }

    #[test]
    fn video_and_remote_textures_have_no_variants() {
        assert_eq!(
            texture_key_for_level("clip.mp4", 2, 0, false, false).as_str(),
            "clip.mp4"
        );
        assert_eq!(
            texture_key_for_level("http://a/b.png", 2, 0, false, false).as_str(),
            "http://a/b.png"
        );
    }

    #[test]
    fn extension_removal_ignores_dotted_directories() {
        assert_eq!(remove_dot_and_extension("v1.2/mesh"), "v1.2/mesh");
        assert_eq!(remove_dot_and_extension("v1.2/mesh.bin"), "v1.2/mesh");
    }

    #[test]
    fn voxel_keys_are_per_object_level_and_content() {
        let d = voxel_digest(&[1, 2, 3]);
        assert_ne!(voxel_key(EntityId(1), d, 0), voxel_key(EntityId(2), d, 0));
        assert_ne!(voxel_key(EntityId(1), d, 0), voxel_key(EntityId(1), d, 1));

        let edited = voxel_digest(&[1, 2, 3, 4]);
        assert_ne!(d, edited);
        assert_ne!(voxel_key(EntityId(1), d, 0), voxel_key(EntityId(1), edited, 0));
        assert_eq!(d, voxel_digest(&[1, 2, 3]));

        let key = voxel_key(EntityId(7), 0xab, 2);
        assert_eq!(key.as_str(), "voxels:7:00000000000000ab:lod2");
    }
}
