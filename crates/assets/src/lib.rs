//! Assets: handles for built meshes and textures, the reference-counted
//! resource cache, and derivation of per-LOD resource keys.
//!
//! Resources are identified by [`ResourceKey`], the URL-like string the
//! server uses. A key names one LOD variant; the base key and its `_lodN`
//! siblings are distinct cache entries.
//!
//! # Invariants
//! - A live cache entry has a reference count of at least one.
//! - Handles share built data through `Arc`; cloning a handle never touches
//!   the cache count.

mod cache;
mod handle;
pub mod lod;
mod source;

pub use cache::{CacheError, CacheStats, Release, ResourceCache};
pub use handle::{
    Asset, AssetKind, CollisionShape, MeshData, MeshHandle, ResourceKey, TextureData,
    TextureHandle, TextureInstance,
};
pub use source::{AssetSource, BuildInput, SourceError};
