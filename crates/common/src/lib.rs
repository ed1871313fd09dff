//! Shared types used across the worldview crates.

pub mod types;

pub use types::{Aabb, EntityId, EntityKey, MeshState, ParcelId, Transform, UserId};
