//! Viewer client: the frame loop tying decoding, proximity, loading and the
//! scene together.
//!
//! # Invariants
//! - An entity holds exactly one cache reference per key it records in its
//!   load state; every path that drops the key releases it once.
//! - A new resource is referenced and handed to the scene before the one it
//!   replaces is released.
//! - A completion is applied only to waiters that still want its key.

mod config;
mod error;
mod loading;
mod viewer;

pub use config::{
    AvatarConfig, BuildConfig, CacheConfig, ConfigOverrides, DecoderSection, DownloadConfig,
    TextureConfig, ViewerConfig, WorldConfig,
};
pub use error::{ConfigError, ViewerError};
pub use loading::Waiter;
pub use viewer::{Viewer, ViewerStats};
