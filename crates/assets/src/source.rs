use crate::handle::{Asset, AssetKind, ResourceKey};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("resource '{key}' not found")]
    NotFound { key: ResourceKey },

    #[error("IO error fetching '{key}': {source}")]
    Io {
        key: ResourceKey,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed resource '{key}': {reason}")]
    Malformed { key: ResourceKey, reason: String },
}

/// Input to the CPU build stage. Owns its bytes so it can cross to a worker.
#[derive(Debug, Clone)]
pub enum BuildInput {
    /// Bytes produced by the fetch stage.
    Fetched {
        key: ResourceKey,
        kind: AssetKind,
        bytes: Vec<u8>,
    },
    /// A voxel object's compressed voxel data, copied out of the registry.
    Voxels {
        key: ResourceKey,
        compressed: Vec<u8>,
        model_lod: i32,
    },
}

impl BuildInput {
    pub fn key(&self) -> &ResourceKey {
        match self {
            BuildInput::Fetched { key, .. } | BuildInput::Voxels { key, .. } => key,
        }
    }
}

/// Where resource bytes come from and how they become assets.
///
/// Both calls run on worker threads and may block.
pub trait AssetSource: Send + Sync + 'static {
    fn fetch(&self, key: &ResourceKey, kind: AssetKind) -> Result<Vec<u8>, SourceError>;

    fn build(&self, input: BuildInput) -> Result<Asset, SourceError>;
}
