use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use worldview_protocol::DecoderConfig;
use worldview_sched::{PipelineConfig, StageConfig, default_worker_count};
use worldview_stream::{CellQueryConfig, ProximityConfig};

use crate::error::ConfigError;

/// Top-level viewer configuration, persisted as JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ViewerConfig {
    pub world: WorldConfig,
    pub proximity: ProximityConfig,
    pub cells: CellQueryConfig,
    pub download: DownloadConfig,
    pub build: BuildConfig,
    pub cache: CacheConfig,
    pub textures: TextureConfig,
    pub avatar: AvatarConfig,
    pub decoder: DecoderSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorldConfig {
    /// World name sent in the handshake. Empty selects the main world.
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DownloadConfig {
    pub max_in_flight: usize,
    pub sort_interval_ms: u64,
    pub fetch_threads: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 10,
            sort_interval_ms: 2000,
            fetch_threads: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BuildConfig {
    /// Build threads; 0 picks half the cores.
    pub workers: usize,
    pub sort_interval_ms: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            sort_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Unclaimed results kept per cache for later reuse.
    pub retain_unclaimed: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            retain_unclaimed: 64,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TextureConfig {
    pub prefer_ktx2: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AvatarConfig {
    pub update_interval_ms: u64,
    pub load_own_avatar: bool,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 100,
            load_own_avatar: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DecoderSection {
    pub max_messages_per_buffer: usize,
}

impl Default for DecoderSection {
    fn default() -> Self {
        Self {
            max_messages_per_buffer: DecoderConfig::default().max_messages_per_buffer,
        }
    }
}

/// Command-line values that win over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub world: Option<String>,
    pub load_distance: Option<f64>,
    pub fetch_threads: Option<usize>,
    pub build_workers: Option<usize>,
    pub prefer_ktx2: Option<bool>,
    pub load_own_avatar: Option<bool>,
}

impl ViewerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Load `path` if it exists, otherwise use defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(world) = &overrides.world {
            self.world.name = world.clone();
        }
        if let Some(d) = overrides.load_distance {
            self.cells.load_distance = d;
        }
        if let Some(n) = overrides.fetch_threads {
            self.download.fetch_threads = n;
        }
        if let Some(n) = overrides.build_workers {
            self.build.workers = n;
        }
        if let Some(v) = overrides.prefer_ktx2 {
            self.textures.prefer_ktx2 = v;
        }
        if let Some(v) = overrides.load_own_avatar {
            self.avatar.load_own_avatar = v;
        }
    }

    /// Build thread count with 0 resolved to the hardware default.
    pub fn build_workers(&self) -> usize {
        if self.build.workers == 0 {
            default_worker_count()
        } else {
            self.build.workers
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        let workers = self.build_workers();
        PipelineConfig {
            download: StageConfig {
                max_in_flight: self.download.max_in_flight.max(1),
                sort_interval: Duration::from_millis(self.download.sort_interval_ms),
            },
            build: StageConfig {
                sort_interval: Duration::from_millis(self.build.sort_interval_ms),
                ..StageConfig::build(workers)
            },
            fetch_threads: self.download.fetch_threads,
            build_threads: workers,
        }
    }

    pub fn decoder_config(&self) -> DecoderConfig {
        DecoderConfig {
            max_messages_per_buffer: self.decoder.max_messages_per_buffer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ViewerConfig::default();
        assert_eq!(config.proximity.load_everything_dist, 150.0);
        assert_eq!(config.proximity.lod_thresholds, [0.6, 0.16, 0.03]);
        assert_eq!(config.cells.load_distance, 1000.0);
        assert_eq!(config.download.max_in_flight, 10);
        assert_eq!(config.build.sort_interval_ms, 100);
        assert_eq!(config.cache.retain_unclaimed, 64);
        assert_eq!(config.avatar.update_interval_ms, 100);
        assert_eq!(config.decoder.max_messages_per_buffer, 100_000);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("viewer.json");
        let mut config = ViewerConfig::default();
        config.world.name = "sub".into();
        config.textures.prefer_ktx2 = true;
        config.save(&path).unwrap();

        assert_eq!(ViewerConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("viewer.json");
        std::fs::write(&path, r#"{ "cells": { "load_distance": 400.0 } }"#).unwrap();

        let config = ViewerConfig::load(&path).unwrap();
        assert_eq!(config.cells.load_distance, 400.0);
        assert_eq!(config.cells.cell_width, 200.0);
        assert_eq!(config.download, DownloadConfig::default());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ViewerConfig::load_or_default(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, ViewerConfig::default());
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = ViewerConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.json"));
    }

    #[test]
    fn overrides_win() {
        let mut config = ViewerConfig::default();
        config.apply_overrides(&ConfigOverrides {
            world: Some("test".into()),
            build_workers: Some(3),
            ..ConfigOverrides::default()
        });
        assert_eq!(config.world.name, "test");
        assert_eq!(config.build_workers(), 3);
        assert_eq!(config.pipeline_config().build_threads, 3);
        assert_eq!(config.pipeline_config().build.max_in_flight, 6);
    }

    #[test]
    fn zero_workers_resolves_to_hardware() {
        assert!(ViewerConfig::default().build_workers() >= 1);
    }
}
