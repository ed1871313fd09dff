use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use glam::DVec3;
use serde::Serialize;
use worldview_assets::{Asset, AssetKind, AssetSource, BuildInput, ResourceKey, SourceError};

use crate::error::SchedError;
use crate::pool::WorkerPool;
use crate::scheduler::{Stage, StageConfig};

/// Stage limits and pool sizes. Zero threads runs that pool inline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub download: StageConfig,
    pub build: StageConfig,
    pub fetch_threads: usize,
    pub build_threads: usize,
}

impl PipelineConfig {
    /// Both pools inline; results surface at the next drain.
    pub fn inline() -> Self {
        Self {
            download: StageConfig::download(),
            build: StageConfig::build(1),
            fetch_threads: 0,
            build_threads: 0,
        }
    }
}

/// Something that needs loading.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadRequest {
    /// Fetch bytes from the asset source, then build them.
    Fetch { key: ResourceKey, kind: AssetKind },
    /// Build from data already on the client.
    Voxels {
        key: ResourceKey,
        compressed: Vec<u8>,
        model_lod: i32,
    },
}

impl LoadRequest {
    pub fn key(&self) -> &ResourceKey {
        match self {
            LoadRequest::Fetch { key, .. } | LoadRequest::Voxels { key, .. } => key,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// First request for the key; a task was queued.
    Scheduled,
    /// Already loading; registered as a waiter.
    Joined,
}

/// A finished key and everyone who was waiting on it.
#[derive(Debug)]
pub enum Completion<W> {
    Ready {
        key: ResourceKey,
        asset: Asset,
        waiters: Vec<W>,
    },
    Failed {
        key: ResourceKey,
        error: SourceError,
        waiters: Vec<W>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    pub loading: usize,
    pub download_queued: usize,
    pub download_in_flight: usize,
    pub download_dispatched: u64,
    pub build_queued: usize,
    pub build_in_flight: usize,
    pub build_dispatched: u64,
    pub completed: u64,
    pub failed: u64,
}

struct FetchJob {
    key: ResourceKey,
    kind: AssetKind,
    pos: DVec3,
    size_factor: f32,
}

struct FetchOutcome {
    job: FetchJob,
    result: Result<Vec<u8>, SourceError>,
}

struct BuildOutcome {
    key: ResourceKey,
    result: Result<Asset, SourceError>,
}

/// Download stage feeding a build stage, with request deduplication.
///
/// `W` identifies a waiter; each is notified at most once per completion.
pub struct ResourcePipeline<W> {
    download: Stage<FetchJob>,
    build: Stage<BuildInput>,
    fetch_pool: WorkerPool<FetchJob, FetchOutcome>,
    build_pool: WorkerPool<BuildInput, BuildOutcome>,
    loading: HashSet<ResourceKey>,
    waiters: HashMap<ResourceKey, BTreeSet<W>>,
    completed: u64,
    failed: u64,
}

impl<W: Ord> ResourcePipeline<W> {
    pub fn new(config: PipelineConfig, source: Arc<dyn AssetSource>) -> Result<Self, SchedError> {
        let fetch_source = Arc::clone(&source);
        let fetch_pool = WorkerPool::new("fetch", config.fetch_threads, move |job: FetchJob| {
            let result = fetch_source.fetch(&job.key, job.kind);
            FetchOutcome { job, result }
        })?;
        let build_pool = WorkerPool::new("build", config.build_threads, move |input: BuildInput| {
            let key = input.key().clone();
            BuildOutcome {
                key,
                result: source.build(input),
            }
        })?;

        Ok(Self {
            download: Stage::new("download", config.download),
            build: Stage::new("build", config.build),
            fetch_pool,
            build_pool,
            loading: HashSet::new(),
            waiters: HashMap::new(),
            completed: 0,
            failed: 0,
        })
    }

    /// Ask for `request` on behalf of `waiter`.
    ///
    /// Only the first request for a key creates a task; later ones join the
    /// waiter set until the key completes.
    pub fn request(
        &mut self,
        request: LoadRequest,
        pos: DVec3,
        size_factor: f32,
        waiter: W,
    ) -> RequestOutcome {
        let key = request.key().clone();
        if self.loading.contains(&key) {
            self.waiters.entry(key).or_default().insert(waiter);
            return RequestOutcome::Joined;
        }

        tracing::debug!(%key, "scheduling load");
        self.loading.insert(key.clone());
        self.waiters.entry(key.clone()).or_default().insert(waiter);
        match request {
            LoadRequest::Fetch { key, kind } => self.download.enqueue(
                pos,
                size_factor,
                FetchJob {
                    key,
                    kind,
                    pos,
                    size_factor,
                },
            ),
            LoadRequest::Voxels {
                key,
                compressed,
                model_lod,
            } => self.build.enqueue(
                pos,
                size_factor,
                BuildInput::Voxels {
                    key,
                    compressed,
                    model_lod,
                },
            ),
        }
        RequestOutcome::Scheduled
    }

    /// Sort and dispatch both stages.
    pub fn pump(&mut self, now: Instant, campos: DVec3) -> Result<(), SchedError> {
        let _span = tracing::info_span!("pipeline_pump").entered();
        let fetch_pool = &self.fetch_pool;
        self.download
            .pump(now, campos, |job| fetch_pool.submit(job))?;
        let build_pool = &self.build_pool;
        self.build.pump(now, campos, |input| build_pool.submit(input))?;
        Ok(())
    }

    /// Collect finished work.
    ///
    /// Fetched bytes move on to the build stage; finished builds and any
    /// failures come back with their waiters and leave the loading set.
    pub fn drain(&mut self) -> Vec<Completion<W>> {
        let mut out = Vec::new();

        for fetched in self.fetch_pool.try_drain() {
            self.download.complete();
            let FetchOutcome { job, result } = fetched;
            match result {
                Ok(bytes) => {
                    tracing::trace!(key = %job.key, len = bytes.len(), "fetched");
                    self.build.enqueue(
                        job.pos,
                        job.size_factor,
                        BuildInput::Fetched {
                            key: job.key,
                            kind: job.kind,
                            bytes,
                        },
                    );
                }
                Err(error) => out.push(self.fail(job.key, error)),
            }
        }

        for built in self.build_pool.try_drain() {
            self.build.complete();
            match built.result {
                Ok(asset) => {
                    self.loading.remove(&built.key);
                    let waiters = self.take_waiters(&built.key);
                    self.completed += 1;
                    tracing::debug!(key = %built.key, waiters = waiters.len(), "load complete");
                    out.push(Completion::Ready {
                        key: built.key,
                        asset,
                        waiters,
                    });
                }
                Err(error) => out.push(self.fail(built.key, error)),
            }
        }
        out
    }

    fn fail(&mut self, key: ResourceKey, error: SourceError) -> Completion<W> {
        tracing::warn!(%key, %error, "load failed");
        self.loading.remove(&key);
        self.failed += 1;
        let waiters = self.take_waiters(&key);
        Completion::Failed {
            key,
            error,
            waiters,
        }
    }

    fn take_waiters(&mut self, key: &ResourceKey) -> Vec<W> {
        self.waiters
            .remove(key)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn is_loading(&self, key: &ResourceKey) -> bool {
        self.loading.contains(key)
    }

    pub fn waiters(&self, key: &ResourceKey) -> impl Iterator<Item = &W> {
        self.waiters.get(key).into_iter().flatten()
    }

    /// Nothing queued, in flight or between stages.
    pub fn is_idle(&self) -> bool {
        self.loading.is_empty()
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            loading: self.loading.len(),
            download_queued: self.download.queued(),
            download_in_flight: self.download.in_flight(),
            download_dispatched: self.download.dispatched(),
            build_queued: self.build.queued(),
            build_in_flight: self.build.in_flight(),
            build_dispatched: self.build.dispatched(),
            completed: self.completed,
            failed: self.failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use worldview_assets::{MeshData, MeshHandle, TextureData, TextureHandle};
    use worldview_common::Aabb;

    /// Serves a fixed set of keys and records every call.
    #[derive(Default)]
    struct FakeSource {
        missing: Vec<&'static str>,
        fetches: Mutex<Vec<String>>,
        builds: Mutex<Vec<String>>,
    }

    impl AssetSource for FakeSource {
        fn fetch(&self, key: &ResourceKey, _kind: AssetKind) -> Result<Vec<u8>, SourceError> {
            self.fetches.lock().unwrap().push(key.to_string());
            if self.missing.contains(&key.as_str()) {
                return Err(SourceError::NotFound { key: key.clone() });
            }
            Ok(key.as_str().as_bytes().to_vec())
        }

        fn build(&self, input: BuildInput) -> Result<Asset, SourceError> {
            self.builds.lock().unwrap().push(input.key().to_string());
            Ok(match input {
                BuildInput::Fetched {
                    kind: AssetKind::Texture,
                    bytes,
                    ..
                } => Asset::Texture(TextureHandle::new(TextureData {
                    width: 1,
                    height: 1,
                    has_alpha: false,
                    byte_len: bytes.len(),
                })),
                other => Asset::Mesh(MeshHandle::new(MeshData {
                    vertex_count: match other {
                        BuildInput::Fetched { bytes, .. } => bytes.len() as u32,
                        BuildInput::Voxels { compressed, .. } => compressed.len() as u32,
                    },
                    triangle_count: 1,
                    aabb: Aabb::around(DVec3::ZERO, 1.0),
                    collision: None,
                })),
            })
        }
    }

    fn pipeline(source: Arc<FakeSource>) -> ResourcePipeline<u32> {
        ResourcePipeline::new(PipelineConfig::inline(), source).unwrap()
    }

    fn mesh(key: &str) -> LoadRequest {
        LoadRequest::Fetch {
            key: key.into(),
            kind: AssetKind::Mesh,
        }
    }

    /// Pump and drain until something completes or nothing is loading.
    fn run(p: &mut ResourcePipeline<u32>) -> Vec<Completion<u32>> {
        for _ in 0..4 {
            p.pump(Instant::now(), DVec3::ZERO).unwrap();
            let done = p.drain();
            if !done.is_empty() {
                return done;
            }
        }
        Vec::new()
    }

    #[test]
    fn duplicate_requests_share_one_task() {
        let source = Arc::new(FakeSource::default());
        let mut p = pipeline(source.clone());

        assert_eq!(p.request(mesh("a.bmesh"), DVec3::ZERO, 1.0, 1), RequestOutcome::Scheduled);
        assert_eq!(p.request(mesh("a.bmesh"), DVec3::ZERO, 1.0, 2), RequestOutcome::Joined);
        assert!(p.is_loading(&"a.bmesh".into()));

        let done = run(&mut p);
        assert_eq!(done.len(), 1);
        match &done[0] {
            Completion::Ready { key, waiters, .. } => {
                assert_eq!(key.as_str(), "a.bmesh");
                assert_eq!(waiters, &[1, 2]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(source.fetches.lock().unwrap().len(), 1);
        assert_eq!(source.builds.lock().unwrap().len(), 1);
        assert!(p.is_idle());
    }

    #[test]
    fn key_stays_loading_between_stages() {
        let mut p = pipeline(Arc::new(FakeSource::default()));
        p.request(mesh("a.bmesh"), DVec3::ZERO, 1.0, 1);
        p.pump(Instant::now(), DVec3::ZERO).unwrap();
        // Fetched, now waiting for the build stage.
        assert!(p.drain().is_empty());
        assert_eq!(p.stats().build_queued, 1);
        assert_eq!(p.request(mesh("a.bmesh"), DVec3::ZERO, 1.0, 3), RequestOutcome::Joined);
    }

    #[test]
    fn voxels_skip_download() {
        let source = Arc::new(FakeSource::default());
        let mut p = pipeline(source.clone());
        p.request(
            LoadRequest::Voxels {
                key: "voxels:1:00000000000000ab:lod0".into(),
                compressed: vec![1, 2, 3],
                model_lod: 0,
            },
            DVec3::ZERO,
            1.0,
            7,
        );
        p.pump(Instant::now(), DVec3::ZERO).unwrap();
        let done = p.drain();
        assert!(matches!(&done[..], [Completion::Ready { .. }]));
        assert!(source.fetches.lock().unwrap().is_empty());
    }

    #[test]
    fn failure_clears_bookkeeping_and_allows_retry() {
        let source = Arc::new(FakeSource {
            missing: vec!["gone.bmesh"],
            ..FakeSource::default()
        });
        let mut p = pipeline(source.clone());
        p.request(mesh("gone.bmesh"), DVec3::ZERO, 1.0, 1);
        let done = run(&mut p);
        match &done[..] {
            [Completion::Failed { error, waiters, .. }] => {
                assert!(matches!(error, SourceError::NotFound { .. }));
                assert_eq!(waiters, &[1]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!p.is_loading(&"gone.bmesh".into()));
        assert_eq!(p.stats().failed, 1);

        assert_eq!(p.request(mesh("gone.bmesh"), DVec3::ZERO, 1.0, 1), RequestOutcome::Scheduled);
    }

    #[test]
    fn download_concurrency_is_capped() {
        let config = PipelineConfig {
            download: StageConfig {
                max_in_flight: 2,
                sort_interval: Duration::ZERO,
            },
            ..PipelineConfig::inline()
        };
        let mut p: ResourcePipeline<u32> =
            ResourcePipeline::new(config, Arc::new(FakeSource::default())).unwrap();
        for i in 0..5 {
            p.request(mesh(&format!("m{i}.bmesh")), DVec3::ZERO, 1.0, i);
        }
        p.pump(Instant::now(), DVec3::ZERO).unwrap();
        let stats = p.stats();
        assert_eq!(stats.download_in_flight, 2);
        assert_eq!(stats.download_queued, 3);
        assert_eq!(stats.download_dispatched, 2);

        // Fetched bytes move on to the build stage and free the slots.
        p.drain();
        p.pump(Instant::now(), DVec3::ZERO).unwrap();
        let stats = p.stats();
        assert_eq!(stats.download_dispatched, 4);
        assert_eq!(stats.build_dispatched, 2);
    }

    #[test]
    fn nearer_requests_dispatch_first() {
        let source = Arc::new(FakeSource::default());
        let config = PipelineConfig {
            download: StageConfig {
                max_in_flight: 1,
                sort_interval: Duration::ZERO,
            },
            ..PipelineConfig::inline()
        };
        let mut p: ResourcePipeline<u32> = ResourcePipeline::new(config, source.clone()).unwrap();
        p.request(mesh("far.bmesh"), DVec3::new(500.0, 0.0, 0.0), 1.0, 1);
        p.request(mesh("near.bmesh"), DVec3::new(5.0, 0.0, 0.0), 1.0, 2);
        p.pump(Instant::now(), DVec3::ZERO).unwrap();
        assert_eq!(*source.fetches.lock().unwrap(), ["near.bmesh"]);
    }

    #[test]
    fn threaded_pools_deliver() {
        let config = PipelineConfig {
            fetch_threads: 2,
            build_threads: 2,
            ..PipelineConfig::inline()
        };
        let mut p: ResourcePipeline<u32> =
            ResourcePipeline::new(config, Arc::new(FakeSource::default())).unwrap();
        for i in 0..4 {
            p.request(mesh(&format!("t{i}.bmesh")), DVec3::ZERO, 1.0, i);
        }
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut ready = 0;
        while !p.is_idle() && Instant::now() < deadline {
            p.pump(Instant::now(), DVec3::ZERO).unwrap();
            ready += p.drain().len();
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(ready, 4);
    }
}
