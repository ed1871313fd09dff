use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::{DVec3, Vec3};
use serde::Serialize;
use worldview_assets::{AssetSource, CacheStats, MeshHandle, ResourceCache, TextureHandle};
use worldview_common::EntityKey;
use worldview_protocol::{AvatarData, Decoder, encoder};
use worldview_registry::{EntityRegistry, LoginInfo, RegistryEvent};
use worldview_render::SceneSink;
use worldview_sched::{PipelineConfig, PipelineStats, ResourcePipeline};
use worldview_stream::{CellProximity, FrameTimer, ProximityTracker, Transition};

use crate::config::ViewerConfig;
use crate::error::ViewerError;
use crate::loading::ResourceAssigner;

/// Frames kept for timing statistics.
const FRAME_HISTORY: usize = 120;

/// Snapshot of viewer state for status output.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ViewerStats {
    pub objects: usize,
    pub avatars: usize,
    pub in_proximity: usize,
    pub meshes_cached: usize,
    pub meshes_parked: usize,
    pub textures_cached: usize,
    pub textures_parked: usize,
    pub mesh_cache: CacheStats,
    pub texture_cache: CacheStats,
    pub pipeline: PipelineStats,
    pub cells_queried: usize,
    pub messages_decoded: u64,
    pub frames: u64,
    pub avg_frame_ms: f64,
    pub max_frame_ms: f64,
    pub load_failures: u64,
    pub lifecycle_errors: u64,
}

/// The frame-loop context.
///
/// Owns the decoder, the registry, proximity tracking and everything
/// resources live in. Network bytes come in through
/// [`on_transport_data`](Self::on_transport_data); bytes to send are
/// collected with [`take_outbound`](Self::take_outbound).
pub struct Viewer<S: SceneSink> {
    config: ViewerConfig,
    decoder: Decoder,
    registry: EntityRegistry,
    tracker: ProximityTracker,
    cells: CellProximity,
    assigner: ResourceAssigner<S>,
    outbox: Vec<Vec<u8>>,
    campos: DVec3,
    cam_rotation: Vec3,
    connected: bool,
    last_avatar_update: Option<Instant>,
    timer: FrameTimer,
    frames: u64,
}

impl<S: SceneSink> Viewer<S> {
    pub fn new(
        config: ViewerConfig,
        source: Arc<dyn AssetSource>,
        sink: S,
    ) -> Result<Self, ViewerError> {
        let pipeline = config.pipeline_config();
        Self::with_pipeline_config(config, pipeline, source, sink)
    }

    /// Like [`new`](Self::new) with explicit stage and pool settings.
    pub fn with_pipeline_config(
        config: ViewerConfig,
        pipeline: PipelineConfig,
        source: Arc<dyn AssetSource>,
        sink: S,
    ) -> Result<Self, ViewerError> {
        let retain = config.cache.retain_unclaimed;
        let assigner = ResourceAssigner {
            meshes: ResourceCache::new("meshes", retain),
            textures: ResourceCache::new("textures", retain),
            pipeline: ResourcePipeline::new(pipeline, source)?,
            sink,
            prefer_ktx2: config.textures.prefer_ktx2,
            lifecycle_errors: 0,
            load_failures: 0,
        };
        Ok(Self {
            decoder: Decoder::new(config.decoder_config()),
            registry: EntityRegistry::new(),
            tracker: ProximityTracker::new(config.proximity.clone()),
            cells: CellProximity::new(config.cells.clone()),
            assigner,
            outbox: Vec::new(),
            campos: DVec3::ZERO,
            cam_rotation: Vec3::ZERO,
            connected: false,
            last_avatar_update: None,
            timer: FrameTimer::new(FRAME_HISTORY),
            frames: 0,
            config,
        })
    }

    /// Start a new connection: reset the decoder and the queried cells, then
    /// queue the handshake and the initial bounding-box query.
    pub fn connect(&mut self) {
        self.decoder = Decoder::new(self.config.decoder_config());
        let aabb = self.cells.set_camera_for_new_connection(self.campos);
        let campos = self.campos;
        let world = &self.config.world.name;
        tracing::info!(world = %world, "connecting");

        self.outbox
            .push(encoder::encode(|out| encoder::write_handshake(out, world)));
        self.outbox.push(encoder::encode(|out| {
            encoder::write_query_objects_in_aabb(out, campos, &aabb)
        }));
        self.connected = true;
        self.last_avatar_update = None;
    }

    /// Decode one transport delivery and react to what changed.
    ///
    /// Returns the number of messages decoded. Messages decoded before a
    /// fatal error are still applied.
    pub fn on_transport_data(&mut self, data: &[u8]) -> Result<usize, ViewerError> {
        let result = self.decoder.feed(data, &mut self.registry);
        for event in self.registry.drain_events() {
            self.handle_event(event);
        }
        Ok(result?)
    }

    fn handle_event(&mut self, event: RegistryEvent) {
        match event {
            RegistryEvent::Connected { client_avatar } => {
                tracing::info!(%client_avatar, "handshake complete");
            }
            RegistryEvent::ObjectAdded(_)
            | RegistryEvent::AvatarAdded(_)
            | RegistryEvent::ParcelAdded(_) => {}
            RegistryEvent::ObjectAppearanceChanged(uid) => self.reassign(EntityKey::Object(uid)),
            RegistryEvent::AvatarAppearanceChanged(uid) => self.reassign(EntityKey::Avatar(uid)),
            RegistryEvent::ObjectMoved(uid) => self.sync_transform(EntityKey::Object(uid)),
            RegistryEvent::AvatarMoved(uid) => self.sync_transform(EntityKey::Avatar(uid)),
            RegistryEvent::ObjectRemoved(mut ob) => self.assigner.unload(ob.as_mut()),
            RegistryEvent::AvatarRemoved(mut avatar) => self.assigner.unload(avatar.as_mut()),
            RegistryEvent::LoggedIn(info) => self.send_create_avatar(info),
        }
    }

    /// Reconcile an entity whose model or materials changed.
    fn reassign(&mut self, key: EntityKey) {
        let Some(entity) = self.registry.entity_mut(key) else {
            return;
        };
        if !entity.load_state().in_proximity {
            return;
        }
        self.assigner.load_for_lod(entity);
    }

    fn sync_transform(&mut self, key: EntityKey) {
        if let Some(entity) = self.registry.entity(key) {
            if entity.load_state().mesh_key.is_some() {
                self.assigner.sink.set_transform(key, &entity.transform());
            }
        }
    }

    fn send_create_avatar(&mut self, info: LoginInfo) {
        let Some(uid) = self.registry.client_avatar() else {
            tracing::warn!(username = %info.username, "logged in before handshake completed");
            return;
        };
        let avatar = AvatarData {
            uid,
            name: info.username,
            pos: self.campos,
            rotation: self.cam_rotation,
            settings: info.settings,
        };
        self.outbox
            .push(encoder::encode(|out| encoder::write_create_avatar(out, &avatar)));
    }

    pub fn set_camera(&mut self, pos: DVec3, rotation: Vec3) {
        self.campos = pos;
        self.cam_rotation = rotation;
    }

    /// Run one frame.
    pub fn frame(&mut self, now: Instant) -> Result<(), ViewerError> {
        let started = Instant::now();
        let _span = tracing::info_span!("frame", n = self.frames).entered();

        if self.connected {
            let cells = self.cells.update(self.campos);
            if !cells.is_empty() {
                let coords: Vec<[i32; 3]> = cells.iter().map(|c| c.to_array()).collect();
                let campos = self.campos;
                self.outbox.push(encoder::encode(|out| {
                    encoder::write_query_objects(out, campos, &coords)
                }));
            }
        }

        let transitions = self.tracker.update(
            self.campos,
            self.registry
                .loadables_mut(self.config.avatar.load_own_avatar),
        );
        for transition in transitions {
            let Some(entity) = self.registry.entity_mut(transition.key()) else {
                continue;
            };
            match transition {
                Transition::Entered { .. } | Transition::LodChanged { .. } => {
                    self.assigner.load_for_lod(entity)
                }
                Transition::Left { .. } => self.assigner.unload(entity),
            }
        }

        self.assigner.pipeline.pump(now, self.campos)?;
        for completion in self.assigner.pipeline.drain() {
            self.assigner
                .apply_completion(completion, &mut self.registry);
        }

        self.send_avatar_update(now);

        self.timer.record(started.elapsed());
        self.frames += 1;
        Ok(())
    }

    fn send_avatar_update(&mut self, now: Instant) {
        if !self.connected {
            return;
        }
        let Some(uid) = self.registry.client_avatar() else {
            return;
        };
        let interval = Duration::from_millis(self.config.avatar.update_interval_ms);
        if self
            .last_avatar_update
            .is_some_and(|t| now.saturating_duration_since(t) < interval)
        {
            return;
        }
        self.last_avatar_update = Some(now);
        let (pos, rotation) = (self.campos, self.cam_rotation);
        self.outbox.push(encoder::encode(|out| {
            encoder::write_avatar_transform_update(out, uid, pos, rotation, 0)
        }));
    }

    /// Queue a chat line for the server.
    pub fn send_chat(&mut self, message: &str) {
        self.outbox
            .push(encoder::encode(|out| encoder::write_chat(out, message)));
    }

    /// Bytes queued for the server since the last call, one entry per write.
    pub fn take_outbound(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outbox)
    }

    pub fn stats(&self) -> ViewerStats {
        let summary = self.registry.summary();
        ViewerStats {
            objects: summary.objects,
            avatars: summary.avatars,
            in_proximity: self.tracker.stats().in_proximity,
            meshes_cached: self.assigner.meshes.len(),
            meshes_parked: self.assigner.meshes.parked_len(),
            textures_cached: self.assigner.textures.len(),
            textures_parked: self.assigner.textures.parked_len(),
            mesh_cache: self.assigner.meshes.stats(),
            texture_cache: self.assigner.textures.stats(),
            pipeline: self.assigner.pipeline.stats(),
            cells_queried: self.cells.stats().total_queried,
            messages_decoded: self.decoder.messages_decoded(),
            frames: self.frames,
            avg_frame_ms: self.timer.average().as_secs_f64() * 1000.0,
            max_frame_ms: self.timer.max().as_secs_f64() * 1000.0,
            load_failures: self.assigner.load_failures,
            lifecycle_errors: self.assigner.lifecycle_errors,
        }
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn camera(&self) -> DVec3 {
        self.campos
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn meshes(&self) -> &ResourceCache<MeshHandle> {
        &self.assigner.meshes
    }

    pub fn textures(&self) -> &ResourceCache<TextureHandle> {
        &self.assigner.textures
    }

    pub fn pipeline_stats(&self) -> PipelineStats {
        self.assigner.pipeline.stats()
    }

    /// True when nothing is loading.
    pub fn is_idle(&self) -> bool {
        self.assigner.pipeline.is_idle()
    }

    pub fn sink(&self) -> &S {
        &self.assigner.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.assigner.sink
    }
}
