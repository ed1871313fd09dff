//! Assigning cached or scheduled resources to entities.
//!
//! The ordering rule everywhere here: take the reference to the new resource
//! first, hand it to the scene, and only then release the old one.

use worldview_assets::lod::texture_key_for_level;
use worldview_assets::{
    Asset, AssetKind, CacheError, MeshHandle, Release, ResourceCache, ResourceKey, TextureHandle,
};
use worldview_common::{EntityKey, MeshState};
use worldview_registry::{EntityRegistry, Loadable, ModelSource};
use worldview_render::SceneSink;
use worldview_sched::{Completion, LoadRequest, ResourcePipeline, size_factor_for};

/// Who a pending load is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Waiter {
    Model(EntityKey),
    Texture { entity: EntityKey, material: usize },
}

impl Waiter {
    pub fn entity(&self) -> EntityKey {
        match self {
            Waiter::Model(entity) | Waiter::Texture { entity, .. } => *entity,
        }
    }
}

/// Caches, pipeline and scene: everything an entity's resources live in.
pub(crate) struct ResourceAssigner<S> {
    pub meshes: ResourceCache<MeshHandle>,
    pub textures: ResourceCache<TextureHandle>,
    pub pipeline: ResourcePipeline<Waiter>,
    pub sink: S,
    pub prefer_ktx2: bool,
    pub lifecycle_errors: u64,
    pub load_failures: u64,
}

/// Texture key wanted for each material slot at the entity's current LOD.
fn desired_textures(entity: &dyn Loadable, prefer_ktx2: bool) -> Vec<(Option<ResourceKey>, [f32; 4])> {
    let lod = entity.load_state().current_lod;
    entity
        .materials()
        .iter()
        .map(|mat| {
            let key = (!mat.colour_texture_url.is_empty()).then(|| {
                texture_key_for_level(
                    &mat.colour_texture_url,
                    lod,
                    mat.min_lod_level(),
                    mat.colour_tex_has_alpha(),
                    prefer_ktx2,
                )
            });
            (key, mat.tex_matrix)
        })
        .collect()
}

/// Mesh key wanted at the entity's current LOD, if any.
fn desired_model(entity: &dyn Loadable) -> Option<ModelSource> {
    let lod = entity.load_state().current_lod;
    entity.model_source(entity.lod_limits().model_lod(lod))
}

impl<S: SceneSink> ResourceAssigner<S> {
    /// Bring the entity's mesh and textures in line with its current LOD.
    ///
    /// Cached resources are assigned immediately; the rest are requested and
    /// the entity keeps what it has until they land.
    pub fn load_for_lod(&mut self, entity: &mut dyn Loadable) {
        let ekey = entity.entity_key();
        let lod = entity.load_state().current_lod;
        let model_lod = entity.lod_limits().model_lod(lod);

        if let Some(source) = desired_model(entity) {
            let mkey = source.key().clone();
            if entity.load_state().mesh_key.as_ref() == Some(&mkey) {
                // Same model at this LOD; only textures can differ.
                entity.load_state_mut().loaded_lod = Some(lod);
            } else if let Some(handle) = self.meshes.acquire_existing(&mkey) {
                tracing::trace!(entity = %ekey, key = %mkey, "mesh cache hit");
                self.assign_mesh(entity, mkey, handle);
            } else {
                let state = entity.load_state_mut();
                if state.mesh_state == MeshState::NotLoaded {
                    state.mesh_state = MeshState::Loading;
                }
                let request = match source {
                    ModelSource::Mesh(key) => LoadRequest::Fetch {
                        key,
                        kind: AssetKind::Mesh,
                    },
                    ModelSource::Voxels { key, compressed } => LoadRequest::Voxels {
                        key,
                        compressed,
                        model_lod,
                    },
                };
                let size_factor = size_factor_for(entity.bounding_len(), entity.importance());
                self.pipeline
                    .request(request, entity.centroid(), size_factor, Waiter::Model(ekey));
            }
        } else if entity.load_state().mesh_key.is_some() {
            // The model was taken away.
            self.unload(entity);
            return;
        }

        self.assign_textures(entity);
    }

    /// Attach `handle` (already referenced on the entity's behalf) and drop
    /// the entity's previous mesh.
    fn assign_mesh(&mut self, entity: &mut dyn Loadable, mkey: ResourceKey, handle: MeshHandle) {
        let ekey = entity.entity_key();
        let transform = entity.transform();
        let lod = entity.load_state().current_lod;
        let model_lod = entity.lod_limits().model_lod(lod);

        self.sink.attach(ekey, &handle, &transform);

        let state = entity.load_state_mut();
        if state.collision_key.as_ref() != Some(&mkey) {
            if state.collision_key.take().is_some() {
                self.sink.unregister_collision(ekey);
            }
            if let Some(shape) = &handle.data().collision {
                self.sink.register_collision(ekey, &mkey, shape);
                state.collision_key = Some(mkey.clone());
            }
        }

        let old = state.mesh_key.replace(mkey);
        state.mesh_state = MeshState::Loaded;
        state.loaded_lod = Some(lod);
        state.loaded_model_lod = Some(model_lod);

        // The new drawable needs every texture the entity already holds.
        let materials = entity.materials();
        for (i, tkey) in entity.load_state().textures.iter().enumerate() {
            let (Some(tkey), Some(mat)) = (tkey, materials.get(i)) else {
                continue;
            };
            if let Some(tex) = self.textures.get(tkey) {
                self.sink.bind_texture(ekey, i, tex.instance(mat.tex_matrix));
            }
        }

        if let Some(old) = old {
            self.release_mesh(&old);
        }
    }

    /// Reconcile every material slot's texture with the current LOD.
    fn assign_textures(&mut self, entity: &mut dyn Loadable) {
        let ekey = entity.entity_key();
        let desired = desired_textures(entity, self.prefer_ktx2);
        let pos = entity.centroid();
        let size_factor = size_factor_for(entity.bounding_len(), entity.importance());

        let state = entity.load_state_mut();
        let attached = state.mesh_key.is_some();
        if state.textures.len() > desired.len() {
            for stale in state.textures.split_off(desired.len()).into_iter().flatten() {
                self.release_texture(&stale);
            }
        }
        state.textures.resize(desired.len(), None);

        for (i, (want, matrix)) in desired.into_iter().enumerate() {
            if state.textures[i] == want {
                continue;
            }
            let Some(want) = want else {
                if let Some(old) = state.textures[i].take() {
                    self.release_texture(&old);
                }
                continue;
            };
            match self.textures.acquire_existing(&want) {
                Some(tex) => {
                    if attached {
                        self.sink.bind_texture(ekey, i, tex.instance(matrix));
                    }
                    if let Some(old) = state.textures[i].replace(want) {
                        self.release_texture(&old);
                    }
                }
                None => {
                    self.pipeline.request(
                        LoadRequest::Fetch {
                            key: want,
                            kind: AssetKind::Texture,
                        },
                        pos,
                        size_factor,
                        Waiter::Texture {
                            entity: ekey,
                            material: i,
                        },
                    );
                }
            }
        }
    }

    /// Release everything the entity holds and take it out of the scene.
    pub fn unload(&mut self, entity: &mut dyn Loadable) {
        let ekey = entity.entity_key();
        let state = entity.load_state_mut();
        let had_mesh = state.mesh_key.is_some();

        if let Some(mkey) = state.mesh_key.take() {
            self.release_mesh(&mkey);
        }
        for tkey in std::mem::take(&mut state.textures).into_iter().flatten() {
            self.release_texture(&tkey);
        }
        if state.collision_key.take().is_some() {
            self.sink.unregister_collision(ekey);
        }
        if had_mesh {
            self.sink.detach(ekey);
        }
        state.mesh_state = MeshState::NotLoaded;
        state.loaded_lod = None;
        state.loaded_model_lod = None;
        tracing::debug!(entity = %ekey, "unloaded");
    }

    /// Hand a finished load to every waiter that still wants it.
    ///
    /// Waiters that are gone, out of proximity or now want a different key
    /// are skipped; if none remain the result is parked for reuse.
    pub fn apply_completion(&mut self, completion: Completion<Waiter>, registry: &mut EntityRegistry) {
        match completion {
            Completion::Ready {
                key,
                asset: Asset::Mesh(handle),
                waiters,
            } => {
                let takers: Vec<EntityKey> = waiters
                    .into_iter()
                    .filter_map(|waiter| match waiter {
                        Waiter::Model(ekey) => Some(ekey),
                        Waiter::Texture { .. } => {
                            tracing::warn!(%key, ?waiter, "mesh delivered to texture waiter");
                            None
                        }
                    })
                    .filter(|ekey| {
                        registry.entity(*ekey).is_some_and(|entity| {
                            let state = entity.load_state();
                            state.in_proximity
                                && state.mesh_key.as_ref() != Some(&key)
                                && desired_model(entity).is_some_and(|s| s.key() == &key)
                        })
                    })
                    .collect();
                if !self.add_mesh(&key, &handle, takers.len()) {
                    return;
                }
                for ekey in takers {
                    if let Some(entity) = registry.entity_mut(ekey) {
                        self.assign_mesh(entity, key.clone(), handle.clone());
                    }
                }
            }
            Completion::Ready {
                key,
                asset: Asset::Texture(tex),
                waiters,
            } => {
                let mut takers = Vec::new();
                for waiter in waiters {
                    let Waiter::Texture {
                        entity: ekey,
                        material,
                    } = waiter
                    else {
                        tracing::warn!(%key, ?waiter, "texture delivered to model waiter");
                        continue;
                    };
                    let Some(entity) = registry.entity(ekey) else {
                        continue;
                    };
                    let state = entity.load_state();
                    let held = state.textures.get(material).cloned().flatten();
                    let desired = desired_textures(entity, self.prefer_ktx2);
                    if let Some((Some(want), matrix)) = desired.get(material) {
                        if state.in_proximity && *want == key && held.as_ref() != Some(&key) {
                            takers.push((ekey, material, *matrix));
                        }
                    }
                }
                if !self.add_texture(&key, &tex, takers.len()) {
                    return;
                }
                for (ekey, material, matrix) in takers {
                    let Some(entity) = registry.entity_mut(ekey) else {
                        continue;
                    };
                    let state = entity.load_state_mut();
                    if state.mesh_key.is_some() {
                        self.sink.bind_texture(ekey, material, tex.instance(matrix));
                    }
                    if state.textures.len() <= material {
                        state.textures.resize(material + 1, None);
                    }
                    if let Some(old) = state.textures[material].replace(key.clone()) {
                        self.release_texture(&old);
                    }
                }
            }
            Completion::Failed {
                key,
                waiters,
                error,
            } => {
                self.load_failures += 1;
                tracing::warn!(%key, %error, waiters = waiters.len(), "resource unavailable");
                for waiter in waiters {
                    let Waiter::Model(ekey) = waiter else {
                        continue;
                    };
                    let Some(entity) = registry.entity_mut(ekey) else {
                        continue;
                    };
                    // A newer model may already be on its way.
                    if !desired_model(entity).is_some_and(|s| s.key() == &key) {
                        continue;
                    }
                    let state = entity.load_state_mut();
                    if state.mesh_state == MeshState::Loading {
                        state.mesh_state = MeshState::NotLoaded;
                    }
                }
            }
        }
    }

    /// Put a landed mesh in the cache held by `count` new owners, or park it
    /// when nobody wants it. Returns whether owners should be assigned.
    fn add_mesh(&mut self, key: &ResourceKey, handle: &MeshHandle, count: usize) -> bool {
        add_to_cache(&mut self.meshes, key, handle, count, &mut self.lifecycle_errors)
    }

    fn add_texture(&mut self, key: &ResourceKey, tex: &TextureHandle, count: usize) -> bool {
        add_to_cache(&mut self.textures, key, tex, count, &mut self.lifecycle_errors)
    }

    fn release_mesh(&mut self, key: &ResourceKey) {
        release_from_cache(&mut self.meshes, key, &mut self.lifecycle_errors);
    }

    fn release_texture(&mut self, key: &ResourceKey) {
        release_from_cache(&mut self.textures, key, &mut self.lifecycle_errors);
    }
}

fn add_to_cache<T: Clone>(
    cache: &mut ResourceCache<T>,
    key: &ResourceKey,
    handle: &T,
    count: usize,
    errors: &mut u64,
) -> bool {
    if count == 0 {
        tracing::debug!(%key, "no waiter wants result, parking");
        cache.park(key.clone(), handle.clone());
        return false;
    }
    if cache.contains(key) {
        // Someone reached the key another way; each taker needs its own reference.
        for _ in 0..count {
            cache.acquire_existing(key);
        }
        return true;
    }
    match cache.insert_new(key.clone(), handle.clone(), count as u32) {
        Ok(()) => true,
        Err(e) => {
            *errors += 1;
            tracing::error!(error = %e, "cache insert failed");
            false
        }
    }
}

fn release_from_cache<T: Clone>(cache: &mut ResourceCache<T>, key: &ResourceKey, errors: &mut u64) {
    match cache.release(key) {
        Ok(Release::Disposed(_)) => tracing::debug!(%key, "disposed"),
        Ok(Release::Retained { .. }) => {}
        Err(CacheError::ReleaseUnknown { .. }) => *errors += 1,
        Err(e) => {
            *errors += 1;
            tracing::error!(error = %e, "cache release failed");
        }
    }
}
