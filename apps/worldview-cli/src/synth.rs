//! Synthetic session generation: a capture of server traffic and the
//! resource directory it refers to.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::Context;
use glam::{DVec3, Vec3};
use worldview_assets::lod::{model_key_for_level, texture_key_for_level};
use worldview_assets::{CollisionShape, MeshData};
use worldview_common::{Aabb, EntityId, ParcelId, UserId};
use worldview_protocol::messages::{CLIENT_PROTOCOL_OK, PROTOCOL_VERSION};
use worldview_protocol::{
    AvatarData, AvatarSettings, CaptureWriter, InboundMessage, MaterialData, ObjectData,
    ParcelData, encoder,
};
use worldview_registry::DEFAULT_AVATAR_MODEL;

use crate::source::{encode_mesh, encode_texture};

pub const CAPTURE_FILE: &str = "session.wvcap";
pub const RESOURCE_DIR: &str = "resources";

/// Uid the synthetic server assigns to the client's avatar.
pub const CLIENT_AVATAR: EntityId = EntityId(1);

const FIRST_OBJECT_UID: u64 = 1000;
const OBJECTS_PER_CHUNK: usize = 256;
/// Every this many objects, one is a voxel object.
const VOXEL_EVERY: usize = 25;

#[derive(Debug, Clone)]
pub struct SynthOptions {
    pub objects: usize,
    /// Distinct models (and textures) shared among the objects.
    pub models: usize,
    /// Other users' avatars.
    pub avatars: usize,
    /// Grid spacing between objects.
    pub spacing: f64,
    pub seed: u64,
}

impl Default for SynthOptions {
    fn default() -> Self {
        Self {
            objects: 2000,
            models: 20,
            avatars: 4,
            spacing: 12.0,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SynthSummary {
    pub capture: PathBuf,
    pub resources: PathBuf,
    pub resource_files: usize,
    pub chunks: usize,
    /// Objects left after the scripted destroy.
    pub final_objects: usize,
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Uniform in `[lo, hi)`.
fn uniform(state: &mut u64, lo: f64, hi: f64) -> f64 {
    let unit = (splitmix64(state) >> 11) as f64 / (1u64 << 53) as f64;
    lo + unit * (hi - lo)
}

fn model_url(m: usize) -> String {
    format!("model_{m}.bmesh")
}

fn texture_url(m: usize) -> String {
    format!("tex_{m}.jpg")
}

fn write_resources(dir: &Path, models: usize) -> anyhow::Result<usize> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let mut files = Vec::new();

    let mesh = |triangles: u32| MeshData {
        vertex_count: triangles * 3,
        triangle_count: triangles,
        aabb: Aabb::around(DVec3::ZERO, 1.0),
        collision: Some(CollisionShape {
            triangle_count: triangles,
            aabb: Aabb::around(DVec3::ZERO, 1.0),
        }),
    };
    for m in 0..models {
        for (level, triangles) in [(0, 4000), (1, 1000), (2, 250)] {
            let key = model_key_for_level(&model_url(m), level);
            files.push((key.as_str().to_string(), encode_mesh(&mesh(triangles))));
        }
        for (level, size) in [(0, 64), (1, 32), (2, 16)] {
            let key = texture_key_for_level(&texture_url(m), level, 0, false, false);
            files.push((key.as_str().to_string(), encode_texture(size, size, false)));
        }
    }
    files.push((DEFAULT_AVATAR_MODEL.to_string(), encode_mesh(&mesh(6000))));

    for (name, bytes) in &files {
        let path = dir.join(name);
        std::fs::write(&path, bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(files.len())
}

fn world_objects(opts: &SynthOptions, rng: &mut u64) -> Vec<(EntityId, ObjectData)> {
    let side = (opts.objects as f64).sqrt().ceil().max(1.0) as usize;
    let half = side as f64 * opts.spacing * 0.5;
    (0..opts.objects)
        .map(|i| {
            let m = i % opts.models.max(1);
            let pos = DVec3::new(
                (i % side) as f64 * opts.spacing - half + uniform(rng, -1.0, 1.0),
                (i / side) as f64 * opts.spacing - half + uniform(rng, -1.0, 1.0),
                0.0,
            );
            let extent = uniform(rng, 0.5, 4.0) as f32;
            let mut object = ObjectData {
                model_url: model_url(m),
                materials: vec![MaterialData {
                    colour_texture_url: texture_url(m),
                    ..MaterialData::default()
                }],
                pos,
                axis: Vec3::Z,
                angle: uniform(rng, 0.0, std::f64::consts::TAU) as f32,
                scale: Vec3::ONE,
                aabb_ws: Aabb::around(pos, extent),
                max_model_lod_level: 2,
                flags: 0,
                compressed_voxels: Vec::new(),
            };
            if i % VOXEL_EVERY == VOXEL_EVERY - 1 {
                let len = uniform(rng, 32.0, 256.0) as usize;
                object.model_url.clear();
                object.materials.clear();
                object.compressed_voxels = (0..len).map(|_| splitmix64(rng) as u8).collect();
            }
            (EntityId(FIRST_OBJECT_UID + i as u64), object)
        })
        .collect()
}

fn chunk(msgs: &[InboundMessage]) -> Vec<u8> {
    encoder::encode(|out| {
        for msg in msgs {
            msg.write(out);
        }
    })
}

/// Write a capture and resource directory under `out_dir`.
pub fn synthesize(out_dir: &Path, opts: &SynthOptions) -> anyhow::Result<SynthSummary> {
    let resources = out_dir.join(RESOURCE_DIR);
    let resource_files = write_resources(&resources, opts.models.max(1))?;

    let capture = out_dir.join(CAPTURE_FILE);
    let file = File::create(&capture)
        .with_context(|| format!("failed to create {}", capture.display()))?;
    let mut writer = CaptureWriter::new(BufWriter::new(file))?;
    let mut rng = opts.seed;

    writer.write_chunk(&encoder::encode(|out| {
        encoder::write_server_greeting(out, CLIENT_PROTOCOL_OK, PROTOCOL_VERSION, CLIENT_AVATAR)
    }))?;

    let avatar = |uid: EntityId, name: String, pos: DVec3| AvatarData {
        uid,
        name,
        pos,
        rotation: Vec3::ZERO,
        settings: AvatarSettings::default(),
    };
    let mut session = vec![
        InboundMessage::TimeSync { global_time: 0.0 },
        InboundMessage::ParcelCreated(ParcelData {
            id: ParcelId(1),
            owner: UserId(1),
            aabb_min: DVec3::new(-50.0, -50.0, 0.0),
            aabb_max: DVec3::new(50.0, 50.0, 10.0),
            description: "synthetic parcel".into(),
        }),
        InboundMessage::AvatarIsHere(avatar(CLIENT_AVATAR, "synth".into(), DVec3::ZERO)),
        InboundMessage::LoggedIn {
            user_id: UserId(1),
            username: "synth".into(),
            settings: AvatarSettings::default(),
        },
    ];
    for a in 0..opts.avatars {
        let pos = DVec3::new(uniform(&mut rng, -30.0, 30.0), uniform(&mut rng, -30.0, 30.0), 0.0);
        session.push(InboundMessage::AvatarCreated(avatar(
            EntityId(2 + a as u64),
            format!("visitor{a}"),
            pos,
        )));
    }
    writer.write_chunk(&chunk(&session))?;

    let objects = world_objects(opts, &mut rng);
    for batch in objects.chunks(OBJECTS_PER_CHUNK) {
        let msgs: Vec<InboundMessage> = batch
            .iter()
            .map(|(uid, object)| InboundMessage::ObjectInitialSend {
                uid: *uid,
                object: object.clone(),
            })
            .collect();
        writer.write_chunk(&chunk(&msgs))?;
    }

    // A little live traffic: chat, a move, a remodel and a removal.
    let mut live = vec![InboundMessage::Chat {
        name: "visitor0".into(),
        message: "hello".into(),
    }];
    let mut final_objects = objects.len();
    if let Some((uid, object)) = objects.first() {
        live.push(InboundMessage::ObjectTransformUpdate {
            uid: *uid,
            pos: object.pos + DVec3::new(0.5, 0.0, 0.0),
            axis: Vec3::Z,
            angle: 0.0,
        });
    }
    if let Some((uid, object)) = objects.get(1) {
        let mut remodelled = object.clone();
        remodelled.model_url = model_url(0);
        live.push(InboundMessage::ObjectFullUpdate {
            uid: *uid,
            object: remodelled,
        });
    }
    if let Some((uid, _)) = objects.get(2) {
        live.push(InboundMessage::ObjectDestroyed { uid: *uid });
        final_objects -= 1;
    }
    writer.write_chunk(&chunk(&live))?;

    let chunks = writer.chunks_written();
    writer.finish()?;
    tracing::info!(
        capture = %capture.display(),
        chunks,
        resource_files,
        "synthesized session"
    );

    Ok(SynthSummary {
        capture,
        resources,
        resource_files,
        chunks,
        final_objects,
    })
}
