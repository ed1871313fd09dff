//! Message ids and payload records.
//!
//! Each payload knows how to read itself from a message body and write itself
//! back. Writers exist for the client messages we send and for the server
//! messages used by capture synthesis and tests.

use glam::{DVec3, Vec3};
use worldview_common::{Aabb, EntityId, ParcelId, UserId};

use crate::error::ProtocolError;
use crate::wire::{BufferIn, BufferOut};

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

pub const PROTOCOL_VERSION: u32 = 38;
pub const HELLO: u32 = 1_357_924_680;
pub const CONNECTION_KIND_UPDATES: u32 = 500;

pub const CLIENT_PROTOCOL_OK: u32 = 10_000;
pub const CLIENT_PROTOCOL_TOO_OLD: u32 = 10_001;
pub const CLIENT_PROTOCOL_TOO_NEW: u32 = 10_002;

/// `u32 type` plus `u32 byte_length`.
pub const HEADER_LEN: usize = 8;

// ---------------------------------------------------------------------------
// Message ids
// ---------------------------------------------------------------------------

// --- Avatars ---
pub const AVATAR_CREATED: u32 = 1000;
pub const AVATAR_DESTROYED: u32 = 1001;
pub const AVATAR_TRANSFORM_UPDATE: u32 = 1002;
pub const AVATAR_FULL_UPDATE: u32 = 1003;
pub const CREATE_AVATAR: u32 = 1004;
pub const AVATAR_IS_HERE: u32 = 1005;

// --- Chat ---
pub const CHAT_MESSAGE: u32 = 2000;

// --- Objects ---
pub const OBJECT_CREATED: u32 = 3000;
pub const OBJECT_DESTROYED: u32 = 3001;
pub const OBJECT_TRANSFORM_UPDATE: u32 = 3002;
pub const OBJECT_FULL_UPDATE: u32 = 3003;
pub const QUERY_OBJECTS: u32 = 3020;
pub const OBJECT_INITIAL_SEND: u32 = 3021;
pub const QUERY_OBJECTS_IN_AABB: u32 = 3022;

// --- Parcels ---
pub const PARCEL_CREATED: u32 = 3100;

// --- Session ---
pub const LOG_IN: u32 = 8000;
pub const LOGGED_IN: u32 = 8003;
pub const TIME_SYNC: u32 = 9000;

// ---------------------------------------------------------------------------
// Materials
// ---------------------------------------------------------------------------

pub const MATERIAL_VERSION: u32 = 8;

/// A scalar material parameter with an optional texture.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScalarVal {
    pub val: f32,
    pub texture_url: String,
}

impl ScalarVal {
    pub fn new(val: f32) -> Self {
        Self {
            val,
            texture_url: String::new(),
        }
    }

    fn read(buf: &mut BufferIn<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            val: buf.read_f32()?,
            texture_url: buf.read_string()?,
        })
    }

    fn write(&self, out: &mut BufferOut) {
        out.write_f32(self.val);
        out.write_string(&self.texture_url);
    }
}

/// Surface description attached to each submesh of a model.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialData {
    pub colour_rgb: Vec3,
    pub colour_texture_url: String,
    pub emission_rgb: Vec3,
    pub emission_texture_url: String,
    pub roughness: ScalarVal,
    pub metallic_fraction: ScalarVal,
    pub opacity: ScalarVal,
    /// Row-major 2x2 texture coordinate matrix.
    pub tex_matrix: [f32; 4],
    pub emission_lum_flux: f32,
    pub flags: u32,
    pub normal_map_url: String,
}

impl Default for MaterialData {
    fn default() -> Self {
        Self {
            colour_rgb: Vec3::splat(0.5),
            colour_texture_url: String::new(),
            emission_rgb: Vec3::ZERO,
            emission_texture_url: String::new(),
            roughness: ScalarVal::new(0.5),
            metallic_fraction: ScalarVal::new(0.0),
            opacity: ScalarVal::new(1.0),
            tex_matrix: [1.0, 0.0, 0.0, 1.0],
            emission_lum_flux: 0.0,
            flags: 0,
            normal_map_url: String::new(),
        }
    }
}

impl MaterialData {
    pub const COLOUR_TEX_HAS_ALPHA: u32 = 1;
    pub const MIN_LOD_LEVEL_IS_NEGATIVE_1: u32 = 2;

    pub fn colour_tex_has_alpha(&self) -> bool {
        self.flags & Self::COLOUR_TEX_HAS_ALPHA != 0
    }

    pub fn min_lod_level(&self) -> i32 {
        if self.flags & Self::MIN_LOD_LEVEL_IS_NEGATIVE_1 != 0 {
            -1
        } else {
            0
        }
    }

    /// Versioned, length-prefixed record. Unknown trailing fields are skipped;
    /// reading past the declared size is fatal.
    pub fn read(buf: &mut BufferIn<'_>) -> Result<Self, ProtocolError> {
        let version = buf.read_u32()?;
        if version != MATERIAL_VERSION {
            return Err(ProtocolError::UnsupportedMaterialVersion {
                got: version,
                expected: MATERIAL_VERSION,
            });
        }
        let declared = buf.read_u32()?;
        // The declared size includes the version and size fields.
        let body_len = (declared as usize)
            .checked_sub(8)
            .ok_or(ProtocolError::MaterialOverrun { declared })?;
        let mut body = buf.sub_buffer(body_len)?;
        Self::read_fields(&mut body).map_err(|e| match e {
            ProtocolError::Truncated { .. } => ProtocolError::MaterialOverrun { declared },
            other => other,
        })
    }

    fn read_fields(buf: &mut BufferIn<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            colour_rgb: buf.read_vec3f()?,
            colour_texture_url: buf.read_string()?,
            emission_rgb: buf.read_vec3f()?,
            emission_texture_url: buf.read_string()?,
            roughness: ScalarVal::read(buf)?,
            metallic_fraction: ScalarVal::read(buf)?,
            opacity: ScalarVal::read(buf)?,
            tex_matrix: [
                buf.read_f32()?,
                buf.read_f32()?,
                buf.read_f32()?,
                buf.read_f32()?,
            ],
            emission_lum_flux: buf.read_f32()?,
            flags: buf.read_u32()?,
            normal_map_url: buf.read_string()?,
        })
    }

    pub fn write(&self, out: &mut BufferOut) {
        let start = out.len();
        out.write_u32(MATERIAL_VERSION);
        out.write_u32(0);
        out.write_vec3f(self.colour_rgb);
        out.write_string(&self.colour_texture_url);
        out.write_vec3f(self.emission_rgb);
        out.write_string(&self.emission_texture_url);
        self.roughness.write(out);
        self.metallic_fraction.write(out);
        self.opacity.write(out);
        for v in self.tex_matrix {
            out.write_f32(v);
        }
        out.write_f32(self.emission_lum_flux);
        out.write_u32(self.flags);
        out.write_string(&self.normal_map_url);
        let size = (out.len() - start) as u32;
        out.patch_u32(start + 4, size);
    }
}

fn read_materials(buf: &mut BufferIn<'_>) -> Result<Vec<MaterialData>, ProtocolError> {
    let count = buf.read_u32()? as usize;
    // Each material is at least its 8-byte header; bound the allocation by
    // what the buffer could actually hold.
    let mut mats = Vec::with_capacity(count.min(buf.remaining() / 8));
    for _ in 0..count {
        mats.push(MaterialData::read(buf)?);
    }
    Ok(mats)
}

fn write_materials(out: &mut BufferOut, mats: &[MaterialData]) {
    out.write_u32(mats.len() as u32);
    for m in mats {
        m.write(out);
    }
}

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

/// Network state of a world object, excluding its uid.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectData {
    pub model_url: String,
    pub materials: Vec<MaterialData>,
    pub pos: DVec3,
    pub axis: Vec3,
    pub angle: f32,
    pub scale: Vec3,
    pub aabb_ws: Aabb,
    pub max_model_lod_level: i32,
    pub flags: u32,
    pub compressed_voxels: Vec<u8>,
}

impl ObjectData {
    /// The object provides a LOD -1 (extra detail) variant.
    pub const MIN_LOD_LEVEL_IS_NEGATIVE_1: u32 = 2;

    pub fn is_voxel(&self) -> bool {
        !self.compressed_voxels.is_empty()
    }

    pub fn read(buf: &mut BufferIn<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            model_url: buf.read_string()?,
            materials: read_materials(buf)?,
            pos: buf.read_vec3d()?,
            axis: buf.read_vec3f()?,
            angle: buf.read_f32()?,
            scale: buf.read_vec3f()?,
            aabb_ws: Aabb::new(buf.read_vec3f()?, buf.read_vec3f()?),
            max_model_lod_level: buf.read_i32()?,
            flags: buf.read_u32()?,
            compressed_voxels: buf.read_bytes()?,
        })
    }

    pub fn write(&self, out: &mut BufferOut) {
        out.write_string(&self.model_url);
        write_materials(out, &self.materials);
        out.write_vec3d(self.pos);
        out.write_vec3f(self.axis);
        out.write_f32(self.angle);
        out.write_vec3f(self.scale);
        out.write_vec3f(self.aabb_ws.min);
        out.write_vec3f(self.aabb_ws.max);
        out.write_i32(self.max_model_lod_level);
        out.write_u32(self.flags);
        out.write_bytes(&self.compressed_voxels);
    }
}

// ---------------------------------------------------------------------------
// Avatars
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AvatarSettings {
    pub model_url: String,
    pub materials: Vec<MaterialData>,
}

impl AvatarSettings {
    pub fn read(buf: &mut BufferIn<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            model_url: buf.read_string()?,
            materials: read_materials(buf)?,
        })
    }

    pub fn write(&self, out: &mut BufferOut) {
        out.write_string(&self.model_url);
        write_materials(out, &self.materials);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AvatarData {
    pub uid: EntityId,
    pub name: String,
    pub pos: DVec3,
    pub rotation: Vec3,
    pub settings: AvatarSettings,
}

impl AvatarData {
    pub fn read(buf: &mut BufferIn<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            uid: EntityId(buf.read_u64()?),
            name: buf.read_string()?,
            pos: buf.read_vec3d()?,
            rotation: buf.read_vec3f()?,
            settings: AvatarSettings::read(buf)?,
        })
    }

    pub fn write(&self, out: &mut BufferOut) {
        out.write_u64(self.uid.0);
        out.write_string(&self.name);
        out.write_vec3d(self.pos);
        out.write_vec3f(self.rotation);
        self.settings.write(out);
    }
}

// ---------------------------------------------------------------------------
// Parcels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ParcelData {
    pub id: ParcelId,
    pub owner: UserId,
    pub aabb_min: DVec3,
    pub aabb_max: DVec3,
    pub description: String,
}

impl ParcelData {
    pub fn read(buf: &mut BufferIn<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            id: ParcelId(buf.read_u32()?),
            owner: UserId(buf.read_u32()?),
            aabb_min: buf.read_vec3d()?,
            aabb_max: buf.read_vec3d()?,
            description: buf.read_string()?,
        })
    }

    pub fn write(&self, out: &mut BufferOut) {
        out.write_u32(self.id.0);
        out.write_u32(self.owner.0);
        out.write_vec3d(self.aabb_min);
        out.write_vec3d(self.aabb_max);
        out.write_string(&self.description);
    }
}

// ---------------------------------------------------------------------------
// Top-level enum
// ---------------------------------------------------------------------------

/// A decoded server message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Synthesized by the decoder once the handshake completes.
    Welcome {
        server_version: u32,
        client_avatar: EntityId,
    },
    TimeSync {
        global_time: f64,
    },
    ParcelCreated(ParcelData),
    ObjectInitialSend {
        uid: EntityId,
        object: ObjectData,
    },
    ObjectCreated {
        uid: EntityId,
        object: ObjectData,
    },
    ObjectDestroyed {
        uid: EntityId,
    },
    ObjectTransformUpdate {
        uid: EntityId,
        pos: DVec3,
        axis: Vec3,
        angle: f32,
    },
    ObjectFullUpdate {
        uid: EntityId,
        object: ObjectData,
    },
    Chat {
        name: String,
        message: String,
    },
    AvatarCreated(AvatarData),
    AvatarIsHere(AvatarData),
    AvatarDestroyed {
        uid: EntityId,
    },
    AvatarTransformUpdate {
        uid: EntityId,
        pos: DVec3,
        rotation: Vec3,
        anim_state: u32,
    },
    AvatarFullUpdate(AvatarData),
    LoggedIn {
        user_id: UserId,
        username: String,
        settings: AvatarSettings,
    },
}

impl InboundMessage {
    /// Decode the body of a message of type `msg_type`.
    ///
    /// Returns `Ok(None)` for types this client does not handle.
    pub fn read(msg_type: u32, body: &mut BufferIn<'_>) -> Result<Option<Self>, ProtocolError> {
        let msg = match msg_type {
            TIME_SYNC => Self::TimeSync {
                global_time: body.read_f64()?,
            },
            PARCEL_CREATED => Self::ParcelCreated(ParcelData::read(body)?),
            OBJECT_INITIAL_SEND => Self::ObjectInitialSend {
                uid: EntityId(body.read_u64()?),
                object: ObjectData::read(body)?,
            },
            OBJECT_CREATED => Self::ObjectCreated {
                uid: EntityId(body.read_u64()?),
                object: ObjectData::read(body)?,
            },
            OBJECT_DESTROYED => Self::ObjectDestroyed {
                uid: EntityId(body.read_u64()?),
            },
            OBJECT_TRANSFORM_UPDATE => Self::ObjectTransformUpdate {
                uid: EntityId(body.read_u64()?),
                pos: body.read_vec3d()?,
                axis: body.read_vec3f()?,
                angle: body.read_f32()?,
            },
            OBJECT_FULL_UPDATE => Self::ObjectFullUpdate {
                uid: EntityId(body.read_u64()?),
                object: ObjectData::read(body)?,
            },
            CHAT_MESSAGE => Self::Chat {
                name: body.read_string()?,
                message: body.read_string()?,
            },
            AVATAR_CREATED => Self::AvatarCreated(AvatarData::read(body)?),
            AVATAR_IS_HERE => Self::AvatarIsHere(AvatarData::read(body)?),
            AVATAR_DESTROYED => Self::AvatarDestroyed {
                uid: EntityId(body.read_u64()?),
            },
            AVATAR_TRANSFORM_UPDATE => Self::AvatarTransformUpdate {
                uid: EntityId(body.read_u64()?),
                pos: body.read_vec3d()?,
                rotation: body.read_vec3f()?,
                anim_state: body.read_u32()?,
            },
            AVATAR_FULL_UPDATE => Self::AvatarFullUpdate(AvatarData::read(body)?),
            LOGGED_IN => Self::LoggedIn {
                user_id: UserId(body.read_u32()?),
                username: body.read_string()?,
                settings: AvatarSettings::read(body)?,
            },
            _ => return Ok(None),
        };
        Ok(Some(msg))
    }

    /// Wire id, or `None` for [`InboundMessage::Welcome`].
    pub fn msg_type(&self) -> Option<u32> {
        Some(match self {
            Self::Welcome { .. } => return None,
            Self::TimeSync { .. } => TIME_SYNC,
            Self::ParcelCreated(_) => PARCEL_CREATED,
            Self::ObjectInitialSend { .. } => OBJECT_INITIAL_SEND,
            Self::ObjectCreated { .. } => OBJECT_CREATED,
            Self::ObjectDestroyed { .. } => OBJECT_DESTROYED,
            Self::ObjectTransformUpdate { .. } => OBJECT_TRANSFORM_UPDATE,
            Self::ObjectFullUpdate { .. } => OBJECT_FULL_UPDATE,
            Self::Chat { .. } => CHAT_MESSAGE,
            Self::AvatarCreated(_) => AVATAR_CREATED,
            Self::AvatarIsHere(_) => AVATAR_IS_HERE,
            Self::AvatarDestroyed { .. } => AVATAR_DESTROYED,
            Self::AvatarTransformUpdate { .. } => AVATAR_TRANSFORM_UPDATE,
            Self::AvatarFullUpdate(_) => AVATAR_FULL_UPDATE,
            Self::LoggedIn { .. } => LOGGED_IN,
        })
    }

    /// Append this message, framed, as the server would send it.
    ///
    /// `Welcome` has no framing of its own and writes nothing; see
    /// [`crate::encoder::write_server_greeting`].
    pub fn write(&self, out: &mut BufferOut) {
        let Some(msg_type) = self.msg_type() else {
            return;
        };
        out.begin_message(msg_type);
        match self {
            Self::Welcome { .. } => {}
            Self::TimeSync { global_time } => out.write_f64(*global_time),
            Self::ParcelCreated(p) => p.write(out),
            Self::ObjectInitialSend { uid, object }
            | Self::ObjectCreated { uid, object }
            | Self::ObjectFullUpdate { uid, object } => {
                out.write_u64(uid.0);
                object.write(out);
            }
            Self::ObjectDestroyed { uid } | Self::AvatarDestroyed { uid } => out.write_u64(uid.0),
            Self::ObjectTransformUpdate {
                uid,
                pos,
                axis,
                angle,
            } => {
                out.write_u64(uid.0);
                out.write_vec3d(*pos);
                out.write_vec3f(*axis);
                out.write_f32(*angle);
            }
            Self::Chat { name, message } => {
                out.write_string(name);
                out.write_string(message);
            }
            Self::AvatarCreated(a) | Self::AvatarIsHere(a) | Self::AvatarFullUpdate(a) => {
                a.write(out)
            }
            Self::AvatarTransformUpdate {
                uid,
                pos,
                rotation,
                anim_state,
            } => {
                out.write_u64(uid.0);
                out.write_vec3d(*pos);
                out.write_vec3f(*rotation);
                out.write_u32(*anim_state);
            }
            Self::LoggedIn {
                user_id,
                username,
                settings,
            } => {
                out.write_u32(user_id.0);
                out.write_string(username);
                settings.write(out);
            }
        }
        out.finish_message();
    }
}
