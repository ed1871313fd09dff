//! Outbound message construction.
//!
//! Every framed message is `u32 type, u32 byte_length, payload`, with the
//! length patched once the payload is written.

use glam::{DVec3, Vec3};
use worldview_common::{Aabb, EntityId};

use crate::messages::{
    AVATAR_TRANSFORM_UPDATE, AvatarData, CHAT_MESSAGE, CONNECTION_KIND_UPDATES, CREATE_AVATAR,
    HELLO, PROTOCOL_VERSION, QUERY_OBJECTS, QUERY_OBJECTS_IN_AABB,
};
use crate::wire::BufferOut;

/// Run `f` against a fresh buffer and return the bytes.
pub fn encode(f: impl FnOnce(&mut BufferOut)) -> Vec<u8> {
    let mut out = BufferOut::new();
    f(&mut out);
    out.into_bytes()
}

/// Unframed connection preamble: hello, protocol version, connection kind,
/// then the world name.
pub fn write_handshake(out: &mut BufferOut, world: &str) {
    out.write_u32(HELLO);
    out.write_u32(PROTOCOL_VERSION);
    out.write_u32(CONNECTION_KIND_UPDATES);
    out.write_string(world);
}

/// Initial spatial query sent right after the handshake.
pub fn write_query_objects_in_aabb(out: &mut BufferOut, cam_pos: DVec3, aabb: &Aabb) {
    out.begin_message(QUERY_OBJECTS_IN_AABB);
    out.write_vec3d(cam_pos);
    out.write_vec3f(aabb.min);
    out.write_vec3f(aabb.max);
    out.finish_message();
}

/// Ask for the objects in a set of grid cells.
pub fn write_query_objects(out: &mut BufferOut, cam_pos: DVec3, cells: &[[i32; 3]]) {
    out.begin_message(QUERY_OBJECTS);
    out.write_vec3d(cam_pos);
    out.write_u32(cells.len() as u32);
    for [x, y, z] in cells {
        out.write_i32(*x);
        out.write_i32(*y);
        out.write_i32(*z);
    }
    out.finish_message();
}

pub fn write_create_avatar(out: &mut BufferOut, avatar: &AvatarData) {
    out.begin_message(CREATE_AVATAR);
    avatar.write(out);
    out.finish_message();
}

pub fn write_avatar_transform_update(
    out: &mut BufferOut,
    uid: EntityId,
    pos: DVec3,
    rotation: Vec3,
    anim_state: u32,
) {
    out.begin_message(AVATAR_TRANSFORM_UPDATE);
    out.write_u64(uid.0);
    out.write_vec3d(pos);
    out.write_vec3f(rotation);
    out.write_u32(anim_state);
    out.finish_message();
}

pub fn write_chat(out: &mut BufferOut, message: &str) {
    out.begin_message(CHAT_MESSAGE);
    out.write_string(message);
    out.finish_message();
}

/// The server's side of the handshake: hello echo, health code, server
/// version and the uid assigned to the client's avatar.
pub fn write_server_greeting(out: &mut BufferOut, health: u32, server_version: u32, uid: EntityId) {
    out.write_u32(HELLO);
    out.write_u32(health);
    out.write_u32(server_version);
    out.write_u64(uid.0);
}
