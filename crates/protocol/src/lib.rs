//! World server protocol: byte codec, inbound decoder, outbound encoder.
//!
//! # Invariants
//! - All multi-byte values are little-endian.
//! - After a steady-state message is handled the read cursor sits exactly at
//!   `header_offset + byte_length`, however much of the body was parsed.
//! - Every decoder error is fatal; a failed [`Decoder`] rejects further input.

mod capture;
mod decoder;
pub mod encoder;
mod error;
pub mod messages;
mod wire;

pub use capture::{CaptureReader, CaptureWriter, MAX_CHUNK_SIZE};
pub use decoder::{Decoder, DecoderConfig, HandshakeState, MessageSink};
pub use error::{CaptureError, ProtocolError};
pub use messages::{
    AvatarData, AvatarSettings, InboundMessage, MaterialData, ObjectData, ParcelData, ScalarVal,
};
pub use wire::{BufferIn, BufferOut, MAX_STRING_LEN};
