use worldview_common::EntityId;

use crate::error::ProtocolError;
use crate::messages::{
    CLIENT_PROTOCOL_OK, CLIENT_PROTOCOL_TOO_NEW, CLIENT_PROTOCOL_TOO_OLD, HEADER_LEN, HELLO,
    InboundMessage,
};
use crate::wire::BufferIn;

/// Position in the connection handshake.
///
/// Each state names what has been consumed so far; the next read is
/// determined by the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Waiting for the server to echo the hello token.
    Initial,
    /// Hello echoed; waiting for the health code.
    HelloAck,
    /// Health code OK; waiting for the server protocol version.
    ProtocolAck,
    /// Server version read; waiting for the client avatar uid.
    VersionRead,
    /// Steady state: framed messages.
    Dispatch,
}

/// Receives decoded messages in stream order.
pub trait MessageSink {
    fn on_message(&mut self, msg: InboundMessage);
}

impl MessageSink for Vec<InboundMessage> {
    fn on_message(&mut self, msg: InboundMessage) {
        self.push(msg);
    }
}

#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Reads allowed per buffer before decoding is abandoned as runaway.
    pub max_messages_per_buffer: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_messages_per_buffer: 100_000,
        }
    }
}

/// Inbound protocol state machine.
///
/// Each transport delivery is passed to [`Decoder::feed`]. Handshake fields
/// may arrive split across deliveries; steady-state messages may not straddle
/// a delivery boundary.
#[derive(Debug)]
pub struct Decoder {
    config: DecoderConfig,
    state: HandshakeState,
    server_version: Option<u32>,
    client_avatar: Option<EntityId>,
    messages_decoded: u64,
    failed: bool,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(DecoderConfig::default())
    }
}

impl Decoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            config,
            state: HandshakeState::Initial,
            server_version: None,
            client_avatar: None,
            messages_decoded: 0,
            failed: false,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn server_version(&self) -> Option<u32> {
        self.server_version
    }

    pub fn client_avatar(&self) -> Option<EntityId> {
        self.client_avatar
    }

    pub fn messages_decoded(&self) -> u64 {
        self.messages_decoded
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }

    /// Decode one transport delivery, handing every message to `sink`.
    ///
    /// Returns the number of messages delivered. Any error poisons the
    /// decoder; later calls return [`ProtocolError::Aborted`].
    pub fn feed(
        &mut self,
        data: &[u8],
        sink: &mut impl MessageSink,
    ) -> Result<usize, ProtocolError> {
        if self.failed {
            return Err(ProtocolError::Aborted);
        }
        let _span = tracing::debug_span!("decode_buffer", len = data.len()).entered();

        let result = self.feed_inner(data, sink);
        if let Err(e) = &result {
            tracing::error!(error = %e, state = ?self.state, "fatal protocol error");
            self.failed = true;
        }
        result
    }

    fn feed_inner(
        &mut self,
        data: &[u8],
        sink: &mut impl MessageSink,
    ) -> Result<usize, ProtocolError> {
        let mut buf = BufferIn::new(data);
        let mut delivered = 0;
        let mut iterations = 0usize;

        while !buf.end_of_stream() {
            match self.state {
                HandshakeState::Initial => {
                    let got = buf.read_u32()?;
                    if got != HELLO {
                        return Err(ProtocolError::HelloMismatch { got });
                    }
                    self.state = HandshakeState::HelloAck;
                }
                HandshakeState::HelloAck => {
                    match buf.read_u32()? {
                        CLIENT_PROTOCOL_OK => {}
                        CLIENT_PROTOCOL_TOO_OLD => return Err(ProtocolError::ClientTooOld),
                        CLIENT_PROTOCOL_TOO_NEW => return Err(ProtocolError::ClientTooNew),
                        code => return Err(ProtocolError::UnknownHealthCode { code }),
                    }
                    self.state = HandshakeState::ProtocolAck;
                }
                HandshakeState::ProtocolAck => {
                    let version = buf.read_u32()?;
                    tracing::info!(server_version = version, "connected to server");
                    self.server_version = Some(version);
                    self.state = HandshakeState::VersionRead;
                }
                HandshakeState::VersionRead => {
                    let uid = EntityId(buf.read_u64()?);
                    self.client_avatar = Some(uid);
                    self.state = HandshakeState::Dispatch;
                    sink.on_message(InboundMessage::Welcome {
                        server_version: self.server_version.unwrap_or_default(),
                        client_avatar: uid,
                    });
                    delivered += 1;
                }
                HandshakeState::Dispatch => {
                    if let Some(msg) = dispatch_one(&mut buf)? {
                        sink.on_message(msg);
                        delivered += 1;
                    }
                    self.messages_decoded += 1;
                }
            }

            iterations += 1;
            if iterations > self.config.max_messages_per_buffer {
                return Err(ProtocolError::IterationLimit {
                    limit: self.config.max_messages_per_buffer,
                });
            }
        }

        Ok(delivered)
    }
}

/// Decode the framed message at the cursor and leave the cursor at
/// `header_offset + byte_length`.
fn dispatch_one(buf: &mut BufferIn<'_>) -> Result<Option<InboundMessage>, ProtocolError> {
    let msg_type = buf.read_u32()?;
    let len = buf.read_u32()?;
    if (len as usize) < HEADER_LEN {
        return Err(ProtocolError::MessageTooShort { msg_type, len });
    }

    // The body reader ends where the message ends, so a handler cannot read
    // into its neighbour. Consuming it advances `buf` past the whole message.
    let mut body = buf.sub_buffer(len as usize - HEADER_LEN)?;
    let msg = InboundMessage::read(msg_type, &mut body).map_err(|e| match e {
        ProtocolError::Truncated { .. } => ProtocolError::MessageOverrun {
            msg_type,
            declared: len,
        },
        other => other,
    })?;

    match &msg {
        Some(_) => tracing::trace!(msg_type, len, unread = body.remaining(), "message"),
        None => tracing::trace!(msg_type, len, "skipped unhandled message"),
    }
    Ok(msg)
}
