/// Fatal errors raised while decoding the server stream.
///
/// The connection is unusable after any of these; there is no resync.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("read of {needed} bytes at offset {offset} overruns buffer of {available} bytes")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("string is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("string length {len} exceeds maximum {max}")]
    StringTooLong { len: usize, max: usize },

    #[error("hello response was invalid: {got}")]
    HelloMismatch { got: u32 },

    #[error("client protocol version is too old")]
    ClientTooOld,

    #[error("client protocol version is too new")]
    ClientTooNew,

    #[error("unknown protocol health code {code}")]
    UnknownHealthCode { code: u32 },

    #[error("message type {msg_type} declares length {len}, shorter than its header")]
    MessageTooShort { msg_type: u32, len: u32 },

    #[error("handler for message type {msg_type} read past its declared length {declared}")]
    MessageOverrun { msg_type: u32, declared: u32 },

    #[error("more than {limit} reads in a single buffer")]
    IterationLimit { limit: usize },

    #[error("material record read past its declared size {declared}")]
    MaterialOverrun { declared: u32 },

    #[error("unsupported material version {got}, expected {expected}")]
    UnsupportedMaterialVersion { got: u32, expected: u32 },

    #[error("decoder already failed; connection must be re-established")]
    Aborted,
}

/// Errors reading or writing session capture files.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("capture chunk of {size} bytes exceeds maximum {max}")]
    ChunkTooLarge { size: usize, max: usize },

    #[error("not a capture file")]
    BadMagic,
}
