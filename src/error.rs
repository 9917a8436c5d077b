use std::result::Result as StdResult;

/// Errors raised by the codec and the surrounding connection plumbing.
///
/// Every variant other than `Io` and `Msg` is a protocol-integrity failure:
/// the connection is no longer trustworthy and the owner must tear it down.
/// Server-reported statuses are *not* errors; they travel inside the typed
/// responses.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("opaque mismatch: in-flight head expects {expected}, response carries {actual}")]
    OpaqueMismatch { expected: u32, actual: u32 },

    #[error("response arrived with no request in flight")]
    UnexpectedResponse,

    #[error("invalid magic byte 0x{0:02x}")]
    InvalidMagic(u8),

    #[error("frame body length {body_len} shorter than extras {extras_len} + key {key_len}")]
    InvalidBodyLength {
        body_len: u32,
        extras_len: u8,
        key_len: u16,
    },

    #[error("truncated sub-document response: command {index} needs {needed} bytes, {remaining} remain")]
    TruncatedSubdocBody {
        index: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("sub-document response index {index} not ahead of command {consumed}")]
    SubdocIndexOutOfOrder { index: u8, consumed: usize },

    #[error("sub-document result count {results} != command count {commands}")]
    SubdocResultCountMismatch { results: usize, commands: usize },

    #[error("unknown observe-seqno format byte 0x{0:02x}")]
    UnknownObserveSeqnoFormat(u8),

    #[error("{0}")]
    Msg(String),
}

pub type Result<T> = StdResult<T, Error>;
