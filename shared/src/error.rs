use thiserror::Error;

/// Failures produced while reading wire data.
///
/// Decoding never panics on short or garbage input; every failure surfaces
/// as one of these variants so the caller decides whether to drop or deny.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("payload truncated while reading {0}")]
    Truncated(&'static str),

    #[error("unknown message type {0}")]
    UnknownType(u8),

    #[error("unknown map category {0}")]
    UnknownMapCategory(u8),

    #[error("malformed {0}")]
    Malformed(&'static str),
}

impl CodecError {
    /// Maps a bincode failure while reading `what` into a codec error.
    pub(crate) fn from_bincode(what: &'static str, err: bincode::Error) -> Self {
        match *err {
            bincode::ErrorKind::Io(_) => CodecError::Truncated(what),
            _ => CodecError::Malformed(what),
        }
    }
}
