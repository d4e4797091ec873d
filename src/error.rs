use std::io;

use crate::tables::Slice;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("no output port configured for slice {slice} on switch {dpid}")]
    MissingSlicePort { dpid: u64, slice: Slice },

    #[error("decode error: {0}")]
    Decode(String),

    /// An outgoing message could not be put on the wire.
    #[error("encode error: {0}")]
    Encode(String),

    #[error("send to switch {dpid} failed: {source}")]
    Transport {
        dpid: u64,
        #[source]
        source: io::Error,
    },

    #[error("unsupported OpenFlow message type {0}")]
    UnsupportedMessage(u8),
}

impl Error {
    /// Shorthand for a truncated buffer while decoding `what`.
    pub(crate) fn truncated(what: &str) -> Error {
        Error::Decode(format!("truncated {}", what))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
