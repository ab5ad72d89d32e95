//! Error taxonomy for the metadata engine.
//!
//! Connection and timeout failures are per-attempt and never fatal to the
//! tracking engine; protocol errors mark one fetch as failed; `NoMedia` and
//! `NoPosingIdentity` are surfaced to the caller of the operation that hit
//! them.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// TCP connect to a player service failed.
    #[error("connection to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// A bounded socket operation did not finish in time.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// The bytes on the wire did not match the expected frame shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A bulk scan was requested against a slot with no mounted media.
    #[error("player {player} reports no media in the requested slot")]
    NoMedia { player: u8 },

    /// No legal device number was available to pose as for a query.
    #[error(
        "no device number available to query player {player}; every other \
         player on the network appears to be using its media"
    )]
    NoPosingIdentity { player: u8 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MetadataError {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        MetadataError::Protocol(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, MetadataError>;
