//! Error types for the presence sync client.

use presence_shared::{CodecError, TransportError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("failed to parse configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}
