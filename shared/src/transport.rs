//! Contract between the sync core and the real-time transport it rides on.
//!
//! The transport owns connections, delivery, peer attribute replication and
//! audio state. The core only publishes bytes on a topic, writes its own
//! attributes, and reacts to the [`TransportEvent`]s the transport pushes.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

use crate::packets::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishOptions {
    pub reliable: bool,
}

impl PublishOptions {
    pub fn reliable() -> Self {
        Self { reliable: true }
    }

    pub fn unreliable() -> Self {
        Self { reliable: false }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("publish on '{topic}' rejected: {reason}")]
    Rejected { topic: String, reason: String },
    #[error("attribute update rejected: {0}")]
    Attributes(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Identity of the local participant, `None` until connected.
    fn local_identity(&self) -> Option<SessionId>;

    /// Sends `payload` to every other participant on `topic`.
    ///
    /// Resolving `Ok` means the transport accepted the packet, not that any
    /// peer received it.
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> Result<(), TransportError>;

    /// Merges `attributes` into the local participant's replicated attributes.
    async fn set_attributes(
        &self,
        attributes: HashMap<String, String>,
    ) -> Result<(), TransportError>;
}

/// Everything the transport pushes into the core.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected {
        identity: SessionId,
    },
    Disconnected,
    Data {
        topic: String,
        sender: Option<SessionId>,
        payload: Vec<u8>,
    },
    PeerJoined {
        identity: SessionId,
    },
    PeerLeft {
        identity: SessionId,
    },
    /// Changed attributes of one participant. Also replayed to late joiners.
    AttributesChanged {
        identity: SessionId,
        attributes: HashMap<String, String>,
    },
    MuteChanged {
        identity: SessionId,
        muted: bool,
    },
    ActiveSpeakersChanged {
        speakers: Vec<SessionId>,
    },
}
