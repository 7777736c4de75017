//! JSON wire codec.
//!
//! Payloads travel as UTF-8 JSON objects; the channel a packet arrives on
//! decides which schema it is decoded against. Decoding never panics, so
//! packets from stale or hostile clients can simply be dropped.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::packets::{Channel, ChatPayload, Packet};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("malformed {channel} payload: {source}")]
    Malformed {
        channel: Channel,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid {channel} payload: {reason}")]
    Invalid {
        channel: Channel,
        reason: &'static str,
    },
}

pub fn encode<T: Serialize>(payload: &T) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(payload)?)
}

/// Lenient decode: any malformed input yields `None`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Option<T> {
    serde_json::from_slice(bytes).ok()
}

pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>, CodecError> {
    match packet {
        Packet::Move(payload) => encode(payload),
        Packet::Profile(payload) => encode(payload),
        Packet::Chat(payload) => encode(payload),
        Packet::Typing(payload) => encode(payload),
    }
}

/// Decodes `bytes` against the schema of `channel` and validates the result.
pub fn decode_packet(channel: Channel, bytes: &[u8]) -> Result<Packet, CodecError> {
    let malformed = |source| CodecError::Malformed { channel, source };
    let packet = match channel {
        Channel::Move => Packet::Move(serde_json::from_slice(bytes).map_err(malformed)?),
        Channel::Profile => Packet::Profile(serde_json::from_slice(bytes).map_err(malformed)?),
        Channel::ChatMessage => Packet::Chat(serde_json::from_slice(bytes).map_err(malformed)?),
        Channel::Typing => Packet::Typing(serde_json::from_slice(bytes).map_err(malformed)?),
    };
    validate(&packet)?;
    Ok(packet)
}

fn validate(packet: &Packet) -> Result<(), CodecError> {
    match packet {
        Packet::Move(payload) => {
            if !payload.position.is_finite() || !payload.rotation.is_finite() {
                return Err(CodecError::Invalid {
                    channel: Channel::Move,
                    reason: "non-finite transform",
                });
            }
        }
        Packet::Chat(payload) => validate_chat(payload)?,
        Packet::Profile(_) | Packet::Typing(_) => {}
    }
    Ok(())
}

fn validate_chat(payload: &ChatPayload) -> Result<(), CodecError> {
    if payload.id.as_str().trim().is_empty() {
        return Err(CodecError::Invalid {
            channel: Channel::ChatMessage,
            reason: "missing message id",
        });
    }
    if let Some(image) = &payload.image {
        if image.url.trim().is_empty() {
            return Err(CodecError::Invalid {
                channel: Channel::ChatMessage,
                reason: "image without url",
            });
        }
    }
    Ok(())
}
