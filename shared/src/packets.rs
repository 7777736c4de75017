use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::math::{Euler, Vector3};

/// Transport-assigned identity of a connected participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Chat message identity, unique within the history window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Fresh random (v4) identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Motion clip a peer should play.
///
/// Unrecognised names from newer or older clients decode as [`AnimationState::Idle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimationState {
    #[default]
    Idle,
    Forward,
    Backward,
    Left,
    Right,
    ForwardLeft,
    ForwardRight,
    BackwardLeft,
    BackwardRight,
    JumpStart,
    JumpLoop,
    JumpLand,
}

impl AnimationState {
    /// Looks up a clip by its wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        let state = match name {
            "idle" => AnimationState::Idle,
            "forward" => AnimationState::Forward,
            "backward" => AnimationState::Backward,
            "left" => AnimationState::Left,
            "right" => AnimationState::Right,
            "forward_left" => AnimationState::ForwardLeft,
            "forward_right" => AnimationState::ForwardRight,
            "backward_left" => AnimationState::BackwardLeft,
            "backward_right" => AnimationState::BackwardRight,
            "jump_start" => AnimationState::JumpStart,
            "jump_loop" => AnimationState::JumpLoop,
            "jump_land" => AnimationState::JumpLand,
            _ => return None,
        };
        Some(state)
    }
}

impl<'de> Deserialize<'de> for AnimationState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from_name(&name).unwrap_or_default())
    }
}

/// Opaque avatar descriptor: numeric id plus asset locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarRef {
    pub id: u32,
    pub model_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatImage {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovePayload {
    pub position: Vector3,
    pub rotation: Euler,
    pub is_running: bool,
    pub animation: AnimationState,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProfilePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<AvatarRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub id: MessageId,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub sent_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ChatImage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub is_typing: bool,
}

/// One decoded packet. The variant is implied by the channel it travelled on.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Move(MovePayload),
    Profile(ProfilePayload),
    Chat(ChatPayload),
    Typing(TypingPayload),
}

impl Packet {
    pub fn channel(&self) -> Channel {
        match self {
            Packet::Move(_) => Channel::Move,
            Packet::Profile(_) => Channel::Profile,
            Packet::Chat(_) => Channel::ChatMessage,
            Packet::Typing(_) => Channel::Typing,
        }
    }
}

/// What a sender does when the transport rejects a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Drop quietly; the next sample supersedes it.
    Ignore,
    /// Log a warning and move on.
    Log,
    /// Report to the caller so it can be shown to the user.
    Surface,
}

/// Logical stream multiplexed over the shared transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Move,
    Profile,
    ChatMessage,
    Typing,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::Move,
        Channel::Profile,
        Channel::ChatMessage,
        Channel::Typing,
    ];

    pub fn topic(&self) -> &'static str {
        match self {
            Channel::Move => "move",
            Channel::Profile => "profile",
            Channel::ChatMessage => "chat-message",
            Channel::Typing => "typing",
        }
    }

    pub fn from_topic(topic: &str) -> Option<Channel> {
        Channel::ALL.into_iter().find(|c| c.topic() == topic)
    }

    pub fn is_reliable(&self) -> bool {
        match self {
            Channel::Move | Channel::Typing => false,
            Channel::Profile | Channel::ChatMessage => true,
        }
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        match self {
            Channel::Move | Channel::Typing => FailurePolicy::Ignore,
            Channel::Profile => FailurePolicy::Log,
            Channel::ChatMessage => FailurePolicy::Surface,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic())
    }
}
