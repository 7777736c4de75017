//! Chat history with optimistic local echo.
//!
//! Outgoing messages are inserted as `Pending` before the publish resolves
//! and later moved to `Sent` or `Failed` by id. Duplicate ids overwrite in
//! place, so re-delivery of a reliable packet never grows the history.

use log::debug;
use presence_shared::{ChatImage, ChatPayload, MessageId, SessionId};
use std::collections::VecDeque;

/// Which side of the conversation a message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// Delivery state of a message in the history.
///
/// Incoming messages are always `Sent`; only outgoing ones pass through
/// `Pending` and may end up `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

/// One entry in the chat history
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    /// Unique id shared by every copy of the message
    pub id: MessageId,
    /// Author's session
    pub session_id: SessionId,
    /// Display name the author sent along, if any
    pub username: Option<String>,
    /// Message text
    pub content: String,
    pub direction: Direction,
    pub status: DeliveryStatus,
    /// Author's timestamp in milliseconds since the epoch
    pub sent_at: u64,
    /// Optional attached image
    pub image: Option<ChatImage>,
}

impl ChatMessage {
    /// Local echo for a message about to be published.
    pub fn outgoing(
        session_id: SessionId,
        username: Option<String>,
        content: String,
        image: Option<ChatImage>,
        sent_at: u64,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            session_id,
            username,
            content,
            direction: Direction::Outgoing,
            status: DeliveryStatus::Pending,
            sent_at,
            image,
        }
    }

    /// Message received from `sender`; already delivered by definition.
    pub fn incoming(sender: SessionId, payload: ChatPayload) -> Self {
        Self {
            id: payload.id,
            session_id: sender,
            username: payload.username,
            content: payload.text,
            direction: Direction::Incoming,
            status: DeliveryStatus::Sent,
            sent_at: payload.sent_at,
            image: payload.image,
        }
    }

    /// Wire form of this message
    pub fn to_payload(&self) -> ChatPayload {
        ChatPayload {
            id: self.id.clone(),
            text: self.content.clone(),
            username: self.username.clone(),
            sent_at: self.sent_at,
            image: self.image.clone(),
        }
    }
}

/// Bounded, insertion-ordered chat window.
///
/// Once `limit` messages are held, every new id evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct ChatHistory {
    messages: VecDeque<ChatMessage>,
    limit: usize,
}

impl ChatHistory {
    /// Creates an empty history holding at most `limit` messages.
    ///
    /// A limit of zero is raised to one.
    pub fn new(limit: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    /// Inserts `message`, or replaces the one with the same id in place.
    pub fn upsert(&mut self, message: ChatMessage) {
        if let Some(existing) = self.messages.iter_mut().find(|m| m.id == message.id) {
            *existing = message;
            return;
        }

        self.messages.push_back(message);
        while self.messages.len() > self.limit {
            if let Some(evicted) = self.messages.pop_front() {
                debug!("Evicted chat message {} from history", evicted.id);
            }
        }
    }

    /// Updates the status of message `id`.
    ///
    /// Returns false when the message is gone, e.g. evicted or cleared while
    /// its publish was in flight.
    pub fn set_status(&mut self, id: &MessageId, status: DeliveryStatus) -> bool {
        match self.messages.iter_mut().find(|m| &m.id == id) {
            Some(message) => {
                message.status = status;
                true
            }
            None => {
                debug!("Status update for unknown chat message {}", id);
                false
            }
        }
    }

    /// Finds a message by id
    pub fn get(&self, id: &MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Oldest first
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Maximum number of messages kept
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Drops every message
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
