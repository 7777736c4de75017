//! Profile replication through peer attributes.
//!
//! The transport keeps each participant's attributes and replays them to
//! late joiners, so username and avatar written here reach peers that join
//! after the write. Writes are compared against what was last sent, not
//! against the local store.

use log::warn;
use presence_shared::{AvatarRef, SessionId, ATTR_AVATAR, ATTR_USERNAME};
use std::collections::HashMap;

use crate::reconciler::RemotePlayerUpdate;

#[derive(Debug, Default)]
pub struct AttributeProfileSync {
    last_sent: HashMap<String, String>,
}

impl AttributeProfileSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attributes that differ from the last successful write.
    ///
    /// Dropping an avatar that peers have seen writes an empty value. An
    /// avatar that fails to serialize is left out rather than sent empty.
    pub fn pending_changes(
        &self,
        username: &str,
        avatar: Option<&AvatarRef>,
    ) -> HashMap<String, String> {
        let mut wanted = HashMap::new();
        wanted.insert(ATTR_USERNAME.to_string(), username.to_string());
        match avatar {
            Some(avatar) => match serde_json::to_string(avatar) {
                Ok(json) => {
                    wanted.insert(ATTR_AVATAR.to_string(), json);
                }
                Err(e) => warn!("Failed to serialize avatar attribute: {}", e),
            },
            None => {
                if self.last_sent.contains_key(ATTR_AVATAR) {
                    wanted.insert(ATTR_AVATAR.to_string(), String::new());
                }
            }
        }

        wanted
            .into_iter()
            .filter(|(key, value)| self.last_sent.get(key) != Some(value))
            .collect()
    }

    /// Remembers attributes the transport accepted.
    pub fn record_sent(&mut self, attributes: &HashMap<String, String>) {
        for (key, value) in attributes {
            self.last_sent.insert(key.clone(), value.clone());
        }
    }

    pub fn last_sent(&self, key: &str) -> Option<&str> {
        self.last_sent.get(key).map(String::as_str)
    }

    pub fn reset(&mut self) {
        self.last_sent.clear();
    }
}

/// Extracts the profile fields from a peer's changed attributes.
///
/// Unrelated keys are ignored. An empty avatar value clears the avatar; a
/// malformed one is logged and skipped without discarding the username.
pub fn parse_profile_attributes(
    identity: &SessionId,
    attributes: &HashMap<String, String>,
) -> RemotePlayerUpdate {
    let username = attributes
        .get(ATTR_USERNAME)
        .filter(|name| !name.trim().is_empty())
        .cloned();

    let avatar = attributes.get(ATTR_AVATAR).and_then(|raw| {
        if raw.trim().is_empty() {
            return Some(None);
        }
        match serde_json::from_str::<AvatarRef>(raw) {
            Ok(avatar) => Some(Some(avatar)),
            Err(e) => {
                warn!("Ignoring malformed avatar attribute from {}: {}", identity, e);
                None
            }
        }
    });

    RemotePlayerUpdate {
        username,
        avatar,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn avatar(id: u32) -> AvatarRef {
        AvatarRef {
            id,
            model_url: format!("https://models/{}.vrm", id),
            thumbnail_url: None,
        }
    }

    #[test]
    fn test_first_write_sends_everything() {
        let sync = AttributeProfileSync::new();
        let changes = sync.pending_changes("Alice", Some(&avatar(1)));
        assert_eq!(changes.get(ATTR_USERNAME).map(String::as_str), Some("Alice"));
        assert!(changes.contains_key(ATTR_AVATAR));
    }

    #[test]
    fn test_unchanged_values_are_suppressed() {
        let mut sync = AttributeProfileSync::new();
        let changes = sync.pending_changes("Alice", Some(&avatar(1)));
        sync.record_sent(&changes);

        assert!(sync.pending_changes("Alice", Some(&avatar(1))).is_empty());

        let changes = sync.pending_changes("Alice", Some(&avatar(2)));
        assert_eq!(changes.len(), 1);
        assert!(changes.contains_key(ATTR_AVATAR));
    }

    #[test]
    fn test_clearing_a_sent_avatar_writes_empty_value() {
        let mut sync = AttributeProfileSync::new();
        let changes = sync.pending_changes("Alice", Some(&avatar(1)));
        sync.record_sent(&changes);

        let changes = sync.pending_changes("Alice", None);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes.get(ATTR_AVATAR).map(String::as_str), Some(""));
        sync.record_sent(&changes);

        assert!(sync.pending_changes("Alice", None).is_empty());
    }

    #[test]
    fn test_no_avatar_ever_sent_writes_nothing() {
        let sync = AttributeProfileSync::new();
        let changes = sync.pending_changes("Alice", None);
        assert!(!changes.contains_key(ATTR_AVATAR));
    }

    #[test]
    fn test_empty_avatar_attribute_clears() {
        let mut attributes = HashMap::new();
        attributes.insert(ATTR_AVATAR.to_string(), String::new());
        let update = parse_profile_attributes(&SessionId::from("p"), &attributes);
        assert_eq!(update.avatar, Some(None));
        assert!(!update.is_empty());
    }

    #[test]
    fn test_unsent_changes_are_retried() {
        let sync = AttributeProfileSync::new();
        // Nothing recorded, e.g. the write failed
        assert!(!sync.pending_changes("Alice", None).is_empty());
        assert!(!sync.pending_changes("Alice", None).is_empty());
    }

    #[test]
    fn test_reset_forgets_last_sent() {
        let mut sync = AttributeProfileSync::new();
        let changes = sync.pending_changes("Alice", None);
        sync.record_sent(&changes);
        assert_eq!(sync.last_sent(ATTR_USERNAME), Some("Alice"));

        sync.reset();
        assert_eq!(sync.last_sent(ATTR_USERNAME), None);
        assert_eq!(sync.pending_changes("Alice", None).len(), 1);
    }

    #[test]
    fn test_parse_profile_attributes() {
        let mut attributes = HashMap::new();
        attributes.insert(ATTR_USERNAME.to_string(), "Bob".to_string());
        attributes.insert(
            ATTR_AVATAR.to_string(),
            serde_json::to_string(&avatar(7)).unwrap(),
        );
        attributes.insert("unrelated".to_string(), "x".to_string());

        let update = parse_profile_attributes(&SessionId::from("p"), &attributes);
        assert_eq!(update.username.as_deref(), Some("Bob"));
        assert_eq!(update.avatar, Some(Some(avatar(7))));
        assert!(update.position.is_none());
    }

    #[test]
    fn test_malformed_avatar_keeps_username() {
        let mut attributes = HashMap::new();
        attributes.insert(ATTR_USERNAME.to_string(), "Bob".to_string());
        attributes.insert(ATTR_AVATAR.to_string(), "{not json".to_string());

        let update = parse_profile_attributes(&SessionId::from("p"), &attributes);
        assert_eq!(update.username.as_deref(), Some("Bob"));
        assert!(update.avatar.is_none());
    }

    #[test]
    fn test_unrelated_attributes_yield_empty_update() {
        let mut attributes = HashMap::new();
        attributes.insert("voice.codec".to_string(), "opus".to_string());
        assert!(parse_profile_attributes(&SessionId::from("p"), &attributes).is_empty());
    }
}
