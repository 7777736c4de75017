//! Tunables for a presence session.

use presence_shared::{
    CHAT_HISTORY_LIMIT, INTERPOLATION_DELAY_MS, INTERPOLATION_MAX_SAMPLES, POSITION_PRECISION,
    THROTTLE_INTERVAL_MS, TYPING_TIMEOUT_MS,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::SyncError;

/// How the local profile (username/avatar) reaches peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileMode {
    /// Reliable PROFILE packets, re-sent whenever a peer joins.
    Packets,
    /// Replicated peer attributes; the transport replays them to late joiners.
    #[default]
    Attributes,
}

/// Runtime settings for a [`PresenceSession`](crate::PresenceSession).
///
/// Every field has a default, so a config file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Minimum gap between two movement publishes
    pub throttle_interval_ms: u64,
    /// Decimal places kept on positions and rotations
    pub precision: u32,
    /// Number of chat messages kept in memory
    pub chat_history_limit: usize,
    /// How long a typing indicator lives after its latest signal
    pub typing_timeout_ms: u64,
    /// How far in the past remote players are rendered
    pub interpolation_delay_ms: u64,
    /// Samples buffered per remote player
    pub interpolation_max_samples: usize,
    /// Path the local profile takes to peers
    pub profile_mode: ProfileMode,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            throttle_interval_ms: THROTTLE_INTERVAL_MS,
            precision: POSITION_PRECISION,
            chat_history_limit: CHAT_HISTORY_LIMIT,
            typing_timeout_ms: TYPING_TIMEOUT_MS,
            interpolation_delay_ms: INTERPOLATION_DELAY_MS,
            interpolation_max_samples: INTERPOLATION_MAX_SAMPLES,
            profile_mode: ProfileMode::default(),
        }
    }
}

impl SyncConfig {
    /// Parses a JSON document; missing keys keep their defaults.
    pub fn from_json(text: &str) -> Result<Self, SyncError> {
        let config: SyncConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the session cannot run with.
    ///
    /// # Returns
    /// `SyncError::InvalidConfig` naming the first offending field
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.chat_history_limit == 0 {
            return Err(SyncError::InvalidConfig("chat_history_limit must be positive"));
        }
        if self.interpolation_max_samples < 2 {
            return Err(SyncError::InvalidConfig(
                "interpolation_max_samples must hold at least two samples",
            ));
        }
        if self.precision > 6 {
            return Err(SyncError::InvalidConfig("precision above 6 decimals is meaningless for f32"));
        }
        Ok(())
    }

    /// Typing timeout as a [`Duration`]
    pub fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol_constants() {
        let config = SyncConfig::default();
        assert_eq!(config.throttle_interval_ms, 100);
        assert_eq!(config.precision, 2);
        assert_eq!(config.chat_history_limit, 200);
        assert_eq!(config.typing_timeout(), Duration::from_millis(3000));
        assert_eq!(config.profile_mode, ProfileMode::Attributes);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_keeps_defaults_for_missing_keys() {
        let config =
            SyncConfig::from_json(r#"{"throttle_interval_ms": 50, "profile_mode": "packets"}"#)
                .unwrap();
        assert_eq!(config.throttle_interval_ms, 50);
        assert_eq!(config.profile_mode, ProfileMode::Packets);
        assert_eq!(config.chat_history_limit, 200);
    }

    #[test]
    fn test_from_json_rejects_bad_documents() {
        assert!(matches!(
            SyncConfig::from_json("not json"),
            Err(SyncError::Config(_))
        ));
        assert!(matches!(
            SyncConfig::from_json(r#"{"chat_history_limit": 0}"#),
            Err(SyncError::InvalidConfig(_))
        ));
    }
}
