//! Protocol types shared by every presence-sync participant.
//!
//! Holds the wire payloads for each logical channel, the JSON codec, the
//! vector/euler math used for movement samples, the transport contract the
//! sync core rides on, and the protocol constants both ends agree on.

pub mod codec;
pub mod math;
pub mod packets;
pub mod time;
pub mod transport;

pub use codec::{decode, decode_packet, encode, encode_packet, CodecError};
pub use math::{normalize_angle, round_to, Euler, Vector3};
pub use packets::{
    AnimationState, AvatarRef, Channel, ChatImage, ChatPayload, FailurePolicy, MessageId,
    MovePayload, Packet, ProfilePayload, SessionId, TypingPayload,
};
pub use time::{get_timestamp, Clock, ManualClock, SystemClock};
pub use transport::{PublishOptions, Transport, TransportError, TransportEvent};

/// Minimum spacing between two published movement samples.
pub const THROTTLE_INTERVAL_MS: u64 = 100;
/// Decimal places kept on position and rotation axes.
pub const POSITION_PRECISION: u32 = 2;
/// Chat history window; older messages are evicted first.
pub const CHAT_HISTORY_LIMIT: usize = 200;
/// A typing indicator expires this long after the last signal from its peer.
pub const TYPING_TIMEOUT_MS: u64 = 3000;
/// Remote entities are rendered this far in the past.
pub const INTERPOLATION_DELAY_MS: u64 = 100;
/// Upper bound on buffered samples per interpolated entity.
pub const INTERPOLATION_MAX_SAMPLES: usize = 8;
/// Display name used until a peer (or the local user) sets one.
pub const DEFAULT_USERNAME: &str = "Anonymous";

/// Attribute key carrying a peer's display name.
pub const ATTR_USERNAME: &str = "profile.username";
/// Attribute key carrying a peer's JSON-serialized [`AvatarRef`]; an empty
/// value means the avatar was cleared.
pub const ATTR_AVATAR: &str = "profile.avatar";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolation_delay_matches_publish_rate() {
        // Rendering one publish interval behind keeps two samples bracketing
        // the render time under steady traffic.
        assert!(INTERPOLATION_DELAY_MS >= THROTTLE_INTERVAL_MS);
        assert!(INTERPOLATION_MAX_SAMPLES >= 2);
    }

    #[test]
    fn test_attribute_keys_are_namespaced() {
        assert!(ATTR_USERNAME.starts_with("profile."));
        assert!(ATTR_AVATAR.starts_with("profile."));
        assert_ne!(ATTR_USERNAME, ATTR_AVATAR);
    }
}
