//! Integration tests for the presence sync stack
//!
//! These tests run full sessions against the loopback relay and validate
//! cross-component behavior end to end.

use async_trait::async_trait;
use presence_client::{DeliveryStatus, Direction, PresenceSession, ProfileMode, SyncConfig};
use presence_relay::{LoopbackRelay, LoopbackTransport, NetworkConditions};
use presence_shared::{
    AnimationState, AvatarRef, Euler, PublishOptions, SessionId, Transport, TransportError,
    Vector3, DEFAULT_USERNAME,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;

struct Participant {
    session: PresenceSession,
    transport: Arc<LoopbackTransport>,
}

impl Participant {
    fn id(&self) -> SessionId {
        self.transport.identity().clone()
    }
}

fn join(relay: &LoopbackRelay, config: SyncConfig) -> Participant {
    let (transport, events) = relay.connect().unwrap();
    let session = PresenceSession::new(transport.clone(), config).unwrap();
    let runner = session.clone();
    tokio::spawn(async move { runner.run(events).await });
    Participant { session, transport }
}

/// Polls `condition` until it holds or two seconds pass.
async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Transport whose publishes block until the test releases them
struct GatedTransport {
    gate: Semaphore,
}

#[async_trait]
impl Transport for GatedTransport {
    fn local_identity(&self) -> Option<SessionId> {
        Some(SessionId::from("local"))
    }

    async fn publish(
        &self,
        _topic: &str,
        _payload: Vec<u8>,
        _options: PublishOptions,
    ) -> Result<(), TransportError> {
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| TransportError::NotConnected)?;
        permit.forget();
        Ok(())
    }

    async fn set_attributes(
        &self,
        _attributes: HashMap<String, String>,
    ) -> Result<(), TransportError> {
        Ok(())
    }
}

/// END-TO-END SCENARIOS
mod scenario_tests {
    use super::*;

    /// The local echo is pending until the publish resolves
    #[tokio::test]
    async fn chat_echo_is_pending_while_publishing() {
        let transport = Arc::new(GatedTransport {
            gate: Semaphore::new(0),
        });
        let session = PresenceSession::new(transport.clone(), SyncConfig::default()).unwrap();

        let sender = session.clone();
        let send = tokio::spawn(async move { sender.send_chat_message("hello", None).await });

        assert!(
            eventually(|| {
                let messages = session.chat_messages();
                messages.len() == 1 && messages[0].status == DeliveryStatus::Pending
            })
            .await
        );
        let pending = session.chat_messages().remove(0);
        assert_eq!(pending.content, "hello");
        assert_eq!(pending.direction, Direction::Outgoing);

        transport.gate.add_permits(1);
        let id = send.await.unwrap().unwrap().unwrap();
        assert_eq!(id, pending.id);

        let messages = session.chat_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].status, DeliveryStatus::Sent);
        assert_eq!(messages[0].content, "hello");
    }

    /// A peer's MOVE produces a fully defaulted remote player
    #[tokio::test]
    async fn move_creates_defaulted_remote_player() {
        let relay = LoopbackRelay::new(NetworkConditions::default());
        let local = join(&relay, SyncConfig::default());
        let peer = join(&relay, SyncConfig::default());

        peer.session.set_position(Vector3::new(1.0, 2.0, 3.0));
        peer.session.set_rotation(Euler::new(0.0, 0.0, 0.0));
        peer.session.set_is_running(true);
        peer.session.set_animation(AnimationState::Forward);

        let peer_id = peer.id();
        assert!(
            eventually(|| {
                local
                    .session
                    .remote_player(&peer_id)
                    .map(|p| p.animation_state == AnimationState::Forward)
                    .unwrap_or(false)
            })
            .await
        );

        let player = local.session.remote_player(&peer_id).unwrap();
        assert_eq!(player.position, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(player.rotation, Euler::new(0.0, 0.0, 0.0));
        assert!(player.is_running);
        assert!(player.is_muted);
        assert!(!player.is_speaking);
        assert_eq!(player.username, DEFAULT_USERNAME);
    }

    /// Outgoing chat is echoed locally and marked sent by id
    #[tokio::test]
    async fn chat_send_echoes_then_marks_sent() {
        let relay = LoopbackRelay::new(NetworkConditions::default());
        let local = join(&relay, SyncConfig::default());
        let peer = join(&relay, SyncConfig::default());

        let id = local
            .session
            .send_chat_message("hello", None)
            .await
            .unwrap()
            .unwrap();

        let messages = local.session.chat_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, id);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[0].direction, Direction::Outgoing);
        assert_eq!(messages[0].status, DeliveryStatus::Sent);

        assert!(eventually(|| peer.session.chat_messages().len() == 1).await);
        let received = &peer.session.chat_messages()[0];
        assert_eq!(received.id, id);
        assert_eq!(received.direction, Direction::Incoming);
        assert_eq!(received.session_id, local.id());
    }

    /// MOVE and PROFILE merge in either order
    #[tokio::test]
    async fn move_and_profile_merge_in_any_order() {
        let relay = LoopbackRelay::new(NetworkConditions::default());
        let local = join(&relay, SyncConfig::default());
        let first = join(&relay, SyncConfig::default());
        let second = join(
            &relay,
            SyncConfig {
                profile_mode: ProfileMode::Packets,
                ..SyncConfig::default()
            },
        );

        first.session.set_position(Vector3::new(4.0, 0.0, 0.0));
        first.session.tick();
        first.session.set_username("Alice").await;

        second.session.set_username("Alice").await;
        second.session.set_position(Vector3::new(4.0, 0.0, 0.0));
        second.session.tick();

        for peer in [&first, &second] {
            let peer_id = peer.id();
            assert!(
                eventually(|| {
                    local
                        .session
                        .remote_player(&peer_id)
                        .map(|p| p.username == "Alice" && p.position.x == 4.0)
                        .unwrap_or(false)
                })
                .await
            );
        }
    }
}

/// CHANNEL AND MEMBERSHIP TESTS
mod membership_tests {
    use super::*;

    /// Nothing a session publishes ever shows up as a remote player or
    /// incoming message on that same session
    #[tokio::test]
    async fn no_self_reflection_on_any_channel() {
        let relay = LoopbackRelay::new(NetworkConditions::default());
        let solo = join(&relay, SyncConfig::default());
        let observer = join(&relay, SyncConfig::default());

        solo.session.set_position(Vector3::new(1.0, 0.0, 0.0));
        solo.session.tick();
        solo.session.set_username("Solo").await;
        solo.session.send_typing(true);
        solo.session.send_chat_message("hi", None).await.unwrap();

        let solo_id = solo.id();
        assert!(eventually(|| observer.session.remote_player(&solo_id).is_some()).await);
        assert!(eventually(|| !observer.session.typing_users().is_empty()).await);
        assert!(eventually(|| observer.session.chat_messages().len() == 1).await);

        // The observer may appear here through its profile attributes
        assert!(solo.session.remote_player(&solo_id).is_none());
        assert!(solo
            .session
            .typing_users()
            .iter()
            .all(|user| user.session_id != solo_id));
        let messages = solo.session.chat_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].direction, Direction::Outgoing);
    }

    /// Profiles written before a peer joins still reach it
    #[tokio::test]
    async fn late_joiner_receives_profile_attributes() {
        let relay = LoopbackRelay::new(NetworkConditions::default());
        let early = join(&relay, SyncConfig::default());
        let avatar = AvatarRef {
            id: 3,
            model_url: "https://models/3.vrm".to_string(),
            thumbnail_url: None,
        };
        early.session.set_username("Early").await;
        early.session.set_avatar(Some(avatar.clone())).await;

        let late = join(&relay, SyncConfig::default());
        let early_id = early.id();
        assert!(
            eventually(|| {
                late.session
                    .remote_player(&early_id)
                    .map(|p| p.username == "Early" && p.avatar.as_ref() == Some(&avatar))
                    .unwrap_or(false)
            })
            .await
        );
    }

    /// A leaving peer disappears from everyone else's view
    #[tokio::test]
    async fn peer_left_removes_remote_player() {
        let relay = LoopbackRelay::new(NetworkConditions::default());
        let local = join(&relay, SyncConfig::default());
        let peer = join(&relay, SyncConfig::default());

        peer.session.tick();
        let peer_id = peer.id();
        assert!(eventually(|| local.session.remote_player(&peer_id).is_some()).await);

        peer.transport.disconnect();
        assert!(eventually(|| local.session.remote_players().is_empty()).await);
    }

    /// Losing the connection wipes the local session
    #[tokio::test]
    async fn disconnect_clears_all_state() {
        let relay = LoopbackRelay::new(NetworkConditions::default());
        let local = join(&relay, SyncConfig::default());
        let peer = join(&relay, SyncConfig::default());

        local.session.set_username("Local").await;
        local.session.send_chat_message("bye", None).await.unwrap();
        peer.session.tick();
        peer.session.send_typing(true);
        let peer_id = peer.id();
        assert!(eventually(|| local.session.remote_player(&peer_id).is_some()).await);

        local.transport.disconnect();
        assert!(
            eventually(|| {
                local.session.remote_players().is_empty()
                    && local.session.chat_messages().is_empty()
                    && local.session.typing_users().is_empty()
            })
            .await
        );
        assert_eq!(local.session.local_state().username, DEFAULT_USERNAME);
        assert_eq!(local.session.local_state().session_id, None);
        assert!(local.transport.local_identity().is_none());
    }

    /// Mute and speaking state flow from the relay into remote players
    #[tokio::test]
    async fn audio_state_reaches_remote_players() {
        let relay = LoopbackRelay::new(NetworkConditions::default());
        let local = join(&relay, SyncConfig::default());
        let peer = join(&relay, SyncConfig::default());
        let peer_id = peer.id();

        relay.set_mute(&peer_id, false);
        relay.set_active_speakers(vec![peer_id.clone()]);

        assert!(
            eventually(|| {
                local
                    .session
                    .remote_player(&peer_id)
                    .map(|p| !p.is_muted && p.is_speaking)
                    .unwrap_or(false)
            })
            .await
        );
    }
}

/// CHAT AND TYPING TESTS
mod chat_tests {
    use super::*;

    /// A rejected chat publish is surfaced as failed and can be retried
    #[tokio::test]
    async fn failed_chat_retry_then_sent() {
        let relay = LoopbackRelay::new(NetworkConditions::default());
        let local = join(&relay, SyncConfig::default());
        let peer = join(&relay, SyncConfig::default());

        local.transport.set_publish_failure(Some("offline"));
        let id = local
            .session
            .send_chat_message("retry me", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(local.session.chat_status(&id), Some(DeliveryStatus::Failed));

        local.transport.set_publish_failure(None);
        assert!(local.session.retry_chat_message(&id).await.unwrap());
        assert_eq!(local.session.chat_status(&id), Some(DeliveryStatus::Sent));
        assert_eq!(local.session.chat_messages().len(), 1);

        assert!(eventually(|| peer.session.chat_messages().len() == 1).await);
        assert_eq!(peer.session.chat_messages()[0].id, id);
    }

    /// The chat window keeps the most recent messages
    #[tokio::test]
    async fn chat_history_is_capped() {
        let relay = LoopbackRelay::new(NetworkConditions::default());
        let config = SyncConfig {
            chat_history_limit: 5,
            ..SyncConfig::default()
        };
        let local = join(&relay, config.clone());
        let peer = join(&relay, config);

        for i in 0..6 {
            local
                .session
                .send_chat_message(&format!("message {}", i), None)
                .await
                .unwrap();
        }

        let messages = local.session.chat_messages();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0].content, "message 1");
        assert_eq!(messages[4].content, "message 5");

        assert!(
            eventually(|| {
                let received = peer.session.chat_messages();
                received.len() == 5 && received[4].content == "message 5"
            })
            .await
        );
        assert_eq!(peer.session.chat_messages()[0].content, "message 1");
    }

    /// Typing indicators expire without further signals
    #[tokio::test]
    async fn typing_indicator_expires() {
        let relay = LoopbackRelay::new(NetworkConditions::default());
        let config = SyncConfig {
            typing_timeout_ms: 200,
            ..SyncConfig::default()
        };
        let local = join(&relay, config.clone());
        let peer = join(&relay, config);

        peer.session.send_typing(true);
        assert!(eventually(|| local.session.typing_users().len() == 1).await);
        assert_eq!(local.session.typing_users()[0].session_id, peer.id());

        assert!(eventually(|| local.session.typing_users().is_empty()).await);
    }

    /// Typing stopped clears the indicator immediately
    #[tokio::test]
    async fn typing_stop_clears_indicator() {
        let relay = LoopbackRelay::new(NetworkConditions::default());
        let local = join(&relay, SyncConfig::default());
        let peer = join(&relay, SyncConfig::default());

        peer.session.send_typing(true);
        assert!(eventually(|| local.session.typing_users().len() == 1).await);
        peer.session.send_typing(false);
        assert!(eventually(|| local.session.typing_users().is_empty()).await);
    }
}

/// LOSSY NETWORK TESTS
mod network_condition_tests {
    use super::*;

    /// Under heavy loss, movement still converges once a sample gets through
    /// while reliable channels are unaffected
    #[tokio::test]
    async fn lossy_relay_keeps_reliable_channels() {
        let relay = LoopbackRelay::new(NetworkConditions::lossy(0.5, 20).with_seed(42));
        let local = join(&relay, SyncConfig::default());
        let peer = join(&relay, SyncConfig::default());

        peer.session.set_position(Vector3::new(9.0, 0.0, 0.0));
        let peer_id = peer.id();
        let mut converged = false;
        for _ in 0..100 {
            peer.session.tick();
            sleep(Duration::from_millis(110)).await;
            if local
                .session
                .remote_player(&peer_id)
                .map(|p| p.position.x == 9.0)
                .unwrap_or(false)
            {
                converged = true;
                break;
            }
        }
        assert!(converged);

        for i in 0..10 {
            peer.session
                .send_chat_message(&format!("m{}", i), None)
                .await
                .unwrap();
        }
        assert!(eventually(|| local.session.chat_messages().len() == 10).await);
    }
}
