//! A presence session: one local actor in one shared world.
//!
//! `PresenceSession` owns every store for the lifetime of a connection and
//! is the only thing the transport talks to. Inbound events are handled
//! synchronously under short-lived locks; outbound movement, typing and
//! profile updates are published in the background, while chat sends are
//! awaited so the caller sees the delivery outcome.

use log::{debug, info, warn};
use parking_lot::Mutex;
use presence_shared::{
    AnimationState, AvatarRef, ChatImage, Channel, Clock, Euler, MessageId, MovePayload, Packet,
    SessionId, SystemClock, Transport, TransportEvent, TypingPayload, Vector3,
};
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::attributes::{parse_profile_attributes, AttributeProfileSync};
use crate::chat::{ChatHistory, ChatMessage, DeliveryStatus, Direction};
use crate::config::{ProfileMode, SyncConfig};
use crate::error::SyncError;
use crate::interpolation::{InterpolationSet, Transform};
use crate::publisher::{LocalActorState, LocalMovementPublisher, Teleport};
use crate::reconciler::{RemotePlayer, RemotePlayerStore, RemotePlayerUpdate};
use crate::router::ChannelRouter;
use crate::typing::{TypingTracker, TypingUser};

struct SessionState {
    publisher: Mutex<LocalMovementPublisher>,
    players: Mutex<RemotePlayerStore>,
    interpolation: Mutex<InterpolationSet>,
    chat: Mutex<ChatHistory>,
    typing: TypingTracker,
    attributes: Mutex<AttributeProfileSync>,
}

impl SessionState {
    fn on_move(&self, sender: &SessionId, payload: MovePayload, arrival_ms: u64) {
        let transform = Transform {
            position: payload.position,
            rotation: payload.rotation,
        };
        if self.players.lock().upsert(sender, payload.into()) {
            self.interpolation.lock().record(sender, arrival_ms, transform);
        }
    }

    fn on_chat(&self, sender: &SessionId, message: ChatMessage) {
        self.chat.lock().upsert(message);
        // A sent message ends the sender's typing
        self.typing.remove(sender);
    }

    fn on_typing(&self, sender: &SessionId, payload: TypingPayload) {
        if payload.is_typing {
            self.typing.add(sender.clone(), payload.username);
        } else {
            self.typing.remove(sender);
        }
    }
}

/// Presence state for one participant, driven by one transport.
///
/// Clones share the same state, so one clone can run the event loop while
/// another drives the local player.
#[derive(Clone)]
pub struct PresenceSession {
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    router: Arc<ChannelRouter>,
    state: Arc<SessionState>,
}

impl PresenceSession {
    /// Creates a session on the system clock.
    ///
    /// # Returns
    /// `SyncError::InvalidConfig` if `config` does not validate
    pub fn new(transport: Arc<dyn Transport>, config: SyncConfig) -> Result<Self, SyncError> {
        Self::with_clock(transport, config, Arc::new(SystemClock))
    }

    /// Creates a session with an explicit time source, used by tests
    pub fn with_clock(
        transport: Arc<dyn Transport>,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SyncError> {
        config.validate()?;

        let mut publisher = LocalMovementPublisher::new(&config, Arc::clone(&clock));
        let mut players = RemotePlayerStore::new();
        let identity = transport.local_identity();
        publisher.set_session_id(identity.clone());
        players.set_local_identity(identity);

        let state = Arc::new(SessionState {
            publisher: Mutex::new(publisher),
            players: Mutex::new(players),
            interpolation: Mutex::new(InterpolationSet::new(
                config.interpolation_delay_ms,
                config.interpolation_max_samples,
            )),
            chat: Mutex::new(ChatHistory::new(config.chat_history_limit)),
            typing: TypingTracker::new(config.typing_timeout()),
            attributes: Mutex::new(AttributeProfileSync::new()),
        });

        let router = Arc::new(ChannelRouter::new(transport));
        register_handlers(&router, &state, &clock);

        Ok(Self {
            config,
            clock,
            router,
            state,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn local_identity(&self) -> Option<SessionId> {
        self.router.transport().local_identity()
    }

    /// True while the transport reports a local identity
    pub fn is_connected(&self) -> bool {
        self.local_identity().is_some()
    }

    /// Applies one transport event to the session's stores.
    pub fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { identity } => {
                info!("Connected as {}", identity);
                self.state
                    .publisher
                    .lock()
                    .set_session_id(Some(identity.clone()));
                self.state
                    .players
                    .lock()
                    .set_local_identity(Some(identity.clone()));
                self.state.interpolation.lock().remove(&identity);
                self.spawn_profile_sync();
            }

            TransportEvent::Disconnected => {
                info!("Disconnected, clearing session state");
                self.reset();
            }

            TransportEvent::Data {
                topic,
                sender,
                payload,
            } => {
                self.router.route(&topic, sender.as_ref(), &payload);
            }

            TransportEvent::PeerJoined { identity } => {
                debug!("Peer {} joined", identity);
                if self.config.profile_mode == ProfileMode::Packets {
                    // Late joiners never saw our earlier PROFILE packets
                    self.spawn_profile_sync();
                }
            }

            TransportEvent::PeerLeft { identity } => {
                self.state.players.lock().remove(&identity);
                self.state.interpolation.lock().remove(&identity);
                self.state.typing.remove(&identity);
            }

            TransportEvent::AttributesChanged {
                identity,
                attributes,
            } => {
                if self.local_identity().as_ref() == Some(&identity) {
                    return;
                }
                let update = parse_profile_attributes(&identity, &attributes);
                if !update.is_empty() {
                    self.state.players.lock().upsert(&identity, update);
                }
            }

            TransportEvent::MuteChanged { identity, muted } => {
                if self.local_identity().as_ref() == Some(&identity) {
                    return;
                }
                self.state.players.lock().set_mute_status(&identity, muted);
            }

            TransportEvent::ActiveSpeakersChanged { speakers } => {
                self.state.players.lock().set_active_speakers(&speakers);
            }
        }
    }

    /// Drains transport events until the sender side closes.
    pub async fn run(&self, mut events: UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        debug!("Transport event stream closed");
    }

    /// Updates the local position; it goes out on the next [`tick`](Self::tick)
    pub fn set_position(&self, position: Vector3) -> bool {
        self.state.publisher.lock().set_position(position)
    }

    /// Updates the local rotation; it goes out on the next [`tick`](Self::tick)
    pub fn set_rotation(&self, rotation: Euler) -> bool {
        self.state.publisher.lock().set_rotation(rotation)
    }

    /// Changes the animation clip and publishes it immediately.
    pub fn set_animation(&self, animation: AnimationState) -> bool {
        let mut publisher = self.state.publisher.lock();
        let changed = publisher.set_animation(animation);
        if changed && self.is_connected() {
            publisher.force_send_movement(|payload: MovePayload| {
                self.router.dispatch(Packet::Move(payload))
            });
        }
        changed
    }

    /// Changes the running flag and publishes it immediately
    pub fn set_is_running(&self, is_running: bool) -> bool {
        let mut publisher = self.state.publisher.lock();
        let changed = publisher.set_is_running(is_running);
        if changed && self.is_connected() {
            publisher.force_send_movement(|payload: MovePayload| {
                self.router.dispatch(Packet::Move(payload))
            });
        }
        changed
    }

    /// Publishes the current movement sample unless throttled.
    pub fn tick(&self) -> bool {
        let publish = self
            .is_connected()
            .then_some(|payload: MovePayload| self.router.dispatch(Packet::Move(payload)));
        self.state.publisher.lock().send_movement(publish)
    }

    /// Queues a reposition for the physics step
    pub fn teleport(&self, position: Vector3, rotation: Option<Euler>) {
        self.state.publisher.lock().teleport(position, rotation);
    }

    /// Consumes the queued teleport, if any
    pub fn take_pending_teleport(&self) -> Option<Teleport> {
        self.state.publisher.lock().take_pending_teleport()
    }

    /// Changes the display name and publishes the profile.
    ///
    /// Returns false when the name is unchanged; publish failures are logged.
    pub async fn set_username(&self, username: &str) -> bool {
        let changed = self.state.publisher.lock().set_username(username);
        if changed {
            self.publish_profile_logged().await;
        }
        changed
    }

    /// Selects or clears the avatar and publishes the profile.
    ///
    /// In attribute mode a cleared avatar reaches peers as an empty value.
    pub async fn set_avatar(&self, avatar: Option<AvatarRef>) -> bool {
        let changed = self.state.publisher.lock().set_avatar(avatar);
        if changed {
            self.publish_profile_logged().await;
        }
        changed
    }

    /// Sends the local profile to peers using the configured profile path.
    pub async fn publish_profile(&self) -> Result<(), SyncError> {
        if !self.is_connected() {
            return Ok(());
        }

        match self.config.profile_mode {
            ProfileMode::Packets => {
                let payload = self.state.publisher.lock().profile_payload();
                self.router.send(&Packet::Profile(payload)).await
            }
            ProfileMode::Attributes => {
                let changes = {
                    let publisher = self.state.publisher.lock();
                    let state = publisher.state();
                    self.state
                        .attributes
                        .lock()
                        .pending_changes(&state.username, state.current_avatar.as_ref())
                };
                if changes.is_empty() {
                    return Ok(());
                }
                self.router
                    .transport()
                    .set_attributes(changes.clone())
                    .await?;
                self.state.attributes.lock().record_sent(&changes);
                Ok(())
            }
        }
    }

    async fn publish_profile_logged(&self) {
        if let Err(e) = self.publish_profile().await {
            warn!("Failed to publish {}: {}", Channel::Profile, e);
        }
    }

    fn spawn_profile_sync(&self) {
        let session = self.clone();
        spawn_background(async move { session.publish_profile_logged().await });
    }

    /// Sends a chat message with an optimistic local echo.
    ///
    /// Returns `None` when there is nothing to send or no connection. A
    /// rejected publish is not an error here: the message stays in the
    /// history as `Failed` and can be retried.
    pub async fn send_chat_message(
        &self,
        content: &str,
        image: Option<ChatImage>,
    ) -> Result<Option<MessageId>, SyncError> {
        let content = content.trim();
        if content.is_empty() && image.is_none() {
            return Ok(None);
        }
        let Some(identity) = self.local_identity() else {
            debug!("Not connected, chat message dropped");
            return Ok(None);
        };

        let username = self.state.publisher.lock().state().username.clone();
        let message = ChatMessage::outgoing(
            identity,
            Some(username),
            content.to_string(),
            image,
            self.clock.now_millis(),
        );
        let id = message.id.clone();
        let payload = message.to_payload();
        self.state.chat.lock().upsert(message);

        self.deliver_chat(&id, Packet::Chat(payload)).await?;
        Ok(Some(id))
    }

    /// Re-publishes a failed outgoing message under the same id.
    ///
    /// Returns whether the retry was delivered; unknown, incoming or
    /// non-failed messages are left alone.
    pub async fn retry_chat_message(&self, id: &MessageId) -> Result<bool, SyncError> {
        if !self.is_connected() {
            return Ok(false);
        }

        let payload = {
            let mut chat = self.state.chat.lock();
            let Some(message) = chat.get(id) else {
                return Ok(false);
            };
            if message.direction != Direction::Outgoing || message.status != DeliveryStatus::Failed
            {
                return Ok(false);
            }
            let payload = message.to_payload();
            chat.set_status(id, DeliveryStatus::Pending);
            payload
        };

        self.deliver_chat(id, Packet::Chat(payload)).await?;
        Ok(self.chat_status(id) == Some(DeliveryStatus::Sent))
    }

    async fn deliver_chat(&self, id: &MessageId, packet: Packet) -> Result<(), SyncError> {
        match self.router.send(&packet).await {
            Ok(()) => {
                self.state.chat.lock().set_status(id, DeliveryStatus::Sent);
                Ok(())
            }
            Err(SyncError::Transport(e)) => {
                warn!("Chat message {} failed: {}", id, e);
                self.state.chat.lock().set_status(id, DeliveryStatus::Failed);
                Ok(())
            }
            Err(e) => {
                self.state.chat.lock().set_status(id, DeliveryStatus::Failed);
                Err(e)
            }
        }
    }

    /// Signals typing state to peers. Fire-and-forget.
    pub fn send_typing(&self, is_typing: bool) {
        if !self.is_connected() {
            return;
        }
        let username = self.state.publisher.lock().state().username.clone();
        self.router.dispatch(Packet::Typing(TypingPayload {
            username: Some(username),
            is_typing,
        }));
    }

    /// Snapshot of the local actor
    pub fn local_state(&self) -> LocalActorState {
        self.state.publisher.lock().state().clone()
    }

    /// Raw remote players ordered by session id
    pub fn remote_players(&self) -> Vec<RemotePlayer> {
        self.state.players.lock().snapshot()
    }

    /// One remote player, if known
    pub fn remote_player(&self, session_id: &SessionId) -> Option<RemotePlayer> {
        self.state.players.lock().get(session_id).cloned()
    }

    /// Remote players with smoothed transforms for display at `now`.
    pub fn render_players(&self, now: u64) -> Vec<RemotePlayer> {
        let mut players = self.remote_players();
        let interpolation = self.state.interpolation.lock();
        for player in &mut players {
            let raw = Transform {
                position: player.position,
                rotation: player.rotation,
            };
            let smoothed = interpolation.sample(&player.session_id, now, raw);
            player.position = smoothed.position;
            player.rotation = smoothed.rotation;
        }
        players
    }

    /// Chat history, oldest first
    pub fn chat_messages(&self) -> Vec<ChatMessage> {
        self.state.chat.lock().messages()
    }

    /// Delivery status of message `id` while it is still in the history
    pub fn chat_status(&self, id: &MessageId) -> Option<DeliveryStatus> {
        self.state.chat.lock().get(id).map(|m| m.status)
    }

    /// Peers currently typing, ordered by session id
    pub fn typing_users(&self) -> Vec<TypingUser> {
        self.state.typing.typing_users()
    }

    /// Changes whenever local, remote or typing state changes.
    pub fn revision(&self) -> u64 {
        self.state.publisher.lock().revision()
            + self.state.players.lock().revision()
            + self.state.typing.revision()
    }

    /// Drops every piece of session state, as on leaving the world.
    pub fn reset(&self) {
        {
            let mut players = self.state.players.lock();
            players.clear_all();
            players.set_local_identity(self.local_identity());
        }
        self.state.interpolation.lock().clear();
        self.state.typing.clear();
        self.state.chat.lock().clear();
        self.state.publisher.lock().reset();
        self.state.attributes.lock().reset();
    }
}

fn register_handlers(router: &ChannelRouter, state: &Arc<SessionState>, clock: &Arc<dyn Clock>) {
    let weak: Weak<SessionState> = Arc::downgrade(state);
    let arrival_clock = Arc::clone(clock);
    router.register(Channel::Move, move |sender, packet| {
        if let (Some(state), Packet::Move(payload)) = (weak.upgrade(), packet) {
            state.on_move(sender, payload, arrival_clock.now_millis());
        }
    });

    let weak = Arc::downgrade(state);
    router.register(Channel::Profile, move |sender, packet| {
        if let (Some(state), Packet::Profile(payload)) = (weak.upgrade(), packet) {
            state
                .players
                .lock()
                .upsert(sender, RemotePlayerUpdate::from(payload));
        }
    });

    let weak = Arc::downgrade(state);
    router.register(Channel::ChatMessage, move |sender, packet| {
        if let (Some(state), Packet::Chat(payload)) = (weak.upgrade(), packet) {
            state.on_chat(sender, ChatMessage::incoming(sender.clone(), payload));
        }
    });

    let weak = Arc::downgrade(state);
    router.register(Channel::Typing, move |sender, packet| {
        if let (Some(state), Packet::Typing(payload)) = (weak.upgrade(), packet) {
            state.on_typing(sender, payload);
        }
    });
}

fn spawn_background<F>(task: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(task);
        }
        Err(_) => warn!("No runtime available for background publish"),
    }
}
