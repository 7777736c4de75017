//! Local actor state with change detection and throttled movement publishing

use log::{debug, warn};
use presence_shared::{
    AnimationState, AvatarRef, Clock, Euler, MovePayload, ProfilePayload, SessionId, Vector3,
    DEFAULT_USERNAME,
};
use std::sync::Arc;

use crate::config::SyncConfig;

/// Authoritative record of the local player
#[derive(Debug, Clone, PartialEq)]
pub struct LocalActorState {
    /// Identity assigned by the transport, `None` while disconnected
    pub session_id: Option<SessionId>,
    /// Display name, never blank
    pub username: String,
    /// Selected avatar, if any
    pub current_avatar: Option<AvatarRef>,
    /// Rounded to the configured precision
    pub position: Vector3,
    /// Normalized and rounded
    pub rotation: Euler,
    pub is_running: bool,
    pub animation_state: AnimationState,
    /// Time of the last accepted movement publish, in milliseconds
    pub last_sent_time: Option<u64>,
}

impl Default for LocalActorState {
    fn default() -> Self {
        Self {
            session_id: None,
            username: DEFAULT_USERNAME.to_string(),
            current_avatar: None,
            position: Vector3::ZERO,
            rotation: Euler::IDENTITY,
            is_running: false,
            animation_state: AnimationState::Idle,
            last_sent_time: None,
        }
    }
}

/// Reposition request handed to the physics step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Teleport {
    pub position: Vector3,
    pub rotation: Option<Euler>,
}

/// Owns the local actor and decides when a movement sample goes out.
///
/// Setters short-circuit when nothing observable changes, so sub-precision
/// jitter from physics neither bumps [`revision`](Self::revision) nor reaches
/// the network. Movement is throttled by dropping: a call inside the
/// throttle window is discarded because the next call carries fresher state.
pub struct LocalMovementPublisher {
    state: LocalActorState,
    pending_teleport: Option<Teleport>,
    throttle_interval_ms: u64,
    precision: u32,
    clock: Arc<dyn Clock>,
    revision: u64,
}

impl LocalMovementPublisher {
    /// Creates a publisher with default actor state.
    ///
    /// # Arguments
    /// * `config` - Supplies the throttle window and rounding precision
    /// * `clock` - Time source for the throttle
    pub fn new(config: &SyncConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: LocalActorState::default(),
            pending_teleport: None,
            throttle_interval_ms: config.throttle_interval_ms,
            precision: config.precision,
            clock,
            revision: 0,
        }
    }

    /// Current local actor state
    pub fn state(&self) -> &LocalActorState {
        &self.state
    }

    /// Increments on every observable state change
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Records the identity the transport assigned, or `None` on disconnect
    pub fn set_session_id(&mut self, session_id: Option<SessionId>) {
        if self.state.session_id != session_id {
            self.state.session_id = session_id;
            self.revision += 1;
        }
    }

    /// Stores the rounded position; returns false when it is unchanged
    pub fn set_position(&mut self, position: Vector3) -> bool {
        if !position.is_finite() {
            warn!("Ignoring non-finite position {:?}", position);
            return false;
        }

        let rounded = position.rounded(self.precision);
        if rounded == self.state.position {
            return false;
        }

        self.state.position = rounded;
        self.revision += 1;
        true
    }

    /// Stores the normalized, rounded rotation; returns false when it is unchanged
    pub fn set_rotation(&mut self, rotation: Euler) -> bool {
        if !rotation.is_finite() {
            warn!("Ignoring non-finite rotation {:?}", rotation);
            return false;
        }

        let rounded = rotation.normalized().rounded(self.precision);
        if rounded == self.state.rotation {
            return false;
        }

        self.state.rotation = rounded;
        self.revision += 1;
        true
    }

    /// Changes the animation clip; returns false when it is unchanged
    pub fn set_animation(&mut self, animation: AnimationState) -> bool {
        if self.state.animation_state == animation {
            return false;
        }
        self.state.animation_state = animation;
        self.revision += 1;
        true
    }

    /// Changes the running flag; returns false when it is unchanged
    pub fn set_is_running(&mut self, is_running: bool) -> bool {
        if self.state.is_running == is_running {
            return false;
        }
        self.state.is_running = is_running;
        self.revision += 1;
        true
    }

    /// Sets the display name; blank names fall back to the placeholder
    pub fn set_username(&mut self, username: &str) -> bool {
        let username = match username.trim() {
            "" => DEFAULT_USERNAME,
            trimmed => trimmed,
        };
        if self.state.username == username {
            return false;
        }
        self.state.username = username.to_string();
        self.revision += 1;
        true
    }

    /// Selects or clears the avatar; returns false when it is unchanged
    pub fn set_avatar(&mut self, avatar: Option<AvatarRef>) -> bool {
        if self.state.current_avatar == avatar {
            return false;
        }
        self.state.current_avatar = avatar;
        self.revision += 1;
        true
    }

    /// MOVE payload for the current state
    pub fn movement_payload(&self) -> MovePayload {
        MovePayload {
            position: self.state.position,
            rotation: self.state.rotation,
            is_running: self.state.is_running,
            animation: self.state.animation_state,
        }
    }

    /// PROFILE payload carrying the full current profile
    pub fn profile_payload(&self) -> ProfilePayload {
        ProfilePayload {
            username: Some(self.state.username.clone()),
            avatar: self.state.current_avatar.clone(),
        }
    }

    /// Hands the current movement sample to `publish` unless throttled.
    ///
    /// Without a publisher (not connected yet) nothing happens and the
    /// throttle timestamp is left alone. Returns whether `publish` was called.
    pub fn send_movement<F>(&mut self, publish: Option<F>) -> bool
    where
        F: FnOnce(MovePayload),
    {
        let Some(publish) = publish else {
            return false;
        };

        let now = self.clock.now_millis();
        if let Some(last_sent) = self.state.last_sent_time {
            if now.saturating_sub(last_sent) < self.throttle_interval_ms {
                return false;
            }
        }

        publish(self.movement_payload());
        self.state.last_sent_time = Some(now);
        true
    }

    /// Publishes regardless of the throttle window; used for discrete
    /// animation changes that gate which clip peers play.
    pub fn force_send_movement<F>(&mut self, publish: F)
    where
        F: FnOnce(MovePayload),
    {
        publish(self.movement_payload());
        self.state.last_sent_time = Some(self.clock.now_millis());
    }

    /// Queues a reposition for the physics step; the stored transform is untouched
    pub fn teleport(&mut self, position: Vector3, rotation: Option<Euler>) {
        debug!("Teleport requested to {:?}", position);
        self.pending_teleport = Some(Teleport { position, rotation });
    }

    pub fn pending_teleport(&self) -> Option<&Teleport> {
        self.pending_teleport.as_ref()
    }

    /// Removes and returns the queued teleport, if any
    pub fn take_pending_teleport(&mut self) -> Option<Teleport> {
        self.pending_teleport.take()
    }

    /// Back to neutral defaults, as on leaving the world
    pub fn reset(&mut self) {
        self.state = LocalActorState::default();
        self.pending_teleport = None;
        self.revision += 1;
    }
}
