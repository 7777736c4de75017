//! Canonical set of remote players, built from partial field merges.
//!
//! MOVE packets, PROFILE packets, attribute changes and audio events each
//! touch a different subset of a player's fields and arrive in any order.
//! Every update is therefore a shallow merge keyed by session id: fields the
//! update leaves out keep whatever an earlier update wrote. Within a single
//! field the last delivered value wins; there is no sequence numbering.

use log::{debug, info, trace};
use presence_shared::{
    AnimationState, AvatarRef, Euler, MovePayload, ProfilePayload, SessionId, Vector3,
    DEFAULT_USERNAME,
};
use std::collections::HashMap;

/// One peer as seen by this client. Every field has a renderable default.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePlayer {
    /// Transport identity of the peer
    pub session_id: SessionId,
    /// Display name, `Anonymous` until a profile arrives
    pub username: String,
    /// Avatar, `None` until one is announced
    pub avatar: Option<AvatarRef>,
    /// Last raw network sample, before interpolation
    pub position: Vector3,
    pub rotation: Euler,
    pub is_running: bool,
    /// Clip to play; unknown names arrive as idle
    pub animation_state: AnimationState,
    /// Unknown audio state counts as muted
    pub is_muted: bool,
    /// True while the peer is in the active speaker set
    pub is_speaking: bool,
}

impl RemotePlayer {
    /// Entry with every field at its default
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            username: DEFAULT_USERNAME.to_string(),
            avatar: None,
            position: Vector3::ZERO,
            rotation: Euler::IDENTITY,
            is_running: false,
            animation_state: AnimationState::Idle,
            is_muted: true,
            is_speaking: false,
        }
    }

    fn apply(&mut self, update: &RemotePlayerUpdate) {
        if let Some(username) = &update.username {
            self.username = username.clone();
        }
        if let Some(avatar) = &update.avatar {
            self.avatar = avatar.clone();
        }
        if let Some(position) = update.position {
            self.position = position;
        }
        if let Some(rotation) = update.rotation {
            self.rotation = rotation;
        }
        if let Some(is_running) = update.is_running {
            self.is_running = is_running;
        }
        if let Some(animation_state) = update.animation_state {
            self.animation_state = animation_state;
        }
        if let Some(is_muted) = update.is_muted {
            self.is_muted = is_muted;
        }
        if let Some(is_speaking) = update.is_speaking {
            self.is_speaking = is_speaking;
        }
    }
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemotePlayerUpdate {
    pub username: Option<String>,
    /// `Some(None)` clears a previously known avatar
    pub avatar: Option<Option<AvatarRef>>,
    pub position: Option<Vector3>,
    pub rotation: Option<Euler>,
    pub is_running: Option<bool>,
    pub animation_state: Option<AnimationState>,
    pub is_muted: Option<bool>,
    pub is_speaking: Option<bool>,
}

impl RemotePlayerUpdate {
    /// True when applying the update would change nothing
    pub fn is_empty(&self) -> bool {
        self == &RemotePlayerUpdate::default()
    }
}

impl From<MovePayload> for RemotePlayerUpdate {
    fn from(payload: MovePayload) -> Self {
        Self {
            position: Some(payload.position),
            rotation: Some(payload.rotation),
            is_running: Some(payload.is_running),
            animation_state: Some(payload.animation),
            ..Default::default()
        }
    }
}

impl From<ProfilePayload> for RemotePlayerUpdate {
    fn from(payload: ProfilePayload) -> Self {
        Self {
            // A blank name would render as nothing; keep the previous one
            username: payload.username.filter(|name| !name.trim().is_empty()),
            avatar: payload.avatar.map(Some),
            ..Default::default()
        }
    }
}

/// Every remote player this client knows about, keyed by session id.
///
/// The local identity is never stored, whichever path an update arrives on.
#[derive(Debug, Default)]
pub struct RemotePlayerStore {
    local_identity: Option<SessionId>,
    players: HashMap<SessionId, RemotePlayer>,
    revision: u64,
}

impl RemotePlayerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the identity that must never appear as a remote player.
    ///
    /// An entry that already exists under that identity is dropped.
    pub fn set_local_identity(&mut self, identity: Option<SessionId>) {
        if let Some(identity) = &identity {
            if self.players.remove(identity).is_some() {
                self.revision += 1;
            }
        }
        self.local_identity = identity;
    }

    pub fn local_identity(&self) -> Option<&SessionId> {
        self.local_identity.as_ref()
    }

    /// Creates or merges into the entry for `session_id`.
    ///
    /// Returns false when the id is blank or belongs to the local session.
    pub fn upsert(&mut self, session_id: &SessionId, update: RemotePlayerUpdate) -> bool {
        if session_id.is_empty() || self.local_identity.as_ref() == Some(session_id) {
            trace!("Refusing remote update for '{}'", session_id);
            return false;
        }

        match self.players.get_mut(session_id) {
            Some(player) => player.apply(&update),
            None => {
                let mut player = RemotePlayer::new(session_id.clone());
                player.apply(&update);
                info!("Remote player {} appeared", session_id);
                self.players.insert(session_id.clone(), player);
            }
        }

        self.revision += 1;
        true
    }

    /// Removes a departed peer.
    ///
    /// # Returns
    /// The removed entry, or `None` if the peer was unknown
    pub fn remove(&mut self, session_id: &SessionId) -> Option<RemotePlayer> {
        let removed = self.players.remove(session_id);
        if removed.is_some() {
            info!("Remote player {} left", session_id);
            self.revision += 1;
        }
        removed
    }

    /// Sets the mute flag, creating the entry if the peer is new
    pub fn set_mute_status(&mut self, session_id: &SessionId, muted: bool) -> bool {
        self.upsert(
            session_id,
            RemotePlayerUpdate {
                is_muted: Some(muted),
                ..Default::default()
            },
        )
    }

    /// Sets the speaking flag, creating the entry if the peer is new
    pub fn set_speaking_status(&mut self, session_id: &SessionId, speaking: bool) -> bool {
        self.upsert(
            session_id,
            RemotePlayerUpdate {
                is_speaking: Some(speaking),
                ..Default::default()
            },
        )
    }

    /// Marks exactly the listed peers as speaking.
    pub fn set_active_speakers(&mut self, speakers: &[SessionId]) {
        for player in self.players.values_mut() {
            player.is_speaking = false;
        }
        for speaker in speakers {
            self.set_speaking_status(speaker, true);
        }
        self.revision += 1;
    }

    /// Forgets every remote player
    pub fn clear_all(&mut self) {
        if !self.players.is_empty() {
            debug!("Clearing {} remote players", self.players.len());
        }
        self.players.clear();
        self.revision += 1;
    }

    /// Looks up one player
    pub fn get(&self, session_id: &SessionId) -> Option<&RemotePlayer> {
        self.players.get(session_id)
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.players.contains_key(session_id)
    }

    /// Unordered view of every player
    pub fn players(&self) -> impl Iterator<Item = &RemotePlayer> {
        self.players.values()
    }

    /// All players ordered by session id
    pub fn snapshot(&self) -> Vec<RemotePlayer> {
        let mut players: Vec<RemotePlayer> = self.players.values().cloned().collect();
        players.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        players
    }

    /// Increments on every change to the store
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
