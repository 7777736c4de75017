//! Typing indicators with per-peer expiry timers.
//!
//! Every peer has at most one live timer. A fresh typing signal aborts the
//! old timer and starts a new one, so an indicator disappears a fixed time
//! after the most recent signal, not the first.

use log::{debug, warn};
use parking_lot::Mutex;
use presence_shared::SessionId;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// A peer currently shown as typing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingUser {
    pub session_id: SessionId,
    pub username: Option<String>,
}

struct TypingEntry {
    user: TypingUser,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct TypingState {
    entries: HashMap<SessionId, TypingEntry>,
    next_generation: u64,
    revision: u64,
}

impl TypingState {
    fn remove(&mut self, session_id: &SessionId) -> bool {
        match self.entries.remove(session_id) {
            Some(entry) => {
                if let Some(timer) = entry.timer {
                    timer.abort();
                }
                self.revision += 1;
                true
            }
            None => false,
        }
    }
}

/// Tracks who is typing and expires each indicator on its own timer.
///
/// Timers need a tokio runtime; without one indicators stay until removed.
pub struct TypingTracker {
    state: Arc<Mutex<TypingState>>,
    timeout: Duration,
}

impl TypingTracker {
    /// Creates an empty tracker whose indicators last `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(TypingState::default())),
            timeout,
        }
    }

    /// Marks `session_id` as typing and restarts its expiry timer.
    pub fn add(&self, session_id: SessionId, username: Option<String>) {
        let mut state = self.state.lock();
        state.next_generation += 1;
        let generation = state.next_generation;

        if let Some(previous) = state.entries.remove(&session_id) {
            if let Some(timer) = previous.timer {
                timer.abort();
            }
        }

        let timer = self.spawn_expiry(session_id.clone(), generation);
        state.entries.insert(
            session_id.clone(),
            TypingEntry {
                user: TypingUser {
                    session_id,
                    username,
                },
                generation,
                timer,
            },
        );
        state.revision += 1;
    }

    fn spawn_expiry(&self, session_id: SessionId, generation: u64) -> Option<JoinHandle<()>> {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No runtime for typing timer; indicator for {} will not expire", session_id);
                return None;
            }
        };

        let state: Weak<Mutex<TypingState>> = Arc::downgrade(&self.state);
        let deadline = tokio::time::Instant::now() + self.timeout;
        Some(handle.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(state) = state.upgrade() else {
                return;
            };
            let mut state = state.lock();
            // A refresh may have raced with this timer firing
            let current = state
                .entries
                .get(&session_id)
                .map(|entry| entry.generation == generation)
                .unwrap_or(false);
            if current {
                state.entries.remove(&session_id);
                state.revision += 1;
                debug!("Typing indicator for {} expired", session_id);
            }
        }))
    }

    /// Clears the indicator for `session_id` and cancels its timer.
    pub fn remove(&self, session_id: &SessionId) -> bool {
        self.state.lock().remove(session_id)
    }

    /// Drops every indicator and cancels all timers
    pub fn clear(&self) {
        let mut state = self.state.lock();
        for (_, entry) in state.entries.drain() {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
        }
        state.revision += 1;
    }

    pub fn is_typing(&self, session_id: &SessionId) -> bool {
        self.state.lock().entries.contains_key(session_id)
    }

    /// Currently typing peers ordered by session id
    pub fn typing_users(&self) -> Vec<TypingUser> {
        let state = self.state.lock();
        let mut users: Vec<TypingUser> = state.entries.values().map(|e| e.user.clone()).collect();
        users.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        users
    }

    /// Increments whenever the set of typing peers changes
    pub fn revision(&self) -> u64 {
        self.state.lock().revision
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }
}

impl Drop for TypingTracker {
    fn drop(&mut self) {
        self.clear();
    }
}
