//! # Presence Sync Client Library
//!
//! This library provides the client-side core of a shared 3D world: it keeps
//! every participant's avatar, movement, profile, chat and typing state in
//! sync over a topic-based publish/subscribe transport. It renders nothing
//! and owns no sockets; the transport is anything implementing
//! [`presence_shared::Transport`].
//!
//! ## Architecture Overview
//!
//! All state lives in a [`PresenceSession`], one per connection. The
//! transport pushes [`presence_shared::TransportEvent`]s into the session;
//! the application pushes local changes (position, animation, username,
//! chat) into it and reads back snapshots for display.
//!
//! ### Throttled Local Publishing
//! The local actor's transform is rounded to a fixed precision and only
//! published when the throttle window has passed. Samples inside the window
//! are dropped, not queued: the next one supersedes them anyway. Discrete
//! animation changes skip the throttle so peers switch clips promptly.
//!
//! ### Partial-Update Reconciliation
//! Movement, profile packets, replicated attributes and audio events each
//! carry a different slice of a remote player. They arrive in any order and
//! are shallow-merged into one entry per session id, so no ordering between
//! channels is ever assumed.
//!
//! ### Render-Time Interpolation
//! Remote transforms are buffered and displayed slightly in the past, which
//! keeps motion smooth between the widely spaced network samples.
//!
//! ## Module Organization
//!
//! ### Publisher Module (`publisher`)
//! - Local actor state with change detection
//! - Throttle-by-drop movement publishing
//! - Teleport requests for the physics collaborator
//!
//! ### Router Module (`router`)
//! - Per-channel topic, reliability and failure policy
//! - Sender resolution; self-echo and anonymous data are dropped
//! - Decoding and dispatch to channel handlers
//!
//! ### Reconciler Module (`reconciler`)
//! - Remote player store keyed by session id
//! - Field-level merge with renderable defaults
//!
//! ### Interpolation Module (`interpolation`)
//! - Bounded per-entity sample buffers
//! - Shortest-arc rotation blending
//!
//! ### Chat and Typing Modules (`chat`, `typing`)
//! - Optimistic local echo with `pending`, `sent` and `failed` states
//! - De-duplication by message id and a bounded history
//! - Typing indicators with cancellable expiry timers
//!
//! ### Attributes Module (`attributes`)
//! - Username and avatar replicated as peer attributes
//! - Writes suppressed when nothing changed since the last successful one
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use presence_client::{PresenceSession, SyncConfig};
//! use presence_relay::{LoopbackRelay, NetworkConditions};
//! use presence_shared::Vector3;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let relay = LoopbackRelay::new(NetworkConditions::default());
//!     let (transport, events) = relay.connect()?;
//!
//!     let session = PresenceSession::new(transport, SyncConfig::default())?;
//!     let runner = session.clone();
//!     tokio::spawn(async move { runner.run(events).await });
//!
//!     // Game loop: update the local actor, then publish if due
//!     session.set_position(Vector3::new(1.0, 0.0, 2.0));
//!     session.tick();
//!
//!     session.send_chat_message("hello", None).await?;
//!     for player in session.render_players(presence_shared::get_timestamp()) {
//!         println!("{} at {:?}", player.username, player.position);
//!     }
//!     Ok(())
//! }
//! ```

pub mod attributes;
pub mod chat;
pub mod config;
pub mod error;
pub mod interpolation;
pub mod publisher;
pub mod reconciler;
pub mod router;
pub mod session;
pub mod typing;

pub use chat::{ChatHistory, ChatMessage, DeliveryStatus, Direction};
pub use config::{ProfileMode, SyncConfig};
pub use error::SyncError;
pub use interpolation::{Interpolate, InterpolationBuffer, InterpolationSet, Transform};
pub use publisher::{LocalActorState, LocalMovementPublisher, Teleport};
pub use reconciler::{RemotePlayer, RemotePlayerStore, RemotePlayerUpdate};
pub use router::{ChannelRouter, RouteOutcome};
pub use session::PresenceSession;
pub use typing::{TypingTracker, TypingUser};
