//! # Presence Relay Library
//!
//! An in-process stand-in for a hosted publish/subscribe room. It implements
//! the [`presence_shared::Transport`] contract so several presence sessions
//! can share one world inside a single process, which is what the demo
//! binary and the end-to-end tests run on.
//!
//! ## Behavior
//!
//! ### Membership
//! Each `connect` registers a peer with a relay-assigned identity. The new
//! peer is told about everyone already present, and everyone else is told
//! about the new peer. Leaving produces `PeerLeft` for the remaining peers.
//!
//! ### Delivery
//! Publishes never echo back to their sender. Reliable publishes are
//! delivered immediately and in order; unreliable ones can be dropped or
//! delayed according to [`NetworkConditions`], with a seedable random
//! source so lossy runs are reproducible.
//!
//! ### Replicated Attributes
//! The relay remembers every attribute a peer has written and replays the
//! full set to peers joining later, so profile data reaches late joiners
//! without the owner re-sending it.
//!
//! ### Fault Injection
//! [`LoopbackTransport::set_publish_failure`] makes publishes fail on demand
//! for exercising retry paths.

pub mod loopback;
pub mod peer_manager;

pub use loopback::{LoopbackRelay, LoopbackTransport, NetworkConditions};
pub use peer_manager::{Peer, PeerManager};
