//! In-process relay implementing the transport contract.
//!
//! Every transport handed out by [`LoopbackRelay::connect`] shares one peer
//! registry. Publishes fan out to every other peer; unreliable publishes are
//! subject to the configured loss and jitter, reliable ones are delivered
//! immediately and in order.

use async_trait::async_trait;
use log::{debug, info, trace};
use parking_lot::Mutex;
use presence_shared::{PublishOptions, SessionId, Transport, TransportError, TransportEvent};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use crate::peer_manager::PeerManager;

/// Simulated link quality for unreliable publishes
#[derive(Debug, Clone, Default)]
pub struct NetworkConditions {
    /// Probability in `[0, 1]` that an unreliable packet is lost
    pub drop_rate: f64,
    /// Upper bound of the random delay added to unreliable packets
    pub max_jitter_ms: u64,
    /// Fixed seed for reproducible loss patterns
    pub seed: Option<u64>,
}

impl NetworkConditions {
    /// Conditions that lose `drop_rate` of unreliable packets and delay the
    /// rest by up to `max_jitter_ms`
    pub fn lossy(drop_rate: f64, max_jitter_ms: u64) -> Self {
        Self {
            drop_rate: drop_rate.clamp(0.0, 1.0),
            max_jitter_ms,
            seed: None,
        }
    }

    /// Makes the loss pattern reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

struct RelayInner {
    peers: Mutex<PeerManager>,
    conditions: NetworkConditions,
    rng: Mutex<StdRng>,
}

impl RelayInner {
    /// Delay for one unreliable delivery, or `None` if it is lost.
    fn roll_unreliable(&self) -> Option<u64> {
        let mut rng = self.rng.lock();
        if self.conditions.drop_rate > 0.0 && rng.gen::<f64>() < self.conditions.drop_rate {
            return None;
        }
        if self.conditions.max_jitter_ms == 0 {
            return Some(0);
        }
        Some(rng.gen_range(0..=self.conditions.max_jitter_ms))
    }

    fn disconnect(&self, identity: &SessionId) {
        let mut peers = self.peers.lock();
        if let Some(peer) = peers.remove_peer(identity) {
            peer.send(TransportEvent::Disconnected);
            peers.broadcast(
                &TransportEvent::PeerLeft {
                    identity: identity.clone(),
                },
                None,
            );
        }
    }
}

/// In-process stand-in for a realtime relay service.
///
/// Clones share one peer registry.
#[derive(Clone)]
pub struct LoopbackRelay {
    inner: Arc<RelayInner>,
}

impl LoopbackRelay {
    pub const DEFAULT_MAX_PEERS: usize = 64;

    /// Creates a relay for up to [`DEFAULT_MAX_PEERS`](Self::DEFAULT_MAX_PEERS) peers
    pub fn new(conditions: NetworkConditions) -> Self {
        Self::with_capacity(conditions, Self::DEFAULT_MAX_PEERS)
    }

    /// Creates a relay that rejects connections beyond `max_peers`
    pub fn with_capacity(conditions: NetworkConditions, max_peers: usize) -> Self {
        let rng = match conditions.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            inner: Arc::new(RelayInner {
                peers: Mutex::new(PeerManager::new(max_peers)),
                conditions,
                rng: Mutex::new(rng),
            }),
        }
    }

    /// Joins a new participant.
    ///
    /// The first event on the returned receiver is `Connected`, followed by
    /// a `PeerJoined` and an attribute replay for every peer already present.
    pub fn connect(
        &self,
    ) -> Result<(Arc<LoopbackTransport>, UnboundedReceiver<TransportEvent>), TransportError> {
        let (events, receiver) = unbounded_channel();
        let mut peers = self.inner.peers.lock();

        let identity = peers
            .add_peer(events.clone())
            .ok_or_else(|| TransportError::Rejected {
                topic: "connect".to_string(),
                reason: "relay is full".to_string(),
            })?;

        let _ = events.send(TransportEvent::Connected {
            identity: identity.clone(),
        });

        for existing in peers.identities() {
            if existing == identity {
                continue;
            }
            let _ = events.send(TransportEvent::PeerJoined {
                identity: existing.clone(),
            });
            if let Some(peer) = peers.get(&existing) {
                if !peer.attributes.is_empty() {
                    let _ = events.send(TransportEvent::AttributesChanged {
                        identity: existing.clone(),
                        attributes: peer.attributes.clone(),
                    });
                }
            }
        }

        peers.broadcast(
            &TransportEvent::PeerJoined {
                identity: identity.clone(),
            },
            Some(&identity),
        );
        drop(peers);

        let transport = Arc::new(LoopbackTransport {
            identity,
            relay: Arc::clone(&self.inner),
            connected: AtomicBool::new(true),
            publish_failure: Mutex::new(None),
        });
        Ok((transport, receiver))
    }

    /// Broadcasts a mute change for `identity` to everyone else.
    pub fn set_mute(&self, identity: &SessionId, muted: bool) {
        self.inner.peers.lock().broadcast(
            &TransportEvent::MuteChanged {
                identity: identity.clone(),
                muted,
            },
            Some(identity),
        );
    }

    /// Broadcasts the current set of active speakers to everyone.
    pub fn set_active_speakers(&self, speakers: Vec<SessionId>) {
        self.inner
            .peers
            .lock()
            .broadcast(&TransportEvent::ActiveSpeakersChanged { speakers }, None);
    }

    /// Number of connected peers
    pub fn peer_count(&self) -> usize {
        self.inner.peers.lock().len()
    }

    /// Connected identities in join order
    pub fn identities(&self) -> Vec<SessionId> {
        self.inner.peers.lock().identities()
    }
}

/// One participant's handle on a [`LoopbackRelay`]
pub struct LoopbackTransport {
    identity: SessionId,
    relay: Arc<RelayInner>,
    connected: AtomicBool,
    publish_failure: Mutex<Option<String>>,
}

impl LoopbackTransport {
    /// Identity assigned at connect, kept after disconnect
    pub fn identity(&self) -> &SessionId {
        &self.identity
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Makes every following publish fail with `reason` until cleared.
    pub fn set_publish_failure(&self, reason: Option<&str>) {
        *self.publish_failure.lock() = reason.map(str::to_string);
    }

    /// Leaves the relay. Peers see `PeerLeft`, this side sees `Disconnected`.
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            info!("Peer {} disconnecting", self.identity);
            self.relay.disconnect(&self.identity);
        }
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn local_identity(&self) -> Option<SessionId> {
        self.is_connected().then(|| self.identity.clone())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if let Some(reason) = self.publish_failure.lock().clone() {
            return Err(TransportError::Rejected {
                topic: topic.to_string(),
                reason,
            });
        }

        let peers = self.relay.peers.lock();
        for peer in peers.others(&self.identity) {
            let event = TransportEvent::Data {
                topic: topic.to_string(),
                sender: Some(self.identity.clone()),
                payload: payload.clone(),
            };

            if options.reliable {
                peer.send(event);
                continue;
            }

            match self.relay.roll_unreliable() {
                None => trace!("Dropped '{}' packet to {}", topic, peer.identity),
                Some(0) => {
                    peer.send(event);
                }
                Some(delay_ms) => match Handle::try_current() {
                    Ok(runtime) => {
                        let events = peer.events.clone();
                        runtime.spawn(async move {
                            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                            let _ = events.send(event);
                        });
                    }
                    Err(_) => {
                        peer.send(event);
                    }
                },
            }
        }
        Ok(())
    }

    async fn set_attributes(
        &self,
        attributes: HashMap<String, String>,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let mut peers = self.relay.peers.lock();
        let changed = match peers.get_mut(&self.identity) {
            Some(peer) => peer.merge_attributes(attributes),
            None => return Err(TransportError::NotConnected),
        };
        if changed.is_empty() {
            return Ok(());
        }

        debug!("Peer {} updated {} attributes", self.identity, changed.len());
        peers.broadcast(
            &TransportEvent::AttributesChanged {
                identity: self.identity.clone(),
                attributes: changed,
            },
            Some(&self.identity),
        );
        Ok(())
    }
}
