//! Multiplexes the logical presence channels over one transport.
//!
//! Outbound packets are encoded and published on their channel's topic with
//! that channel's reliability. Inbound data is attributed to a sender,
//! decoded and handed to the handler registered for its channel. Packets
//! from the local identity or from an unknown sender never reach a handler.

use log::{debug, trace, warn};
use parking_lot::RwLock;
use presence_shared::{
    decode_packet, encode_packet, Channel, FailurePolicy, Packet, PublishOptions, SessionId,
    Transport,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Handle;

use crate::error::SyncError;

/// Inbound callback: receives the resolved sender and the decoded packet
pub type PacketHandler = Box<dyn Fn(&SessionId, Packet) + Send + Sync>;

/// What happened to one inbound datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered(Channel),
    /// Decoded, but nothing is registered for the channel
    Unhandled(Channel),
    FromSelf,
    Anonymous,
    UnknownTopic,
    Malformed(Channel),
}

/// Routes packets between the session and one [`Transport`].
///
/// Holds at most one handler per channel.
pub struct ChannelRouter {
    transport: Arc<dyn Transport>,
    handlers: RwLock<HashMap<Channel, PacketHandler>>,
}

impl ChannelRouter {
    /// Creates a router with no handlers registered
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Underlying transport, for operations outside the packet channels
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Installs the inbound handler for `channel`, replacing any previous one.
    pub fn register<F>(&self, channel: Channel, handler: F)
    where
        F: Fn(&SessionId, Packet) + Send + Sync + 'static,
    {
        self.handlers.write().insert(channel, Box::new(handler));
    }

    /// Sender to attribute a packet to, or the reason it must be dropped.
    fn resolve_sender(&self, sender: Option<&SessionId>) -> Result<SessionId, RouteOutcome> {
        let sender = match sender {
            Some(sender) if !sender.is_empty() => sender,
            _ => return Err(RouteOutcome::Anonymous),
        };
        if self.transport.local_identity().as_ref() == Some(sender) {
            return Err(RouteOutcome::FromSelf);
        }
        Ok(sender.clone())
    }

    /// Handles one inbound datagram.
    ///
    /// # Arguments
    /// * `topic` - Topic the data arrived on
    /// * `sender` - Identity the transport attributed it to
    /// * `payload` - Raw packet bytes
    ///
    /// # Returns
    /// What happened to the datagram; only `Delivered` reaches a handler
    pub fn route(&self, topic: &str, sender: Option<&SessionId>, payload: &[u8]) -> RouteOutcome {
        let Some(channel) = Channel::from_topic(topic) else {
            warn!("Dropping data on unknown topic '{}'", topic);
            return RouteOutcome::UnknownTopic;
        };

        let sender = match self.resolve_sender(sender) {
            Ok(sender) => sender,
            Err(outcome) => {
                trace!("Dropping {} packet: {:?}", channel, outcome);
                return outcome;
            }
        };

        let packet = match decode_packet(channel, payload) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Dropping packet from {}: {}", sender, e);
                return RouteOutcome::Malformed(channel);
            }
        };

        let handlers = self.handlers.read();
        match handlers.get(&channel) {
            Some(handler) => {
                handler(&sender, packet);
                RouteOutcome::Delivered(channel)
            }
            None => {
                debug!("No handler for {} packet from {}", channel, sender);
                RouteOutcome::Unhandled(channel)
            }
        }
    }

    /// Publishes `packet` and waits for the transport's verdict.
    pub async fn send(&self, packet: &Packet) -> Result<(), SyncError> {
        let channel = packet.channel();
        let bytes = encode_packet(packet)?;
        self.transport
            .publish(channel.topic(), bytes, publish_options(channel))
            .await?;
        Ok(())
    }

    /// Publishes `packet` in the background and applies the channel's
    /// failure policy to the outcome.
    pub fn dispatch(&self, packet: Packet) {
        let channel = packet.channel();
        let bytes = match encode_packet(&packet) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode {} packet: {}", channel, e);
                return;
            }
        };

        let Ok(runtime) = Handle::try_current() else {
            warn!("No runtime available to publish {} packet", channel);
            return;
        };

        let transport = Arc::clone(&self.transport);
        runtime.spawn(async move {
            if let Err(e) = transport
                .publish(channel.topic(), bytes, publish_options(channel))
                .await
            {
                match channel.failure_policy() {
                    FailurePolicy::Ignore => debug!("Dropped {} packet: {}", channel, e),
                    FailurePolicy::Log | FailurePolicy::Surface => {
                        warn!("Failed to publish {} packet: {}", channel, e)
                    }
                }
            }
        });
    }
}

fn publish_options(channel: Channel) -> PublishOptions {
    if channel.is_reliable() {
        PublishOptions::reliable()
    } else {
        PublishOptions::unreliable()
    }
}
