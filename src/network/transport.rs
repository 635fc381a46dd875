//! Topic-based message transport.
//!
//! Nodes gossip over three named topics. A [`ChannelContent`] envelope is
//! serialized as JSON and published onto a topic; the transport fans it
//! out to every subscriber except the publisher itself, and subscribers
//! additionally drop envelopes addressed to someone else. The real
//! pubsub/DHT wiring lives outside this crate; [`MemoryHub`] implements
//! the same contract in-process for tests and single-host runs.

use crate::error::Result;
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::RwLock;

/// Topic every node subscribes to; carries chain sync and announcements.
pub const GENERAL_TOPIC: &str = "general";
/// Topic miners listen on for pool transactions sent their way.
pub const MINING_TOPIC: &str = "mining";
/// Topic full nodes listen on for transaction pull requests.
pub const FULLNODES_TOPIC: &str = "fullnodes";

/// Envelope for everything published onto a topic. `send_to` is empty for
/// broadcasts; otherwise only the named node should act on the message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelContent {
    pub command: String,
    pub node_id: String,
    pub send_to: String,
    pub payload: Vec<u8>,
}

impl ChannelContent {
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<ChannelContent> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn is_broadcast(&self) -> bool {
        self.send_to.is_empty()
    }
}

/// Publishing half of the gossip layer. Implementations deliver the
/// envelope to every other subscriber of the topic.
pub trait Transport {
    fn publish(&self, topic: &str, content: &ChannelContent) -> Result<()>;
}

struct Subscriber {
    node_id: String,
    sender: Sender<(String, ChannelContent)>,
}

/// In-process transport. Every subscriber gets a channel; publishing
/// round-trips the envelope through its JSON encoding so the in-memory
/// path exercises the same format a networked transport would carry.
pub struct MemoryHub {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHub {
    pub fn new() -> MemoryHub {
        MemoryHub {
            subscribers: RwLock::new(vec![]),
        }
    }

    /// Register a node and get the receiving end of its message stream.
    /// Each delivered item is the topic paired with the decoded envelope.
    pub fn subscribe(&self, node_id: &str) -> Receiver<(String, ChannelContent)> {
        let (sender, receiver) = channel();
        match self.subscribers.write() {
            Ok(mut subscribers) => {
                subscribers.push(Subscriber {
                    node_id: node_id.to_string(),
                    sender,
                });
            }
            Err(_) => {
                error!("Failed to acquire write lock on transport subscribers");
            }
        }
        receiver
    }
}

impl Transport for MemoryHub {
    fn publish(&self, topic: &str, content: &ChannelContent) -> Result<()> {
        let bytes = content.to_json()?;

        let mut subscribers = match self.subscribers.write() {
            Ok(subscribers) => subscribers,
            Err(_) => {
                error!("Failed to acquire write lock on transport subscribers");
                return Ok(());
            }
        };

        // Disconnected receivers are dropped as they are discovered.
        subscribers.retain(|subscriber| {
            if subscriber.node_id == content.node_id {
                return true;
            }
            if !content.is_broadcast() && subscriber.node_id != content.send_to {
                return true;
            }
            let delivered = match ChannelContent::from_json(&bytes) {
                Ok(decoded) => subscriber
                    .sender
                    .send((topic.to_string(), decoded))
                    .is_ok(),
                Err(e) => {
                    error!("Failed to decode published envelope: {e}");
                    true
                }
            };
            if !delivered {
                debug!("Dropping disconnected subscriber {}", subscriber.node_id);
            }
            delivered
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(from: &str, to: &str) -> ChannelContent {
        ChannelContent {
            command: "version".to_string(),
            node_id: from.to_string(),
            send_to: to.to_string(),
            payload: vec![1, 2, 3],
        }
    }

    #[test]
    fn test_broadcast_skips_the_publisher() {
        let hub = MemoryHub::new();
        let rx_a = hub.subscribe("a");
        let rx_b = hub.subscribe("b");

        hub.publish(GENERAL_TOPIC, &envelope("a", "")).unwrap();

        assert!(rx_a.try_recv().is_err());
        let (topic, content) = rx_b.try_recv().unwrap();
        assert_eq!(topic, GENERAL_TOPIC);
        assert_eq!(content.node_id, "a");
        assert_eq!(content.payload, vec![1, 2, 3]);
    }

    #[test]
    fn test_addressed_message_reaches_only_the_addressee() {
        let hub = MemoryHub::new();
        let rx_b = hub.subscribe("b");
        let rx_c = hub.subscribe("c");

        hub.publish(MINING_TOPIC, &envelope("a", "b")).unwrap();

        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn test_envelope_json_round_trip() {
        let content = envelope("node-1", "node-2");
        let bytes = content.to_json().unwrap();
        let decoded = ChannelContent::from_json(&bytes).unwrap();
        assert_eq!(decoded.command, "version");
        assert_eq!(decoded.node_id, "node-1");
        assert_eq!(decoded.send_to, "node-2");
    }
}
