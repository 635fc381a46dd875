//! Gossip peer protocol
//!
//! Topic-based transport envelopes, the fixed-width wire framing of peer
//! messages, and the node event loop that ties them to the chain, the
//! UTXO index and the memory pool.

pub mod message;
pub mod node;
pub mod transport;

pub use message::{InvKind, Message, COMMAND_LENGTH};
pub use node::{Node, NODE_VERSION, TRANSACTION_THRESHOLD};
pub use transport::{
    ChannelContent, MemoryHub, Transport, FULLNODES_TOPIC, GENERAL_TOPIC, MINING_TOPIC,
};
