//! Data storage and persistence
//!
//! The rebuildable UTXO index over the chain and the in-memory pool of
//! transactions waiting to be mined.

pub mod memory_pool;
pub mod utxo_set;

pub use memory_pool::{BlockInTransit, MemoryPool};
pub use utxo_set::UTXOSet;
