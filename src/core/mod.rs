//! Core blockchain functionality
//!
//! Blocks, transactions, the persistent ledger, the Merkle tree and the
//! proof-of-work engine.

pub mod block;
pub mod blockchain;
pub mod merkle;
pub mod proof_of_work;
pub mod transaction;

pub use block::Block;
pub use blockchain::{Blockchain, BlockchainIterator};
pub use merkle::MerkleTree;
pub use proof_of_work::{MiningInterrupt, ProofOfWork, DEFAULT_DIFFICULTY};
pub use transaction::{TXInput, TXOutput, Transaction, COINBASE_VOUT, SUBSIDY};
