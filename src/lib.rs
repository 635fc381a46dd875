//! # gossipchain
//!
//! A minimal proof-of-work UTXO blockchain node.
//!
//! - `core/`: blocks, transactions, the persistent ledger, Merkle trees
//!   and the proof-of-work engine
//! - `wallet/`: ECDSA P-256 key management and Base58 addresses
//! - `network/`: topic-based gossip, wire framing and the node event loop
//! - `storage/`: the rebuildable UTXO index and the memory pool
//! - `config/`: environment-backed instance settings
//! - `utils/`: cryptographic and serialization helpers
//! - `cli/`: command-line argument parsing

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod utils;
pub mod wallet;

pub use cli::{Command, Opt};
pub use config::{Config, GLOBAL_CONFIG};
pub use core::{
    Block, Blockchain, BlockchainIterator, MerkleTree, MiningInterrupt, ProofOfWork, TXInput,
    TXOutput, Transaction, COINBASE_VOUT, DEFAULT_DIFFICULTY, SUBSIDY,
};
pub use error::{ChainError, Result};
pub use network::{
    ChannelContent, InvKind, MemoryHub, Message, Node, Transport, FULLNODES_TOPIC, GENERAL_TOPIC,
    MINING_TOPIC, NODE_VERSION, TRANSACTION_THRESHOLD,
};
pub use storage::{BlockInTransit, MemoryPool, UTXOSet};
pub use utils::{
    base58_decode, base58_encode, current_timestamp, ecdsa_p256_sha256_sign_digest,
    ecdsa_p256_sha256_sign_verify, new_key_pair, ripemd160_digest, sha256_digest,
};
pub use wallet::{
    convert_address, hash_pub_key, validate_address, Wallet, Wallets, ADDRESS_CHECK_SUM_LEN,
};
