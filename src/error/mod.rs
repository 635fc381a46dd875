//! Error handling for the node
//!
//! Every fallible library path reports through [`ChainError`]; nothing in
//! the library terminates the process on bad input. Consensus failures in
//! particular surface as [`ChainError::ConsensusViolation`] so a node can
//! reject a bad peer block and keep serving the rest of the network.

use std::fmt;

/// Result type alias for node operations
pub type Result<T> = std::result::Result<T, ChainError>;

/// Error taxonomy for ledger, wallet and protocol operations
#[derive(Debug, Clone)]
pub enum ChainError {
    /// Persistent ledger / key-value store errors
    Storage(String),
    /// Cryptographic operation errors
    Crypto(String),
    /// Wallet operation errors
    Wallet(String),
    /// Malformed or undecodable peer messages
    Protocol(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// File I/O errors
    Io(String),
    /// Invalid address format
    InvalidAddress(String),
    /// Spendable outputs did not cover the requested amount
    InsufficientFunds { required: f64, available: f64 },
    /// A referenced block, transaction or output does not exist
    NotFound(String),
    /// A block failed the tip-successor validity rules
    ConsensusViolation(String),
    /// Structural block errors (empty transaction list and the like)
    InvalidBlock(String),
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::Storage(msg) => write!(f, "Storage error: {msg}"),
            ChainError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            ChainError::Wallet(msg) => write!(f, "Wallet error: {msg}"),
            ChainError::Protocol(msg) => write!(f, "Protocol error: {msg}"),
            ChainError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            ChainError::Io(msg) => write!(f, "I/O error: {msg}"),
            ChainError::InvalidAddress(addr) => write!(f, "Invalid address: {addr}"),
            ChainError::InsufficientFunds {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient funds: required {required}, available {available}"
                )
            }
            ChainError::NotFound(msg) => write!(f, "Not found: {msg}"),
            ChainError::ConsensusViolation(msg) => write!(f, "Consensus violation: {msg}"),
            ChainError::InvalidBlock(msg) => write!(f, "Invalid block: {msg}"),
        }
    }
}

impl std::error::Error for ChainError {}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::Io(err.to_string())
    }
}

impl From<sled::Error> for ChainError {
    fn from(err: sled::Error) -> Self {
        ChainError::Storage(err.to_string())
    }
}

impl From<sled::transaction::TransactionError<ChainError>> for ChainError {
    fn from(err: sled::transaction::TransactionError<ChainError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(e) => e,
            sled::transaction::TransactionError::Storage(e) => ChainError::Storage(e.to_string()),
        }
    }
}

impl From<bincode::error::EncodeError> for ChainError {
    fn from(err: bincode::error::EncodeError) -> Self {
        ChainError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for ChainError {
    fn from(err: bincode::error::DecodeError) -> Self {
        ChainError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::Serialization(err.to_string())
    }
}
