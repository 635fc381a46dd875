//! Configuration management
//!
//! Environment-backed settings for the node: the instance id used to
//! namespace the ledger on disk and the optional mining reward address.

pub mod settings;

pub use settings::{Config, GLOBAL_CONFIG};
