//! Command-line interface
//!
//! Argument parsing for the node binary; the dispatch lives in `main`.

pub mod commands;

pub use commands::{Command, Opt};
