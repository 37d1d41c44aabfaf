//! xCall transfer tracker
//!
//! Submits cross-chain token transfers through the xCall protocol and follows
//! them across ICON-style, Cosmos and EVM chains until they complete, fail or
//! roll back.

pub mod api;
pub mod chain;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod fee;
pub mod metrics;
pub mod orchestrator;
pub mod scanner;
pub mod state;
pub mod transfer;

#[cfg(test)]
mod test_utils;

pub use error::{TrackerError, TrackerResult};
