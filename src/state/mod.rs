//! Transfer persistence with SQLite
//!
//! Handles:
//! - Transfer records, stored as JSON with indexed status
//! - Reload on restart
//! - Per-status statistics

mod manager;

pub use manager::{StateManager, TransferStats};
