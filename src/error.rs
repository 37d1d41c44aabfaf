//! Error types for the xCall tracker

use crate::chain::ChainId;

use thiserror::Error;

/// Main error type for the tracker
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: ChainId, message: String },

    #[error("Malformed RPC response from chain {chain_id}: {message}")]
    Rpc { chain_id: ChainId, message: String },

    #[error("Transaction submission on chain {chain_id} rejected: {message}")]
    Submission { chain_id: ChainId, message: String },

    #[error("No signing client configured for chain {chain_id}")]
    WalletUnavailable { chain_id: ChainId },

    #[error("Protocol fee from {from} to {to} is unavailable")]
    FeeUnavailable { from: ChainId, to: ChainId },

    #[error("Unsupported transfer: {0}")]
    UnsupportedTransfer(String),

    #[error("Event parsing error: {0}")]
    EventParsing(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Chain {chain_id} not found")]
    ChainNotFound { chain_id: ChainId },

    #[error("No scanner started for chain {chain_id}")]
    ScannerNotStarted { chain_id: ChainId },

    #[error("Transfer {id} not found")]
    TransferNotFound { id: String },

    #[error("Transfer {id} is already registered")]
    DuplicateTransfer { id: String },

    #[error("Transfer {id} cannot {action} in its current state")]
    InvalidTransferState { id: String, action: String },

    #[error("Submitted tx {tx_hash} could not be registered: {message}")]
    Registration { tx_hash: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TrackerError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TrackerError::ChainConnection { .. } | TrackerError::Timeout { .. }
        )
    }

    /// Check if error came from submitting a transaction (nothing was registered)
    pub fn is_submission_error(&self) -> bool {
        matches!(
            self,
            TrackerError::Submission { .. }
                | TrackerError::WalletUnavailable { .. }
                | TrackerError::FeeUnavailable { .. }
                | TrackerError::UnsupportedTransfer(_)
        )
    }

    pub(crate) fn connection(chain_id: &ChainId, e: impl std::fmt::Display) -> Self {
        TrackerError::ChainConnection {
            chain_id: chain_id.clone(),
            message: e.to_string(),
        }
    }

    pub(crate) fn rpc(chain_id: &ChainId, message: impl Into<String>) -> Self {
        TrackerError::Rpc {
            chain_id: chain_id.clone(),
            message: message.into(),
        }
    }
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;
