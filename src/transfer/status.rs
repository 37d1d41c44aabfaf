//! Transfer status derivation
//!
//! Status is never stored as an independent fact: it is recomputed from the
//! source transaction status and the observed event map on every update.

use crate::events::{EventKind, EventMap};
use crate::transfer::{Transaction, TxStatus};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Forward progress of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    TransferRequested,
    TransferFailed,
    AwaitingCallMessageSent,
    CallMessageSent,
    CallMessage,
    CallExecuted,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::TransferFailed | TransferStatus::CallExecuted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::TransferRequested => "TRANSFER_REQUESTED",
            TransferStatus::TransferFailed => "TRANSFER_FAILED",
            TransferStatus::AwaitingCallMessageSent => "AWAITING_CALL_MESSAGE_SENT",
            TransferStatus::CallMessageSent => "CALL_MESSAGE_SENT",
            TransferStatus::CallMessage => "CALL_MESSAGE",
            TransferStatus::CallExecuted => "CALL_EXECUTED",
        }
    }

    /// Human readable progress label
    pub fn label(&self) -> &'static str {
        match self {
            TransferStatus::TransferRequested => "Waiting for the source transaction to confirm",
            TransferStatus::TransferFailed => "Transfer failed",
            TransferStatus::AwaitingCallMessageSent => "Source transaction confirmed",
            TransferStatus::CallMessageSent => "Message sent, waiting for delivery",
            TransferStatus::CallMessage => "Message delivered, waiting for execution",
            TransferStatus::CallExecuted => "Message executed",
        }
    }

    pub fn all() -> [TransferStatus; 6] {
        [
            TransferStatus::TransferRequested,
            TransferStatus::TransferFailed,
            TransferStatus::AwaitingCallMessageSent,
            TransferStatus::CallMessageSent,
            TransferStatus::CallMessage,
            TransferStatus::CallExecuted,
        ]
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical result of a transfer, including the rollback path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferOutcome {
    Pending,
    Completed,
    /// Destination execution failed and a rollback is expected on the origin
    RollbackRequired,
    RolledBack,
    Failed,
}

impl TransferOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TransferOutcome::Pending => "In progress",
            TransferOutcome::Completed => "Completed",
            TransferOutcome::RollbackRequired => "Rollback required",
            TransferOutcome::RolledBack => "Rolled back",
            TransferOutcome::Failed => "Failed",
        }
    }
}

/// Derive the transfer status from the source transaction and observed events
pub fn derive_status(transaction: Option<&Transaction>, events: &EventMap) -> TransferStatus {
    let Some(transaction) = transaction else {
        return TransferStatus::TransferFailed;
    };

    match transaction.status {
        TxStatus::Pending => TransferStatus::TransferRequested,
        TxStatus::Failure => TransferStatus::TransferFailed,
        TxStatus::Success => {
            if events.contains(EventKind::CallExecuted) {
                TransferStatus::CallExecuted
            } else if events.contains(EventKind::CallMessage) {
                TransferStatus::CallMessage
            } else if events.contains(EventKind::CallMessageSent) {
                TransferStatus::CallMessageSent
            } else {
                TransferStatus::AwaitingCallMessageSent
            }
        }
    }
}

/// Derive the logical outcome once the forward status is known
pub fn derive_outcome(
    status: TransferStatus,
    events: &EventMap,
    with_rollback: bool,
) -> TransferOutcome {
    match status {
        TransferStatus::TransferFailed => TransferOutcome::Failed,
        TransferStatus::CallExecuted => {
            let executed_ok = events
                .get(EventKind::CallExecuted)
                .and_then(|e| e.is_success())
                .unwrap_or(false);

            if executed_ok {
                TransferOutcome::Completed
            } else if events.contains(EventKind::RollbackMessage) {
                TransferOutcome::RolledBack
            } else if with_rollback {
                TransferOutcome::RollbackRequired
            } else {
                TransferOutcome::Failed
            }
        }
        _ => TransferOutcome::Pending,
    }
}
