//! Transfer records and their lifecycle
//!
//! This module provides:
//! - Source transaction records with receipt-derived status
//! - Transfer records linking a source transaction to its xCall events
//! - Pure status derivation (see [`status`])
//! - The registry holding every tracked transfer

pub mod registry;
pub mod status;

pub use registry::TransferRegistry;
pub use status::{derive_outcome, derive_status, TransferOutcome, TransferStatus};

use crate::chain::{ChainId, RawReceipt};
use crate::codec;
use crate::events::{EventKind, EventMap};

use chrono::{DateTime, Utc};
use ethers::types::U256;
use serde::{Deserialize, Serialize};

/// Inclusion status of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Success,
    Failure,
}

impl TxStatus {
    pub fn is_final(&self) -> bool {
        !matches!(self, TxStatus::Pending)
    }
}

/// Human status messages shown while a transaction progresses
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionMessages {
    pub pending: String,
    pub success: String,
    pub failure: String,
}

/// A submitted transaction, identified by its hash
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: String,
    pub chain_id: ChainId,
    pub status: TxStatus,
    #[serde(default)]
    pub raw_receipt: Option<RawReceipt>,
    #[serde(default)]
    pub messages: TransactionMessages,
    pub submitted_at: DateTime<Utc>,
}

impl Transaction {
    pub fn pending(hash: impl Into<String>, chain_id: ChainId) -> Self {
        Self {
            hash: hash.into(),
            chain_id,
            status: TxStatus::Pending,
            raw_receipt: None,
            messages: TransactionMessages::default(),
            submitted_at: Utc::now(),
        }
    }

    pub fn with_messages(mut self, messages: TransactionMessages) -> Self {
        self.messages = messages;
        self
    }

    /// Record a receipt. A final status is never downgraded by a lagging node.
    pub fn apply_receipt(&mut self, receipt: RawReceipt) {
        let status = receipt.status();
        if self.status.is_final() && !status.is_final() {
            return;
        }
        self.status = status;
        self.raw_receipt = Some(receipt);
    }

    pub fn message(&self) -> &str {
        match self.status {
            TxStatus::Pending => &self.messages.pending,
            TxStatus::Success => &self.messages.success,
            TxStatus::Failure => &self.messages.failure,
        }
    }
}

/// Token on a specific chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub chain_id: ChainId,
    pub symbol: String,
    /// Contract address or native denom
    pub address: String,
    pub decimals: u8,
}

/// Raw (smallest unit) amount of a token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenAmount {
    pub token: Token,
    #[serde(with = "codec::u256_dec")]
    pub raw: U256,
}

/// A cross-chain transfer and everything observed about it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    /// `{source_chain}/{source tx hash}`
    pub id: String,
    pub source_chain: ChainId,
    pub destination_chain: ChainId,
    pub source_transaction: Transaction,
    #[serde(default)]
    pub events: EventMap,
    pub status: TransferStatus,
    /// Origin sequence number, fixed once `CallMessageSent` is seen
    #[serde(with = "codec::opt_u256_dec", default)]
    pub sn: Option<U256>,
    /// Destination scan start, recorded at creation
    pub destination_start_height: u64,
    /// Origin scan start, set once a rollback is awaited
    #[serde(default)]
    pub origin_start_height: Option<u64>,
    #[serde(default)]
    pub amount: Option<TokenAmount>,
    #[serde(with = "codec::u256_dec")]
    pub fee: U256,
    pub recipient: String,
    pub account: String,
    pub with_rollback: bool,
    /// Set when execution on the destination continues to a third chain
    #[serde(default)]
    pub child_destination: Option<ChainId>,
    #[serde(default)]
    pub parent_transfer_id: Option<String>,
    #[serde(default)]
    pub child_transfer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transfer {
    pub fn transfer_id(source_chain: &ChainId, tx_hash: &str) -> String {
        format!("{}/{}", source_chain, tx_hash)
    }

    /// New transfer in `TRANSFER_REQUESTED`
    pub fn new(
        source_transaction: Transaction,
        destination_chain: ChainId,
        destination_start_height: u64,
    ) -> Self {
        let now = Utc::now();
        let mut transfer = Self {
            id: Self::transfer_id(&source_transaction.chain_id, &source_transaction.hash),
            source_chain: source_transaction.chain_id.clone(),
            destination_chain,
            source_transaction,
            events: EventMap::new(),
            status: TransferStatus::TransferRequested,
            sn: None,
            destination_start_height,
            origin_start_height: None,
            amount: None,
            fee: U256::zero(),
            recipient: String::new(),
            account: String::new(),
            with_rollback: false,
            child_destination: None,
            parent_transfer_id: None,
            child_transfer_id: None,
            created_at: now,
            updated_at: now,
        };
        transfer.rederive();
        transfer
    }

    /// Recompute derived fields; returns true when the status changed
    pub fn rederive(&mut self) -> bool {
        if self.sn.is_none() {
            self.sn = self
                .events
                .get(EventKind::CallMessageSent)
                .and_then(|e| e.sn());
        }

        let status = derive_status(Some(&self.source_transaction), &self.events);
        let changed = status != self.status;
        self.status = status;
        changed
    }

    pub fn outcome(&self) -> TransferOutcome {
        derive_outcome(self.status, &self.events, self.with_rollback)
    }

    /// Spawning a child is still owed
    pub fn child_pending(&self) -> bool {
        self.outcome() == TransferOutcome::Completed
            && self.child_destination.is_some()
            && self.child_transfer_id.is_none()
    }

    /// Still needs polling, scanning or a follow-up action
    pub fn is_active(&self) -> bool {
        matches!(
            self.outcome(),
            TransferOutcome::Pending | TransferOutcome::RollbackRequired
        ) || self.child_pending()
    }

    /// Block height of the source transaction, when the receipt is known
    pub fn source_block_height(&self) -> Option<u64> {
        self.source_transaction
            .raw_receipt
            .as_ref()
            .and_then(|r| r.block_height())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::icon::IconTxResult;
    use crate::events::fixtures::*;

    fn icon_receipt(status: &str) -> RawReceipt {
        RawReceipt::AccountModel(IconTxResult {
            tx_hash: "0xabc".to_string(),
            block_height: "0x10".to_string(),
            status: status.to_string(),
            failure: None,
            event_logs: vec![],
        })
    }

    #[test]
    fn test_final_status_not_downgraded() {
        let mut tx = Transaction::pending("0xabc", "0x1.icon".into());
        tx.apply_receipt(icon_receipt("0x1"));
        assert_eq!(tx.status, TxStatus::Success);

        tx.apply_receipt(icon_receipt("0x2"));
        assert_eq!(tx.status, TxStatus::Success);
    }

    #[test]
    fn test_sn_fixed_from_first_call_message_sent() {
        let mut transfer = Transfer::new(
            Transaction::pending("0xabc", "0x1.icon".into()),
            "archway-1".into(),
            99,
        );
        assert_eq!(transfer.id, "0x1.icon/0xabc");
        assert_eq!(transfer.status, TransferStatus::TransferRequested);

        transfer.source_transaction.apply_receipt(icon_receipt("0x1"));
        transfer.events.insert(sent("0x1.icon", 42, 16));
        assert!(transfer.rederive());
        assert_eq!(transfer.sn, Some(U256::from(42)));
        assert_eq!(transfer.status, TransferStatus::CallMessageSent);
        assert_eq!(transfer.source_block_height(), Some(16));
        assert!(transfer.is_active());
    }

    #[test]
    fn test_large_values_round_trip() {
        let mut transfer = Transfer::new(
            Transaction::pending("0xabc", "0x1.icon".into()),
            "archway-1".into(),
            99,
        );
        transfer.sn = Some(U256::from(9_007_199_254_740_993u64));
        transfer.fee = U256::from_dec_str("123456789012345678901234567890").unwrap();
        transfer.amount = Some(TokenAmount {
            token: Token {
                chain_id: "0x1.icon".into(),
                symbol: "bnUSD".to_string(),
                address: "cx88fd7df7ddff82f7cc735c871dc519838cb235bb".to_string(),
                decimals: 18,
            },
            raw: U256::MAX,
        });

        let json = serde_json::to_string(&transfer).unwrap();
        assert!(json.contains("\"sn\":\"9007199254740993\""));

        let back: Transfer = serde_json::from_str(&json).unwrap();
        assert_eq!(back.sn, transfer.sn);
        assert_eq!(back.fee, transfer.fee);
        assert_eq!(back.amount.unwrap().raw, U256::MAX);
    }

    #[test]
    fn test_child_pending_until_linked() {
        let mut transfer = Transfer::new(
            Transaction::pending("0xabc", "0x1.icon".into()),
            "archway-1".into(),
            99,
        );
        transfer.child_destination = Some("0xa86a.avax".into());
        transfer.source_transaction.apply_receipt(icon_receipt("0x1"));
        transfer.events.insert(sent("0x1.icon", 42, 16));
        transfer.events.insert(call_message("archway-1", 42, 7, 100));
        transfer.events.insert(executed("archway-1", 7, 1, 101));
        transfer.rederive();

        assert_eq!(transfer.outcome(), TransferOutcome::Completed);
        assert!(transfer.child_pending());
        assert!(transfer.is_active());

        transfer.child_transfer_id = Some("archway-1/0xexec7".to_string());
        assert!(!transfer.is_active());
    }
}
