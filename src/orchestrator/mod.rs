//! Transfer orchestration
//!
//! The orchestrator:
//! 1. Submits transfers through the source chain adapter
//! 2. Registers them and starts the destination scanner
//! 3. Polls source receipts and correlates destination events
//! 4. Reacts to execution: releases scanners, watches for rollbacks and
//!    spawns child transfers

mod engine;

pub use engine::TransferOrchestrator;

use crate::chain::adapter::TransferFlags;
use crate::chain::{ChainId, TransferParams};
use crate::codec;
use crate::transfer::{TokenAmount, TransactionMessages};

use ethers::types::U256;
use serde::{Deserialize, Serialize};

/// A transfer to submit on behalf of an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub source_chain: ChainId,
    pub destination_chain: ChainId,
    pub amount: TokenAmount,
    pub recipient: String,
    pub account: String,
    /// Quoted from the source chain when absent
    #[serde(with = "codec::opt_u256_dec", default)]
    pub fee: Option<U256>,
    #[serde(default)]
    pub with_rollback: bool,
    #[serde(default)]
    pub flags: TransferFlags,
    /// Execution on the destination continues to this chain
    #[serde(default)]
    pub child_destination: Option<ChainId>,
    #[serde(default)]
    pub messages: TransactionMessages,
}

impl TransferRequest {
    pub(crate) fn params(&self, fee: U256) -> TransferParams {
        TransferParams {
            destination: self.destination_chain.clone(),
            amount: self.amount.clone(),
            recipient: self.recipient.clone(),
            account: self.account.clone(),
            fee,
            with_rollback: self.with_rollback,
            flags: self.flags,
        }
    }
}

/// A transaction submitted elsewhere that should be tracked
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackRequest {
    pub source_chain: ChainId,
    pub destination_chain: ChainId,
    pub tx_hash: String,
    #[serde(default)]
    pub recipient: String,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub with_rollback: bool,
    #[serde(default)]
    pub child_destination: Option<ChainId>,
    /// Scan the destination after this height instead of the current one
    #[serde(default)]
    pub destination_start_height: Option<u64>,
}

/// Native balance of an account against its chain's gas threshold
#[derive(Debug, Clone, Serialize)]
pub struct GasStatus {
    pub chain_id: ChainId,
    pub account: String,
    #[serde(with = "codec::u256_dec")]
    pub balance: U256,
    /// Balance in whole native units
    pub balance_native: f64,
    pub threshold: f64,
    pub sufficient: bool,
}
