//! Uniform chain operations over the three supported chain kinds

use crate::chain::cosmos::{CosmosAdapter, CosmosSigner, CosmosTxResult};
use crate::chain::evm::{self, EvmAdapter, EvmWallet};
use crate::chain::icon::{IconAdapter, IconTxResult, IconWallet};
use crate::chain::retry::{wait_for, RetryPolicy};
use crate::chain::{ChainId, ChainKind};
use crate::config::ChainConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::events::{EventKind, EventMap, ProtocolEvent};
use crate::transfer::{TokenAmount, Transfer, TxStatus};

use ethers::types::{TransactionReceipt, U256};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Payload attached to deposits that should unwrap a liquid staking token on arrival
pub const UNWRAP_PAYLOAD: &[u8] = br#"{"method":"unstake"}"#;

/// xCall network address, `{network id}/{account}`
pub fn network_address(chain_id: &ChainId, address: &str) -> String {
    format!("{}/{}", chain_id, address)
}

/// Shared state every adapter is built with
#[derive(Clone)]
pub struct AdapterContext {
    pub config: Arc<ChainConfig>,
    pub retry: RetryPolicy,
    pub cancel: CancellationToken,
}

impl AdapterContext {
    pub fn chain_id(&self) -> &ChainId {
        &self.config.id
    }

    pub(crate) fn xcall(&self) -> &str {
        &self.config.contracts.xcall
    }

    pub(crate) fn asset_manager(&self) -> TrackerResult<&str> {
        self.config.contracts.asset_manager.as_deref().ok_or_else(|| {
            TrackerError::UnsupportedTransfer(format!(
                "chain {} has no asset manager",
                self.config.id
            ))
        })
    }

    /// Token is the stable coin with its own cross-chain transfer entry point
    pub(crate) fn is_bnusd(&self, token_address: &str) -> bool {
        self.config
            .contracts
            .bnusd
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case(token_address))
    }
}

/// Chain-kind specific transaction receipt, kept with the transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "receipt", rename_all = "snake_case")]
pub enum RawReceipt {
    AccountModel(IconTxResult),
    Cosmos(CosmosTxResult),
    Evm(TransactionReceipt),
}

impl RawReceipt {
    pub fn status(&self) -> TxStatus {
        match self {
            RawReceipt::AccountModel(r) => r.tx_status(),
            RawReceipt::Cosmos(r) => r.tx_status(),
            RawReceipt::Evm(r) => evm::receipt_status(r),
        }
    }

    pub fn block_height(&self) -> Option<u64> {
        match self {
            RawReceipt::AccountModel(r) => r.height(),
            RawReceipt::Cosmos(r) => r.height(),
            RawReceipt::Evm(r) => r.block_number.map(|b| b.as_u64()),
        }
    }

    pub fn tx_hash(&self) -> String {
        match self {
            RawReceipt::AccountModel(r) => r.tx_hash.clone(),
            RawReceipt::Cosmos(r) => r.hash.clone(),
            RawReceipt::Evm(r) => format!("{:?}", r.transaction_hash),
        }
    }

    pub fn kind(&self) -> ChainKind {
        match self {
            RawReceipt::AccountModel(_) => ChainKind::AccountModel,
            RawReceipt::Cosmos(_) => ChainKind::Cosmos,
            RawReceipt::Evm(_) => ChainKind::Evm,
        }
    }
}

/// Signing client injected per chain; only needed to execute
#[derive(Clone)]
pub enum Signer {
    Icon(Arc<dyn IconWallet>),
    Cosmos(Arc<dyn CosmosSigner>),
    Evm(Arc<dyn EvmWallet>),
}

impl Signer {
    fn kind(&self) -> ChainKind {
        match self {
            Signer::Icon(_) => ChainKind::AccountModel,
            Signer::Cosmos(_) => ChainKind::Cosmos,
            Signer::Evm(_) => ChainKind::Evm,
        }
    }
}

/// Optional transfer routing flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFlags {
    /// Move the chain's native denom instead of a token contract
    #[serde(default)]
    pub native_denom: bool,
    #[serde(default)]
    pub unwrap_liquid_stake: bool,
}

/// Everything an adapter needs to submit a transfer
#[derive(Debug, Clone)]
pub struct TransferParams {
    pub destination: ChainId,
    pub amount: TokenAmount,
    pub recipient: String,
    pub account: String,
    pub fee: U256,
    pub with_rollback: bool,
    pub flags: TransferFlags,
}

impl TransferParams {
    /// xCall address of the recipient on the destination chain
    pub fn destination_address(&self) -> String {
        network_address(&self.destination, &self.recipient)
    }

    /// Deposit payload forwarded to the destination
    pub fn payload(&self) -> Vec<u8> {
        if self.flags.unwrap_liquid_stake {
            UNWRAP_PAYLOAD.to_vec()
        } else {
            Vec::new()
        }
    }
}

/// One adapter per configured chain, dispatched on chain kind
pub enum ChainAdapter {
    AccountModel(IconAdapter),
    Cosmos(CosmosAdapter),
    Evm(EvmAdapter),
}

macro_rules! dispatch {
    ($self:ident, $adapter:ident => $body:expr) => {
        match $self {
            ChainAdapter::AccountModel($adapter) => $body,
            ChainAdapter::Cosmos($adapter) => $body,
            ChainAdapter::Evm($adapter) => $body,
        }
    };
}

impl ChainAdapter {
    /// Build the network client for a chain and attach its signer, if any
    pub fn connect(
        config: Arc<ChainConfig>,
        signer: Option<Signer>,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> TrackerResult<Self> {
        if let Some(signer) = &signer {
            if signer.kind() != config.kind {
                return Err(TrackerError::Config(format!(
                    "Signer for chain {} is a {} signer, chain is {}",
                    config.id,
                    signer.kind(),
                    config.kind
                )));
            }
        }

        let kind = config.kind;
        let ctx = AdapterContext {
            config,
            retry,
            cancel,
        };

        Ok(match (kind, signer) {
            (ChainKind::AccountModel, signer) => {
                let wallet = match signer {
                    Some(Signer::Icon(w)) => Some(w),
                    _ => None,
                };
                ChainAdapter::AccountModel(IconAdapter::connect(ctx, wallet)?)
            }
            (ChainKind::Cosmos, signer) => {
                let signer = match signer {
                    Some(Signer::Cosmos(s)) => Some(s),
                    _ => None,
                };
                ChainAdapter::Cosmos(CosmosAdapter::connect(ctx, signer)?)
            }
            (ChainKind::Evm, signer) => {
                let wallet = match signer {
                    Some(Signer::Evm(w)) => Some(w),
                    _ => None,
                };
                ChainAdapter::Evm(EvmAdapter::connect(ctx, wallet)?)
            }
        })
    }

    fn context(&self) -> &AdapterContext {
        dispatch!(self, a => a.context())
    }

    pub fn chain_id(&self) -> &ChainId {
        self.context().chain_id()
    }

    pub fn config(&self) -> &Arc<ChainConfig> {
        &self.context().config
    }

    pub fn kind(&self) -> ChainKind {
        match self {
            ChainAdapter::AccountModel(_) => ChainKind::AccountModel,
            ChainAdapter::Cosmos(_) => ChainKind::Cosmos,
            ChainAdapter::Evm(_) => ChainKind::Evm,
        }
    }

    /// A signing client is attached
    pub fn can_sign(&self) -> bool {
        dispatch!(self, a => a.can_sign())
    }

    /// Latest block height; may lag finality
    pub async fn fetch_block_height(&self) -> TrackerResult<u64> {
        let height = dispatch!(self, a => a.fetch_block_height().await)?;
        crate::metrics::record_chain_height(self.chain_id(), height);
        Ok(height)
    }

    /// Protocol fee for relaying a message to `destination`
    pub async fn fetch_protocol_fee(
        &self,
        destination: &ChainId,
        with_rollback: bool,
    ) -> TrackerResult<U256> {
        dispatch!(self, a => a.fetch_protocol_fee(destination, with_rollback).await)
    }

    pub fn derive_transaction_status(&self, receipt: Option<&RawReceipt>) -> TxStatus {
        receipt.map(RawReceipt::status).unwrap_or(TxStatus::Pending)
    }

    /// Receipt of a transaction, `None` while it is not included or indexed
    pub async fn fetch_transaction_receipt(&self, hash: &str) -> TrackerResult<Option<RawReceipt>> {
        dispatch!(self, a => a.fetch_transaction_receipt(hash).await)
    }

    /// Wait a bounded time for a receipt; `None` means still pending
    pub async fn wait_for_receipt(&self, hash: &str) -> Option<RawReceipt> {
        let ctx = self.context();
        wait_for(
            &format!("receipt {} on {}", hash, ctx.chain_id()),
            &ctx.retry,
            &ctx.cancel,
            || self.fetch_transaction_receipt(hash),
        )
        .await
    }

    /// Events emitted by the transfer's source transaction itself
    pub async fn fetch_source_events(&self, transfer: &Transfer) -> TrackerResult<EventMap> {
        let receipt = match &transfer.source_transaction.raw_receipt {
            Some(receipt) => receipt.clone(),
            None => match self.wait_for_receipt(&transfer.source_transaction.hash).await {
                Some(receipt) => receipt,
                None => {
                    debug!("Source transaction of {} not indexed yet", transfer.id);
                    return Ok(EventMap::new());
                }
            },
        };

        let events = self.receipt_events(&receipt)?;
        Ok(events
            .into_iter()
            .filter(|e| e.kind() == EventKind::CallMessageSent)
            .collect())
    }

    /// Decode the xCall events contained in a receipt of this chain
    pub fn receipt_events(&self, receipt: &RawReceipt) -> TrackerResult<Vec<ProtocolEvent>> {
        let mismatch = || {
            TrackerError::rpc(
                self.chain_id(),
                format!("{} receipt passed to a {} adapter", receipt.kind(), self.kind()),
            )
        };

        match (self, receipt) {
            (ChainAdapter::AccountModel(a), RawReceipt::AccountModel(r)) => Ok(a.receipt_events(r)),
            (ChainAdapter::Cosmos(a), RawReceipt::Cosmos(r)) => Ok(a.receipt_events(r)),
            (ChainAdapter::Evm(a), RawReceipt::Evm(r)) => Ok(a.receipt_events(r)),
            _ => Err(mismatch()),
        }
    }

    /// All xCall events of one block
    pub async fn fetch_events_for_block(&self, height: u64) -> TrackerResult<Vec<ProtocolEvent>> {
        dispatch!(self, a => a.fetch_events_for_block(height).await)
    }

    /// Sign and broadcast a transfer, returning the transaction hash
    pub async fn execute_transfer(&self, params: &TransferParams) -> TrackerResult<String> {
        dispatch!(self, a => a.execute_transfer(params).await)
    }

    /// Trigger execution of a delivered message on a chain without auto-execution
    pub async fn execute_call(&self, account: &str, req_id: U256, data: &[u8]) -> TrackerResult<String> {
        dispatch!(self, a => a.execute_call(account, req_id, data).await)
    }

    /// Native balance in the smallest unit
    pub async fn fetch_native_balance(&self, account: &str) -> TrackerResult<U256> {
        dispatch!(self, a => a.fetch_native_balance(account).await)
    }
}

pub(crate) fn wallet_unavailable(chain_id: &ChainId) -> TrackerError {
    TrackerError::WalletUnavailable {
        chain_id: chain_id.clone(),
    }
}
