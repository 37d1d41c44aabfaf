//! Shared fixtures for unit tests: chain descriptors and an in-memory
//! account-model chain that mines blocks on demand.

use crate::chain::adapter::AdapterContext;
use crate::chain::icon::{
    call_message_sent_log, signatures, IconCall, IconEventLog, IconRpc, IconTxResult, IconWallet,
};
use crate::chain::{ChainId, ChainKind, RetryPolicy};
use crate::config::{ChainConfig, ContractAddresses, NativeCurrency};
use crate::error::{TrackerError, TrackerResult};
use crate::transfer::{Token, TokenAmount};

use async_trait::async_trait;
use ethers::types::U256;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const EVM_XCALL: &str = "0xfc83a3f252090b26f92f91dfb9dc3eb710adaf1b";
pub const EVM_BNUSD: &str = "0xdbdd50997361522495ecfe57ebb6850da0e4c699";
pub const EVM_ASSET_MANAGER: &str = "0xdf851b4f0d9b2323e03b3980b1c4cf56273c0bd9";

pub const ICON_XCALL: &str = "cxxcall";
pub const ICON_SENDER: &str = "hx0000000000000000000000000000000000000001";

/// Descriptor of a test chain of the given kind
pub fn chain_config(id: &str, kind: ChainKind) -> ChainConfig {
    let (contracts, native_currency, lcd_url, network_id) = match kind {
        ChainKind::AccountModel => (
            ContractAddresses {
                xcall: ICON_XCALL.to_string(),
                asset_manager: Some("cxassetmanager".to_string()),
                bnusd: Some("cxbnusd".to_string()),
                amm: None,
            },
            NativeCurrency {
                symbol: "ICX".to_string(),
                decimals: 18,
                denom: None,
            },
            None,
            "0x1".to_string(),
        ),
        ChainKind::Cosmos => (
            ContractAddresses {
                xcall: "archway1xcall".to_string(),
                asset_manager: Some("archway1assetmanager".to_string()),
                bnusd: Some("archway1bnusd".to_string()),
                amm: None,
            },
            NativeCurrency {
                symbol: "ARCH".to_string(),
                decimals: 18,
                denom: Some("aarch".to_string()),
            },
            Some("http://127.0.0.1:9".to_string()),
            "archway-1".to_string(),
        ),
        ChainKind::Evm => (
            ContractAddresses {
                xcall: EVM_XCALL.to_string(),
                asset_manager: Some(EVM_ASSET_MANAGER.to_string()),
                bnusd: Some(EVM_BNUSD.to_string()),
                amm: None,
            },
            NativeCurrency {
                symbol: "AVAX".to_string(),
                decimals: 18,
                denom: None,
            },
            None,
            "43114".to_string(),
        ),
    };

    ChainConfig {
        id: ChainId::from(id),
        name: id.to_string(),
        kind,
        rpc_urls: vec!["http://127.0.0.1:9".to_string()],
        lcd_url,
        network_id,
        contracts,
        native_currency,
        gas_threshold: 1.0,
        auto_execution: true,
        enabled: true,
    }
}

/// Adapter context with a short retry budget
pub fn context(config: ChainConfig) -> AdapterContext {
    AdapterContext {
        config: Arc::new(config),
        retry: RetryPolicy::new(3, Duration::from_millis(1)),
        cancel: CancellationToken::new(),
    }
}

pub fn token_amount(chain: &str, address: &str, raw: u64) -> TokenAmount {
    TokenAmount {
        token: Token {
            chain_id: ChainId::from(chain),
            symbol: "TKN".to_string(),
            address: address.to_string(),
            decimals: 18,
        },
        raw: U256::from(raw),
    }
}

fn hex(value: impl Into<U256>) -> Option<String> {
    Some(format!("0x{:x}", value.into()))
}

fn xcall_log(indexed: Vec<Option<String>>, data: Vec<Option<String>>) -> IconEventLog {
    IconEventLog {
        score_address: ICON_XCALL.to_string(),
        indexed,
        data,
    }
}

pub fn call_message_log(from: &str, sn: u64, req_id: u64) -> IconEventLog {
    xcall_log(
        vec![
            Some(signatures::CALL_MESSAGE.to_string()),
            Some(from.to_string()),
            Some("cxassetmanager".to_string()),
            hex(sn),
        ],
        vec![hex(req_id), Some("0x".to_string())],
    )
}

pub fn call_executed_log(req_id: u64, code: i64) -> IconEventLog {
    let code = if code < 0 {
        Some(format!("-0x{:x}", code.unsigned_abs()))
    } else {
        Some(format!("0x{:x}", code))
    };
    xcall_log(
        vec![Some(signatures::CALL_EXECUTED.to_string()), hex(req_id)],
        vec![code, Some(String::new())],
    )
}

pub fn response_log(sn: u64, code: i64) -> IconEventLog {
    xcall_log(
        vec![Some(signatures::RESPONSE_MESSAGE.to_string()), hex(sn)],
        vec![Some(format!("0x{:x}", code.max(0)))],
    )
}

pub fn rollback_log(sn: u64) -> IconEventLog {
    xcall_log(vec![Some(signatures::ROLLBACK_MESSAGE.to_string()), hex(sn)], vec![])
}

#[derive(Default)]
struct FakeState {
    height: u64,
    blocks: BTreeMap<u64, Vec<String>>,
    results: HashMap<String, IconTxResult>,
    mempool: Vec<(String, Vec<IconEventLog>, bool)>,
    next_tx: u64,
    next_sn: u64,
    fee: U256,
    balance: U256,
    sent: Vec<IconCall>,
}

/// In-memory account-model chain. Submitted transactions stay pending
/// until [`FakeIconChain::mine`] puts them into a block.
pub struct FakeIconChain {
    chain_id: ChainId,
    state: Mutex<FakeState>,
    block_fetches: AtomicUsize,
}

impl FakeIconChain {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            chain_id: ChainId::from(id),
            state: Mutex::new(FakeState {
                height: 100,
                next_sn: 1,
                fee: U256::from(1_000u64),
                balance: U256::exp10(18) * 10,
                ..Default::default()
            }),
            block_fetches: AtomicUsize::new(0),
        })
    }

    pub fn height(&self) -> u64 {
        self.state.lock().unwrap().height
    }

    pub fn set_fee(&self, fee: u64) {
        self.state.lock().unwrap().fee = U256::from(fee);
    }

    pub fn set_balance(&self, balance: U256) {
        self.state.lock().unwrap().balance = balance;
    }

    /// Number of `block_transactions` calls served
    pub fn block_fetches(&self) -> usize {
        self.block_fetches.load(Ordering::SeqCst)
    }

    pub fn sent_calls(&self) -> Vec<IconCall> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Queue a transaction with the given logs, returning its hash
    pub fn submit(&self, logs: Vec<IconEventLog>, success: bool) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_tx += 1;
        let hash = format!("0x{:064x}", state.next_tx);
        state.mempool.push((hash.clone(), logs, success));
        hash
    }

    pub fn submit_call_message_sent(&self, sn: u64, to: &str) -> String {
        self.submit(
            vec![call_message_sent_log(ICON_XCALL, ICON_SENDER, to, U256::from(sn))],
            true,
        )
    }

    /// Put all queued transactions into a new block, returning its height
    pub fn mine(&self) -> u64 {
        let mut state = self.state.lock().unwrap();
        state.height += 1;
        let height = state.height;

        let queued = std::mem::take(&mut state.mempool);
        let mut hashes = Vec::with_capacity(queued.len());
        for (hash, logs, success) in queued {
            state.results.insert(
                hash.clone(),
                IconTxResult {
                    tx_hash: hash.clone(),
                    block_height: format!("0x{:x}", height),
                    status: if success { "0x1" } else { "0x0" }.to_string(),
                    failure: None,
                    event_logs: logs,
                },
            );
            hashes.push(hash);
        }
        state.blocks.insert(height, hashes);
        height
    }

    /// Submit and mine in one step, returning the block height
    pub fn emit(&self, logs: Vec<IconEventLog>) -> u64 {
        self.submit(logs, true);
        self.mine()
    }

    pub fn emit_call_message(&self, origin: &str, sn: u64, req_id: u64) -> u64 {
        self.emit(vec![call_message_log(&format!("{}/cxorigin", origin), sn, req_id)])
    }

    pub fn emit_call_executed(&self, req_id: u64, code: i64) -> u64 {
        self.emit(vec![call_executed_log(req_id, code)])
    }

    pub fn emit_response(&self, sn: u64, code: i64) -> u64 {
        self.emit(vec![response_log(sn, code)])
    }

    pub fn emit_rollback(&self, sn: u64) -> u64 {
        self.emit(vec![rollback_log(sn)])
    }
}

#[async_trait]
impl IconRpc for FakeIconChain {
    async fn last_block_height(&self) -> TrackerResult<u64> {
        Ok(self.height())
    }

    async fn block_transactions(&self, height: u64) -> TrackerResult<Vec<String>> {
        self.block_fetches.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if height > state.height {
            return Err(TrackerError::rpc(&self.chain_id, format!("block {} not found", height)));
        }
        Ok(state.blocks.get(&height).cloned().unwrap_or_default())
    }

    async fn transaction_result(&self, hash: &str) -> TrackerResult<Option<IconTxResult>> {
        Ok(self.state.lock().unwrap().results.get(hash).cloned())
    }

    async fn call(&self, _to: &str, method: &str, _params: Value) -> TrackerResult<Value> {
        match method {
            "getFee" => Ok(Value::String(format!("0x{:x}", self.state.lock().unwrap().fee))),
            other => Err(TrackerError::rpc(&self.chain_id, format!("unknown method {}", other))),
        }
    }

    async fn balance(&self, _address: &str) -> TrackerResult<U256> {
        Ok(self.state.lock().unwrap().balance)
    }
}

#[async_trait]
impl IconWallet for FakeIconChain {
    /// Records the call and queues a `CallMessageSent` with the next sn
    async fn send_call(&self, call: IconCall) -> TrackerResult<String> {
        let to = call
            .params
            .get("_to")
            .or_else(|| call.params.get("to"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let sn = {
            let mut state = self.state.lock().unwrap();
            state.sent.push(call.clone());
            let sn = state.next_sn;
            state.next_sn += 1;
            sn
        };

        if call.method == "executeCall" {
            return Ok(self.submit(vec![], true));
        }
        Ok(self.submit_call_message_sent(sn, &to))
    }
}
