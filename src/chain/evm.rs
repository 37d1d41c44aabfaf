//! EVM chain adapter with multi-RPC failover
//!
//! xCall events are read from logs of the xCall contract. Indexed values sit
//! in the topics, the rest is ABI encoded in the log data. Indexed strings
//! only survive as their keccak hash.

use crate::chain::adapter::{wallet_unavailable, AdapterContext, RawReceipt, TransferParams};
use crate::chain::ChainId;
use crate::error::{TrackerError, TrackerResult};
use crate::events::ProtocolEvent;
use crate::transfer::TxStatus;

use async_trait::async_trait;
use ethers::abi::{self, ParamType, Token};
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use sha3::{Digest, Keccak256};
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Keccak-256 of a signature string
pub fn keccak(signature: &str) -> H256 {
    H256::from_slice(&Keccak256::digest(signature.as_bytes()))
}

/// Function selector of a signature string
pub fn selector(signature: &str) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&keccak(signature).as_bytes()[..4]);
    out
}

/// Event topic signatures (keccak256 of event signature)
pub mod topics {
    use super::keccak;
    use ethers::types::H256;
    use lazy_static::lazy_static;

    lazy_static! {
        pub static ref CALL_MESSAGE_SENT: H256 = keccak("CallMessageSent(address,string,uint256)");
        pub static ref CALL_MESSAGE: H256 = keccak("CallMessage(string,string,uint256,uint256,bytes)");
        pub static ref CALL_EXECUTED: H256 = keccak("CallExecuted(uint256,int256,string)");
        pub static ref RESPONSE_MESSAGE: H256 = keccak("ResponseMessage(uint256,int256)");
        pub static ref ROLLBACK_MESSAGE: H256 = keccak("RollbackMessage(uint256)");
    }
}

/// Contract entry points used for reads and submissions
pub mod functions {
    pub const GET_FEE: &str = "getFee(string,bool)";
    pub const CROSS_TRANSFER: &str = "crossTransfer(string,uint256,bytes)";
    pub const DEPOSIT: &str = "deposit(address,uint256,string,bytes)";
    pub const DEPOSIT_NATIVE: &str = "depositNative(uint256,string,bytes)";
    pub const EXECUTE_CALL: &str = "executeCall(uint256,bytes)";
}

/// Calldata for `signature` with ABI encoded arguments
pub fn calldata(signature: &str, args: &[Token]) -> Bytes {
    let mut data = selector(signature).to_vec();
    data.extend(abi::encode(args));
    data.into()
}

/// Receipt status bit; a receipt without block is still pending
pub fn receipt_status(receipt: &TransactionReceipt) -> TxStatus {
    match (receipt.block_number, receipt.status) {
        (None, _) => TxStatus::Pending,
        (Some(_), Some(status)) if status.as_u64() == 1 => TxStatus::Success,
        (Some(_), Some(_)) => TxStatus::Failure,
        // Pre-Byzantium receipts carry no status
        (Some(_), None) => TxStatus::Success,
    }
}

fn topic_u256(log: &Log, idx: usize) -> TrackerResult<U256> {
    log.topics
        .get(idx)
        .map(|t| U256::from_big_endian(t.as_bytes()))
        .ok_or_else(|| TrackerError::EventParsing(format!("log without topic {}", idx)))
}

fn topic_hex(log: &Log, idx: usize) -> TrackerResult<String> {
    log.topics
        .get(idx)
        .map(|t| format!("{:?}", t))
        .ok_or_else(|| TrackerError::EventParsing(format!("log without topic {}", idx)))
}

fn decode_data(log: &Log, types: &[ParamType]) -> TrackerResult<Vec<Token>> {
    abi::decode(types, &log.data).map_err(|e| TrackerError::EventParsing(e.to_string()))
}

/// Two's complement int256 to i64 (result codes are small)
fn int256_to_i64(raw: U256) -> i64 {
    if raw.bit(255) {
        let magnitude = (!raw).overflowing_add(U256::one()).0;
        -(magnitude.low_u64() as i64)
    } else {
        raw.low_u64() as i64
    }
}

fn token_int(token: &Token) -> TrackerResult<i64> {
    match token {
        Token::Int(raw) => Ok(int256_to_i64(*raw)),
        Token::Uint(raw) => Ok(raw.low_u64() as i64),
        other => Err(TrackerError::EventParsing(format!("expected int, got {:?}", other))),
    }
}

/// Decode one xCall log; `Ok(None)` for unknown topics
pub fn decode_log(chain_id: &ChainId, log: &Log) -> TrackerResult<Option<ProtocolEvent>> {
    let Some(topic0) = log.topics.first() else {
        return Ok(None);
    };

    let chain_id = chain_id.clone();
    let block_height = log.block_number.map(|b| b.as_u64()).unwrap_or_default();
    let tx_hash = format!("{:?}", log.transaction_hash.unwrap_or_default());
    let raw = serde_json::to_value(log)?;

    let event = if topic0 == &*topics::CALL_MESSAGE_SENT {
        let from = log
            .topics
            .get(1)
            .map(|t| format!("{:?}", Address::from_slice(&t.as_bytes()[12..])))
            .ok_or_else(|| TrackerError::EventParsing("CallMessageSent without sender".to_string()))?;
        ProtocolEvent::CallMessageSent {
            chain_id,
            sn: topic_u256(log, 3)?,
            from,
            to: topic_hex(log, 2)?,
            block_height,
            tx_hash,
            raw,
        }
    } else if topic0 == &*topics::CALL_MESSAGE {
        let data = decode_data(log, &[ParamType::Uint(256), ParamType::Bytes])?;
        let req_id = data[0]
            .clone()
            .into_uint()
            .ok_or_else(|| TrackerError::EventParsing("CallMessage reqId".to_string()))?;
        let payload = data[1].clone().into_bytes().unwrap_or_default();
        ProtocolEvent::CallMessage {
            chain_id,
            sn: topic_u256(log, 3)?,
            req_id,
            from: topic_hex(log, 1)?,
            to: topic_hex(log, 2)?,
            data: format!("0x{}", hex::encode(payload)),
            block_height,
            tx_hash,
            raw,
        }
    } else if topic0 == &*topics::CALL_EXECUTED {
        let data = decode_data(log, &[ParamType::Int(256), ParamType::String])?;
        ProtocolEvent::CallExecuted {
            chain_id,
            req_id: topic_u256(log, 1)?,
            code: token_int(&data[0])?,
            msg: data[1].clone().into_string().unwrap_or_default(),
            block_height,
            tx_hash,
            raw,
        }
    } else if topic0 == &*topics::RESPONSE_MESSAGE {
        let data = decode_data(log, &[ParamType::Int(256)])?;
        ProtocolEvent::ResponseMessage {
            chain_id,
            sn: topic_u256(log, 1)?,
            code: token_int(&data[0])?,
            msg: String::new(),
            block_height,
            tx_hash,
            raw,
        }
    } else if topic0 == &*topics::ROLLBACK_MESSAGE {
        ProtocolEvent::RollbackMessage {
            chain_id,
            sn: topic_u256(log, 1)?,
            block_height,
            tx_hash,
            raw,
        }
    } else {
        return Ok(None);
    };

    Ok(Some(event))
}

/// Signing client for EVM chains
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EvmWallet: Send + Sync {
    /// Fill, sign and broadcast a transaction
    async fn send_transaction(&self, tx: TypedTransaction) -> TrackerResult<H256>;
}

/// Local key wallet sending through the chain's provider
pub struct LocalEvmWallet {
    chain_id: ChainId,
    provider: Provider<Http>,
    wallet: LocalWallet,
}

impl LocalEvmWallet {
    pub fn new(chain_id: ChainId, rpc_url: &str, wallet: LocalWallet, network_id: u64) -> TrackerResult<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| TrackerError::connection(&chain_id, e))?;
        Ok(Self {
            chain_id,
            provider,
            wallet: wallet.with_chain_id(network_id),
        })
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }
}

#[async_trait]
impl EvmWallet for LocalEvmWallet {
    async fn send_transaction(&self, mut tx: TypedTransaction) -> TrackerResult<H256> {
        let rejected = |e: String| TrackerError::Submission {
            chain_id: self.chain_id.clone(),
            message: e,
        };

        tx.set_from(self.wallet.address());
        tx.set_chain_id(self.wallet.chain_id());
        self.provider
            .fill_transaction(&mut tx, None)
            .await
            .map_err(|e| rejected(e.to_string()))?;

        let signature = self
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| rejected(e.to_string()))?;

        let pending = self
            .provider
            .send_raw_transaction(tx.rlp_signed(&signature))
            .await
            .map_err(|e| rejected(e.to_string()))?;

        Ok(pending.tx_hash())
    }
}

/// Adapter for EVM chains
pub struct EvmAdapter {
    ctx: AdapterContext,
    providers: Vec<Provider<Http>>,
    current: AtomicUsize,
    xcall: Address,
    wallet: Option<Arc<dyn EvmWallet>>,
}

fn parse_address(chain_id: &ChainId, address: &str) -> TrackerResult<Address> {
    Address::from_str(address)
        .map_err(|e| TrackerError::Config(format!("Chain {}: invalid address {}: {}", chain_id, address, e)))
}

impl EvmAdapter {
    pub(crate) fn connect(ctx: AdapterContext, wallet: Option<Arc<dyn EvmWallet>>) -> TrackerResult<Self> {
        let mut providers = Vec::new();
        for url in &ctx.config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    providers.push(provider.interval(Duration::from_millis(100)));
                    debug!("Added HTTP provider for chain {}: {}", ctx.chain_id(), url);
                }
                Err(e) => warn!("Failed to create provider for {}: {}", url, e),
            }
        }

        if providers.is_empty() {
            return Err(TrackerError::ChainConnection {
                chain_id: ctx.chain_id().clone(),
                message: "No valid RPC providers".to_string(),
            });
        }

        let xcall = parse_address(ctx.chain_id(), ctx.xcall())?;
        Ok(Self {
            ctx,
            providers,
            current: AtomicUsize::new(0),
            xcall,
            wallet,
        })
    }

    pub(crate) fn context(&self) -> &AdapterContext {
        &self.ctx
    }

    pub fn can_sign(&self) -> bool {
        self.wallet.is_some()
    }

    fn wallet(&self) -> TrackerResult<&Arc<dyn EvmWallet>> {
        self.wallet
            .as_ref()
            .ok_or_else(|| wallet_unavailable(self.ctx.chain_id()))
    }

    /// Get the active HTTP provider
    fn http(&self) -> &Provider<Http> {
        let idx = self.current.load(Ordering::Relaxed);
        &self.providers[idx % self.providers.len()]
    }

    /// Switch to next available provider
    fn failover(&self) {
        let current = self.current.load(Ordering::Relaxed);
        let next = (current + 1) % self.providers.len();
        self.current.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.ctx.chain_id(), next);
    }

    /// Run a provider request, trying each provider once
    async fn with_failover<'a, T, F, Fut>(&'a self, operation: &str, request: F) -> TrackerResult<T>
    where
        F: Fn(&'a Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>> + 'a,
    {
        let mut last_error = None;
        for _ in 0..self.providers.len() {
            match request(self.http()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("Failed to {} on chain {}: {}", operation, self.ctx.chain_id(), e);
                    last_error = Some(e.to_string());
                    self.failover();
                }
            }
        }

        Err(TrackerError::ChainConnection {
            chain_id: self.ctx.chain_id().clone(),
            message: last_error.unwrap_or_else(|| "All providers failed".to_string()),
        })
    }

    pub async fn fetch_block_height(&self) -> TrackerResult<u64> {
        self.with_failover("get block number", |p| p.get_block_number())
            .await
            .map(|b| b.as_u64())
    }

    pub async fn fetch_protocol_fee(&self, destination: &ChainId, with_rollback: bool) -> TrackerResult<U256> {
        let tx: TypedTransaction = TransactionRequest::new()
            .to(self.xcall)
            .data(calldata(
                functions::GET_FEE,
                &[Token::String(destination.to_string()), Token::Bool(with_rollback)],
            ))
            .into();

        let output = self.with_failover("call getFee", |p| p.call(&tx, None)).await?;
        abi::decode(&[ParamType::Uint(256)], &output)
            .ok()
            .and_then(|mut tokens| tokens.pop())
            .and_then(Token::into_uint)
            .ok_or_else(|| TrackerError::rpc(self.ctx.chain_id(), "getFee returned no uint256"))
    }

    pub async fn fetch_transaction_receipt(&self, hash: &str) -> TrackerResult<Option<RawReceipt>> {
        let hash = H256::from_str(hash)
            .map_err(|e| TrackerError::rpc(self.ctx.chain_id(), format!("bad tx hash {}: {}", hash, e)))?;

        let receipt = self
            .with_failover("get receipt", |p| p.get_transaction_receipt(hash))
            .await?;
        // Receipts of pending transactions are not useful yet
        Ok(receipt
            .filter(|r| r.block_number.is_some())
            .map(RawReceipt::Evm))
    }

    /// xCall events in a receipt; malformed logs are skipped
    pub fn receipt_events(&self, receipt: &TransactionReceipt) -> Vec<ProtocolEvent> {
        self.decode_logs(receipt.logs.iter())
    }

    fn decode_logs<'a>(&self, logs: impl Iterator<Item = &'a Log>) -> Vec<ProtocolEvent> {
        logs.filter(|log| log.address == self.xcall)
            .filter_map(|log| match decode_log(self.ctx.chain_id(), log) {
                Ok(event) => event,
                Err(e) => {
                    warn!(
                        "Chain {} skipping log in {:?}: {}",
                        self.ctx.chain_id(),
                        log.transaction_hash,
                        e
                    );
                    None
                }
            })
            .collect()
    }

    pub async fn fetch_events_for_block(&self, height: u64) -> TrackerResult<Vec<ProtocolEvent>> {
        let filter = Filter::new()
            .address(self.xcall)
            .from_block(height)
            .to_block(height);

        let logs = self.with_failover("get logs", |p| p.get_logs(&filter)).await?;
        let events = self.decode_logs(logs.iter());
        debug!(
            "Chain {} block {}: {} logs, {} xCall events",
            self.ctx.chain_id(),
            height,
            logs.len(),
            events.len()
        );
        Ok(events)
    }

    pub async fn execute_transfer(&self, params: &TransferParams) -> TrackerResult<String> {
        let wallet = self.wallet()?;
        let chain_id = self.ctx.chain_id();
        let from = parse_address(chain_id, &params.account)?;
        let token = &params.amount.token;
        let to = params.destination_address();
        let payload = params.payload();

        let (contract, data, value) = if self.ctx.is_bnusd(&token.address) {
            (
                parse_address(chain_id, &token.address)?,
                calldata(
                    functions::CROSS_TRANSFER,
                    &[Token::String(to), Token::Uint(params.amount.raw), Token::Bytes(payload)],
                ),
                params.fee,
            )
        } else if params.flags.native_denom {
            (
                parse_address(chain_id, self.ctx.asset_manager()?)?,
                calldata(
                    functions::DEPOSIT_NATIVE,
                    &[Token::Uint(params.amount.raw), Token::String(to), Token::Bytes(payload)],
                ),
                params.amount.raw.saturating_add(params.fee),
            )
        } else {
            (
                parse_address(chain_id, self.ctx.asset_manager()?)?,
                calldata(
                    functions::DEPOSIT,
                    &[
                        Token::Address(parse_address(chain_id, &token.address)?),
                        Token::Uint(params.amount.raw),
                        Token::String(to),
                        Token::Bytes(payload),
                    ],
                ),
                params.fee,
            )
        };

        let tx: TypedTransaction = TransactionRequest::new()
            .from(from)
            .to(contract)
            .data(data)
            .value(value)
            .into();

        let hash = wallet.send_transaction(tx).await?;
        info!(
            "Chain {} submitted transfer to {} via {:?} ({:?})",
            chain_id, params.destination, contract, hash
        );
        Ok(format!("{:?}", hash))
    }

    pub async fn execute_call(&self, account: &str, req_id: U256, data: &[u8]) -> TrackerResult<String> {
        let wallet = self.wallet()?;
        let tx: TypedTransaction = TransactionRequest::new()
            .from(parse_address(self.ctx.chain_id(), account)?)
            .to(self.xcall)
            .data(calldata(
                functions::EXECUTE_CALL,
                &[Token::Uint(req_id), Token::Bytes(data.to_vec())],
            ))
            .into();

        let hash = wallet.send_transaction(tx).await?;
        info!("Chain {} executeCall {} ({:?})", self.ctx.chain_id(), req_id, hash);
        Ok(format!("{:?}", hash))
    }

    pub async fn fetch_native_balance(&self, account: &str) -> TrackerResult<U256> {
        let address = parse_address(self.ctx.chain_id(), account)?;
        self.with_failover("get balance", |p| p.get_balance(address, None))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::adapter::TransferFlags;
    use crate::chain::ChainKind;
    use crate::test_utils::{chain_config, context, token_amount, EVM_ASSET_MANAGER, EVM_BNUSD, EVM_XCALL};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn xcall() -> Address {
        Address::from_str(EVM_XCALL).unwrap()
    }

    fn log(topics: Vec<H256>, data: Vec<u8>) -> Log {
        Log {
            address: xcall(),
            topics,
            data: data.into(),
            block_number: Some(U64::from(103)),
            transaction_hash: Some(H256::repeat_byte(0xab)),
            ..Default::default()
        }
    }

    fn u256_topic(value: u64) -> H256 {
        let mut bytes = [0u8; 32];
        U256::from(value).to_big_endian(&mut bytes);
        H256::from(bytes)
    }

    fn adapter(server: &MockServer, wallet: Option<Arc<dyn EvmWallet>>) -> EvmAdapter {
        let mut config = chain_config("0xa86a.avax", ChainKind::Evm);
        config.rpc_urls = vec![server.uri()];
        EvmAdapter::connect(context(config), wallet).unwrap()
    }

    #[test]
    fn test_decode_call_message_and_executed() {
        let chain: ChainId = "0xa86a.avax".into();

        let message = log(
            vec![*topics::CALL_MESSAGE, keccak("0x1.icon/cx01"), keccak("0xdead"), u256_topic(42)],
            abi::encode(&[Token::Uint(U256::from(7)), Token::Bytes(vec![1, 2])]),
        );
        let event = decode_log(&chain, &message).unwrap().unwrap();
        assert_eq!(event.sn(), Some(U256::from(42)));
        assert_eq!(event.req_id(), Some(U256::from(7)));
        assert_eq!(event.block_height(), 103);

        let minus_one = U256::MAX;
        let executed = log(
            vec![*topics::CALL_EXECUTED, u256_topic(7)],
            abi::encode(&[Token::Int(minus_one), Token::String("reverted".to_string())]),
        );
        let event = decode_log(&chain, &executed).unwrap().unwrap();
        assert_eq!(event.req_id(), Some(U256::from(7)));
        assert_eq!(event.is_success(), Some(false));

        let unknown = log(vec![keccak("Transfer(address,address,uint256)")], vec![]);
        assert!(decode_log(&chain, &unknown).unwrap().is_none());
    }

    #[test]
    fn test_int256_codes() {
        assert_eq!(int256_to_i64(U256::MAX), -1);
        assert_eq!(int256_to_i64(U256::MAX - 1), -2);
        assert_eq!(int256_to_i64(U256::one()), 1);
        assert_eq!(int256_to_i64(U256::zero()), 0);
    }

    #[test]
    fn test_receipt_status() {
        let mut receipt = TransactionReceipt::default();
        assert_eq!(receipt_status(&receipt), TxStatus::Pending);

        receipt.block_number = Some(U64::from(10));
        receipt.status = Some(U64::from(1));
        assert_eq!(receipt_status(&receipt), TxStatus::Success);

        receipt.status = Some(U64::from(0));
        assert_eq!(receipt_status(&receipt), TxStatus::Failure);
    }

    #[tokio::test]
    async fn test_block_height() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_blockNumber"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1, "result": "0x3e8"
            })))
            .mount(&server)
            .await;

        assert_eq!(adapter(&server, None).fetch_block_height().await.unwrap(), 1000);
    }

    #[tokio::test]
    async fn test_block_events_from_logs() {
        let server = MockServer::start().await;
        let data = abi::encode(&[Token::Uint(U256::from(7)), Token::Bytes(vec![])]);
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_getLogs"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1,
                "result": [{
                    "address": EVM_XCALL,
                    "topics": [
                        format!("{:?}", *topics::CALL_MESSAGE),
                        format!("{:?}", keccak("0x1.icon/cx01")),
                        format!("{:?}", keccak("0xdead")),
                        format!("{:?}", u256_topic(42)),
                    ],
                    "data": format!("0x{}", hex::encode(data)),
                    "blockNumber": "0x64",
                    "transactionHash": format!("{:?}", H256::repeat_byte(0xcd)),
                    "logIndex": "0x0"
                }]
            })))
            .mount(&server)
            .await;

        let events = adapter(&server, None).fetch_events_for_block(100).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sn(), Some(U256::from(42)));
        assert_eq!(events[0].block_height(), 100);
    }

    #[tokio::test]
    async fn test_fee_via_eth_call() {
        let server = MockServer::start().await;
        let fee = abi::encode(&[Token::Uint(U256::exp10(17))]);
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_call"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1, "result": format!("0x{}", hex::encode(fee))
            })))
            .mount(&server)
            .await;

        let quoted = adapter(&server, None)
            .fetch_protocol_fee(&"0x1.icon".into(), true)
            .await
            .unwrap();
        assert_eq!(quoted, U256::exp10(17));
    }

    #[tokio::test]
    async fn test_bnusd_transfer_calldata() {
        let server = MockServer::start().await;
        let mut wallet = MockEvmWallet::new();
        wallet
            .expect_send_transaction()
            .withf(|tx| {
                let data = tx.data().cloned().unwrap_or_default();
                data.starts_with(&selector(functions::CROSS_TRANSFER))
                    && tx.value() == Some(&U256::from(5))
                    && tx.to_addr() == Some(&Address::from_str(EVM_BNUSD).unwrap())
            })
            .times(1)
            .returning(|_| Ok(H256::repeat_byte(0x11)));

        let params = TransferParams {
            destination: "0x1.icon".into(),
            amount: token_amount("0xa86a.avax", EVM_BNUSD, 1000),
            recipient: "hxrecipient".to_string(),
            account: "0x00000000000000000000000000000000000000aa".to_string(),
            fee: U256::from(5),
            with_rollback: false,
            flags: TransferFlags::default(),
        };

        let hash = adapter(&server, Some(Arc::new(wallet)))
            .execute_transfer(&params)
            .await
            .unwrap();
        assert_eq!(hash, format!("{:?}", H256::repeat_byte(0x11)));
    }

    #[tokio::test]
    async fn test_native_deposit_sends_amount_plus_fee() {
        let server = MockServer::start().await;
        let mut wallet = MockEvmWallet::new();
        wallet
            .expect_send_transaction()
            .withf(|tx| {
                tx.value() == Some(&U256::from(1005))
                    && tx.to_addr() == Some(&Address::from_str(EVM_ASSET_MANAGER).unwrap())
            })
            .times(1)
            .returning(|_| Ok(H256::repeat_byte(0x22)));

        let params = TransferParams {
            destination: "0x1.icon".into(),
            amount: token_amount("0xa86a.avax", "0x0000000000000000000000000000000000000000", 1000),
            recipient: "hxrecipient".to_string(),
            account: "0x00000000000000000000000000000000000000aa".to_string(),
            fee: U256::from(5),
            with_rollback: false,
            flags: TransferFlags {
                native_denom: true,
                unwrap_liquid_stake: false,
            },
        };

        adapter(&server, Some(Arc::new(wallet)))
            .execute_transfer(&params)
            .await
            .unwrap();
    }
}
