//! Account-model (ICON style) chain adapter
//!
//! Queries go through the ICON JSON-RPC v3 API. xCall events are read from
//! transaction results: the first indexed value of an event log is the event
//! signature, the remaining indexed values and the data values are positional.

use crate::chain::adapter::{wallet_unavailable, AdapterContext, RawReceipt, TransferParams};
use crate::chain::rpc::RpcClient;
use crate::chain::ChainId;
use crate::codec::{parse_i64, parse_u256};
use crate::error::{TrackerError, TrackerResult};
use crate::events::ProtocolEvent;
use crate::transfer::TxStatus;

use async_trait::async_trait;
use ethers::types::U256;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Event log signatures of the xCall score
pub mod signatures {
    pub const CALL_MESSAGE_SENT: &str = "CallMessageSent(Address,str,int)";
    pub const CALL_MESSAGE: &str = "CallMessage(str,str,int,int,bytes)";
    pub const CALL_EXECUTED: &str = "CallExecuted(int,int,str)";
    pub const RESPONSE_MESSAGE: &str = "ResponseMessage(int,int)";
    pub const RESPONSE_MESSAGE_WITH_MSG: &str = "ResponseMessage(int,int,str)";
    pub const ROLLBACK_MESSAGE: &str = "RollbackMessage(int)";
}

/// Node error codes meaning the transaction is not (yet) available
const NOT_FOUND_CODES: std::ops::RangeInclusive<i64> = -31004..=-31002;

/// Transaction result as returned by `icx_getTransactionResult`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IconTxResult {
    pub tx_hash: String,
    pub block_height: String,
    /// `0x1` success, `0x0` failure
    pub status: String,
    #[serde(default)]
    pub failure: Option<IconFailure>,
    #[serde(default)]
    pub event_logs: Vec<IconEventLog>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IconFailure {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IconEventLog {
    pub score_address: String,
    pub indexed: Vec<Option<String>>,
    #[serde(default)]
    pub data: Vec<Option<String>>,
}

impl IconTxResult {
    pub fn tx_status(&self) -> TxStatus {
        match self.status.as_str() {
            "0x1" => TxStatus::Success,
            "0x0" => TxStatus::Failure,
            _ => TxStatus::Pending,
        }
    }

    pub fn height(&self) -> Option<u64> {
        parse_u256(&self.block_height).map(|h| h.low_u64())
    }
}

/// Read access to an account-model node
#[async_trait]
pub trait IconRpc: Send + Sync {
    async fn last_block_height(&self) -> TrackerResult<u64>;

    /// Hashes of the user transactions in a block
    async fn block_transactions(&self, height: u64) -> TrackerResult<Vec<String>>;

    /// `None` while the transaction is pending or unknown
    async fn transaction_result(&self, hash: &str) -> TrackerResult<Option<IconTxResult>>;

    /// Read-only score call
    async fn call(&self, to: &str, method: &str, params: Value) -> TrackerResult<Value>;

    async fn balance(&self, address: &str) -> TrackerResult<U256>;
}

/// Score call to sign and broadcast
#[derive(Debug, Clone, PartialEq)]
pub struct IconCall {
    pub from: String,
    pub to: String,
    pub method: String,
    pub params: Value,
    /// Attached ICX, in loop
    pub value: U256,
}

/// Signing wallet for account-model chains
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IconWallet: Send + Sync {
    /// Sign and broadcast, returning the transaction hash
    async fn send_call(&self, call: IconCall) -> TrackerResult<String>;
}

/// ICON JSON-RPC v3 client
pub struct IconRpcClient {
    rpc: RpcClient,
}

impl IconRpcClient {
    pub fn new(chain_id: ChainId, urls: Vec<String>) -> TrackerResult<Self> {
        Ok(Self {
            rpc: RpcClient::new(chain_id, urls)?,
        })
    }
}

fn hex_or_number(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => parse_u256(s).map(|v| v.low_u64()),
        _ => None,
    }
}

#[async_trait]
impl IconRpc for IconRpcClient {
    async fn last_block_height(&self) -> TrackerResult<u64> {
        let block: Value = self.rpc.call("icx_getLastBlock", Value::Null).await?;
        block
            .get("height")
            .and_then(hex_or_number)
            .ok_or_else(|| TrackerError::rpc(self.rpc.chain_id(), "block without height"))
    }

    async fn block_transactions(&self, height: u64) -> TrackerResult<Vec<String>> {
        let block: Value = self
            .rpc
            .call("icx_getBlockByHeight", json!({ "height": format!("0x{:x}", height) }))
            .await?;

        let txs = block
            .get("confirmed_transaction_list")
            .and_then(Value::as_array)
            .ok_or_else(|| TrackerError::rpc(self.rpc.chain_id(), "block without transaction list"))?;

        Ok(txs
            .iter()
            .filter(|tx| tx.get("dataType").and_then(Value::as_str) != Some("base"))
            .filter_map(|tx| {
                tx.get("txHash")
                    .or_else(|| tx.get("tx_hash"))
                    .and_then(Value::as_str)
            })
            .map(|hash| {
                if hash.starts_with("0x") {
                    hash.to_string()
                } else {
                    format!("0x{}", hash)
                }
            })
            .collect())
    }

    async fn transaction_result(&self, hash: &str) -> TrackerResult<Option<IconTxResult>> {
        match self
            .rpc
            .request::<IconTxResult>("icx_getTransactionResult", json!({ "txHash": hash }))
            .await?
        {
            Ok(result) => Ok(result),
            Err(e) if NOT_FOUND_CODES.contains(&e.code) => Ok(None),
            Err(e) if e.mentions("Pending") || e.mentions("Executing") => Ok(None),
            Err(e) => Err(TrackerError::rpc(
                self.rpc.chain_id(),
                format!("icx_getTransactionResult: {} ({})", e.message, e.code),
            )),
        }
    }

    async fn call(&self, to: &str, method: &str, params: Value) -> TrackerResult<Value> {
        self.rpc
            .call(
                "icx_call",
                json!({
                    "to": to,
                    "dataType": "call",
                    "data": { "method": method, "params": params },
                }),
            )
            .await
    }

    async fn balance(&self, address: &str) -> TrackerResult<U256> {
        let balance: String = self
            .rpc
            .call("icx_getBalance", json!({ "address": address }))
            .await?;
        parse_u256(&balance)
            .ok_or_else(|| TrackerError::rpc(self.rpc.chain_id(), format!("bad balance {}", balance)))
    }
}

fn field<'a>(values: &'a [Option<String>], idx: usize, signature: &str) -> TrackerResult<&'a str> {
    values
        .get(idx)
        .and_then(|v| v.as_deref())
        .ok_or_else(|| TrackerError::EventParsing(format!("{}: missing field {}", signature, idx)))
}

fn int_field(values: &[Option<String>], idx: usize, signature: &str) -> TrackerResult<U256> {
    let raw = field(values, idx, signature)?;
    parse_u256(raw)
        .ok_or_else(|| TrackerError::EventParsing(format!("{}: bad integer {}", signature, raw)))
}

fn code_field(values: &[Option<String>], idx: usize, signature: &str) -> TrackerResult<i64> {
    let raw = field(values, idx, signature)?;
    parse_i64(raw).ok_or_else(|| TrackerError::EventParsing(format!("{}: bad code {}", signature, raw)))
}

/// Decode one event log; `Ok(None)` for logs that are not xCall events
pub fn decode_event_log(
    chain_id: &ChainId,
    log: &IconEventLog,
    block_height: u64,
    tx_hash: &str,
) -> TrackerResult<Option<ProtocolEvent>> {
    let Some(Some(signature)) = log.indexed.first() else {
        return Ok(None);
    };
    let signature = signature.as_str();
    let indexed = &log.indexed;
    let data = &log.data;
    let raw = serde_json::to_value(log)?;
    let chain_id = chain_id.clone();
    let tx_hash = tx_hash.to_string();

    let event = match signature {
        signatures::CALL_MESSAGE_SENT => ProtocolEvent::CallMessageSent {
            chain_id,
            from: field(indexed, 1, signature)?.to_string(),
            to: field(indexed, 2, signature)?.to_string(),
            sn: int_field(indexed, 3, signature)?,
            block_height,
            tx_hash,
            raw,
        },
        signatures::CALL_MESSAGE => ProtocolEvent::CallMessage {
            chain_id,
            from: field(indexed, 1, signature)?.to_string(),
            to: field(indexed, 2, signature)?.to_string(),
            sn: int_field(indexed, 3, signature)?,
            req_id: int_field(data, 0, signature)?,
            data: field(data, 1, signature).unwrap_or("0x").to_string(),
            block_height,
            tx_hash,
            raw,
        },
        signatures::CALL_EXECUTED => ProtocolEvent::CallExecuted {
            chain_id,
            req_id: int_field(indexed, 1, signature)?,
            code: code_field(data, 0, signature)?,
            msg: field(data, 1, signature).unwrap_or_default().to_string(),
            block_height,
            tx_hash,
            raw,
        },
        signatures::RESPONSE_MESSAGE | signatures::RESPONSE_MESSAGE_WITH_MSG => {
            ProtocolEvent::ResponseMessage {
                chain_id,
                sn: int_field(indexed, 1, signature)?,
                code: code_field(data, 0, signature)?,
                msg: field(data, 1, signature).unwrap_or_default().to_string(),
                block_height,
                tx_hash,
                raw,
            }
        }
        signatures::ROLLBACK_MESSAGE => ProtocolEvent::RollbackMessage {
            chain_id,
            sn: int_field(indexed, 1, signature)?,
            block_height,
            tx_hash,
            raw,
        },
        _ => return Ok(None),
    };

    Ok(Some(event))
}

/// Adapter for account-model chains
pub struct IconAdapter {
    ctx: AdapterContext,
    rpc: Arc<dyn IconRpc>,
    wallet: Option<Arc<dyn IconWallet>>,
}

impl IconAdapter {
    pub fn new(ctx: AdapterContext, rpc: Arc<dyn IconRpc>, wallet: Option<Arc<dyn IconWallet>>) -> Self {
        Self { ctx, rpc, wallet }
    }

    pub(crate) fn connect(ctx: AdapterContext, wallet: Option<Arc<dyn IconWallet>>) -> TrackerResult<Self> {
        let rpc = IconRpcClient::new(ctx.chain_id().clone(), ctx.config.rpc_urls.clone())?;
        Ok(Self::new(ctx, Arc::new(rpc), wallet))
    }

    pub(crate) fn context(&self) -> &AdapterContext {
        &self.ctx
    }

    pub fn can_sign(&self) -> bool {
        self.wallet.is_some()
    }

    fn wallet(&self) -> TrackerResult<&Arc<dyn IconWallet>> {
        self.wallet
            .as_ref()
            .ok_or_else(|| wallet_unavailable(self.ctx.chain_id()))
    }

    pub async fn fetch_block_height(&self) -> TrackerResult<u64> {
        self.rpc.last_block_height().await
    }

    pub async fn fetch_protocol_fee(&self, destination: &ChainId, with_rollback: bool) -> TrackerResult<U256> {
        let fee = self
            .rpc
            .call(
                self.ctx.xcall(),
                "getFee",
                json!({
                    "_net": destination.as_str(),
                    "_rollback": if with_rollback { "0x1" } else { "0x0" },
                }),
            )
            .await?;

        fee.as_str()
            .and_then(parse_u256)
            .ok_or_else(|| TrackerError::rpc(self.ctx.chain_id(), format!("bad fee {}", fee)))
    }

    pub async fn fetch_transaction_receipt(&self, hash: &str) -> TrackerResult<Option<RawReceipt>> {
        Ok(self
            .rpc
            .transaction_result(hash)
            .await?
            .map(RawReceipt::AccountModel))
    }

    /// xCall events of a transaction result; malformed logs are skipped
    pub fn receipt_events(&self, result: &IconTxResult) -> Vec<ProtocolEvent> {
        let height = result.height().unwrap_or_default();
        result
            .event_logs
            .iter()
            .filter(|log| log.score_address.eq_ignore_ascii_case(self.ctx.xcall()))
            .filter_map(|log| {
                match decode_event_log(self.ctx.chain_id(), log, height, &result.tx_hash) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("Chain {} skipping event in {}: {}", self.ctx.chain_id(), result.tx_hash, e);
                        None
                    }
                }
            })
            .collect()
    }

    pub async fn fetch_events_for_block(&self, height: u64) -> TrackerResult<Vec<ProtocolEvent>> {
        let hashes = self.rpc.block_transactions(height).await?;
        let results =
            futures::future::join_all(hashes.iter().map(|h| self.rpc.transaction_result(h))).await;

        let mut events = Vec::new();
        for (hash, result) in hashes.iter().zip(results) {
            // A confirmed transaction without a result would be silently lost
            let result = result?.ok_or_else(|| {
                TrackerError::rpc(
                    self.ctx.chain_id(),
                    format!("no result for {} in block {}", hash, height),
                )
            })?;
            events.extend(self.receipt_events(&result));
        }

        debug!(
            "Chain {} block {}: {} txs, {} xCall events",
            self.ctx.chain_id(),
            height,
            hashes.len(),
            events.len()
        );
        Ok(events)
    }

    pub async fn execute_transfer(&self, params: &TransferParams) -> TrackerResult<String> {
        let wallet = self.wallet()?;
        if params.flags.unwrap_liquid_stake {
            return Err(TrackerError::UnsupportedTransfer(format!(
                "liquid stake unwrap is not available from {}",
                self.ctx.chain_id()
            )));
        }

        let token = &params.amount.token;
        let to = params.destination_address();
        let value = format!("0x{:x}", params.amount.raw);

        let call = if self.ctx.is_bnusd(&token.address) {
            IconCall {
                from: params.account.clone(),
                to: token.address.clone(),
                method: "crossTransfer".to_string(),
                params: json!({ "_to": to, "_value": value, "_data": "0x" }),
                value: params.fee,
            }
        } else if params.flags.native_denom {
            IconCall {
                from: params.account.clone(),
                to: self.ctx.asset_manager()?.to_string(),
                method: "withdrawNativeTo".to_string(),
                params: json!({ "token": token.address, "amount": value, "to": to }),
                value: params.fee,
            }
        } else {
            IconCall {
                from: params.account.clone(),
                to: self.ctx.asset_manager()?.to_string(),
                method: "withdrawTo".to_string(),
                params: json!({ "asset": token.address, "amount": value, "to": to }),
                value: params.fee,
            }
        };

        let method = call.method.clone();
        let hash = wallet.send_call(call).await?;
        info!(
            "Chain {} submitted {} to {} ({})",
            self.ctx.chain_id(),
            method,
            params.destination,
            hash
        );
        Ok(hash)
    }

    pub async fn execute_call(&self, account: &str, req_id: U256, data: &[u8]) -> TrackerResult<String> {
        let wallet = self.wallet()?;
        let hash = wallet
            .send_call(IconCall {
                from: account.to_string(),
                to: self.ctx.xcall().to_string(),
                method: "executeCall".to_string(),
                params: json!({
                    "_reqId": format!("0x{:x}", req_id),
                    "_data": format!("0x{}", hex::encode(data)),
                }),
                value: U256::zero(),
            })
            .await?;
        info!("Chain {} executeCall {} ({})", self.ctx.chain_id(), req_id, hash);
        Ok(hash)
    }

    pub async fn fetch_native_balance(&self, account: &str) -> TrackerResult<U256> {
        self.rpc.balance(account).await
    }
}

/// Event log the xCall score emits when a message is sent
pub fn call_message_sent_log(xcall: &str, from: &str, to: &str, sn: U256) -> IconEventLog {
    IconEventLog {
        score_address: xcall.to_string(),
        indexed: vec![
            Some(signatures::CALL_MESSAGE_SENT.to_string()),
            Some(from.to_string()),
            Some(to.to_string()),
            Some(format!("0x{:x}", sn)),
        ],
        data: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainKind;
    use crate::test_utils::{chain_config, context, token_amount};
    use crate::chain::adapter::TransferFlags;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const XCALL: &str = "cxxcall";

    fn log(indexed: &[&str], data: &[&str]) -> IconEventLog {
        IconEventLog {
            score_address: XCALL.to_string(),
            indexed: indexed.iter().map(|s| Some(s.to_string())).collect(),
            data: data.iter().map(|s| Some(s.to_string())).collect(),
        }
    }

    async fn client(server: &MockServer) -> IconRpcClient {
        IconRpcClient::new("0x1.icon".into(), vec![server.uri()]).unwrap()
    }

    #[test]
    fn test_decode_call_message() {
        let event = decode_event_log(
            &"0x1.icon".into(),
            &log(
                &[signatures::CALL_MESSAGE, "archway-1/archway1xcall", "cxassetmanager", "0x2a"],
                &["0x7", "0x1234"],
            ),
            100,
            "0xabc",
        )
        .unwrap()
        .unwrap();

        assert_eq!(event.sn(), Some(U256::from(42)));
        assert_eq!(event.req_id(), Some(U256::from(7)));
        assert_eq!(event.block_height(), 100);
    }

    #[test]
    fn test_decode_call_executed_failure_code() {
        let event = decode_event_log(
            &"0x1.icon".into(),
            &log(&[signatures::CALL_EXECUTED, "0x7"], &["-0x1", "BalancedRevert"]),
            103,
            "0xdef",
        )
        .unwrap()
        .unwrap();

        assert_eq!(event.req_id(), Some(U256::from(7)));
        assert_eq!(event.is_success(), Some(false));
    }

    #[test]
    fn test_decode_ignores_foreign_events() {
        let transfer = log(&["Transfer(Address,Address,int,bytes)", "hx1", "hx2", "0x1"], &[]);
        assert!(decode_event_log(&"0x1.icon".into(), &transfer, 1, "0x1").unwrap().is_none());

        let truncated = log(&[signatures::ROLLBACK_MESSAGE], &[]);
        assert!(decode_event_log(&"0x1.icon".into(), &truncated, 1, "0x1").is_err());
    }

    #[test]
    fn test_receipt_events_filter_by_score() {
        let adapter = IconAdapter::new(
            context(chain_config("0x1.icon", ChainKind::AccountModel)),
            Arc::new(IconRpcClient::new("0x1.icon".into(), vec!["http://127.0.0.1:9".into()]).unwrap()),
            None,
        );
        let foreign = call_message_sent_log("cxother", "hx1", "archway-1/a", U256::from(1));

        let result = IconTxResult {
            tx_hash: "0xabc".to_string(),
            block_height: "0x10".to_string(),
            status: "0x1".to_string(),
            failure: None,
            event_logs: vec![
                foreign,
                call_message_sent_log(XCALL, "hx1", "archway-1/a", U256::from(5)),
            ],
        };

        let events = adapter.receipt_events(&result);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sn(), Some(U256::from(5)));
        assert_eq!(events[0].block_height(), 16);
    }

    #[tokio::test]
    async fn test_pending_result_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "icx_getTransactionResult"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1,
                "error": {"code": -31002, "message": "Pending: 0xabc"}
            })))
            .mount(&server)
            .await;

        assert!(client(&server).await.transaction_result("0xabc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_block_transactions_skip_base() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "icx_getBlockByHeight", "params": {"height": "0x64"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1,
                "result": {
                    "height": 100,
                    "confirmed_transaction_list": [
                        {"dataType": "base", "txHash": "0x01"},
                        {"dataType": "call", "txHash": "0x02"},
                        {"tx_hash": "03"}
                    ]
                }
            })))
            .mount(&server)
            .await;

        let hashes = client(&server).await.block_transactions(100).await.unwrap();
        assert_eq!(hashes, vec!["0x02".to_string(), "0x03".to_string()]);
    }

    #[tokio::test]
    async fn test_fee_query() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "icx_call",
                "params": {"to": XCALL, "data": {"method": "getFee", "params": {"_net": "archway-1", "_rollback": "0x1"}}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1, "result": "0xde0b6b3a7640000"
            })))
            .mount(&server)
            .await;

        let mut config = chain_config("0x1.icon", ChainKind::AccountModel);
        config.rpc_urls = vec![server.uri()];
        let adapter = IconAdapter::connect(context(config), None).unwrap();

        let fee = adapter.fetch_protocol_fee(&"archway-1".into(), true).await.unwrap();
        assert_eq!(fee, U256::exp10(18));
    }

    fn params(token: &str, flags: TransferFlags) -> TransferParams {
        TransferParams {
            destination: "archway-1".into(),
            amount: token_amount("0x1.icon", token, 1000),
            recipient: "archway1recipient".to_string(),
            account: "hxsender".to_string(),
            fee: U256::from(5),
            with_rollback: true,
            flags,
        }
    }

    #[tokio::test]
    async fn test_bnusd_uses_cross_transfer() {
        let mut wallet = MockIconWallet::new();
        wallet
            .expect_send_call()
            .withf(|call| {
                call.method == "crossTransfer"
                    && call.to == "cxbnusd"
                    && call.params["_to"] == "archway-1/archway1recipient"
                    && call.params["_value"] == "0x3e8"
                    && call.value == U256::from(5)
            })
            .times(1)
            .returning(|_| Ok("0xfeed".to_string()));

        let adapter = IconAdapter::new(
            context(chain_config("0x1.icon", ChainKind::AccountModel)),
            crate::test_utils::FakeIconChain::new("0x1.icon"),
            Some(Arc::new(wallet)),
        );

        let hash = adapter.execute_transfer(&params("cxbnusd", TransferFlags::default())).await.unwrap();
        assert_eq!(hash, "0xfeed");
    }

    #[tokio::test]
    async fn test_other_tokens_use_asset_manager() {
        let mut wallet = MockIconWallet::new();
        wallet
            .expect_send_call()
            .withf(|call| call.method == "withdrawNativeTo" && call.to == "cxassetmanager")
            .times(1)
            .returning(|_| Ok("0xbeef".to_string()));

        let adapter = IconAdapter::new(
            context(chain_config("0x1.icon", ChainKind::AccountModel)),
            crate::test_utils::FakeIconChain::new("0x1.icon"),
            Some(Arc::new(wallet)),
        );

        let flags = TransferFlags {
            native_denom: true,
            unwrap_liquid_stake: false,
        };
        adapter.execute_transfer(&params("cxsicx", flags)).await.unwrap();
    }

    #[tokio::test]
    async fn test_execute_without_wallet() {
        let adapter = IconAdapter::new(
            context(chain_config("0x1.icon", ChainKind::AccountModel)),
            crate::test_utils::FakeIconChain::new("0x1.icon"),
            None,
        );
        let err = adapter
            .execute_transfer(&params("cxbnusd", TransferFlags::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::WalletUnavailable { .. }));
        assert!(err.is_submission_error());
    }
}
