//! Cosmos SDK (CosmWasm) chain adapter
//!
//! Blocks and transactions are read through the CometBFT JSON-RPC endpoint,
//! contract queries and balances through the LCD REST endpoint. The xCall
//! contract emits `wasm-<Event>` events with typed attributes.

use crate::chain::adapter::{wallet_unavailable, AdapterContext, RawReceipt, TransferParams};
use crate::chain::rpc::RpcClient;
use crate::chain::ChainId;
use crate::codec::{parse_i64, parse_u256};
use crate::error::{TrackerError, TrackerResult};
use crate::events::ProtocolEvent;
use crate::transfer::TxStatus;

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use ethers::types::U256;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const TX_SEARCH_PAGE_SIZE: usize = 100;

/// Transaction as returned by CometBFT `tx` and `tx_search`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CosmosTxResult {
    pub hash: String,
    pub height: String,
    pub tx_result: CosmosExecResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CosmosExecResult {
    /// 0 on success
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub log: String,
    #[serde(default)]
    pub events: Vec<CosmosEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CosmosEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Vec<CosmosAttribute>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CosmosAttribute {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
}

impl CosmosTxResult {
    pub fn tx_status(&self) -> TxStatus {
        if self.tx_result.code == 0 {
            TxStatus::Success
        } else {
            TxStatus::Failure
        }
    }

    pub fn height(&self) -> Option<u64> {
        self.height.parse().ok()
    }
}

impl CosmosEvent {
    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.key == key)
            .and_then(|a| a.value.as_deref())
    }

    fn required(&self, key: &str) -> TrackerResult<&str> {
        self.attribute(key)
            .ok_or_else(|| TrackerError::EventParsing(format!("{}: missing attribute {}", self.kind, key)))
    }

    fn integer(&self, key: &str) -> TrackerResult<U256> {
        let raw = self.required(key)?;
        parse_u256(raw)
            .ok_or_else(|| TrackerError::EventParsing(format!("{}: bad {} {}", self.kind, key, raw)))
    }

    fn req_id(&self) -> TrackerResult<U256> {
        if self.attribute("reqId").is_some() {
            self.integer("reqId")
        } else {
            self.integer("req_id")
        }
    }

    fn code(&self) -> TrackerResult<i64> {
        let raw = self.required("code")?;
        parse_i64(raw).ok_or_else(|| TrackerError::EventParsing(format!("{}: bad code {}", self.kind, raw)))
    }
}

/// Decode one wasm event of the xCall contract; `Ok(None)` for anything else
pub fn decode_event(
    chain_id: &ChainId,
    xcall: &str,
    event: &CosmosEvent,
    block_height: u64,
    tx_hash: &str,
) -> TrackerResult<Option<ProtocolEvent>> {
    let Some(name) = event.kind.strip_prefix("wasm-") else {
        return Ok(None);
    };
    if event.attribute("_contract_address") != Some(xcall) {
        return Ok(None);
    }

    let raw = serde_json::to_value(event)?;
    let chain_id = chain_id.clone();
    let tx_hash = tx_hash.to_string();
    let text = |key: &str| event.attribute(key).unwrap_or_default().to_string();

    let decoded = match name {
        "CallMessageSent" => ProtocolEvent::CallMessageSent {
            chain_id,
            sn: event.integer("sn")?,
            from: text("from"),
            to: text("to"),
            block_height,
            tx_hash,
            raw,
        },
        "CallMessage" => ProtocolEvent::CallMessage {
            chain_id,
            sn: event.integer("sn")?,
            req_id: event.req_id()?,
            from: text("from"),
            to: text("to"),
            data: text("data"),
            block_height,
            tx_hash,
            raw,
        },
        "CallExecuted" => ProtocolEvent::CallExecuted {
            chain_id,
            req_id: event.req_id()?,
            code: event.code()?,
            msg: text("msg"),
            block_height,
            tx_hash,
            raw,
        },
        "ResponseMessage" => ProtocolEvent::ResponseMessage {
            chain_id,
            sn: event.integer("sn")?,
            code: event.code()?,
            msg: text("msg"),
            block_height,
            tx_hash,
            raw,
        },
        "RollbackMessage" => ProtocolEvent::RollbackMessage {
            chain_id,
            sn: event.integer("sn")?,
            block_height,
            tx_hash,
            raw,
        },
        _ => return Ok(None),
    };

    Ok(Some(decoded))
}

/// Amount of one denom attached to an execute message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: String,
}

/// Signing client for CosmWasm execute messages
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CosmosSigner: Send + Sync {
    /// Sign and broadcast `MsgExecuteContract`, returning the transaction hash
    async fn execute(
        &self,
        sender: &str,
        contract: &str,
        msg: Value,
        funds: Vec<Coin>,
    ) -> TrackerResult<String>;
}

/// Sum amounts per denom, sorted by denom as the bank module requires
fn coins(amounts: impl IntoIterator<Item = (String, U256)>) -> Vec<Coin> {
    let mut totals: BTreeMap<String, U256> = BTreeMap::new();
    for (denom, amount) in amounts {
        if amount.is_zero() {
            continue;
        }
        let total = totals.entry(denom).or_default();
        *total = total.saturating_add(amount);
    }
    totals
        .into_iter()
        .map(|(denom, amount)| Coin {
            denom,
            amount: amount.to_string(),
        })
        .collect()
}

/// Adapter for Cosmos SDK chains
pub struct CosmosAdapter {
    ctx: AdapterContext,
    rpc: RpcClient,
    lcd: RpcClient,
    signer: Option<Arc<dyn CosmosSigner>>,
}

impl CosmosAdapter {
    pub(crate) fn connect(ctx: AdapterContext, signer: Option<Arc<dyn CosmosSigner>>) -> TrackerResult<Self> {
        let chain_id = ctx.chain_id().clone();
        let lcd_url = ctx.config.lcd_url.clone().ok_or_else(|| {
            TrackerError::Config(format!("Cosmos chain {} has no lcd_url", chain_id))
        })?;

        Ok(Self {
            rpc: RpcClient::new(chain_id.clone(), ctx.config.rpc_urls.clone())?,
            lcd: RpcClient::new(chain_id, vec![lcd_url])?,
            ctx,
            signer,
        })
    }

    pub(crate) fn context(&self) -> &AdapterContext {
        &self.ctx
    }

    pub fn can_sign(&self) -> bool {
        self.signer.is_some()
    }

    fn signer(&self) -> TrackerResult<&Arc<dyn CosmosSigner>> {
        self.signer
            .as_ref()
            .ok_or_else(|| wallet_unavailable(self.ctx.chain_id()))
    }

    fn native_denom(&self) -> TrackerResult<&str> {
        self.ctx.config.native_currency.denom.as_deref().ok_or_else(|| {
            TrackerError::Config(format!("Cosmos chain {} has no native denom", self.ctx.chain_id()))
        })
    }

    pub async fn fetch_block_height(&self) -> TrackerResult<u64> {
        let status: Value = self.rpc.call("status", Value::Null).await?;
        status
            .pointer("/sync_info/latest_block_height")
            .and_then(Value::as_str)
            .and_then(|h| h.parse().ok())
            .ok_or_else(|| TrackerError::rpc(self.ctx.chain_id(), "status without latest_block_height"))
    }

    /// CosmWasm smart query against the LCD
    async fn smart_query(&self, contract: &str, query: &Value) -> TrackerResult<Value> {
        let encoded = URL_SAFE.encode(serde_json::to_vec(query)?);
        let path = format!("/cosmwasm/wasm/v1/contract/{}/smart/{}", contract, encoded);
        let response: Value = self.lcd.get(&path).await?.ok_or_else(|| {
            TrackerError::rpc(self.ctx.chain_id(), format!("contract {} not found", contract))
        })?;
        response
            .get("data")
            .cloned()
            .ok_or_else(|| TrackerError::rpc(self.ctx.chain_id(), "smart query without data"))
    }

    pub async fn fetch_protocol_fee(&self, destination: &ChainId, with_rollback: bool) -> TrackerResult<U256> {
        let query = json!({ "get_fee": { "nid": destination.as_str(), "rollback": with_rollback } });
        let data = self.smart_query(self.ctx.xcall(), &query).await?;

        let fee = match &data {
            Value::String(s) => parse_u256(s),
            Value::Number(n) => n.as_u64().map(U256::from),
            _ => None,
        };
        fee.ok_or_else(|| TrackerError::rpc(self.ctx.chain_id(), format!("bad fee {}", data)))
    }

    pub async fn fetch_transaction_receipt(&self, hash: &str) -> TrackerResult<Option<RawReceipt>> {
        let bytes = hex::decode(hash.trim_start_matches("0x"))
            .map_err(|e| TrackerError::rpc(self.ctx.chain_id(), format!("bad tx hash {}: {}", hash, e)))?;

        match self
            .rpc
            .request::<CosmosTxResult>("tx", json!({ "hash": STANDARD.encode(bytes), "prove": false }))
            .await?
        {
            Ok(result) => Ok(result.map(RawReceipt::Cosmos)),
            // Not indexed yet
            Err(e) if e.mentions("not found") => Ok(None),
            Err(e) => Err(TrackerError::rpc(
                self.ctx.chain_id(),
                format!("tx: {} ({})", e.message, e.code),
            )),
        }
    }

    /// xCall events of a transaction; malformed events are skipped
    pub fn receipt_events(&self, result: &CosmosTxResult) -> Vec<ProtocolEvent> {
        let height = result.height().unwrap_or_default();
        result
            .tx_result
            .events
            .iter()
            .filter_map(|event| {
                match decode_event(self.ctx.chain_id(), self.ctx.xcall(), event, height, &result.hash) {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        warn!("Chain {} skipping event in {}: {}", self.ctx.chain_id(), result.hash, e);
                        None
                    }
                }
            })
            .collect()
    }

    pub async fn fetch_events_for_block(&self, height: u64) -> TrackerResult<Vec<ProtocolEvent>> {
        let mut events = Vec::new();
        let mut seen = 0usize;
        let mut page = 1usize;

        loop {
            let result: Value = self
                .rpc
                .call(
                    "tx_search",
                    json!({
                        "query": format!("tx.height={}", height),
                        "prove": false,
                        "page": page.to_string(),
                        "per_page": TX_SEARCH_PAGE_SIZE.to_string(),
                        "order_by": "asc",
                    }),
                )
                .await?;

            let txs: Vec<CosmosTxResult> =
                serde_json::from_value(result.get("txs").cloned().unwrap_or(Value::Array(vec![])))?;
            let total: usize = result
                .get("total_count")
                .and_then(Value::as_str)
                .and_then(|t| t.parse().ok())
                .unwrap_or(0);

            seen += txs.len();
            for tx in &txs {
                events.extend(self.receipt_events(tx));
            }

            if txs.is_empty() || seen >= total {
                break;
            }
            page += 1;
        }

        debug!(
            "Chain {} block {}: {} txs, {} xCall events",
            self.ctx.chain_id(),
            height,
            seen,
            events.len()
        );
        Ok(events)
    }

    pub async fn execute_transfer(&self, params: &TransferParams) -> TrackerResult<String> {
        let signer = self.signer()?;
        let fee_denom = self.native_denom()?.to_string();
        let token = &params.amount.token;
        let to = params.destination_address();
        let amount = params.amount.raw;

        let (contract, msg, funds) = if self.ctx.is_bnusd(&token.address) {
            (
                token.address.clone(),
                json!({ "cross_transfer": { "to": to, "amount": amount.to_string(), "data": params.payload() } }),
                coins([(fee_denom, params.fee)]),
            )
        } else if params.flags.native_denom {
            (
                self.ctx.asset_manager()?.to_string(),
                json!({ "deposit_denom": { "denom": token.address, "to": to, "data": params.payload() } }),
                coins([(token.address.clone(), amount), (fee_denom, params.fee)]),
            )
        } else {
            (
                self.ctx.asset_manager()?.to_string(),
                json!({
                    "deposit": {
                        "token_address": token.address,
                        "amount": amount.to_string(),
                        "to": to,
                        "data": params.payload(),
                    }
                }),
                coins([(fee_denom, params.fee)]),
            )
        };

        let hash = signer.execute(&params.account, &contract, msg, funds).await?;
        info!(
            "Chain {} submitted transfer to {} via {} ({})",
            self.ctx.chain_id(),
            params.destination,
            contract,
            hash
        );
        Ok(hash)
    }

    pub async fn execute_call(&self, account: &str, req_id: U256, data: &[u8]) -> TrackerResult<String> {
        let signer = self.signer()?;
        let msg = json!({ "execute_call": { "request_id": req_id.to_string(), "data": data } });
        let hash = signer.execute(account, self.ctx.xcall(), msg, vec![]).await?;
        info!("Chain {} execute_call {} ({})", self.ctx.chain_id(), req_id, hash);
        Ok(hash)
    }

    pub async fn fetch_native_balance(&self, account: &str) -> TrackerResult<U256> {
        let denom = self.native_denom()?;
        let path = format!("/cosmos/bank/v1beta1/balances/{}/by_denom?denom={}", account, denom);
        let Some(response) = self.lcd.get::<Value>(&path).await? else {
            return Ok(U256::zero());
        };

        response
            .pointer("/balance/amount")
            .and_then(Value::as_str)
            .and_then(parse_u256)
            .ok_or_else(|| TrackerError::rpc(self.ctx.chain_id(), "balance without amount"))
    }
}
