//! xCall protocol events and the per-transfer event map
//!
//! Every chain kind decodes its native logs into [`ProtocolEvent`]. `sn` is
//! assigned by the origin router and correlates a transfer end to end;
//! `req_id` is assigned by the destination router and only links
//! `CallMessage` to `CallExecuted`.

use crate::chain::ChainId;
use crate::codec;

use ethers::types::U256;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Result code of a successful execution or response
pub const CODE_SUCCESS: i64 = 1;

/// Decoded xCall event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProtocolEvent {
    /// Emitted on the origin chain by the send transaction
    CallMessageSent {
        chain_id: ChainId,
        #[serde(with = "codec::u256_dec")]
        sn: U256,
        from: String,
        to: String,
        block_height: u64,
        tx_hash: String,
        #[serde(default)]
        raw: Value,
    },

    /// Message delivered and queued on the destination chain
    CallMessage {
        chain_id: ChainId,
        #[serde(with = "codec::u256_dec")]
        sn: U256,
        #[serde(with = "codec::u256_dec")]
        req_id: U256,
        from: String,
        to: String,
        /// Hex encoded call payload, needed to execute manually
        data: String,
        block_height: u64,
        tx_hash: String,
        #[serde(default)]
        raw: Value,
    },

    /// Queued message executed on the destination chain
    CallExecuted {
        chain_id: ChainId,
        #[serde(with = "codec::u256_dec")]
        req_id: U256,
        code: i64,
        msg: String,
        block_height: u64,
        tx_hash: String,
        #[serde(default)]
        raw: Value,
    },

    /// Response delivered back to the origin chain
    ResponseMessage {
        chain_id: ChainId,
        #[serde(with = "codec::u256_dec")]
        sn: U256,
        code: i64,
        #[serde(default)]
        msg: String,
        block_height: u64,
        tx_hash: String,
        #[serde(default)]
        raw: Value,
    },

    /// Rollback is available on the origin chain
    RollbackMessage {
        chain_id: ChainId,
        #[serde(with = "codec::u256_dec")]
        sn: U256,
        block_height: u64,
        tx_hash: String,
        #[serde(default)]
        raw: Value,
    },
}

/// Discriminant of [`ProtocolEvent`], used as the event map key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    CallMessageSent,
    CallMessage,
    CallExecuted,
    ResponseMessage,
    RollbackMessage,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::CallMessageSent => "CallMessageSent",
            EventKind::CallMessage => "CallMessage",
            EventKind::CallExecuted => "CallExecuted",
            EventKind::ResponseMessage => "ResponseMessage",
            EventKind::RollbackMessage => "RollbackMessage",
        };
        f.write_str(name)
    }
}

impl ProtocolEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ProtocolEvent::CallMessageSent { .. } => EventKind::CallMessageSent,
            ProtocolEvent::CallMessage { .. } => EventKind::CallMessage,
            ProtocolEvent::CallExecuted { .. } => EventKind::CallExecuted,
            ProtocolEvent::ResponseMessage { .. } => EventKind::ResponseMessage,
            ProtocolEvent::RollbackMessage { .. } => EventKind::RollbackMessage,
        }
    }

    /// Get event name for metrics
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolEvent::CallMessageSent { .. } => "call_message_sent",
            ProtocolEvent::CallMessage { .. } => "call_message",
            ProtocolEvent::CallExecuted { .. } => "call_executed",
            ProtocolEvent::ResponseMessage { .. } => "response_message",
            ProtocolEvent::RollbackMessage { .. } => "rollback_message",
        }
    }

    pub fn chain_id(&self) -> &ChainId {
        match self {
            ProtocolEvent::CallMessageSent { chain_id, .. }
            | ProtocolEvent::CallMessage { chain_id, .. }
            | ProtocolEvent::CallExecuted { chain_id, .. }
            | ProtocolEvent::ResponseMessage { chain_id, .. }
            | ProtocolEvent::RollbackMessage { chain_id, .. } => chain_id,
        }
    }

    /// Sequence number; `CallExecuted` carries none
    pub fn sn(&self) -> Option<U256> {
        match self {
            ProtocolEvent::CallMessageSent { sn, .. }
            | ProtocolEvent::CallMessage { sn, .. }
            | ProtocolEvent::ResponseMessage { sn, .. }
            | ProtocolEvent::RollbackMessage { sn, .. } => Some(*sn),
            ProtocolEvent::CallExecuted { .. } => None,
        }
    }

    pub fn req_id(&self) -> Option<U256> {
        match self {
            ProtocolEvent::CallMessage { req_id, .. } | ProtocolEvent::CallExecuted { req_id, .. } => {
                Some(*req_id)
            }
            _ => None,
        }
    }

    pub fn block_height(&self) -> u64 {
        match self {
            ProtocolEvent::CallMessageSent { block_height, .. }
            | ProtocolEvent::CallMessage { block_height, .. }
            | ProtocolEvent::CallExecuted { block_height, .. }
            | ProtocolEvent::ResponseMessage { block_height, .. }
            | ProtocolEvent::RollbackMessage { block_height, .. } => *block_height,
        }
    }

    pub fn tx_hash(&self) -> &str {
        match self {
            ProtocolEvent::CallMessageSent { tx_hash, .. }
            | ProtocolEvent::CallMessage { tx_hash, .. }
            | ProtocolEvent::CallExecuted { tx_hash, .. }
            | ProtocolEvent::ResponseMessage { tx_hash, .. }
            | ProtocolEvent::RollbackMessage { tx_hash, .. } => tx_hash,
        }
    }

    /// Execution or response succeeded; `None` for events without a result code
    pub fn is_success(&self) -> Option<bool> {
        match self {
            ProtocolEvent::CallExecuted { code, .. } | ProtocolEvent::ResponseMessage { code, .. } => {
                Some(*code == CODE_SUCCESS)
            }
            _ => None,
        }
    }
}

/// Partial map of the events observed for one transfer.
///
/// The first event of each kind wins; later observations never replace it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventMap(BTreeMap<EventKind, ProtocolEvent>);

impl EventMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless an event of the same kind is already present
    pub fn insert(&mut self, event: ProtocolEvent) -> bool {
        match self.0.entry(event.kind()) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(event);
                true
            }
            std::collections::btree_map::Entry::Occupied(_) => false,
        }
    }

    /// Merge another partial map, returning the kinds that were new
    pub fn merge(&mut self, other: EventMap) -> Vec<EventKind> {
        other
            .0
            .into_values()
            .filter_map(|event| {
                let kind = event.kind();
                self.insert(event).then_some(kind)
            })
            .collect()
    }

    pub fn get(&self, kind: EventKind) -> Option<&ProtocolEvent> {
        self.0.get(&kind)
    }

    pub fn contains(&self, kind: EventKind) -> bool {
        self.0.contains_key(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = EventKind> + '_ {
        self.0.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<ProtocolEvent> for EventMap {
    fn from_iter<I: IntoIterator<Item = ProtocolEvent>>(iter: I) -> Self {
        let mut map = EventMap::new();
        for event in iter {
            map.insert(event);
        }
        map
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn sent(chain: &str, sn: u64, height: u64) -> ProtocolEvent {
        ProtocolEvent::CallMessageSent {
            chain_id: chain.into(),
            sn: U256::from(sn),
            from: "hx0000000000000000000000000000000000000001".to_string(),
            to: "archway-1/archway1recipient".to_string(),
            block_height: height,
            tx_hash: format!("0xsent{}", sn),
            raw: Value::Null,
        }
    }

    pub fn call_message(chain: &str, sn: u64, req_id: u64, height: u64) -> ProtocolEvent {
        ProtocolEvent::CallMessage {
            chain_id: chain.into(),
            sn: U256::from(sn),
            req_id: U256::from(req_id),
            from: "0x1.icon/cx0000000000000000000000000000000000000002".to_string(),
            to: "archway1assetmanager".to_string(),
            data: "0x".to_string(),
            block_height: height,
            tx_hash: format!("0xmsg{}", req_id),
            raw: Value::Null,
        }
    }

    pub fn executed(chain: &str, req_id: u64, code: i64, height: u64) -> ProtocolEvent {
        ProtocolEvent::CallExecuted {
            chain_id: chain.into(),
            req_id: U256::from(req_id),
            code,
            msg: if code == CODE_SUCCESS { String::new() } else { "reverted".to_string() },
            block_height: height,
            tx_hash: format!("0xexec{}", req_id),
            raw: Value::Null,
        }
    }

    pub fn rollback(chain: &str, sn: u64, height: u64) -> ProtocolEvent {
        ProtocolEvent::RollbackMessage {
            chain_id: chain.into(),
            sn: U256::from(sn),
            block_height: height,
            tx_hash: format!("0xrollback{}", sn),
            raw: Value::Null,
        }
    }

    pub fn response(chain: &str, sn: u64, code: i64, height: u64) -> ProtocolEvent {
        ProtocolEvent::ResponseMessage {
            chain_id: chain.into(),
            sn: U256::from(sn),
            code,
            msg: String::new(),
            block_height: height,
            tx_hash: format!("0xresponse{}", sn),
            raw: Value::Null,
        }
    }
}
