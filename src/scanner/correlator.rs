//! Assembles a transfer's protocol events from the scanner caches

use crate::chain::ChainId;
use crate::events::{EventKind, EventMap, ProtocolEvent};
use crate::scanner::EventScanner;

use ethers::types::U256;
use std::sync::Arc;

/// Looks up events by sequence number in already scanned blocks.
/// Blocks are walked in ascending height, so the earliest event of a kind wins.
pub struct EventCorrelator {
    scanner: Arc<EventScanner>,
}

impl EventCorrelator {
    pub fn new(scanner: Arc<EventScanner>) -> Self {
        Self { scanner }
    }

    /// Destination-side events of a message: `CallMessage` by `sn`, then
    /// `CallExecuted` by the delivered `reqId`
    pub fn destination_events(&self, chain_id: &ChainId, sn: U256) -> EventMap {
        self.collect_destination(chain_id, sn, None)
    }

    /// Like [`destination_events`](Self::destination_events), but ignores
    /// deliveries whose sender network is not `origin`
    pub fn destination_events_from(&self, chain_id: &ChainId, sn: U256, origin: &ChainId) -> EventMap {
        self.collect_destination(chain_id, sn, Some(origin))
    }

    fn collect_destination(&self, chain_id: &ChainId, sn: U256, origin: Option<&ChainId>) -> EventMap {
        let blocks = self.scanner.cached_blocks(chain_id);
        let mut events = EventMap::new();

        for event in blocks.iter().flat_map(|(_, events)| events) {
            if event.kind() == EventKind::CallMessage
                && event.sn() == Some(sn)
                && origin.map_or(true, |o| sent_from(event, o))
            {
                events.insert(event.clone());
            }
        }

        let Some(req_id) = events.get(EventKind::CallMessage).and_then(|e| e.req_id()) else {
            return events;
        };

        if let Some(executed) = blocks
            .iter()
            .flat_map(|(_, events)| events)
            .find(|e| e.kind() == EventKind::CallExecuted && e.req_id() == Some(req_id))
        {
            events.insert(executed.clone());
        }
        events
    }

    /// Origin-side replies to a message: `ResponseMessage` and `RollbackMessage`
    pub fn origin_events(&self, chain_id: &ChainId, sn: U256) -> EventMap {
        self.scanner
            .cached_blocks(chain_id)
            .iter()
            .flat_map(|(_, events)| events)
            .filter(|e| {
                matches!(e.kind(), EventKind::ResponseMessage | EventKind::RollbackMessage)
                    && e.sn() == Some(sn)
            })
            .cloned()
            .collect()
    }
}

/// Sender network of a delivered message matches `origin`. Senders without a
/// readable network prefix (hashed on EVM) are accepted.
fn sent_from(event: &ProtocolEvent, origin: &ChainId) -> bool {
    match event {
        ProtocolEvent::CallMessage { from, .. } => match from.rsplit_once('/') {
            Some((network, _)) => network == origin.as_str(),
            None => true,
        },
        _ => true,
    }
}
