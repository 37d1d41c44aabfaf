//! In-memory registry of tracked transfers with optional persistence

use crate::chain::RawReceipt;
use crate::error::{TrackerError, TrackerResult};
use crate::events::EventMap;
use crate::state::StateManager;
use crate::transfer::Transfer;

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Ordered store of transfers, newest first.
///
/// Every mutation re-derives the status from the source transaction and the
/// event map, then writes the record through to the store when one is
/// attached.
pub struct TransferRegistry {
    transfers: RwLock<Vec<Transfer>>,
    store: Option<Arc<StateManager>>,
}

impl Default for TransferRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self {
            transfers: RwLock::new(Vec::new()),
            store: None,
        }
    }

    pub fn with_store(store: Arc<StateManager>) -> Self {
        Self {
            transfers: RwLock::new(Vec::new()),
            store: Some(store),
        }
    }

    async fn persist(&self, transfer: &Transfer) -> TrackerResult<()> {
        match &self.store {
            Some(store) => store.save_transfer(transfer).await,
            None => Ok(()),
        }
    }

    /// Replace the in-memory contents with the persisted transfers
    pub async fn load(&self) -> TrackerResult<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };

        let mut loaded = store.load_transfers().await?;
        for transfer in loaded.iter_mut() {
            transfer.rederive();
        }

        let count = loaded.len();
        *self.transfers.write().await = loaded;
        info!("Loaded {} transfers from store", count);
        Ok(count)
    }

    /// Register a new transfer at the head of the list
    pub async fn add(&self, mut transfer: Transfer) -> TrackerResult<Transfer> {
        transfer.rederive();
        {
            let mut transfers = self.transfers.write().await;
            if transfers.iter().any(|t| t.id == transfer.id) {
                return Err(TrackerError::DuplicateTransfer { id: transfer.id });
            }
            transfers.insert(0, transfer.clone());
        }

        if let Err(e) = self.persist(&transfer).await {
            self.transfers.write().await.retain(|t| t.id != transfer.id);
            return Err(e);
        }

        crate::metrics::record_transfer_status(transfer.status);
        info!(
            "Tracking transfer {} ({} -> {})",
            transfer.id, transfer.source_chain, transfer.destination_chain
        );
        Ok(transfer)
    }

    pub async fn get(&self, id: &str) -> Option<Transfer> {
        self.transfers
            .read()
            .await
            .iter()
            .find(|t| t.id == id)
            .cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.transfers.read().await.iter().any(|t| t.id == id)
    }

    /// All transfers, newest first
    pub async fn list(&self) -> Vec<Transfer> {
        self.transfers.read().await.clone()
    }

    /// Transfers that still need polling or a follow-up action
    pub async fn active(&self) -> Vec<Transfer> {
        self.transfers
            .read()
            .await
            .iter()
            .filter(|t| t.is_active())
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.transfers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.transfers.read().await.is_empty()
    }

    /// Apply `f` to a transfer, re-derive its status and persist it
    pub async fn update<F>(&self, id: &str, f: F) -> TrackerResult<Transfer>
    where
        F: FnOnce(&mut Transfer),
    {
        let (updated, changed) = {
            let mut transfers = self.transfers.write().await;
            let transfer = transfers
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| TrackerError::TransferNotFound { id: id.to_string() })?;

            f(transfer);
            let changed = transfer.rederive();
            transfer.updated_at = Utc::now();
            (transfer.clone(), changed)
        };

        if changed {
            crate::metrics::record_transfer_status(updated.status);
            info!("Transfer {} is now {}", updated.id, updated.status);
        } else {
            debug!("Transfer {} updated ({})", updated.id, updated.status);
        }

        self.persist(&updated).await?;
        Ok(updated)
    }

    /// Record a receipt of the source transaction
    pub async fn update_source_transaction(
        &self,
        id: &str,
        receipt: RawReceipt,
    ) -> TrackerResult<Transfer> {
        self.update(id, |t| t.source_transaction.apply_receipt(receipt))
            .await
    }

    /// Merge newly observed events; already known kinds are kept
    pub async fn update_events(&self, id: &str, events: EventMap) -> TrackerResult<Transfer> {
        self.update(id, |t| {
            let added = t.events.merge(events);
            for kind in added {
                crate::metrics::record_transfer_event(kind);
            }
        })
        .await
    }

    pub async fn remove(&self, id: &str) -> TrackerResult<Option<Transfer>> {
        let removed = {
            let mut transfers = self.transfers.write().await;
            transfers
                .iter()
                .position(|t| t.id == id)
                .map(|idx| transfers.remove(idx))
        };

        if removed.is_some() {
            if let Some(store) = &self.store {
                store.delete_transfer(id).await?;
            }
        }
        Ok(removed)
    }

    /// Drop finished transfers not updated within `older_than`
    pub async fn prune(&self, older_than: chrono::Duration) -> TrackerResult<usize> {
        let cutoff = Utc::now() - older_than;
        let pruned: Vec<String> = {
            let mut transfers = self.transfers.write().await;
            let (stale, keep): (Vec<_>, Vec<_>) = transfers
                .drain(..)
                .partition(|t| !t.is_active() && t.updated_at < cutoff);
            *transfers = keep;
            stale.into_iter().map(|t| t.id).collect()
        };

        if let Some(store) = &self.store {
            for id in &pruned {
                store.delete_transfer(id).await?;
            }
        }

        if !pruned.is_empty() {
            info!("Pruned {} finished transfers", pruned.len());
        }
        Ok(pruned.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::events::fixtures::*;
    use crate::events::{EventKind, CODE_SUCCESS};
    use crate::transfer::{Transaction, TransferOutcome, TransferStatus, TxStatus};
    use ethers::types::U256;

    fn transfer(hash: &str) -> Transfer {
        Transfer::new(
            Transaction::pending(hash, "0x1.icon".into()),
            "archway-1".into(),
            99,
        )
    }

    fn succeed(t: &mut Transfer) {
        t.source_transaction.status = TxStatus::Success;
    }

    #[tokio::test]
    async fn test_add_prepends_and_rejects_duplicates() {
        let registry = TransferRegistry::new();
        registry.add(transfer("0x01")).await.unwrap();
        registry.add(transfer("0x02")).await.unwrap();

        let ids: Vec<_> = registry.list().await.into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["0x1.icon/0x02", "0x1.icon/0x01"]);

        let err = registry.add(transfer("0x01")).await.unwrap_err();
        assert!(matches!(err, TrackerError::DuplicateTransfer { .. }));
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_updates_rederive_status() {
        let registry = TransferRegistry::new();
        let id = registry.add(transfer("0x01")).await.unwrap().id;

        let t = registry.update(&id, succeed).await.unwrap();
        assert_eq!(t.status, TransferStatus::AwaitingCallMessageSent);

        let t = registry
            .update_events(&id, [sent("0x1.icon", 42, 100)].into_iter().collect())
            .await
            .unwrap();
        assert_eq!(t.status, TransferStatus::CallMessageSent);
        assert_eq!(t.sn, Some(U256::from(42)));

        let t = registry
            .update_events(
                &id,
                [call_message("archway-1", 42, 7, 200), executed("archway-1", 7, CODE_SUCCESS, 201)]
                    .into_iter()
                    .collect(),
            )
            .await
            .unwrap();
        assert_eq!(t.status, TransferStatus::CallExecuted);
        assert_eq!(t.outcome(), TransferOutcome::Completed);
        assert!(registry.active().await.is_empty());
    }

    #[tokio::test]
    async fn test_first_observed_event_is_kept() {
        let registry = TransferRegistry::new();
        let id = registry.add(transfer("0x01")).await.unwrap().id;

        registry
            .update_events(&id, [call_message("archway-1", 42, 7, 200)].into_iter().collect())
            .await
            .unwrap();
        let t = registry
            .update_events(&id, [call_message("archway-1", 42, 8, 300)].into_iter().collect())
            .await
            .unwrap();

        assert_eq!(t.events.get(EventKind::CallMessage).unwrap().req_id(), Some(U256::from(7)));
    }

    #[tokio::test]
    async fn test_unknown_transfer() {
        let registry = TransferRegistry::new();
        let err = registry.update("nope", succeed).await.unwrap_err();
        assert!(matches!(err, TrackerError::TransferNotFound { .. }));
        assert!(registry.remove("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persisted_registry_reloads() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("registry.db").display()),
            max_connections: 1,
        };
        let store = Arc::new(StateManager::new(&config).await.unwrap());
        store.run_migrations().await.unwrap();

        let registry = TransferRegistry::with_store(store.clone());
        let id = registry.add(transfer("0x01")).await.unwrap().id;
        registry.add(transfer("0x02")).await.unwrap();
        registry.update(&id, succeed).await.unwrap();
        registry.remove("0x1.icon/0x02").await.unwrap();

        let reloaded = TransferRegistry::with_store(store);
        assert_eq!(reloaded.load().await.unwrap(), 1);
        assert_eq!(
            reloaded.get(&id).await.unwrap().status,
            TransferStatus::AwaitingCallMessageSent
        );
    }

    #[tokio::test]
    async fn test_failed_store_write_registers_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("empty.db").display()),
            max_connections: 1,
        };
        // No migrations: the transfers table is missing
        let store = Arc::new(StateManager::new(&config).await.unwrap());
        let registry = TransferRegistry::with_store(store.clone());

        assert!(registry.add(transfer("0x01")).await.is_err());
        assert!(registry.is_empty().await);

        store.run_migrations().await.unwrap();
        let added = registry.add(transfer("0x01")).await.unwrap();
        assert_eq!(added.id, "0x1.icon/0x01");
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_prune_keeps_active() {
        let registry = TransferRegistry::new();
        let failed = registry.add(transfer("0x01")).await.unwrap().id;
        registry.add(transfer("0x02")).await.unwrap();
        registry
            .update(&failed, |t| t.source_transaction.status = TxStatus::Failure)
            .await
            .unwrap();

        assert_eq!(registry.prune(chrono::Duration::hours(1)).await.unwrap(), 0);
        assert_eq!(registry.prune(chrono::Duration::seconds(-1)).await.unwrap(), 1);
        assert!(registry.get(&failed).await.is_none());
        assert_eq!(registry.len().await, 1);
    }
}
