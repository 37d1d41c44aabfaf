//! Transfer orchestrator: submission, tracking and terminal reactions

use super::{GasStatus, TrackRequest, TransferRequest};
use crate::chain::{wait_for, ChainId, ChainManager, RetryPolicy};
use crate::config::TrackerConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::events::{EventKind, ProtocolEvent};
use crate::fee::FeeQuoter;
use crate::scanner::{EventCorrelator, EventScanner};
use crate::transfer::{Transaction, Transfer, TransferOutcome, TransferRegistry, TransferStatus, TxStatus};

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Finished transfers are kept this long before pruning
const RETENTION_HOURS: i64 = 24;

/// Coordinates transfers from submission to their final outcome
pub struct TransferOrchestrator {
    chains: Arc<ChainManager>,
    fees: Arc<FeeQuoter>,
    scanner: Arc<EventScanner>,
    correlator: EventCorrelator,
    registry: Arc<TransferRegistry>,
    config: TrackerConfig,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl TransferOrchestrator {
    pub fn new(
        chains: Arc<ChainManager>,
        fees: Arc<FeeQuoter>,
        scanner: Arc<EventScanner>,
        registry: Arc<TransferRegistry>,
        config: TrackerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            correlator: EventCorrelator::new(scanner.clone()),
            retry: RetryPolicy::from(&config),
            chains,
            fees,
            scanner,
            registry,
            config,
            cancel,
        }
    }

    pub fn chains(&self) -> &Arc<ChainManager> {
        &self.chains
    }

    pub fn fees(&self) -> &Arc<FeeQuoter> {
        &self.fees
    }

    pub fn scanner(&self) -> &Arc<EventScanner> {
        &self.scanner
    }

    pub fn registry(&self) -> &Arc<TransferRegistry> {
        &self.registry
    }

    /// Submit a transfer and start tracking it.
    ///
    /// Submission errors propagate unchanged and leave nothing registered.
    /// Once the transaction is broadcast, failures to register it surface as
    /// [`TrackerError::Registration`] carrying the hash.
    pub async fn execute_transfer(&self, request: TransferRequest) -> TrackerResult<Transfer> {
        let source = self.chains.adapter(&request.source_chain)?;
        let fee = self
            .fees
            .resolve(
                &request.source_chain,
                &request.destination_chain,
                request.with_rollback,
                request.fee,
            )
            .await?;

        let hash = match source.execute_transfer(&request.params(fee)).await {
            Ok(hash) => hash,
            Err(e) => {
                warn!(
                    "Transfer {} -> {} rejected: {}",
                    request.source_chain, request.destination_chain, e
                );
                crate::metrics::record_submission_failure(&request.source_chain);
                return Err(e);
            }
        };
        crate::metrics::record_transfer_submitted(&request.source_chain);

        let registration = async {
            let start = self.scan_start_height(&request.destination_chain).await?;
            let transaction = Transaction::pending(hash.clone(), request.source_chain.clone())
                .with_messages(request.messages.clone());

            let mut transfer = Transfer::new(transaction, request.destination_chain.clone(), start);
            transfer.amount = Some(request.amount.clone());
            transfer.fee = fee;
            transfer.recipient = request.recipient.clone();
            transfer.account = request.account.clone();
            transfer.with_rollback = request.with_rollback;
            transfer.child_destination = request.child_destination.clone();

            self.registry.add(transfer).await
        };

        let transfer = registration.await.map_err(|e| TrackerError::Registration {
            tx_hash: hash.clone(),
            message: e.to_string(),
        })?;

        self.start_destination_scanner(&transfer).await;
        Ok(transfer)
    }

    /// Track a transaction that was submitted outside the tracker
    pub async fn track_submitted(&self, request: TrackRequest) -> TrackerResult<Transfer> {
        self.chains.adapter(&request.source_chain)?;
        let start = match request.destination_start_height {
            Some(height) => height,
            None => self.scan_start_height(&request.destination_chain).await?,
        };

        let mut transfer = Transfer::new(
            Transaction::pending(request.tx_hash, request.source_chain),
            request.destination_chain,
            start,
        );
        transfer.recipient = request.recipient;
        transfer.account = request.account;
        transfer.with_rollback = request.with_rollback;
        transfer.child_destination = request.child_destination;

        let transfer = self.registry.add(transfer).await?;
        self.start_destination_scanner(&transfer).await;
        Ok(transfer)
    }

    /// Restart scanners for transfers loaded from the store
    pub async fn resume(&self) -> TrackerResult<usize> {
        let active = self.registry.active().await;
        for transfer in &active {
            if !transfer.status.is_terminal() {
                self.start_destination_scanner(transfer).await;
            }
            if let (TransferOutcome::RollbackRequired, Some(from)) =
                (transfer.outcome(), transfer.origin_start_height)
            {
                self.scanner.start(&transfer.source_chain, from).await?;
            }
        }

        info!("Resumed {} active transfers", active.len());
        Ok(active.len())
    }

    /// Destination height minus one: an event landing in the current block is
    /// still scanned. Falls back to the scanner's last observed height.
    async fn scan_start_height(&self, chain_id: &ChainId) -> TrackerResult<u64> {
        let adapter = self.chains.adapter(chain_id)?;
        let adapter = &adapter;
        let height = wait_for(
            &format!("block height of {}", chain_id),
            &self.retry,
            &self.cancel,
            || async move { adapter.fetch_block_height().await.map(Some) },
        )
        .await;

        let height = match height {
            Some(height) => height,
            None => self
                .scanner
                .last_observed_height(chain_id)
                .await
                .ok_or_else(|| TrackerError::Timeout {
                    operation: format!("block height of {}", chain_id),
                })?,
        };
        Ok(height.saturating_sub(1))
    }

    async fn start_destination_scanner(&self, transfer: &Transfer) {
        if let Err(e) = self
            .scanner
            .start(&transfer.destination_chain, transfer.destination_start_height)
            .await
        {
            warn!("Cannot scan {} for {}: {}", transfer.destination_chain, transfer.id, e);
        }
    }

    /// Start a stopped scanner; a running one keeps its cursor
    async fn ensure_scanning(&self, chain_id: &ChainId, from: u64) -> TrackerResult<()> {
        if self.scanner.is_running(chain_id).await {
            return Ok(());
        }
        self.scanner.start(chain_id, from).await
    }

    /// Fetch the source receipt while the source transaction is pending
    pub async fn sync_source_transaction(&self, id: &str) -> TrackerResult<Transfer> {
        let transfer = self.get(id).await?;
        if transfer.source_transaction.status.is_final() {
            return Ok(transfer);
        }

        let source = self.chains.adapter(&transfer.source_chain)?;
        match source
            .fetch_transaction_receipt(&transfer.source_transaction.hash)
            .await?
        {
            Some(receipt) => self.registry.update_source_transaction(id, receipt).await,
            None => Ok(transfer),
        }
    }

    /// Decode `CallMessageSent` from a confirmed source transaction
    pub async fn sync_source_events(&self, id: &str) -> TrackerResult<Transfer> {
        let transfer = self.get(id).await?;
        if transfer.source_transaction.status != TxStatus::Success
            || transfer.events.contains(EventKind::CallMessageSent)
        {
            return Ok(transfer);
        }

        let source = self.chains.adapter(&transfer.source_chain)?;
        let events = source.fetch_source_events(&transfer).await?;
        if events.is_empty() {
            return Ok(transfer);
        }
        self.registry.update_events(id, events).await
    }

    /// Merge destination events correlated by `sn`
    pub async fn sync_destination_events(&self, id: &str) -> TrackerResult<Transfer> {
        let transfer = self.get(id).await?;
        let Some(sn) = transfer.sn else {
            return Ok(transfer);
        };
        if transfer.status.is_terminal() {
            return Ok(transfer);
        }

        self.ensure_scanning(&transfer.destination_chain, transfer.destination_start_height)
            .await?;
        let events = self.correlator.destination_events_from(
            &transfer.destination_chain,
            sn,
            &transfer.source_chain,
        );
        if events.kinds().all(|kind| transfer.events.contains(kind)) {
            return Ok(transfer);
        }

        let updated = self.registry.update_events(id, events).await?;
        if updated.status == TransferStatus::CallExecuted {
            let latency = (Utc::now() - updated.created_at).num_milliseconds() as f64 / 1000.0;
            crate::metrics::record_transfer_latency(&updated.destination_chain, latency);
        }
        Ok(updated)
    }

    /// One polling step for a transfer: source receipt, source events,
    /// destination events, then the reaction to execution
    pub async fn poll_transfer(&self, id: &str) -> TrackerResult<Transfer> {
        self.sync_source_transaction(id).await?;
        self.sync_source_events(id).await?;
        let transfer = self.sync_destination_events(id).await?;

        if transfer.status == TransferStatus::CallExecuted {
            return self.on_executed(transfer).await;
        }
        if transfer.status == TransferStatus::TransferFailed {
            info!("Source transaction of {} failed", transfer.id);
            self.release_scanners().await;
        }
        Ok(transfer)
    }

    async fn on_executed(&self, transfer: Transfer) -> TrackerResult<Transfer> {
        let transfer = match transfer.outcome() {
            TransferOutcome::Completed if transfer.child_pending() => self.spawn_child(transfer).await?,
            TransferOutcome::RollbackRequired => self.await_rollback(transfer).await?,
            _ => transfer,
        };

        self.release_scanners().await;
        Ok(transfer)
    }

    /// Watch the origin chain for the rollback of a failed execution
    async fn await_rollback(&self, transfer: Transfer) -> TrackerResult<Transfer> {
        let Some(sn) = transfer.sn else {
            return Ok(transfer);
        };

        let transfer = match transfer.origin_start_height {
            Some(from) => {
                self.ensure_scanning(&transfer.source_chain, from).await?;
                transfer
            }
            None => {
                let from = match transfer.source_block_height() {
                    Some(height) => height,
                    None => self.scan_start_height(&transfer.source_chain).await?,
                };
                info!(
                    "Execution of {} failed, watching {} for rollback from block {}",
                    transfer.id, transfer.source_chain, from
                );
                let updated = self
                    .registry
                    .update(&transfer.id, |t| t.origin_start_height = Some(from))
                    .await?;
                // A scanner already running for other transfers moves back to `from`
                self.scanner.start(&updated.source_chain, from).await?;
                updated
            }
        };

        let events = self.correlator.origin_events(&transfer.source_chain, sn);
        if events.kinds().all(|kind| transfer.events.contains(kind)) {
            return Ok(transfer);
        }

        let updated = self.registry.update_events(&transfer.id, events).await?;
        if updated.outcome() == TransferOutcome::RolledBack {
            info!("Transfer {} rolled back", updated.id);
        }
        Ok(updated)
    }

    /// Create the single follow-up transfer sent by the destination execution
    async fn spawn_child(&self, parent: Transfer) -> TrackerResult<Transfer> {
        let executed_in = parent
            .events
            .get(EventKind::CallExecuted)
            .map(|e| e.tx_hash().to_string());
        let (Some(child_destination), Some(executed_in)) = (parent.child_destination.clone(), executed_in) else {
            return Ok(parent);
        };

        let start = self.scan_start_height(&child_destination).await?;
        let transaction = Transaction::pending(executed_in, parent.destination_chain.clone());
        let mut child = Transfer::new(transaction, child_destination, start);
        child.parent_transfer_id = Some(parent.id.clone());
        child.recipient = parent.recipient.clone();
        child.account = parent.account.clone();

        let child = match self.registry.add(child).await {
            Ok(child) => child,
            Err(TrackerError::DuplicateTransfer { id }) => self.get(&id).await?,
            Err(e) => return Err(e),
        };
        info!("Transfer {} continues as {}", parent.id, child.id);
        self.start_destination_scanner(&child).await;

        let child_id = child.id.clone();
        self.registry
            .update(&parent.id, |t| t.child_transfer_id = Some(child_id))
            .await
    }

    /// Stop scanners no active transfer needs; trim caches of the others
    async fn release_scanners(&self) {
        let mut needed: HashMap<ChainId, u64> = HashMap::new();
        let mut need = |chain: &ChainId, from: u64| {
            needed
                .entry(chain.clone())
                .and_modify(|h| *h = (*h).min(from))
                .or_insert(from);
        };

        for transfer in self.registry.active().await {
            if !transfer.status.is_terminal() {
                need(&transfer.destination_chain, transfer.destination_start_height);
            }
            if let (TransferOutcome::RollbackRequired, Some(from)) =
                (transfer.outcome(), transfer.origin_start_height)
            {
                need(&transfer.source_chain, from);
            }
        }

        for chain_id in self.scanner.chain_ids() {
            match needed.get(&chain_id) {
                Some(from) => {
                    let pruned = self.scanner.prune_below(&chain_id, *from);
                    if pruned > 0 {
                        debug!("Pruned {} cached blocks of {}", pruned, chain_id);
                    }
                }
                None => {
                    if self.scanner.is_running(&chain_id).await {
                        self.scanner.stop(&chain_id).await;
                    }
                }
            }
        }
    }

    /// Trigger execution of a delivered message on a chain without auto-execution
    pub async fn execute_call(&self, id: &str, account: &str) -> TrackerResult<String> {
        let transfer = self.get(id).await?;
        let invalid = |action: &str| TrackerError::InvalidTransferState {
            id: id.to_string(),
            action: action.to_string(),
        };

        let adapter = self.chains.adapter(&transfer.destination_chain)?;
        if adapter.config().auto_execution {
            return Err(invalid("be executed manually on an auto-executing chain"));
        }
        if transfer.events.contains(EventKind::CallExecuted) {
            return Err(invalid("be executed twice"));
        }

        let Some(ProtocolEvent::CallMessage { req_id, data, .. }) =
            transfer.events.get(EventKind::CallMessage)
        else {
            return Err(invalid("be executed before delivery"));
        };

        let payload = hex::decode(data.trim_start_matches("0x"))
            .map_err(|e| TrackerError::EventParsing(format!("call data of {}: {}", id, e)))?;
        let hash = adapter.execute_call(account, *req_id, &payload).await?;
        info!("Requested execution of {} ({})", transfer.id, hash);
        Ok(hash)
    }

    /// Compare an account's native balance with the chain's gas threshold
    pub async fn gas_check(&self, chain_id: &ChainId, account: &str) -> TrackerResult<GasStatus> {
        let adapter = self.chains.adapter(chain_id)?;
        let balance = adapter.fetch_native_balance(account).await?;

        let decimals = adapter.config().native_currency.decimals as u32;
        let balance_native = ethers::utils::format_units(balance, decimals)
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or_default();
        let threshold = adapter.config().gas_threshold;

        crate::metrics::record_native_balance(chain_id, balance_native);
        Ok(GasStatus {
            chain_id: chain_id.clone(),
            account: account.to_string(),
            balance,
            balance_native,
            threshold,
            sufficient: balance_native >= threshold,
        })
    }

    /// Poll every active transfer once; per-transfer errors are logged
    pub async fn poll_all(&self) -> usize {
        let active = self.registry.active().await;
        for transfer in &active {
            if let Err(e) = self.poll_transfer(&transfer.id).await {
                if e.is_retryable() {
                    debug!("Polling {} failed: {}", transfer.id, e);
                } else {
                    warn!("Polling {} failed: {}", transfer.id, e);
                }
            }
        }

        let remaining = self.registry.active().await.len();
        crate::metrics::record_active_transfers(remaining);
        remaining
    }

    /// Main polling loop
    pub async fn run(&self, cancel: CancellationToken) -> TrackerResult<()> {
        let mut poll_interval = interval(self.config.poll_interval());
        let mut health_interval =
            interval(Duration::from_secs(self.config.health_check_interval_secs.max(1)));
        let mut cleanup_interval = interval(Duration::from_secs(300));

        info!("Transfer orchestrator started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                _ = poll_interval.tick() => {
                    self.poll_all().await;
                }

                _ = health_interval.tick() => {
                    let checks = self.chains.health_check().await;
                    if checks.iter().all(|(_, healthy)| *healthy) {
                        crate::metrics::record_health_check();
                    } else {
                        crate::metrics::record_health_check_failure();
                    }
                }

                _ = cleanup_interval.tick() => {
                    if let Err(e) = self.registry.prune(chrono::Duration::hours(RETENTION_HOURS)).await {
                        error!("Pruning transfers failed: {}", e);
                    }
                }
            }
        }

        self.scanner.stop_all().await;
        info!("Transfer orchestrator stopped");
        Ok(())
    }

    async fn get(&self, id: &str) -> TrackerResult<Transfer> {
        self.registry
            .get(id)
            .await
            .ok_or_else(|| TrackerError::TransferNotFound { id: id.to_string() })
    }
}
