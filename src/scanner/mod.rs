//! Per-chain block scanners
//!
//! Each started chain gets a forward-only cursor that follows the chain
//! height. Every scanned block's decoded xCall events are cached by height so
//! the correlator can assemble a transfer's events without re-fetching.

mod correlator;

pub use correlator::EventCorrelator;

use crate::chain::{ChainAdapter, ChainId, ChainManager};
use crate::config::ScannerConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::events::ProtocolEvent;

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct ScanState {
    enabled: bool,
    start_height: u64,
    /// Last scanned height
    cursor: u64,
    /// Highest height reported by the chain
    chain_height: u64,
}

struct ChainScanner {
    adapter: Arc<ChainAdapter>,
    state: RwLock<ScanState>,
    cache: DashMap<u64, Vec<ProtocolEvent>>,
    fetches: AtomicU64,
    driver_spawned: AtomicBool,
}

impl ChainScanner {
    fn new(adapter: Arc<ChainAdapter>) -> Self {
        Self {
            adapter,
            state: RwLock::new(ScanState::default()),
            cache: DashMap::new(),
            fetches: AtomicU64::new(0),
            driver_spawned: AtomicBool::new(false),
        }
    }

    async fn is_enabled(&self) -> bool {
        self.state.read().await.enabled
    }
}

/// Point-in-time view of one chain's scanner
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScannerSnapshot {
    pub chain_id: ChainId,
    pub enabled: bool,
    pub start_height: u64,
    pub cursor: u64,
    pub chain_height: u64,
    pub cached_blocks: usize,
    pub fetches: u64,
}

/// Owns the scanners of all chains
pub struct EventScanner {
    chains: Arc<ChainManager>,
    config: ScannerConfig,
    scanners: DashMap<ChainId, Arc<ChainScanner>>,
    started: Notify,
}

impl EventScanner {
    pub fn new(chains: Arc<ChainManager>, config: ScannerConfig) -> Self {
        Self {
            chains,
            config,
            scanners: DashMap::new(),
            started: Notify::new(),
        }
    }

    fn scanner(&self, chain_id: &ChainId) -> TrackerResult<Arc<ChainScanner>> {
        self.scanners
            .get(chain_id)
            .map(|s| s.value().clone())
            .ok_or_else(|| TrackerError::ScannerNotStarted {
                chain_id: chain_id.clone(),
            })
    }

    /// Start scanning after `from`. Idempotent: a running scanner only moves
    /// its cursor back, a stopped one is reset.
    pub async fn start(&self, chain_id: &ChainId, from: u64) -> TrackerResult<()> {
        let existing = self.scanners.get(chain_id).map(|s| s.value().clone());
        let scanner = match existing {
            Some(s) => s,
            None => {
                let adapter = self.chains.adapter(chain_id)?;
                self.scanners
                    .entry(chain_id.clone())
                    .or_insert_with(|| Arc::new(ChainScanner::new(adapter)))
                    .value()
                    .clone()
            }
        };

        let cursor = {
            let mut state = scanner.state.write().await;
            if state.enabled {
                if from < state.cursor {
                    debug!("Scanner {} cursor moved back {} -> {}", chain_id, state.cursor, from);
                    state.cursor = from;
                }
            } else {
                info!("Scanner {} started after block {}", chain_id, from);
                state.enabled = true;
                state.start_height = from;
                state.cursor = from;
            }
            state.cursor
        };

        crate::metrics::record_scanner_active(chain_id, true);
        crate::metrics::record_scanner_cursor(chain_id, cursor);
        self.started.notify_one();
        Ok(())
    }

    /// Disable a scanner; its cache is retained
    pub async fn stop(&self, chain_id: &ChainId) {
        if let Some(scanner) = self.scanners.get(chain_id).map(|s| s.value().clone()) {
            let mut state = scanner.state.write().await;
            if state.enabled {
                state.enabled = false;
                info!("Scanner {} stopped at block {}", chain_id, state.cursor);
            }
            crate::metrics::record_scanner_active(chain_id, false);
        }
    }

    pub async fn stop_all(&self) {
        for chain_id in self.chain_ids() {
            self.stop(&chain_id).await;
        }
    }

    pub fn chain_ids(&self) -> Vec<ChainId> {
        let mut ids: Vec<_> = self.scanners.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub async fn is_running(&self, chain_id: &ChainId) -> bool {
        match self.scanner(chain_id) {
            Ok(scanner) => scanner.is_enabled().await,
            Err(_) => false,
        }
    }

    /// Scan the block after the cursor if the chain has produced it.
    /// Returns whether a block was scanned.
    pub async fn tick(&self, chain_id: &ChainId) -> TrackerResult<bool> {
        let scanner = self.scanner(chain_id)?;
        let cursor = {
            let state = scanner.state.read().await;
            if !state.enabled || state.cursor >= state.chain_height {
                return Ok(false);
            }
            state.cursor
        };

        let next = cursor + 1;
        self.scan_block(chain_id, next).await?;

        let mut state = scanner.state.write().await;
        // A concurrent restart owns the cursor now
        if state.enabled && state.cursor == cursor {
            state.cursor = next;
            crate::metrics::record_scanner_cursor(chain_id, next);
        }
        Ok(true)
    }

    /// Re-query the chain height; the observed height never decreases
    pub async fn refresh_chain_height(&self, chain_id: &ChainId) -> TrackerResult<u64> {
        let scanner = self.scanner(chain_id)?;
        let height = scanner.adapter.fetch_block_height().await?;

        let mut state = scanner.state.write().await;
        state.chain_height = state.chain_height.max(height);
        Ok(state.chain_height)
    }

    /// Highest chain height observed by a scanner
    pub async fn last_observed_height(&self, chain_id: &ChainId) -> Option<u64> {
        let scanner = self.scanner(chain_id).ok()?;
        let height = scanner.state.read().await.chain_height;
        (height > 0).then_some(height)
    }

    /// Events of one block, fetched once and then served from the cache.
    /// Results that arrive after the scanner was stopped are not cached.
    pub async fn scan_block(&self, chain_id: &ChainId, height: u64) -> TrackerResult<Vec<ProtocolEvent>> {
        let scanner = self.scanner(chain_id)?;
        if let Some(events) = scanner.cache.get(&height) {
            return Ok(events.value().clone());
        }

        scanner.fetches.fetch_add(1, Ordering::Relaxed);
        let events = match scanner.adapter.fetch_events_for_block(height).await {
            Ok(events) => events,
            Err(e) => {
                crate::metrics::record_scan_error(chain_id, "scan");
                return Err(e);
            }
        };

        if scanner.is_enabled().await {
            crate::metrics::record_block_scanned(chain_id, &events);
            if !events.is_empty() {
                debug!("Chain {} block {}: {} xCall events", chain_id, height, events.len());
            }
            scanner.cache.insert(height, events.clone());
        } else {
            debug!("Discarding block {} of stopped scanner {}", height, chain_id);
        }
        Ok(events)
    }

    /// Cached blocks of a chain in ascending height order
    pub fn cached_blocks(&self, chain_id: &ChainId) -> Vec<(u64, Vec<ProtocolEvent>)> {
        let Ok(scanner) = self.scanner(chain_id) else {
            return Vec::new();
        };

        let mut blocks: Vec<_> = scanner
            .cache
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        blocks.sort_by_key(|(height, _)| *height);
        blocks
    }

    /// Drop cached blocks below `height`
    pub fn prune_below(&self, chain_id: &ChainId, height: u64) -> usize {
        let Ok(scanner) = self.scanner(chain_id) else {
            return 0;
        };
        let before = scanner.cache.len();
        scanner.cache.retain(|h, _| *h >= height);
        before - scanner.cache.len()
    }

    pub async fn snapshot(&self, chain_id: &ChainId) -> Option<ScannerSnapshot> {
        let scanner = self.scanner(chain_id).ok()?;
        let state = scanner.state.read().await;
        Some(ScannerSnapshot {
            chain_id: chain_id.clone(),
            enabled: state.enabled,
            start_height: state.start_height,
            cursor: state.cursor,
            chain_height: state.chain_height,
            cached_blocks: scanner.cache.len(),
            fetches: scanner.fetches.load(Ordering::Relaxed),
        })
    }

    pub async fn snapshots(&self) -> Vec<ScannerSnapshot> {
        let mut snapshots = Vec::new();
        for chain_id in self.chain_ids() {
            if let Some(snapshot) = self.snapshot(&chain_id).await {
                snapshots.push(snapshot);
            }
        }
        snapshots
    }

    /// Number of block fetches issued for a chain
    pub fn fetch_count(&self, chain_id: &ChainId) -> u64 {
        self.scanner(chain_id)
            .map(|s| s.fetches.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Spawn one driver task per started chain until cancelled
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("Event scanner running");
        loop {
            for entry in self.scanners.iter() {
                if !entry.value().driver_spawned.swap(true, Ordering::SeqCst) {
                    let chain_id = entry.key().clone();
                    tokio::spawn(self.clone().drive(chain_id, cancel.clone()));
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.started.notified() => {}
            }
        }
        info!("Event scanner shutting down");
    }

    async fn drive(self: Arc<Self>, chain_id: ChainId, cancel: CancellationToken) {
        debug!("Scanner driver for {} spawned", chain_id);
        tokio::join!(
            self.refresh_loop(&chain_id, &cancel),
            self.tick_loop(&chain_id, &cancel)
        );
        debug!("Scanner driver for {} exited", chain_id);
    }

    async fn refresh_loop(&self, chain_id: &ChainId, cancel: &CancellationToken) {
        let mut timer = interval(self.config.height_refresh_interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = timer.tick() => {}
            }
            if !self.is_running(chain_id).await {
                continue;
            }
            if let Err(e) = self.refresh_chain_height(chain_id).await {
                warn!("Scanner {} height refresh failed: {}", chain_id, e);
                crate::metrics::record_scan_error(chain_id, "height");
            }
        }
    }

    async fn tick_loop(&self, chain_id: &ChainId, cancel: &CancellationToken) {
        let mut timer = interval(self.config.tick_interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = timer.tick() => {}
            }
            if let Err(e) = self.tick(chain_id).await {
                warn!("Scanner {} tick failed: {}", chain_id, e);
            }
        }
    }
}
