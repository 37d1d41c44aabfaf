//! Chain module - static chain registry and per-chain-kind adapters
//!
//! This module provides:
//! - The immutable chain registry built from configuration
//! - One adapter per chain kind (account-model, Cosmos SDK, EVM) behind a
//!   single tagged dispatch
//! - A shared bounded retry for results that are not yet indexed

pub mod adapter;
pub mod cosmos;
pub mod evm;
pub mod icon;
pub mod retry;
pub(crate) mod rpc;

pub use adapter::{network_address, ChainAdapter, RawReceipt, Signer, TransferParams};
pub use retry::{wait_for, RetryPolicy};

use crate::config::{ChainConfig, Settings};
use crate::error::{TrackerError, TrackerResult};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// xCall network id of a chain, e.g. `0x1.icon` or `archway-1`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(String);

impl ChainId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChainId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ChainId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Structural family of a chain backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainKind {
    /// ICON-style account model chains (ICON, Havah)
    AccountModel,
    /// Cosmos SDK chains with CosmWasm contracts
    Cosmos,
    /// EVM-compatible chains
    Evm,
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainKind::AccountModel => write!(f, "account_model"),
            ChainKind::Cosmos => write!(f, "cosmos"),
            ChainKind::Evm => write!(f, "evm"),
        }
    }
}

/// Immutable per-chain configuration, loaded once
#[derive(Debug, Default)]
pub struct ChainRegistry {
    chains: HashMap<ChainId, Arc<ChainConfig>>,
}

impl ChainRegistry {
    /// Build the registry from all enabled chains in the settings
    pub fn from_settings(settings: &Settings) -> Self {
        Self::from_configs(
            settings
                .enabled_chains()
                .into_iter()
                .map(|(_, c)| c.clone())
                .collect(),
        )
    }

    pub fn from_configs(configs: Vec<ChainConfig>) -> Self {
        let chains = configs
            .into_iter()
            .map(|c| (c.id.clone(), Arc::new(c)))
            .collect();
        Self { chains }
    }

    /// Get a chain descriptor
    pub fn get(&self, chain_id: &ChainId) -> TrackerResult<Arc<ChainConfig>> {
        self.chains
            .get(chain_id)
            .cloned()
            .ok_or_else(|| TrackerError::ChainNotFound {
                chain_id: chain_id.clone(),
            })
    }

    pub fn contains(&self, chain_id: &ChainId) -> bool {
        self.chains.contains_key(chain_id)
    }

    /// All chain ids, sorted
    pub fn ids(&self) -> Vec<ChainId> {
        let mut ids: Vec<_> = self.chains.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ChainConfig>> {
        self.chains.values()
    }
}

/// Owns one adapter per configured chain
pub struct ChainManager {
    registry: Arc<ChainRegistry>,
    adapters: HashMap<ChainId, Arc<ChainAdapter>>,
}

impl ChainManager {
    /// Create adapters with network clients for every registered chain
    pub fn new(
        registry: Arc<ChainRegistry>,
        mut signers: HashMap<ChainId, Signer>,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> TrackerResult<Self> {
        let mut adapters = HashMap::new();

        for config in registry.iter() {
            info!(
                "Initializing chain {} ({}, {})",
                config.name, config.id, config.kind
            );

            let signer = signers.remove(&config.id);
            let adapter =
                ChainAdapter::connect(config.clone(), signer, retry.clone(), cancel.child_token())?;
            if !adapter.can_sign() {
                warn!("Chain {} has no signing client - tracking only", config.id);
            }

            adapters.insert(config.id.clone(), Arc::new(adapter));
        }

        if let Some(unused) = signers.keys().next() {
            warn!("Signer configured for unknown chain {}", unused);
        }

        Ok(Self { registry, adapters })
    }

    /// Assemble a manager from prebuilt adapters
    pub fn from_adapters(registry: Arc<ChainRegistry>, adapters: Vec<ChainAdapter>) -> Self {
        let adapters = adapters
            .into_iter()
            .map(|a| (a.chain_id().clone(), Arc::new(a)))
            .collect();
        Self { registry, adapters }
    }

    /// Get adapter for a specific chain
    pub fn adapter(&self, chain_id: &ChainId) -> TrackerResult<Arc<ChainAdapter>> {
        self.adapters
            .get(chain_id)
            .cloned()
            .ok_or_else(|| TrackerError::ChainNotFound {
                chain_id: chain_id.clone(),
            })
    }

    pub fn registry(&self) -> &Arc<ChainRegistry> {
        &self.registry
    }

    /// Health check for all chains
    pub async fn health_check(&self) -> Vec<(ChainId, bool)> {
        let checks = self.adapters.iter().map(|(chain_id, adapter)| async move {
            let healthy = match adapter.fetch_block_height().await {
                Ok(_) => true,
                Err(e) => {
                    error!("Health check failed for chain {}: {}", chain_id, e);
                    false
                }
            };
            crate::metrics::record_chain_health(chain_id, healthy);
            (chain_id.clone(), healthy)
        });

        let mut results = futures::future::join_all(checks).await;
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    /// Get all connected chain IDs
    pub fn connected_chains(&self) -> Vec<ChainId> {
        let mut ids: Vec<_> = self.adapters.keys().cloned().collect();
        ids.sort();
        ids
    }
}
