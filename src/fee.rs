//! Protocol fee quotes with a short-lived cache

use crate::chain::{ChainId, ChainManager};
use crate::error::{TrackerError, TrackerResult};

use dashmap::DashMap;
use ethers::types::U256;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RouteKey {
    source: ChainId,
    destination: ChainId,
    with_rollback: bool,
}

#[derive(Debug, Clone, Copy)]
struct CachedFee {
    fee: U256,
    fetched_at: Instant,
}

/// Fee quote between two chains, as served by the status API
#[derive(Debug, Clone, Serialize)]
pub struct FeeQuote {
    pub source: ChainId,
    pub destination: ChainId,
    pub with_rollback: bool,
    #[serde(with = "crate::codec::u256_dec")]
    pub fee: U256,
}

/// Asks the source chain's xCall contract what relaying a message costs
pub struct FeeQuoter {
    chains: Arc<ChainManager>,
    cache: DashMap<RouteKey, CachedFee>,
    ttl: Duration,
}

impl FeeQuoter {
    pub fn new(chains: Arc<ChainManager>, ttl: Duration) -> Self {
        Self {
            chains,
            cache: DashMap::new(),
            ttl,
        }
    }

    /// Fetch the fee, bypassing and refreshing the cache
    pub async fn fetch(
        &self,
        source: &ChainId,
        destination: &ChainId,
        with_rollback: bool,
    ) -> TrackerResult<U256> {
        let adapter = self.chains.adapter(source)?;
        let fee = adapter.fetch_protocol_fee(destination, with_rollback).await?;

        self.cache.insert(
            RouteKey {
                source: source.clone(),
                destination: destination.clone(),
                with_rollback,
            },
            CachedFee {
                fee,
                fetched_at: Instant::now(),
            },
        );
        debug!(
            "Fee {} -> {} (rollback: {}): {}",
            source, destination, with_rollback, fee
        );
        Ok(fee)
    }

    /// Current fee, or `None` when the chain cannot be queried
    pub async fn quote(
        &self,
        source: &ChainId,
        destination: &ChainId,
        with_rollback: bool,
    ) -> Option<U256> {
        let key = RouteKey {
            source: source.clone(),
            destination: destination.clone(),
            with_rollback,
        };
        if let Some(cached) = self.cache.get(&key) {
            if cached.fetched_at.elapsed() < self.ttl {
                return Some(cached.fee);
            }
        }

        match self.fetch(source, destination, with_rollback).await {
            Ok(fee) => Some(fee),
            Err(e) => {
                warn!("Fee query {} -> {} failed: {}", source, destination, e);
                crate::metrics::record_fee_quote_failure(source, destination);
                None
            }
        }
    }

    /// Fee to attach to a transfer; an explicit fee from the caller wins
    pub async fn resolve(
        &self,
        source: &ChainId,
        destination: &ChainId,
        with_rollback: bool,
        explicit: Option<U256>,
    ) -> TrackerResult<U256> {
        if let Some(fee) = explicit {
            return Ok(fee);
        }

        self.quote(source, destination, with_rollback)
            .await
            .ok_or_else(|| TrackerError::FeeUnavailable {
                from: source.clone(),
                to: destination.clone(),
            })
    }

    /// Quotes for every ordered pair of distinct chains
    pub async fn quote_all(&self, with_rollback: bool) -> Vec<FeeQuote> {
        let ids = self.chains.connected_chains();
        let routes: Vec<_> = ids
            .iter()
            .flat_map(|s| ids.iter().filter(move |d| *d != s).map(move |d| (s, d)))
            .collect();

        let quotes = futures::future::join_all(routes.into_iter().map(|(source, destination)| async move {
            self.quote(source, destination, with_rollback)
                .await
                .map(|fee| FeeQuote {
                    source: source.clone(),
                    destination: destination.clone(),
                    with_rollback,
                    fee,
                })
        }))
        .await;

        quotes.into_iter().flatten().collect()
    }

    pub fn invalidate(&self) {
        self.cache.clear();
    }
}
