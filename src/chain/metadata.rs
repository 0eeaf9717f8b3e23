//! Token metadata cache
//!
//! symbol/decimals are treated as immutable once read, so entries are kept
//! for the lifetime of the process unless a [`CachePolicy`] says otherwise.
//! Keys are `(chain_id, Address)`: the address is byte-valued, so two
//! differently-cased spellings of the same token share one entry, and the
//! same address on two chains gets two.

use alloy_primitives::Address;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::abi::IERC20;
use super::caller::{call_typed, ContractCaller};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub symbol: String,
    pub decimals: u8,
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    #[default]
    NeverEvict,
    MaxAge(Duration),
}

impl CachePolicy {
    fn is_fresh(&self, stored_at: Instant, now: Instant) -> bool {
        match self {
            CachePolicy::NeverEvict => true,
            CachePolicy::MaxAge(max_age) => now.saturating_duration_since(stored_at) <= *max_age,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    metadata: TokenMetadata,
    stored_at: Instant,
}

pub struct TokenMetadataCache {
    entries: RwLock<HashMap<(u64, Address), CachedToken>>,
    policy: CachePolicy,
    clock: Arc<dyn Clock>,
}

impl Default for TokenMetadataCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenMetadataCache {
    pub fn new() -> Self {
        Self::with_policy(CachePolicy::NeverEvict, Arc::new(SystemClock))
    }

    pub fn with_policy(policy: CachePolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            policy,
            clock,
        }
    }

    /// Cached metadata for `token`, reading `symbol()` and `decimals()` on a miss.
    pub async fn resolve<C>(&self, caller: &C, chain_id: u64, token: Address) -> Result<TokenMetadata>
    where
        C: ContractCaller + ?Sized,
    {
        if let Some(metadata) = self.get(chain_id, token).await {
            return Ok(metadata);
        }

        debug!("Token metadata miss for {} on chain {}", token, chain_id);

        let symbol = call_typed(caller, token, IERC20::symbolCall {})
            .await
            .map_err(|e| e.into_transient("symbol()"))?;
        let decimals = call_typed(caller, token, IERC20::decimalsCall {})
            .await
            .map_err(|e| e.into_transient("decimals()"))?;

        let metadata = TokenMetadata { symbol, decimals };

        // Two concurrent misses both land here; they wrote the same value
        self.entries.write().await.insert(
            (chain_id, token),
            CachedToken {
                metadata: metadata.clone(),
                stored_at: self.clock.now(),
            },
        );

        info!(
            "Stored symbol {} ({} decimals) for {} on chain {}",
            metadata.symbol, metadata.decimals, token, chain_id
        );

        Ok(metadata)
    }

    pub async fn get(&self, chain_id: u64, token: Address) -> Option<TokenMetadata> {
        let entries = self.entries.read().await;
        let cached = entries.get(&(chain_id, token))?;
        if self.policy.is_fresh(cached.stored_at, self.clock.now()) {
            Some(cached.metadata.clone())
        } else {
            None
        }
    }

    #[cfg(test)]
    pub async fn contains(&self, chain_id: u64, token: Address) -> bool {
        self.get(chain_id, token).await.is_some()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
