//! Token Discovery Manager: given a token with no known pricing route,
//! probes candidate pools against each configured base token (and, for v3,
//! every fee tier) via CREATE2 address derivation, tracks whatever answers,
//! and persists the registry. Repeated discovery requests for the same
//! (chain, token) within the retry window are suppressed rather than
//! re-probed, so a hot unknown token doesn't hammer the RPC provider.

use crate::chain_adapter::ChainAdapter;
use crate::pool_controller::PoolController;
use crate::storage::Storage;
use crate::types::{order_pair, Chain, PoolMetadata};
use dashmap::DashMap;
use ethers::types::Address;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const PROBE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct AttemptKey {
    chain_id: u64,
    token: Address,
}

/// Tracks in-flight/recent discovery attempts per (chain, token) and
/// serializes the registry read-modify-write for a chain so two disjoint
/// discoveries racing to persist don't clobber each other's edits.
pub struct DiscoveryManager {
    retry_window: Duration,
    attempts: DashMap<AttemptKey, Instant>,
    registry_locks: DashMap<u64, Mutex<()>>,
}

impl DiscoveryManager {
    pub fn new(retry_window: Duration) -> Self {
        Self {
            retry_window,
            attempts: DashMap::new(),
            registry_locks: DashMap::new(),
        }
    }

    fn should_attempt(&self, chain_id: u64, token: Address) -> bool {
        let key = AttemptKey { chain_id, token };
        let now = Instant::now();
        let stale = self
            .attempts
            .get(&key)
            .map(|last| now.duration_since(*last) >= self.retry_window)
            .unwrap_or(true);
        if stale {
            self.attempts.insert(key, now);
        }
        stale
    }

    /// Probes `token` against every base token on `chain`, inserting
    /// whatever pools answer into the persisted registry and the pool
    /// controller's alive set. Returns the pools found this call (empty if
    /// nothing answered or the attempt was suppressed by the retry window).
    #[allow(clippy::too_many_arguments)]
    pub async fn discover(
        &self,
        chain: Chain,
        token: Address,
        base_tokens: &[Address],
        fee_tiers: &[u32],
        adapter: &dyn ChainAdapter,
        controller: &PoolController,
        storage: &Storage,
    ) -> Vec<PoolMetadata> {
        if !self.should_attempt(chain.chain_id(), token) {
            debug!(%chain, token = %format!("{token:#x}"), "discovery suppressed, within retry window");
            return Vec::new();
        }

        let mut found = Vec::new();
        for &base in base_tokens {
            if base == token {
                continue;
            }

            if let Some(meta) = self.probe(token, base, None, adapter).await {
                found.push(meta);
            }
            tokio::time::sleep(PROBE_DELAY).await;

            for &fee in fee_tiers {
                if let Some(meta) = self.probe(token, base, Some(fee), adapter).await {
                    found.push(meta);
                }
                tokio::time::sleep(PROBE_DELAY).await;
            }
        }

        if found.is_empty() {
            debug!(%chain, token = %format!("{token:#x}"), "discovery found no liquidity");
            return found;
        }

        self.persist(chain, &found, controller, storage).await;
        crate::metrics::record_discovery_result(chain.name(), found.len());
        info!(%chain, token = %format!("{token:#x}"), pools_found = found.len(), "token discovery complete");
        found
    }

    async fn probe(
        &self,
        token: Address,
        base: Address,
        fee_tier: Option<u32>,
        adapter: &dyn ChainAdapter,
    ) -> Option<PoolMetadata> {
        let pool_address = adapter.compute_pool_address(token, base, fee_tier)?;
        // A CREATE2 address only resolves to a real pool for this exact
        // pair and fee tier, so a successful state read is confirmation
        // enough that the pair exists; the values themselves are picked up
        // on the pool's first scheduled refresh.
        adapter.read_pool_state(pool_address).await.ok()?;

        let (t0, t1) = order_pair(token, base);
        Some(match fee_tier {
            Some(fee) => PoolMetadata::new_v3(pool_address, t0, t1, fee),
            None => PoolMetadata::new_v2(pool_address, t0, t1),
        })
    }

    async fn persist(&self, chain: Chain, found: &[PoolMetadata], controller: &PoolController, storage: &Storage) {
        let lock = self.registry_locks.entry(chain.chain_id()).or_insert_with(|| Mutex::new(()));
        let _guard = lock.lock().await;

        let mut registry = storage.get_pool_registry(chain).await;
        for meta in found {
            controller.track(meta.address, chain.chain_id());
            registry.insert_pool(meta.clone());
        }
        if let Err(err) = storage.save_pool_registry(chain, &registry).await {
            warn!(%chain, error = %err, "failed to persist discovered pools");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_adapter::{MockChainAdapter, PoolState};
    use ethers::types::U256;

    fn addr(n: u8) -> Address {
        Address::from_low_u64_be(n as u64)
    }

    fn seeded_state(t0: Address, t1: Address) -> PoolState {
        PoolState {
            token0: t0,
            token1: t1,
            fee_tier: None,
            sqrt_price_x96: U256::zero(),
            liquidity: U256::zero(),
            reserve0: U256::from(1_000u64),
            reserve1: U256::from(2_000u64),
        }
    }

    #[tokio::test]
    async fn finds_and_tracks_a_seeded_v2_pool() {
        let adapter = MockChainAdapter::new("mock", 1);
        let token = addr(1);
        let base = addr(2);
        adapter.seed_pool(token, base, None, seeded_state(token, base));

        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());
        let controller = PoolController::new(crate::pool_controller::TierIntervals::default());
        let manager = DiscoveryManager::new(Duration::from_secs(300));

        let found = manager
            .discover(Chain::Ethereum, token, &[base], &[], &adapter, &controller, &storage)
            .await;

        assert_eq!(found.len(), 1);
        assert!(controller.is_tracked(found[0].address));

        let registry = storage.get_pool_registry(Chain::Ethereum).await;
        assert_eq!(registry.pools.len(), 1);
    }

    #[tokio::test]
    async fn unseeded_token_finds_nothing() {
        let adapter = MockChainAdapter::new("mock", 1);
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());
        let controller = PoolController::new(crate::pool_controller::TierIntervals::default());
        let manager = DiscoveryManager::new(Duration::from_secs(300));

        let found = manager
            .discover(Chain::Ethereum, addr(9), &[addr(2)], &[3000], &adapter, &controller, &storage)
            .await;

        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn repeated_discovery_within_window_is_suppressed() {
        let adapter = MockChainAdapter::new("mock", 1);
        let token = addr(1);
        let base = addr(2);
        adapter.seed_pool(token, base, None, seeded_state(token, base));

        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());
        let controller = PoolController::new(crate::pool_controller::TierIntervals::default());
        let manager = DiscoveryManager::new(Duration::from_secs(300));

        let first = manager
            .discover(Chain::Ethereum, token, &[base], &[], &adapter, &controller, &storage)
            .await;
        assert_eq!(first.len(), 1);

        let second = manager
            .discover(Chain::Ethereum, token, &[base], &[], &adapter, &controller, &storage)
            .await;
        assert!(second.is_empty());
    }
}
