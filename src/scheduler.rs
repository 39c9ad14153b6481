//! Pool Scheduler: the periodic tick that drives pool refresh. Every tick,
//! it asks the Pool Controller which pools are due, partitions them by
//! chain, and -- skipping a chain still mid-refresh from the previous tick
//! -- hands each chain's due pools to the Multicall Engine. Results feed
//! back into the Shared State Cache and the Pool Controller's tier and
//! next-refresh bookkeeping.

use crate::chain_adapter::ChainAdapter;
use crate::multicall_engine::{self, PoolResult};
use crate::pool_controller::PoolController;
use crate::pricing;
use crate::state_cache::StateCache;
use crate::storage::Storage;
use crate::types::{lower, AlivePool, Chain, PoolRegistry, PoolStateSample};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// One chain's wiring: its adapter and an in-flight guard so a tick never
/// overlaps a still-running refresh for the same chain.
pub struct ChainHandle {
    pub chain: Chain,
    pub adapter: Arc<dyn ChainAdapter>,
    in_flight: AtomicBool,
}

impl ChainHandle {
    pub fn new(chain: Chain, adapter: Arc<dyn ChainAdapter>) -> Self {
        Self { chain, adapter, in_flight: AtomicBool::new(false) }
    }
}

pub struct Scheduler {
    chains: Vec<ChainHandle>,
    controller: Arc<PoolController>,
    cache: Arc<StateCache>,
    storage: Arc<Storage>,
    max_batch_weight: u32,
}

impl Scheduler {
    pub fn new(
        chains: Vec<ChainHandle>,
        controller: Arc<PoolController>,
        cache: Arc<StateCache>,
        storage: Arc<Storage>,
        max_batch_weight: u32,
    ) -> Self {
        Self { chains, controller, cache, storage, max_batch_weight }
    }

    /// Runs one scheduling tick. Chains refresh concurrently with each
    /// other; a chain already mid-refresh from a previous tick is skipped
    /// entirely this round rather than queued.
    pub async fn tick(&self) {
        let futures = self.chains.iter().map(|handle| self.tick_chain(handle));
        futures::future::join_all(futures).await;
    }

    async fn tick_chain(&self, handle: &ChainHandle) {
        if handle.in_flight.swap(true, Ordering::SeqCst) {
            debug!(chain = %handle.chain, "skipping tick, previous refresh still in flight");
            return;
        }

        let due: Vec<AlivePool> = self
            .controller
            .get_pools_for_refresh()
            .into_iter()
            .filter(|p| p.chain_id == handle.chain.chain_id())
            .collect();

        if !due.is_empty() {
            let registry = self.storage.get_pool_registry(handle.chain).await;
            let results =
                multicall_engine::refresh_pools(handle.adapter.as_ref(), &due, &registry, self.max_batch_weight)
                    .await;
            let failed = results.iter().filter(|r| !r.success).count();
            crate::metrics::record_scheduler_tick(handle.chain.name(), results.len() - failed, failed);
            self.apply_results(handle.chain, &due, &registry, results);
        }

        handle.in_flight.store(false, Ordering::SeqCst);
    }

    fn apply_results(&self, chain: Chain, due: &[AlivePool], registry: &PoolRegistry, results: Vec<PoolResult>) {
        for result in results {
            let Some(data) = result.data.filter(|_| result.success) else {
                self.controller.mark_refresh_failed(result.pool_address);
                continue;
            };

            let last_block = due.iter().find(|p| p.address == result.pool_address).map(|p| p.last_block_seen);
            if result.block_number != 0 && last_block == Some(result.block_number) {
                self.controller.mark_block_unchanged(result.pool_address);
                continue;
            }

            let Some(meta) = registry.pools.get(&lower(result.pool_address)) else {
                warn!(%chain, pool = %format!("{:#x}", result.pool_address), "refreshed pool missing from registry");
                continue;
            };

            let sample = PoolStateSample {
                pool_address: result.pool_address,
                sqrt_price_x96: data.sqrt_price_x96,
                liquidity: data.liquidity,
                reserve0: data.reserve0,
                reserve1: data.reserve1,
                block_number: result.block_number,
                observed_at: Instant::now(),
            };

            // Tier comparison only cares about the *relative* change between
            // ticks, so a fixed decimals exponent and the sqrt-form V3 scalar
            // both cancel out of that ratio. The snapshot service applies the
            // real decimals and the squared V3 spot price when it turns a
            // sample into a displayed USD price.
            let reference_price = pricing::tier_comparison_scalar(meta, &sample, meta.token0);

            self.cache.put(chain.chain_id(), result.pool_address, sample);
            self.controller.update_pool_tier(result.pool_address, reference_price, result.block_number);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_adapter::{MockChainAdapter, PoolState};
    use crate::pool_controller::TierIntervals;
    use crate::types::{order_pair, PoolMetadata};
    use ethers::types::{Address, U256};

    fn addr(n: u8) -> Address {
        Address::from_low_u64_be(n as u64)
    }

    async fn setup() -> (Scheduler, Arc<PoolController>, Arc<StateCache>, Address, Arc<MockChainAdapter>) {
        let adapter = Arc::new(MockChainAdapter::new("mock", 1));
        let (t0, t1) = order_pair(addr(1), addr(2));
        adapter.seed_pool(
            t0,
            t1,
            None,
            PoolState {
                token0: t0,
                token1: t1,
                fee_tier: None,
                sqrt_price_x96: U256::zero(),
                liquidity: U256::zero(),
                reserve0: U256::from(1_000u64),
                reserve1: U256::from(2_000u64),
            },
        );
        let seeded_addr = adapter.compute_pool_address(t0, t1, None).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::new(dir.path()));
        let mut registry = PoolRegistry::empty();
        registry.insert_pool(PoolMetadata::new_v2(seeded_addr, t0, t1));
        storage.save_pool_registry(Chain::Ethereum, &registry).await.unwrap();

        let controller = Arc::new(PoolController::new(TierIntervals::default()));
        controller.track(seeded_addr, 1);
        let cache = Arc::new(StateCache::new());

        let handle = ChainHandle::new(Chain::Ethereum, adapter.clone());
        let scheduler = Scheduler::new(vec![handle], controller.clone(), cache.clone(), storage, 200);

        (scheduler, controller, cache, seeded_addr, adapter)
    }

    #[tokio::test]
    async fn tick_refreshes_due_pool_into_cache() {
        let (scheduler, controller, cache, pool_addr, _adapter) = setup().await;
        controller.force_due(pool_addr);

        scheduler.tick().await;

        let sample = cache.get(1, pool_addr).expect("refreshed pool should land in the state cache");
        assert_eq!(sample.reserve0, U256::from(1_000u64));
        assert_eq!(sample.reserve1, U256::from(2_000u64));
    }

    #[tokio::test]
    async fn second_tick_before_due_again_is_a_no_op() {
        let (scheduler, controller, cache, pool_addr, adapter) = setup().await;
        controller.force_due(pool_addr);
        scheduler.tick().await;
        let first_block = cache.get(1, pool_addr).unwrap().block_number;

        adapter.advance_block();
        scheduler.tick().await; // first observation promotes the pool to high tier; not due again for 5s

        let second_block = cache.get(1, pool_addr).unwrap().block_number;
        assert_eq!(first_block, second_block);
    }
}
