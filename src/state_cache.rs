//! Shared State Cache: last observed pool state, keyed by (chain, pool).
//! Last-writer-wins, no eviction in this version — the teacher's cache
//! (`cache.rs`) calls itself LRU but never evicts; rather than repeat that,
//! this one is unbounded and documented as such (§9 "LRU-style cache"
//! design note). Consumers decide staleness; this component only stores.

use crate::types::PoolStateSample;
use dashmap::DashMap;
use ethers::types::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    chain_id: u64,
    pool: Address,
}

#[derive(Default)]
pub struct StateCache {
    entries: DashMap<CacheKey, PoolStateSample>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, chain_id: u64, pool: Address) -> Option<PoolStateSample> {
        self.entries.get(&CacheKey { chain_id, pool }).map(|e| e.value().clone())
    }

    pub fn put(&self, chain_id: u64, pool: Address, sample: PoolStateSample) {
        self.entries.insert(CacheKey { chain_id, pool }, sample);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::U256;
    use std::time::Instant;

    #[test]
    fn last_writer_wins() {
        let cache = StateCache::new();
        let pool = Address::from_low_u64_be(1);
        let older = PoolStateSample {
            pool_address: pool,
            sqrt_price_x96: U256::from(1),
            liquidity: U256::from(1),
            reserve0: U256::zero(),
            reserve1: U256::zero(),
            block_number: 10,
            observed_at: Instant::now(),
        };
        let newer = PoolStateSample {
            block_number: 11,
            ..older.clone()
        };
        cache.put(1, pool, older);
        cache.put(1, pool, newer);
        assert_eq!(cache.get(1, pool).unwrap().block_number, 11);
    }

    #[test]
    fn keys_are_scoped_per_chain() {
        let cache = StateCache::new();
        let pool = Address::from_low_u64_be(1);
        let sample = PoolStateSample {
            pool_address: pool,
            sqrt_price_x96: U256::zero(),
            liquidity: U256::zero(),
            reserve0: U256::zero(),
            reserve1: U256::zero(),
            block_number: 1,
            observed_at: Instant::now(),
        };
        cache.put(1, pool, sample.clone());
        assert!(cache.get(137, pool).is_none());
        assert!(cache.get(1, pool).is_some());
    }
}
