//! Pool Controller: the in-memory "alive set" of pools being actively
//! refreshed, their tier, and their next-refresh timestamp. Protected by a
//! single mutex with short critical sections — no I/O happens while it is
//! held (§5).

use crate::types::{lower, AddressKey, AlivePool, Tier};
use ethers::types::Address;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct TierIntervals {
    pub high: Duration,
    pub normal: Duration,
    pub low: Duration,
}

impl Default for TierIntervals {
    fn default() -> Self {
        Self {
            high: Duration::from_secs(5),
            normal: Duration::from_secs(10),
            low: Duration::from_secs(30),
        }
    }
}

impl TierIntervals {
    pub fn for_tier(&self, tier: Tier) -> Duration {
        match tier {
            Tier::High => self.high,
            Tier::Normal => self.normal,
            Tier::Low => self.low,
        }
    }
}

/// Relative-delta threshold for promoting a pool straight to `high`.
const PROMOTE_THRESHOLD: f64 = 0.005;
/// Relative-delta threshold below which a pool is set to `normal`.
const NORMAL_THRESHOLD: f64 = 0.001;
const EPSILON: f64 = 1e-12;

pub struct PoolController {
    intervals: TierIntervals,
    alive: Mutex<HashMap<AddressKey, AlivePool>>,
}

impl PoolController {
    pub fn new(intervals: TierIntervals) -> Self {
        Self {
            intervals,
            alive: Mutex::new(HashMap::new()),
        }
    }

    /// Idempotent insertion: a pool already tracked is left unchanged,
    /// including its `nextRefresh` (§8 round-trip property).
    pub fn track(&self, address: Address, chain_id: u64) {
        let mut guard = self.alive.lock().unwrap();
        guard.entry(lower(address)).or_insert_with(|| AlivePool {
            address,
            chain_id,
            tier: Tier::Normal,
            next_refresh: Instant::now() + self.intervals.normal,
            last_block_seen: 0,
            last_price: 0.0,
            request_count: 0,
            last_request_time: Instant::now(),
        });
    }

    pub fn is_tracked(&self, address: Address) -> bool {
        self.alive.lock().unwrap().contains_key(&lower(address))
    }

    pub fn get_pools_for_refresh(&self) -> Vec<AlivePool> {
        let now = Instant::now();
        self.alive
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.next_refresh <= now)
            .cloned()
            .collect()
    }

    pub fn get(&self, address: Address) -> Option<AlivePool> {
        self.alive.lock().unwrap().get(&lower(address)).cloned()
    }

    /// Fast-retry path for a failed refresh: tier unchanged, next refresh
    /// in 5 s regardless of tier.
    pub fn mark_refresh_failed(&self, address: Address) {
        let mut guard = self.alive.lock().unwrap();
        if let Some(pool) = guard.get_mut(&lower(address)) {
            pool.next_refresh = Instant::now() + Duration::from_secs(5);
        }
    }

    /// Block-aware skip: no price/tier change, next refresh still advances
    /// by the pool's current tier interval.
    pub fn mark_block_unchanged(&self, address: Address) {
        let mut guard = self.alive.lock().unwrap();
        if let Some(pool) = guard.get_mut(&lower(address)) {
            pool.next_refresh = Instant::now() + self.intervals.for_tier(pool.tier);
        }
    }

    /// Records a fresh observation: updates tier from the price delta vs
    /// the previous observation, then `last_block_seen`/`last_price`.
    pub fn update_pool_tier(&self, address: Address, new_price: f64, block_number: u64) {
        let mut guard = self.alive.lock().unwrap();
        let Some(pool) = guard.get_mut(&lower(address)) else {
            return;
        };

        let delta = (new_price - pool.last_price).abs() / pool.last_price.max(EPSILON);
        pool.tier = if delta >= PROMOTE_THRESHOLD {
            pool.tier.promote()
        } else if delta >= NORMAL_THRESHOLD {
            pool.tier.set_normal()
        } else {
            pool.tier.demote_one_step()
        };

        pool.next_refresh = Instant::now() + self.intervals.for_tier(pool.tier);
        pool.last_block_seen = block_number;
        pool.last_price = new_price;
    }

    pub fn len(&self) -> usize {
        self.alive.lock().unwrap().len()
    }

    /// Forces a tracked pool's `nextRefresh` into the past so tests can
    /// exercise the scheduler without waiting out a real tier interval.
    #[cfg(test)]
    pub fn force_due(&self, address: Address) {
        let mut guard = self.alive.lock().unwrap();
        if let Some(pool) = guard.get_mut(&lower(address)) {
            pool.next_refresh = Instant::now() - Duration::from_secs(1);
        }
    }
}
