//! Snapshot Service: assembles a paginated `ChainSnapshot` by joining the
//! merged token list, the pool registry's pricing routes, and the shared
//! state cache. A token with a recent cached entry is served straight from
//! that cache; a token whose route exists but has no fresh sample yet is
//! nudged onto the pool controller's alive set and served a synthetic
//! placeholder; a token with no route at all is queued for discovery and
//! also gets the placeholder, so response shape never depends on cache
//! state.

use crate::chain_adapter::ChainAdapter;
use crate::discovery::DiscoveryManager;
use crate::pool_controller::PoolController;
use crate::pricing;
use crate::state_cache::StateCache;
use crate::storage::Storage;
use crate::token_list::TokenList;
use crate::types::{lower, AddressKey, Chain, ChainSnapshot, PoolRegistry, SnapshotEntry, Token, TokenView};
use dashmap::DashMap;
use ethers::types::Address;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::warn;

const SYNTHETIC_PRICE_USD: f64 = 1.0;
const SYNTHETIC_LIQUIDITY_USD: f64 = 500_000.0;
const VOLUME_LIQUIDITY_RATIO: f64 = 0.15;
const MARKET_CAP_MULTIPLIER: f64 = 10_000_000.0;
/// Bounds the base->base->...->stable walk in `base_usd_price`; the base
/// token lists are at most a handful of well-known hubs (§3's base-token
/// list), so two hops is enough to reach the stable reference in practice
/// without risking unbounded recursion on a cyclic registry.
const BASE_PRICE_MAX_HOPS: u8 = 2;

/// Per-chain wiring the Snapshot Service needs beyond the shared
/// components: the adapter (used only to hand to fire-and-forget
/// discovery), the merged token list, the base-token/fee-tier product
/// discovery probes against, and the chain's stable reference token (the
/// USD anchor §4.8 step 4 normalizes every route against).
pub struct ChainContext {
    pub adapter: Arc<dyn ChainAdapter>,
    pub token_list: Arc<TokenList>,
    pub base_tokens: Vec<Address>,
    pub fee_tiers: Vec<u32>,
    pub stable_reference: Address,
}

pub struct SnapshotService {
    chains: HashMap<Chain, ChainContext>,
    storage: Arc<Storage>,
    cache: Arc<StateCache>,
    controller: Arc<PoolController>,
    discovery: Arc<DiscoveryManager>,
    cache_ttl: Duration,
    entry_cache: DashMap<(u64, AddressKey), (SnapshotEntry, Instant)>,
    discovery_tasks: Mutex<JoinSet<()>>,
}

impl SnapshotService {
    pub fn new(
        chains: HashMap<Chain, ChainContext>,
        storage: Arc<Storage>,
        cache: Arc<StateCache>,
        controller: Arc<PoolController>,
        discovery: Arc<DiscoveryManager>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            chains,
            storage,
            cache,
            controller,
            discovery,
            cache_ttl,
            entry_cache: DashMap::new(),
            discovery_tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// `None` means the chain has no configured adapter (`ChainNotSupported`
    /// at the HTTP layer). `offset` past the end or `limit = 0` yields an
    /// empty (not missing) snapshot.
    pub async fn get_snapshot(&self, chain: Chain, offset: usize, limit: usize) -> Option<ChainSnapshot> {
        let ctx = self.chains.get(&chain)?;
        let tokens = ctx.token_list.get();
        let decimals_index: HashMap<AddressKey, u8> =
            tokens.iter().map(|t| (lower(t.address), t.decimals)).collect();

        let window: Vec<&Token> = tokens.iter().skip(offset).take(limit).collect();
        let registry = self.storage.get_pool_registry(chain).await;

        let mut entries = Vec::with_capacity(window.len());
        let mut needs_discovery = Vec::new();
        for token in window {
            entries.push(self.entry_for(chain, ctx, &registry, &decimals_index, token, &mut needs_discovery));
        }

        if !needs_discovery.is_empty() {
            self.spawn_discovery(chain, ctx, needs_discovery).await;
        }

        Some(ChainSnapshot { timestamp: now_millis(), chain: chain.name().to_string(), entries })
    }

    fn entry_for(
        &self,
        chain: Chain,
        ctx: &ChainContext,
        registry: &PoolRegistry,
        decimals_index: &HashMap<AddressKey, u8>,
        token: &Token,
        needs_discovery: &mut Vec<Address>,
    ) -> SnapshotEntry {
        let key = (chain.chain_id(), lower(token.address));
        if let Some(cached) = self.entry_cache.get(&key) {
            if cached.1.elapsed() < self.cache_ttl {
                return cached.0.clone();
            }
        }

        let entry = match registry.best_route(token.address) {
            None => {
                needs_discovery.push(token.address);
                synthetic_entry(token)
            }
            Some(route) => {
                let meta = registry.pools.get(&lower(route.pool));
                let sample = self.cache.get(chain.chain_id(), route.pool);
                match (meta, sample) {
                    (Some(meta), Some(sample)) => {
                        let decimals_of = |addr: Address| decimals_index.get(&lower(addr)).copied().unwrap_or(18);
                        match self.base_usd_price(chain, ctx, registry, decimals_index, route.base, BASE_PRICE_MAX_HOPS)
                        {
                            Some(base_usd) => {
                                let price = pricing::compute_spot_price(
                                    meta,
                                    &sample,
                                    token.address,
                                    decimals_of(token.address),
                                    decimals_of(route.base),
                                ) * base_usd;
                                let (price0, price1) =
                                    if meta.token0 == token.address { (price, base_usd) } else { (base_usd, price) };
                                let liquidity = pricing::compute_liquidity_usd(
                                    meta,
                                    &sample,
                                    decimals_of(meta.token0),
                                    decimals_of(meta.token1),
                                    price0,
                                    price1,
                                );
                                derived_entry(token, price, liquidity)
                            }
                            // Route's base has no resolvable USD anchor (no
                            // cached price back to the stable reference) --
                            // fall back rather than report a bogus price.
                            None => synthetic_entry(token),
                        }
                    }
                    (Some(_), None) => {
                        // Route known, but no sample yet: make sure the pool is
                        // on the controller's alive set so the next tick warms
                        // it, and fall back until then.
                        self.controller.track(route.pool, chain.chain_id());
                        synthetic_entry(token)
                    }
                    (None, _) => synthetic_entry(token),
                }
            }
        };

        self.entry_cache.insert(key, (entry.clone(), Instant::now()));
        entry
    }

    /// Resolves `token`'s USD price by walking routes back to the chain's
    /// stable reference (§4.8 step 4's `stableAddress` anchor), not by
    /// assuming every route's base is itself a $1 stablecoin. `hops` bounds
    /// the walk so a registry with a cyclic or dangling route chain can't
    /// recurse forever; a chain the walk can't resolve within the budget
    /// returns `None` and the caller falls back to a synthetic entry.
    fn base_usd_price(
        &self,
        chain: Chain,
        ctx: &ChainContext,
        registry: &PoolRegistry,
        decimals_index: &HashMap<AddressKey, u8>,
        token: Address,
        hops: u8,
    ) -> Option<f64> {
        if lower(token) == lower(ctx.stable_reference) {
            return Some(1.0);
        }
        if hops == 0 {
            return None;
        }

        let route = registry.best_route(token)?;
        let meta = registry.pools.get(&lower(route.pool))?;
        let sample = self.cache.get(chain.chain_id(), route.pool)?;
        let decimals_of = |addr: Address| decimals_index.get(&lower(addr)).copied().unwrap_or(18);

        let base_usd = self.base_usd_price(chain, ctx, registry, decimals_index, route.base, hops - 1)?;
        let price_in_base =
            pricing::compute_spot_price(meta, &sample, token, decimals_of(token), decimals_of(route.base));
        Some(price_in_base * base_usd)
    }

    async fn spawn_discovery(&self, chain: Chain, ctx: &ChainContext, tokens: Vec<Address>) {
        let adapter = ctx.adapter.clone();
        let base_tokens = ctx.base_tokens.clone();
        let fee_tiers = ctx.fee_tiers.clone();
        let discovery = self.discovery.clone();
        let controller = self.controller.clone();
        let storage = self.storage.clone();

        let mut tasks = self.discovery_tasks.lock().await;
        tasks.spawn(async move {
            for token in tokens {
                discovery
                    .discover(chain, token, &base_tokens, &fee_tiers, adapter.as_ref(), &controller, &storage)
                    .await;
            }
        });
    }

    /// Awaits every currently in-flight discovery job to completion. Used
    /// by tests that need discovery to have finished before asserting on
    /// its effects; production shutdown uses `shutdown` instead, which is
    /// bounded by a grace period.
    #[cfg(test)]
    pub async fn wait_for_discovery(&self) {
        let mut tasks = self.discovery_tasks.lock().await;
        while tasks.join_next().await.is_some() {}
    }

    /// Awaits in-flight discovery jobs up to `grace`, then aborts whatever
    /// remains so the process can exit.
    pub async fn shutdown(&self, grace: Duration) {
        let mut tasks = self.discovery_tasks.lock().await;
        let drain = async {
            while let Some(res) = tasks.join_next().await {
                if let Err(err) = res {
                    warn!(error = %err, "discovery task did not complete cleanly during shutdown");
                }
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("discovery jobs still running after shutdown grace period, aborting");
        }
        tasks.abort_all();
    }
}

fn synthetic_entry(token: &Token) -> SnapshotEntry {
    SnapshotEntry {
        token: TokenView::from(token),
        price_usd: SYNTHETIC_PRICE_USD,
        liquidity_usd: SYNTHETIC_LIQUIDITY_USD,
        volume_usd: SYNTHETIC_LIQUIDITY_USD * VOLUME_LIQUIDITY_RATIO,
        market_cap_usd: SYNTHETIC_PRICE_USD * MARKET_CAP_MULTIPLIER,
    }
}

fn derived_entry(token: &Token, price: f64, liquidity: f64) -> SnapshotEntry {
    SnapshotEntry {
        token: TokenView::from(token),
        price_usd: price,
        liquidity_usd: liquidity,
        volume_usd: liquidity * VOLUME_LIQUIDITY_RATIO,
        market_cap_usd: price * MARKET_CAP_MULTIPLIER,
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_adapter::MockChainAdapter;
    use crate::pool_controller::TierIntervals;

    fn addr(n: u8) -> Address {
        Address::from_low_u64_be(n as u64)
    }

    fn token(n: u8) -> Token {
        Token { address: addr(n), symbol: format!("T{n}"), name: format!("Token {n}"), decimals: 18, chain_id: 1, logo_uri: None }
    }

    fn build_service(chain: Chain, token_list: Vec<Token>) -> (SnapshotService, Arc<Storage>, Arc<StateCache>, Arc<PoolController>) {
        let storage = Arc::new(Storage::new(tempfile::tempdir().unwrap().into_path()));
        let cache = Arc::new(StateCache::new());
        let controller = Arc::new(PoolController::new(TierIntervals::default()));
        let discovery = Arc::new(DiscoveryManager::new(Duration::from_secs(300)));
        let adapter: Arc<dyn ChainAdapter> = Arc::new(MockChainAdapter::new(chain.name(), chain.chain_id()));

        let mut chains = HashMap::new();
        chains.insert(
            chain,
            ChainContext {
                adapter,
                token_list: Arc::new(TokenList::new(token_list)),
                base_tokens: vec![addr(99)],
                fee_tiers: vec![3000],
                stable_reference: addr(99),
            },
        );

        let service = SnapshotService::new(chains, storage.clone(), cache.clone(), controller.clone(), discovery, Duration::from_secs(10));
        (service, storage, cache, controller)
    }

    #[tokio::test]
    async fn unknown_chain_returns_none() {
        let (service, _, _, _) = build_service(Chain::Ethereum, vec![token(1)]);
        assert!(service.get_snapshot(Chain::Polygon, 0, 10).await.is_none());
    }

    #[tokio::test]
    async fn offset_past_end_yields_empty_entries() {
        let (service, _, _, _) = build_service(Chain::Ethereum, vec![token(1)]);
        let snapshot = service.get_snapshot(Chain::Ethereum, 5, 10).await.unwrap();
        assert!(snapshot.entries.is_empty());
    }

    #[tokio::test]
    async fn limit_zero_yields_empty_entries() {
        let (service, _, _, _) = build_service(Chain::Ethereum, vec![token(1)]);
        let snapshot = service.get_snapshot(Chain::Ethereum, 0, 0).await.unwrap();
        assert!(snapshot.entries.is_empty());
    }

    #[tokio::test]
    async fn token_with_no_route_gets_synthetic_entry() {
        let (service, _, _, _) = build_service(Chain::Ethereum, vec![token(1)]);
        let snapshot = service.get_snapshot(Chain::Ethereum, 0, 10).await.unwrap();
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(snapshot.entries[0].price_usd, SYNTHETIC_PRICE_USD);
        assert_eq!(snapshot.entries[0].liquidity_usd, SYNTHETIC_LIQUIDITY_USD);
    }

    #[tokio::test]
    async fn route_without_sample_tracks_pool_and_falls_back_to_synthetic() {
        let (service, storage, _, controller) = build_service(Chain::Ethereum, vec![token(1)]);

        let mut registry = PoolRegistry::empty();
        let (t0, t1) = crate::types::order_pair(addr(1), addr(99));
        registry.insert_pool(crate::types::PoolMetadata::new_v2(addr(10), t0, t1));
        storage.save_pool_registry(Chain::Ethereum, &registry).await.unwrap();

        let snapshot = service.get_snapshot(Chain::Ethereum, 0, 10).await.unwrap();
        assert_eq!(snapshot.entries[0].price_usd, SYNTHETIC_PRICE_USD);
        assert!(controller.is_tracked(addr(10)));
    }

    #[tokio::test]
    async fn route_through_a_non_stable_base_is_converted_via_its_own_usd_price() {
        // token(1) only routes through weth(2), not directly through the
        // stable(99); its USD price must come from chaining
        // token/weth * weth/stable, not from treating weth as a $1 stable.
        let (service, storage, cache, _) = build_service(Chain::Ethereum, vec![token(1)]);
        let weth = addr(2);
        let stable = addr(99);

        // The weth/stable pool is given the lower address so it wins
        // `best_route`'s tie-break when resolving weth's own USD price --
        // same weight as the token/weth pool, but the route that actually
        // reaches the stable reference.
        let weth_stable_pool = addr(10);
        let token_weth_pool = addr(11);

        let mut registry = PoolRegistry::empty();
        let (t0, t1) = crate::types::order_pair(addr(1), weth);
        registry.insert_pool(crate::types::PoolMetadata::new_v2(token_weth_pool, t0, t1));
        let (w0, w1) = crate::types::order_pair(weth, stable);
        registry.insert_pool(crate::types::PoolMetadata::new_v2(weth_stable_pool, w0, w1));
        storage.save_pool_registry(Chain::Ethereum, &registry).await.unwrap();

        // token(1)/weth pool: 1 token costs 2 weth.
        cache.put(1, token_weth_pool, sample_with_reserves(token_weth_pool, t0, t1, addr(1), weth, 1_000, 2_000));
        // weth/stable pool: 1 weth costs 1_500 stable (the USD anchor).
        cache.put(1, weth_stable_pool, sample_with_reserves(weth_stable_pool, w0, w1, weth, stable, 1_000, 1_500_000));

        let snapshot = service.get_snapshot(Chain::Ethereum, 0, 10).await.unwrap();
        // token(1) -> weth price is 2.0, weth -> stable price is 1500.0, so
        // token(1)'s USD price should be 2.0 * 1500.0 = 3000.0, not 2.0.
        assert!((snapshot.entries[0].price_usd - 3000.0).abs() < 1e-6);
    }

    fn sample_with_reserves(
        pool: Address,
        pool_token0: Address,
        pool_token1: Address,
        priced_token: Address,
        other_token: Address,
        priced_reserve: u64,
        other_reserve: u64,
    ) -> crate::types::PoolStateSample {
        let (reserve0, reserve1) = if pool_token0 == priced_token {
            (priced_reserve, other_reserve)
        } else {
            debug_assert_eq!(pool_token0, other_token);
            (other_reserve, priced_reserve)
        };
        crate::types::PoolStateSample {
            pool_address: pool,
            sqrt_price_x96: ethers::types::U256::zero(),
            liquidity: ethers::types::U256::zero(),
            reserve0: ethers::types::U256::from(reserve0),
            reserve1: ethers::types::U256::from(reserve1),
            block_number: 1,
            observed_at: Instant::now(),
        }
    }
}
