//! Core data model: tokens, pools, pricing routes, and the structures that
//! flow between the registry, the caches, and the snapshot response.

mod chain;

pub use chain::Chain;

use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

/// Lowercased hex address, the canonical identity used as map keys
/// throughout the registry and caches.
pub type AddressKey = String;

pub fn lower(address: Address) -> AddressKey {
    format!("{:#x}", address)
}

/// ERC-20 token known to the aggregator on one chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub address: Address,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    pub chain_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_uri: Option<String>,
}

impl Token {
    pub fn key(&self) -> AddressKey {
        lower(self.address)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DexType {
    V2,
    V3,
}

/// V3 fee tiers in hundredths of a basis point.
pub const FEE_TIERS: [u32; 4] = [100, 500, 3000, 10000];

/// Static metadata for a liquidity pool, persisted in the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolMetadata {
    pub address: Address,
    pub dex_type: DexType,
    pub token0: Address,
    pub token1: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_tier: Option<u32>,
    pub weight: u32,
}

impl PoolMetadata {
    pub fn new_v2(address: Address, token0: Address, token1: Address) -> Self {
        let (token0, token1) = order_pair(token0, token1);
        Self {
            address,
            dex_type: DexType::V2,
            token0,
            token1,
            fee_tier: None,
            weight: 1,
        }
    }

    pub fn new_v3(address: Address, token0: Address, token1: Address, fee_tier: u32) -> Self {
        let (token0, token1) = order_pair(token0, token1);
        Self {
            address,
            dex_type: DexType::V3,
            token0,
            token1,
            fee_tier: Some(fee_tier),
            weight: 2,
        }
    }

    pub fn key(&self) -> AddressKey {
        lower(self.address)
    }

    pub fn other_token(&self, token: Address) -> Option<Address> {
        if token == self.token0 {
            Some(self.token1)
        } else if token == self.token1 {
            Some(self.token0)
        } else {
            None
        }
    }
}

/// EVM convention: token0 < token1 lexicographically by address bytes.
pub fn order_pair(a: Address, b: Address) -> (Address, Address) {
    if a.as_bytes() < b.as_bytes() {
        (a, b)
    } else {
        (b, a)
    }
}

/// "The price of this token can be derived from `pool`, normalized against `base`."
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PricingRoute {
    pub pool: Address,
    pub base: Address,
}

/// Per-chain persisted registry of pools and the routes used to price tokens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolRegistry {
    pub pools: HashMap<AddressKey, PoolMetadata>,
    pub pricing_routes: HashMap<AddressKey, Vec<PricingRoute>>,
}

impl PoolRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Inserts a pool plus its two symmetric pricing-route edges. Idempotent:
    /// re-inserting the same (token, pool, base) edge is a no-op.
    pub fn insert_pool(&mut self, meta: PoolMetadata) {
        let pool_addr = meta.address;
        let (t0, t1) = (meta.token0, meta.token1);
        self.pools.insert(meta.key(), meta);
        self.add_route(t0, pool_addr, t1);
        self.add_route(t1, pool_addr, t0);
    }

    fn add_route(&mut self, token: Address, pool: Address, base: Address) {
        let routes = self.pricing_routes.entry(lower(token)).or_default();
        if !routes.iter().any(|r| r.pool == pool && r.base == base) {
            routes.push(PricingRoute { pool, base });
        }
    }

    pub fn routes_for(&self, token: Address) -> &[PricingRoute] {
        self.pricing_routes
            .get(&lower(token))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Highest-weight route for a token, ties broken by lowest pool address.
    pub fn best_route(&self, token: Address) -> Option<&PricingRoute> {
        self.routes_for(token)
            .iter()
            .max_by(|a, b| {
                let wa = self.pools.get(&lower(a.pool)).map(|p| p.weight).unwrap_or(0);
                let wb = self.pools.get(&lower(b.pool)).map(|p| p.weight).unwrap_or(0);
                wa.cmp(&wb).then_with(|| b.pool.cmp(&a.pool))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    High,
    Normal,
    Low,
}

impl Tier {
    pub fn interval_secs(self) -> u64 {
        match self {
            Tier::High => 5,
            Tier::Normal => 10,
            Tier::Low => 30,
        }
    }

    pub fn promote(self) -> Tier {
        Tier::High
    }

    pub fn set_normal(self) -> Tier {
        Tier::Normal
    }

    /// Demotes at most one step: High -> Normal -> Low -> Low.
    pub fn demote_one_step(self) -> Tier {
        match self {
            Tier::High => Tier::Normal,
            Tier::Normal => Tier::Low,
            Tier::Low => Tier::Low,
        }
    }
}

/// In-memory record of a pool being actively refreshed.
#[derive(Debug, Clone)]
pub struct AlivePool {
    pub address: Address,
    pub chain_id: u64,
    pub tier: Tier,
    pub next_refresh: Instant,
    pub last_block_seen: u64,
    pub last_price: f64,
    pub request_count: u64,
    pub last_request_time: Instant,
}

impl AlivePool {
    pub fn key(&self) -> AddressKey {
        lower(self.address)
    }
}

/// Last observed state of a pool, keyed by (chain, pool address) in the cache.
#[derive(Debug, Clone)]
pub struct PoolStateSample {
    pub pool_address: Address,
    pub sqrt_price_x96: ethers::types::U256,
    pub liquidity: ethers::types::U256,
    pub reserve0: ethers::types::U256,
    pub reserve1: ethers::types::U256,
    pub block_number: u64,
    pub observed_at: Instant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenView {
    pub symbol: String,
    pub name: String,
    pub address: Address,
    pub decimals: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_uri: Option<String>,
}

impl From<&Token> for TokenView {
    fn from(t: &Token) -> Self {
        Self {
            symbol: t.symbol.clone(),
            name: t.name.clone(),
            address: t.address,
            decimals: t.decimals,
            logo_uri: t.logo_uri.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub token: TokenView,
    #[serde(rename = "priceUSD")]
    pub price_usd: f64,
    #[serde(rename = "liquidityUSD")]
    pub liquidity_usd: f64,
    #[serde(rename = "volumeUSD")]
    pub volume_usd: f64,
    #[serde(rename = "marketCapUSD")]
    pub market_cap_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub timestamp: i64,
    pub chain: String,
    pub entries: Vec<SnapshotEntry>,
}
