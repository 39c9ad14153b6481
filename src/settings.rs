//! Configuration surface: one `Config.toml` plus environment-variable
//! overrides, in the layering style the teacher codebase's `Settings`
//! struct uses. Every tunable named in the system design (§6) has a
//! `#[serde(default = "...")]` so a bare `Config.toml` with just RPC URLs
//! is enough to boot.

use config::{Config, ConfigError, File};
use ethers::types::Address;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;

/// Canonical Multicall3 address, identical across every EVM chain that has
/// it deployed.
pub const MULTICALL3_ADDRESS: &str = "0xca11bde05977b3631167028862be2a173976ca11";

fn default_max_batch_weight() -> u32 {
    200
}

fn default_scheduler_period_secs() -> u64 {
    10
}

fn default_discovery_retry_window_secs() -> u64 {
    300
}

fn default_cache_ttl_secs() -> u64 {
    10
}

fn default_multicall_timeout_secs() -> u64 {
    8
}

fn default_token_list_timeout_secs() -> u64 {
    15
}

fn default_fee_tiers() -> Vec<u32> {
    vec![100, 500, 3000, 10000]
}

fn default_multicall_address() -> String {
    MULTICALL3_ADDRESS.to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_storage_path() -> String {
    "./data".to_string()
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_rpc_requests_per_second() -> u32 {
    20
}

#[derive(Debug, Clone, Deserialize)]
pub struct TierIntervals {
    #[serde(default = "default_high_interval")]
    pub high_secs: u64,
    #[serde(default = "default_normal_interval")]
    pub normal_secs: u64,
    #[serde(default = "default_low_interval")]
    pub low_secs: u64,
}

fn default_high_interval() -> u64 {
    5
}
fn default_normal_interval() -> u64 {
    10
}
fn default_low_interval() -> u64 {
    30
}

impl Default for TierIntervals {
    fn default() -> Self {
        Self {
            high_secs: default_high_interval(),
            normal_secs: default_normal_interval(),
            low_secs: default_low_interval(),
        }
    }
}

/// Per-chain configuration: RPC providers, the multicall contract, the base
/// token set used for discovery probing, and the static token catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// RPC HTTP endpoints for this chain. Multiple entries enable
    /// round-robin provider distribution in the multicall engine.
    pub rpc_urls: Vec<String>,
    #[serde(default = "default_multicall_address")]
    pub multicall_address: String,
    /// Well-known liquidity-hub tokens used as the other leg in discovery
    /// probing (USDC, USDT, DAI, WETH, plus WMATIC on Polygon).
    pub base_tokens: Vec<String>,
    #[serde(default)]
    pub static_tokens: Vec<StaticToken>,
    /// HTTPS URL of a dynamic token list (Trust Wallet / Polygon token
    /// list) merged into the static catalog at startup.
    #[serde(default)]
    pub token_list_url: Option<String>,
    /// A stable reference token (e.g. USDC) whose USD price is assumed to
    /// be 1.0, used to normalize routes that terminate at it.
    pub stable_reference_token: String,

    /// Uniswap-V2-style factory used for CREATE2 pool address derivation.
    pub v2_factory: String,
    /// `keccak256(creationCode)` of the V2 pair contract.
    pub v2_init_code_hash: String,
    /// Uniswap-V3-style factory used for CREATE2 pool address derivation.
    pub v3_factory: String,
    /// `keccak256(creationCode)` of the V3 pool contract.
    pub v3_init_code_hash: String,

    /// Per-provider token-bucket limit; bounds how hard a burst of due
    /// pools can hit a single RPC endpoint.
    #[serde(default = "default_rpc_requests_per_second")]
    pub rpc_requests_per_second: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StaticToken {
    pub address: String,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    #[serde(default)]
    pub logo_uri: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub chains: HashMap<String, ChainConfig>,

    #[serde(default = "default_max_batch_weight")]
    pub max_batch_weight: u32,
    #[serde(default = "default_scheduler_period_secs")]
    pub scheduler_period_secs: u64,
    #[serde(default = "default_discovery_retry_window_secs")]
    pub discovery_retry_window_secs: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_multicall_timeout_secs")]
    pub multicall_timeout_secs: u64,
    #[serde(default = "default_token_list_timeout_secs")]
    pub token_list_timeout_secs: u64,
    #[serde(default = "default_fee_tiers")]
    pub fee_tiers: Vec<u32>,
    #[serde(default)]
    pub tier_intervals: TierIntervals,
    #[serde(default = "default_storage_path")]
    pub storage_path: String,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Used by subgraph endpoints, not by the core freshness path.
    #[serde(default)]
    pub the_graph_api_key: Option<String>,
    /// Used by auxiliary discovery endpoints, not by CREATE2-based discovery.
    #[serde(default)]
    pub etherscan_api_key: Option<String>,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("Config.toml")
    }

    /// Same layering as `load`, but reading from an operator-chosen config
    /// path (e.g. a `--config` CLI flag) instead of the default file name.
    pub fn load_from(config_path: &str) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let s = Config::builder()
            .add_source(File::with_name(config_path).required(false))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;
        settings.apply_env_overrides();
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = env::var("THE_GRAPH_API_KEY") {
            if !key.trim().is_empty() {
                self.the_graph_api_key = Some(key);
            }
        }
        if let Ok(key) = env::var("ETHERSCAN_API_KEY") {
            if !key.trim().is_empty() {
                self.etherscan_api_key = Some(key);
            }
        }
        if let Ok(raw) = env::var("MAX_BATCH_WEIGHT") {
            if let Ok(v) = raw.parse() {
                self.max_batch_weight = v;
            }
        }
        if let Ok(raw) = env::var("RPC_URL_ETHEREUM") {
            if let Some(chain) = self.chains.get_mut("ethereum") {
                chain.rpc_urls = raw.split(',').map(|s| s.trim().to_string()).collect();
            }
        }
        if let Ok(raw) = env::var("RPC_URL_POLYGON") {
            if let Some(chain) = self.chains.get_mut("polygon") {
                chain.rpc_urls = raw.split(',').map(|s| s.trim().to_string()).collect();
            }
        }
    }
}

impl ChainConfig {
    pub fn multicall_address(&self) -> anyhow::Result<Address> {
        Ok(Address::from_str(&self.multicall_address)?)
    }

    pub fn base_token_addresses(&self) -> anyhow::Result<Vec<Address>> {
        self.base_tokens
            .iter()
            .map(|s| Address::from_str(s).map_err(anyhow::Error::from))
            .collect()
    }

    pub fn stable_reference_address(&self) -> anyhow::Result<Address> {
        Ok(Address::from_str(&self.stable_reference_token)?)
    }

    pub fn v2_factory_address(&self) -> anyhow::Result<Address> {
        Ok(Address::from_str(&self.v2_factory)?)
    }

    pub fn v3_factory_address(&self) -> anyhow::Result<Address> {
        Ok(Address::from_str(&self.v3_factory)?)
    }

    pub fn v2_init_code_hash(&self) -> anyhow::Result<[u8; 32]> {
        parse_hash(&self.v2_init_code_hash)
    }

    pub fn v3_init_code_hash(&self) -> anyhow::Result<[u8; 32]> {
        parse_hash(&self.v3_init_code_hash)
    }
}

fn parse_hash(s: &str) -> anyhow::Result<[u8; 32]> {
    let trimmed = s.trim_start_matches("0x");
    let bytes = hex::decode(trimmed)?;
    if bytes.len() != 32 {
        anyhow::bail!("expected 32-byte hash, got {} bytes", bytes.len());
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}
