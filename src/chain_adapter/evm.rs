use super::{Call, ChainAdapter, PoolState};
use crate::contracts::{IMulticall3, IUniswapV2Pair, IUniswapV3Factory, IUniswapV3Pool, Multicall3Call3};
use crate::settings::ChainConfig;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use ethers::abi::{encode_packed, Token as AbiToken};
use ethers::prelude::{Http, Middleware, Provider};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::keccak256;
use governor::{Quota, RateLimiter};
use rand::Rng;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

type ProviderLimiter = RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>;

const MAX_RPC_ATTEMPTS: usize = 3;
const RETRY_JITTER_MAX_MS: u64 = 50;

/// EVM implementation of the Chain Adapter capability. Holds one HTTP
/// provider per configured RPC URL and round-robins across them on every
/// `aggregate` call, satisfying the Multicall Engine's "dispatch batches
/// round-robin across N providers" requirement without the engine needing
/// to know about transport. Each provider carries its own token-bucket rate
/// limiter so a burst of due pools never floods a single RPC endpoint.
pub struct EvmChainAdapter {
    chain_name: String,
    chain_id: u64,
    providers: Vec<Arc<Provider<Http>>>,
    limiters: Vec<Arc<ProviderLimiter>>,
    next_provider: AtomicUsize,
    multicall_address: Address,
    v2_factory: Address,
    v2_init_code_hash: [u8; 32],
    v3_factory: Address,
    v3_init_code_hash: [u8; 32],
    multicall_timeout: Duration,
}

impl EvmChainAdapter {
    pub fn new(chain_name: &str, chain_id: u64, config: &ChainConfig, multicall_timeout: Duration) -> Result<Self> {
        if config.rpc_urls.is_empty() {
            bail!("chain {chain_name} has no configured RPC URLs");
        }
        let providers = config
            .rpc_urls
            .iter()
            .map(|raw| {
                url::Url::parse(raw).with_context(|| format!("{raw:?} is not a valid URL"))?;
                Provider::<Http>::try_from(raw.as_str()).map(Arc::new).context("invalid RPC URL")
            })
            .collect::<Result<Vec<_>>>()?;

        let quota = Quota::per_second(NonZeroU32::new(config.rpc_requests_per_second).unwrap_or(NonZeroU32::new(20).unwrap()));
        let limiters = providers.iter().map(|_| Arc::new(RateLimiter::direct(quota))).collect();

        Ok(Self {
            chain_name: chain_name.to_string(),
            chain_id,
            providers,
            limiters,
            next_provider: AtomicUsize::new(0),
            multicall_address: config.multicall_address()?,
            v2_factory: config.v2_factory_address()?,
            v2_init_code_hash: config.v2_init_code_hash()?,
            v3_factory: config.v3_factory_address()?,
            v3_init_code_hash: config.v3_init_code_hash()?,
            multicall_timeout,
        })
    }

    /// Round-robins to the next provider and waits for its rate limiter to
    /// admit the request, so callers never need to know a limit exists.
    async fn next(&self) -> Arc<Provider<Http>> {
        let idx = self.next_provider.fetch_add(1, Ordering::Relaxed) % self.providers.len();
        self.limiters[idx].until_ready().await;
        self.providers[idx].clone()
    }

    /// Short random delay before a retry against the next provider, so a
    /// batch of callers backing off from the same failed provider don't all
    /// retry in lockstep.
    async fn retry_jitter() {
        let jitter_ms = rand::thread_rng().gen_range(0..RETRY_JITTER_MAX_MS);
        tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
    }
}

#[async_trait]
impl ChainAdapter for EvmChainAdapter {
    fn chain_name(&self) -> &str {
        &self.chain_name
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn multicall_address(&self) -> Address {
        self.multicall_address
    }

    fn compute_pool_address(
        &self,
        token_a: Address,
        token_b: Address,
        fee_tier: Option<u32>,
    ) -> Option<Address> {
        let (token0, token1) = crate::types::order_pair(token_a, token_b);
        match fee_tier {
            Some(fee) => {
                let salt_input = ethers::abi::encode(&[
                    AbiToken::Address(token0),
                    AbiToken::Address(token1),
                    AbiToken::Uint(U256::from(fee)),
                ]);
                let salt = keccak256(salt_input);
                Some(create2(self.v3_factory, salt, self.v3_init_code_hash))
            }
            None => {
                let salt = keccak256(
                    encode_packed(&[AbiToken::Address(token0), AbiToken::Address(token1)]).ok()?,
                );
                Some(create2(self.v2_factory, salt, self.v2_init_code_hash))
            }
        }
    }

    async fn read_pool_state(&self, pool: Address) -> Result<PoolState> {
        let provider = self.next().await;

        // Probe as v3 first: slot0() only exists on v3 pools.
        let v3 = IUniswapV3Pool::new(pool, provider.clone());
        if let Ok(slot0) = v3.slot_0().call().await {
            let token0 = v3.token_0().call().await.context("v3 token0")?;
            let token1 = v3.token_1().call().await.context("v3 token1")?;
            let fee = v3.fee().call().await.context("v3 fee")?;
            let liquidity = v3.liquidity().call().await.context("v3 liquidity")?;
            return Ok(PoolState {
                token0,
                token1,
                fee_tier: Some(fee),
                sqrt_price_x96: slot0.0,
                liquidity: U256::from(liquidity),
                reserve0: U256::zero(),
                reserve1: U256::zero(),
            });
        }

        let v2 = IUniswapV2Pair::new(pool, provider);
        let token0 = v2.token_0().call().await.context("v2 token0")?;
        let token1 = v2.token_1().call().await.context("v2 token1")?;
        let (reserve0, reserve1, _) = v2.get_reserves().call().await.context("v2 getReserves")?;

        Ok(PoolState {
            token0,
            token1,
            fee_tier: None,
            sqrt_price_x96: U256::zero(),
            liquidity: U256::zero(),
            reserve0: U256::from(reserve0),
            reserve1: U256::from(reserve1),
        })
    }

    async fn aggregate(&self, calls: Vec<Call>) -> Result<(u64, Vec<Bytes>)> {
        if calls.is_empty() {
            return Ok((0, Vec::new()));
        }

        let call3s: Vec<Multicall3Call3> = calls
            .iter()
            .map(|c| Multicall3Call3 {
                target: c.target,
                allow_failure: true,
                call_data: c.call_data.clone(),
            })
            .collect();

        let mut last_err = None;
        for attempt in 0..MAX_RPC_ATTEMPTS {
            if attempt > 0 {
                Self::retry_jitter().await;
            }

            let provider = self.next().await;
            let contract = IMulticall3::new(self.multicall_address, provider.clone());

            let block_fut = provider.get_block_number();
            let agg_fut = timeout(self.multicall_timeout, contract.aggregate_3(call3s.clone()).call());

            let (block_number, agg_result) = tokio::join!(block_fut, agg_fut);
            let outcome: Result<(u64, Vec<Bytes>)> = (|| {
                let block_number = block_number.context("fetching block number")?.as_u64();
                let results = agg_result.context("multicall timed out")?.context("aggregate3 call failed")?;
                let data = results.into_iter().map(|r| if r.success { r.return_data } else { Bytes::new() }).collect();
                Ok((block_number, data))
            })();

            match outcome {
                Ok(ok) => return Ok(ok),
                Err(err) => last_err = Some(err),
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("aggregate failed with no providers configured")))
    }
}

fn create2(factory: Address, salt: [u8; 32], init_code_hash: [u8; 32]) -> Address {
    let mut input = Vec::with_capacity(1 + 20 + 32 + 32);
    input.push(0xff);
    input.extend_from_slice(factory.as_bytes());
    input.extend_from_slice(&salt);
    input.extend_from_slice(&init_code_hash);
    let hash = keccak256(input);
    Address::from_slice(&hash[12..])
}
