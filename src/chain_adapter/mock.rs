use super::{Call, ChainAdapter, PoolState};
use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::{Address, Bytes, U256};
use ethers::utils::keccak256;
use std::sync::atomic::{AtomicU64, Ordering};

/// Deterministic adapter for local development and tests. By default it
/// returns no pools on discovery probes (callers fall back to synthetic
/// snapshot entries), matching the real chain's behavior for an unseeded
/// token; tests can `seed_pool` specific (token_a, token_b, fee_tier)
/// combinations to exercise discovery and the scheduler end to end.
pub struct MockChainAdapter {
    chain_name: String,
    chain_id: u64,
    multicall_address: Address,
    block_number: AtomicU64,
    seeded: DashMap<Address, PoolState>,
}

impl MockChainAdapter {
    pub fn new(chain_name: &str, chain_id: u64) -> Self {
        Self {
            chain_name: chain_name.to_string(),
            chain_id,
            multicall_address: Address::from_low_u64_be(0xca11),
            block_number: AtomicU64::new(1),
            seeded: DashMap::new(),
        }
    }

    /// Advances the mock chain by one block; tests use this to exercise
    /// the scheduler's block-aware skip and tier transitions.
    pub fn advance_block(&self) -> u64 {
        self.block_number.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current_block(&self) -> u64 {
        self.block_number.load(Ordering::SeqCst)
    }

    /// Registers a deterministic pool for (token_a, token_b, fee_tier) so
    /// discovery and the scheduler have something to find.
    pub fn seed_pool(&self, token_a: Address, token_b: Address, fee_tier: Option<u32>, state: PoolState) {
        let addr = deterministic_address(token_a, token_b, fee_tier);
        self.seeded.insert(addr, state);
    }
}

fn deterministic_address(token_a: Address, token_b: Address, fee_tier: Option<u32>) -> Address {
    let (t0, t1) = crate::types::order_pair(token_a, token_b);
    let mut input = Vec::new();
    input.extend_from_slice(t0.as_bytes());
    input.extend_from_slice(t1.as_bytes());
    if let Some(fee) = fee_tier {
        input.extend_from_slice(&fee.to_be_bytes());
    }
    let hash = keccak256(input);
    Address::from_slice(&hash[12..])
}

#[async_trait]
impl ChainAdapter for MockChainAdapter {
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
        let addr = deterministic_address(token_a, token_b, fee_tier);
        self.seeded.contains_key(&addr).then_some(addr)
    }

    async fn read_pool_state(&self, pool: Address) -> anyhow::Result<PoolState> {
        self.seeded
            .get(&pool)
            .map(|entry| entry.clone())
            .ok_or_else(|| anyhow::anyhow!("pool not found: {pool:#x}"))
    }

    async fn aggregate(&self, calls: Vec<Call>) -> anyhow::Result<(u64, Vec<Bytes>)> {
        let block = self.block_number.load(Ordering::SeqCst);
        let data = calls
            .iter()
            .map(|call| {
                self.seeded
                    .get(&call.target)
                    .map(|state| encode_state_call(&state, &call.call_data))
                    .unwrap_or_default()
            })
            .collect();
        Ok((block, data))
    }
}

/// Very small hand-rolled decoder keyed on the selector the engine asks
/// for, mirroring the narrow set of reads the real pool contracts expose
/// (slot0, liquidity, getReserves).
fn encode_state_call(state: &PoolState, call_data: &Bytes) -> Bytes {
    use ethers::abi::Token as AbiToken;

    if call_data.len() < 4 {
        return Bytes::new();
    }
    let selector = &call_data[0..4];

    const SLOT0: [u8; 4] = [0x38, 0x50, 0xc7, 0xbd];
    const LIQUIDITY: [u8; 4] = [0x1a, 0x68, 0x65, 0x02];
    const GET_RESERVES: [u8; 4] = [0x09, 0x02, 0xf1, 0xac];

    if selector == SLOT0 {
        let encoded = ethers::abi::encode(&[
            AbiToken::Uint(state.sqrt_price_x96),
            AbiToken::Int(U256::zero()),
            AbiToken::Uint(U256::zero()),
            AbiToken::Uint(U256::zero()),
            AbiToken::Uint(U256::zero()),
            AbiToken::Uint(U256::zero()),
            AbiToken::Bool(true),
        ]);
        Bytes::from(encoded)
    } else if selector == LIQUIDITY {
        Bytes::from(ethers::abi::encode(&[AbiToken::Uint(state.liquidity)]))
    } else if selector == GET_RESERVES {
        Bytes::from(ethers::abi::encode(&[
            AbiToken::Uint(state.reserve0),
            AbiToken::Uint(state.reserve1),
            AbiToken::Uint(U256::zero()),
        ]))
    } else {
        Bytes::new()
    }
}
