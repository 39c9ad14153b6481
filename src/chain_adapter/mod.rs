//! Chain Adapter capability: the surface the rest of the freshness engine
//! needs from a blockchain — deterministic pool address derivation, a
//! single pool-state read (used by discovery), and a Multicall3 `aggregate`
//! primitive (used by the scheduler). One EVM implementation and one
//! deterministic mock share this trait.

mod evm;
mod mock;

pub use evm::EvmChainAdapter;
pub use mock::MockChainAdapter;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, U256};

/// A single RPC call to be batched into an `aggregate`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Call {
    pub target: Address,
    pub call_data: Bytes,
}

/// Result of a single pool read, decoded from a v2 or v3 pool contract.
#[derive(Debug, Clone)]
pub struct PoolState {
    pub token0: Address,
    pub token1: Address,
    pub fee_tier: Option<u32>,
    pub sqrt_price_x96: U256,
    pub liquidity: U256,
    pub reserve0: U256,
    pub reserve1: U256,
}

#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn chain_name(&self) -> &str;
    fn chain_id(&self) -> u64;
    fn multicall_address(&self) -> Address;

    /// Deterministic CREATE2 (or factory-and-salt) address derivation;
    /// `fee_tier` is `Some` for v3, `None` for v2. Never makes an RPC call.
    fn compute_pool_address(
        &self,
        token_a: Address,
        token_b: Address,
        fee_tier: Option<u32>,
    ) -> Option<Address>;

    /// Single-pool read. `PoolNotFound` if the address has no code /
    /// doesn't answer as a pool; `RpcError` on transport failure.
    async fn read_pool_state(&self, pool: Address) -> anyhow::Result<PoolState>;

    /// A Multicall3 `aggregate` round trip. Returns the block number the
    /// read was taken at and one return-data entry per call, in the same
    /// order; entries for calls that reverted are empty `Bytes`.
    async fn aggregate(&self, calls: Vec<Call>) -> anyhow::Result<(u64, Vec<Bytes>)>;
}
