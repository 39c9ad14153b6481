//! Public read-only ABI bindings. No execution/trading contracts.

mod multicall3;
mod uniswap_v2;
mod uniswap_v3;

pub use multicall3::{IMulticall3, Multicall3Call3, Multicall3Result};
pub use uniswap_v2::IUniswapV2Pair;
pub use uniswap_v3::{IUniswapV3Factory, IUniswapV3Pool};
