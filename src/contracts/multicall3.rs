//! Multicall3 `aggregate3` binding, scoped in its own module so the
//! ABI-generated `Result` struct doesn't shadow `std::result::Result`.

mod raw {
    use ethers::prelude::abigen;

    abigen!(
        IMulticall3,
        r#"[
            struct Call3 { address target; bool allowFailure; bytes callData; }
            struct Result { bool success; bytes returnData; }
            function aggregate3(Call3[] calldata calls) public payable returns (Result[] memory returnData)
        ]"#
    );
}

pub use raw::{Call3 as Multicall3Call3, IMulticall3, Result as Multicall3Result};
