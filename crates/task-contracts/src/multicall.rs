//! `Multicall3` batch-call entry point.

use alloy_primitives::{address, Address};
use alloy_sol_types::sol;

/// The canonical `Multicall3` deployment, identical on every EVM network.
pub const MULTICALL3_ADDRESS: Address = address!("0xcA11bde05977b3631167028862bE2a173976CA11");

sol! {
    /// The subset of `Multicall3` used to execute a task batch.
    #[sol(all_derives)]
    interface IMulticall3 {
        /// A single sub-call of `aggregate3Value`.
        struct Call3Value {
            address target;
            bool allowFailure;
            uint256 value;
            bytes callData;
        }

        /// The outcome of a single sub-call.
        struct Result {
            bool success;
            bytes returnData;
        }

        /// Executes every call in order, forwarding `value` with each one.
        function aggregate3Value(Call3Value[] calldata calls) external payable returns (Result[] memory returnData);
    }
}
