//! Fungible-token calls recognised when classifying a trace.

use alloy_sol_types::sol;

sol! {
    /// The ERC-20 transfer entry points.
    #[sol(all_derives)]
    interface IERC20 {
        /// Moves `amount` from the caller to `to`.
        function transfer(address to, uint256 amount) external returns (bool);
        /// Moves `amount` from `from` to `to` using the caller's allowance.
        function transferFrom(address from, address to, uint256 amount) external returns (bool);
    }
}
