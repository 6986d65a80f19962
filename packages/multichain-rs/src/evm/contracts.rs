//! Gateway contract ABI definitions
//!
//! Uses alloy's sol! macro to generate type-safe bindings for the events the
//! observer decodes and the calls the signer encodes.

use alloy::sol;

sol! {
    /// Inbound/outbound gateway deployed on every connected EVM chain
    contract Gateway {
        /// Native (`asset == address(0)`) or ERC20 deposit toward another chain
        event Deposited(
            address indexed sender,
            uint64 indexed destChainId,
            address asset,
            uint256 amount,
            bytes receiver,
            bytes payload
        );

        /// Contract call toward another chain without value
        event Called(
            address indexed sender,
            uint64 indexed destChainId,
            bytes receiver,
            bytes payload
        );

        /// Release `amount` of ERC20 `asset` held by the gateway to `to`
        function withdraw(address to, address asset, uint256 amount) external;
    }
}
