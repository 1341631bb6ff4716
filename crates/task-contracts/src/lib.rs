//! Contract bindings for multisig governance tasks.
//!
//! This crate provides the Solidity interfaces a task talks to (the Safe multisig, `Multicall3`
//! and ERC-20 tokens) together with the well-known addresses and storage layout constants the
//! engine needs to read Safe configuration straight from storage.

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]
#![warn(unused_crate_dependencies)]
#![deny(unused_must_use)]

pub use alloy_primitives;
pub use alloy_sol_types;

pub mod erc20;
pub mod multicall;
pub mod safe;
