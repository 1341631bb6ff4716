use alloy_primitives::{address, Address, B256, U256};
use task_contracts::{
    multicall::MULTICALL3_ADDRESS,
    safe::{module_slot, owner_slot, NONCE_SLOT, OWNER_COUNT_SLOT, SENTINEL, THRESHOLD_SLOT},
};

use super::{multicall3_code, raw_slot_setter_code, slot_writer_code};
use crate::{
    registry::StaticRegistry,
    sandbox::{EvmSandbox, Sandbox, SandboxError},
    TaskConfig,
};

/// Chain id of the fixture sandbox.
pub const CHAIN_ID: u64 = 1;
/// Registry identifier of the fixture Safe.
pub const SAFE_IDENTIFIER: &str = "ProxyAdminOwner";
/// Address of the fixture Safe.
pub const SAFE: Address = address!("0x5a0Aae59D09fccBdDb6C6CcEB07B7279367C3d2A");
/// Owners of the fixture Safe, in linked-list order.
pub const OWNERS: [Address; 2] = [
    address!("0x1000000000000000000000000000000000000001"),
    address!("0x1000000000000000000000000000000000000002"),
];
/// Initial nonce of the fixture Safe.
pub const SAFE_NONCE: u64 = 12;
/// Registry identifier of the fixture target.
pub const TARGET_IDENTIFIER: &str = "SystemConfig";
/// Address of the fixture target, running [`slot_writer_code`].
pub const TARGET: Address = address!("0x229047fed2591dbec1eF1118d64F7aF3dB9EB290");

/// Installs a Safe at `safe` whose storage follows the Safe layout and whose code stores
/// `calldata[36..68]` at slot `calldata[4..36]`.
pub fn install_mock_safe<S: Sandbox + ?Sized>(
    sandbox: &mut S,
    safe: Address,
    owners: &[Address],
    threshold: u64,
    nonce: u64,
) -> Result<(), SandboxError> {
    sandbox.set_code(safe, raw_slot_setter_code())?;

    let mut previous = SENTINEL;
    for owner in owners.iter().copied().chain([SENTINEL]) {
        sandbox.set_storage(safe, owner_slot(previous), owner.into_word())?;
        previous = owner;
    }
    sandbox.set_storage(safe, module_slot(SENTINEL), SENTINEL.into_word())?;
    sandbox.set_storage(safe, B256::from(OWNER_COUNT_SLOT), u256_word(owners.len() as u64))?;
    sandbox.set_storage(safe, B256::from(THRESHOLD_SLOT), u256_word(threshold))?;
    sandbox.set_storage(safe, B256::from(NONCE_SLOT), u256_word(nonce))
}

/// Returns `value` as a storage word.
pub fn u256_word(value: u64) -> B256 {
    B256::from(U256::from(value))
}

/// A sandbox with the fixture Safe, the fixture target and `Multicall3` installed, and 100 ether
/// on the Safe.
pub fn fixture_sandbox() -> EvmSandbox {
    let mut sandbox = EvmSandbox::new(CHAIN_ID);
    install_fixture_state(&mut sandbox).expect("fresh sandbox accepts writes");
    sandbox
}

fn install_fixture_state(sandbox: &mut EvmSandbox) -> Result<(), SandboxError> {
    install_mock_safe(sandbox, SAFE, &OWNERS, 1, SAFE_NONCE)?;
    sandbox.set_balance(SAFE, U256::from(100) * U256::from(10).pow(U256::from(18)))?;
    sandbox.set_code(MULTICALL3_ADDRESS, multicall3_code())?;
    sandbox.set_code(TARGET, slot_writer_code())
}

/// A registry resolving the fixture Safe and target on [`CHAIN_ID`], plus `extra` entries.
pub fn fixture_registry(extra: &[(&str, Address)]) -> StaticRegistry {
    let mut registry = StaticRegistry::new()
        .with_address(SAFE_IDENTIFIER, CHAIN_ID, SAFE)
        .with_address(TARGET_IDENTIFIER, CHAIN_ID, TARGET);
    for (identifier, address) in extra {
        registry.insert(*identifier, CHAIN_ID, *address);
    }
    registry
}

/// A task configuration for the fixture Safe allowing storage changes to `allowed`.
pub fn fixture_config(allowed: &[&str]) -> TaskConfig {
    TaskConfig {
        safe_address_identifier: SAFE_IDENTIFIER.to_string(),
        allowed_storage_accesses: allowed.iter().map(ToString::to_string).collect(),
        ..Default::default()
    }
}
