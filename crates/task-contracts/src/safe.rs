//! Safe multisig bindings and storage layout.
//!
//! The slot constants follow the `Safe` v1.3/v1.4 storage layout, which places the singleton,
//! the module and owner linked lists, the owner count, the threshold and the nonce in the first
//! six slots. The fallback handler and guard live at fixed hashed slots.

use alloy_primitives::{address, b256, keccak256, Address, B256, U256};
use alloy_sol_types::{sol, SolValue};

/// Head and tail marker of the Safe owner and module linked lists.
pub const SENTINEL: Address = address!("0x0000000000000000000000000000000000000001");

/// Slot of the proxy singleton (implementation) address.
pub const SINGLETON_SLOT: U256 = U256::from_limbs([0, 0, 0, 0]);
/// Slot of the `modules` linked-list mapping.
pub const MODULES_SLOT: U256 = U256::from_limbs([1, 0, 0, 0]);
/// Slot of the `owners` linked-list mapping.
pub const OWNERS_SLOT: U256 = U256::from_limbs([2, 0, 0, 0]);
/// Slot of `ownerCount`.
pub const OWNER_COUNT_SLOT: U256 = U256::from_limbs([3, 0, 0, 0]);
/// Slot of `threshold`.
pub const THRESHOLD_SLOT: U256 = U256::from_limbs([4, 0, 0, 0]);
/// Slot of the transaction `nonce`.
pub const NONCE_SLOT: U256 = U256::from_limbs([5, 0, 0, 0]);

/// `keccak256("fallback_manager.handler.address")`.
pub const FALLBACK_HANDLER_STORAGE_SLOT: B256 =
    b256!("0x6c9a6c4a39284e37ed1cf53d337577d14212a4870fb976a4366c693b939918d5");

/// `keccak256("guard_manager.guard.address")`.
pub const GUARD_STORAGE_SLOT: B256 =
    b256!("0x4a204f620c8c5ccdca3fd54d003badd85ba500436a431f0cbda4f558c93c34c8");

/// Returns the storage slot of `mapping(address => _)[key]` declared at `slot`.
pub fn mapping_slot(key: Address, slot: U256) -> B256 {
    keccak256((key, slot).abi_encode())
}

/// Returns the slot holding the successor of `owner` in the owner linked list.
pub fn owner_slot(owner: Address) -> B256 {
    mapping_slot(owner, OWNERS_SLOT)
}

/// Returns the slot holding the successor of `module` in the module linked list.
pub fn module_slot(module: Address) -> B256 {
    mapping_slot(module, MODULES_SLOT)
}

/// Operation kinds understood by `execTransaction`, encoded as the `uint8 operation` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Operation {
    /// The Safe calls the target.
    Call = 0,
    /// The Safe delegate-calls the target.
    DelegateCall = 1,
}

sol! {
    /// The EIP-712 struct Safe owners sign.
    #[sol(all_derives)]
    struct SafeTx {
        address to;
        uint256 value;
        bytes data;
        uint8 operation;
        uint256 safeTxGas;
        uint256 baseGas;
        uint256 gasPrice;
        address gasToken;
        address refundReceiver;
        uint256 nonce;
    }

    /// The Safe entry points the engine reads from or encodes calls to.
    #[sol(all_derives)]
    interface ISafe {
        function VERSION() external view returns (string memory);
        function approveHash(bytes32 hashToApprove) external;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashed_slots_match_their_preimages() {
        assert_eq!(FALLBACK_HANDLER_STORAGE_SLOT, keccak256("fallback_manager.handler.address"));
        assert_eq!(GUARD_STORAGE_SLOT, keccak256("guard_manager.guard.address"));
    }

    #[test]
    fn test_operation_encodes_as_safe_uint8() {
        assert_eq!(Operation::Call as u8, 0);
        assert_eq!(Operation::DelegateCall as u8, 1);
        assert_ne!(Operation::Call, Operation::DelegateCall);
        assert_eq!(format!("{:?}", Operation::DelegateCall), "DelegateCall");
    }

    #[test]
    fn test_owner_slot_is_solidity_mapping_slot() {
        let owner = address!("0x1000000000000000000000000000000000000001");
        let mut preimage = [0u8; 64];
        preimage[12..32].copy_from_slice(owner.as_slice());
        preimage[63] = 2;
        assert_eq!(owner_slot(owner), keccak256(preimage));
    }
}
