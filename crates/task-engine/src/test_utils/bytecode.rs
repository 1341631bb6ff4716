use alloy_primitives::{Address, Bytes};
use alloy_sol_types::{Revert, SolError};
use revm::bytecode::opcode::{
    ADD, CALL, CALLDATACOPY, CALLDATALOAD, CALLDATASIZE, CALLVALUE, DELEGATECALL, DUP1, DUP2, DUP3,
    DUP7, DUP8, EQ, GAS, ISZERO, JUMP, JUMPDEST, JUMPI, MLOAD, MSTORE, MUL, POP, PUSH0,
    RETURNDATACOPY, RETURNDATASIZE, REVERT, SSTORE, STOP,
};

pub use crate::sandbox::BytecodeBuilder;

/// Code that stores the first calldata argument in the slot numbered by the function selector,
/// so `setGasLimit(100)` writes `100` to the slot numbered by the `setGasLimit` selector.
pub fn slot_writer_code() -> Bytes {
    BytecodeBuilder::default().calldata_word(4).calldata_selector().append(SSTORE).stop().build()
}

/// Code that stores its second calldata argument in the slot given by its first, whatever the
/// selector.
pub fn raw_slot_setter_code() -> Bytes {
    BytecodeBuilder::default().calldata_word(36).calldata_word(4).append(SSTORE).stop().build()
}

/// Code that forwards its calldata and call value to `target` and reverts if that call fails.
pub fn forwarder_code(target: Address) -> Bytes {
    BytecodeBuilder::default()
        .copy_calldata()
        .append_many([PUSH0, PUSH0, CALLDATASIZE, PUSH0])
        .append(CALLVALUE)
        .push_address(target)
        .append_many([GAS, CALL])
        .require_success()
        .stop()
        .build()
}

/// Code that delegate-calls `target` with its calldata and reverts if that call fails.
pub fn delegate_forwarder_code(target: Address) -> Bytes {
    BytecodeBuilder::default()
        .copy_calldata()
        .append_many([PUSH0, PUSH0, CALLDATASIZE, PUSH0])
        .push_address(target)
        .append_many([GAS, DELEGATECALL])
        .require_success()
        .stop()
        .build()
}

/// Code that always reverts with `Error(reason)`.
pub fn reverter_code(reason: &str) -> Bytes {
    let data = Revert { reason: reason.to_string() }.abi_encode();
    BytecodeBuilder::default().revert_with_data(data).build()
}

/// Code executing `aggregate3Value(Call3Value[])` calls in order.
///
/// Every call must succeed: the first failure reverts with the callee's revert data,
/// `allowFailure` is ignored and nothing is returned.
pub fn multicall3_code() -> Bytes {
    const STOP_HANDLER: u64 = 3;
    const REVERT_HANDLER: u64 = 5;
    const MAIN: u64 = 13;
    // Scratch words: call count, start of the head section, loop index. Inner calldata goes to
    // `DATA`.
    const COUNT: u64 = 0x00;
    const HEADS: u64 = 0x20;
    const INDEX: u64 = 0x40;
    const DATA: u64 = 0x80;

    let setup = BytecodeBuilder::default()
        .push_number(MAIN)
        .append(JUMP)
        .append_many([JUMPDEST, STOP])
        .append_many([JUMPDEST, RETURNDATASIZE, PUSH0, PUSH0, RETURNDATACOPY])
        .append_many([RETURNDATASIZE, PUSH0, REVERT])
        .append(JUMPDEST)
        .calldata_word(4)
        .push_number(4)
        .append(ADD)
        .append_many([DUP1, CALLDATALOAD])
        .push_number(COUNT)
        .append(MSTORE)
        .push_number(32)
        .append(ADD)
        .push_number(HEADS)
        .append(MSTORE);
    let next_call = setup.len() as u64;
    setup
        .append(JUMPDEST)
        .push_number(COUNT)
        .append(MLOAD)
        .push_number(INDEX)
        .append(MLOAD)
        .append(EQ)
        .push_number(STOP_HANDLER)
        .append(JUMPI)
        // struct = heads + heads[index]
        .push_number(INDEX)
        .append(MLOAD)
        .push_number(32)
        .append(MUL)
        .push_number(HEADS)
        .append(MLOAD)
        .append_many([ADD, CALLDATALOAD])
        .push_number(HEADS)
        .append_many([MLOAD, ADD])
        // data = struct + struct.callData
        .append(DUP1)
        .push_number(96)
        .append_many([ADD, CALLDATALOAD, DUP2, ADD])
        .append_many([DUP1, CALLDATALOAD])
        .append_many([DUP1, DUP3])
        .push_number(32)
        .append(ADD)
        .push_number(DATA)
        .append(CALLDATACOPY)
        .append_many([PUSH0, PUSH0, DUP3])
        .push_number(DATA)
        .append(DUP7)
        .push_number(64)
        .append_many([ADD, CALLDATALOAD])
        .append_many([DUP8, CALLDATALOAD, GAS, CALL, ISZERO])
        .push_number(REVERT_HANDLER)
        .append(JUMPI)
        .append_many([POP, POP, POP])
        .push_number(INDEX)
        .append(MLOAD)
        .push_number(1)
        .append(ADD)
        .push_number(INDEX)
        .append(MSTORE)
        .push_number(next_call)
        .append(JUMP)
        .build()
}
