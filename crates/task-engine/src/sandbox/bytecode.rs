//! A small EVM assembler, and the proxy code [`Sandbox::delegate_call`] installs.
//!
//! [`Sandbox::delegate_call`]: super::Sandbox::delegate_call

use alloy_primitives::{b256, Address, Bytes, B256, U256};
use revm::bytecode::opcode::{
    CALLDATACOPY, CALLDATALOAD, CALLDATASIZE, DELEGATECALL, DUP5, GAS, JUMP, JUMPDEST, JUMPI,
    MSTORE, PUSH0, RETURN, RETURNDATACOPY, RETURNDATASIZE, REVERT, SHR, SSTORE, STOP, TLOAD,
    TSTORE,
};

/// Transient slot the delegate proxy marks once it has been entered.
pub const DELEGATE_PROXY_ENTERED_SLOT: B256 =
    b256!("0x3d1c0a5b0e3f6f0f4d0c5d7a8e9b2a1c6f4e3d2c1b0a99887766554433221101");

/// Jump destinations of [`delegate_proxy_code`].
const PROXY_REENTRY: u8 = 97;
const PROXY_DISPATCH: u8 = 119;
const PROXY_SUCCESS: u8 = 141;

/// A builder for assembling EVM bytecode.
#[derive(Debug, Default)]
pub struct BytecodeBuilder {
    code: Vec<u8>,
}

impl BytecodeBuilder {
    /// Build the bytecode.
    pub fn build(self) -> Bytes {
        self.code.into()
    }

    /// Get the length of the bytecode.
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Check if the bytecode is empty.
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Append a single opcode or byte.
    pub fn append(mut self, opcode: u8) -> Self {
        self.code.push(opcode);
        self
    }

    /// Append a series of opcodes or bytes.
    pub fn append_many(mut self, items: impl IntoIterator<Item = u8>) -> Self {
        self.code.extend(items);
        self
    }

    /// Append a PUSH opcode and the bytes to push.
    pub fn push_bytes(mut self, bytes: impl AsRef<[u8]>) -> Self {
        let bytes: &[u8] = bytes.as_ref();
        assert!(!bytes.is_empty() && bytes.len() <= 32);
        self.code.push(PUSH0 + bytes.len() as u8);
        self.code.extend_from_slice(bytes);
        self
    }

    /// Append a PUSH opcode and the number to push.
    pub fn push_number(self, number: u64) -> Self {
        if number == 0 {
            return self.append(PUSH0);
        }
        let bytes = number.to_be_bytes();
        let skip = bytes.iter().take_while(|byte| **byte == 0).count();
        self.push_bytes(&bytes[skip..])
    }

    /// Append a PUSH opcode and the address to push.
    pub fn push_address(self, address: Address) -> Self {
        self.push_bytes(address)
    }

    /// Append a PUSH opcode and the u256 value to push.
    pub fn push_u256(self, value: U256) -> Self {
        self.push_bytes(value.to_be_bytes::<32>())
    }

    /// Push the 32-byte calldata word at `offset`.
    pub fn calldata_word(self, offset: u64) -> Self {
        self.push_number(offset).append(CALLDATALOAD)
    }

    /// Push the 4-byte function selector of the calldata.
    pub fn calldata_selector(self) -> Self {
        self.calldata_word(0).push_number(0xe0).append(SHR)
    }

    /// Copy the whole calldata to memory offset zero.
    pub fn copy_calldata(self) -> Self {
        self.append_many([CALLDATASIZE, PUSH0, PUSH0, CALLDATACOPY])
    }

    /// Append a series of MSTORE opcodes to store the given bytes at the given offset.
    pub fn mstore(self, offset: usize, bytes: impl AsRef<[u8]>) -> Self {
        let mut padded = bytes.as_ref().to_vec();
        padded.resize(padded.len().div_ceil(32) * 32, 0);
        let mut this = self;
        for (i, chunk) in padded.chunks(32).enumerate() {
            this = this.push_bytes(chunk);
            this = this.push_number((offset + i * 32) as u64);
            this.code.push(MSTORE);
        }
        this
    }

    /// Append an SSTORE of `value` at `slot`.
    pub fn sstore(self, slot: U256, value: U256) -> Self {
        self.push_u256(value).push_u256(slot).append(SSTORE)
    }

    /// Revert unless the value on top of the stack is non-zero.
    pub fn require_success(self) -> Self {
        // PUSH1 <dest> JUMPI PUSH0 PUSH0 REVERT JUMPDEST
        let dest = self.len() + 6;
        self.push_bytes([dest as u8]).append(JUMPI).revert().append(JUMPDEST)
    }

    /// Append a REVERT opcode with empty return data.
    pub fn revert(self) -> Self {
        self.append_many([PUSH0, PUSH0, REVERT])
    }

    /// Append a REVERT opcode with the given return data.
    pub fn revert_with_data(self, data: impl AsRef<[u8]>) -> Self {
        let data_len = data.as_ref().len() as u64;
        self.mstore(0x0, data).push_number(data_len).push_number(0x0).append(REVERT)
    }

    /// Append a STOP opcode.
    pub fn stop(self) -> Self {
        self.append(STOP)
    }
}

/// Code that runs as a stand-in for an account's own code during a delegate call.
///
/// The first entry in a transaction delegate-calls `target`; later entries delegate-call
/// `fallback`, which holds the account's original code. Return data and reverts are passed
/// through unchanged.
pub fn delegate_proxy_code(target: Address, fallback: Address) -> Bytes {
    BytecodeBuilder::default()
        .push_bytes(DELEGATE_PROXY_ENTERED_SLOT)
        .append(TLOAD)
        .push_bytes([PROXY_REENTRY])
        .append(JUMPI)
        .push_number(1)
        .push_bytes(DELEGATE_PROXY_ENTERED_SLOT)
        .append(TSTORE)
        .push_address(target)
        .push_bytes([PROXY_DISPATCH])
        .append(JUMP)
        .append(JUMPDEST)
        .push_address(fallback)
        .append(JUMPDEST)
        .copy_calldata()
        .append_many([PUSH0, PUSH0, CALLDATASIZE, PUSH0, DUP5, GAS, DELEGATECALL])
        .append_many([RETURNDATASIZE, PUSH0, PUSH0, RETURNDATACOPY])
        .push_bytes([PROXY_SUCCESS])
        .append(JUMPI)
        .append_many([RETURNDATASIZE, PUSH0, REVERT])
        .append(JUMPDEST)
        .append_many([RETURNDATASIZE, PUSH0, RETURN])
        .build()
}
