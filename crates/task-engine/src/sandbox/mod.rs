//! Execution sandbox for recording and replaying task calls.
//!
//! The engine talks to the ledger only through the [`Sandbox`] trait. A sandbox can snapshot and
//! roll back its state, impersonate any account, and record every call frame and storage access
//! made while a trace is running.
//!
//! # Scoped recording
//!
//! [`Sandbox::begin_scoped_recording`] and [`Sandbox::end_scoped_recording`] bracket the
//! execution of a proposal's build logic:
//!
//! 1. a snapshot is taken,
//! 2. the designated caller is impersonated and the trace recorder is started,
//! 3. the build logic runs and mutates state freely,
//! 4. the recorder is stopped and the state is reverted to the snapshot.
//!
//! The returned [`Trace`] is the only evidence of what the build did; the ledger itself is back
//! at its pre-build state. If the revert fails the sandbox is poisoned and the error is
//! [`TaskError::Unrecoverable`].
//!
//! # Module Structure
//!
//! - `bytecode` - [`BytecodeBuilder`] and the proxy code behind [`Sandbox::delegate_call`]
//! - `evm` - [`EvmSandbox`], a revm-backed in-memory sandbox
//! - `recorder` - [`AccessRecorder`], the revm inspector that produces [`Trace`]s
//! - `error` - [`SandboxError`]

mod bytecode;
mod error;
mod evm;
mod recorder;

pub use bytecode::*;
pub use error::*;
pub use evm::*;
pub use recorder::*;

use alloy_primitives::{Address, Bytes, B256, U256};
use auto_impl::auto_impl;
use tracing::{debug, error};

use crate::{CallOutput, TaskError, Trace};

/// Handle of a state snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
#[display("snapshot#{_0}")]
pub struct SnapshotId(pub usize);

/// The ledger operations the engine relies on.
#[auto_impl(&mut, Box)]
pub trait Sandbox {
    /// The adapter's own address, used as caller when nobody is impersonated.
    fn address(&self) -> Address;

    /// The chain id transactions execute with.
    fn chain_id(&self) -> u64;

    /// Takes a snapshot of the current state.
    fn snapshot(&mut self) -> Result<SnapshotId, SandboxError>;

    /// Restores the state captured by `snapshot`, discarding it and every later snapshot.
    ///
    /// Returns `false` if the snapshot is unknown, in which case the sandbox is poisoned.
    fn revert(&mut self, snapshot: SnapshotId) -> bool;

    /// Forgets `snapshot` and every later snapshot while keeping the current state.
    ///
    /// Returns `false` if the snapshot is unknown, in which case the sandbox is poisoned.
    fn discard_snapshot(&mut self, snapshot: SnapshotId) -> bool;

    /// Sends subsequent [`raw_call`](Sandbox::raw_call)s from `account`.
    fn impersonate(&mut self, account: Address);

    /// Stops impersonating.
    fn stop_impersonate(&mut self);

    /// Starts recording call frames and storage accesses.
    fn start_trace(&mut self);

    /// Stops recording and returns everything recorded since [`start_trace`](Sandbox::start_trace).
    fn stop_trace(&mut self) -> Trace;

    /// Executes a call and commits its state changes. Reverts are reported through
    /// [`CallOutput::success`], not as errors.
    fn raw_call(
        &mut self,
        target: Address,
        value: U256,
        calldata: Bytes,
    ) -> Result<CallOutput, SandboxError>;

    /// Runs `calldata` against the code of `target` in the context of the current caller, like a
    /// `DELEGATECALL` issued by that caller, and commits the result.
    ///
    /// Calls the caller makes to itself meanwhile still run its own code. Reverts are reported
    /// through [`CallOutput::success`].
    fn delegate_call(&mut self, target: Address, calldata: Bytes)
        -> Result<CallOutput, SandboxError>;

    /// Executes a call from `from` without committing or recording anything.
    fn static_call(
        &self,
        from: Address,
        target: Address,
        calldata: Bytes,
    ) -> Result<CallOutput, SandboxError>;

    /// Reads a storage slot.
    fn storage(&self, account: Address, slot: B256) -> Result<B256, SandboxError>;

    /// Reads the runtime code of an account, empty if it has none.
    fn code(&self, account: Address) -> Result<Bytes, SandboxError>;

    /// Reads a native balance.
    fn balance(&self, account: Address) -> Result<U256, SandboxError>;

    /// Overwrites a storage slot.
    fn set_storage(&mut self, account: Address, slot: B256, value: B256)
        -> Result<(), SandboxError>;

    /// Overwrites a native balance.
    fn set_balance(&mut self, account: Address, balance: U256) -> Result<(), SandboxError>;

    /// Overwrites the runtime code of an account.
    fn set_code(&mut self, account: Address, code: Bytes) -> Result<(), SandboxError>;

    /// Snapshots the state, impersonates `caller` and starts recording.
    fn begin_scoped_recording(&mut self, caller: Address) -> Result<SnapshotId, SandboxError> {
        let snapshot = self.snapshot()?;
        self.impersonate(caller);
        self.start_trace();
        debug!(%caller, %snapshot, "Scoped recording started");
        Ok(snapshot)
    }

    /// Stops recording, stops impersonating and reverts to `snapshot`.
    fn end_scoped_recording(&mut self, snapshot: SnapshotId) -> Result<Trace, TaskError> {
        let trace = self.stop_trace();
        self.stop_impersonate();
        if !self.revert(snapshot) {
            error!(%snapshot, "Rollback after recording failed");
            return Err(TaskError::Unrecoverable(format!("failed to revert to {snapshot}")));
        }
        debug!(%snapshot, records = trace.len(), "Scoped recording finished");
        Ok(trace)
    }
}
