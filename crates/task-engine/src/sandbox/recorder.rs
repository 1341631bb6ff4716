use core::mem;

use alloy_primitives::{Address, Bytes, B256, U256};
use revm::{
    bytecode::opcode,
    context::{ContextTr, JournalTr, LocalContextTr},
    interpreter::{
        interpreter::EthInterpreter,
        interpreter_types::{InputsTr, Jumps},
        CallInput, CallInputs, CallOutcome, CallScheme, CreateInputs, CreateOutcome, Interpreter,
    },
    Inspector,
};
use tracing::{trace, warn};

use crate::{AccessKind, AccountAccess, StorageAccess, Trace};

/// An inspector that records every call frame and storage access of the transactions it sees.
///
/// Frames are recorded in pre-order: a frame's record is pushed when the frame starts, so a
/// parent always precedes its children. Storage accesses are attached to the innermost open
/// frame. When a frame ends unsuccessfully, its record and the records of all of its descendants
/// are flagged as reverted.
///
/// The recorder is inert until [`start`](AccessRecorder::start) is called, so it can stay
/// installed on every transaction.
#[derive(Debug, Default)]
pub struct AccessRecorder {
    active: bool,
    accesses: Vec<AccountAccess>,
    /// Indices into `accesses` of the currently open frames.
    open_frames: Vec<usize>,
}

impl AccessRecorder {
    /// Creates a new inactive recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the recorder is currently recording.
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Discards anything recorded so far and starts recording.
    pub fn start(&mut self) {
        self.accesses.clear();
        self.open_frames.clear();
        self.active = true;
    }

    /// Stops recording and hands out the recorded trace.
    pub fn stop(&mut self) -> Trace {
        self.active = false;
        self.open_frames.clear();
        Trace::new(mem::take(&mut self.accesses))
    }

    fn open_frame(&mut self, access: AccountAccess) {
        trace!(
            accessor = %access.accessor,
            account = %access.account,
            kind = ?access.kind,
            depth = access.depth,
            "Frame opened"
        );
        self.open_frames.push(self.accesses.len());
        self.accesses.push(access);
    }

    fn close_frame(&mut self, success: bool) {
        let Some(index) = self.open_frames.pop() else { return };
        if !success {
            // Everything recorded after the frame's own record belongs to its subtree.
            for access in &mut self.accesses[index..] {
                access.reverted = true;
            }
        }
    }

    fn current_frame(&mut self) -> Option<&mut AccountAccess> {
        let index = *self.open_frames.last()?;
        self.accesses.get_mut(index)
    }
}

impl<CTX: ContextTr> Inspector<CTX, EthInterpreter> for AccessRecorder {
    fn call(&mut self, context: &mut CTX, inputs: &mut CallInputs) -> Option<CallOutcome> {
        if !self.active {
            return None;
        }
        let (accessor, account, kind) = match inputs.scheme {
            CallScheme::Call => (inputs.caller, inputs.target_address, AccessKind::Call),
            CallScheme::StaticCall => (inputs.caller, inputs.target_address, AccessKind::StaticCall),
            // The executing account is the one whose storage is used, the code comes from
            // `bytecode_address`.
            CallScheme::DelegateCall => {
                (inputs.target_address, inputs.bytecode_address, AccessKind::DelegateCall)
            }
            CallScheme::CallCode => {
                (inputs.target_address, inputs.bytecode_address, AccessKind::CallCode)
            }
        };
        let access = AccountAccess {
            accessor,
            account,
            kind,
            value: inputs.transfer_value().unwrap_or_default(),
            calldata: call_input_bytes(context, &inputs.input),
            depth: self.open_frames.len(),
            reverted: false,
            storage_accesses: Vec::new(),
        };
        self.open_frame(access);
        None
    }

    fn call_end(&mut self, _context: &mut CTX, _inputs: &CallInputs, outcome: &mut CallOutcome) {
        if self.active {
            self.close_frame(outcome.result.result.is_ok());
        }
    }

    fn create(&mut self, _context: &mut CTX, inputs: &mut CreateInputs) -> Option<CreateOutcome> {
        if !self.active {
            return None;
        }
        let access = AccountAccess {
            accessor: inputs.caller,
            // Filled in once the address is known.
            account: Address::ZERO,
            kind: AccessKind::Create,
            value: inputs.value,
            calldata: inputs.init_code.clone(),
            depth: self.open_frames.len(),
            reverted: false,
            storage_accesses: Vec::new(),
        };
        self.open_frame(access);
        None
    }

    fn create_end(
        &mut self,
        _context: &mut CTX,
        _inputs: &CreateInputs,
        outcome: &mut CreateOutcome,
    ) {
        if !self.active {
            return;
        }
        if let (Some(address), Some(frame)) = (outcome.address, self.current_frame()) {
            frame.account = address;
        }
        self.close_frame(outcome.result.result.is_ok());
    }

    fn step(&mut self, interp: &mut Interpreter<EthInterpreter>, context: &mut CTX) {
        if !self.active {
            return;
        }
        let is_write = match interp.bytecode.opcode() {
            opcode::SSTORE => true,
            opcode::SLOAD => false,
            _ => return,
        };
        let stack = interp.stack.data();
        let depth = stack.len();
        if depth < 1 + usize::from(is_write) {
            // The instruction itself will halt with a stack underflow.
            return;
        }
        let key = stack[depth - 1];
        let new_value = is_write.then(|| stack[depth - 2]);
        let account = interp.input.target_address();

        let previous_value = match context.journal_mut().sload(account, key) {
            Ok(load) => load.data,
            Err(err) => {
                warn!(%account, %key, ?err, "Failed to load storage slot for access record");
                U256::ZERO
            }
        };
        let access = StorageAccess {
            account,
            slot: B256::from(key),
            is_write,
            previous_value: B256::from(previous_value),
            new_value: B256::from(new_value.unwrap_or(previous_value)),
        };
        trace!(%account, slot = %access.slot, is_write, "Storage access");
        if let Some(frame) = self.current_frame() {
            frame.storage_accesses.push(access);
        }
    }
}

/// Resolves the calldata of a call frame, which may live in the caller's shared memory.
fn call_input_bytes<CTX: ContextTr>(context: &CTX, input: &CallInput) -> Bytes {
    match input {
        CallInput::SharedBuffer(range) => context
            .local()
            .shared_memory_buffer_slice(range.clone())
            .map(|slice| Bytes::copy_from_slice(&slice))
            .unwrap_or_default(),
        CallInput::Bytes(bytes) => bytes.clone(),
    }
}
