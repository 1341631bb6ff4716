//! Error types for task execution.
//!
//! Errors are grouped by the phase that detects them. Every error is local to one task run and
//! nothing is retried: state may have moved, so the operator re-invokes the task by hand.

use alloy_primitives::{Address, Bytes, B256, U256};

use crate::{registry::RegistryError, sandbox::SandboxError, TaskStage};

/// Result type used throughout the engine.
pub type Result<T, E = TaskError> = core::result::Result<T, E>;

/// Top-level error of a task run.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Missing or malformed task configuration, or an identifier the registry cannot resolve.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The recorded actions are malformed. Raised while building.
    #[error(transparent)]
    Structural(#[from] StructuralError),

    /// The task executes but exceeds the authority it was approved for. Raised while validating.
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),

    /// A call reverted while building or simulating.
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// The sandbox failed underneath the engine.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// A phase was invoked out of order.
    #[error(transparent)]
    Stage(#[from] StageError),

    /// The sandbox could not be rolled back and is now in an inconsistent state.
    ///
    /// No further task may run against the same sandbox instance.
    #[error("unrecoverable sandbox failure: {0}")]
    Unrecoverable(String),

    /// A failure reported by task-specific validation logic.
    #[error("task validation failed: {0}")]
    Custom(String),
}

impl TaskError {
    /// Returns `true` if the sandbox must not be used for any further task.
    pub const fn is_unrecoverable(&self) -> bool {
        matches!(self, Self::Unrecoverable(_) | Self::Sandbox(SandboxError::Poisoned))
    }
}

/// Configuration errors. Always raised before any state mutation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The task configuration could not be parsed.
    #[error("malformed task config: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A required field is empty.
    #[error("task config field `{0}` must not be empty")]
    MissingField(&'static str),

    /// The registry could not resolve an identifier.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors in the shape of the recorded actions.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StructuralError {
    /// Two recorded actions share target, calldata and value.
    #[error("duplicate action: target {target}, value {value}, calldata hash {calldata_hash}")]
    DuplicateAction {
        /// The call target.
        target: Address,
        /// The value sent with the call.
        value: U256,
        /// `keccak256` of the calldata.
        calldata_hash: B256,
    },

    /// A recorded action carries neither calldata nor value.
    #[error("action to {target} has empty calldata and zero value")]
    EmptyAction {
        /// The call target.
        target: Address,
    },

    /// An action targets the zero address.
    #[error("action #{index} targets the zero address")]
    ZeroTarget {
        /// Position of the offending action.
        index: usize,
    },

    /// A delegate call reached a target that is not authorized for delegate calls.
    #[error("unauthorized delegate call from {accessor} to {target}")]
    UnauthorizedDelegateCall {
        /// The contract whose storage context was used.
        accessor: Address,
        /// The code that was delegate-called.
        target: Address,
    },

    /// Calldata generation was requested but the build recorded no actions.
    #[error("no actions found")]
    NoActions,

    /// The batch calldata could not be decoded back into sub-calls.
    #[error("malformed batch calldata: {0}")]
    MalformedBatch(String),
}

/// The task executes but is not within the approved authority.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthorizationError {
    /// Storage of an account outside the allow-list changed.
    #[error("unauthorized storage access to {account}")]
    UnauthorizedStorageAccess {
        /// The account whose state changed.
        account: Address,
    },

    /// The Safe owner list changed although owner changes are not allowed.
    #[error("safe owners changed: expected {expected:?}, found {actual:?}")]
    OwnersChanged {
        /// Owners at task initialization.
        expected: Vec<Address>,
        /// Owners after simulation.
        actual: Vec<Address>,
    },

    /// The Safe threshold changed although configuration changes are not allowed.
    #[error("safe threshold changed: expected {expected}, found {actual}")]
    ThresholdChanged {
        /// Threshold at task initialization.
        expected: U256,
        /// Threshold after simulation.
        actual: U256,
    },

    /// The enabled module list changed although configuration changes are not allowed.
    #[error("safe modules changed: expected {expected:?}, found {actual:?}")]
    ModulesChanged {
        /// Modules at task initialization.
        expected: Vec<Address>,
        /// Modules after simulation.
        actual: Vec<Address>,
    },

    /// The fallback handler slot changed although configuration changes are not allowed.
    #[error("safe fallback handler changed: expected {expected}, found {actual}")]
    FallbackHandlerChanged {
        /// Slot value at task initialization.
        expected: B256,
        /// Slot value after simulation.
        actual: B256,
    },

    /// The guard slot changed although configuration changes are not allowed.
    #[error("safe guard changed: expected {expected}, found {actual}")]
    GuardChanged {
        /// Slot value at task initialization.
        expected: B256,
        /// Slot value after simulation.
        actual: B256,
    },

    /// The proxy singleton (implementation) changed although configuration changes are not
    /// allowed.
    #[error("safe singleton changed: expected {expected}, found {actual}")]
    SingletonChanged {
        /// Singleton at task initialization.
        expected: Address,
        /// Singleton after simulation.
        actual: Address,
    },

    /// The reported Safe version changed although configuration changes are not allowed.
    #[error("safe version changed: expected {expected:?}, found {actual:?}")]
    VersionChanged {
        /// Version at task initialization.
        expected: Option<String>,
        /// Version after simulation.
        actual: Option<String>,
    },

    /// The Safe nonce did not advance by exactly one.
    #[error("safe nonce mismatch: expected {expected}, found {actual}")]
    NonceMismatch {
        /// Pre-build nonce plus one.
        expected: U256,
        /// Nonce after simulation.
        actual: U256,
    },
}

/// A call failed during build or simulation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ExecutionError {
    /// A call reverted. `reason` is the decoded revert reason, verbatim.
    #[error("call to {target} reverted: {reason}")]
    Reverted {
        /// The call target.
        target: Address,
        /// Decoded revert reason.
        reason: String,
        /// Raw revert data.
        output: Bytes,
    },

    /// The batch target has no code to execute the batch with.
    #[error("batch target {target} has no code")]
    MissingCode {
        /// The batch target.
        target: Address,
    },

    /// A call returned data that could not be decoded as the expected return type.
    #[error("call to {target} returned undecodable data: {message}")]
    Decode {
        /// The call target.
        target: Address,
        /// Decoder message.
        message: String,
    },

    /// Simulation wrote a different final value than the build recorded.
    #[error("simulation diverged from build at {account} slot {slot}: built {built:?}, simulated {simulated:?}")]
    SimulationMismatch {
        /// The account whose storage diverged.
        account: Address,
        /// The diverging slot.
        slot: B256,
        /// Final value recorded while building, if written.
        built: Option<B256>,
        /// Final value written while simulating, if written.
        simulated: Option<B256>,
    },
}

/// A task phase was invoked in the wrong stage.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("cannot {phase} a task in stage {stage:?}")]
pub struct StageError {
    /// The phase that was requested.
    pub phase: &'static str,
    /// The stage the task was in.
    pub stage: TaskStage,
}
