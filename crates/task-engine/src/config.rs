//! Task and engine configuration.

use alloy_primitives::Address;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use task_contracts::multicall::MULTICALL3_ADDRESS;

use crate::{AllowedStorageAccess, ConfigError};

/// Per-task configuration, as written by the task author.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    /// Registry identifier of the Safe that executes the task.
    pub safe_address_identifier: String,
    /// Registry identifiers of contracts whose storage may change.
    #[serde(default)]
    pub allowed_storage_accesses: Vec<String>,
    /// Registry identifiers of contracts that may be delegate-called.
    #[serde(default)]
    pub authorized_delegate_calls: Vec<String>,
    /// Whether the Safe owner list may change.
    #[serde(default)]
    pub owner_change_allowed: bool,
    /// Whether the Safe threshold, modules, fallback handler, guard or version may change.
    #[serde(default)]
    pub config_change_allowed: bool,
    /// A fixed Safe nonce to sign over instead of the live one.
    #[serde(default)]
    pub nonce: Option<u64>,
}

impl TaskConfig {
    /// Parses and checks a JSON task configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.check()?;
        Ok(config)
    }

    /// Checks that required fields are present.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.safe_address_identifier.trim().is_empty() {
            return Err(ConfigError::MissingField("safeAddressIdentifier"));
        }
        Ok(())
    }

    /// Returns the allow-list for `network_id`.
    pub fn allowed_storage_accesses_on(&self, network_id: u64) -> Vec<AllowedStorageAccess> {
        self.allowed_storage_accesses
            .iter()
            .map(|identifier| AllowedStorageAccess { identifier: identifier.clone(), network_id })
            .collect()
    }
}

bitflags! {
    /// The phases a task run executes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Phases: u8 {
        /// Record the proposal and derive its actions.
        const BUILD = 1 << 0;
        /// Execute the encoded batch as the Safe.
        const SIMULATE = 1 << 1;
        /// Check the resulting state changes against the allow-list and Safe invariants.
        const VALIDATE = 1 << 2;
        /// Produce the structured report.
        const REPORT = 1 << 3;
    }
}

impl Default for Phases {
    fn default() -> Self {
        Self::all()
    }
}

/// Engine configuration, fixed when a task is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Network the task runs on. Used for registry resolution.
    pub network_id: u64,
    /// Phases executed by [`MultisigTask::run`](crate::MultisigTask::run).
    pub phases: Phases,
    /// Target of the batched call. `Multicall3` unless overridden.
    pub batch_target: Address,
    /// Check that simulation advanced the Safe nonce by exactly one.
    pub validate_live_nonce: bool,
    /// Check Safe invariants even when the Safe's own storage was not touched.
    pub always_check_safe_invariants: bool,
    /// Upper bound on owner and module linked-list walks.
    pub max_list_entries: usize,
}

impl EngineConfig {
    /// Creates a configuration for `network_id` with every phase and check enabled.
    pub const fn new(network_id: u64) -> Self {
        Self {
            network_id,
            phases: Phases::all(),
            batch_target: MULTICALL3_ADDRESS,
            validate_live_nonce: true,
            always_check_safe_invariants: false,
            max_list_entries: 100,
        }
    }

    /// Sets the phases to run.
    pub const fn with_phases(mut self, phases: Phases) -> Self {
        self.phases = phases;
        self
    }

    /// Sets the batch-call target.
    pub const fn with_batch_target(mut self, batch_target: Address) -> Self {
        self.batch_target = batch_target;
        self
    }

    /// Enables or disables the nonce progression check.
    pub const fn with_live_nonce_validation(mut self, enabled: bool) -> Self {
        self.validate_live_nonce = enabled;
        self
    }

    /// Enables or disables unconditional Safe invariant checks.
    pub const fn with_always_check_safe_invariants(mut self, enabled: bool) -> Self {
        self.always_check_safe_invariants = enabled;
        self
    }
}
