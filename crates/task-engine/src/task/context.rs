use alloy_primitives::{hex, map::HashMap, Address, Bytes, B256, U256};
use alloy_sol_types::{Panic, Revert, SolCall, SolError};

use crate::{
    classify::ClassifiedTrace, registry::AddressRegistry, safe::SafeState, sandbox::Sandbox,
    Action, ConfigError, ExecutionError, Result, StateInfo, TaskConfig, Trace, TransferInfo,
};

/// The environment a [`Proposal`](super::Proposal) builds its actions in.
///
/// Every call made through the context is sent as the Safe and recorded. Once the build returns,
/// all state changes are rolled back and the recorded calls are classified.
pub struct BuildContext<'a> {
    sandbox: &'a mut dyn Sandbox,
    registry: &'a dyn AddressRegistry,
    network_id: u64,
    safe: Address,
    labels: HashMap<Address, String>,
}

impl core::fmt::Debug for BuildContext<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BuildContext")
            .field("network_id", &self.network_id)
            .field("safe", &self.safe)
            .finish_non_exhaustive()
    }
}

impl<'a> BuildContext<'a> {
    pub(crate) fn new(
        sandbox: &'a mut dyn Sandbox,
        registry: &'a dyn AddressRegistry,
        network_id: u64,
        safe: Address,
    ) -> Self {
        Self { sandbox, registry, network_id, safe, labels: HashMap::default() }
    }

    pub(crate) fn into_labels(self) -> HashMap<Address, String> {
        self.labels
    }

    /// The Safe the build runs as.
    pub const fn safe(&self) -> Address {
        self.safe
    }

    /// The network the task targets.
    pub const fn network_id(&self) -> u64 {
        self.network_id
    }

    /// Resolves `identifier` on the task network. The name is used in action descriptions.
    pub fn resolve(&mut self, identifier: &str) -> Result<Address> {
        let address =
            self.registry.resolve(identifier, self.network_id).map_err(ConfigError::from)?;
        self.labels.entry(address).or_insert_with(|| identifier.to_string());
        Ok(address)
    }

    /// Calls `target` with `calldata` and returns the output. A revert is an error.
    pub fn call(&mut self, target: Address, calldata: impl Into<Bytes>) -> Result<Bytes> {
        self.call_with_value(target, U256::ZERO, calldata)
    }

    /// Calls `target` with `calldata` and `value`. A revert is an error.
    pub fn call_with_value(
        &mut self,
        target: Address,
        value: U256,
        calldata: impl Into<Bytes>,
    ) -> Result<Bytes> {
        let output = self.sandbox.raw_call(target, value, calldata.into())?;
        if !output.success {
            return Err(ExecutionError::Reverted {
                target,
                reason: decode_revert_reason(&output.output),
                output: output.output,
            }
            .into());
        }
        Ok(output.output)
    }

    /// Sends `value` native currency to `to`.
    pub fn transfer(&mut self, to: Address, value: U256) -> Result<()> {
        self.call_with_value(to, value, Bytes::new()).map(drop)
    }

    /// Calls `target` with a typed call and decodes its return value.
    pub fn sol_call<C: SolCall>(&mut self, target: Address, call: C) -> Result<C::Return> {
        let output = self.call(target, call.abi_encode())?;
        decode_return::<C>(target, &output)
    }

    /// Performs a read-only typed call that is neither recorded nor committed.
    pub fn view<C: SolCall>(&self, target: Address, call: C) -> Result<C::Return> {
        view::<C>(&*self.sandbox, self.safe, target, call)
    }

    /// Reads a storage slot.
    pub fn storage(&self, account: Address, slot: B256) -> Result<B256> {
        Ok(self.sandbox.storage(account, slot)?)
    }
}

/// Everything a [`Proposal`](super::Proposal) may inspect in its own validation hook.
pub struct ValidationContext<'a> {
    pub(crate) sandbox: &'a dyn Sandbox,
    pub(crate) registry: &'a dyn AddressRegistry,
    pub(crate) config: &'a TaskConfig,
    pub(crate) network_id: u64,
    pub(crate) safe: Address,
    pub(crate) initial_state: &'a SafeState,
    pub(crate) classified: &'a ClassifiedTrace,
    pub(crate) simulation: &'a Trace,
}

impl core::fmt::Debug for ValidationContext<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ValidationContext")
            .field("network_id", &self.network_id)
            .field("safe", &self.safe)
            .finish_non_exhaustive()
    }
}

impl ValidationContext<'_> {
    /// The Safe the task runs as.
    pub const fn safe(&self) -> Address {
        self.safe
    }

    /// The network the task targets.
    pub const fn network_id(&self) -> u64 {
        self.network_id
    }

    /// The task configuration.
    pub const fn config(&self) -> &TaskConfig {
        self.config
    }

    /// The Safe configuration when the task was created.
    pub const fn initial_state(&self) -> &SafeState {
        self.initial_state
    }

    /// The actions of the build.
    pub fn actions(&self) -> &[Action] {
        self.classified.actions.as_slice()
    }

    /// Storage writes of the build to `account`.
    pub fn state_changes(&self, account: &Address) -> &[StateInfo] {
        self.classified.state_changes.get(account)
    }

    /// Transfers of the build sent from `account`.
    pub fn transfers(&self, account: &Address) -> &[TransferInfo] {
        self.classified.transfers.get(account)
    }

    /// The trace recorded while simulating.
    pub const fn simulation_trace(&self) -> &Trace {
        self.simulation
    }

    /// Resolves `identifier` on the task network.
    pub fn resolve(&self, identifier: &str) -> Result<Address> {
        Ok(self.registry.resolve(identifier, self.network_id).map_err(ConfigError::from)?)
    }

    /// Reads a storage slot of the post-simulation state.
    pub fn storage(&self, account: Address, slot: B256) -> Result<B256> {
        Ok(self.sandbox.storage(account, slot)?)
    }

    /// Performs a read-only typed call against the post-simulation state.
    pub fn view<C: SolCall>(&self, target: Address, call: C) -> Result<C::Return> {
        view::<C>(self.sandbox, self.safe, target, call)
    }
}

fn view<C: SolCall>(
    sandbox: &dyn Sandbox,
    from: Address,
    target: Address,
    call: C,
) -> Result<C::Return> {
    let output = sandbox.static_call(from, target, call.abi_encode().into())?;
    if !output.success {
        return Err(ExecutionError::Reverted {
            target,
            reason: decode_revert_reason(&output.output),
            output: output.output,
        }
        .into());
    }
    decode_return::<C>(target, &output.output)
}

fn decode_return<C: SolCall>(target: Address, output: &[u8]) -> Result<C::Return> {
    C::abi_decode_returns(output)
        .map_err(|err| ExecutionError::Decode { target, message: err.to_string() }.into())
}

/// Decodes revert data into a human-readable reason.
///
/// `Error(string)` yields the string itself, `Panic(uint256)` its description, anything else
/// the raw data in hex.
pub fn decode_revert_reason(output: &[u8]) -> String {
    if output.is_empty() {
        return "(empty)".to_string();
    }
    if let Ok(revert) = Revert::abi_decode(output) {
        return revert.reason;
    }
    if let Ok(panic) = Panic::abi_decode(output) {
        return match panic.kind() {
            Some(kind) => format!("Panic: {kind}"),
            None => format!("Panic(0x{:x})", panic.code),
        };
    }
    format!("0x{}", hex::encode(output))
}
