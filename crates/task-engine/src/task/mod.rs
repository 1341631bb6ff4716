//! Task orchestration.
//!
//! A [`MultisigTask`] pairs a [`Proposal`] with the sandbox, the registry and the configuration it
//! runs against, and walks it through the phases of one build cycle:
//!
//! ```text
//! Initialized --build--> Built --simulate--> Simulated --validate--> Validated
//! ```
//!
//! Each phase may only run from the stage before it. [`MultisigTask::reset`] returns to
//! [`TaskStage::Initialized`] and discards everything derived from the previous build.

mod context;
pub use context::*;

mod proposal;
pub use proposal::*;

use alloy_primitives::{map::HashSet, Address, Bytes, U256};
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    classify::{classify, ClassifiedTrace, ClassifyParams},
    encode_batch,
    registry::AddressRegistry,
    safe::{read_nonce, SafeState, SafeTransaction, SignerPayload},
    sandbox::Sandbox,
    simulate::simulate_batch,
    validate::{
        check_coverage, check_nonce, check_safe_invariants, resolve_allow_list, resolve_delegates,
    },
    Action, ConfigError, EngineConfig, Phases, Result, StageError, TaskConfig, TaskReport, Trace,
};

/// Progress of a task through its build cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum TaskStage {
    /// Created, nothing built yet.
    Initialized,
    /// Actions recorded and classified.
    Built,
    /// The batch executed successfully against the sandbox.
    Simulated,
    /// Every authorization check passed.
    Validated,
}

/// One governance task run against one sandbox.
#[derive(Debug)]
pub struct MultisigTask<P, S, R> {
    config: TaskConfig,
    engine: EngineConfig,
    proposal: P,
    sandbox: S,
    registry: R,
    safe: Address,
    initial_state: SafeState,
    stage: TaskStage,
    build_trace: Trace,
    classified: ClassifiedTrace,
    simulation_trace: Trace,
}

impl<P, S, R> MultisigTask<P, S, R>
where
    P: Proposal,
    S: Sandbox,
    R: AddressRegistry,
{
    /// Creates a task, resolving the Safe and snapshotting its configuration.
    ///
    /// Fails with a configuration error before touching any state if the configuration is
    /// incomplete or the Safe identifier does not resolve.
    pub fn new(
        config: TaskConfig,
        engine: EngineConfig,
        proposal: P,
        sandbox: S,
        registry: R,
    ) -> Result<Self> {
        config.check()?;
        let safe = registry
            .resolve(&config.safe_address_identifier, engine.network_id)
            .map_err(ConfigError::from)?;
        let initial_state = SafeState::load(&sandbox, safe, engine.max_list_entries)?;
        info!(%safe, network_id = engine.network_id, "Task created");
        Ok(Self {
            config,
            engine,
            proposal,
            sandbox,
            registry,
            safe,
            initial_state,
            stage: TaskStage::Initialized,
            build_trace: Trace::default(),
            classified: ClassifiedTrace::default(),
            simulation_trace: Trace::default(),
        })
    }

    /// The current stage.
    pub const fn stage(&self) -> TaskStage {
        self.stage
    }

    /// The Safe executing the task.
    pub const fn safe(&self) -> Address {
        self.safe
    }

    /// The Safe configuration when the task was created.
    pub const fn initial_state(&self) -> &SafeState {
        &self.initial_state
    }

    /// The task configuration.
    pub const fn config(&self) -> &TaskConfig {
        &self.config
    }

    /// The recorded actions, empty before a successful build.
    pub fn actions(&self) -> &[Action] {
        self.classified.actions.as_slice()
    }

    /// The classified diff of the last successful build.
    pub const fn classified(&self) -> &ClassifiedTrace {
        &self.classified
    }

    /// The raw trace of the last successful build.
    pub const fn build_trace(&self) -> &Trace {
        &self.build_trace
    }

    /// The trace of the last simulation.
    pub const fn simulation_trace(&self) -> &Trace {
        &self.simulation_trace
    }

    /// The sandbox the task runs against.
    pub const fn sandbox(&self) -> &S {
        &self.sandbox
    }

    /// Mutable access to the sandbox, e.g. to prepare state before building.
    pub fn sandbox_mut(&mut self) -> &mut S {
        &mut self.sandbox
    }

    /// Consumes the task, returning the sandbox.
    pub fn into_sandbox(self) -> S {
        self.sandbox
    }

    fn require_stage(&self, phase: &'static str, allowed: &[TaskStage]) -> Result<()> {
        if !allowed.contains(&self.stage) {
            return Err(StageError { phase, stage: self.stage }.into());
        }
        Ok(())
    }

    /// Runs the proposal's build logic as the Safe inside a recording window, rolls it back and
    /// classifies the recorded trace.
    ///
    /// On failure the task stays [`TaskStage::Initialized`] with zero actions.
    pub fn build(&mut self) -> Result<&ClassifiedTrace> {
        self.require_stage("build", &[TaskStage::Initialized])?;
        let authorized_delegates =
            resolve_delegates(&self.config, &self.registry, self.engine.network_id)?;

        let snapshot = self.sandbox.begin_scoped_recording(self.safe)?;
        let built = {
            let mut ctx = BuildContext::new(
                &mut self.sandbox,
                &self.registry,
                self.engine.network_id,
                self.safe,
            );
            self.proposal.build_actions(&mut ctx).map(|()| ctx.into_labels())
        };
        // The recording window is always closed, whether or not the build succeeded.
        let trace = self.sandbox.end_scoped_recording(snapshot)?;
        let labels = built?;

        let mut excluded = HashSet::default();
        excluded.insert(self.sandbox.address());
        excluded.extend(self.registry.contract_address());
        let params =
            ClassifyParams { caller: self.safe, excluded, authorized_delegates, labels };
        let classified = classify(&trace, &params)?;

        info!(actions = classified.actions.len(), records = trace.len(), "Build finished");
        self.build_trace = trace;
        self.classified = classified;
        self.stage = TaskStage::Built;
        Ok(&self.classified)
    }

    /// Returns the batch calldata of the recorded actions.
    pub fn calldata(&self) -> Result<Bytes> {
        self.require_stage(
            "encode",
            &[TaskStage::Built, TaskStage::Simulated, TaskStage::Validated],
        )?;
        Ok(encode_batch(self.actions())?)
    }

    /// Returns the payload the Safe owners sign.
    ///
    /// The nonce is taken from the task configuration when set, otherwise read from the Safe.
    pub fn signer_payload(&self) -> Result<SignerPayload> {
        let calldata = self.calldata()?;
        let nonce = match self.config.nonce {
            Some(nonce) => U256::from(nonce),
            None => read_nonce(&self.sandbox, self.safe)?,
        };
        let transaction = SafeTransaction::batch(self.engine.batch_target, calldata, nonce);
        let payload = SignerPayload::new(transaction, self.sandbox.chain_id(), self.safe);
        debug!(hash = %payload.hash, %nonce, "Signer payload built");
        Ok(payload)
    }

    /// Returns, for every distinct signer Safe in `signers`, the payload of the transaction that
    /// approves this task's hash on the task Safe.
    ///
    /// Each payload uses the signer's own live nonce and EIP-712 domain.
    pub fn approval_payloads(&self, signers: &[Address]) -> Result<Vec<SignerPayload>> {
        let parent_hash = self.signer_payload()?.hash;
        let chain_id = self.sandbox.chain_id();
        let mut seen = HashSet::<Address>::default();
        let mut payloads = Vec::new();
        for signer in signers.iter().copied().filter(|signer| seen.insert(*signer)) {
            let nonce = read_nonce(&self.sandbox, signer)?;
            let transaction =
                SafeTransaction::approval(self.engine.batch_target, self.safe, parent_hash, nonce);
            payloads.push(SignerPayload::new(transaction, chain_id, signer));
        }
        Ok(payloads)
    }

    /// Executes the batch calldata through the batch target as the Safe, checks that every slot
    /// the build wrote ends up with the same value, and commits.
    pub fn simulate(&mut self) -> Result<&Trace> {
        self.require_stage("simulate", &[TaskStage::Built])?;
        let calldata = self.calldata()?;
        let trace = simulate_batch(
            &mut self.sandbox,
            self.safe,
            self.engine.batch_target,
            &calldata,
            &self.build_trace,
        )?;
        self.simulation_trace = trace;
        self.stage = TaskStage::Simulated;
        Ok(&self.simulation_trace)
    }

    /// Checks the simulated result against the allow-list, the Safe invariants, the nonce and
    /// the proposal's own checks.
    pub fn validate(&mut self) -> Result<()> {
        self.require_stage("validate", &[TaskStage::Simulated])?;
        let network_id = self.engine.network_id;
        let allowed = resolve_allow_list(&self.config, &self.registry, network_id)?;
        check_coverage(&self.classified.touched, &allowed, self.safe)?;

        if self.classified.touched.contains(&self.safe) ||
            self.engine.always_check_safe_invariants
        {
            let current = SafeState::load(&self.sandbox, self.safe, self.engine.max_list_entries)?;
            check_safe_invariants(
                &self.initial_state,
                &current,
                self.config.owner_change_allowed,
                self.config.config_change_allowed,
            )?;
        }

        if self.engine.validate_live_nonce {
            check_nonce(self.initial_state.nonce, read_nonce(&self.sandbox, self.safe)?)?;
        }

        let ctx = ValidationContext {
            sandbox: &self.sandbox,
            registry: &self.registry,
            config: &self.config,
            network_id,
            safe: self.safe,
            initial_state: &self.initial_state,
            classified: &self.classified,
            simulation: &self.simulation_trace,
        };
        self.proposal.validate_extra(&ctx)?;

        info!(touched = self.classified.touched.len(), "Validation passed");
        self.stage = TaskStage::Validated;
        Ok(())
    }

    /// Returns the report of the task in its current stage.
    pub fn report(&self) -> Result<TaskReport> {
        let encodable = self.stage >= TaskStage::Built && !self.actions().is_empty();
        let (calldata, signer_payload) = if encodable {
            (Some(self.calldata()?), Some(self.signer_payload()?))
        } else {
            (None, None)
        };
        Ok(TaskReport {
            safe: self.safe,
            network_id: self.engine.network_id,
            stage: self.stage,
            actions: self.actions().to_vec(),
            transfers: self.classified.transfers.clone(),
            state_changes: self.classified.state_changes.clone(),
            touched_accounts: self.classified.touched.as_slice().to_vec(),
            calldata,
            signer_payload,
        })
    }

    /// Runs the phases enabled in the engine configuration, in order.
    ///
    /// Returns the report if [`Phases::REPORT`] is enabled.
    pub fn run(&mut self) -> Result<Option<TaskReport>> {
        let phases = self.engine.phases;
        if phases.contains(Phases::BUILD) {
            self.build()?;
        }
        if phases.contains(Phases::SIMULATE) {
            self.simulate()?;
        }
        if phases.contains(Phases::VALIDATE) {
            self.validate()?;
        }
        phases.contains(Phases::REPORT).then(|| self.report()).transpose()
    }

    /// Returns to [`TaskStage::Initialized`], discarding the build, its classification and the
    /// simulation trace.
    ///
    /// State committed by a simulation is not rolled back.
    pub fn reset(&mut self) {
        self.build_trace = Trace::default();
        self.classified = ClassifiedTrace::default();
        self.simulation_trace = Trace::default();
        self.stage = TaskStage::Initialized;
        debug!(safe = %self.safe, "Task reset");
    }
}
