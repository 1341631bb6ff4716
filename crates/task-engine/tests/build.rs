//! Tests for the build phase and the stage machine of `MultisigTask`.

use alloy_primitives::{address, Address, Bytes, B256, U256};
use alloy_sol_types::{sol, SolCall};
use revm::bytecode::opcode::{CALL, DELEGATECALL, GAS, POP, PUSH0};
use task_engine::{
    registry::StaticRegistry,
    sandbox::{EvmSandbox, Sandbox},
    test_utils::{
        delegate_forwarder_code, fixture_config, fixture_registry, fixture_sandbox,
        forwarder_code, init_tracing, reverter_code, slot_writer_code, BytecodeBuilder, FnProposal,
        CHAIN_ID, SAFE, TARGET, TARGET_IDENTIFIER,
    },
    AuthorizationError, BuildContext, ConfigError, EngineConfig, ExecutionError, MultisigTask,
    Phases, Proposal, Result, StructuralError, TaskConfig, TaskError, TaskStage,
    ValidationContext,
};

sol! {
    interface IProtocolVersions {
        function setRequired(uint256 _required) external;
        function required() external view returns (uint256);
    }
}

const DELEGATOR: Address = address!("0x00000000000000000000000000000000000de1e9");
const FORWARDER: Address = address!("0x00000000000000000000000000000000000f0a01");
const REVERTER: Address = address!("0x00000000000000000000000000000000000dead1");
const REGISTRY_CONTRACT: Address = address!("0x00000000000000000000000000000000000a11a5");

fn set_required() -> Bytes {
    IProtocolVersions::setRequiredCall { _required: U256::from(9) }.abi_encode().into()
}

fn required_slot() -> B256 {
    B256::from(U256::from(u32::from_be_bytes(IProtocolVersions::setRequiredCall::SELECTOR)))
}

fn call_target(ctx: &mut BuildContext<'_>) -> Result<()> {
    let target = ctx.resolve(TARGET_IDENTIFIER)?;
    ctx.call(target, set_required()).map(drop)
}

fn new_task<P: Proposal>(
    config: TaskConfig,
    engine: EngineConfig,
    proposal: P,
    registry: StaticRegistry,
) -> MultisigTask<P, EvmSandbox, StaticRegistry> {
    init_tracing();
    MultisigTask::new(config, engine, proposal, fixture_sandbox(), registry).unwrap()
}

fn default_task<P: Proposal>(
    proposal: P,
    allowed: &[&str],
) -> MultisigTask<P, EvmSandbox, StaticRegistry> {
    new_task(fixture_config(allowed), EngineConfig::new(CHAIN_ID), proposal, fixture_registry(&[]))
}

#[test]
fn test_build_rolls_back_state() {
    let mut task = default_task(FnProposal::new(call_target), &[TARGET_IDENTIFIER]);
    let classified = task.build().unwrap();

    assert_eq!(classified.state_changes.get(&TARGET).len(), 1);
    assert_eq!(classified.state_changes.get(&TARGET)[0].slot, required_slot());
    assert_eq!(classified.state_changes.get(&TARGET)[0].old_value, B256::ZERO);
    assert_eq!(classified.state_changes.get(&TARGET)[0].new_value, B256::from(U256::from(9)));
    assert_eq!(task.sandbox().storage(TARGET, required_slot()).unwrap(), B256::ZERO);
    assert_eq!(task.sandbox().snapshot_count(), 0);
    assert_eq!(task.stage(), TaskStage::Built);
}

#[test]
fn test_nested_call_is_not_an_action() {
    let mut task = default_task(
        FnProposal::new(|ctx: &mut BuildContext<'_>| {
            ctx.call(FORWARDER, set_required()).map(drop)
        }),
        &[],
    );
    task.sandbox_mut().set_code(FORWARDER, forwarder_code(TARGET)).unwrap();
    let classified = task.build().unwrap();

    assert_eq!(classified.actions.len(), 1);
    assert_eq!(classified.actions.as_slice()[0].target, FORWARDER);
    assert!(classified.touched.contains(&TARGET));
    assert!(!classified.touched.contains(&FORWARDER));
}

#[test]
fn test_unauthorized_delegate_call_fails_build() {
    let mut task = default_task(
        FnProposal::new(|ctx: &mut BuildContext<'_>| {
            ctx.call(DELEGATOR, set_required()).map(drop)
        }),
        &[],
    );
    task.sandbox_mut().set_code(DELEGATOR, delegate_forwarder_code(TARGET)).unwrap();

    let err = task.build().unwrap_err();
    assert!(matches!(
        err,
        TaskError::Structural(StructuralError::UnauthorizedDelegateCall { accessor, target })
            if accessor == DELEGATOR && target == TARGET
    ));
    assert_eq!(task.stage(), TaskStage::Initialized);
    assert!(task.actions().is_empty());
}

#[test]
fn test_swallowed_delegate_call_fails_build() {
    // DELEGATOR delegate-calls TARGET and then reverts; FORWARDER ignores that failure.
    let delegate_then_revert = BytecodeBuilder::default()
        .append_many([PUSH0, PUSH0, PUSH0, PUSH0])
        .push_address(TARGET)
        .append_many([GAS, DELEGATECALL, POP])
        .revert()
        .build();
    let call_ignoring_failure = BytecodeBuilder::default()
        .append_many([PUSH0, PUSH0, PUSH0, PUSH0, PUSH0])
        .push_address(DELEGATOR)
        .append_many([GAS, CALL, POP])
        .stop()
        .build();
    let mut task = default_task(
        FnProposal::new(|ctx: &mut BuildContext<'_>| {
            ctx.call(FORWARDER, set_required()).map(drop)
        }),
        &[],
    );
    task.sandbox_mut().set_code(DELEGATOR, delegate_then_revert).unwrap();
    task.sandbox_mut().set_code(FORWARDER, call_ignoring_failure).unwrap();

    let err = task.build().unwrap_err();
    assert!(matches!(
        err,
        TaskError::Structural(StructuralError::UnauthorizedDelegateCall { accessor, target })
            if accessor == DELEGATOR && target == TARGET
    ));
    assert_eq!(task.stage(), TaskStage::Initialized);
}

#[test]
fn test_authorized_delegate_call_writes_caller_storage() {
    let mut config = fixture_config(&[]);
    config.authorized_delegate_calls = vec![TARGET_IDENTIFIER.to_string()];
    let mut task = new_task(
        config,
        EngineConfig::new(CHAIN_ID),
        FnProposal::new(|ctx: &mut BuildContext<'_>| {
            ctx.call(DELEGATOR, set_required()).map(drop)
        }),
        fixture_registry(&[]),
    );
    task.sandbox_mut().set_code(DELEGATOR, delegate_forwarder_code(TARGET)).unwrap();
    let classified = task.build().unwrap();

    assert_eq!(classified.actions.len(), 1);
    assert!(classified.touched.contains(&DELEGATOR));
    assert!(!classified.touched.contains(&TARGET));
    assert_eq!(classified.state_changes.get(&DELEGATOR)[0].slot, required_slot());
}

#[test]
fn test_reverting_build_keeps_task_initialized() {
    let mut task = default_task(
        FnProposal::new(|ctx: &mut BuildContext<'_>| {
            call_target(ctx)?;
            ctx.call(REVERTER, Bytes::from_static(&[0x01])).map(drop)
        }),
        &[],
    );
    task.sandbox_mut().set_code(REVERTER, reverter_code("not today")).unwrap();

    let err = task.build().unwrap_err();
    assert!(matches!(
        &err,
        TaskError::Execution(ExecutionError::Reverted { target, reason, .. })
            if *target == REVERTER && reason == "not today"
    ));
    assert_eq!(task.stage(), TaskStage::Initialized);
    assert!(task.actions().is_empty());
    assert_eq!(task.sandbox().snapshot_count(), 0);
    assert_eq!(task.sandbox().storage(TARGET, required_slot()).unwrap(), B256::ZERO);

    // The sandbox is still usable after a failed build.
    task.sandbox_mut().set_code(REVERTER, slot_writer_code()).unwrap();
    task.build().unwrap();
    assert_eq!(task.actions().len(), 2);
}

#[test]
fn test_view_calls_are_not_recorded() {
    let mut task = default_task(
        FnProposal::new(|ctx: &mut BuildContext<'_>| {
            let target = ctx.resolve(TARGET_IDENTIFIER)?;
            ctx.view(target, IProtocolVersions::requiredCall {}).ok();
            ctx.call(target, set_required()).map(drop)
        }),
        &[TARGET_IDENTIFIER],
    );
    task.build().unwrap();
    assert_eq!(task.actions().len(), 1);
}

#[test]
fn test_stage_order_is_enforced() {
    let mut task = default_task(FnProposal::new(call_target), &[TARGET_IDENTIFIER]);

    assert!(matches!(task.calldata(), Err(TaskError::Stage(_))));
    assert!(matches!(task.simulate(), Err(TaskError::Stage(_))));
    assert!(matches!(task.validate(), Err(TaskError::Stage(_))));

    task.build().unwrap();
    assert!(matches!(task.build(), Err(TaskError::Stage(_))));
    assert!(matches!(task.validate(), Err(TaskError::Stage(_))));

    task.simulate().unwrap();
    assert!(matches!(task.simulate(), Err(TaskError::Stage(_))));
    task.validate().unwrap();
    assert!(task.calldata().is_ok());

    task.reset();
    assert_eq!(task.stage(), TaskStage::Initialized);
    assert!(task.actions().is_empty());
    assert!(task.build_trace().is_empty());
}

#[test]
fn test_build_without_actions() {
    let mut task = default_task(FnProposal::new(|_: &mut BuildContext<'_>| Ok(())), &[]);
    task.build().unwrap();

    assert!(task.actions().is_empty());
    assert!(matches!(task.calldata(), Err(TaskError::Structural(StructuralError::NoActions))));
    let report = task.report().unwrap();
    assert!(report.calldata.is_none());
    assert!(report.signer_payload.is_none());
}

#[test]
fn test_registry_contract_is_not_an_action() {
    let registry = fixture_registry(&[]).with_contract_address(REGISTRY_CONTRACT);
    let mut task = new_task(
        fixture_config(&[TARGET_IDENTIFIER]),
        EngineConfig::new(CHAIN_ID),
        FnProposal::new(|ctx: &mut BuildContext<'_>| {
            ctx.call(REGISTRY_CONTRACT, set_required())?;
            call_target(ctx)
        }),
        registry,
    );
    task.sandbox_mut().set_code(REGISTRY_CONTRACT, slot_writer_code()).unwrap();
    task.build().unwrap();

    assert_eq!(task.actions().len(), 1);
    assert_eq!(task.actions()[0].target, TARGET);
}

#[test]
fn test_run_returns_report() {
    let mut task = default_task(FnProposal::new(call_target), &[TARGET_IDENTIFIER]);
    let report = task.run().unwrap().unwrap();

    assert_eq!(report.stage, TaskStage::Validated);
    assert_eq!(report.safe, SAFE);
    assert_eq!(report.actions.len(), 1);
    assert_eq!(report.touched_accounts, vec![TARGET]);
    assert_eq!(report.calldata, Some(task.calldata().unwrap()));
    assert!(report.signer_payload.is_some());

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["stage"], "Validated");
    assert_eq!(json["actions"].as_array().unwrap().len(), 1);
}

#[test]
fn test_run_without_report_phase() {
    let engine = EngineConfig::new(CHAIN_ID).with_phases(Phases::BUILD | Phases::SIMULATE);
    let mut task = new_task(
        fixture_config(&[TARGET_IDENTIFIER]),
        engine,
        FnProposal::new(call_target),
        fixture_registry(&[]),
    );
    assert!(task.run().unwrap().is_none());
    assert_eq!(task.stage(), TaskStage::Simulated);
}

#[test]
fn test_unknown_safe_is_a_config_error() {
    init_tracing();
    let mut config = fixture_config(&[]);
    config.safe_address_identifier = "SecurityCouncil".to_string();
    let err = MultisigTask::new(
        config,
        EngineConfig::new(CHAIN_ID),
        FnProposal::new(call_target),
        fixture_sandbox(),
        fixture_registry(&[]),
    )
    .unwrap_err();
    assert!(matches!(err, TaskError::Config(ConfigError::Registry(_))));
}

#[test]
fn test_unresolved_allow_list_entry_fails_validation() {
    let mut task =
        default_task(FnProposal::new(call_target), &[TARGET_IDENTIFIER, "L1ERC721Bridge"]);
    task.build().unwrap();
    task.simulate().unwrap();
    assert!(matches!(task.validate(), Err(TaskError::Config(ConfigError::Registry(_)))));
}

#[test]
fn test_nonce_progression_is_checked() {
    let mut task = default_task(FnProposal::new(call_target), &[TARGET_IDENTIFIER]);
    task.build().unwrap();
    task.simulate().unwrap();
    // Something else executed a transaction on the Safe in the meantime.
    task.sandbox_mut()
        .set_storage(SAFE, B256::with_last_byte(5), B256::from(U256::from(20)))
        .unwrap();

    let err = task.validate().unwrap_err();
    assert!(matches!(
        err,
        TaskError::Authorization(AuthorizationError::NonceMismatch { expected, actual })
            if expected == U256::from(13) && actual == U256::from(20)
    ));
}

#[test]
fn test_nonce_check_can_be_disabled() {
    let mut task = new_task(
        fixture_config(&[TARGET_IDENTIFIER]),
        EngineConfig::new(CHAIN_ID).with_live_nonce_validation(false),
        FnProposal::new(call_target),
        fixture_registry(&[]),
    );
    task.build().unwrap();
    task.simulate().unwrap();
    task.sandbox_mut()
        .set_storage(SAFE, B256::with_last_byte(5), B256::from(U256::from(20)))
        .unwrap();
    task.validate().unwrap();
}

#[test]
fn test_always_check_safe_invariants() {
    let mut task = new_task(
        fixture_config(&[TARGET_IDENTIFIER]),
        EngineConfig::new(CHAIN_ID).with_always_check_safe_invariants(true),
        FnProposal::new(call_target),
        fixture_registry(&[]),
    );
    task.build().unwrap();
    task.simulate().unwrap();
    // Raise the threshold behind the task's back.
    task.sandbox_mut()
        .set_storage(SAFE, B256::with_last_byte(4), B256::from(U256::from(2)))
        .unwrap();

    let err = task.validate().unwrap_err();
    assert!(matches!(err, TaskError::Authorization(AuthorizationError::ThresholdChanged { .. })));
}

#[test]
fn test_validate_extra_runs_last() {
    let proposal = FnProposal::new(call_target).with_validation(|ctx: &ValidationContext<'_>| {
        let changes = ctx.state_changes(&TARGET);
        if changes.len() != 1 {
            return Err(TaskError::Custom(format!("expected one write, got {}", changes.len())));
        }
        let required = ctx.view(TARGET, IProtocolVersions::requiredCall {});
        // The fixture target has no getter, so the call returns nothing decodable.
        if required.is_ok() {
            return Err(TaskError::Custom("unexpected getter".to_string()));
        }
        if ctx.storage(TARGET, changes[0].slot)? != changes[0].new_value {
            return Err(TaskError::Custom("write was not committed".to_string()));
        }
        Err(TaskError::Custom("required version too low".to_string()))
    });
    let mut task = default_task(proposal, &[TARGET_IDENTIFIER]);
    task.build().unwrap();
    task.simulate().unwrap();

    let err = task.validate().unwrap_err();
    assert!(matches!(&err, TaskError::Custom(message) if message == "required version too low"));
    assert_eq!(task.stage(), TaskStage::Simulated);
}
