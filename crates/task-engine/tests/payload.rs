//! Tests for the signer payloads a built task hands to Safe owners.

use alloy_primitives::{address, Address, U256};
use alloy_sol_types::SolCall;
use task_engine::{
    decode_batch,
    registry::StaticRegistry,
    safe::SafeTransaction,
    sandbox::EvmSandbox,
    task_contracts::{multicall::MULTICALL3_ADDRESS, safe::ISafe},
    test_utils::{
        fixture_config, fixture_registry, fixture_sandbox, init_tracing, install_mock_safe,
        FnProposal, CHAIN_ID, OWNERS, SAFE, SAFE_NONCE, TARGET, TARGET_IDENTIFIER,
    },
    BuildContext, EngineConfig, MultisigTask, Proposal, Result, TaskConfig, TaskError,
};

const FOUNDATION_SAFE: Address = address!("0x847B5c174615B1B7fDF770882256e2D3E95b9D92");
const COUNCIL_SAFE: Address = address!("0xc2819DC788505Aac350142A7A707BF9D03E3Bd03");

fn poke_target(ctx: &mut BuildContext<'_>) -> Result<()> {
    let target = ctx.resolve(TARGET_IDENTIFIER)?;
    ctx.call(target, vec![0x12, 0x34, 0x56, 0x78]).map(drop)
}

fn built_task<P: Proposal>(
    config: TaskConfig,
    proposal: P,
) -> MultisigTask<P, EvmSandbox, StaticRegistry> {
    init_tracing();
    let mut sandbox = fixture_sandbox();
    install_mock_safe(&mut sandbox, FOUNDATION_SAFE, &OWNERS, 1, 3).unwrap();
    install_mock_safe(&mut sandbox, COUNCIL_SAFE, &OWNERS[..1], 1, 7).unwrap();
    let mut task = MultisigTask::new(
        config,
        EngineConfig::new(CHAIN_ID),
        proposal,
        sandbox,
        fixture_registry(&[]),
    )
    .unwrap();
    task.build().unwrap();
    task
}

#[test]
fn test_payload_uses_live_nonce() {
    let task = built_task(fixture_config(&[TARGET_IDENTIFIER]), FnProposal::new(poke_target));
    let payload = task.signer_payload().unwrap();

    assert_eq!(payload.safe, SAFE);
    assert_eq!(payload.transaction.nonce, U256::from(SAFE_NONCE));
    assert_eq!(payload.transaction.to, MULTICALL3_ADDRESS);

    let calldata = task.calldata().unwrap();
    let expected = SafeTransaction::batch(MULTICALL3_ADDRESS, calldata, U256::from(SAFE_NONCE));
    assert_eq!(payload.transaction, expected);
    assert_eq!(payload.hash, expected.hash(CHAIN_ID, SAFE));
    assert_eq!(payload.data.len(), 66);
}

#[test]
fn test_payload_prefers_configured_nonce() {
    let mut config = fixture_config(&[TARGET_IDENTIFIER]);
    config.nonce = Some(42);
    let task = built_task(config, FnProposal::new(poke_target));
    let payload = task.signer_payload().unwrap();

    assert_eq!(payload.transaction.nonce, U256::from(42));
    let live = SafeTransaction::batch(
        MULTICALL3_ADDRESS,
        task.calldata().unwrap(),
        U256::from(SAFE_NONCE),
    );
    assert_ne!(payload.hash, live.hash(CHAIN_ID, SAFE));
}

#[test]
fn test_payload_commits_to_batch() {
    let task = built_task(fixture_config(&[TARGET_IDENTIFIER]), FnProposal::new(poke_target));
    let payload = task.signer_payload().unwrap();

    let calls = decode_batch(&payload.transaction.data).unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].target, TARGET);
    assert_eq!(calls[0].callData.as_ref(), &[0x12, 0x34, 0x56, 0x78]);
    assert!(!calls[0].allowFailure);
}

#[test]
fn test_payload_requires_build() {
    init_tracing();
    let task = MultisigTask::new(
        fixture_config(&[]),
        EngineConfig::new(CHAIN_ID),
        FnProposal::new(poke_target),
        fixture_sandbox(),
        fixture_registry(&[]),
    )
    .unwrap();
    assert!(matches!(task.signer_payload(), Err(TaskError::Stage(_))));
}

#[test]
fn test_approval_payloads_for_signer_safes() {
    let task = built_task(fixture_config(&[TARGET_IDENTIFIER]), FnProposal::new(poke_target));
    let parent_hash = task.signer_payload().unwrap().hash;

    let payloads =
        task.approval_payloads(&[FOUNDATION_SAFE, COUNCIL_SAFE, FOUNDATION_SAFE]).unwrap();
    assert_eq!(payloads.len(), 2);

    for (payload, (signer, nonce)) in payloads.iter().zip([(FOUNDATION_SAFE, 3), (COUNCIL_SAFE, 7)])
    {
        assert_eq!(payload.safe, signer);
        assert_eq!(payload.transaction.nonce, U256::from(nonce));
        assert_eq!(payload.hash, payload.transaction.hash(CHAIN_ID, signer));

        let calls = decode_batch(&payload.transaction.data).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].target, SAFE);
        let approve = ISafe::approveHashCall::abi_decode(&calls[0].callData).unwrap();
        assert_eq!(approve.hashToApprove, parent_hash);
    }
    assert_ne!(payloads[0].hash, payloads[1].hash);
}
