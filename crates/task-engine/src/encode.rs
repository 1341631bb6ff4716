//! Lowering of actions into a single `Multicall3.aggregate3Value` call.

use alloy_primitives::Bytes;
use alloy_sol_types::SolCall;
use task_contracts::multicall::IMulticall3::{aggregate3ValueCall, Call3Value};

use crate::{Action, StructuralError};

/// Lowers `actions` to [`Call3Value`]s, one per action in the same order. Every sub-call has
/// `allowFailure = false`, so a single failure aborts the whole batch.
pub fn lower(actions: &[Action]) -> Result<Vec<Call3Value>, StructuralError> {
    if actions.is_empty() {
        return Err(StructuralError::NoActions);
    }
    actions
        .iter()
        .enumerate()
        .map(|(index, action)| {
            if action.target.is_zero() {
                return Err(StructuralError::ZeroTarget { index });
            }
            Ok(Call3Value {
                target: action.target,
                allowFailure: false,
                value: action.value,
                callData: action.calldata.clone(),
            })
        })
        .collect()
}

/// Encodes `actions` as `aggregate3Value(Call3Value[])` calldata.
///
/// The output depends only on the targets, values and calldata of the actions, in order.
pub fn encode_batch(actions: &[Action]) -> Result<Bytes, StructuralError> {
    let calls = lower(actions)?;
    Ok(aggregate3ValueCall { calls }.abi_encode().into())
}

/// Decodes `aggregate3Value` calldata back into its sub-calls.
pub fn decode_batch(calldata: &[u8]) -> Result<Vec<Call3Value>, StructuralError> {
    aggregate3ValueCall::abi_decode(calldata)
        .map(|call| call.calls)
        .map_err(|err| StructuralError::MalformedBatch(err.to_string()))
}
