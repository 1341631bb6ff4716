//! Replay of an encoded batch as the Safe.

use alloy_primitives::{map::HashMap, Address, Bytes, B256, U256};
use task_contracts::safe::NONCE_SLOT;
use tracing::{debug, error, info};

use crate::{
    decode_batch, decode_revert_reason,
    safe::read_nonce,
    sandbox::{Sandbox, SnapshotId},
    ExecutionError, Result, TaskError, Trace,
};

/// Executes `calldata` against `batch_target` in the context of the Safe at `safe`, as
/// `execTransaction` does with a delegate-call operation, and commits the result.
///
/// The whole batch runs inside one atomic window. The window is rolled back, and the state left
/// as it was, if the batch reverts (the revert reason is returned verbatim) or if its storage
/// writes differ from those recorded in `built`. Otherwise the Safe nonce is incremented and the
/// recorded trace returned.
pub fn simulate_batch<S: Sandbox + ?Sized>(
    sandbox: &mut S,
    safe: Address,
    batch_target: Address,
    calldata: &[u8],
    built: &Trace,
) -> Result<Trace> {
    let calls = decode_batch(calldata)?;
    if sandbox.code(batch_target)?.is_empty() {
        error!(%batch_target, "Batch target has no code");
        return Err(ExecutionError::MissingCode { target: batch_target }.into());
    }

    let snapshot = sandbox.snapshot()?;
    sandbox.impersonate(safe);
    sandbox.start_trace();

    let output = match sandbox.delegate_call(batch_target, Bytes::copy_from_slice(calldata)) {
        Ok(output) => output,
        Err(err) => {
            abort(sandbox, snapshot)?;
            return Err(err.into());
        }
    };
    if !output.success {
        abort(sandbox, snapshot)?;
        let reason = decode_revert_reason(&output.output);
        error!(%batch_target, %reason, "Batch reverted");
        return Err(ExecutionError::Reverted { target: batch_target, reason, output: output.output }
            .into());
    }

    let trace = sandbox.stop_trace();
    sandbox.stop_impersonate();
    if let Err(err) = compare_writes(built, &trace) {
        abort(sandbox, snapshot)?;
        error!(%err, "Simulation diverged from build");
        return Err(err.into());
    }
    if let Err(err) = bump_nonce(sandbox, safe) {
        abort(sandbox, snapshot)?;
        return Err(err);
    }
    if !sandbox.discard_snapshot(snapshot) {
        return Err(TaskError::Unrecoverable(format!("failed to release {snapshot}")));
    }
    info!(
        %safe,
        calls = calls.len(),
        records = trace.len(),
        gas_used = output.gas_used,
        "Batch simulated"
    );
    Ok(trace)
}

fn bump_nonce<S: Sandbox + ?Sized>(sandbox: &mut S, safe: Address) -> Result<()> {
    let nonce = read_nonce(sandbox, safe)?;
    let bumped = nonce.saturating_add(U256::from(1));
    sandbox.set_storage(safe, B256::from(NONCE_SLOT), B256::from(bumped))?;
    debug!(%safe, nonce = %bumped, "Safe nonce incremented");
    Ok(())
}

fn abort<S: Sandbox + ?Sized>(sandbox: &mut S, snapshot: SnapshotId) -> Result<()> {
    sandbox.stop_trace();
    sandbox.stop_impersonate();
    if !sandbox.revert(snapshot) {
        return Err(TaskError::Unrecoverable(format!("failed to revert to {snapshot}")));
    }
    Ok(())
}

/// Returns the last value written to every `(account, slot)` by non-reverted frames of `trace`,
/// in first-write order.
pub fn final_writes(trace: &Trace) -> Vec<((Address, B256), B256)> {
    let mut index = HashMap::<(Address, B256), usize>::default();
    let mut writes = Vec::new();
    let stored = trace
        .iter()
        .filter(|record| !record.reverted)
        .flat_map(|record| &record.storage_accesses)
        .filter(|access| access.is_write);
    for access in stored {
        let key = (access.account, access.slot);
        if let Some(&position) = index.get(&key) {
            writes[position] = (key, access.new_value);
        } else {
            index.insert(key, writes.len());
            writes.push((key, access.new_value));
        }
    }
    writes
}

/// Requires `simulated` to leave every slot with the final value `built` left it with.
pub fn compare_writes(built: &Trace, simulated: &Trace) -> Result<(), ExecutionError> {
    let built = final_writes(built);
    let simulated = final_writes(simulated);
    let built_index: HashMap<_, _> = built.iter().copied().collect();
    let simulated_index: HashMap<_, _> = simulated.iter().copied().collect();

    for ((account, slot), value) in &built {
        let simulated_value = simulated_index.get(&(*account, *slot)).copied();
        if simulated_value != Some(*value) {
            return Err(ExecutionError::SimulationMismatch {
                account: *account,
                slot: *slot,
                built: Some(*value),
                simulated: simulated_value,
            });
        }
    }
    if let Some(((account, slot), value)) =
        simulated.iter().find(|(key, _)| !built_index.contains_key(key))
    {
        return Err(ExecutionError::SimulationMismatch {
            account: *account,
            slot: *slot,
            built: None,
            simulated: Some(*value),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AccessKind, AccountAccess, StorageAccess};
    use alloy_primitives::address;

    const ACCOUNT: Address = address!("0x00000000000000000000000000000000000000aa");

    fn trace(writes: &[(u8, u8)], reverted: bool) -> Trace {
        let storage_accesses = writes
            .iter()
            .map(|(slot, value)| StorageAccess {
                account: ACCOUNT,
                slot: B256::with_last_byte(*slot),
                is_write: true,
                previous_value: B256::ZERO,
                new_value: B256::with_last_byte(*value),
            })
            .collect();
        Trace::new(vec![AccountAccess {
            accessor: Address::ZERO,
            account: ACCOUNT,
            kind: AccessKind::Call,
            value: U256::ZERO,
            calldata: Bytes::new(),
            depth: 0,
            reverted,
            storage_accesses,
        }])
    }

    #[test]
    fn test_final_writes_keeps_last_value_in_first_write_order() {
        let writes = final_writes(&trace(&[(1, 1), (2, 2), (1, 3)], false));
        assert_eq!(
            writes,
            vec![
                ((ACCOUNT, B256::with_last_byte(1)), B256::with_last_byte(3)),
                ((ACCOUNT, B256::with_last_byte(2)), B256::with_last_byte(2)),
            ]
        );
        assert!(final_writes(&trace(&[(1, 1)], true)).is_empty());
    }

    #[test]
    fn test_compare_writes() {
        let built = trace(&[(1, 1), (1, 2)], false);
        assert_eq!(compare_writes(&built, &trace(&[(1, 2)], false)), Ok(()));
        assert_eq!(
            compare_writes(&built, &trace(&[(1, 1)], false)),
            Err(ExecutionError::SimulationMismatch {
                account: ACCOUNT,
                slot: B256::with_last_byte(1),
                built: Some(B256::with_last_byte(2)),
                simulated: Some(B256::with_last_byte(1)),
            })
        );
        assert!(matches!(
            compare_writes(&built, &trace(&[(1, 2), (9, 9)], false)),
            Err(ExecutionError::SimulationMismatch { built: None, .. })
        ));
    }
}
