//! Classification of a recorded trace into actions, transfers and state changes.
//!
//! Only the designated caller's own top-level calls become [`Action`]s. Every other record is
//! evidence only: it may contribute transfers, storage writes and touched accounts to the diff,
//! but is never replayed.

use alloy_primitives::{
    hex,
    map::{HashMap, HashSet},
    Address, U256,
};
use alloy_sol_types::SolCall;
use task_contracts::erc20::IERC20;
use tracing::{debug, trace};

use crate::{
    AccessKind, AccountAccess, AccountIndexed, AccountSet, Action, ActionSet, StateInfo,
    StructuralError, Trace, TransferInfo,
};

/// Inputs of [`classify`] that come from the task rather than from the trace.
#[derive(Debug, Clone, Default)]
pub struct ClassifyParams {
    /// The impersonated identity whose top-level calls become actions.
    pub caller: Address,
    /// Accounts calls to which are never actions (the registry contract, the sandbox itself).
    pub excluded: HashSet<Address>,
    /// Code that may be delegate-called.
    pub authorized_delegates: HashSet<Address>,
    /// Human-readable names of known accounts, used in action descriptions.
    pub labels: HashMap<Address, String>,
}

/// The diff of one build.
#[derive(Debug, Clone, Default)]
pub struct ClassifiedTrace {
    /// Replayable actions in trace order.
    pub actions: ActionSet,
    /// Native and token transfers keyed by their source.
    pub transfers: AccountIndexed<TransferInfo>,
    /// Storage writes keyed by the account whose storage changed.
    pub state_changes: AccountIndexed<StateInfo>,
    /// Accounts that sent value or had storage written, in first-seen order.
    pub touched: AccountSet,
}

/// A decoded ERC-20 `transfer` or `transferFrom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenTransfer {
    /// Account the tokens leave.
    pub from: Address,
    /// Account the tokens go to.
    pub to: Address,
    /// Token amount.
    pub amount: U256,
}

/// Decodes ERC-20 transfer calldata sent by `sender`.
///
/// Returns `None` for any other selector and for calldata that does not decode; unknown calls are
/// never reported as transfers.
pub fn decode_token_transfer(sender: Address, calldata: &[u8]) -> Option<TokenTransfer> {
    if calldata.len() <= 4 {
        return None;
    }
    let selector = &calldata[..4];
    if selector == IERC20::transferCall::SELECTOR {
        let call = IERC20::transferCall::abi_decode(calldata).ok()?;
        Some(TokenTransfer { from: sender, to: call.to, amount: call.amount })
    } else if selector == IERC20::transferFromCall::SELECTOR {
        let call = IERC20::transferFromCall::abi_decode(calldata).ok()?;
        Some(TokenTransfer { from: call.from, to: call.to, amount: call.amount })
    } else {
        None
    }
}

/// Splits `trace` into actions, transfers, per-account storage writes and touched accounts.
///
/// Fails on the first delegate call to unauthorized code, on an action with neither calldata nor
/// value, and on a duplicate action. Apart from the delegate-call check, records of reverted
/// frames are ignored.
pub fn classify(trace: &Trace, params: &ClassifyParams) -> Result<ClassifiedTrace, StructuralError> {
    let mut classified = ClassifiedTrace::default();

    for record in trace.iter() {
        // Checked before the revert filter: a swallowed frame still ran the delegated code.
        if record.kind == AccessKind::DelegateCall &&
            !params.authorized_delegates.contains(&record.account)
        {
            return Err(StructuralError::UnauthorizedDelegateCall {
                accessor: record.accessor,
                target: record.account,
            });
        }
        if record.reverted {
            continue;
        }

        // `CALLCODE` keeps the value with the executing account.
        if !record.value.is_zero() && record.kind != AccessKind::CallCode {
            classified.transfers.push(
                record.accessor,
                TransferInfo { to: record.account, value: record.value, token: Address::ZERO },
            );
            classified.touched.insert(record.accessor);
        }

        if record.kind == AccessKind::Call {
            if let Some(transfer) = decode_token_transfer(record.accessor, &record.calldata) {
                trace!(token = %record.account, from = %transfer.from, to = %transfer.to, "Token transfer");
                classified.transfers.push(
                    transfer.from,
                    TransferInfo { to: transfer.to, value: transfer.amount, token: record.account },
                );
            }
        }

        for write in record.storage_accesses.iter().filter(|access| access.is_write) {
            classified.state_changes.push(
                write.account,
                StateInfo {
                    slot: write.slot,
                    old_value: write.previous_value,
                    new_value: write.new_value,
                },
            );
            classified.touched.insert(write.account);
        }

        if is_action(record, params) {
            let action = Action {
                target: record.account,
                value: record.value,
                calldata: record.calldata.clone(),
                description: describe(record, params),
            };
            debug!(target = %action.target, value = %action.value, description = %action.description, "Action recorded");
            classified.actions.push(action)?;
        }
    }

    debug!(
        actions = classified.actions.len(),
        transfers = classified.transfers.len(),
        state_changes = classified.state_changes.len(),
        touched = classified.touched.len(),
        "Trace classified"
    );
    Ok(classified)
}

fn is_action(record: &AccountAccess, params: &ClassifyParams) -> bool {
    record.kind == AccessKind::Call &&
        record.accessor == params.caller &&
        !params.excluded.contains(&record.account)
}

fn describe(record: &AccountAccess, params: &ClassifyParams) -> String {
    let target = params
        .labels
        .get(&record.account)
        .map_or_else(|| record.account.to_string(), |label| format!("{label} ({})", record.account));
    match record.calldata.get(..4) {
        Some(selector) => format!("call 0x{} on {target}", hex::encode(selector)),
        None if record.calldata.is_empty() => format!("transfer {} wei to {target}", record.value),
        None => format!("call with {} bytes of data on {target}", record.calldata.len()),
    }
}
