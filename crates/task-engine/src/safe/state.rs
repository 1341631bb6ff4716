use alloy_primitives::{map::HashSet, Address, B256, U256};
use alloy_sol_types::SolCall;
use serde::Serialize;
use task_contracts::safe::{
    module_slot, owner_slot, ISafe, FALLBACK_HANDLER_STORAGE_SLOT, GUARD_STORAGE_SLOT, NONCE_SLOT,
    SENTINEL, SINGLETON_SLOT, THRESHOLD_SLOT,
};
use tracing::{debug, warn};

use crate::sandbox::{Sandbox, SandboxError};

/// The configuration of a Safe, read straight from its storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeState {
    /// The proxy singleton the Safe delegates to.
    pub singleton: Address,
    /// Owners in linked-list order.
    pub owners: Vec<Address>,
    /// Signature threshold.
    pub threshold: U256,
    /// Transaction nonce.
    pub nonce: U256,
    /// Enabled modules in linked-list order.
    pub modules: Vec<Address>,
    /// Raw value of the fallback handler slot.
    pub fallback_handler: B256,
    /// Raw value of the guard slot.
    pub guard: B256,
    /// `VERSION()`, if the Safe answers it.
    pub version: Option<String>,
}

impl SafeState {
    /// Reads the configuration of the Safe at `safe`.
    ///
    /// Modules are walked in pages of `page_size` entries, the way `getModulesPaginated` does.
    pub fn load<S: Sandbox + ?Sized>(
        sandbox: &S,
        safe: Address,
        page_size: usize,
    ) -> Result<Self, SandboxError> {
        let state = Self {
            singleton: Address::from_word(sandbox.storage(safe, B256::from(SINGLETON_SLOT))?),
            owners: read_linked_list(sandbox, safe, owner_slot, usize::MAX)?,
            threshold: read_u256(sandbox, safe, THRESHOLD_SLOT)?,
            nonce: read_nonce(sandbox, safe)?,
            modules: read_modules(sandbox, safe, page_size)?,
            fallback_handler: sandbox.storage(safe, FALLBACK_HANDLER_STORAGE_SLOT)?,
            guard: sandbox.storage(safe, GUARD_STORAGE_SLOT)?,
            version: read_version(sandbox, safe)?,
        };
        debug!(
            %safe,
            singleton = %state.singleton,
            owners = state.owners.len(),
            threshold = %state.threshold,
            nonce = %state.nonce,
            modules = state.modules.len(),
            version = ?state.version,
            "Loaded safe state"
        );
        Ok(state)
    }
}

/// Reads the nonce of the Safe at `safe`.
pub fn read_nonce<S: Sandbox + ?Sized>(sandbox: &S, safe: Address) -> Result<U256, SandboxError> {
    read_u256(sandbox, safe, NONCE_SLOT)
}

fn read_u256<S: Sandbox + ?Sized>(
    sandbox: &S,
    safe: Address,
    slot: U256,
) -> Result<U256, SandboxError> {
    let value = sandbox.storage(safe, B256::from(slot))?;
    Ok(U256::from_be_bytes(value.0))
}

fn read_modules<S: Sandbox + ?Sized>(
    sandbox: &S,
    safe: Address,
    page_size: usize,
) -> Result<Vec<Address>, SandboxError> {
    let page_size = page_size.max(1);
    let mut modules = Vec::new();
    let mut seen = HashSet::default();
    loop {
        let start = modules.last().copied().unwrap_or(SENTINEL);
        let page = read_linked_list_from(sandbox, safe, module_slot, start, page_size, &mut seen)?;
        let done = page.len() < page_size;
        modules.extend(page);
        if done {
            return Ok(modules);
        }
    }
}

fn read_linked_list<S: Sandbox + ?Sized>(
    sandbox: &S,
    safe: Address,
    slot_of: fn(Address) -> B256,
    limit: usize,
) -> Result<Vec<Address>, SandboxError> {
    read_linked_list_from(sandbox, safe, slot_of, SENTINEL, limit, &mut HashSet::default())
}

/// Follows the list starting after `start` until it returns to the sentinel, hits an unset
/// entry, revisits an entry, or `limit` entries were read.
fn read_linked_list_from<S: Sandbox + ?Sized>(
    sandbox: &S,
    safe: Address,
    slot_of: fn(Address) -> B256,
    start: Address,
    limit: usize,
    seen: &mut HashSet<Address>,
) -> Result<Vec<Address>, SandboxError> {
    let mut entries = Vec::new();
    let mut cursor = start;
    while entries.len() < limit {
        let next = Address::from_word(sandbox.storage(safe, slot_of(cursor))?);
        if next.is_zero() || next == SENTINEL {
            break;
        }
        if !seen.insert(next) {
            warn!(%safe, entry = %next, "Linked list revisits an entry");
            break;
        }
        entries.push(next);
        cursor = next;
    }
    Ok(entries)
}

fn read_version<S: Sandbox + ?Sized>(
    sandbox: &S,
    safe: Address,
) -> Result<Option<String>, SandboxError> {
    let calldata = ISafe::VERSIONCall {}.abi_encode().into();
    let output = sandbox.static_call(sandbox.address(), safe, calldata)?;
    if !output.success {
        return Ok(None);
    }
    Ok(ISafe::VERSIONCall::abi_decode_returns(&output.output).ok())
}
