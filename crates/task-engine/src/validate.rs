//! Storage-access authorization checks.
//!
//! Validation runs after a successful simulation, in a fixed order:
//!
//! 1. resolve the allow-list through the registry,
//! 2. require every touched account to be allow-listed or be the Safe itself,
//! 3. compare the Safe configuration against the snapshot taken when the task was created,
//! 4. require the Safe nonce to have advanced by exactly one,
//! 5. run the proposal's own checks.
//!
//! The first failing step ends validation.

use alloy_primitives::{map::HashSet, Address, U256};
use tracing::{debug, warn};

use crate::{
    registry::AddressRegistry, safe::SafeState, AccountSet, AuthorizationError, ConfigError,
    TaskConfig,
};

/// Resolves the allow-list of `config`.
///
/// Identifiers must resolve on `network_id`; a miss is a configuration error. Networks sharing a
/// group with `network_id` are resolved on a best-effort basis, since an identifier need not
/// exist on every network of a group.
pub fn resolve_allow_list<R: AddressRegistry + ?Sized>(
    config: &TaskConfig,
    registry: &R,
    network_id: u64,
) -> Result<HashSet<Address>, ConfigError> {
    let mut allowed = HashSet::default();
    for access in config.allowed_storage_accesses_on(network_id) {
        allowed.insert(registry.resolve(&access.identifier, access.network_id)?);
    }
    for sibling in registry.sibling_networks(network_id).into_iter().skip(1) {
        for access in config.allowed_storage_accesses_on(sibling) {
            match registry.resolve(&access.identifier, access.network_id) {
                Ok(address) => {
                    allowed.insert(address);
                }
                Err(err) => debug!(%err, "Skipping unresolved sibling allow-list entry"),
            }
        }
    }
    debug!(entries = allowed.len(), network_id, "Resolved allow-list");
    Ok(allowed)
}

/// Resolves the delegate-call targets of `config` on `network_id`.
pub fn resolve_delegates<R: AddressRegistry + ?Sized>(
    config: &TaskConfig,
    registry: &R,
    network_id: u64,
) -> Result<HashSet<Address>, ConfigError> {
    config
        .authorized_delegate_calls
        .iter()
        .map(|identifier| registry.resolve(identifier, network_id).map_err(Into::into))
        .collect()
}

/// Requires every account in `touched` to be in `allowed` or to be `safe`.
pub fn check_coverage(
    touched: &AccountSet,
    allowed: &HashSet<Address>,
    safe: Address,
) -> Result<(), AuthorizationError> {
    for account in touched.iter() {
        if *account != safe && !allowed.contains(account) {
            warn!(%account, "Storage access outside the allow-list");
            return Err(AuthorizationError::UnauthorizedStorageAccess { account: *account });
        }
    }
    Ok(())
}

/// Compares the Safe configuration after simulation against its initial snapshot.
///
/// Owners are compared element by element, in order, unless owner changes are allowed. Threshold,
/// modules, fallback handler, guard and version are compared unless configuration changes are
/// allowed.
pub fn check_safe_invariants(
    initial: &SafeState,
    current: &SafeState,
    owner_change_allowed: bool,
    config_change_allowed: bool,
) -> Result<(), AuthorizationError> {
    if !owner_change_allowed && initial.owners != current.owners {
        return Err(AuthorizationError::OwnersChanged {
            expected: initial.owners.clone(),
            actual: current.owners.clone(),
        });
    }
    if config_change_allowed {
        return Ok(());
    }
    if initial.threshold != current.threshold {
        return Err(AuthorizationError::ThresholdChanged {
            expected: initial.threshold,
            actual: current.threshold,
        });
    }
    if initial.modules != current.modules {
        return Err(AuthorizationError::ModulesChanged {
            expected: initial.modules.clone(),
            actual: current.modules.clone(),
        });
    }
    if initial.fallback_handler != current.fallback_handler {
        return Err(AuthorizationError::FallbackHandlerChanged {
            expected: initial.fallback_handler,
            actual: current.fallback_handler,
        });
    }
    if initial.guard != current.guard {
        return Err(AuthorizationError::GuardChanged {
            expected: initial.guard,
            actual: current.guard,
        });
    }
    if initial.singleton != current.singleton {
        return Err(AuthorizationError::SingletonChanged {
            expected: initial.singleton,
            actual: current.singleton,
        });
    }
    if initial.version != current.version {
        return Err(AuthorizationError::VersionChanged {
            expected: initial.version.clone(),
            actual: current.version.clone(),
        });
    }
    Ok(())
}

/// Requires the nonce to have advanced from `initial` by exactly one.
pub fn check_nonce(initial: U256, current: U256) -> Result<(), AuthorizationError> {
    let expected = initial.saturating_add(U256::from(1));
    if current != expected {
        return Err(AuthorizationError::NonceMismatch { expected, actual: current });
    }
    Ok(())
}
