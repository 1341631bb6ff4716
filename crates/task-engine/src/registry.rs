//! The address registry the engine resolves identifiers through.
//!
//! The registry is owned by the caller and handed to the engine for one task run. The engine only
//! ever reads from it, and never keeps a resolution beyond the run: the same identifier may map to
//! different addresses on different networks or in different processes.

use alloy_primitives::{map::HashMap, Address};
use auto_impl::auto_impl;
use serde::{Deserialize, Serialize};

/// Errors returned by an [`AddressRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The identifier has no address on the requested network.
    #[error("`{identifier}` is not registered on network {network_id}")]
    NotFound {
        /// The identifier that was looked up.
        identifier: String,
        /// The network it was looked up on.
        network_id: u64,
    },
}

/// Membership of a network in a group of networks administered together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkGroup {
    /// The network (chain) id.
    pub network_id: u64,
    /// The group the network belongs to.
    pub group_id: u64,
}

/// Read-only name-to-address resolution.
#[auto_impl(&, Box, Arc)]
pub trait AddressRegistry {
    /// Resolves `identifier` on `network_id`.
    fn resolve(&self, identifier: &str, network_id: u64) -> Result<Address, RegistryError>;

    /// Lists the network grouping known to the registry.
    fn network_groups(&self) -> Vec<NetworkGroup>;

    /// The on-chain address of the registry, if it lives in the sandbox.
    ///
    /// Calls into the registry are never promoted to actions.
    fn contract_address(&self) -> Option<Address> {
        None
    }

    /// Returns every network sharing a group with `network_id`, `network_id` first.
    fn sibling_networks(&self, network_id: u64) -> Vec<u64> {
        let groups = self.network_groups();
        let mut networks = vec![network_id];
        let own_groups: Vec<u64> = groups
            .iter()
            .filter(|group| group.network_id == network_id)
            .map(|group| group.group_id)
            .collect();
        for group in &groups {
            if own_groups.contains(&group.group_id) && !networks.contains(&group.network_id) {
                networks.push(group.network_id);
            }
        }
        networks
    }
}

/// An in-memory registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticRegistry {
    addresses: HashMap<u64, HashMap<String, Address>>,
    groups: Vec<NetworkGroup>,
    contract: Option<Address>,
}

impl StaticRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `identifier` on `network_id`.
    pub fn insert(&mut self, identifier: impl Into<String>, network_id: u64, address: Address) {
        self.addresses.entry(network_id).or_default().insert(identifier.into(), address);
    }

    /// Registers `identifier` on `network_id`.
    pub fn with_address(
        mut self,
        identifier: impl Into<String>,
        network_id: u64,
        address: Address,
    ) -> Self {
        self.insert(identifier, network_id, address);
        self
    }

    /// Adds `network_id` to `group_id`.
    pub fn with_group(mut self, network_id: u64, group_id: u64) -> Self {
        self.groups.push(NetworkGroup { network_id, group_id });
        self
    }

    /// Sets the on-chain address of the registry.
    pub const fn with_contract_address(mut self, address: Address) -> Self {
        self.contract = Some(address);
        self
    }
}

impl AddressRegistry for StaticRegistry {
    fn resolve(&self, identifier: &str, network_id: u64) -> Result<Address, RegistryError> {
        self.addresses
            .get(&network_id)
            .and_then(|names| names.get(identifier))
            .copied()
            .ok_or_else(|| RegistryError::NotFound {
                identifier: identifier.to_string(),
                network_id,
            })
    }

    fn network_groups(&self) -> Vec<NetworkGroup> {
        self.groups.clone()
    }

    fn contract_address(&self) -> Option<Address> {
        self.contract
    }
}
