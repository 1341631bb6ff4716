//! Data model shared by the sandbox, the classifier and the validator.

use alloy_primitives::{
    keccak256,
    map::{HashMap, HashSet},
    Address, Bytes, B256, U256,
};
use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};

/// An externally observable call the multisig must make to reproduce a build.
///
/// Actions are only created by the classifier from top-level calls of the designated caller and
/// are immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// The call target.
    pub target: Address,
    /// Native value sent with the call.
    pub value: U256,
    /// The call payload.
    pub calldata: Bytes,
    /// Human-readable summary of the call.
    pub description: String,
}

impl Action {
    /// Returns the `(target, keccak256(calldata), value)` identity used for duplicate detection.
    pub fn identity(&self) -> (Address, B256, U256) {
        (self.target, keccak256(&self.calldata), self.value)
    }

    /// Returns the 4-byte function selector, if the calldata carries one.
    pub fn selector(&self) -> Option<[u8; 4]> {
        self.calldata.get(..4).and_then(|s| s.try_into().ok())
    }
}

/// The kind of call frame an [`AccountAccess`] was recorded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessKind {
    /// A plain message call.
    Call,
    /// A delegate call: the target's code runs in the accessor's storage context.
    DelegateCall,
    /// A legacy `CALLCODE`.
    CallCode,
    /// A read-only call.
    StaticCall,
    /// A contract creation.
    Create,
}

/// A single storage read or write observed while recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageAccess {
    /// The account whose storage was accessed.
    pub account: Address,
    /// The storage slot.
    pub slot: B256,
    /// Whether the access was an `SSTORE`.
    pub is_write: bool,
    /// Value before the access.
    pub previous_value: B256,
    /// Value after the access. Equal to `previous_value` for reads.
    pub new_value: B256,
}

/// One call frame of a recorded trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountAccess {
    /// The address that made the call. For delegate calls this is the contract whose storage
    /// context the callee runs in.
    pub accessor: Address,
    /// The address whose code runs.
    pub account: Address,
    /// Frame kind.
    pub kind: AccessKind,
    /// Native value transferred by the frame.
    pub value: U256,
    /// Call input, or init code for creations.
    pub calldata: Bytes,
    /// Call depth, zero for the transaction-level frame.
    pub depth: usize,
    /// Whether this frame or one of its ancestors reverted.
    pub reverted: bool,
    /// Storage accesses made while this frame was the innermost one.
    pub storage_accesses: Vec<StorageAccess>,
}

/// An ordered list of [`AccountAccess`] records, in call occurrence order.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, derive_more::Deref, derive_more::From,
)]
pub struct Trace(Vec<AccountAccess>);

impl Trace {
    /// Creates a trace from records in occurrence order.
    pub const fn new(records: Vec<AccountAccess>) -> Self {
        Self(records)
    }

    /// Consumes the trace, returning its records.
    pub fn into_inner(self) -> Vec<AccountAccess> {
        self.0
    }
}

/// A native-currency or token transfer. The source is the key it is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferInfo {
    /// Receiver of the transfer.
    pub to: Address,
    /// Amount transferred.
    pub value: U256,
    /// The token contract, [`Address::ZERO`] for the native currency.
    pub token: Address,
}

/// A storage slot write. The account is the key it is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateInfo {
    /// The written slot.
    pub slot: B256,
    /// Value before the write.
    pub old_value: B256,
    /// Value after the write.
    pub new_value: B256,
}

/// An allow-list entry, resolved against the registry only when validating.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllowedStorageAccess {
    /// Registry identifier of the contract.
    pub identifier: String,
    /// Network the identifier is resolved on.
    pub network_id: u64,
}

/// The outcome of a single sandbox call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutput {
    /// Whether the call succeeded.
    pub success: bool,
    /// Return data, or revert data on failure.
    pub output: Bytes,
    /// Gas consumed by the call.
    pub gas_used: u64,
}

/// Append-only per-account lists, iterated in first-seen account order.
#[derive(Debug, Clone)]
pub struct AccountIndexed<T> {
    order: Vec<Address>,
    entries: HashMap<Address, Vec<T>>,
}

impl<T> Default for AccountIndexed<T> {
    fn default() -> Self {
        Self { order: Vec::new(), entries: HashMap::default() }
    }
}

impl<T> AccountIndexed<T> {
    /// Appends `item` under `account`.
    pub fn push(&mut self, account: Address, item: T) {
        self.entries
            .entry(account)
            .or_insert_with(|| {
                self.order.push(account);
                Vec::new()
            })
            .push(item);
    }

    /// Returns the entries recorded under `account`.
    pub fn get(&self, account: &Address) -> &[T] {
        self.entries.get(account).map(Vec::as_slice).unwrap_or_default()
    }

    /// Returns the accounts in first-seen order.
    pub fn accounts(&self) -> &[Address] {
        &self.order
    }

    /// Iterates over `(account, entries)` in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (Address, &[T])> + '_ {
        self.order.iter().map(move |account| (*account, self.get(account)))
    }

    /// Returns the total number of entries across all accounts.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Returns `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl<T: Serialize> Serialize for AccountIndexed<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.order.len()))?;
        for (account, entries) in self.iter() {
            map.serialize_entry(&account, entries)?;
        }
        map.end()
    }
}

/// An insertion-ordered set of accounts with O(1) membership checks.
#[derive(Debug, Clone, Default)]
pub struct AccountSet {
    order: Vec<Address>,
    seen: HashSet<Address>,
}

impl AccountSet {
    /// Inserts `account`, returning `true` on first occurrence.
    pub fn insert(&mut self, account: Address) -> bool {
        let inserted = self.seen.insert(account);
        if inserted {
            self.order.push(account);
        }
        inserted
    }

    /// Returns `true` if `account` was inserted before.
    pub fn contains(&self, account: &Address) -> bool {
        self.seen.contains(account)
    }

    /// Iterates in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Address> + '_ {
        self.order.iter()
    }

    /// Returns the accounts in insertion order.
    pub fn as_slice(&self) -> &[Address] {
        &self.order
    }

    /// Number of distinct accounts.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl FromIterator<Address> for AccountSet {
    fn from_iter<I: IntoIterator<Item = Address>>(iter: I) -> Self {
        let mut set = Self::default();
        for account in iter {
            set.insert(account);
        }
        set
    }
}

impl Serialize for AccountSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, b256};

    #[test]
    fn test_account_indexed_keeps_first_seen_order() {
        let a = address!("0x00000000000000000000000000000000000000aa");
        let b = address!("0x00000000000000000000000000000000000000bb");
        let mut indexed = AccountIndexed::default();
        indexed.push(b, 1);
        indexed.push(a, 2);
        indexed.push(b, 3);

        assert_eq!(indexed.accounts(), &[b, a]);
        assert_eq!(indexed.get(&b), &[1, 3]);
        assert_eq!(indexed.get(&Address::ZERO), &[] as &[i32]);
        assert_eq!(indexed.len(), 3);
    }

    #[test]
    fn test_account_set_ignores_repeats() {
        let a = address!("0x00000000000000000000000000000000000000aa");
        let mut set = AccountSet::default();
        assert!(set.insert(a));
        assert!(!set.insert(a));
        assert_eq!(set.len(), 1);
        assert!(set.contains(&a));
    }

    #[test]
    fn test_action_selector() {
        let action = Action {
            target: Address::ZERO,
            value: U256::ZERO,
            calldata: Bytes::from_static(&[0xb4, 0x0a, 0x81, 0x7c, 0x00]),
            description: String::new(),
        };
        assert_eq!(action.selector(), Some([0xb4, 0x0a, 0x81, 0x7c]));
        let empty = Action { calldata: Bytes::new(), ..action };
        assert_eq!(empty.selector(), None);
        assert_eq!(
            empty.identity().1,
            b256!("0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470")
        );
    }
}
