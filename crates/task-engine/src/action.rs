//! Duplicate-free, ordered action list.

use alloy_primitives::{map::HashSet, Address, B256, U256};

use crate::{Action, StructuralError};

/// The ordered actions of one build. Rejects actions identical in target, calldata and value to an
/// earlier one, and actions that carry neither calldata nor value.
#[derive(Debug, Clone, Default)]
pub struct ActionSet {
    actions: Vec<Action>,
    seen: HashSet<(Address, B256, U256)>,
}

impl ActionSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `action` in trace order.
    pub fn push(&mut self, action: Action) -> Result<(), StructuralError> {
        if action.calldata.is_empty() && action.value.is_zero() {
            return Err(StructuralError::EmptyAction { target: action.target });
        }
        let identity = action.identity();
        if !self.seen.insert(identity) {
            let (target, calldata_hash, value) = identity;
            return Err(StructuralError::DuplicateAction { target, value, calldata_hash });
        }
        self.actions.push(action);
        Ok(())
    }

    /// Returns the accepted actions in trace order.
    pub fn as_slice(&self) -> &[Action] {
        &self.actions
    }

    /// Number of accepted actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Returns `true` if no action was accepted.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Consumes the set, returning the accepted actions.
    pub fn into_inner(self) -> Vec<Action> {
        self.actions
    }
}

impl TryFrom<Vec<Action>> for ActionSet {
    type Error = StructuralError;

    fn try_from(actions: Vec<Action>) -> Result<Self, Self::Error> {
        let mut set = Self::new();
        for action in actions {
            set.push(action)?;
        }
        Ok(set)
    }
}
