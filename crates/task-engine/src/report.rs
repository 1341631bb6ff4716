//! Serializable outcome of a task run.

use alloy_primitives::{Address, Bytes};
use serde::Serialize;

use crate::{safe::SignerPayload, AccountIndexed, Action, StateInfo, TaskStage, TransferInfo};

/// Everything an external reporter needs to render a task: the actions, the classified diff,
/// the batch calldata and the payload to sign.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReport {
    /// The Safe executing the task.
    pub safe: Address,
    /// The network the task targets.
    pub network_id: u64,
    /// The stage the task reached.
    pub stage: TaskStage,
    /// Actions in execution order.
    pub actions: Vec<Action>,
    /// Transfers keyed by source.
    pub transfers: AccountIndexed<TransferInfo>,
    /// Storage writes keyed by account.
    pub state_changes: AccountIndexed<StateInfo>,
    /// Accounts that sent value or had storage written, in first-seen order.
    pub touched_accounts: Vec<Address>,
    /// The batch calldata, if there are actions to encode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calldata: Option<Bytes>,
    /// The payload the Safe owners sign, if there are actions to encode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signer_payload: Option<SignerPayload>,
}

impl TaskReport {
    /// Serializes the report as JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serializes the report as indented JSON.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
