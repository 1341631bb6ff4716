use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::{Eip712Domain, SolCall, SolStruct};
use serde::Serialize;
use task_contracts::{
    multicall::IMulticall3::{aggregate3ValueCall, Call3Value},
    safe::{ISafe, Operation, SafeTx},
};

/// A Safe transaction as signed by the Safe owners.
///
/// Task batches are always executed through a delegate call to the batch target with every gas
/// and refund field zeroed, so only `to`, `data` and `nonce` vary between tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeTransaction {
    /// The batch target.
    pub to: Address,
    /// Native value, always zero for task batches.
    pub value: U256,
    /// The batch calldata.
    pub data: Bytes,
    /// Whether the Safe calls or delegate-calls `to`.
    #[serde(serialize_with = "serialize_operation")]
    pub operation: Operation,
    /// Gas forwarded to the inner call; zero forwards everything.
    pub safe_tx_gas: U256,
    /// Gas independent of the inner call, used for refunds.
    pub base_gas: U256,
    /// Refund gas price.
    pub gas_price: U256,
    /// Refund token, zero for native currency.
    pub gas_token: Address,
    /// Refund receiver, zero for `tx.origin`.
    pub refund_receiver: Address,
    /// The Safe nonce the transaction consumes.
    pub nonce: U256,
}

impl SafeTransaction {
    /// Creates the transaction executing `data` against `batch_target` at `nonce`.
    pub fn batch(batch_target: Address, data: Bytes, nonce: U256) -> Self {
        Self {
            to: batch_target,
            value: U256::ZERO,
            data,
            operation: Operation::DelegateCall,
            safe_tx_gas: U256::ZERO,
            base_gas: U256::ZERO,
            gas_price: U256::ZERO,
            gas_token: Address::ZERO,
            refund_receiver: Address::ZERO,
            nonce,
        }
    }

    /// Creates the transaction a signer Safe executes to approve `parent_hash` on `parent_safe`.
    ///
    /// The approval is itself routed through `batch_target` as a one-element batch.
    pub fn approval(
        batch_target: Address,
        parent_safe: Address,
        parent_hash: B256,
        nonce: U256,
    ) -> Self {
        let call = Call3Value {
            target: parent_safe,
            allowFailure: false,
            value: U256::ZERO,
            callData: ISafe::approveHashCall { hashToApprove: parent_hash }.abi_encode().into(),
        };
        let data = aggregate3ValueCall { calls: vec![call] }.abi_encode().into();
        Self::batch(batch_target, data, nonce)
    }

    /// Returns the EIP-712 domain of the Safe at `safe` on `chain_id`.
    pub fn domain(chain_id: u64, safe: Address) -> Eip712Domain {
        Eip712Domain::new(None, None, Some(U256::from(chain_id)), Some(safe), None)
    }

    /// Returns the `SafeTx` struct this transaction hashes as.
    pub fn to_sol(&self) -> SafeTx {
        SafeTx {
            to: self.to,
            value: self.value,
            data: self.data.clone(),
            operation: self.operation as u8,
            safeTxGas: self.safe_tx_gas,
            baseGas: self.base_gas,
            gasPrice: self.gas_price,
            gasToken: self.gas_token,
            refundReceiver: self.refund_receiver,
            nonce: self.nonce,
        }
    }

    /// Returns `0x19 ‖ 0x01 ‖ domainSeparator ‖ structHash`, the bytes the owners sign over.
    pub fn encode_transaction_data(&self, chain_id: u64, safe: Address) -> Bytes {
        let domain_separator = Self::domain(chain_id, safe).separator();
        let struct_hash = self.to_sol().eip712_hash_struct();
        let mut encoded = Vec::with_capacity(66);
        encoded.extend_from_slice(&[0x19, 0x01]);
        encoded.extend_from_slice(domain_separator.as_slice());
        encoded.extend_from_slice(struct_hash.as_slice());
        encoded.into()
    }

    /// Returns the hash the owners approve.
    pub fn hash(&self, chain_id: u64, safe: Address) -> B256 {
        keccak256(self.encode_transaction_data(chain_id, safe))
    }
}

/// What one signer must sign, together with its hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerPayload {
    /// The Safe whose domain the payload is bound to.
    pub safe: Address,
    /// The signed transaction.
    pub transaction: SafeTransaction,
    /// The encoded transaction data.
    pub data: Bytes,
    /// `keccak256(data)`.
    pub hash: B256,
}

impl SignerPayload {
    /// Builds the payload of `transaction` for the Safe at `safe` on `chain_id`.
    pub fn new(transaction: SafeTransaction, chain_id: u64, safe: Address) -> Self {
        let data = transaction.encode_transaction_data(chain_id, safe);
        let hash = keccak256(&data);
        Self { safe, transaction, data, hash }
    }
}

fn serialize_operation<S: serde::Serializer>(
    operation: &Operation,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(*operation as u8)
}
