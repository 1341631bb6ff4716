use core::fmt::Debug;

use alloy_primitives::{Address, Bytes, TxKind, B256, U256};
use revm::{
    context::{result::ExecutionResult, BlockEnv, CfgEnv, TxEnv},
    database::{AccountState, CacheDB, EmptyDB},
    database_interface::{DatabaseRef, WrapDatabaseRef},
    primitives::hardfork::SpecId,
    state::{AccountInfo, Bytecode},
    Context, DatabaseCommit, ExecuteEvm, InspectEvm, MainBuilder, MainContext,
};
use tracing::{debug, trace, warn};

use super::{delegate_proxy_code, AccessRecorder, Sandbox, SandboxError, SnapshotId};
use crate::{CallOutput, Trace};

/// Gas limit of every transaction issued by the sandbox.
pub const SANDBOX_GAS_LIMIT: u64 = 30_000_000;

/// Default address the sandbox sends transactions from when nobody is impersonated.
pub const DEFAULT_SANDBOX_ADDRESS: Address =
    alloy_primitives::address!("0x7FA9385bE102ac3EAc297483Dd6233D62b3e1496");

/// Account that holds the caller's own code while [`Sandbox::delegate_call`] runs.
pub const DELEGATE_FALLBACK_ADDRESS: Address =
    alloy_primitives::address!("0x00000000000000000000000000000000de1e9a7e");

/// An in-memory [`Sandbox`] backed by revm and a [`CacheDB`].
///
/// Snapshots are full copies of the cache layer, so `DB` is expected to be a cheap-to-clone
/// backing store such as [`EmptyDB`] or a shared reference to a fork database. Nonce checks,
/// base fee checks and EIP-3607 are disabled so that any account can be impersonated.
#[derive(Debug)]
pub struct EvmSandbox<DB = EmptyDB> {
    db: CacheDB<DB>,
    snapshots: Vec<CacheDB<DB>>,
    address: Address,
    chain_id: u64,
    spec: SpecId,
    block: BlockEnv,
    impersonated: Option<Address>,
    recorder: AccessRecorder,
    poisoned: bool,
}

impl EvmSandbox<EmptyDB> {
    /// Creates an empty sandbox for `chain_id`.
    pub fn new(chain_id: u64) -> Self {
        Self::with_db(CacheDB::default(), chain_id)
    }
}

impl<DB> EvmSandbox<DB>
where
    DB: DatabaseRef + Clone + Debug,
{
    /// Creates a sandbox on top of an existing database.
    pub fn with_db(db: CacheDB<DB>, chain_id: u64) -> Self {
        let block = BlockEnv { number: U256::from(1), timestamp: U256::from(1), ..Default::default() };
        Self {
            db,
            snapshots: Vec::new(),
            address: DEFAULT_SANDBOX_ADDRESS,
            chain_id,
            spec: SpecId::PRAGUE,
            block,
            impersonated: None,
            recorder: AccessRecorder::new(),
            poisoned: false,
        }
    }

    /// Sets the address used as caller when nobody is impersonated.
    pub fn with_address(mut self, address: Address) -> Self {
        self.address = address;
        self
    }

    /// Sets the hardfork transactions execute under.
    pub fn with_spec(mut self, spec: SpecId) -> Self {
        self.spec = spec;
        self
    }

    /// Sets the block environment.
    pub fn with_block(mut self, block: BlockEnv) -> Self {
        self.block = block;
        self
    }

    /// Returns the underlying database.
    pub const fn db(&self) -> &CacheDB<DB> {
        &self.db
    }

    /// Whether a failed rollback left the sandbox unusable.
    pub const fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Number of live snapshots.
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    fn ensure_usable(&self) -> Result<(), SandboxError> {
        if self.poisoned {
            return Err(SandboxError::Poisoned);
        }
        Ok(())
    }

    fn cfg(&self) -> CfgEnv {
        let mut cfg = CfgEnv::new_with_spec(self.spec);
        cfg.chain_id = self.chain_id;
        cfg.disable_nonce_check = true;
        cfg.disable_eip3607 = true;
        cfg.disable_base_fee = true;
        cfg.disable_block_gas_limit = true;
        cfg
    }

    fn tx(&self, caller: Address, target: Address, value: U256, data: Bytes) -> TxEnv {
        TxEnv {
            caller,
            kind: TxKind::Call(target),
            value,
            data,
            gas_limit: SANDBOX_GAS_LIMIT,
            gas_price: 0,
            chain_id: Some(self.chain_id),
            ..Default::default()
        }
    }

    fn update_account(
        &mut self,
        account: Address,
        update: impl FnOnce(&mut AccountInfo),
    ) -> Result<(), SandboxError> {
        self.ensure_usable()?;
        let db_account = self.db.load_account(account).map_err(database_error)?;
        update(&mut db_account.info);
        if matches!(db_account.account_state, AccountState::NotExisting) {
            db_account.account_state = AccountState::None;
        }
        Ok(())
    }
}

impl<DB> Sandbox for EvmSandbox<DB>
where
    DB: DatabaseRef + Clone + Debug,
{
    fn address(&self) -> Address {
        self.address
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn snapshot(&mut self) -> Result<SnapshotId, SandboxError> {
        self.ensure_usable()?;
        self.snapshots.push(self.db.clone());
        let id = SnapshotId(self.snapshots.len() - 1);
        trace!(%id, "Snapshot taken");
        Ok(id)
    }

    fn discard_snapshot(&mut self, snapshot: SnapshotId) -> bool {
        if self.poisoned {
            return false;
        }
        if snapshot.0 >= self.snapshots.len() {
            warn!(%snapshot, live = self.snapshots.len(), "Unknown snapshot, sandbox poisoned");
            self.poisoned = true;
            return false;
        }
        self.snapshots.truncate(snapshot.0);
        trace!(%snapshot, "Snapshot discarded");
        true
    }

    fn revert(&mut self, snapshot: SnapshotId) -> bool {
        if self.poisoned {
            return false;
        }
        if snapshot.0 >= self.snapshots.len() {
            warn!(%snapshot, live = self.snapshots.len(), "Unknown snapshot, sandbox poisoned");
            self.poisoned = true;
            return false;
        }
        self.snapshots.truncate(snapshot.0 + 1);
        match self.snapshots.pop() {
            Some(db) => {
                self.db = db;
                trace!(%snapshot, "Reverted to snapshot");
                true
            }
            None => {
                self.poisoned = true;
                false
            }
        }
    }

    fn impersonate(&mut self, account: Address) {
        self.impersonated = Some(account);
    }

    fn stop_impersonate(&mut self) {
        self.impersonated = None;
    }

    fn start_trace(&mut self) {
        self.recorder.start();
    }

    fn stop_trace(&mut self) -> Trace {
        self.recorder.stop()
    }

    fn raw_call(
        &mut self,
        target: Address,
        value: U256,
        calldata: Bytes,
    ) -> Result<CallOutput, SandboxError> {
        self.ensure_usable()?;
        let caller = self.impersonated.unwrap_or(self.address);
        let tx = self.tx(caller, target, value, calldata);
        let cfg = self.cfg();
        let block = self.block.clone();

        let outcome = {
            let mut evm = Context::mainnet()
                .with_db(&mut self.db)
                .with_cfg(cfg)
                .with_block(block)
                .build_mainnet_with_inspector(&mut self.recorder);
            evm.inspect_tx(tx).map_err(|err| SandboxError::Evm(format!("{err:?}")))?
        };
        self.db.commit(outcome.state);

        let output = call_output(outcome.result);
        debug!(%caller, %target, %value, success = output.success, gas_used = output.gas_used, "Call executed");
        Ok(output)
    }

    fn delegate_call(
        &mut self,
        target: Address,
        calldata: Bytes,
    ) -> Result<CallOutput, SandboxError> {
        self.ensure_usable()?;
        let account = self.impersonated.unwrap_or(self.address);
        let original = self.db.load_account(account).map_err(database_error)?.info.clone();
        let original_code = self.code(account)?;

        // The proxy delegate-calls `target` on first entry and the original code on re-entry, so
        // calls the account makes to itself still reach its own code.
        self.set_code(DELEGATE_FALLBACK_ADDRESS, original_code)?;
        self.set_code(account, delegate_proxy_code(target, DELEGATE_FALLBACK_ADDRESS))?;
        let output = self.raw_call(account, U256::ZERO, calldata);

        self.update_account(account, |info| {
            info.code = original.code;
            info.code_hash = original.code_hash;
        })?;
        self.set_code(DELEGATE_FALLBACK_ADDRESS, Bytes::new())?;
        let output = output?;
        debug!(%account, %target, success = output.success, "Delegate call executed");
        Ok(output)
    }

    fn static_call(
        &self,
        from: Address,
        target: Address,
        calldata: Bytes,
    ) -> Result<CallOutput, SandboxError> {
        self.ensure_usable()?;
        let tx = self.tx(from, target, U256::ZERO, calldata);
        let mut evm = Context::mainnet()
            .with_db(WrapDatabaseRef(&self.db))
            .with_cfg(self.cfg())
            .with_block(self.block.clone())
            .build_mainnet();
        let outcome = evm.transact(tx).map_err(|err| SandboxError::Evm(format!("{err:?}")))?;
        Ok(call_output(outcome.result))
    }

    fn storage(&self, account: Address, slot: B256) -> Result<B256, SandboxError> {
        self.ensure_usable()?;
        let value =
            self.db.storage_ref(account, U256::from_be_bytes(slot.0)).map_err(database_error)?;
        Ok(B256::from(value))
    }

    fn code(&self, account: Address) -> Result<Bytes, SandboxError> {
        self.ensure_usable()?;
        let Some(info) = self.db.basic_ref(account).map_err(database_error)? else {
            return Ok(Bytes::new());
        };
        if info.is_empty_code_hash() {
            return Ok(Bytes::new());
        }
        let code = match info.code {
            Some(code) => code,
            None => self.db.code_by_hash_ref(info.code_hash).map_err(database_error)?,
        };
        Ok(code.original_bytes())
    }

    fn balance(&self, account: Address) -> Result<U256, SandboxError> {
        self.ensure_usable()?;
        let info = self.db.basic_ref(account).map_err(database_error)?;
        Ok(info.map(|info| info.balance).unwrap_or_default())
    }

    fn set_storage(
        &mut self,
        account: Address,
        slot: B256,
        value: B256,
    ) -> Result<(), SandboxError> {
        self.ensure_usable()?;
        self.db
            .insert_account_storage(account, U256::from_be_bytes(slot.0), U256::from_be_bytes(value.0))
            .map_err(database_error)
    }

    fn set_balance(&mut self, account: Address, balance: U256) -> Result<(), SandboxError> {
        self.update_account(account, |info| info.balance = balance)
    }

    fn set_code(&mut self, account: Address, code: Bytes) -> Result<(), SandboxError> {
        let bytecode = Bytecode::new_legacy(code);
        let code_hash = bytecode.hash_slow();
        self.update_account(account, |info| {
            info.code = Some(bytecode);
            info.code_hash = code_hash;
        })
    }
}

fn call_output<H: Debug>(result: ExecutionResult<H>) -> CallOutput {
    let gas_used = result.gas_used();
    match result {
        ExecutionResult::Success { output, .. } => {
            CallOutput { success: true, output: output.into_data(), gas_used }
        }
        ExecutionResult::Revert { output, .. } => CallOutput { success: false, output, gas_used },
        ExecutionResult::Halt { reason, .. } => {
            debug!(?reason, "Call halted");
            CallOutput { success: false, output: Bytes::new(), gas_used }
        }
    }
}

fn database_error(err: impl core::error::Error) -> SandboxError {
    SandboxError::Database(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, b256};

    const ACCOUNT: Address = address!("0x1000000000000000000000000000000000000001");
    const SLOT: B256 = b256!("0x0000000000000000000000000000000000000000000000000000000000000007");

    #[test]
    fn test_revert_restores_storage() {
        let mut sandbox = EvmSandbox::new(1);
        let snapshot = sandbox.snapshot().unwrap();
        sandbox.set_storage(ACCOUNT, SLOT, B256::with_last_byte(9)).unwrap();
        assert_eq!(sandbox.storage(ACCOUNT, SLOT).unwrap(), B256::with_last_byte(9));

        assert!(sandbox.revert(snapshot));
        assert_eq!(sandbox.storage(ACCOUNT, SLOT).unwrap(), B256::ZERO);
        assert_eq!(sandbox.snapshot_count(), 0);
    }

    #[test]
    fn test_revert_discards_later_snapshots() {
        let mut sandbox = EvmSandbox::new(1);
        let first = sandbox.snapshot().unwrap();
        sandbox.set_balance(ACCOUNT, U256::from(5)).unwrap();
        let _second = sandbox.snapshot().unwrap();
        sandbox.set_balance(ACCOUNT, U256::from(6)).unwrap();

        assert!(sandbox.revert(first));
        assert_eq!(sandbox.balance(ACCOUNT).unwrap(), U256::ZERO);
        assert_eq!(sandbox.snapshot_count(), 0);
    }

    #[test]
    fn test_unknown_snapshot_poisons() {
        let mut sandbox = EvmSandbox::new(1);
        assert!(!sandbox.revert(SnapshotId(3)));
        assert!(sandbox.is_poisoned());
        assert_eq!(sandbox.snapshot(), Err(SandboxError::Poisoned));
        assert_eq!(sandbox.storage(ACCOUNT, SLOT), Err(SandboxError::Poisoned));
    }

    #[test]
    fn test_discard_keeps_state_and_drops_snapshots() {
        let mut sandbox = EvmSandbox::new(1);
        let first = sandbox.snapshot().unwrap();
        let _second = sandbox.snapshot().unwrap();
        sandbox.set_storage(ACCOUNT, SLOT, B256::with_last_byte(9)).unwrap();

        assert!(sandbox.discard_snapshot(first));
        assert_eq!(sandbox.snapshot_count(), 0);
        assert_eq!(sandbox.storage(ACCOUNT, SLOT).unwrap(), B256::with_last_byte(9));

        assert!(!sandbox.discard_snapshot(first));
        assert!(sandbox.is_poisoned());
    }

    #[test]
    fn test_code_reads_installed_code() {
        let mut sandbox = EvmSandbox::new(1);
        assert!(sandbox.code(ACCOUNT).unwrap().is_empty());
        sandbox.set_code(ACCOUNT, Bytes::from_static(&[0x60, 0x01, 0x00])).unwrap();
        assert_eq!(sandbox.code(ACCOUNT).unwrap().as_ref(), &[0x60, 0x01, 0x00]);
    }

    #[test]
    fn test_call_to_empty_account_succeeds() {
        let mut sandbox = EvmSandbox::new(1);
        let output = sandbox.raw_call(ACCOUNT, U256::ZERO, Bytes::new()).unwrap();
        assert!(output.success);
        assert!(output.output.is_empty());
    }
}
