//! The protocol through which a forked state imports data from a remote
//! chain, and its implementation on top of a shared, cached remote source.
//!
//! A provider grants at most one import per key per epoch. An epoch lasts
//! until a revert rolls back past the checkpoint at which the key was imported
//! or written.

mod cached;
mod error;
mod ledger;
mod provider;
mod source;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use auto_impl::auto_impl;
use forkdb_primitives::{code_hash, Address, Bytecode, Bytes, U256};
use forkdb_state_api::{account::AccountInfo, CheckpointId};

pub use self::{
    cached::CachedRemoteState,
    error::RemoteStateError,
    ledger::ImportLedger,
    provider::{ForkedStateProvider, ForkedStateProviderFactory},
    source::{RemoteStateSource, RpcRemoteSource},
};

/// The top-level values of an account as of the fork point.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportedAccount {
    /// Balance
    pub balance: U256,
    /// Nonce
    pub nonce: u64,
    /// Raw code; empty if the account has no code
    pub code: Bytes,
}

impl From<ImportedAccount> for AccountInfo {
    fn from(account: ImportedAccount) -> Self {
        let code_hash = code_hash(&account.code);
        let code = if account.code.is_empty() {
            None
        } else {
            Some(Bytecode::new_raw(account.code))
        };

        AccountInfo {
            balance: account.balance,
            nonce: account.nonce,
            code_hash,
            code,
        }
    }
}

/// Supplier of remote state that enforces the once-per-epoch import rule and
/// is kept informed about local writes and reverts.
#[auto_impl(&mut, Box)]
pub trait RemoteStateProvider {
    /// Imports the account as of the fork point.
    ///
    /// Fails with a conflict if the account was already imported since the
    /// last revert that affected it.
    fn import_account(
        &mut self,
        address: Address,
        checkpoint: CheckpointId,
    ) -> Result<ImportedAccount, RemoteStateError>;

    /// Imports the value of the storage slot as of the fork point.
    ///
    /// Fails with a conflict if the slot was already imported or written since
    /// the last revert that affected it.
    fn import_storage(
        &mut self,
        address: Address,
        index: U256,
        checkpoint: CheckpointId,
    ) -> Result<U256, RemoteStateError>;

    /// Records a local write to the storage slot. Idempotent.
    fn mark_slot_written(&mut self, address: Address, index: U256, checkpoint: CheckpointId);

    /// Hints that a contract was deployed at the address.
    fn mark_contract_deployed(&mut self, address: Address, checkpoint: CheckpointId);

    /// Clears all marks attributed to checkpoints after the provided one.
    fn notify_reverted(&mut self, checkpoint: CheckpointId);
}

/// Creates [`RemoteStateProvider`]s, one per logical session.
pub trait RemoteStateProviderFactory {
    /// The type of the created providers
    type Provider: RemoteStateProvider;

    /// Creates a provider with a fresh import ledger.
    fn new_provider(&self) -> Self::Provider;
}
