//! A state that overlays a local base store on top of a remote chain.
//!
//! Accounts and storage slots are imported from the remote chain the first
//! time they are accessed and materialized in the local store. All writes stay
//! local. Reverts roll back the local store and the provider's import ledger
//! together.

mod config;
mod error;
mod session;

use forkdb_primitives::{Address, Bytecode, B256, KECCAK_EMPTY, U256};
use forkdb_state_api::{
    account::{empty_account_info, AccountInfo},
    AccountModifierFn, CheckpointId, LocalState, StateBackend, StateCheckpoint, StateError,
    StateMut,
};
use forkdb_state_persistent::PersistentState;
use forkdb_state_remote::{RemoteStateError, RemoteStateProvider};

pub use self::{
    config::ForkConfig,
    error::{ForkedStateError, OverlayFault},
    session::{ErrorPolicy, SessionErrors},
};

/// Helper type for a [`ForkedState`] on top of a [`PersistentState`].
pub type ForkedPersistentState<ProviderT> = ForkedState<PersistentState, ProviderT>;

/// A state that resolves missing accounts and storage slots by importing them
/// from a [`RemoteStateProvider`].
///
/// An instance serves a single session and is driven by a single caller.
#[derive(Debug)]
pub struct ForkedState<LocalT, ProviderT> {
    local: LocalT,
    provider: ProviderT,
    error_policy: ErrorPolicy,
    errors: SessionErrors,
}

impl<LocalT, ProviderT> ForkedState<LocalT, ProviderT> {
    /// Constructs a new instance on top of the provided local state.
    pub fn new(local: LocalT, provider: ProviderT, error_policy: ErrorPolicy) -> Self {
        Self {
            local,
            provider,
            error_policy,
            errors: SessionErrors::default(),
        }
    }

    /// Constructs a new instance on top of an empty local state.
    pub fn with_provider(provider: ProviderT, error_policy: ErrorPolicy) -> Self
    where
        LocalT: Default,
    {
        Self::new(LocalT::default(), provider, error_policy)
    }

    /// Returns the local state.
    pub fn local_state(&self) -> &LocalT {
        &self.local
    }

    /// Returns the remote state provider.
    pub fn provider(&self) -> &ProviderT {
        &self.provider
    }

    /// Returns the error policy.
    pub fn error_policy(&self) -> ErrorPolicy {
        self.error_policy
    }

    /// Returns the remote failures that were absorbed so far.
    pub fn session_errors(&self) -> &SessionErrors {
        &self.errors
    }

    /// Takes the remote failures that were absorbed so far, resetting the
    /// accumulator.
    pub fn take_session_errors(&mut self) -> SessionErrors {
        std::mem::take(&mut self.errors)
    }

    /// Ends the session, returning the local state and the absorbed remote
    /// failures.
    pub fn finish(self) -> (LocalT, SessionErrors) {
        (self.local, self.errors)
    }
}

impl<LocalT, ProviderT> ForkedState<LocalT, ProviderT>
where
    LocalT: LocalState<Error = StateError>,
    ProviderT: RemoteStateProvider,
{
    /// Imports the account from the remote chain and materializes it locally.
    ///
    /// Conflicts and failures materialize an empty account. Under
    /// [`ErrorPolicy::FailStrict`] a failure is returned after the empty
    /// account was materialized.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub fn populate_account(
        &mut self,
        address: Address,
    ) -> Result<AccountInfo, ForkedStateError> {
        if self.local.account(address)?.is_some() {
            return Err(OverlayFault::AccountAlreadyMaterialized(address).into());
        }

        let checkpoint = self.local.current_checkpoint_id();
        let (account_info, failure) = match self.provider.import_account(address, checkpoint) {
            Ok(account) => (AccountInfo::from(account), None),
            Err(error) if error.is_conflict() => {
                log::debug!("Re-synthesizing account {address} as empty: {error}");
                (empty_account_info(), None)
            }
            Err(error) => (empty_account_info(), Some(error)),
        };

        self.local.create_account(address, account_info.clone())?;

        if let Some(error) = failure {
            self.handle_failure(error)?;
        }

        Ok(account_info)
    }

    /// Imports the storage slot from the remote chain and materializes it
    /// locally. The account must have a local record.
    ///
    /// Conflicts and failures yield zero without touching the local slot.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub fn populate_slot(
        &mut self,
        address: Address,
        index: U256,
    ) -> Result<U256, ForkedStateError> {
        if self.local.account(address)?.is_none() {
            return Err(OverlayFault::SlotWithoutAccount { address, index }.into());
        }

        let checkpoint = self.local.current_checkpoint_id();
        match self.provider.import_storage(address, index, checkpoint) {
            Ok(value) => {
                self.local.insert_imported_slot(address, index, value)?;
                Ok(value)
            }
            Err(error) if error.is_conflict() => {
                log::trace!("Storage slot {index} of {address} is dirty: {error}");
                Ok(U256::ZERO)
            }
            Err(error) => {
                self.handle_failure(error)?;
                Ok(U256::ZERO)
            }
        }
    }

    /// Marks the account as self-destructed, importing it first if needed.
    pub fn self_destruct(&mut self, address: Address) -> Result<(), ForkedStateError> {
        self.ensure_account(address)?;
        self.local.self_destruct(address)?;

        Ok(())
    }

    fn handle_failure(&mut self, error: RemoteStateError) -> Result<(), ForkedStateError> {
        if error.is_cancellation() {
            log::debug!("Remote import was cancelled: {error}");
            self.errors.record_cancellation();
            return Ok(());
        }

        match self.error_policy {
            ErrorPolicy::FailSoft => {
                log::warn!("Continuing with default value after remote import failed: {error}");
                self.errors.record_failure(error);
                Ok(())
            }
            ErrorPolicy::FailStrict => Err(ForkedStateError::Remote(error)),
        }
    }

    fn ensure_account(&mut self, address: Address) -> Result<AccountInfo, ForkedStateError> {
        match self.local.account(address)? {
            Some(account_info) => Ok(account_info),
            None => self.populate_account(address),
        }
    }

    fn modify_balance(
        &mut self,
        address: Address,
        modifier: impl Fn(U256) -> U256 + Send + 'static,
    ) -> Result<(), ForkedStateError> {
        self.ensure_account(address)?;
        self.local.modify_account(
            address,
            AccountModifierFn::new(Box::new(move |balance, _nonce, _code| {
                *balance = modifier(*balance);
            })),
        )?;

        Ok(())
    }
}

impl<LocalT, ProviderT> StateCheckpoint for ForkedState<LocalT, ProviderT>
where
    LocalT: LocalState<Error = StateError>,
    ProviderT: RemoteStateProvider,
{
    type Error = ForkedStateError;

    fn checkpoint(&mut self) -> CheckpointId {
        self.local.checkpoint()
    }

    fn current_checkpoint_id(&self) -> CheckpointId {
        self.local.current_checkpoint_id()
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    fn revert_to_checkpoint(&mut self, checkpoint: CheckpointId) -> Result<(), Self::Error> {
        self.local.revert_to_checkpoint(checkpoint)?;
        self.provider.notify_reverted(checkpoint);

        Ok(())
    }
}

impl<LocalT, ProviderT> StateBackend for ForkedState<LocalT, ProviderT>
where
    LocalT: LocalState<Error = StateError>,
    ProviderT: RemoteStateProvider,
{
    fn exists(&mut self, address: Address) -> Result<bool, Self::Error> {
        if self.local.account(address)?.is_some() {
            return Ok(true);
        }

        // The remote chain can't tell an absent account from an empty one.
        self.is_empty(address)
    }

    fn is_empty(&mut self, address: Address) -> Result<bool, Self::Error> {
        Ok(self.ensure_account(address)?.is_empty())
    }

    fn balance(&mut self, address: Address) -> Result<U256, Self::Error> {
        Ok(self.ensure_account(address)?.balance)
    }

    fn nonce(&mut self, address: Address) -> Result<u64, Self::Error> {
        Ok(self.ensure_account(address)?.nonce)
    }

    fn code(&mut self, address: Address) -> Result<Bytecode, Self::Error> {
        Ok(self
            .ensure_account(address)?
            .code
            .unwrap_or_else(Bytecode::new))
    }

    fn code_size(&mut self, address: Address) -> Result<usize, Self::Error> {
        Ok(self.code(address)?.len())
    }

    fn code_hash(&mut self, address: Address) -> Result<B256, Self::Error> {
        Ok(self.ensure_account(address)?.code_hash)
    }

    fn storage(&mut self, address: Address, index: U256) -> Result<U256, Self::Error> {
        self.ensure_account(address)?;

        // Zero is indistinguishable from unresolved, so it always falls through.
        match self.local.storage_slot(address, index) {
            Some(value) if !value.is_zero() => Ok(value),
            _ => self.populate_slot(address, index),
        }
    }

    fn committed_storage(&mut self, address: Address, index: U256) -> Result<U256, Self::Error> {
        self.ensure_account(address)?;

        match self.local.committed_storage_slot(address, index) {
            Some(value) if !value.is_zero() => Ok(value),
            _ => self.populate_slot(address, index),
        }
    }

    fn has_self_destructed(&self, address: Address) -> Result<bool, Self::Error> {
        Ok(self.local.is_self_destructed(address))
    }

    fn add_balance(&mut self, address: Address, amount: U256) -> Result<(), Self::Error> {
        self.modify_balance(address, move |balance| balance.wrapping_add(amount))
    }

    fn sub_balance(&mut self, address: Address, amount: U256) -> Result<(), Self::Error> {
        self.modify_balance(address, move |balance| balance.wrapping_sub(amount))
    }

    fn set_balance(&mut self, address: Address, balance: U256) -> Result<(), Self::Error> {
        self.modify_balance(address, move |_balance| balance)
    }

    fn set_nonce(&mut self, address: Address, nonce: u64) -> Result<(), Self::Error> {
        self.ensure_account(address)?;
        self.local.modify_account(
            address,
            AccountModifierFn::new(Box::new(move |_balance, account_nonce, _code| {
                *account_nonce = nonce;
            })),
        )?;

        Ok(())
    }

    fn set_code(&mut self, address: Address, code: Bytecode) -> Result<(), Self::Error> {
        let previous_code_hash = self.ensure_account(address)?.code_hash;
        // A delegation designator doesn't clear the storage of the delegating
        // account.
        let is_deployment =
            previous_code_hash == KECCAK_EMPTY && !code.is_empty() && !code.is_eip7702();

        self.local.modify_account(
            address,
            AccountModifierFn::new(Box::new(move |_balance, _nonce, account_code| {
                *account_code = Some(code.clone());
            })),
        )?;

        if is_deployment {
            let checkpoint = self.local.current_checkpoint_id();
            self.provider.mark_contract_deployed(address, checkpoint);
        }

        Ok(())
    }

    fn set_storage(
        &mut self,
        address: Address,
        index: U256,
        value: U256,
    ) -> Result<(), Self::Error> {
        self.ensure_account(address)?;
        self.local.set_storage_slot(address, index, value)?;

        let checkpoint = self.local.current_checkpoint_id();
        self.provider.mark_slot_written(address, index, checkpoint);

        Ok(())
    }

    fn finalize(&mut self) {
        self.local.finalize();
    }
}

impl<LocalT, ProviderT> StateMut for ForkedState<LocalT, ProviderT>
where
    LocalT: LocalState<Error = StateError>,
    ProviderT: RemoteStateProvider,
{
    type Error = ForkedStateError;

    fn basic_mut(&mut self, address: Address) -> Result<Option<AccountInfo>, Self::Error> {
        self.ensure_account(address).map(Some)
    }

    fn code_by_hash_mut(&mut self, code_hash: B256) -> Result<Bytecode, Self::Error> {
        Ok(self.local.code_by_hash(code_hash)?)
    }

    fn storage_mut(&mut self, address: Address, index: U256) -> Result<U256, Self::Error> {
        StateBackend::storage(self, address, index)
    }
}

#[cfg(test)]
mod tests {
    use forkdb_state_remote::ImportedAccount;

    use super::*;

    /// A provider that answers every import from fixed values, without a
    /// ledger.
    #[derive(Debug, Default)]
    struct FixedProvider {
        account: ImportedAccount,
        slot: U256,
        reverts: Vec<CheckpointId>,
    }

    impl RemoteStateProvider for FixedProvider {
        fn import_account(
            &mut self,
            _address: Address,
            _checkpoint: CheckpointId,
        ) -> Result<ImportedAccount, RemoteStateError> {
            Ok(self.account.clone())
        }

        fn import_storage(
            &mut self,
            _address: Address,
            _index: U256,
            _checkpoint: CheckpointId,
        ) -> Result<U256, RemoteStateError> {
            Ok(self.slot)
        }

        fn mark_slot_written(
            &mut self,
            _address: Address,
            _index: U256,
            _checkpoint: CheckpointId,
        ) {
        }

        fn mark_contract_deployed(&mut self, _address: Address, _checkpoint: CheckpointId) {}

        fn notify_reverted(&mut self, checkpoint: CheckpointId) {
            self.reverts.push(checkpoint);
        }
    }

    fn forked_state(provider: FixedProvider) -> ForkedPersistentState<FixedProvider> {
        ForkedState::with_provider(provider, ErrorPolicy::FailSoft)
    }

    #[test]
    fn balance_arithmetic_wraps() -> anyhow::Result<()> {
        let mut state = forked_state(FixedProvider::default());
        let address = Address::random();

        state.sub_balance(address, U256::from(1))?;
        assert_eq!(state.balance(address)?, U256::MAX);

        state.add_balance(address, U256::from(2))?;
        assert_eq!(state.balance(address)?, U256::from(1));

        Ok(())
    }

    #[test]
    fn imported_slot_sets_present_and_committed_values() -> anyhow::Result<()> {
        let mut state = forked_state(FixedProvider {
            slot: U256::from(9),
            ..FixedProvider::default()
        });
        let address = Address::random();
        let index = U256::from(1);

        assert_eq!(StateBackend::storage(&mut state, address, index)?, U256::from(9));
        assert_eq!(state.local_state().storage_slot(address, index), Some(U256::from(9)));
        assert_eq!(
            state.local_state().committed_storage_slot(address, index),
            Some(U256::from(9))
        );

        Ok(())
    }

    #[test]
    fn basic_mut_materializes_account() -> anyhow::Result<()> {
        let mut state = forked_state(FixedProvider {
            account: ImportedAccount {
                balance: U256::from(5),
                nonce: 2,
                code: forkdb_primitives::Bytes::new(),
            },
            ..FixedProvider::default()
        });
        let address = Address::random();

        let account_info = state.basic_mut(address)?.expect("account is materialized");
        assert_eq!(account_info.balance, U256::from(5));
        assert_eq!(account_info.nonce, 2);
        assert_eq!(account_info.code_hash, KECCAK_EMPTY);
        assert!(state.local_state().account(address)?.is_some());

        Ok(())
    }

    #[test]
    fn failed_revert_is_not_forwarded() -> anyhow::Result<()> {
        let mut state = forked_state(FixedProvider::default());

        let checkpoint = state.checkpoint();
        state.revert_to_checkpoint(checkpoint)?;

        let result = state.revert_to_checkpoint(checkpoint);
        assert!(matches!(
            result,
            Err(ForkedStateError::Local(StateError::InvalidCheckpoint(id))) if id == checkpoint
        ));
        assert_eq!(state.provider().reverts, vec![checkpoint]);

        Ok(())
    }

    #[test]
    fn finish_returns_local_state() -> anyhow::Result<()> {
        let mut state = forked_state(FixedProvider::default());
        let address = Address::random();

        state.set_nonce(address, 7)?;

        let (mut local, errors) = state.finish();
        assert!(errors.is_empty());
        assert_eq!(StateBackend::nonce(&mut local, address)?, 7);

        Ok(())
    }
}
