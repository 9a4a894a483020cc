use std::sync::Arc;

use forkdb_primitives::{Address, U256};
use forkdb_state_api::CheckpointId;

use crate::{
    cached::CachedRemoteState, ledger::ImportLedger, source::RemoteStateSource, ImportedAccount,
    RemoteStateError, RemoteStateProvider, RemoteStateProviderFactory,
};

/// A [`RemoteStateProvider`] backed by a shared [`CachedRemoteState`].
///
/// Each provider owns its own [`ImportLedger`], so providers created by the
/// same factory never observe each other's imports or writes.
#[derive(Debug)]
pub struct ForkedStateProvider<SourceT> {
    cache: Arc<CachedRemoteState<SourceT>>,
    ledger: ImportLedger,
}

impl<SourceT: RemoteStateSource> ForkedStateProvider<SourceT> {
    /// Constructs a new instance with an empty ledger.
    pub fn new(cache: Arc<CachedRemoteState<SourceT>>) -> Self {
        Self {
            cache,
            ledger: ImportLedger::default(),
        }
    }

    /// Retrieves the import ledger.
    pub fn ledger(&self) -> &ImportLedger {
        &self.ledger
    }
}

impl<SourceT: RemoteStateSource> RemoteStateProvider for ForkedStateProvider<SourceT> {
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip(self)))]
    fn import_account(
        &mut self,
        address: Address,
        checkpoint: CheckpointId,
    ) -> Result<ImportedAccount, RemoteStateError> {
        if self.ledger.is_account_dirty(&address) {
            log::debug!("Refusing to re-import dirty account {address}");
            return Err(RemoteStateError::DirtyAccount(address));
        }

        let account = self.cache.account(address)?;
        self.ledger.mark_account(address, checkpoint);

        Ok(account)
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip(self)))]
    fn import_storage(
        &mut self,
        address: Address,
        index: U256,
        checkpoint: CheckpointId,
    ) -> Result<U256, RemoteStateError> {
        if self.ledger.is_slot_dirty(&address, &index) {
            log::debug!("Refusing to re-import dirty storage slot {index} of {address}");
            return Err(RemoteStateError::DirtySlot { address, index });
        }

        // A contract deployed locally starts with empty storage.
        let value = if self.ledger.is_contract_deployed(&address) {
            U256::ZERO
        } else {
            self.cache.storage(address, index)?
        };
        self.ledger.mark_slot(address, index, checkpoint);

        Ok(value)
    }

    fn mark_slot_written(&mut self, address: Address, index: U256, checkpoint: CheckpointId) {
        self.ledger.mark_slot(address, index, checkpoint);
    }

    fn mark_contract_deployed(&mut self, address: Address, checkpoint: CheckpointId) {
        self.ledger.mark_contract_deployed(address, checkpoint);
    }

    fn notify_reverted(&mut self, checkpoint: CheckpointId) {
        let cleared = self.ledger.revert_to(checkpoint);
        log::trace!("Cleared {cleared} import marks after reverting to checkpoint {checkpoint}");
    }
}

/// Creates [`ForkedStateProvider`]s that share a single cache.
#[derive(Debug)]
pub struct ForkedStateProviderFactory<SourceT> {
    cache: Arc<CachedRemoteState<SourceT>>,
}

impl<SourceT: RemoteStateSource> ForkedStateProviderFactory<SourceT> {
    /// Constructs a new instance.
    pub fn new(cache: CachedRemoteState<SourceT>) -> Self {
        Self {
            cache: Arc::new(cache),
        }
    }

    /// Retrieves the shared cache.
    pub fn cache(&self) -> &Arc<CachedRemoteState<SourceT>> {
        &self.cache
    }
}

impl<SourceT: RemoteStateSource> RemoteStateProviderFactory for ForkedStateProviderFactory<SourceT> {
    type Provider = ForkedStateProvider<SourceT>;

    fn new_provider(&self) -> Self::Provider {
        ForkedStateProvider::new(self.cache.clone())
    }
}
