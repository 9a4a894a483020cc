//! Test doubles for remote sources and providers.

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use forkdb_primitives::{Address, HashMap, HashSet, U256};
use forkdb_state_api::CheckpointId;

use crate::{
    source::RemoteStateSource, ImportedAccount, RemoteStateError, RemoteStateProvider,
};

/// An in-memory [`RemoteStateSource`] that counts the requests it serves.
///
/// Unknown accounts are reported as empty and unknown slots as zero, like a
/// remote node would.
#[derive(Debug, Default)]
pub struct MockRemoteSource {
    accounts: HashMap<Address, ImportedAccount>,
    storage: HashMap<(Address, U256), U256>,
    failing: HashSet<Address>,
    latency: Option<Duration>,
    account_fetches: AtomicUsize,
    storage_fetches: AtomicUsize,
}

impl MockRemoteSource {
    /// Adds an account to the remote state.
    pub fn with_account(mut self, address: Address, account: ImportedAccount) -> Self {
        self.accounts.insert(address, account);
        self
    }

    /// Adds a storage slot to the remote state.
    pub fn with_storage(mut self, address: Address, index: U256, value: U256) -> Self {
        self.storage.insert((address, index), value);
        self
    }

    /// Makes all requests for the address fail.
    pub fn with_failure(mut self, address: Address) -> Self {
        self.failing.insert(address);
        self
    }

    /// Delays every response by the provided duration.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Returns the number of account requests that were served.
    pub fn account_fetches(&self) -> usize {
        self.account_fetches.load(Ordering::SeqCst)
    }

    /// Returns the number of storage requests that were served.
    pub fn storage_fetches(&self) -> usize {
        self.storage_fetches.load(Ordering::SeqCst)
    }

    async fn respond(&self, address: &Address) -> Result<(), RemoteStateError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if self.failing.contains(address) {
            Err(RemoteStateError::Other(
                format!("mock failure for {address}").into(),
            ))
        } else {
            Ok(())
        }
    }
}

impl RemoteStateSource for MockRemoteSource {
    async fn account(&self, address: Address) -> Result<ImportedAccount, RemoteStateError> {
        self.account_fetches.fetch_add(1, Ordering::SeqCst);
        self.respond(&address).await?;

        Ok(self.accounts.get(&address).cloned().unwrap_or_default())
    }

    async fn storage(&self, address: Address, index: U256) -> Result<U256, RemoteStateError> {
        self.storage_fetches.fetch_add(1, Ordering::SeqCst);
        self.respond(&address).await?;

        Ok(self
            .storage
            .get(&(address, index))
            .copied()
            .unwrap_or(U256::ZERO))
    }
}

/// A call received by a [`RecordingProvider`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderCall {
    /// [`RemoteStateProvider::import_account`]
    ImportAccount {
        /// Address of the account
        address: Address,
        /// Checkpoint of the call
        checkpoint: CheckpointId,
    },
    /// [`RemoteStateProvider::import_storage`]
    ImportStorage {
        /// Address of the account
        address: Address,
        /// Index of the storage slot
        index: U256,
        /// Checkpoint of the call
        checkpoint: CheckpointId,
    },
    /// [`RemoteStateProvider::mark_slot_written`]
    MarkSlotWritten {
        /// Address of the account
        address: Address,
        /// Index of the storage slot
        index: U256,
        /// Checkpoint of the call
        checkpoint: CheckpointId,
    },
    /// [`RemoteStateProvider::mark_contract_deployed`]
    MarkContractDeployed {
        /// Address of the contract
        address: Address,
        /// Checkpoint of the call
        checkpoint: CheckpointId,
    },
    /// [`RemoteStateProvider::notify_reverted`]
    NotifyReverted(CheckpointId),
}

/// A [`RemoteStateProvider`] that records every call before forwarding it to
/// the wrapped provider.
#[derive(Debug)]
pub struct RecordingProvider<ProviderT> {
    inner: ProviderT,
    calls: Vec<ProviderCall>,
}

impl<ProviderT> RecordingProvider<ProviderT> {
    /// Constructs a new instance.
    pub fn new(inner: ProviderT) -> Self {
        Self {
            inner,
            calls: Vec::new(),
        }
    }

    /// Returns all recorded calls in order.
    pub fn calls(&self) -> &[ProviderCall] {
        &self.calls
    }

    /// Returns the number of account imports for the address.
    pub fn account_imports(&self, address: Address) -> usize {
        self.calls
            .iter()
            .filter(|call| {
                matches!(call, ProviderCall::ImportAccount { address: imported, .. } if *imported == address)
            })
            .count()
    }

    /// Returns the number of storage imports for the slot.
    pub fn storage_imports(&self, address: Address, index: U256) -> usize {
        self.calls
            .iter()
            .filter(|call| {
                matches!(
                    call,
                    ProviderCall::ImportStorage { address: imported, index: imported_index, .. }
                        if *imported == address && *imported_index == index
                )
            })
            .count()
    }

    /// Returns the wrapped provider.
    pub fn inner(&self) -> &ProviderT {
        &self.inner
    }
}

impl<ProviderT: RemoteStateProvider> RemoteStateProvider for RecordingProvider<ProviderT> {
    fn import_account(
        &mut self,
        address: Address,
        checkpoint: CheckpointId,
    ) -> Result<ImportedAccount, RemoteStateError> {
        self.calls.push(ProviderCall::ImportAccount {
            address,
            checkpoint,
        });
        self.inner.import_account(address, checkpoint)
    }

    fn import_storage(
        &mut self,
        address: Address,
        index: U256,
        checkpoint: CheckpointId,
    ) -> Result<U256, RemoteStateError> {
        self.calls.push(ProviderCall::ImportStorage {
            address,
            index,
            checkpoint,
        });
        self.inner.import_storage(address, index, checkpoint)
    }

    fn mark_slot_written(&mut self, address: Address, index: U256, checkpoint: CheckpointId) {
        self.calls.push(ProviderCall::MarkSlotWritten {
            address,
            index,
            checkpoint,
        });
        self.inner.mark_slot_written(address, index, checkpoint);
    }

    fn mark_contract_deployed(&mut self, address: Address, checkpoint: CheckpointId) {
        self.calls.push(ProviderCall::MarkContractDeployed {
            address,
            checkpoint,
        });
        self.inner.mark_contract_deployed(address, checkpoint);
    }

    fn notify_reverted(&mut self, checkpoint: CheckpointId) {
        self.calls.push(ProviderCall::NotifyReverted(checkpoint));
        self.inner.notify_reverted(checkpoint);
    }
}
