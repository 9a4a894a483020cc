use std::{future::Future, time::Duration};

use forkdb_primitives::{Address, HashMap, U256};
use parking_lot::RwLock;
use tokio::runtime;
use tokio_util::sync::CancellationToken;

use crate::{source::RemoteStateSource, ImportedAccount, RemoteStateError};

/// A read-through cache in front of a [`RemoteStateSource`].
///
/// The cache is shared by all providers created by the same factory and may be
/// accessed from multiple threads. Asynchronous requests are driven to
/// completion on the provided runtime, blocking the calling thread. Every
/// request can be aborted by cancelling the cache's token or by exceeding the
/// request timeout. Only successful responses are cached.
#[derive(Debug)]
pub struct CachedRemoteState<SourceT> {
    source: SourceT,
    runtime: runtime::Handle,
    cancellation: CancellationToken,
    request_timeout: Option<Duration>,
    accounts: RwLock<HashMap<Address, ImportedAccount>>,
    storage: RwLock<HashMap<(Address, U256), U256>>,
}

impl<SourceT: RemoteStateSource> CachedRemoteState<SourceT> {
    /// Constructs a new instance.
    pub fn new(
        source: SourceT,
        runtime: runtime::Handle,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            source,
            runtime,
            cancellation,
            request_timeout: None,
            accounts: RwLock::new(HashMap::default()),
            storage: RwLock::new(HashMap::default()),
        }
    }

    /// Sets the maximum duration of a single remote request.
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = Some(request_timeout);
        self
    }

    /// Retrieves the token that cancels all outstanding and future requests.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Retrieves the underlying source.
    pub fn source(&self) -> &SourceT {
        &self.source
    }

    /// Retrieves the account, fetching it from the source on a cache miss.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip(self)))]
    pub fn account(&self, address: Address) -> Result<ImportedAccount, RemoteStateError> {
        if let Some(account) = self.accounts.read().get(&address) {
            return Ok(account.clone());
        }

        let account = self.block_on(self.source.account(address))?;
        log::trace!("Fetched account {address} from remote");

        Ok(self
            .accounts
            .write()
            .entry(address)
            .or_insert(account)
            .clone())
    }

    /// Retrieves the storage slot, fetching it from the source on a cache
    /// miss.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip(self)))]
    pub fn storage(&self, address: Address, index: U256) -> Result<U256, RemoteStateError> {
        if let Some(value) = self.storage.read().get(&(address, index)) {
            return Ok(*value);
        }

        let value = self.block_on(self.source.storage(address, index))?;
        log::trace!("Fetched storage slot {index} of {address} from remote");

        Ok(*self
            .storage
            .write()
            .entry((address, index))
            .or_insert(value))
    }

    fn block_on<T>(
        &self,
        request: impl Future<Output = Result<T, RemoteStateError>>,
    ) -> Result<T, RemoteStateError> {
        if self.cancellation.is_cancelled() {
            return Err(RemoteStateError::Cancelled);
        }

        let request_timeout = self.request_timeout;
        let request = async move {
            match request_timeout {
                Some(request_timeout) => tokio::time::timeout(request_timeout, request)
                    .await
                    .unwrap_or(Err(RemoteStateError::DeadlineExceeded(request_timeout))),
                None => request.await,
            }
        };

        tokio::task::block_in_place(|| {
            self.runtime.block_on(async {
                tokio::select! {
                    biased;
                    () = self.cancellation.cancelled() => Err(RemoteStateError::Cancelled),
                    result = request => result,
                }
            })
        })
    }
}
