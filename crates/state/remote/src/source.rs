use std::{future::Future, sync::Arc};

use forkdb_primitives::{Address, U256};
use forkdb_rpc_client::{BlockSpec, RpcClient};

use crate::{ImportedAccount, RemoteStateError};

/// An asynchronous source of state as of the fork point.
pub trait RemoteStateSource: Send + Sync {
    /// Retrieves the balance, nonce and code of the account.
    fn account(
        &self,
        address: Address,
    ) -> impl Future<Output = Result<ImportedAccount, RemoteStateError>> + Send;

    /// Retrieves the value of the storage slot.
    fn storage(
        &self,
        address: Address,
        index: U256,
    ) -> impl Future<Output = Result<U256, RemoteStateError>> + Send;
}

/// A [`RemoteStateSource`] that queries a remote Ethereum node via JSON-RPC,
/// pinned to the fork block.
#[derive(Debug)]
pub struct RpcRemoteSource {
    client: Arc<RpcClient>,
    block_number: u64,
}

impl RpcRemoteSource {
    /// Constructs a new instance that pulls data as of the provided block.
    pub fn new(client: Arc<RpcClient>, block_number: u64) -> Self {
        Self {
            client,
            block_number,
        }
    }

    /// Retrieves the fork block number.
    pub fn block_number(&self) -> u64 {
        self.block_number
    }
}

impl RemoteStateSource for RpcRemoteSource {
    /// Submits three concurrent RPC method invocations in order to obtain
    /// the set of data contained in [`ImportedAccount`].
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip(self)))]
    async fn account(&self, address: Address) -> Result<ImportedAccount, RemoteStateError> {
        let block = BlockSpec::Number(self.block_number);

        let balance = self.client.get_balance(address, block);
        let nonce = self.client.get_transaction_count(address, block);
        let code = self.client.get_code(address, block);

        let (balance, nonce, code) = tokio::try_join!(balance, nonce, code)?;

        Ok(ImportedAccount {
            balance,
            nonce,
            code,
        })
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip(self)))]
    async fn storage(&self, address: Address, index: U256) -> Result<U256, RemoteStateError> {
        let value = self
            .client
            .get_storage_at(address, index, BlockSpec::Number(self.block_number))
            .await?;

        Ok(value)
    }
}
