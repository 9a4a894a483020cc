use std::{collections::HashMap, sync::Arc, time::Duration};

use forkdb_rpc_client::{header_map, RpcClient, RpcClientError};
use forkdb_state_remote::{CachedRemoteState, ForkedStateProviderFactory, RpcRemoteSource};
use serde::{Deserialize, Serialize};
use tokio::runtime;
use tokio_util::sync::CancellationToken;

use crate::ErrorPolicy;

/// Configuration for forking a remote chain
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkConfig {
    /// JSON-RPC URL of the remote node
    pub url: String,
    /// The block to fork from; the latest block if unset
    #[serde(default)]
    pub block_number: Option<u64>,
    /// Extra headers sent with every request
    #[serde(default)]
    pub http_headers: Option<HashMap<String, String>>,
    /// Maximum duration of a single remote request, in milliseconds
    #[serde(default)]
    pub request_timeout: Option<u64>,
    /// How remote failures are handled
    #[serde(default)]
    pub error_policy: ErrorPolicy,
}

impl ForkConfig {
    /// Creates a factory for providers that import state from the configured
    /// remote node, resolving the fork block if necessary.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    pub async fn provider_factory(
        &self,
        runtime: runtime::Handle,
        cancellation: CancellationToken,
    ) -> Result<ForkedStateProviderFactory<RpcRemoteSource>, RpcClientError> {
        let http_headers = self.http_headers.as_ref().map(header_map).transpose()?;
        let client = RpcClient::new(&self.url, http_headers)?;

        let block_number = match self.block_number {
            Some(block_number) => block_number,
            None => client.block_number().await?,
        };
        log::debug!("Forking {} at block {block_number}", client.url());

        let source = RpcRemoteSource::new(Arc::new(client), block_number);
        let mut cache = CachedRemoteState::new(source, runtime, cancellation);
        if let Some(request_timeout) = self.request_timeout {
            cache = cache.with_request_timeout(Duration::from_millis(request_timeout));
        }

        Ok(ForkedStateProviderFactory::new(cache))
    }
}
