use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use forkdb_primitives::{Address, Bytes, U256, U64};
pub use reqwest::header::{self, HeaderMap};
use reqwest::{
    header::{HeaderName, HeaderValue},
    Client as HttpClient,
};
use reqwest_middleware::{ClientBuilder as HttpClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
#[cfg(feature = "tracing")]
use reqwest_tracing::TracingMiddleware;
use serde::de::DeserializeOwned;

use crate::{jsonrpc, request_methods::RequestMethod, BlockSpec};

// Retry parameters for rate limited requests.
const EXPONENT_BASE: u32 = 2;
const MIN_RETRY_INTERVAL: Duration = Duration::from_secs(1);
const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(32);
const MAX_RETRIES: u32 = 9;

/// Specialized error types
#[derive(Debug, thiserror::Error)]
pub enum RpcClientError {
    /// The HTTP client could not be constructed
    #[error("Failed to build the HTTP client: {0}")]
    FailedToBuild(reqwest::Error),

    /// The message could not be sent to the remote node
    #[error(transparent)]
    FailedToSend(reqwest_middleware::Error),

    /// The remote node failed to reply with the body of the response
    #[error("The response text was corrupted: {0}.")]
    CorruptedResponse(reqwest::Error),

    /// The server returned an error code.
    #[error("The Http server returned error status code: {0}")]
    HttpStatus(reqwest::Error),

    /// A header name or value is not valid HTTP.
    #[error("Invalid HTTP header '{name}'")]
    InvalidHeader {
        /// The header name
        name: String,
    },

    /// The request cannot be serialized as JSON.
    #[error(transparent)]
    InvalidJsonRequest(serde_json::Error),

    /// The server returned an invalid JSON-RPC response.
    #[error(
        "Response '{response}' failed to parse with expected type '{expected_type}', due to error: '{error}'"
    )]
    InvalidResponse {
        /// The response text
        response: String,
        /// The expected type of the response
        expected_type: &'static str,
        /// The parse error
        error: serde_json::Error,
    },

    /// The server returned an invalid JSON-RPC id.
    #[error("The server returned an invalid id: '{id:?}' in response: '{response}'")]
    InvalidId {
        /// The response text
        response: String,
        /// The invalid id
        id: jsonrpc::Id,
    },

    /// Invalid URL format
    #[error(transparent)]
    InvalidUrl(#[from] url::ParseError),

    /// The JSON-RPC returned an error.
    #[error("{error}. Request: {request}")]
    JsonRpcError {
        /// The JSON-RPC error
        error: jsonrpc::Error,
        /// The request JSON
        request: String,
    },
}

/// A client for executing RPC methods on a remote Ethereum node.
///
/// Transient transport failures (rate limiting, timeouts, 5xx responses) are
/// retried with exponential backoff before an error is reported.
#[derive(Debug)]
pub struct RpcClient {
    url: url::Url,
    client: ClientWithMiddleware,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Create a new instance, given a remote node URL.
    pub fn new(url: &str, extra_headers: Option<HeaderMap>) -> Result<Self, RpcClientError> {
        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(MIN_RETRY_INTERVAL, MAX_RETRY_INTERVAL)
            .base(EXPONENT_BASE)
            .build_with_max_retries(MAX_RETRIES);

        let mut headers = extra_headers.unwrap_or_default();
        headers.append(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.append(
            header::USER_AGENT,
            HeaderValue::from_str(&format!("forkdb {}", env!("CARGO_PKG_VERSION"))).map_err(
                |_invalid| RpcClientError::InvalidHeader {
                    name: header::USER_AGENT.to_string(),
                },
            )?,
        );

        let client = HttpClient::builder()
            .default_headers(headers)
            .build()
            .map_err(RpcClientError::FailedToBuild)?;

        #[cfg(feature = "tracing")]
        let client = HttpClientBuilder::new(client)
            .with(TracingMiddleware::default())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        #[cfg(not(feature = "tracing"))]
        let client = HttpClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(RpcClient {
            url: url.parse()?,
            client,
            next_id: AtomicU64::new(0),
        })
    }

    /// Returns the URL of the remote node.
    pub fn url(&self) -> &url::Url {
        &self.url
    }

    fn parse_response_str<SuccessT: DeserializeOwned>(
        response: String,
    ) -> Result<jsonrpc::Response<SuccessT>, RpcClientError> {
        serde_json::from_str(&response).map_err(|error| RpcClientError::InvalidResponse {
            response,
            expected_type: std::any::type_name::<jsonrpc::Response<SuccessT>>(),
            error,
        })
    }

    fn extract_result<SuccessT: DeserializeOwned>(
        request: &SerializedRequest,
        response: String,
    ) -> Result<SuccessT, RpcClientError> {
        let jsonrpc::Response { id, data, .. } = Self::parse_response_str(response.clone())?;

        if id != request.id {
            return Err(RpcClientError::InvalidId { response, id });
        }

        data.into_result()
            .map_err(|error| RpcClientError::JsonRpcError {
                error,
                request: request.body.clone(),
            })
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
    async fn send_request_body(
        &self,
        request: &SerializedRequest,
    ) -> Result<String, RpcClientError> {
        self.client
            .post(self.url.clone())
            .body(request.body.clone())
            .send()
            .await
            .map_err(RpcClientError::FailedToSend)?
            .error_for_status()
            .map_err(RpcClientError::HttpStatus)?
            .text()
            .await
            .map_err(RpcClientError::CorruptedResponse)
    }

    fn serialize_request(&self, method: &RequestMethod) -> Result<SerializedRequest, RpcClientError> {
        let id = jsonrpc::Id::Num(self.next_id.fetch_add(1, Ordering::Relaxed));
        serialize_request_with_id(method, id)
    }

    /// Calls the provided JSON-RPC method and returns the result.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip(self)))]
    pub async fn call<SuccessT: DeserializeOwned>(
        &self,
        method: RequestMethod,
    ) -> Result<SuccessT, RpcClientError> {
        let request = self.serialize_request(&method)?;
        log::trace!("Sending request: {}", request.body);

        let response = self.send_request_body(&request).await?;
        Self::extract_result(&request, response)
    }

    /// Calls `eth_blockNumber` and returns the block number.
    pub async fn block_number(&self) -> Result<u64, RpcClientError> {
        self.call::<U64>(RequestMethod::BlockNumber(()))
            .await
            .map(|block_number| block_number.to::<u64>())
    }

    /// Calls `eth_chainId` and returns the chain ID.
    pub async fn chain_id(&self) -> Result<u64, RpcClientError> {
        self.call::<U64>(RequestMethod::ChainId(()))
            .await
            .map(|chain_id| chain_id.to::<u64>())
    }

    /// Calls `eth_getBalance`.
    pub async fn get_balance(
        &self,
        address: Address,
        block: BlockSpec,
    ) -> Result<U256, RpcClientError> {
        self.call(RequestMethod::GetBalance(address, block)).await
    }

    /// Calls `eth_getCode`.
    pub async fn get_code(
        &self,
        address: Address,
        block: BlockSpec,
    ) -> Result<Bytes, RpcClientError> {
        self.call(RequestMethod::GetCode(address, block)).await
    }

    /// Calls `eth_getStorageAt`.
    pub async fn get_storage_at(
        &self,
        address: Address,
        index: U256,
        block: BlockSpec,
    ) -> Result<U256, RpcClientError> {
        self.call(RequestMethod::GetStorageAt(address, index, block))
            .await
    }

    /// Calls `eth_getTransactionCount`.
    pub async fn get_transaction_count(
        &self,
        address: Address,
        block: BlockSpec,
    ) -> Result<u64, RpcClientError> {
        self.call::<U64>(RequestMethod::GetTransactionCount(address, block))
            .await
            .map(|nonce| nonce.to::<u64>())
    }
}

/// Converts name-value pairs into a [`HeaderMap`].
pub fn header_map<'h>(
    headers: impl IntoIterator<Item = (&'h String, &'h String)>,
) -> Result<HeaderMap, RpcClientError> {
    headers
        .into_iter()
        .map(|(name, value)| -> Result<_, RpcClientError> {
            let invalid = || RpcClientError::InvalidHeader { name: name.clone() };

            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|_error| invalid())?;
            let header_value = HeaderValue::from_str(value).map_err(|_error| invalid())?;

            Ok((header_name, header_value))
        })
        .collect()
}

fn serialize_request_with_id(
    method: &RequestMethod,
    id: jsonrpc::Id,
) -> Result<SerializedRequest, RpcClientError> {
    let body = serde_json::to_string(&jsonrpc::Request {
        version: jsonrpc::Version::V2_0,
        method,
        id: id.clone(),
    })
    .map_err(RpcClientError::InvalidJsonRequest)?;

    Ok(SerializedRequest { id, body })
}

#[derive(Clone, Debug)]
struct SerializedRequest {
    id: jsonrpc::Id,
    body: String,
}
