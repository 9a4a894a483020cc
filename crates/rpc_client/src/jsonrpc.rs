use serde::{Deserialize, Serialize};

/// Represents JSON-RPC 2.0 success response.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Response<T> {
    /// JSON-RPC version
    #[serde(rename = "jsonrpc")]
    pub version: Version,
    /// the ID passed in the request
    pub id: Id,
    /// the data returned by the server
    #[serde(flatten)]
    pub data: ResponseData<T>,
}

/// Represents JSON-RPC 2.0 request.
#[derive(Clone, Debug, Serialize)]
pub struct Request<MethodT> {
    /// JSON-RPC version
    #[serde(rename = "jsonrpc")]
    pub version: Version,
    /// the method to invoke, with its parameters
    #[serde(flatten)]
    pub method: MethodT,
    /// the ID of the request
    pub id: Id,
}

/// Represents the result of a JSON-RPC request.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ResponseData<T> {
    /// an error response
    Error {
        /// the error
        error: Error,
    },
    /// a success response
    Success {
        /// the result
        result: T,
    },
}

impl<T> ResponseData<T> {
    /// Returns a [`Result`] where `Success` is mapped to `Ok` and `Error` to
    /// `Err`.
    pub fn into_result(self) -> Result<T, Error> {
        match self {
            ResponseData::Success { result } => Ok(result),
            ResponseData::Error { error } => Err(error),
        }
    }
}

/// Represents JSON-RPC 2.0 error object.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, thiserror::Error)]
#[error("The response reported error `{code}`: `{message}`. (optional data: {data:?})")]
pub struct Error {
    /// error code
    pub code: i64,
    /// error message
    pub message: String,
    /// optional data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Represents the JSON-RPC version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum Version {
    /// Version 2.0
    #[serde(rename = "2.0")]
    V2_0,
}

/// Represents a JSON-RPC request or response identifier.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Id {
    /// numeric id
    Num(u64),
    /// string id
    Str(String),
}
