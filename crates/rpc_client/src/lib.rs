#![warn(missing_docs)]

//! Ethereum JSON-RPC client for the state queries of a forked chain

mod client;
mod request_methods;

/// Types specific to JSON-RPC
pub mod jsonrpc;

pub use self::{
    client::{header, header_map, HeaderMap, RpcClient, RpcClientError},
    request_methods::{BlockSpec, RequestMethod},
};
