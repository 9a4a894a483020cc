use forkdb_primitives::{Address, U256};
use serde::{Serialize, Serializer};

/// A block identifier: either a block number or the `latest` tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockSpec {
    /// Block number
    Number(u64),
    /// The most recent block known to the remote node
    Latest,
}

impl Serialize for BlockSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            BlockSpec::Number(number) => serializer.serialize_str(&format!("{number:#x}")),
            BlockSpec::Latest => serializer.serialize_str("latest"),
        }
    }
}

/// Methods for requests to a remote Ethereum node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "method", content = "params")]
pub enum RequestMethod {
    /// `eth_blockNumber`
    #[serde(rename = "eth_blockNumber", with = "empty_params")]
    BlockNumber(()),
    /// `eth_chainId`
    #[serde(rename = "eth_chainId", with = "empty_params")]
    ChainId(()),
    /// `eth_getBalance`
    #[serde(rename = "eth_getBalance")]
    GetBalance(Address, BlockSpec),
    /// `eth_getCode`
    #[serde(rename = "eth_getCode")]
    GetCode(Address, BlockSpec),
    /// `eth_getStorageAt`
    #[serde(rename = "eth_getStorageAt")]
    GetStorageAt(Address, U256, BlockSpec),
    /// `eth_getTransactionCount`
    #[serde(rename = "eth_getTransactionCount")]
    GetTransactionCount(Address, BlockSpec),
}

impl RequestMethod {
    /// Returns the JSON-RPC name of the method.
    pub fn name(&self) -> &'static str {
        match self {
            RequestMethod::BlockNumber(()) => "eth_blockNumber",
            RequestMethod::ChainId(()) => "eth_chainId",
            RequestMethod::GetBalance(..) => "eth_getBalance",
            RequestMethod::GetCode(..) => "eth_getCode",
            RequestMethod::GetStorageAt(..) => "eth_getStorageAt",
            RequestMethod::GetTransactionCount(..) => "eth_getTransactionCount",
        }
    }
}

/// Serializes a parameterless method as an empty `params` array.
mod empty_params {
    use serde::{ser::SerializeSeq, Serializer};

    pub fn serialize<S: Serializer>(_: &(), serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_seq(Some(0))?.end()
    }
}
