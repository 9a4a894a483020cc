use std::time::Duration;

use forkdb_primitives::{Address, U256};
use forkdb_rpc_client::RpcClientError;

/// An error that occurred while importing state from a remote source.
///
/// Errors fall into three classes: conflicts (the key is dirty in the current
/// epoch), cancellations (the request was abandoned before completing), and
/// failures (everything else).
#[derive(Debug, thiserror::Error)]
pub enum RemoteStateError {
    /// The account was already imported or written in the current epoch.
    #[error("Account {0} was already imported or modified since the last revert")]
    DirtyAccount(Address),
    /// The storage slot was already imported or written in the current epoch.
    #[error("Storage slot {index} of account {address} was already imported or modified since the last revert")]
    DirtySlot {
        /// Address of the account
        address: Address,
        /// Index of the storage slot
        index: U256,
    },
    /// The request was cancelled.
    #[error("Remote request was cancelled")]
    Cancelled,
    /// The request did not complete within the configured deadline.
    #[error("Remote request did not complete within {0:?}")]
    DeadlineExceeded(Duration),
    /// The JSON-RPC transport failed.
    #[error(transparent)]
    Rpc(#[from] RpcClientError),
    /// Any other failure reported by a remote source.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl RemoteStateError {
    /// Whether the error is an import conflict for a dirty key.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            RemoteStateError::DirtyAccount(_) | RemoteStateError::DirtySlot { .. }
        )
    }

    /// Whether the error is the result of a cancelled or timed-out request.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            RemoteStateError::Cancelled | RemoteStateError::DeadlineExceeded(_)
        )
    }
}
