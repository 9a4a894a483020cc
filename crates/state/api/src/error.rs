use forkdb_primitives::{Address, B256};

use crate::CheckpointId;

/// Combinatorial error for the state API
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// An account was created at an address that already holds a local record
    #[error("Account `{0}` already exists in the local state.")]
    AccountExists(Address),
    /// Checkpoint does not exist or was discarded by an earlier revert
    #[error("Checkpoint `{0}` does not exist.")]
    InvalidCheckpoint(CheckpointId),
    /// Contract with specified code hash does not exist
    #[error("Contract with code hash `{0}` does not exist.")]
    InvalidCodeHash(B256),
    /// An account was modified without a local record
    #[error("Account `{0}` does not exist in the local state.")]
    MissingAccount(Address),
}
