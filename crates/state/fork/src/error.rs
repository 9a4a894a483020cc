use forkdb_primitives::{Address, U256};
use forkdb_state_api::StateError;
use forkdb_state_remote::RemoteStateError;

/// A broken precondition of the population algorithm.
///
/// Faults indicate a programming error and are reported regardless of the
/// error policy.
#[derive(Debug, thiserror::Error)]
pub enum OverlayFault {
    /// Population was requested for an account that already has a local
    /// record.
    #[error("Account {0} is already materialized and cannot be populated again")]
    AccountAlreadyMaterialized(Address),
    /// Population was requested for a storage slot of an account without a
    /// local record.
    #[error("Cannot populate storage slot {index} of account {address} without a local record")]
    SlotWithoutAccount {
        /// Address of the account
        address: Address,
        /// Index of the storage slot
        index: U256,
    },
}

/// Error of a [`ForkedState`](crate::ForkedState).
#[derive(Debug, thiserror::Error)]
pub enum ForkedStateError {
    /// The local state failed.
    #[error(transparent)]
    Local(#[from] StateError),
    /// A remote import failed under the fail-strict policy.
    #[error("Remote state import failed: {0}")]
    Remote(RemoteStateError),
    /// A precondition was violated.
    #[error(transparent)]
    Fault(#[from] OverlayFault),
}
