//! Types and traits for local and forked Ethereum state management

pub mod account;
mod error;

use core::{fmt::Debug, ops::Deref};

use auto_impl::auto_impl;
use forkdb_primitives::{Address, Bytecode, B256, U256};
use forkdb_trie::sec_trie_root;

pub use self::error::StateError;
use crate::account::{AccountInfo, BasicAccount};

/// Identifier of a journal checkpoint.
///
/// Checkpoint ids are minted from a monotonically increasing counter and are
/// never reused, not even after a revert.
pub type CheckpointId = u64;

/// Trait for reading state information.
#[auto_impl(&, &mut, Box, Rc, Arc)]
pub trait State {
    /// Combinatorial state error.
    type Error;

    /// Get basic account information.
    fn basic(&self, address: Address) -> Result<Option<AccountInfo>, Self::Error>;

    /// Get account code by its hash
    fn code_by_hash(&self, code_hash: B256) -> Result<Bytecode, Self::Error>;

    /// Get storage value of address at index.
    fn storage(&self, address: Address, index: U256) -> Result<U256, Self::Error>;
}

/// Trait for reading state information that may require mutation of the
/// state, e.g. to materialize data retrieved from elsewhere.
#[auto_impl(&mut, Box)]
pub trait StateMut {
    /// Combinatorial state error.
    type Error;

    /// Get basic account information.
    fn basic_mut(&mut self, address: Address) -> Result<Option<AccountInfo>, Self::Error>;

    /// Get account code by its hash
    fn code_by_hash_mut(&mut self, code_hash: B256) -> Result<Bytecode, Self::Error>;

    /// Get storage value of address at index.
    fn storage_mut(&mut self, address: Address, index: U256) -> Result<U256, Self::Error>;
}

type BoxedAccountModifierFn = Box<dyn Fn(&mut U256, &mut u64, &mut Option<Bytecode>) + Send>;

/// Debuggable function type for modifying account information.
pub struct AccountModifierFn {
    inner: BoxedAccountModifierFn,
}

impl AccountModifierFn {
    /// Constructs an [`AccountModifierFn`] from the provided function.
    pub fn new(func: BoxedAccountModifierFn) -> Self {
        Self { inner: func }
    }
}

impl Debug for AccountModifierFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            std::any::type_name::<dyn Fn(&mut U256, &mut u64, &mut Option<Bytecode>)>()
        )
    }
}

impl Deref for AccountModifierFn {
    type Target = dyn Fn(&mut U256, &mut u64, &mut Option<Bytecode>);

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

/// Trait for states that journal their changes and can be rolled back to
/// earlier checkpoints.
#[auto_impl(&mut, Box)]
pub trait StateCheckpoint {
    /// The state's error type.
    type Error;

    /// Takes a checkpoint of the current state and returns its id.
    ///
    /// Changes made after this call are attributed to ids greater than the
    /// returned id.
    fn checkpoint(&mut self) -> CheckpointId;

    /// Returns the id that changes made right now are attributed to.
    fn current_checkpoint_id(&self) -> CheckpointId;

    /// Reverts all changes made since the checkpoint with the provided id was
    /// taken. Checkpoints taken after it are discarded.
    fn revert_to_checkpoint(&mut self, checkpoint: CheckpointId) -> Result<(), Self::Error>;
}

/// The contract of a local base store: the state that holds materialized
/// accounts and storage slots.
///
/// Absence of an account or slot means that it has not been resolved yet,
/// not that it doesn't exist.
pub trait LocalState: StateCheckpoint {
    /// Retrieves the local account record, including its code, if it exists.
    fn account(&self, address: Address) -> Result<Option<AccountInfo>, Self::Error>;

    /// Creates a local account record. Fails if a record already exists.
    fn create_account(
        &mut self,
        address: Address,
        account_info: AccountInfo,
    ) -> Result<(), Self::Error>;

    /// Modifies an existing local account record using the provided function.
    ///
    /// Returns the modified account.
    fn modify_account(
        &mut self,
        address: Address,
        modifier: AccountModifierFn,
    ) -> Result<AccountInfo, Self::Error>;

    /// Retrieves the code corresponding to the provided hash.
    fn code_by_hash(&self, code_hash: B256) -> Result<Bytecode, Self::Error>;

    /// Retrieves the present value of a local storage slot, if it has been
    /// resolved.
    fn storage_slot(&self, address: Address, index: U256) -> Option<U256>;

    /// Retrieves the value of a local storage slot as of the start of the
    /// current transaction, if it has been resolved.
    fn committed_storage_slot(&self, address: Address, index: U256) -> Option<U256>;

    /// Sets the present value of a storage slot of an existing account.
    ///
    /// Returns the previous present value.
    fn set_storage_slot(
        &mut self,
        address: Address,
        index: U256,
        value: U256,
    ) -> Result<U256, Self::Error>;

    /// Materializes a storage slot of an existing account with a value that
    /// was valid at the start of the transaction, setting both its present
    /// and committed values.
    fn insert_imported_slot(
        &mut self,
        address: Address,
        index: U256,
        value: U256,
    ) -> Result<(), Self::Error>;

    /// Whether the local account record has self-destructed.
    fn is_self_destructed(&self, address: Address) -> bool;

    /// Marks the local account record as self-destructed.
    fn self_destruct(&mut self, address: Address) -> Result<(), Self::Error>;

    /// Marks the end of a transaction: committed storage values become equal
    /// to the present values.
    fn finalize(&mut self);

    /// Computes the state root of the local records.
    fn state_root(&self) -> B256;
}

// Forwarding impls for `&mut T` and `Box<T>`, equivalent to
// `#[auto_impl(&mut, Box)]`. Written by hand because auto_impl adds a
// `Self: StateCheckpoint` bound that prevents `Self::Error` from normalizing
// to `T::Error`.
macro_rules! forward_local_state {
    ($($ty:ty),*) => {$(
        impl<T: LocalState + ?Sized> LocalState for $ty {
            fn account(&self, address: Address) -> Result<Option<AccountInfo>, Self::Error> {
                T::account(self, address)
            }

            fn create_account(
                &mut self,
                address: Address,
                account_info: AccountInfo,
            ) -> Result<(), Self::Error> {
                T::create_account(self, address, account_info)
            }

            fn modify_account(
                &mut self,
                address: Address,
                modifier: AccountModifierFn,
            ) -> Result<AccountInfo, Self::Error> {
                T::modify_account(self, address, modifier)
            }

            fn code_by_hash(&self, code_hash: B256) -> Result<Bytecode, Self::Error> {
                T::code_by_hash(self, code_hash)
            }

            fn storage_slot(&self, address: Address, index: U256) -> Option<U256> {
                T::storage_slot(self, address, index)
            }

            fn committed_storage_slot(&self, address: Address, index: U256) -> Option<U256> {
                T::committed_storage_slot(self, address, index)
            }

            fn set_storage_slot(
                &mut self,
                address: Address,
                index: U256,
                value: U256,
            ) -> Result<U256, Self::Error> {
                T::set_storage_slot(self, address, index, value)
            }

            fn insert_imported_slot(
                &mut self,
                address: Address,
                index: U256,
                value: U256,
            ) -> Result<(), Self::Error> {
                T::insert_imported_slot(self, address, index, value)
            }

            fn is_self_destructed(&self, address: Address) -> bool {
                T::is_self_destructed(self, address)
            }

            fn self_destruct(&mut self, address: Address) -> Result<(), Self::Error> {
                T::self_destruct(self, address)
            }

            fn finalize(&mut self) {
                T::finalize(self);
            }

            fn state_root(&self) -> B256 {
                T::state_root(self)
            }
        }
    )*};
}

forward_local_state!(&mut T, Box<T>);

/// The read/write state surface an EVM execution engine drives.
///
/// Implementations are interchangeable wherever the engine expects a generic
/// state backend.
pub trait StateBackend: StateCheckpoint {
    /// Whether an account exists at the provided address.
    fn exists(&mut self, address: Address) -> Result<bool, Self::Error>;

    /// Whether the account has zero balance, zero nonce, and no code.
    fn is_empty(&mut self, address: Address) -> Result<bool, Self::Error>;

    /// Retrieves the balance of the account.
    fn balance(&mut self, address: Address) -> Result<U256, Self::Error>;

    /// Retrieves the nonce of the account.
    fn nonce(&mut self, address: Address) -> Result<u64, Self::Error>;

    /// Retrieves the code of the account.
    fn code(&mut self, address: Address) -> Result<Bytecode, Self::Error>;

    /// Retrieves the size of the account's code in bytes.
    fn code_size(&mut self, address: Address) -> Result<usize, Self::Error>;

    /// Retrieves the hash of the account's code.
    fn code_hash(&mut self, address: Address) -> Result<B256, Self::Error>;

    /// Retrieves the present value of a storage slot.
    fn storage(&mut self, address: Address, index: U256) -> Result<U256, Self::Error>;

    /// Retrieves the value of a storage slot as of the start of the current
    /// transaction.
    fn committed_storage(&mut self, address: Address, index: U256) -> Result<U256, Self::Error>;

    /// Whether the account has self-destructed.
    fn has_self_destructed(&self, address: Address) -> Result<bool, Self::Error>;

    /// Adds the amount to the account's balance.
    fn add_balance(&mut self, address: Address, amount: U256) -> Result<(), Self::Error>;

    /// Subtracts the amount from the account's balance.
    fn sub_balance(&mut self, address: Address, amount: U256) -> Result<(), Self::Error>;

    /// Sets the account's balance.
    fn set_balance(&mut self, address: Address, balance: U256) -> Result<(), Self::Error>;

    /// Sets the account's nonce.
    fn set_nonce(&mut self, address: Address, nonce: u64) -> Result<(), Self::Error>;

    /// Sets the account's code.
    fn set_code(&mut self, address: Address, code: Bytecode) -> Result<(), Self::Error>;

    /// Sets the present value of a storage slot.
    fn set_storage(&mut self, address: Address, index: U256, value: U256)
    -> Result<(), Self::Error>;

    /// Marks the end of a transaction.
    fn finalize(&mut self);
}

/// Calculates the state root hash of the provided state.
pub fn state_root<'a, I>(state: I) -> B256
where
    I: IntoIterator<Item = (&'a Address, &'a BasicAccount)>,
{
    sec_trie_root(state.into_iter().map(|(address, account)| {
        let account = alloy_rlp::encode(account);
        (address, account)
    }))
}

/// Calculates the storage root hash of the provided storage. Zero-valued
/// slots are not part of the trie.
pub fn storage_root<'a, I>(storage: I) -> B256
where
    I: IntoIterator<Item = (&'a U256, &'a U256)>,
{
    sec_trie_root(
        storage
            .into_iter()
            .filter(|(_index, value)| !value.is_zero())
            .map(|(index, value)| {
                let value = alloy_rlp::encode(value);
                (index.to_be_bytes::<32>(), value)
            }),
    )
}
