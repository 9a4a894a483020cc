use forkdb_primitives::{Bytecode, B256, U256};
use forkdb_state_api::{
    account::{AccountInfo, BasicAccount},
    storage_root,
};
use rpds::HashTrieMapSync;

/// A storage slot's value at the start of the transaction and its present
/// value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct StorageSlot {
    pub original: U256,
    pub present: U256,
}

impl StorageSlot {
    /// Constructs a slot whose present value equals its original value.
    pub fn imported(value: U256) -> Self {
        Self {
            original: value,
            present: value,
        }
    }
}

/// A materialized account and its resolved storage slots.
#[derive(Clone, Debug)]
pub(crate) struct LocalAccount {
    pub balance: U256,
    pub nonce: u64,
    pub code_hash: B256,
    pub storage: HashTrieMapSync<U256, StorageSlot>,
    pub self_destructed: bool,
}

impl LocalAccount {
    pub fn new(account_info: &AccountInfo) -> Self {
        Self {
            balance: account_info.balance,
            nonce: account_info.nonce,
            code_hash: account_info.code_hash,
            storage: HashTrieMapSync::new_sync(),
            self_destructed: false,
        }
    }

    pub fn info(&self, code: Option<Bytecode>) -> AccountInfo {
        AccountInfo {
            balance: self.balance,
            nonce: self.nonce,
            code_hash: self.code_hash,
            code,
        }
    }

    /// Converts the account into its trie representation.
    pub fn to_basic_account(&self) -> BasicAccount {
        let storage: Vec<(U256, U256)> = self
            .storage
            .iter()
            .map(|(index, slot)| (*index, slot.present))
            .collect();

        BasicAccount {
            nonce: self.nonce,
            balance: self.balance,
            storage_root: storage_root(storage.iter().map(|(index, value)| (index, value))),
            code_hash: self.code_hash,
        }
    }
}
