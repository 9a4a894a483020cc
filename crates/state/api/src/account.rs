//! Ethereum account types

use alloy_rlp::{RlpDecodable, RlpEncodable};
use forkdb_primitives::{B256, KECCAK_EMPTY, KECCAK_NULL_RLP, U256};
pub use revm_state::AccountInfo;

/// Basic account type, as it is stored in the state trie.
#[derive(Clone, Debug, PartialEq, Eq, RlpDecodable, RlpEncodable)]
pub struct BasicAccount {
    /// Nonce of the account.
    pub nonce: u64,
    /// Balance of the account.
    pub balance: U256,
    /// Storage root of the account.
    pub storage_root: B256,
    /// Code hash of the account.
    pub code_hash: B256,
}

impl Default for BasicAccount {
    fn default() -> Self {
        BasicAccount {
            balance: U256::ZERO,
            nonce: 0,
            code_hash: KECCAK_EMPTY,
            storage_root: KECCAK_NULL_RLP,
        }
    }
}

impl From<(&AccountInfo, B256)> for BasicAccount {
    fn from((account_info, storage_root): (&AccountInfo, B256)) -> Self {
        Self {
            nonce: account_info.nonce,
            balance: account_info.balance,
            storage_root,
            code_hash: account_info.code_hash,
        }
    }
}

/// Constructs an account without balance, nonce, or code.
pub fn empty_account_info() -> AccountInfo {
    AccountInfo {
        balance: U256::ZERO,
        nonce: 0,
        code_hash: KECCAK_EMPTY,
        code: None,
    }
}
