//! A local base store built on persistent data structures, so that taking a
//! checkpoint is a constant-time structural clone.

mod account;

use forkdb_primitives::{Address, Bytecode, B256, KECCAK_EMPTY, U256};
use forkdb_state_api::{
    account::{empty_account_info, AccountInfo, BasicAccount},
    state_root, AccountModifierFn, CheckpointId, LocalState, State, StateBackend,
    StateCheckpoint, StateError,
};
use rpds::HashTrieMapSync;

use crate::account::{LocalAccount, StorageSlot};

#[derive(Clone, Debug)]
struct StateLayer {
    accounts: HashTrieMapSync<Address, LocalAccount>,
    contracts: HashTrieMapSync<B256, Bytecode>,
}

impl Default for StateLayer {
    fn default() -> Self {
        let mut contracts = HashTrieMapSync::new_sync();
        contracts.insert_mut(KECCAK_EMPTY, Bytecode::new());

        Self {
            accounts: HashTrieMapSync::new_sync(),
            contracts,
        }
    }
}

/// A journaled state that keeps every checkpoint as a structurally shared
/// copy of its accounts and code.
#[derive(Clone, Debug, Default)]
pub struct PersistentState {
    layer: StateLayer,
    checkpoints: Vec<(CheckpointId, StateLayer)>,
    next_checkpoint_id: CheckpointId,
}

impl PersistentState {
    /// Inserts the provided bytecode using its hash, potentially overwriting an
    /// existing value.
    fn insert_code(&mut self, code_hash: B256, code: Bytecode) {
        debug_assert_eq!(code_hash, code.hash_slow());

        self.layer.contracts.insert_mut(code_hash, code);
    }

    fn local_account_mut(&mut self, address: &Address) -> Result<&mut LocalAccount, StateError> {
        self.layer
            .accounts
            .get_mut(address)
            .ok_or(StateError::MissingAccount(*address))
    }

    /// Ensures that a local record exists, creating an empty one if needed.
    fn ensure_account(&mut self, address: Address) -> Result<(), StateError> {
        if !self.layer.accounts.contains_key(&address) {
            self.create_account(address, empty_account_info())?;
        }

        Ok(())
    }

    /// Returns the number of checkpoints that can still be reverted to.
    pub fn checkpoint_depth(&self) -> usize {
        self.checkpoints.len()
    }
}

impl StateCheckpoint for PersistentState {
    type Error = StateError;

    fn checkpoint(&mut self) -> CheckpointId {
        let checkpoint = self.next_checkpoint_id;
        self.next_checkpoint_id += 1;

        self.checkpoints.push((checkpoint, self.layer.clone()));

        checkpoint
    }

    fn current_checkpoint_id(&self) -> CheckpointId {
        self.next_checkpoint_id
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    fn revert_to_checkpoint(&mut self, checkpoint: CheckpointId) -> Result<(), Self::Error> {
        let position = self
            .checkpoints
            .iter()
            .rposition(|(id, _layer)| *id == checkpoint)
            .ok_or(StateError::InvalidCheckpoint(checkpoint))?;

        let mut discarded = self.checkpoints.split_off(position);
        let (_id, layer) = discarded.swap_remove(0);
        self.layer = layer;

        Ok(())
    }
}

impl LocalState for PersistentState {
    fn account(&self, address: Address) -> Result<Option<AccountInfo>, Self::Error> {
        self.layer
            .accounts
            .get(&address)
            .map(|account| {
                let code = LocalState::code_by_hash(self, account.code_hash)?;
                Ok(account.info(Some(code)))
            })
            .transpose()
    }

    fn create_account(
        &mut self,
        address: Address,
        mut account_info: AccountInfo,
    ) -> Result<(), Self::Error> {
        if self.layer.accounts.contains_key(&address) {
            return Err(StateError::AccountExists(address));
        }

        if let Some(code) = account_info.code.take() {
            self.insert_code(account_info.code_hash, code);
        }

        self.layer
            .accounts
            .insert_mut(address, LocalAccount::new(&account_info));

        Ok(())
    }

    fn modify_account(
        &mut self,
        address: Address,
        modifier: AccountModifierFn,
    ) -> Result<AccountInfo, Self::Error> {
        let code_hash = self.local_account_mut(&address)?.code_hash;
        let mut code = Some(LocalState::code_by_hash(self, code_hash)?);

        let account = self.local_account_mut(&address)?;
        let mut balance = account.balance;
        let mut nonce = account.nonce;

        modifier(&mut balance, &mut nonce, &mut code);

        let new_code_hash = code.as_ref().map_or(KECCAK_EMPTY, Bytecode::hash_slow);

        account.balance = balance;
        account.nonce = nonce;
        account.code_hash = new_code_hash;
        let account_info = account.info(code.clone());

        if new_code_hash != code_hash {
            if let Some(code) = code {
                self.insert_code(new_code_hash, code);
            }
        }

        Ok(account_info)
    }

    fn code_by_hash(&self, code_hash: B256) -> Result<Bytecode, Self::Error> {
        self.layer
            .contracts
            .get(&code_hash)
            .cloned()
            .ok_or(StateError::InvalidCodeHash(code_hash))
    }

    fn storage_slot(&self, address: Address, index: U256) -> Option<U256> {
        self.layer
            .accounts
            .get(&address)
            .and_then(|account| account.storage.get(&index))
            .map(|slot| slot.present)
    }

    fn committed_storage_slot(&self, address: Address, index: U256) -> Option<U256> {
        self.layer
            .accounts
            .get(&address)
            .and_then(|account| account.storage.get(&index))
            .map(|slot| slot.original)
    }

    fn set_storage_slot(
        &mut self,
        address: Address,
        index: U256,
        value: U256,
    ) -> Result<U256, Self::Error> {
        let account = self.local_account_mut(&address)?;

        let mut slot = account.storage.get(&index).copied().unwrap_or_default();
        let old_value = slot.present;
        slot.present = value;

        account.storage.insert_mut(index, slot);

        Ok(old_value)
    }

    fn insert_imported_slot(
        &mut self,
        address: Address,
        index: U256,
        value: U256,
    ) -> Result<(), Self::Error> {
        let account = self.local_account_mut(&address)?;
        account.storage.insert_mut(index, StorageSlot::imported(value));

        Ok(())
    }

    fn is_self_destructed(&self, address: Address) -> bool {
        self.layer
            .accounts
            .get(&address)
            .is_some_and(|account| account.self_destructed)
    }

    fn self_destruct(&mut self, address: Address) -> Result<(), Self::Error> {
        self.local_account_mut(&address)?.self_destructed = true;

        Ok(())
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    fn finalize(&mut self) {
        let destructed: Vec<Address> = self
            .layer
            .accounts
            .iter()
            .filter(|(_address, account)| account.self_destructed)
            .map(|(address, _account)| *address)
            .collect();

        for address in destructed {
            self.layer.accounts.remove_mut(&address);
        }

        let addresses: Vec<Address> = self.layer.accounts.keys().copied().collect();
        for address in addresses {
            if let Some(account) = self.layer.accounts.get_mut(&address) {
                let storage: Vec<(U256, StorageSlot)> = account
                    .storage
                    .iter()
                    .filter(|(_index, slot)| slot.original != slot.present)
                    .map(|(index, slot)| (*index, *slot))
                    .collect();

                for (index, slot) in storage {
                    account
                        .storage
                        .insert_mut(index, StorageSlot::imported(slot.present));
                }
            }
        }
    }

    fn state_root(&self) -> B256 {
        let accounts: Vec<(Address, BasicAccount)> = self
            .layer
            .accounts
            .iter()
            .map(|(address, account)| (*address, account.to_basic_account()))
            .collect();

        state_root(accounts.iter().map(|(address, account)| (address, account)))
    }
}

impl State for PersistentState {
    type Error = StateError;

    fn basic(&self, address: Address) -> Result<Option<AccountInfo>, Self::Error> {
        self.account(address)
    }

    fn code_by_hash(&self, code_hash: B256) -> Result<Bytecode, Self::Error> {
        LocalState::code_by_hash(self, code_hash)
    }

    fn storage(&self, address: Address, index: U256) -> Result<U256, Self::Error> {
        Ok(self.storage_slot(address, index).unwrap_or(U256::ZERO))
    }
}

/// A plain, non-forked state backend: unresolved accounts and slots are
/// treated as non-existent and zero.
impl StateBackend for PersistentState {
    fn exists(&mut self, address: Address) -> Result<bool, Self::Error> {
        Ok(self.layer.accounts.contains_key(&address))
    }

    fn is_empty(&mut self, address: Address) -> Result<bool, Self::Error> {
        Ok(self
            .account(address)?
            .is_none_or(|account_info| account_info.is_empty()))
    }

    fn balance(&mut self, address: Address) -> Result<U256, Self::Error> {
        Ok(self
            .layer
            .accounts
            .get(&address)
            .map_or(U256::ZERO, |account| account.balance))
    }

    fn nonce(&mut self, address: Address) -> Result<u64, Self::Error> {
        Ok(self
            .layer
            .accounts
            .get(&address)
            .map_or(0, |account| account.nonce))
    }

    fn code(&mut self, address: Address) -> Result<Bytecode, Self::Error> {
        let code_hash = self.code_hash(address)?;
        LocalState::code_by_hash(self, code_hash)
    }

    fn code_size(&mut self, address: Address) -> Result<usize, Self::Error> {
        Ok(self.code(address)?.len())
    }

    fn code_hash(&mut self, address: Address) -> Result<B256, Self::Error> {
        Ok(self
            .layer
            .accounts
            .get(&address)
            .map_or(KECCAK_EMPTY, |account| account.code_hash))
    }

    fn storage(&mut self, address: Address, index: U256) -> Result<U256, Self::Error> {
        Ok(self.storage_slot(address, index).unwrap_or(U256::ZERO))
    }

    fn committed_storage(&mut self, address: Address, index: U256) -> Result<U256, Self::Error> {
        Ok(self
            .committed_storage_slot(address, index)
            .unwrap_or(U256::ZERO))
    }

    fn has_self_destructed(&self, address: Address) -> Result<bool, Self::Error> {
        Ok(self.is_self_destructed(address))
    }

    fn add_balance(&mut self, address: Address, amount: U256) -> Result<(), Self::Error> {
        self.ensure_account(address)?;
        let account = self.local_account_mut(&address)?;
        account.balance = account.balance.wrapping_add(amount);

        Ok(())
    }

    fn sub_balance(&mut self, address: Address, amount: U256) -> Result<(), Self::Error> {
        self.ensure_account(address)?;
        let account = self.local_account_mut(&address)?;
        account.balance = account.balance.wrapping_sub(amount);

        Ok(())
    }

    fn set_balance(&mut self, address: Address, balance: U256) -> Result<(), Self::Error> {
        self.ensure_account(address)?;
        self.local_account_mut(&address)?.balance = balance;

        Ok(())
    }

    fn set_nonce(&mut self, address: Address, nonce: u64) -> Result<(), Self::Error> {
        self.ensure_account(address)?;
        self.local_account_mut(&address)?.nonce = nonce;

        Ok(())
    }

    fn set_code(&mut self, address: Address, code: Bytecode) -> Result<(), Self::Error> {
        self.ensure_account(address)?;
        self.modify_account(
            address,
            AccountModifierFn::new(Box::new(move |_balance, _nonce, account_code| {
                *account_code = Some(code.clone());
            })),
        )?;

        Ok(())
    }

    fn set_storage(
        &mut self,
        address: Address,
        index: U256,
        value: U256,
    ) -> Result<(), Self::Error> {
        self.ensure_account(address)?;
        self.set_storage_slot(address, index, value)?;

        Ok(())
    }

    fn finalize(&mut self) {
        LocalState::finalize(self);
    }
}
