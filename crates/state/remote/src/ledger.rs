use forkdb_primitives::{hash_map::Entry, Address, HashMap, U256};
use forkdb_state_api::CheckpointId;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum LedgerKey {
    Account(Address),
    Slot(Address, U256),
    DeployedContract(Address),
}

/// Book-keeping of the keys that were imported from or written over the remote
/// state since the last revert that affected them.
///
/// Every mark is attributed to the checkpoint that was current when it was
/// set. Re-marking a key keeps the earliest attribution. Reverting to a
/// checkpoint removes all marks attributed to later checkpoints.
#[derive(Clone, Debug, Default)]
pub struct ImportLedger {
    marks: HashMap<LedgerKey, CheckpointId>,
    /// Marks in order of non-decreasing checkpoint id
    journal: Vec<(CheckpointId, LedgerKey)>,
}

impl ImportLedger {
    /// Whether the account was imported in the current epoch.
    pub fn is_account_dirty(&self, address: &Address) -> bool {
        self.marks.contains_key(&LedgerKey::Account(*address))
    }

    /// Whether the storage slot was imported or written in the current epoch.
    pub fn is_slot_dirty(&self, address: &Address, index: &U256) -> bool {
        self.marks.contains_key(&LedgerKey::Slot(*address, *index))
    }

    /// Whether a contract was deployed at the address in the current epoch.
    pub fn is_contract_deployed(&self, address: &Address) -> bool {
        self.marks
            .contains_key(&LedgerKey::DeployedContract(*address))
    }

    /// Marks the account as imported.
    pub fn mark_account(&mut self, address: Address, checkpoint: CheckpointId) {
        self.mark(LedgerKey::Account(address), checkpoint);
    }

    /// Marks the storage slot as imported or written.
    pub fn mark_slot(&mut self, address: Address, index: U256, checkpoint: CheckpointId) {
        self.mark(LedgerKey::Slot(address, index), checkpoint);
    }

    /// Marks that a contract was deployed at the address.
    pub fn mark_contract_deployed(&mut self, address: Address, checkpoint: CheckpointId) {
        self.mark(LedgerKey::DeployedContract(address), checkpoint);
    }

    /// Removes all marks attributed to checkpoints after the provided one.
    ///
    /// Returns the number of removed marks.
    pub fn revert_to(&mut self, checkpoint: CheckpointId) -> usize {
        let retained = self
            .journal
            .partition_point(|(marked_at, _key)| *marked_at <= checkpoint);

        let removed = self.journal.split_off(retained);
        for (_marked_at, key) in &removed {
            self.marks.remove(key);
        }

        removed.len()
    }

    /// Returns the number of active marks.
    pub fn len(&self) -> usize {
        self.marks.len()
    }

    /// Whether there are no active marks.
    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    fn mark(&mut self, key: LedgerKey, checkpoint: CheckpointId) {
        if let Entry::Vacant(entry) = self.marks.entry(key.clone()) {
            entry.insert(checkpoint);

            // Checkpoint ids never decrease, so this is an append in practice.
            let position = self
                .journal
                .partition_point(|(marked_at, _key)| *marked_at <= checkpoint);
            self.journal.insert(position, (checkpoint, key));
        }
    }
}
