//! Account world state: the handle block import snapshots, tracks, and commits.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use unityd_consensus::money::Amount;
use unityd_consensus::{Address, Hash256};
use unityd_primitives::block::BlockHeader;
use unityd_primitives::encoding::{DecodeError, Decoder, Encoder};
use unityd_primitives::hash::sha256d;
use unityd_storage::{Column, KeyValueStore, WriteBatch};

use crate::error::StateError;

const META_STATE_HEAD_KEY: &[u8] = b"state_head";

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Account {
    pub nonce: u64,
    pub balance: Amount,
}

/// Read-write access to account nonces and balances.
pub trait AccountState {
    fn account(&self, address: &Address) -> Result<Account, StateError>;
    fn set_account(&mut self, address: &Address, account: Account) -> Result<(), StateError>;

    fn nonce(&self, address: &Address) -> Result<u64, StateError> {
        Ok(self.account(address)?.nonce)
    }

    fn balance(&self, address: &Address) -> Result<Amount, StateError> {
        Ok(self.account(address)?.balance)
    }

    fn increment_nonce(&mut self, address: &Address) -> Result<(), StateError> {
        let mut account = self.account(address)?;
        account.nonce = account.nonce.checked_add(1).ok_or(StateError::Overflow)?;
        self.set_account(address, account)
    }

    fn add_balance(&mut self, address: &Address, amount: Amount) -> Result<(), StateError> {
        let mut account = self.account(address)?;
        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or(StateError::Overflow)?;
        self.set_account(address, account)
    }

    fn sub_balance(&mut self, address: &Address, amount: Amount) -> Result<(), StateError> {
        let mut account = self.account(address)?;
        account.balance = account
            .balance
            .checked_sub(amount)
            .ok_or(StateError::Overflow)?;
        self.set_account(address, account)
    }
}

/// The repository chain selection executes blocks against.
///
/// A root identifies a complete account snapshot. Changes made through a
/// [`StateTrack`] become a new root when the track is flushed; [`WorldState::flush`]
/// makes pending roots durable.
pub trait WorldState: AccountState + Send {
    fn root(&self) -> Hash256;
    fn flush(&mut self) -> Result<(), StateError>;
    /// Points the handle at an existing root.
    fn set_root(&mut self, root: &Hash256) -> Result<(), StateError>;
    /// Makes pending roots durable, then points the handle at `root`.
    fn sync_to_root(&mut self, root: &Hash256) -> Result<(), StateError>;
    fn is_valid_root(&self, root: &Hash256) -> Result<bool, StateError>;
    /// Independent handle positioned at `root`, sharing the backing storage.
    fn snapshot_to(&self, root: &Hash256) -> Result<Box<dyn WorldState>, StateError>;
    /// Records that the current root is the post-state of `header`.
    fn commit_block(&mut self, header: &BlockHeader) -> Result<(), StateError>;
    fn is_snapshot(&self) -> bool;
    /// Points the handle at the empty state, discarding nothing that was stored.
    fn reset_to_empty(&mut self);
    fn apply_changes(&mut self, changes: BTreeMap<Address, Account>) -> Result<(), StateError>;
}

/// Buffered changes over a world state. Nothing reaches the state until [`StateTrack::flush`].
pub struct StateTrack<'a> {
    state: &'a mut dyn WorldState,
    changes: BTreeMap<Address, Account>,
}

impl<'a> StateTrack<'a> {
    pub fn new(state: &'a mut dyn WorldState) -> Self {
        Self {
            state,
            changes: BTreeMap::new(),
        }
    }

    pub fn flush(self) -> Result<(), StateError> {
        if self.changes.is_empty() {
            return Ok(());
        }
        self.state.apply_changes(self.changes)
    }

    pub fn rollback(self) {}
}

impl AccountState for StateTrack<'_> {
    fn account(&self, address: &Address) -> Result<Account, StateError> {
        match self.changes.get(address) {
            Some(account) => Ok(*account),
            None => self.state.account(address),
        }
    }

    fn set_account(&mut self, address: &Address, account: Account) -> Result<(), StateError> {
        self.changes.insert(*address, account);
        Ok(())
    }
}

/// Account snapshots stored whole per root in [`Column::WorldState`].
pub struct KvWorldState<S> {
    store: Arc<S>,
    accounts: BTreeMap<Address, Account>,
    root: Hash256,
    pending: HashMap<Hash256, Vec<u8>>,
    snapshot: bool,
}

impl<S: KeyValueStore + 'static> KvWorldState<S> {
    /// Opens at the last committed root, or at the empty state for a fresh store.
    pub fn open(store: Arc<S>) -> Result<Self, StateError> {
        let mut state = Self {
            store,
            accounts: BTreeMap::new(),
            root: empty_root(),
            pending: HashMap::new(),
            snapshot: false,
        };
        if let Some(bytes) = state.store.get(Column::Meta, META_STATE_HEAD_KEY)? {
            let head: Hash256 = bytes
                .as_slice()
                .try_into()
                .map_err(|_| StateError::Decode(DecodeError::InvalidData("state head")))?;
            if state.is_valid_root(&head)? {
                state.set_root(&head)?;
            } else {
                unityd_log::log_warn!(
                    "Committed state root {} is not available",
                    unityd_primitives::hex::hash256_to_hex(&head)
                );
            }
        }
        Ok(state)
    }

    /// Last committed `(block hash, state root)` at `number`.
    pub fn committed_at(&self, number: u64) -> Result<Option<(Hash256, Hash256)>, StateError> {
        let bytes = match self.store.get(Column::StateJournal, &number.to_be_bytes())? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let mut decoder = Decoder::new(&bytes);
        let hash = decoder.read_hash()?;
        let root = decoder.read_hash()?;
        Ok(Some((hash, root)))
    }

    /// Removes a stored root so it no longer validates. Only repair tooling should need this.
    pub fn forget_root(&mut self, root: &Hash256) -> Result<(), StateError> {
        self.pending.remove(root);
        self.store.delete(Column::WorldState, root)?;
        Ok(())
    }

    fn load(&self, root: &Hash256) -> Result<Option<BTreeMap<Address, Account>>, StateError> {
        if let Some(bytes) = self.pending.get(root) {
            return Ok(Some(decode_accounts(bytes)?));
        }
        match self.store.get(Column::WorldState, root)? {
            Some(bytes) => Ok(Some(decode_accounts(&bytes)?)),
            None if *root == empty_root() => Ok(Some(BTreeMap::new())),
            None => Ok(None),
        }
    }
}

impl<S: KeyValueStore + 'static> AccountState for KvWorldState<S> {
    fn account(&self, address: &Address) -> Result<Account, StateError> {
        Ok(self.accounts.get(address).copied().unwrap_or_default())
    }

    fn set_account(&mut self, address: &Address, account: Account) -> Result<(), StateError> {
        let mut changes = BTreeMap::new();
        changes.insert(*address, account);
        self.apply_changes(changes)
    }
}

impl<S: KeyValueStore + 'static> WorldState for KvWorldState<S> {
    fn root(&self) -> Hash256 {
        self.root
    }

    fn flush(&mut self) -> Result<(), StateError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut batch = WriteBatch::new();
        for (root, bytes) in self.pending.drain() {
            batch.put(Column::WorldState, root, bytes);
        }
        self.store.write_batch(&batch)?;
        Ok(())
    }

    fn set_root(&mut self, root: &Hash256) -> Result<(), StateError> {
        let accounts = self.load(root)?.ok_or(StateError::MissingRoot(*root))?;
        self.accounts = accounts;
        self.root = *root;
        Ok(())
    }

    fn sync_to_root(&mut self, root: &Hash256) -> Result<(), StateError> {
        self.flush()?;
        self.set_root(root)
    }

    fn is_valid_root(&self, root: &Hash256) -> Result<bool, StateError> {
        Ok(*root == empty_root()
            || self.pending.contains_key(root)
            || self.store.contains(Column::WorldState, root)?)
    }

    fn snapshot_to(&self, root: &Hash256) -> Result<Box<dyn WorldState>, StateError> {
        let accounts = self.load(root)?.ok_or(StateError::MissingRoot(*root))?;
        let mut pending = HashMap::new();
        if let Some(bytes) = self.pending.get(root) {
            pending.insert(*root, bytes.clone());
        }
        Ok(Box::new(KvWorldState {
            store: Arc::clone(&self.store),
            accounts,
            root: *root,
            pending,
            snapshot: true,
        }))
    }

    fn commit_block(&mut self, header: &BlockHeader) -> Result<(), StateError> {
        self.flush()?;
        let mut encoder = Encoder::new();
        encoder.write_hash(&header.hash());
        encoder.write_hash(&self.root);
        let mut batch = WriteBatch::new();
        batch.put(
            Column::StateJournal,
            header.number.to_be_bytes(),
            encoder.into_inner(),
        );
        batch.put(Column::Meta, META_STATE_HEAD_KEY, self.root);
        self.store.write_batch(&batch)?;
        Ok(())
    }

    fn is_snapshot(&self) -> bool {
        self.snapshot
    }

    fn reset_to_empty(&mut self) {
        self.accounts.clear();
        self.root = empty_root();
    }

    fn apply_changes(&mut self, changes: BTreeMap<Address, Account>) -> Result<(), StateError> {
        for (address, account) in changes {
            if account == Account::default() {
                self.accounts.remove(&address);
            } else {
                self.accounts.insert(address, account);
            }
        }
        let bytes = encode_accounts(&self.accounts);
        let root = sha256d(&bytes);
        self.pending.insert(root, bytes);
        self.root = root;
        Ok(())
    }
}

pub fn empty_root() -> Hash256 {
    sha256d(&encode_accounts(&BTreeMap::new()))
}

fn encode_accounts(accounts: &BTreeMap<Address, Account>) -> Vec<u8> {
    let mut encoder = Encoder::new();
    encoder.write_varint(accounts.len() as u64);
    for (address, account) in accounts {
        encoder.write_address(address);
        encoder.write_u64_le(account.nonce);
        encoder.write_u128_le(account.balance);
    }
    encoder.into_inner()
}

fn decode_accounts(bytes: &[u8]) -> Result<BTreeMap<Address, Account>, DecodeError> {
    let mut decoder = Decoder::new(bytes);
    let count = decoder.read_varint()?;
    let mut accounts = BTreeMap::new();
    for _ in 0..count {
        let address = decoder.read_address()?;
        let nonce = decoder.read_u64_le()?;
        let balance = decoder.read_u128_le()?;
        accounts.insert(address, Account { nonce, balance });
    }
    if !decoder.is_empty() {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(accounts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use unityd_storage::memory::MemoryStore;

    #[test]
    fn tracked_changes_apply_only_on_flush() {
        let store = Arc::new(MemoryStore::new());
        let mut state = KvWorldState::open(store).expect("open");
        let empty = state.root();
        let alice = [1u8; 20];

        let mut track = StateTrack::new(&mut state);
        track.add_balance(&alice, 50).expect("credit");
        assert_eq!(track.balance(&alice).expect("balance"), 50);
        track.rollback();
        assert_eq!(state.root(), empty);
        assert_eq!(state.balance(&alice).expect("balance"), 0);

        let mut track = StateTrack::new(&mut state);
        track.add_balance(&alice, 50).expect("credit");
        track.increment_nonce(&alice).expect("nonce");
        track.flush().expect("flush track");
        assert_ne!(state.root(), empty);
        assert_eq!(state.nonce(&alice).expect("nonce"), 1);
    }

    #[test]
    fn snapshots_share_storage_but_not_position() {
        let store = Arc::new(MemoryStore::new());
        let mut state = KvWorldState::open(Arc::clone(&store)).expect("open");
        let alice = [2u8; 20];
        state.add_balance(&alice, 10).expect("credit");
        let first = state.root();
        state.add_balance(&alice, 5).expect("credit");
        let second = state.root();
        state.flush().expect("flush");

        let mut snapshot = state.snapshot_to(&first).expect("snapshot");
        assert!(snapshot.is_snapshot());
        assert_eq!(snapshot.balance(&alice).expect("balance"), 10);
        snapshot.add_balance(&alice, 1).expect("credit");
        assert_eq!(state.root(), second);

        let reopened = KvWorldState::open(store).expect("reopen");
        assert!(reopened.is_valid_root(&first).expect("first"));
        assert!(reopened.is_valid_root(&second).expect("second"));
        assert!(!reopened.is_valid_root(&snapshot.root()).expect("unflushed"));
    }
}
