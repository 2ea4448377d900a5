//! Concurrent account directory.
//!
//! Maps account ids to live accounts. Storage is a slot array starting at
//! capacity 128 and grown by doubling; the set of live entries is guarded by
//! a directory-level writer-preferring lock, and each account additionally
//! carries its own lock.
//!
//! # Lock nesting
//!
//! The directory lock is always acquired before any account lock, and an
//! account lock is acquired **before** the directory guard is released.
//! That window is what keeps a concurrent account closure from destroying an
//! account between lookup and lock acquisition. The closure-based API below
//! (`with_read`, `with_write`, ...) makes this ordering structural: callers
//! cannot hold an account guard without having gone through the directory.

use std::sync::Arc;

use thiserror::Error;

use crate::models::account::{Account, AccountId};
use crate::models::snapshot::SnapshotEntry;
use crate::sync::RwLock;

const INITIAL_CAPACITY: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("account {0} already exists")]
    DuplicateId(AccountId),
}

#[derive(Debug)]
struct Slot {
    // Id duplicated outside the account lock so directory scans need not
    // lock every account.
    id: AccountId,
    handle: Arc<RwLock<Account>>,
}

/// Concurrent map from account id to account.
#[derive(Debug)]
pub struct AccountDirectory {
    slots: RwLock<Vec<Option<Slot>>>,
}

impl AccountDirectory {
    pub fn new() -> Self {
        let mut slots = Vec::new();
        slots.resize_with(INITIAL_CAPACITY, || None);
        Self {
            slots: RwLock::new(slots),
        }
    }

    fn find<'a>(slots: &'a [Option<Slot>], id: AccountId) -> Option<&'a Slot> {
        slots
            .iter()
            .flatten()
            .find(|slot| slot.id == id)
    }

    /// Insert a new account, failing on a duplicate id. Takes the directory
    /// in writer mode; grows the slot array by doubling when full.
    pub fn insert(&self, account: Account) -> Result<(), DirectoryError> {
        let id = account.id();
        let mut slots = self.slots.write();
        if Self::find(&slots, id).is_some() {
            return Err(DirectoryError::DuplicateId(id));
        }
        let slot = Slot {
            id,
            handle: Arc::new(RwLock::new(account)),
        };
        if let Some(free) = slots.iter_mut().find(|s| s.is_none()) {
            *free = Some(slot);
        } else {
            let old_capacity = slots.len();
            slots.resize_with(old_capacity * 2, || None);
            slots[old_capacity] = Some(slot);
        }
        Ok(())
    }

    /// Run `f` with the account read-locked, or `None` if the id is not
    /// present. The account lock is taken before the directory guard drops.
    pub fn with_read<R>(&self, id: AccountId, f: impl FnOnce(&Account) -> R) -> Option<R> {
        let slots = self.slots.read();
        let handle = Arc::clone(&Self::find(&slots, id)?.handle);
        let account = handle.read();
        drop(slots);
        Some(f(&account))
    }

    /// Run `f` with the account write-locked, or `None` if the id is not
    /// present.
    pub fn with_write<R>(&self, id: AccountId, f: impl FnOnce(&mut Account) -> R) -> Option<R> {
        let slots = self.slots.read();
        let handle = Arc::clone(&Self::find(&slots, id)?.handle);
        let mut account = handle.write();
        drop(slots);
        Some(f(&mut account))
    }

    /// Run `f` with two distinct accounts write-locked. Locks are acquired
    /// in ascending id order regardless of argument order, which is what
    /// makes concurrent opposing transfers deadlock-free. `f` receives the
    /// accounts in argument order. On a missing account returns `Err` with
    /// the missing id, checking `a` first.
    pub fn with_pair_write<R>(
        &self,
        a: AccountId,
        b: AccountId,
        f: impl FnOnce(&mut Account, &mut Account) -> R,
    ) -> Result<R, AccountId> {
        debug_assert_ne!(a, b, "with_pair_write requires distinct accounts");
        let slots = self.slots.read();
        let handle_a = Arc::clone(&Self::find(&slots, a).ok_or(a)?.handle);
        let handle_b = Arc::clone(&Self::find(&slots, b).ok_or(b)?.handle);
        let (mut guard_a, mut guard_b);
        if a < b {
            guard_a = handle_a.write();
            guard_b = handle_b.write();
        } else {
            guard_b = handle_b.write();
            guard_a = handle_a.write();
        }
        drop(slots);
        Ok(f(&mut guard_a, &mut guard_b))
    }

    /// Conditionally remove an account. Takes the directory in writer mode,
    /// then the account in writer mode, and calls `check`; on `Ok` the entry
    /// is removed and destruction happens after both guards are released.
    /// On `Err` the entry is left untouched. `None` when the id is unknown.
    pub fn remove_if<R, E>(
        &self,
        id: AccountId,
        check: impl FnOnce(&Account) -> Result<R, E>,
    ) -> Option<Result<R, E>> {
        let mut slots = self.slots.write();
        let index = slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|s| s.id == id))?;
        let handle = Arc::clone(&slots[index].as_ref().expect("slot just found").handle);
        let account = handle.write();
        match check(&account) {
            Ok(result) => {
                slots[index] = None;
                drop(slots);
                drop(account);
                Some(Ok(result))
            }
            Err(e) => Some(Err(e)),
        }
    }

    /// Visit every live account in reader mode, directory reader lock held
    /// across the pass.
    pub fn for_each_read(&self, mut f: impl FnMut(&Account)) {
        let slots = self.slots.read();
        for slot in slots.iter().flatten() {
            let account = slot.handle.read();
            f(&account);
        }
    }

    /// Visit every live account in writer mode, directory reader lock held
    /// across the pass. `under_lock` runs while holding the account's
    /// writer lock and returns a value; `after_unlock` consumes that value
    /// once the account lock has been released, so work routed there never
    /// touches shared state from under an account lock.
    pub fn for_each_write<R>(
        &self,
        mut under_lock: impl FnMut(&mut Account) -> R,
        mut after_unlock: impl FnMut(R),
    ) {
        let slots = self.slots.read();
        for slot in slots.iter().flatten() {
            let result = {
                let mut account = slot.handle.write();
                under_lock(&mut account)
            };
            after_unlock(result);
        }
    }

    /// Replace the entire account set from snapshot entries. Existing
    /// accounts are destroyed; the slot array grows if the snapshot holds
    /// more accounts than the current capacity.
    pub fn restore(&self, entries: &[SnapshotEntry]) {
        let mut slots = self.slots.write();
        for slot in slots.iter_mut() {
            *slot = None;
        }
        if entries.len() > slots.len() {
            let mut capacity = slots.len();
            while capacity < entries.len() {
                capacity *= 2;
            }
            slots.resize_with(capacity, || None);
        }
        for (slot, entry) in slots.iter_mut().zip(entries) {
            *slot = Some(Slot {
                id: entry.id,
                handle: Arc::new(RwLock::new(Account::new(
                    entry.id,
                    entry.password,
                    entry.balance_ils,
                    entry.balance_usd,
                ))),
            });
        }
    }

    /// Number of live accounts.
    pub fn len(&self) -> usize {
        self.slots.read().iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AccountDirectory {
    fn default() -> Self {
        Self::new()
    }
}
