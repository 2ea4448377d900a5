//! Bank snapshots and the bounded snapshot ring.
//!
//! The status service captures one consistent view of the bank per tick and
//! publishes it into a ring of the 120 most recent snapshots. A rollback
//! request addresses a snapshot by "iterations back": iteration 1 is the
//! most recent fully published snapshot.
//!
//! Snapshots are self-contained values; `read_iteration` hands out a deep
//! copy so the ring mutex never stays held while a snapshot is applied.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::models::account::{Account, AccountId};

/// Ring capacity, and therefore the largest addressable rollback distance.
pub const SNAPSHOT_RING_CAPACITY: usize = 120;

/// Per-account record captured atomically under the account's reader lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub id: AccountId,
    pub password: u32,
    pub balance_ils: i64,
    pub balance_usd: i64,
}

impl From<&Account> for SnapshotEntry {
    fn from(account: &Account) -> Self {
        let (balance_ils, balance_usd) = account.balances();
        Self {
            id: account.id(),
            password: account.password(),
            balance_ils,
            balance_usd,
        }
    }
}

/// A consistent point-in-time view of all accounts and the bank's
/// commission totals. Closed-agent flags are deliberately not captured:
/// agent closures survive rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankSnapshot {
    pub bank_ils: i64,
    pub bank_usd: i64,
    /// Sorted by account id.
    pub entries: Vec<SnapshotEntry>,
    pub agent_count: u32,
}

#[derive(Debug)]
struct RingState {
    slots: Vec<Option<BankSnapshot>>,
    /// Next slot to write; `head - 1` is the most recent snapshot.
    head: usize,
    count: usize,
}

/// Bounded ring of published snapshots, guarded by its own mutex.
#[derive(Debug)]
pub struct SnapshotRing {
    state: Mutex<RingState>,
}

impl SnapshotRing {
    pub fn new() -> Self {
        let mut slots = Vec::new();
        slots.resize_with(SNAPSHOT_RING_CAPACITY, || None);
        Self {
            state: Mutex::new(RingState {
                slots,
                head: 0,
                count: 0,
            }),
        }
    }

    /// Publish a snapshot, overwriting the oldest once the ring is full.
    pub fn push(&self, snapshot: BankSnapshot) {
        let mut state = self.state.lock().unwrap();
        let head = state.head;
        state.slots[head] = Some(snapshot);
        state.head = (head + 1) % SNAPSHOT_RING_CAPACITY;
        if state.count < SNAPSHOT_RING_CAPACITY {
            state.count += 1;
        }
    }

    /// Deep copy of the snapshot `iterations_back` publications ago.
    /// Iteration 1 is the most recent; valid iterations are
    /// `1 ..= count - 1`. Out-of-window requests return `None`.
    pub fn read_iteration(&self, iterations_back: i64) -> Option<BankSnapshot> {
        let state = self.state.lock().unwrap();
        if iterations_back <= 0 || iterations_back as usize >= state.count {
            return None;
        }
        let k = iterations_back as usize;
        let index = (state.head + SNAPSHOT_RING_CAPACITY - k) % SNAPSHOT_RING_CAPACITY;
        state.slots[index].clone()
    }

    /// Number of snapshots currently held.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SnapshotRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(tag: i64) -> BankSnapshot {
        BankSnapshot {
            bank_ils: tag,
            bank_usd: 0,
            entries: Vec::new(),
            agent_count: 1,
        }
    }

    #[test]
    fn test_iteration_one_is_most_recent() {
        let ring = SnapshotRing::new();
        for tag in 0..5 {
            ring.push(snapshot(tag));
        }
        assert_eq!(ring.read_iteration(1).unwrap().bank_ils, 4);
        assert_eq!(ring.read_iteration(4).unwrap().bank_ils, 1);
    }

    #[test]
    fn test_out_of_window_requests_rejected() {
        let ring = SnapshotRing::new();
        for tag in 0..3 {
            ring.push(snapshot(tag));
        }
        assert!(ring.read_iteration(0).is_none());
        assert!(ring.read_iteration(-1).is_none());
        // count is 3, so 3 iterations back is already out of the window
        assert!(ring.read_iteration(3).is_none());
        assert!(ring.read_iteration(2).is_some());
    }

    #[test]
    fn test_empty_ring_has_no_readable_iteration() {
        let ring = SnapshotRing::new();
        assert!(ring.read_iteration(1).is_none());
        ring.push(snapshot(0));
        // A single snapshot exists but iteration 1 requires count > 1.
        assert!(ring.read_iteration(1).is_none());
    }

    #[test]
    fn test_wraparound_overwrites_oldest() {
        let ring = SnapshotRing::new();
        let total = SNAPSHOT_RING_CAPACITY as i64 + 10;
        for tag in 0..total {
            ring.push(snapshot(tag));
        }
        assert_eq!(ring.len(), SNAPSHOT_RING_CAPACITY);
        assert_eq!(ring.read_iteration(1).unwrap().bank_ils, total - 1);
        let oldest_readable = (SNAPSHOT_RING_CAPACITY - 1) as i64;
        assert_eq!(
            ring.read_iteration(oldest_readable).unwrap().bank_ils,
            total - oldest_readable
        );
    }

    #[test]
    fn test_read_returns_deep_copy() {
        let ring = SnapshotRing::new();
        ring.push(snapshot(9));
        ring.push(BankSnapshot {
            bank_ils: 1,
            bank_usd: 2,
            entries: vec![SnapshotEntry {
                id: 10,
                password: 7777,
                balance_ils: 100,
                balance_usd: 50,
            }],
            agent_count: 2,
        });
        let mut copy = ring.read_iteration(1).unwrap();
        copy.entries.clear();
        // The ring's own copy is unaffected.
        assert_eq!(ring.read_iteration(1).unwrap().entries.len(), 1);
    }
}
