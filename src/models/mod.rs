//! Domain types: accounts, the concurrent account directory, snapshots, and
//! the agent registry.

pub mod account;
pub mod directory;
pub mod registry;
pub mod snapshot;

pub use account::{Account, AccountError, AccountId, AgentId, Currency};
pub use directory::AccountDirectory;
pub use registry::AgentRegistry;
pub use snapshot::{BankSnapshot, SnapshotEntry, SnapshotRing};
