//! Bank Simulator Core - Rust Engine
//!
//! Concurrent simulated-bank engine: an in-memory account store worked by
//! independent ATM agent threads, with periodic status/snapshot capture,
//! periodic commission charging, operator-controlled rollback, and a
//! prioritized "VIP" queue executed by dedicated worker threads.
//!
//! # Architecture
//!
//! - **sync**: Writer-preferring reader/writer lock and the shutdown flag
//! - **models**: Domain types (Account, AccountDirectory, snapshots, agents)
//! - **engine**: All bank operations with their locking discipline
//! - **journal**: The transaction log (atomic per line, exact formats)
//! - **dispatch**: Per-agent command loop, parsing, pacing, persistence
//! - **vip**: Priority queue and worker execution
//! - **services**: Status and commission background threads
//! - **orchestrator**: Thread lifecycle and cooperative shutdown
//! - **rng**: Deterministic random number generation
//!
//! # Critical Invariants
//!
//! 1. All money values are i64 and never observed negative
//! 2. Lock order is directory -> account(s) -> vault -> snapshot ring ->
//!    subsystem mutexes; paired account locks go in ascending id order
//! 3. Journal lines are serialized globally and atomic per line

pub mod dispatch;
pub mod engine;
pub mod journal;
pub mod models;
pub mod orchestrator;
pub mod rng;
pub mod services;
pub mod sync;
pub mod vip;

// Re-exports for convenience
pub use dispatch::{
    parser::{Directive, Operation, ParseError},
    AgentDispatcher,
};
pub use engine::{BankEngine, OpError};
pub use journal::{Journal, JournalCapture, LogMode};
pub use models::{
    account::{Account, AccountError, AccountId, AgentId, Currency},
    directory::AccountDirectory,
    registry::AgentRegistry,
    snapshot::{BankSnapshot, SnapshotEntry, SnapshotRing},
};
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorError};
pub use rng::Xorshift32;
pub use vip::{VipQueue, VipTask};
