//! Concurrency primitives shared across the engine.
//!
//! The account store deliberately uses a hand-built writer-preferring
//! reader/writer lock rather than `std::sync::RwLock`: the standard lock
//! leaves reader/writer preference to the OS, while the engine's consistency
//! argument depends on writers never being starved by a stream of readers.

pub mod rwlock;
pub mod shutdown;

pub use rwlock::{ReadGuard, RwLock, WriteGuard};
pub use shutdown::ShutdownFlag;
