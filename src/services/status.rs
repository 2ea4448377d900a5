//! Status service: the bank's heartbeat.
//!
//! Every 10 ms this thread publishes one consistent snapshot into the ring,
//! renders the status screen, then applies queued administrative work in a
//! fixed order: agent closes first, rollbacks second. The snapshot is
//! captured before either, so a rollback processed this tick can target the
//! view that existed when it arrived, and a restore can never resurrect an
//! agent closed in the same tick.

use std::io::Write;
use std::time::Duration;

use tracing::debug;

use crate::engine::BankEngine;

/// Snapshot/render period.
pub const STATUS_PERIOD: Duration = Duration::from_millis(10);

/// Run the status loop until shutdown is requested. `out` receives the
/// rendered screen; rendering is best-effort and unordered with respect to
/// the journal.
pub fn run_status_service(engine: &BankEngine, out: &mut impl Write) {
    debug!("status service started");
    loop {
        if engine.shutdown().sleep_interruptibly(STATUS_PERIOD) {
            break;
        }
        engine.status_tick(&mut *out);
    }
    debug!("status service stopped");
}
