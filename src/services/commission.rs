//! Commission service.
//!
//! Every 30 ms the bank helps itself to a random 1-5% of each currency
//! balance of every account, moving the truncated charge into the
//! commission vault and journaling one line per account.
//!
//! The percentage comes from a thread-local xorshift32 seeded from the wall
//! clock and the thread's identity; different threads or accounts may see
//! the same percentage within a tick, and nothing requires them not to.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::engine::BankEngine;
use crate::rng::Xorshift32;

/// Commission charging period.
pub const COMMISSION_PERIOD: Duration = Duration::from_millis(30);

fn seed_from_clock_and_thread() -> u32 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    let mut hasher = DefaultHasher::new();
    thread::current().id().hash(&mut hasher);
    nanos ^ (hasher.finish() as u32)
}

/// Run the commission loop until shutdown is requested.
pub fn run_commission_service(engine: &BankEngine) {
    debug!("commission service started");
    let mut rng = Xorshift32::new(seed_from_clock_and_thread());
    loop {
        if engine.shutdown().sleep_interruptibly(COMMISSION_PERIOD) {
            break;
        }
        engine.charge_commissions(&mut rng);
    }
    debug!("commission service stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::Journal;
    use std::sync::Arc;

    #[test]
    fn test_commission_service_charges_until_stopped() {
        let (journal, capture) = Journal::capture();
        let engine = Arc::new(BankEngine::new(1, journal));
        engine.open_account(1, 10, 7777, 10_000, 0).unwrap();

        let service = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || run_commission_service(&engine))
        };
        thread::sleep(Duration::from_millis(150));
        engine.shutdown().request_stop();
        service.join().unwrap();

        let (vault_ils, _) = engine.vault_totals();
        assert!(vault_ils > 0, "repeated charges must accumulate");
        let (ils, _) = engine.balance(1, 10, 7777).unwrap();
        assert_eq!(ils + vault_ils, 10_000, "money only moves, never vanishes");
        assert!(capture.contains("% were charged, bank gained"));
    }

    #[test]
    fn test_empty_bank_charges_nothing() {
        let (journal, capture) = Journal::capture();
        let engine = BankEngine::new(1, journal);
        let mut rng = Xorshift32::new(7);
        engine.charge_commissions(&mut rng);
        assert_eq!(engine.vault_totals(), (0, 0));
        assert!(capture.lines().is_empty());
    }
}
