//! Bank engine: every transactional operation and its locking discipline.
//!
//! The engine owns all shared state (account directory, commission vault,
//! snapshot ring, agent registry, rollback intake, journal, shutdown flag)
//! and is shared across threads behind an `Arc`. There are no globals.
//!
//! # Locking discipline
//!
//! Top-down acquisition order: directory lock, then account lock(s) (in
//! ascending id order when two are needed), then the vault mutex, then the
//! snapshot-ring mutex, then subsystem mutexes. Operations that look up an
//! account acquire its lock before releasing the directory guard, so a
//! racing account closure can never destroy an account between lookup and
//! lock acquisition; the [`AccountDirectory`] API enforces this shape.
//!
//! # Outcomes
//!
//! Operations return structured outcomes, never panic on user input, and
//! write at most one journal line each. Illegal inputs are rejected before
//! any state or journal effect. Error lines are dropped while the calling
//! thread journals in success-only mode (the persistent first attempt).

use std::io::{self, Write};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use thiserror::Error;

use crate::journal::Journal;
use crate::models::account::{Account, AccountId, AgentId, Currency};
use crate::models::directory::AccountDirectory;
use crate::models::registry::{AgentRegistry, CloseRequestError};
use crate::models::snapshot::{BankSnapshot, SnapshotEntry, SnapshotRing, SNAPSHOT_RING_CAPACITY};
use crate::rng::Xorshift32;
use crate::sync::ShutdownFlag;

/// Interest factor per 10 ms step of an investment.
const INVEST_STEP_FACTOR: f64 = 1.03;

/// Structured operation outcomes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OpError {
    #[error("account with the same id exists")]
    AccountExists,
    #[error("account id {0} does not exist")]
    AccountNotFound(AccountId),
    #[error("password for account id {0} is incorrect")]
    BadPassword(AccountId),
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("illegal amount")]
    IllegalAmount,
    #[error("source and target accounts are the same")]
    SameAccount,
    #[error("ATM ID {0} does not exist")]
    AtmNotFound(AgentId),
    #[error("ATM ID {0} is already in a closed state")]
    AtmAlreadyClosed(AgentId),
    #[error("rollback not possible")]
    RollbackNotPossible,
}

#[derive(Debug)]
struct RollbackRequest {
    agent: AgentId,
    iterations_back: i64,
}

#[derive(Debug, Default)]
struct Vault {
    ils: i64,
    usd: i64,
}

/// The simulated bank. See the module docs for the locking discipline.
#[derive(Debug)]
pub struct BankEngine {
    directory: AccountDirectory,
    vault: Mutex<Vault>,
    snapshots: SnapshotRing,
    agents: AgentRegistry,
    rollback_tx: Sender<RollbackRequest>,
    rollback_rx: Receiver<RollbackRequest>,
    journal: Journal,
    shutdown: ShutdownFlag,
}

impl BankEngine {
    /// Create an engine serving `agent_count` agents, journaling into
    /// `journal`.
    pub fn new(agent_count: u32, journal: Journal) -> Self {
        let (rollback_tx, rollback_rx) = unbounded();
        Self {
            directory: AccountDirectory::new(),
            vault: Mutex::new(Vault::default()),
            snapshots: SnapshotRing::new(),
            agents: AgentRegistry::new(agent_count),
            rollback_tx,
            rollback_rx,
            journal,
            shutdown: ShutdownFlag::new(),
        }
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn shutdown(&self) -> &ShutdownFlag {
        &self.shutdown
    }

    pub fn snapshots(&self) -> &SnapshotRing {
        &self.snapshots
    }

    /// Number of live accounts.
    pub fn account_count(&self) -> usize {
        self.directory.len()
    }

    /// Commission totals as `(ILS, USD)` under the vault mutex.
    pub fn vault_totals(&self) -> (i64, i64) {
        let vault = self.vault.lock().unwrap();
        (vault.ils, vault.usd)
    }

    // ========================================================================
    // Account operations
    // ========================================================================

    /// Open a new account with the given opening balances.
    pub fn open_account(
        &self,
        agent: AgentId,
        id: AccountId,
        password: u32,
        init_ils: i64,
        init_usd: i64,
    ) -> Result<(), OpError> {
        if init_ils < 0 || init_usd < 0 {
            return Err(OpError::IllegalAmount);
        }
        let account = Account::new(id, password, init_ils, init_usd);
        match self.directory.insert(account) {
            Ok(()) => {
                self.journal.append(&format!(
                    "{agent}: New account id is {id} with password {password} and initial balance {init_ils} ILS and {init_usd} USD"
                ));
                Ok(())
            }
            Err(_) => {
                self.journal.append_error(&format!(
                    "Error {agent}: Your transaction failed – account with the same id exists"
                ));
                Err(OpError::AccountExists)
            }
        }
    }

    /// Close an account: directory writer lock, account writer lock,
    /// password check, removal, destruction after both locks release.
    pub fn close_account(
        &self,
        agent: AgentId,
        id: AccountId,
        password: u32,
    ) -> Result<(), OpError> {
        let outcome = self.directory.remove_if(id, |account| {
            if account.password_matches(password) {
                Ok(account.balances())
            } else {
                Err(OpError::BadPassword(id))
            }
        });
        match outcome {
            None => {
                self.log_missing_account(agent, id);
                Err(OpError::AccountNotFound(id))
            }
            Some(Err(e)) => {
                self.log_bad_password(agent, id);
                Err(e)
            }
            Some(Ok((ils, usd))) => {
                self.journal.append(&format!(
                    "{agent}: Account {id} is now closed. Balance was {ils} ILS and {usd} USD"
                ));
                Ok(())
            }
        }
    }

    /// Deposit `amount` of `currency`.
    pub fn deposit(
        &self,
        agent: AgentId,
        id: AccountId,
        password: u32,
        currency: Currency,
        amount: i64,
    ) -> Result<(), OpError> {
        if amount <= 0 {
            return Err(OpError::IllegalAmount);
        }
        let outcome = self.directory.with_write(id, |account| {
            if !account.password_matches(password) {
                return Err(OpError::BadPassword(id));
            }
            account.credit(currency, amount);
            Ok(account.balances())
        });
        match outcome {
            None => {
                self.log_missing_account(agent, id);
                Err(OpError::AccountNotFound(id))
            }
            Some(Err(e)) => {
                self.log_bad_password(agent, id);
                Err(e)
            }
            Some(Ok((ils, usd))) => {
                self.journal.append(&format!(
                    "{agent}: Account {id} new balance is {ils} ILS and {usd} USD after {amount} {currency} was deposited"
                ));
                Ok(())
            }
        }
    }

    /// Withdraw `amount` of `currency`.
    pub fn withdraw(
        &self,
        agent: AgentId,
        id: AccountId,
        password: u32,
        currency: Currency,
        amount: i64,
    ) -> Result<(), OpError> {
        if amount <= 0 {
            return Err(OpError::IllegalAmount);
        }
        let outcome = self.directory.with_write(id, |account| {
            if !account.password_matches(password) {
                return Err(OpError::BadPassword(id));
            }
            let debited = account.debit(currency, amount).is_ok();
            Ok((debited, account.balances()))
        });
        match outcome {
            None => {
                self.log_missing_account(agent, id);
                Err(OpError::AccountNotFound(id))
            }
            Some(Err(e)) => {
                self.log_bad_password(agent, id);
                Err(e)
            }
            Some(Ok((false, (ils, usd)))) => {
                self.journal.append_error(&format!(
                    "Error {agent}: Your transaction failed – account id {id} balance is {ils} ILS and {usd} USD is lower than {amount} {currency}"
                ));
                Err(OpError::InsufficientFunds)
            }
            Some(Ok((true, (ils, usd)))) => {
                self.journal.append(&format!(
                    "{agent}: Account {id} new balance is {ils} ILS and {usd} USD after {amount} {currency} was withdrawn"
                ));
                Ok(())
            }
        }
    }

    /// Query both balances under the account reader lock.
    pub fn balance(
        &self,
        agent: AgentId,
        id: AccountId,
        password: u32,
    ) -> Result<(i64, i64), OpError> {
        let outcome = self.directory.with_read(id, |account| {
            if !account.password_matches(password) {
                return Err(OpError::BadPassword(id));
            }
            Ok(account.balances())
        });
        match outcome {
            None => {
                self.log_missing_account(agent, id);
                Err(OpError::AccountNotFound(id))
            }
            Some(Err(e)) => {
                self.log_bad_password(agent, id);
                Err(e)
            }
            Some(Ok((ils, usd))) => {
                self.journal.append(&format!(
                    "{agent}: Account {id} balance is {ils} ILS and {usd} USD"
                ));
                Ok((ils, usd))
            }
        }
    }

    /// Transfer between two distinct accounts. Both writer locks are taken
    /// in ascending id order, so the debit/credit pair is atomic and
    /// opposing concurrent transfers cannot deadlock.
    pub fn transfer(
        &self,
        agent: AgentId,
        src: AccountId,
        password: u32,
        dst: AccountId,
        currency: Currency,
        amount: i64,
    ) -> Result<(), OpError> {
        if amount <= 0 {
            return Err(OpError::IllegalAmount);
        }
        if src == dst {
            return Err(OpError::SameAccount);
        }
        let outcome = self.directory.with_pair_write(src, dst, |from, to| {
            if !from.password_matches(password) {
                return Err(OpError::BadPassword(src));
            }
            if from.debit(currency, amount).is_err() {
                return Err(OpError::InsufficientFunds);
            }
            to.credit(currency, amount);
            Ok((from.balances(), to.balances()))
        });
        match outcome {
            Err(missing) => {
                self.log_missing_account(agent, missing);
                Err(OpError::AccountNotFound(missing))
            }
            Ok(Err(OpError::BadPassword(_))) => {
                self.log_bad_password(agent, src);
                Err(OpError::BadPassword(src))
            }
            Ok(Err(OpError::InsufficientFunds)) => {
                self.journal.append_error(&format!(
                    "Error {agent}: Your transaction failed – balance of account id {src} is lower than {amount} {currency}"
                ));
                Err(OpError::InsufficientFunds)
            }
            Ok(Err(e)) => Err(e),
            Ok(Ok(((src_ils, src_usd), (dst_ils, dst_usd)))) => {
                self.journal.append(&format!(
                    "{agent}: Transfer {amount} {currency} from account {src} to account {dst} new account balance is {src_ils} ILS and {src_usd} USD new target account balance is {dst_ils} ILS and {dst_usd} USD"
                ));
                Ok(())
            }
        }
    }

    /// Exchange `amount_from` of `from` into `to` at the fixed rate, both
    /// updates atomic under one writer lock. Same-currency exchange is a
    /// silent no-op.
    pub fn exchange(
        &self,
        agent: AgentId,
        id: AccountId,
        password: u32,
        from: Currency,
        to: Currency,
        amount_from: i64,
    ) -> Result<(), OpError> {
        if amount_from <= 0 {
            return Err(OpError::IllegalAmount);
        }
        if from == to {
            return Ok(());
        }
        let outcome = self.directory.with_write(id, |account| {
            if !account.password_matches(password) {
                return Err(OpError::BadPassword(id));
            }
            // Balances before the debit attempt; the failure line reports
            // these.
            let before = account.balances();
            if account.debit(from, amount_from).is_err() {
                return Ok((false, before));
            }
            let amount_to = match from {
                Currency::Usd => amount_from * Currency::ILS_PER_USD,
                Currency::Ils => amount_from / Currency::ILS_PER_USD,
            };
            if amount_to > 0 {
                account.credit(to, amount_to);
            }
            Ok((true, account.balances()))
        });
        match outcome {
            None => {
                self.log_missing_account(agent, id);
                Err(OpError::AccountNotFound(id))
            }
            Some(Err(e)) => {
                self.log_bad_password(agent, id);
                Err(e)
            }
            Some(Ok((false, (ils, usd)))) => {
                self.journal.append_error(&format!(
                    "Error {agent}: Your transaction failed – account id {id} balance is {ils} ILS and {usd} USD is lower than {amount_from} {from}"
                ));
                Err(OpError::InsufficientFunds)
            }
            Some(Ok((true, (ils, usd)))) => {
                self.journal.append(&format!(
                    "{agent}: Account {id} new balance is {ils} ILS and {usd} USD after {amount_from} {from} was exchanged"
                ));
                Ok(())
            }
        }
    }

    /// Invest `amount` for `duration_ms` (a positive multiple of 10 ms).
    ///
    /// The principal is debited up front, the account lock is released for
    /// the whole suspension, and the proceeds (`floor(amount * 1.03^steps)`,
    /// one step per 10 ms) are credited afterwards if the account still
    /// exists. Proceeds into a meanwhile-closed account are discarded
    /// silently; invest writes no journal lines at all.
    pub fn invest(
        &self,
        _agent: AgentId,
        id: AccountId,
        password: u32,
        amount: i64,
        currency: Currency,
        duration_ms: i64,
    ) -> Result<(), OpError> {
        if amount <= 0 || duration_ms <= 0 || duration_ms % 10 != 0 {
            return Err(OpError::IllegalAmount);
        }
        let debited = self.directory.with_write(id, |account| {
            if !account.password_matches(password) {
                return Err(OpError::BadPassword(id));
            }
            account
                .debit(currency, amount)
                .map_err(|_| OpError::InsufficientFunds)
        });
        match debited {
            None => return Err(OpError::AccountNotFound(id)),
            Some(Err(e)) => return Err(e),
            Some(Ok(())) => {}
        }

        let steps = duration_ms / 10;
        // f64 -> i64 casts saturate, which bounds absurdly long durations;
        // a negative intermediate clamps to zero.
        let proceeds = ((amount as f64) * INVEST_STEP_FACTOR.powf(steps as f64)).floor() as i64;
        let proceeds = proceeds.max(0);

        thread::sleep(Duration::from_millis(duration_ms as u64));

        if proceeds > 0 {
            // None here means the account was closed during the suspension;
            // the proceeds are discarded.
            let _ = self
                .directory
                .with_write(id, |account| account.credit(currency, proceeds));
        }
        Ok(())
    }

    // ========================================================================
    // Administrative operations
    // ========================================================================

    /// Request that `target` be closed. The transition itself happens on
    /// the next status tick.
    pub fn request_agent_close(
        &self,
        requestor: AgentId,
        target: AgentId,
    ) -> Result<(), OpError> {
        match self.agents.request_close(requestor, target) {
            Ok(()) => Ok(()),
            Err(CloseRequestError::UnknownAgent(_)) => {
                self.journal.append_error(&format!(
                    "Error {requestor}: Your transaction failed – ATM ID {target} does not exist"
                ));
                Err(OpError::AtmNotFound(target))
            }
            Err(CloseRequestError::AlreadyClosed(_)) => {
                self.journal.append_error(&format!(
                    "Error {requestor}: Your close operation failed – ATM ID {target} is already in a closed state"
                ));
                Err(OpError::AtmAlreadyClosed(target))
            }
        }
    }

    /// Queue a rollback of `iterations_back` status iterations. Returns
    /// immediately; application happens on the next status tick.
    pub fn request_rollback(&self, agent: AgentId, iterations_back: i64) -> Result<(), OpError> {
        if iterations_back <= 0 || iterations_back > SNAPSHOT_RING_CAPACITY as i64 {
            return Err(OpError::RollbackNotPossible);
        }
        let _ = self.rollback_tx.send(RollbackRequest {
            agent,
            iterations_back,
        });
        Ok(())
    }

    // ========================================================================
    // Status service hooks
    // ========================================================================

    /// Capture one consistent snapshot (entries sorted by id, vault totals
    /// under their mutex), publish it into the ring, and return it.
    pub fn capture_snapshot(&self) -> BankSnapshot {
        let mut entries = Vec::new();
        self.directory
            .for_each_read(|account| entries.push(SnapshotEntry::from(account)));
        entries.sort_by_key(|entry| entry.id);
        let (bank_ils, bank_usd) = self.vault_totals();
        let snapshot = BankSnapshot {
            bank_ils,
            bank_usd,
            entries,
            agent_count: self.agents.count(),
        };
        self.snapshots.push(snapshot.clone());
        snapshot
    }

    /// Render the status screen for `snapshot`.
    pub fn render_status(&self, snapshot: &BankSnapshot, out: &mut dyn Write) -> io::Result<()> {
        write!(out, "\x1b[2J\x1b[1;1H")?;
        writeln!(out, "Current Bank Status")?;
        for entry in &snapshot.entries {
            writeln!(
                out,
                "Account {}: Balance - {} ILS {} USD, Account Password - {}",
                entry.id, entry.balance_ils, entry.balance_usd, entry.password
            )?;
        }
        writeln!(
            out,
            "The Bank has {} ILS and {} USD",
            snapshot.bank_ils, snapshot.bank_usd
        )?;
        writeln!(out)?;
        out.flush()
    }

    /// Promote pending agent closes and log each as the bank.
    pub fn apply_agent_closes(&self) {
        for (requestor, target) in self.agents.take_effect() {
            self.journal
                .append(&format!("Bank: ATM {requestor} closed {target} successfully"));
        }
    }

    /// Drain the rollback queue in FIFO order. Requests addressing an
    /// iteration outside the current window are dropped silently.
    pub fn process_rollbacks(&self) {
        for request in self.rollback_rx.try_iter() {
            let Some(snapshot) = self.snapshots.read_iteration(request.iterations_back) else {
                continue;
            };
            self.apply_snapshot(&snapshot);
            self.journal.append(&format!(
                "{}: Rollback to {} bank iterations ago was completed successfully",
                request.agent, request.iterations_back
            ));
        }
    }

    /// One full status iteration: snapshot, render, closes, rollbacks, in
    /// that order. The snapshot precedes rollback application so a rollback
    /// never consumes a stale view of the tick it arrived in; closes precede
    /// rollbacks so a restore cannot resurrect a just-closed agent.
    pub fn status_tick(&self, out: &mut dyn Write) {
        let snapshot = self.capture_snapshot();
        // Rendering is best-effort.
        let _ = self.render_status(&snapshot, out);
        self.apply_agent_closes();
        self.process_rollbacks();
    }

    fn apply_snapshot(&self, snapshot: &BankSnapshot) {
        self.directory.restore(&snapshot.entries);
        let mut vault = self.vault.lock().unwrap();
        vault.ils = snapshot.bank_ils;
        vault.usd = snapshot.bank_usd;
    }

    // ========================================================================
    // Commission service hook
    // ========================================================================

    /// One commission pass: each account is charged a random 1-5% of each
    /// currency balance (integer, truncated), credited to the bank's
    /// commission totals, one journal line per account. The directory
    /// reader lock is held across the pass; each account's writer lock is
    /// held only for the balance read and debit, and is released before
    /// the vault mutex and the journal are touched.
    pub fn charge_commissions(&self, rng: &mut Xorshift32) {
        self.directory.for_each_write(
            |account| {
                let percent = rng.range(1, 6);
                let (ils, usd) = account.balances();
                let commission_ils = ils * percent / 100;
                let commission_usd = usd * percent / 100;
                if commission_ils > 0 {
                    let _ = account.debit(Currency::Ils, commission_ils);
                }
                if commission_usd > 0 {
                    let _ = account.debit(Currency::Usd, commission_usd);
                }
                (account.id(), percent, commission_ils, commission_usd)
            },
            |(id, percent, commission_ils, commission_usd)| {
                {
                    let mut vault = self.vault.lock().unwrap();
                    vault.ils += commission_ils;
                    vault.usd += commission_usd;
                }
                self.journal.append(&format!(
                    "Bank: commissions of {percent} % were charged, bank gained {commission_ils} ILS and {commission_usd} USD from account {id}"
                ));
            },
        );
    }

    // ========================================================================
    // Journal helpers
    // ========================================================================

    fn log_missing_account(&self, agent: AgentId, id: AccountId) {
        self.journal.append_error(&format!(
            "Error {agent}: Your transaction failed – account id {id} does not exist"
        ));
    }

    fn log_bad_password(&self, agent: AgentId, id: AccountId) {
        self.journal.append_error(&format!(
            "Error {agent}: Your transaction failed – password for account id {id} is incorrect"
        ));
    }
}
