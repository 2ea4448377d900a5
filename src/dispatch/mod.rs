//! Per-agent command dispatch.
//!
//! Each agent ("ATM") runs one [`AgentDispatcher`] loop over its private
//! command feed. The dispatcher enforces the engine's external discipline:
//!
//! 1. Stop before reading once the agent has been administratively closed.
//! 2. VIP-flagged lines are enqueued raw onto the priority queue (the
//!    worker re-parses) while the agent still pays its own pacing delay.
//! 3. PERSISTENT lines execute once with error lines suppressed; on
//!    failure the dispatcher waits out the remainder of the pacing window
//!    and retries once with normal logging.
//! 4. Every command paces to 1000 ms from its start, except the scheduled
//!    break, which sleeps its own duration instead.
//! 5. The closed flag is rechecked after every command.
//!
//! VIP workers share the same executor with pacing disabled; the
//! persistent retry window still applies, measured from the worker's own
//! start of execution.

pub mod parser;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::engine::{BankEngine, OpError};
use crate::journal::{self, LogMode};
use crate::models::account::AgentId;
use crate::vip::VipQueue;

use parser::{Directive, Operation, ParseError};

/// Pacing window per command, and also the persistent retry window.
pub const COMMAND_PACING: Duration = Duration::from_millis(1000);

fn sleep_until(deadline: Instant) {
    let now = Instant::now();
    if deadline > now {
        thread::sleep(deadline - now);
    }
}

/// One agent's command loop.
#[derive(Debug)]
pub struct AgentDispatcher {
    engine: Arc<BankEngine>,
    vip_queue: Arc<VipQueue>,
    agent: AgentId,
}

impl AgentDispatcher {
    pub fn new(engine: Arc<BankEngine>, vip_queue: Arc<VipQueue>, agent: AgentId) -> Self {
        Self {
            engine,
            vip_queue,
            agent,
        }
    }

    pub fn agent(&self) -> AgentId {
        self.agent
    }

    /// Drain `feed` to exhaustion or until this agent is closed. A parse
    /// failure aborts the run; command feeds are expected to be well
    /// formed.
    pub fn run(&self, feed: impl IntoIterator<Item = String>) -> Result<(), ParseError> {
        let mut feed = feed.into_iter();
        loop {
            // Closed agents stop before reading another command.
            if self.engine.agents().is_closed(self.agent) {
                break;
            }
            let Some(raw) = feed.next() else {
                break;
            };
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let directive = parser::parse_line(line)?;
            let start = Instant::now();

            if let Some(priority) = directive.vip_priority {
                self.vip_queue.push(self.agent, priority, line);
                // The agent keeps its usual rhythm even though the work
                // happens elsewhere.
                if !directive.op.is_sleep() {
                    sleep_until(start + COMMAND_PACING);
                }
            } else {
                let _ = execute_directive(&self.engine, self.agent, &directive, Some(start));
            }

            if self.engine.agents().is_closed(self.agent) {
                break;
            }
        }
        Ok(())
    }
}

/// Execute one parsed directive as `agent`.
///
/// `pace_from` carries the dispatcher's start-of-command instant; `None`
/// (the VIP worker) skips pacing but still anchors the persistent retry
/// window at the current instant.
pub fn execute_directive(
    engine: &BankEngine,
    agent: AgentId,
    directive: &Directive,
    pace_from: Option<Instant>,
) -> Result<(), OpError> {
    let start = pace_from.unwrap_or_else(Instant::now);

    // The scheduled break neither paces nor participates in persistence.
    if let Operation::Sleep { duration_ms } = directive.op {
        engine.journal().append(&format!(
            "{agent}: Currently on a scheduled break. Service will resume within {duration_ms} ms."
        ));
        if duration_ms > 0 {
            thread::sleep(Duration::from_millis(duration_ms as u64));
        }
        return Ok(());
    }

    if directive.persistent {
        journal::set_thread_log_mode(LogMode::SuccessOnly);
    }
    let mut outcome = apply_operation(engine, agent, &directive.op);
    journal::set_thread_log_mode(LogMode::All);

    if directive.persistent && outcome.is_err() {
        sleep_until(start + COMMAND_PACING);
        outcome = apply_operation(engine, agent, &directive.op);
    }

    if pace_from.is_some() {
        sleep_until(start + COMMAND_PACING);
    }
    outcome
}

fn apply_operation(engine: &BankEngine, agent: AgentId, op: &Operation) -> Result<(), OpError> {
    match *op {
        Operation::Open {
            id,
            password,
            init_ils,
            init_usd,
        } => engine.open_account(agent, id, password, init_ils, init_usd),
        Operation::Deposit {
            id,
            password,
            amount,
            currency,
        } => engine.deposit(agent, id, password, currency, amount),
        Operation::Withdraw {
            id,
            password,
            amount,
            currency,
        } => engine.withdraw(agent, id, password, currency, amount),
        Operation::Balance { id, password } => engine.balance(agent, id, password).map(|_| ()),
        Operation::CloseAccount { id, password } => engine.close_account(agent, id, password),
        Operation::Transfer {
            src,
            password,
            dst,
            amount,
            currency,
        } => engine.transfer(agent, src, password, dst, currency, amount),
        Operation::Exchange {
            id,
            password,
            from,
            to,
            amount,
        } => engine.exchange(agent, id, password, from, to, amount),
        Operation::CloseAgent { target } => engine.request_agent_close(agent, target),
        Operation::Rollback { iterations_back } => engine.request_rollback(agent, iterations_back),
        Operation::Invest {
            id,
            password,
            amount,
            currency,
            duration_ms,
        } => engine.invest(agent, id, password, amount, currency, duration_ms),
        Operation::Sleep { .. } => Ok(()),
    }
}

/// VIP worker loop: drain the queue with no per-command pacing, acting as
/// each task's originating agent. Returns when the queue is closed and
/// empty.
pub fn run_vip_worker(engine: &BankEngine, queue: &VipQueue) {
    while let Some(task) = queue.pop() {
        match parser::parse_line(task.line()) {
            Ok(directive) => {
                let _ = execute_directive(engine, task.agent(), &directive, None);
            }
            Err(error) => {
                // The dispatcher parsed this line once already, so this is
                // unreachable in practice.
                warn!(line = task.line(), %error, "vip worker skipped malformed line");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::Journal;

    fn engine() -> (Arc<BankEngine>, crate::journal::JournalCapture) {
        let (journal, capture) = Journal::capture();
        (Arc::new(BankEngine::new(2, journal)), capture)
    }

    fn feed(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn test_dispatcher_executes_lines_in_order() {
        let (engine, _capture) = engine();
        let dispatcher = AgentDispatcher::new(Arc::clone(&engine), Arc::new(VipQueue::new()), 1);
        dispatcher
            .run(feed(&["O 10 7777 100 50", "W 10 7777 30 USD"]))
            .unwrap();
        assert_eq!(engine.balance(1, 10, 7777).unwrap(), (100, 20));
    }

    #[test]
    fn test_dispatcher_stops_for_closed_agent() {
        let (engine, _capture) = engine();
        engine.request_agent_close(2, 1).unwrap();
        engine.status_tick(&mut std::io::sink());

        let dispatcher = AgentDispatcher::new(Arc::clone(&engine), Arc::new(VipQueue::new()), 1);
        dispatcher.run(feed(&["O 10 7777 100 50"])).unwrap();
        assert_eq!(engine.account_count(), 0, "closed agent must not execute");
    }

    #[test]
    fn test_vip_lines_route_to_queue_not_engine() {
        let (engine, _capture) = engine();
        let queue = Arc::new(VipQueue::new());
        let dispatcher = AgentDispatcher::new(Arc::clone(&engine), Arc::clone(&queue), 1);
        dispatcher.run(feed(&["O 10 7777 1 1 VIP=50"])).unwrap();

        assert_eq!(engine.account_count(), 0, "vip line must not run locally");
        let task = queue.pop().unwrap();
        assert_eq!(task.agent(), 1);
        assert_eq!(task.line(), "O 10 7777 1 1 VIP=50");
    }

    #[test]
    fn test_vip_worker_executes_on_behalf_of_agent() {
        let (engine, capture) = engine();
        let queue = VipQueue::new();
        queue.push(2, 10, "O 10 7777 5 0");
        queue.close();
        run_vip_worker(&engine, &queue);
        assert_eq!(engine.balance(2, 10, 7777).unwrap(), (5, 0));
        assert!(capture.contains("2: New account id is 10"));
    }

    #[test]
    fn test_persistent_suppresses_first_error_and_retries() {
        let (engine, capture) = engine();
        let directive = parser::parse_line("D 10 7777 100 ILS PERSISTENT").unwrap();
        let started = Instant::now();
        let outcome = execute_directive(&engine, 1, &directive, None);
        // Both attempts fail (no account); only the retry may log.
        assert_eq!(outcome, Err(OpError::AccountNotFound(10)));
        assert!(
            started.elapsed() >= Duration::from_millis(1000),
            "retry must wait out the pacing window"
        );
        let missing_lines = capture
            .lines()
            .iter()
            .filter(|l| l.contains("account id 10 does not exist"))
            .count();
        assert_eq!(missing_lines, 1, "first failure is silent, retry is not");
    }

    #[test]
    fn test_persistent_success_skips_the_retry_wait() {
        let (engine, _capture) = engine();
        engine.open_account(1, 10, 7777, 100, 0).unwrap();
        let directive = parser::parse_line("D 10 7777 50 ILS PERSISTENT").unwrap();
        let started = Instant::now();
        execute_directive(&engine, 1, &directive, None).unwrap();
        assert!(
            started.elapsed() < Duration::from_millis(500),
            "a successful first attempt must not wait"
        );
        assert_eq!(engine.balance(1, 10, 7777).unwrap(), (150, 0));
    }

    #[test]
    fn test_sleep_logs_break_line_without_pacing() {
        let (engine, capture) = engine();
        let directive = parser::parse_line("S 20").unwrap();
        let started = Instant::now();
        execute_directive(&engine, 1, &directive, Some(Instant::now())).unwrap();
        assert!(
            started.elapsed() < Duration::from_millis(900),
            "sleep must not add the pacing delay"
        );
        assert!(capture
            .contains("1: Currently on a scheduled break. Service will resume within 20 ms."));
    }
}
