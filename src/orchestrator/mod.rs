//! Orchestrator: thread lifecycle and cooperative shutdown.
//!
//! Owns the full thread complement: one status service, one commission
//! service, zero or more VIP workers, and one dispatcher per agent, all
//! sharing a single [`BankEngine`] behind an `Arc`.
//!
//! # Shutdown order
//!
//! 1. Join the agent dispatchers (their feeds ran dry or their agent was
//!    closed).
//! 2. Close the VIP queue; no producer remains, so workers drain what is
//!    left and exit.
//! 3. Join the VIP workers.
//! 4. Set the stop flag and join both background services.
//!
//! # Example
//!
//! ```
//! use bank_simulator_core_rs::{Journal, Orchestrator, OrchestratorConfig};
//!
//! let config = OrchestratorConfig { vip_workers: 1 };
//! let orchestrator = Orchestrator::new(config, Journal::sink());
//! let feeds = vec![vec!["O 10 7777 5 0".to_string()]];
//! let engine = orchestrator.run_with_status_out(feeds, Box::new(std::io::sink())).unwrap();
//! assert_eq!(engine.account_count(), 1);
//! ```

use std::io::{self, Write};
use std::sync::Arc;
use std::thread;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::dispatch::parser::ParseError;
use crate::dispatch::{run_vip_worker, AgentDispatcher};
use crate::engine::BankEngine;
use crate::journal::Journal;
use crate::services::{run_commission_service, run_status_service};
use crate::vip::VipQueue;

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Number of VIP worker threads draining the priority queue.
    pub vip_workers: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { vip_workers: 0 }
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] io::Error),
    #[error("agent {agent} feed is malformed: {source}")]
    Parse {
        agent: u32,
        #[source]
        source: ParseError,
    },
}

/// A per-agent command feed. Agent ids are assigned by position, starting
/// at 1.
pub type CommandFeed = Box<dyn Iterator<Item = String> + Send>;

/// Drives one complete simulation run.
#[derive(Debug)]
pub struct Orchestrator {
    config: OrchestratorConfig,
    journal: Journal,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, journal: Journal) -> Self {
        Self { config, journal }
    }

    /// Run to completion with status rendering to stdout.
    pub fn run<F>(self, feeds: Vec<F>) -> Result<Arc<BankEngine>, OrchestratorError>
    where
        F: IntoIterator<Item = String>,
        F::IntoIter: Send + 'static,
    {
        self.run_with_status_out(feeds, Box::new(io::stdout()))
    }

    /// Run to completion, rendering status into `status_out`. Agent ids are
    /// assigned by feed position, starting at 1.
    pub fn run_with_status_out<F>(
        self,
        feeds: Vec<F>,
        mut status_out: Box<dyn Write + Send>,
    ) -> Result<Arc<BankEngine>, OrchestratorError>
    where
        F: IntoIterator<Item = String>,
        F::IntoIter: Send + 'static,
    {
        let config = self.config;
        let engine = Arc::new(BankEngine::new(feeds.len() as u32, self.journal));
        let vip_queue = Arc::new(VipQueue::new());
        info!(
            agents = feeds.len(),
            vip_workers = config.vip_workers,
            "starting simulation"
        );

        let status_handle = {
            let engine = Arc::clone(&engine);
            thread::Builder::new()
                .name("status".into())
                .spawn(move || run_status_service(&engine, &mut status_out))?
        };
        let commission_handle = {
            let engine = Arc::clone(&engine);
            thread::Builder::new()
                .name("commission".into())
                .spawn(move || run_commission_service(&engine))?
        };

        let mut worker_handles = Vec::with_capacity(config.vip_workers);
        for index in 0..config.vip_workers {
            let engine = Arc::clone(&engine);
            let queue = Arc::clone(&vip_queue);
            worker_handles.push(
                thread::Builder::new()
                    .name(format!("vip-{}", index + 1))
                    .spawn(move || run_vip_worker(&engine, &queue))?,
            );
        }

        let mut agent_handles = Vec::with_capacity(feeds.len());
        for (index, feed) in feeds.into_iter().enumerate() {
            let agent = index as u32 + 1;
            let dispatcher =
                AgentDispatcher::new(Arc::clone(&engine), Arc::clone(&vip_queue), agent);
            let iter = feed.into_iter();
            agent_handles.push((
                agent,
                thread::Builder::new()
                    .name(format!("atm-{agent}"))
                    .spawn(move || dispatcher.run(iter))?,
            ));
        }

        // Agents first: their exit (feed exhausted or agent closed) is what
        // ends the stream of VIP producers.
        let mut first_parse_error = None;
        for (agent, handle) in agent_handles {
            if let Err(source) = handle.join().expect("agent dispatcher panicked") {
                first_parse_error.get_or_insert(OrchestratorError::Parse { agent, source });
            }
        }

        vip_queue.close();
        for handle in worker_handles {
            handle.join().expect("vip worker panicked");
        }

        engine.shutdown().request_stop();
        status_handle.join().expect("status service panicked");
        commission_handle.join().expect("commission service panicked");
        info!("simulation finished");

        match first_parse_error {
            Some(error) => Err(error),
            None => Ok(engine),
        }
    }
}
