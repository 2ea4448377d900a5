//! Agent registry: closed flags and pending close requests.
//!
//! An administrative close takes effect only at an agent-safe point: the
//! requesting operation parks the requestor's id here, and the status
//! service performs the actual transition on its next tick (logging it as
//! the bank). A closed agent stays closed for the lifetime of the engine;
//! rollback never reopens one.

use std::sync::Mutex;

use thiserror::Error;

use crate::models::account::AgentId;

/// Errors from an agent-close request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CloseRequestError {
    #[error("ATM {0} does not exist")]
    UnknownAgent(AgentId),
    #[error("ATM {0} is already in a closed state")]
    AlreadyClosed(AgentId),
}

#[derive(Debug)]
struct AgentFlags {
    closed: Vec<bool>,
    /// Requestor id per target, kept only for the close log line.
    pending_close: Vec<Option<AgentId>>,
}

/// Closed/pending state for agents `1..=count`, under one mutex.
#[derive(Debug)]
pub struct AgentRegistry {
    flags: Mutex<AgentFlags>,
    count: u32,
}

impl AgentRegistry {
    pub fn new(count: u32) -> Self {
        let size = count as usize + 1; // index by agent id, slot 0 unused
        Self {
            flags: Mutex::new(AgentFlags {
                closed: vec![false; size],
                pending_close: vec![None; size],
            }),
            count,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Whether `agent` is closed. Out-of-range ids read as closed.
    pub fn is_closed(&self, agent: AgentId) -> bool {
        if agent == 0 || agent > self.count {
            return true;
        }
        self.flags.lock().unwrap().closed[agent as usize]
    }

    /// Park a close request for `target` on behalf of `requestor`. Fails
    /// when the target is unknown, already closed, or already pending.
    pub fn request_close(
        &self,
        requestor: AgentId,
        target: AgentId,
    ) -> Result<(), CloseRequestError> {
        if target == 0 || target > self.count {
            return Err(CloseRequestError::UnknownAgent(target));
        }
        let mut flags = self.flags.lock().unwrap();
        let index = target as usize;
        if flags.closed[index] || flags.pending_close[index].is_some() {
            return Err(CloseRequestError::AlreadyClosed(target));
        }
        flags.pending_close[index] = Some(requestor);
        Ok(())
    }

    /// Promote every pending request to closed, returning
    /// `(requestor, target)` pairs in ascending target order for logging.
    pub fn take_effect(&self) -> Vec<(AgentId, AgentId)> {
        let mut flags = self.flags.lock().unwrap();
        let mut applied = Vec::new();
        for target in 1..=self.count as usize {
            if let Some(requestor) = flags.pending_close[target].take() {
                if !flags.closed[target] {
                    flags.closed[target] = true;
                    applied.push((requestor, target as AgentId));
                }
            }
        }
        applied
    }
}
