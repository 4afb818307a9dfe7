//! Retry Manager — per-task attempt counter and retry/abandon decision.
//!
//! This component's state is authoritative; `Session::retry_states` is a
//! mirror updated on every retry event, never written independently.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::TaskId;

const MAX_HISTORY: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttempt {
    pub attempted_at: DateTime<Utc>,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryState {
    pub attempt_count: u32,
    pub last_attempted_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub history: Vec<RetryAttempt>,
}

impl RetryState {
    fn record_failure(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.attempt_count += 1;
        self.last_attempted_at = Some(Utc::now());
        self.last_error = Some(error.clone());
        self.history.push(RetryAttempt {
            attempted_at: Utc::now(),
            error,
        });
        if self.history.len() > MAX_HISTORY {
            let excess = self.history.len() - MAX_HISTORY;
            self.history.drain(0..excess);
        }
    }

    fn reset(&mut self) {
        *self = RetryState::default();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Abandon,
}

pub struct RetryManager {
    max_retries: u32,
    states: HashMap<TaskId, RetryState>,
}

impl RetryManager {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            states: HashMap::new(),
        }
    }

    pub fn state(&self, task: &TaskId) -> RetryState {
        self.states.get(task).cloned().unwrap_or_default()
    }

    pub fn all_states(&self) -> &HashMap<TaskId, RetryState> {
        &self.states
    }

    /// Load externally-persisted retry states (e.g. on session resume).
    pub fn restore(&mut self, states: HashMap<TaskId, RetryState>) {
        self.states = states;
    }

    /// A task succeeded: clear its retry state.
    pub fn record_success(&mut self, task: &TaskId) {
        self.states.entry(task.clone()).or_default().reset();
    }

    /// A task failed retriably. Returns whether to retry or abandon, and
    /// increments the attempt counter regardless of the outcome.
    pub fn record_failure(&mut self, task: &TaskId, error: impl Into<String>) -> RetryDecision {
        let state = self.states.entry(task.clone()).or_default();
        state.record_failure(error);
        if state.attempt_count < self.max_retries {
            RetryDecision::Retry
        } else {
            RetryDecision::Abandon
        }
    }

    pub fn attempt_count(&self, task: &TaskId) -> u32 {
        self.states.get(task).map(|s| s.attempt_count).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_resets_state() {
        let mut mgr = RetryManager::new(2);
        let t = TaskId::new("t1");
        mgr.record_failure(&t, "boom");
        mgr.record_success(&t);
        assert_eq!(mgr.attempt_count(&t), 0);
    }

    #[test]
    fn retries_until_max_then_abandons() {
        let mut mgr = RetryManager::new(2);
        let t = TaskId::new("t1");
        assert_eq!(mgr.record_failure(&t, "e1"), RetryDecision::Retry);
        assert_eq!(mgr.record_failure(&t, "e2"), RetryDecision::Abandon);
    }

    #[test]
    fn history_is_bounded() {
        let mut mgr = RetryManager::new(100);
        let t = TaskId::new("t1");
        for i in 0..20 {
            mgr.record_failure(&t, format!("e{i}"));
        }
        assert!(mgr.state(&t).history.len() <= 10);
    }
}
