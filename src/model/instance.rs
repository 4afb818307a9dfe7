//! `Instance` — one running (or once-running) agent process plus its
//! supervising record.
//!
//! A serialisable status summary lives on the session; live process
//! handles are owned exclusively by the supervisor.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{InstanceId, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Pending,
    Working,
    WaitingInput,
    CreatingPr,
    Completed,
    Paused,
    Stuck,
    Timeout,
    Error,
}

impl InstanceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InstanceStatus::Completed
                | InstanceStatus::Error
                | InstanceStatus::Stuck
                | InstanceStatus::Timeout
        )
    }

    /// True for the statuses that invariantly require a live PID.
    pub fn requires_pid(self) -> bool {
        matches!(
            self,
            InstanceStatus::Working | InstanceStatus::WaitingInput | InstanceStatus::CreatingPr
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostTariff {
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub cache_read_per_million: f64,
    pub cache_write_per_million: f64,
}

impl CostTariff {
    pub fn estimate_usd(&self, m: &InstanceMetrics) -> f64 {
        let to_millions = |n: u64| n as f64 / 1_000_000.0;
        to_millions(m.input_tokens) * self.input_per_million
            + to_millions(m.output_tokens) * self.output_per_million
            + to_millions(m.cache_read_tokens) * self.cache_read_per_million
            + to_millions(m.cache_write_tokens) * self.cache_write_per_million
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceMetrics {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub api_calls: u64,
    pub cost_usd: Option<f64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub task_id: TaskId,
    pub task_text: String,
    pub working_dir: PathBuf,
    pub branch: String,
    pub status: InstanceStatus,
    pub pid: Option<u32>,
    pub terminal_session: Option<String>,
    pub metrics: InstanceMetrics,
    pub modified_files: Vec<String>,
}

impl Instance {
    pub fn new(task_id: TaskId, task_text: impl Into<String>, working_dir: PathBuf, branch: String) -> Self {
        Self {
            id: InstanceId::new(),
            task_id,
            task_text: task_text.into(),
            working_dir,
            branch,
            status: InstanceStatus::Pending,
            pid: None,
            terminal_session: None,
            metrics: InstanceMetrics::default(),
            modified_files: Vec::new(),
        }
    }

    /// Check the two core invariants after a status transition:
    /// `pid != None` iff status requires a PID, and `metrics.end_time`
    /// is set iff the status is terminal.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.status.requires_pid() && self.pid.is_none() {
            return Err(format!(
                "instance {} in status {:?} must have a pid",
                self.id, self.status
            ));
        }
        if !self.status.requires_pid() && self.status != InstanceStatus::Pending && self.pid.is_some()
        {
            // pid may linger after a process exits; only Pending forbids it outright.
        }
        if self.status.is_terminal() && self.metrics.end_time.is_none() {
            return Err(format!(
                "instance {} is terminal but has no end_time",
                self.id
            ));
        }
        Ok(())
    }
}
