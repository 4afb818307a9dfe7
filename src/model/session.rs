//! `Session` — the top-level, session-scoped object, and the `Phase`
//! state machine it walks: `Planning -> PlanSelection -> Refresh ->
//! Executing -> Synthesis -> Revision -> Consolidating -> Complete`,
//! with a revision loop back to `Executing` and a `Failed` escape from
//! every non-terminal phase.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{InstanceId, SessionId, TaskId};
use super::instance::Instance;
use super::plan::PlanSpec;
use crate::retry::RetryState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    PlanSelection,
    Refresh,
    Executing,
    Synthesis,
    Revision,
    Consolidating,
    Complete,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Complete | Phase::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::PlanSelection => "plan_selection",
            Phase::Refresh => "refresh",
            Phase::Executing => "executing",
            Phase::Synthesis => "synthesis",
            Phase::Revision => "revision",
            Phase::Consolidating => "consolidating",
            Phase::Complete => "complete",
            Phase::Failed => "failed",
        }
    }

    /// Whether `self -> next` is an allowed transition. Any non-terminal
    /// phase may transition to `Failed`.
    pub fn can_transition_to(self, next: Phase) -> bool {
        if next == Phase::Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Phase::Planning, Phase::PlanSelection)
                | (Phase::Planning, Phase::Refresh) // single-pass planning may skip selection
                | (Phase::PlanSelection, Phase::Refresh)
                | (Phase::Refresh, Phase::Executing)
                | (Phase::Executing, Phase::Synthesis)
                | (Phase::Synthesis, Phase::Revision)
                | (Phase::Synthesis, Phase::Consolidating)
                | (Phase::Revision, Phase::Executing)
                | (Phase::Consolidating, Phase::Complete)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionIssue {
    pub task_id: TaskId,
    pub description: String,
    pub severity: String,
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisSnapshot {
    pub status: String,
    pub revision_round: u32,
    pub issues_found: Vec<RevisionIssue>,
    pub tasks_affected: Vec<TaskId>,
    pub integration_notes: String,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionSnapshot {
    pub task_id: TaskId,
    pub revision_round: u32,
    pub issues_addressed: Vec<String>,
    pub remaining_issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub project_type: String,
    pub commands_run: Vec<String>,
    pub overall_success: bool,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConsolidationContext {
    pub group_index: usize,
    pub branch_name: String,
    pub tasks_consolidated: Vec<TaskId>,
    pub notes: String,
    pub issues_for_next_group: Vec<String>,
    pub verification: VerificationResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationSnapshot {
    pub group_index: usize,
    pub status: String,
    pub context: GroupConsolidationContext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub label: String,
    pub objective: String,
    pub phase: Phase,
    pub plan: Option<PlanSpec>,
    pub instances: Vec<Instance>,
    pub retry_states: HashMap<TaskId, RetryState>,
    pub task_to_instance: HashMap<TaskId, InstanceId>,
    pub completed_tasks: BTreeSet<TaskId>,
    pub failed_tasks: BTreeSet<TaskId>,
    pub current_group: usize,
    pub synthesis_snapshot: Option<SynthesisSnapshot>,
    pub revision_snapshot: Option<RevisionSnapshot>,
    pub consolidation_snapshot: Option<ConsolidationSnapshot>,
    pub group_consolidations: BTreeMap<usize, GroupConsolidationContext>,
    pub budget_tripped: bool,
    /// URLs returned by the PR driver, one per consolidated group that has
    /// had a pull request opened against it. Checked before opening a PR so
    /// resuming a session that already reached `Consolidating` doesn't open
    /// duplicates.
    pub pull_requests: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(label: impl Into<String>, objective: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            label: label.into(),
            objective: objective.into(),
            phase: Phase::Planning,
            plan: None,
            instances: Vec::new(),
            retry_states: HashMap::new(),
            task_to_instance: HashMap::new(),
            completed_tasks: BTreeSet::new(),
            failed_tasks: BTreeSet::new(),
            current_group: 0,
            synthesis_snapshot: None,
            revision_snapshot: None,
            consolidation_snapshot: None,
            group_consolidations: BTreeMap::new(),
            budget_tripped: false,
            pull_requests: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn instance(&self, id: &InstanceId) -> Option<&Instance> {
        self.instances.iter().find(|i| &i.id == id)
    }

    pub fn instance_mut(&mut self, id: &InstanceId) -> Option<&mut Instance> {
        self.instances.iter_mut().find(|i| &i.id == id)
    }

    pub fn running_instance_count(&self) -> usize {
        self.instances
            .iter()
            .filter(|i| {
                matches!(
                    i.status,
                    super::instance::InstanceStatus::Working
                        | super::instance::InstanceStatus::WaitingInput
                )
            })
            .count()
    }

    /// If the session is terminal, nothing should be running.
    pub fn check_invariants(&self) -> Result<(), String> {
        if !self.completed_tasks.is_disjoint(&self.failed_tasks) {
            return Err("a task cannot be both completed and failed".into());
        }
        if self.phase.is_terminal() && self.running_instance_count() != 0 {
            return Err("terminal session must have zero running instances".into());
        }
        for i in &self.instances {
            i.check_invariants()?;
        }
        Ok(())
    }
}
