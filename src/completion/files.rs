//! The five sentinel-file schemas, as named in the completion-file table:
//! `.claudio-plan.json`, `.claudio-task-complete.json`,
//! `.claudio-synthesis-complete.json`, `.claudio-revision-complete.json`,
//! `.claudio-group-consolidation-complete.json`.

use serde::{Deserialize, Serialize};

use crate::model::{Complexity, RevisionIssue, TaskId, VerificationResult};

pub const PLAN_FILE: &str = ".claudio-plan.json";
pub const TASK_COMPLETE_FILE: &str = ".claudio-task-complete.json";
pub const SYNTHESIS_COMPLETE_FILE: &str = ".claudio-synthesis-complete.json";
pub const REVISION_COMPLETE_FILE: &str = ".claudio-revision-complete.json";
pub const GROUP_CONSOLIDATION_COMPLETE_FILE: &str = ".claudio-group-consolidation-complete.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Complete,
    Blocked,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanTaskEntry {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub est_complexity: Complexity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanCompletion {
    pub objective: String,
    pub tasks: Vec<PlanTaskEntry>,
    pub execution_order: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompletion {
    pub task_id: TaskId,
    pub status: TaskStatus,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisCompletion {
    pub status: String,
    pub revision_round: u32,
    #[serde(default)]
    pub issues_found: Vec<RevisionIssue>,
    #[serde(default)]
    pub tasks_affected: Vec<TaskId>,
    #[serde(default)]
    pub integration_notes: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl SynthesisCompletion {
    pub fn needs_revision(&self) -> bool {
        !self.issues_found.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionCompletion {
    pub task_id: TaskId,
    pub revision_round: u32,
    #[serde(default)]
    pub issues_addressed: Vec<String>,
    #[serde(default)]
    pub remaining_issues: Vec<String>,
}

pub type VerificationReport = VerificationResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConsolidationCompletion {
    pub group_index: usize,
    pub status: String,
    pub branch_name: String,
    #[serde(default)]
    pub tasks_consolidated: Vec<TaskId>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub issues_for_next_group: Vec<String>,
    pub verification: VerificationReport,
}

/// A parsed sentinel file, tagged by which variant it was.
#[derive(Debug, Clone)]
pub enum CompletionFile {
    Plan(PlanCompletion),
    Task(TaskCompletion),
    Synthesis(SynthesisCompletion),
    Revision(RevisionCompletion),
    GroupConsolidation(GroupConsolidationCompletion),
}

impl CompletionFile {
    /// Parse `bytes` as whichever variant `file_name` names. Returns `None`
    /// for an unrecognized file name — callers should skip it.
    pub fn parse(file_name: &str, bytes: &[u8]) -> Option<Result<Self, serde_json::Error>> {
        match file_name {
            PLAN_FILE => Some(serde_json::from_slice::<PlanCompletion>(bytes).map(Self::Plan)),
            TASK_COMPLETE_FILE => {
                Some(serde_json::from_slice::<TaskCompletion>(bytes).map(Self::Task))
            }
            SYNTHESIS_COMPLETE_FILE => {
                Some(serde_json::from_slice::<SynthesisCompletion>(bytes).map(Self::Synthesis))
            }
            REVISION_COMPLETE_FILE => {
                Some(serde_json::from_slice::<RevisionCompletion>(bytes).map(Self::Revision))
            }
            GROUP_CONSOLIDATION_COMPLETE_FILE => Some(
                serde_json::from_slice::<GroupConsolidationCompletion>(bytes)
                    .map(Self::GroupConsolidation),
            ),
            _ => None,
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            CompletionFile::Plan(_) => PLAN_FILE,
            CompletionFile::Task(_) => TASK_COMPLETE_FILE,
            CompletionFile::Synthesis(_) => SYNTHESIS_COMPLETE_FILE,
            CompletionFile::Revision(_) => REVISION_COMPLETE_FILE,
            CompletionFile::GroupConsolidation(_) => GROUP_CONSOLIDATION_COMPLETE_FILE,
        }
    }
}
