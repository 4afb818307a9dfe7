//! The data model shared by every other component: stable identifiers,
//! the planned-task DAG and its editor, instances, and the session that
//! owns them all.

mod editor;
mod ids;
mod instance;
mod plan;
mod session;
mod task;

pub use editor::{
    add_task, delete_task, merge_tasks, move_task_down, move_task_up, split_task,
    update_task_dependencies, update_task_text, validate_plan_for_editor, Severity,
    ValidationFinding,
};
pub use ids::{InstanceId, SessionId, TaskId};
pub use instance::{CostTariff, Instance, InstanceMetrics, InstanceStatus};
pub use plan::{DependencyGraph, Group, PlanSpec};
pub use session::{
    ConsolidationSnapshot, GroupConsolidationContext, Phase, RevisionIssue, RevisionSnapshot,
    Session, SynthesisSnapshot, VerificationResult,
};
pub use task::{derive_branch_name, Complexity, PlannedTask, Priority};
