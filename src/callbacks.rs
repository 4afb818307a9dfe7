//! The `Callbacks` sink: the one trait every phase executor and the
//! coordinator itself emits lifecycle events through. All methods have a
//! no-op default so a caller only overrides the events it cares about.

use crate::model::{InstanceId, Phase, PlanSpec, TaskId};

pub trait Callbacks: Send + Sync {
    fn on_phase_change(&self, _phase: Phase) {}
    fn on_plan_ready(&self, _plan: &PlanSpec) {}
    fn on_task_start(&self, _task: &TaskId, _instance: &InstanceId) {}
    fn on_task_complete(&self, _task: &TaskId) {}
    fn on_task_failed(&self, _task: &TaskId, _reason: &str) {}
    fn on_group_complete(&self, _group_index: usize) {}
    fn on_progress(&self, _completed: usize, _total: usize, _phase: Phase) {}
    fn on_complete(&self, _success: bool, _summary: &str) {}
    fn on_budget_exceeded(&self) {}
}

/// A `Callbacks` sink that does nothing; the default for callers that only
/// want the side effects (logging, persistence) the coordinator performs on
/// its own.
pub struct NoopCallbacks;

impl Callbacks for NoopCallbacks {}
