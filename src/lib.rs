//! Coordination engine for running a multi-phase, multi-agent "ultra-plan"
//! over a single repository: planning, plan selection, grouped parallel
//! execution over a task DAG, synthesis, revision, and group consolidation.
//!
//! This crate is the engine only — it has no CLI or TUI front end. A caller
//! supplies a [`config::SessionConfig`], a [`store::SessionStore`], and
//! implementations of the [`collaborators`] traits (terminal, workspace, PR
//! driver), then drives a [`coordinator::Coordinator`] to completion.

pub mod budget;
pub mod callbacks;
pub mod collaborators;
pub mod completion;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod group_tracker;
pub mod model;
pub mod phases;
pub mod retry;
pub mod store;
pub mod supervisor;

pub use budget::{BudgetGuard, BudgetLimits, BudgetTotals};
pub use callbacks::{Callbacks, NoopCallbacks};
pub use collaborators::{MergeOutcome, PrDriver, SpawnSpec, TerminalOps, TerminalState, VerificationRun, WorkspaceOps};
pub use completion::{CompletionDetector, CompletionFile};
pub use config::{PartialSessionConfig, SessionConfig};
pub use coordinator::{Coordinator, CoordinatorInputs};
pub use error::{CoreError, CoreResult};
pub use model::{Phase, PlanSpec, Session};
pub use store::{SessionLock, SessionStore};
