//! Coordinator — owns one `Session` end to end: walks the phase state
//! machine, hands each phase off to its executor in [`crate::phases`],
//! drives the DAG scheduler's admission loop, folds supervisor events into
//! the budget guard, and persists through the session store after every
//! mutation so a crash mid-run can be resumed.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::budget::{BudgetGuard, BudgetLimits};
use crate::callbacks::Callbacks;
use crate::collaborators::{PrDriver, TerminalOps, TerminalState, WorkspaceOps};
use crate::completion::CompletionDetector;
use crate::config::SessionConfig;
use crate::error::{CoreError, CoreResult};
use crate::group_tracker::GroupTracker;
use crate::model::{
    derive_branch_name, Instance, InstanceId, InstanceStatus, Phase, PlanSpec, PlannedTask, Session,
    TaskId,
};
use crate::phases::{
    run_execute_group, run_group_consolidation, run_planning, run_revision_task, run_synthesis,
    select_plan, TaskRunOutcome,
};
use crate::retry::{RetryDecision, RetryManager};
use crate::store::{SessionLock, SessionStore};
use crate::supervisor::{SupervisorConfig, SupervisorEvent, TimeoutKind};

/// Everything a coordinator run needs beyond the tunables already carried
/// on `SessionConfig`: the objective text, a human label, and the shell
/// command used to verify each consolidated group.
pub struct CoordinatorInputs {
    pub label: String,
    pub objective: String,
    pub verification_command: String,
}

pub struct Coordinator {
    session: Session,
    config: SessionConfig,
    verification_command: String,
    retry: RetryManager,
    budget: BudgetGuard,
    store: SessionStore,
    workspace: Arc<dyn WorkspaceOps>,
    terminal: Arc<dyn TerminalOps>,
    pr_driver: Arc<dyn PrDriver>,
    callbacks: Arc<dyn Callbacks>,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
    supervisor_config: SupervisorConfig,
    detector: CompletionDetector,
}

impl Coordinator {
    pub fn new(
        inputs: CoordinatorInputs,
        config: SessionConfig,
        store: SessionStore,
        workspace: Arc<dyn WorkspaceOps>,
        terminal: Arc<dyn TerminalOps>,
        pr_driver: Arc<dyn PrDriver>,
        callbacks: Arc<dyn Callbacks>,
    ) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let supervisor_config = SupervisorConfig {
            capture_interval: Duration::from_millis(config.capture_interval_ms),
            timeouts: crate::supervisor::TimeoutConfig::from_minutes(
                config.activity_timeout_minutes,
                config.completion_timeout_minutes,
            ),
            tail_lines: 200,
        };
        let budget = BudgetGuard::new(BudgetLimits {
            max_total_cost_usd: config.budget_cost_cap_usd,
            max_tokens_per_instance: config.budget_token_cap,
        });
        Self {
            session: Session::new(inputs.label, inputs.objective),
            retry: RetryManager::new(config.max_retries),
            verification_command: inputs.verification_command,
            budget,
            store,
            workspace,
            terminal,
            pr_driver,
            callbacks,
            cancel_tx,
            cancel_rx,
            detector: CompletionDetector::new(Duration::from_millis(500)),
            supervisor_config,
            config,
        }
    }

    /// Reconstruct a coordinator around a session loaded from disk, for
    /// resuming after a crash or restart. No liveness check happens here;
    /// `run_one_group`'s `reconcile_in_flight_instances` step does that the
    /// first time it runs for the session's current group, reattaching
    /// instances whose terminal session is still alive and pausing the rest
    /// before any admission happens.
    pub fn resume(
        session: Session,
        config: SessionConfig,
        verification_command: String,
        store: SessionStore,
        workspace: Arc<dyn WorkspaceOps>,
        terminal: Arc<dyn TerminalOps>,
        pr_driver: Arc<dyn PrDriver>,
        callbacks: Arc<dyn Callbacks>,
    ) -> Self {
        let mut retry = RetryManager::new(config.max_retries);
        retry.restore(session.retry_states.clone());
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let supervisor_config = SupervisorConfig {
            capture_interval: Duration::from_millis(config.capture_interval_ms),
            timeouts: crate::supervisor::TimeoutConfig::from_minutes(
                config.activity_timeout_minutes,
                config.completion_timeout_minutes,
            ),
            tail_lines: 200,
        };
        let budget = BudgetGuard::new(BudgetLimits {
            max_total_cost_usd: config.budget_cost_cap_usd,
            max_tokens_per_instance: config.budget_token_cap,
        });
        Self {
            session,
            retry,
            verification_command,
            budget,
            store,
            workspace,
            terminal,
            pr_driver,
            callbacks,
            cancel_tx,
            cancel_rx,
            detector: CompletionDetector::new(Duration::from_millis(500)),
            supervisor_config,
            config,
        }
    }

    /// Request cooperative cancellation. Running instances finish their
    /// current poll tick and stop; `run` returns once they've all drained.
    pub fn stop(&self) {
        let _ = self.cancel_tx.send(true);
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn set_phase(&mut self, phase: Phase) {
        if !self.session.phase.can_transition_to(phase) {
            warn!(from = ?self.session.phase, to = ?phase, "ignoring illegal phase transition");
            return;
        }
        self.session.phase = phase;
        self.session.updated_at = chrono::Utc::now();
        self.callbacks.on_phase_change(phase);
    }

    fn persist(&self) -> CoreResult<()> {
        self.store.save(&self.session)
    }

    /// Drive the session from `Planning` through to `Complete`/`Failed`.
    pub async fn run(mut self) -> CoreResult<()> {
        let lock = self.store.start_session(&self.session)?;
        let result = self.run_inner().await;
        if let Err(e) = &result {
            self.session.phase = Phase::Failed;
            self.callbacks.on_complete(false, &e.to_string());
            let _ = self.persist();
        }
        self.store.stop_session(lock);
        result
    }

    /// Drives phases in order, but only the ones the loaded session hasn't
    /// already passed: a fresh session starts at `Planning`, a resumed one
    /// re-enters whatever phase it was persisted in and falls through from
    /// there, so nothing already completed (plan, finished groups, prior
    /// synthesis rounds) is redone and no task is started twice.
    async fn run_inner(&mut self) -> CoreResult<()> {
        info!(objective = %self.session.objective, phase = ?self.session.phase, "starting session");

        if self.session.phase.is_terminal() {
            return Ok(());
        }

        if self.session.phase == Phase::Planning {
            // `set_phase` would no-op here since Planning -> Planning isn't a
            // legal transition; the initial phase still deserves its event.
            self.callbacks.on_phase_change(Phase::Planning);
        }
        self.persist()?;

        if self.session.plan.is_none() {
            let candidates = run_planning(
                &self.session.objective,
                self.config.plan_candidates,
                &self.config.base_branch,
                self.workspace.clone(),
                self.terminal.clone(),
                &self.supervisor_config,
                &self.detector,
                self.cancel_rx.clone(),
            )
            .await?;

            let chosen = if candidates.len() > 1 {
                self.set_phase(Phase::PlanSelection);
                select_plan(candidates)
            } else {
                candidates.into_iter().next().ok_or_else(|| CoreError::SessionFatal(
                    "planning produced no candidates".into(),
                ))?
            };
            self.callbacks.on_plan_ready(&chosen);
            self.session.plan = Some(chosen);
            self.set_phase(Phase::Refresh);
            self.persist()?;
        }

        if self.session.phase == Phase::Refresh {
            self.set_phase(Phase::Executing);
            self.persist()?;
        }

        if self.session.phase == Phase::Executing {
            self.run_all_groups().await?;
        }

        if matches!(self.session.phase, Phase::Executing | Phase::Synthesis | Phase::Revision) {
            self.run_synthesis_loop().await?;
        }

        if self.session.phase != Phase::Complete {
            self.set_phase(Phase::Consolidating);
            self.persist()?;
            self.open_pull_requests()?;
            self.set_phase(Phase::Complete);
            self.callbacks.on_complete(true, "session completed");
            self.persist()?;
        }
        Ok(())
    }

    /// Opens one pull request per consolidated group that doesn't already
    /// have one, skipping groups still carrying unresolved merge conflicts.
    /// Runs once per session: resuming into (or past) `Consolidating` with
    /// `pull_requests` already populated is a no-op, so a crash after some
    /// PRs were opened doesn't reopen them on restart.
    fn open_pull_requests(&mut self) -> CoreResult<()> {
        if self.session.group_consolidations.is_empty() {
            return Ok(());
        }
        let already_opened = self.session.pull_requests.len();
        let pending: Vec<_> = self
            .session
            .group_consolidations
            .values()
            .skip(already_opened)
            .cloned()
            .collect();
        for ctx in pending {
            let title = format!("{}: group {}", self.session.objective, ctx.group_index);
            let body = format!(
                "{}\n\nTasks consolidated: {}\n\n{}",
                ctx.notes,
                ctx.tasks_consolidated
                    .iter()
                    .map(|t| t.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
                ctx.verification.summary,
            );
            let url = self.pr_driver.open_pr(&ctx.branch_name, &title, &body)?;
            self.session.pull_requests.push(url);
            self.persist()?;
        }
        Ok(())
    }

    /// Runs (or resumes) the synthesis/revision loop that follows group
    /// execution. On resume into `Revision`, finishes the in-flight revision
    /// round from the persisted issue list before re-entering synthesis.
    async fn run_synthesis_loop(&mut self) -> CoreResult<()> {
        let mut revision_round = self
            .session
            .synthesis_snapshot
            .as_ref()
            .map(|s| s.revision_round)
            .unwrap_or(0);

        if self.session.phase == Phase::Revision {
            if let Some(snapshot) = self.session.synthesis_snapshot.clone() {
                self.run_revision_round(&snapshot.issues_found).await?;
                revision_round += 1;
            }
            self.set_phase(Phase::Executing);
        }

        loop {
            self.set_phase(Phase::Synthesis);
            let plan = self.session.plan.clone().expect("plan set before synthesis");
            let consolidation_dir = self
                .workspace
                .create_worktree(&format!("synthesis-round-{revision_round}"), &self.config.base_branch)?;
            let snapshot = run_synthesis(
                &plan.objective,
                consolidation_dir,
                revision_round,
                self.terminal.clone(),
                self.workspace.clone(),
                &self.supervisor_config,
                &self.detector,
                self.cancel_rx.clone(),
            )
            .await?;
            let needs_revision = !snapshot.issues_found.is_empty();
            self.session.synthesis_snapshot = Some(snapshot.clone());
            self.persist()?;

            if needs_revision && revision_round < self.config.max_revision_rounds {
                self.set_phase(Phase::Revision);
                self.run_revision_round(&snapshot.issues_found).await?;
                revision_round += 1;
                self.set_phase(Phase::Executing);
                continue;
            }
            break;
        }
        Ok(())
    }

    async fn run_all_groups(&mut self) -> CoreResult<()> {
        let plan = self.session.plan.clone().expect("plan set before executing groups");
        let group_count = GroupTracker::new(&plan).group_count();
        while self.session.current_group < group_count {
            if *self.cancel_rx.borrow() {
                return Err(CoreError::SessionFatal("cancelled".into()));
            }
            self.run_one_group(&plan).await?;
        }
        Ok(())
    }

    async fn run_one_group(&mut self, plan: &PlanSpec) -> CoreResult<()> {
        let group_index = self.session.current_group;
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<SupervisorEvent>();
        let (mut started, mut running) =
            self.reconcile_in_flight_instances(group_index, plan, event_tx.clone());
        self.persist()?;

        loop {
            if *self.cancel_rx.borrow() {
                return Err(CoreError::SessionFatal("cancelled".into()));
            }

            let tracker = GroupTracker::new(plan);

            // Tasks whose ancestors failed can never satisfy `ready_in_group`,
            // so without this they're never counted and the group's
            // completion check spins forever.
            for t in tracker.transitively_failed(group_index, &self.session.failed_tasks) {
                if self.session.failed_tasks.insert(t.clone()) {
                    self.callbacks.on_task_failed(&t, "an ancestor task failed");
                }
            }

            if !self.session.budget_tripped {
                let ready = tracker.ready_in_group(
                    group_index,
                    &self.session.completed_tasks,
                    &self.session.failed_tasks,
                    &started,
                );
                for task_id in ready {
                    if running.len() >= self.config.max_parallel {
                        break;
                    }
                    let task = plan.task(&task_id).cloned().expect("ready task exists in plan");
                    started.insert(task_id.clone());
                    let instance_id = self.spawn_task(task, group_index, event_tx.clone(), &mut running);
                    self.callbacks.on_task_start(&task_id, &instance_id);
                }
            }

            while let Ok(event) = event_rx.try_recv() {
                self.apply_supervisor_event(event);
            }

            let finished_task = running.iter().find(|(_, (_, h))| h.is_finished()).map(|(t, _)| t.clone());
            let Some(task_id) = finished_task else {
                let progress = tracker.progress(group_index, &self.session.completed_tasks, &self.session.failed_tasks);
                if progress.is_finished() && running.is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            };

            let (instance_id, handle) = running.remove(&task_id).expect("task present in running map");
            let should_retry = match handle.await {
                Ok(Ok(outcome)) => self.apply_task_outcome(&task_id, outcome),
                Ok(Err(e)) => self.handle_task_failure(&task_id, instance_id, e.to_string()),
                Err(join_err) => self.handle_task_failure(
                    &task_id,
                    instance_id,
                    format!("instance task panicked: {join_err}"),
                ),
            };
            if should_retry {
                started.remove(&task_id);
            }
            self.callbacks.on_progress(
                self.session.completed_tasks.len(),
                plan.tasks.len(),
                self.session.phase,
            );
            self.persist()?;
        }

        self.consolidate_group(group_index, plan).await?;
        self.session.current_group += 1;
        self.persist()?;
        Ok(())
    }

    /// Scans every task in `group_index` already bound to an instance
    /// (`task_to_instance`) that isn't completed or failed — survivors of a
    /// crash between two persisted states. A task whose terminal session is
    /// still alive is reattached under its *existing* instance id, so
    /// `InstanceSupervisor::start`'s own `session_exists` check reconnects
    /// to the live session instead of spawning a second one; it's marked
    /// `Working` and registered in the returned `started`/`running` so the
    /// admission loop below doesn't also try to start it. A task whose
    /// session is gone is marked `Paused` and left out of both sets, so the
    /// next admission tick spawns a fresh instance for it exactly once.
    fn reconcile_in_flight_instances(
        &mut self,
        group_index: usize,
        plan: &PlanSpec,
        event_tx: mpsc::UnboundedSender<SupervisorEvent>,
    ) -> (
        BTreeSet<TaskId>,
        HashMap<TaskId, (InstanceId, JoinHandle<CoreResult<TaskRunOutcome>>)>,
    ) {
        let tracker = GroupTracker::new(plan);
        let group = tracker.group(group_index).cloned().unwrap_or_default();
        let mut started = BTreeSet::new();
        let mut running = HashMap::new();

        let in_flight: Vec<(TaskId, InstanceId)> = self
            .session
            .task_to_instance
            .iter()
            .filter(|(task_id, _)| {
                group.contains(*task_id)
                    && !self.session.completed_tasks.contains(*task_id)
                    && !self.session.failed_tasks.contains(*task_id)
            })
            .map(|(t, i)| (t.clone(), i.clone()))
            .collect();

        for (task_id, instance_id) in in_flight {
            let Some(session_name) =
                self.session.instance(&instance_id).and_then(|i| i.terminal_session.clone())
            else {
                continue;
            };
            let Some(task) = plan.task(&task_id).cloned() else { continue };

            if self.terminal.session_exists(&session_name) {
                if let Some(inst) = self.session.instance_mut(&instance_id) {
                    inst.status = InstanceStatus::Working;
                }
                let handle =
                    self.spawn_task_handle(instance_id.clone(), task, group_index, event_tx.clone());
                started.insert(task_id.clone());
                running.insert(task_id, (instance_id, handle));
            } else if let Some(inst) = self.session.instance_mut(&instance_id) {
                inst.status = InstanceStatus::Paused;
            }
        }
        (started, running)
    }

    /// Mints one instance ID for this attempt and registers its `Instance`
    /// in the session *before* spawning, so `apply_supervisor_event`'s
    /// lookups can find it the moment the first state/metrics event arrives
    /// rather than only once the task completes.
    fn spawn_task(
        &mut self,
        task: PlannedTask,
        group_index: usize,
        event_tx: mpsc::UnboundedSender<SupervisorEvent>,
        running: &mut HashMap<TaskId, (InstanceId, JoinHandle<CoreResult<TaskRunOutcome>>)>,
    ) -> InstanceId {
        let instance_id = InstanceId::new();
        let task_id = task.id.clone();
        let include_id = self.config.include_instance_id_in_branch;
        let branch = derive_branch_name(&task, include_id.then(|| instance_id.short()));

        let mut instance = Instance::new(
            task.id.clone(),
            task.title.clone(),
            std::path::PathBuf::new(),
            branch,
        );
        instance.id = instance_id.clone();
        instance.terminal_session = Some(format!("task-{}", instance_id.short()));
        self.session.task_to_instance.insert(task_id.clone(), instance_id.clone());
        self.session.instances.push(instance);

        let handle = self.spawn_task_handle(instance_id.clone(), task, group_index, event_tx);
        running.insert(task_id, (instance_id.clone(), handle));
        instance_id
    }

    /// Builds the future that drives one task instance to completion and
    /// hands it to `tokio::spawn`. Shared by a fresh `spawn_task` and by
    /// `reconcile_in_flight_instances`'s reattach path — the only
    /// difference between the two is whether `instance_id` (and thus the
    /// derived branch/session name) is freshly minted or reused from a
    /// prior run.
    fn spawn_task_handle(
        &self,
        instance_id: InstanceId,
        task: PlannedTask,
        group_index: usize,
        event_tx: mpsc::UnboundedSender<SupervisorEvent>,
    ) -> JoinHandle<CoreResult<TaskRunOutcome>> {
        let include_id = self.config.include_instance_id_in_branch;
        let base_branch = self.config.base_branch.clone();
        let require_commits = self.config.require_commits;
        let workspace = self.workspace.clone();
        let terminal = self.terminal.clone();
        let supervisor_config = self.supervisor_config.clone();
        let detector = self.detector.clone();
        let cancel = self.cancel_rx.clone();
        let prompt_prefix = self.task_prompt_prefix(group_index);

        tokio::spawn(async move {
            run_execute_group(
                instance_id,
                &task,
                &base_branch,
                include_id,
                require_commits,
                &prompt_prefix,
                workspace,
                terminal,
                &supervisor_config,
                &detector,
                cancel,
                move |event| {
                    let _ = event_tx.send(event);
                },
            )
            .await
        })
    }

    /// Prompt prefix for a task in `group_index`: the fixed instruction,
    /// plus the previous group's consolidation warnings (if any) so tasks
    /// in the next group don't repeat issues synthesis already flagged.
    fn task_prompt_prefix(&self, group_index: usize) -> String {
        const BASE: &str = "Complete the following task and commit your work.";
        let warnings = group_index
            .checked_sub(1)
            .and_then(|prev| self.session.group_consolidations.get(&prev))
            .filter(|ctx| !ctx.issues_for_next_group.is_empty())
            .map(|ctx| ctx.issues_for_next_group.join("\n- "));
        match warnings {
            Some(warnings) => format!("{BASE}\n\nWarnings carried over from the previous group:\n- {warnings}"),
            None => BASE.to_string(),
        }
    }

    fn apply_supervisor_event(&mut self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::StateChanged { instance, state } => {
                if let Some(inst) = self.session.instance_mut(&instance) {
                    inst.status = terminal_state_to_instance_status(state);
                }
            }
            SupervisorEvent::MetricsUpdated { instance, metrics } => {
                let tripped = self.budget.record(&instance, &metrics);
                if let Some(inst) = self.session.instance_mut(&instance) {
                    inst.metrics = metrics;
                }
                if tripped && !self.session.budget_tripped {
                    self.session.budget_tripped = true;
                    self.callbacks.on_budget_exceeded();
                    self.pause_working_instances();
                }
            }
            SupervisorEvent::TimedOut { .. } | SupervisorEvent::Bell { .. } => {}
        }
    }

    /// Pauses every currently `Working` instance's terminal session on a
    /// budget trip. `budget_tripped` already stops new admission; this
    /// stops instances already running rather than letting them finish.
    fn pause_working_instances(&mut self) {
        let sessions: Vec<(InstanceId, String)> = self
            .session
            .instances
            .iter()
            .filter(|i| i.status == InstanceStatus::Working)
            .filter_map(|i| i.terminal_session.clone().map(|s| (i.id.clone(), s)))
            .collect();
        for (instance_id, session_name) in sessions {
            if let Err(e) = self.terminal.pause(&session_name) {
                warn!(%instance_id, error = %e, "failed to pause instance on budget trip");
                continue;
            }
            if let Some(inst) = self.session.instance_mut(&instance_id) {
                inst.status = InstanceStatus::Paused;
            }
        }
    }

    /// Applies a finished task's outcome to session state. Returns `true` iff
    /// the task was retriable and not yet abandoned, so the caller should
    /// re-admit it (clear it from its local `started` set) on the next tick.
    fn apply_task_outcome(&mut self, task_id: &TaskId, outcome: TaskRunOutcome) -> bool {
        let mut instance = outcome.instance;
        instance.status = if outcome.success {
            InstanceStatus::Completed
        } else {
            match outcome.timeout_kind {
                Some(TimeoutKind::Activity) | Some(TimeoutKind::Stale) => InstanceStatus::Stuck,
                Some(TimeoutKind::Completion) => InstanceStatus::Timeout,
                None => InstanceStatus::Error,
            }
        };
        instance.metrics.end_time = Some(chrono::Utc::now());
        self.session.task_to_instance.insert(task_id.clone(), instance.id.clone());
        if let Some(existing) = self.session.instance_mut(&instance.id) {
            *existing = instance;
        } else {
            self.session.instances.push(instance);
        }

        let should_retry = if outcome.success {
            self.retry.record_success(task_id);
            self.session.completed_tasks.insert(task_id.clone());
            self.callbacks.on_task_complete(task_id);
            false
        } else if outcome.retriable {
            match self.retry.record_failure(task_id, outcome.reason.clone()) {
                RetryDecision::Retry => {
                    warn!(task = %task_id, reason = %outcome.reason, "task failed, retrying");
                    true
                }
                RetryDecision::Abandon => {
                    self.session.failed_tasks.insert(task_id.clone());
                    self.callbacks.on_task_failed(task_id, &outcome.reason);
                    false
                }
            }
        } else {
            self.session.failed_tasks.insert(task_id.clone());
            self.callbacks.on_task_failed(task_id, &outcome.reason);
            false
        };
        self.session.retry_states = self.retry.all_states().clone();
        should_retry
    }

    /// Same contract as [`Self::apply_task_outcome`] but for a task whose
    /// supervised instance itself errored or panicked before producing an
    /// outcome (no instance record to persist).
    fn handle_task_failure(&mut self, task_id: &TaskId, instance_id: InstanceId, reason: String) -> bool {
        let should_retry = match self.retry.record_failure(task_id, reason.clone()) {
            RetryDecision::Retry => {
                warn!(task = %task_id, %reason, "task instance errored, retrying");
                true
            }
            RetryDecision::Abandon => {
                self.session.failed_tasks.insert(task_id.clone());
                self.callbacks.on_task_failed(task_id, &reason);
                false
            }
        };
        self.session.retry_states = self.retry.all_states().clone();
        if let Some(inst) = self.session.instance_mut(&instance_id) {
            inst.status = InstanceStatus::Error;
            inst.metrics.end_time = Some(chrono::Utc::now());
        }
        should_retry
    }

    async fn consolidate_group(&mut self, group_index: usize, plan: &PlanSpec) -> CoreResult<()> {
        let tracker = GroupTracker::new(plan);
        let group = tracker.group(group_index).cloned().unwrap_or_default();
        let task_branches: Vec<String> = self
            .session
            .instances
            .iter()
            .filter(|i| group.contains(&i.task_id) && self.session.completed_tasks.contains(&i.task_id))
            .map(|i| i.branch.clone())
            .collect();

        if task_branches.is_empty() {
            return Ok(());
        }

        let base_branch = match group_index.checked_sub(1).and_then(|prev| self.session.group_consolidations.get(&prev)) {
            Some(prev_ctx) => prev_ctx.branch_name.clone(),
            None => self.config.base_branch.clone(),
        };
        let target_dir = self
            .workspace
            .create_worktree(&format!("consolidate/group-{group_index}"), &base_branch)?;

        let ctx = run_group_consolidation(
            group_index,
            &self.session.objective,
            target_dir,
            &task_branches,
            &self.verification_command,
            self.workspace.clone(),
            self.terminal.clone(),
            &self.supervisor_config,
            &self.detector,
            self.cancel_rx.clone(),
        )
        .await?;

        self.callbacks.on_group_complete(group_index);
        self.session.group_consolidations.insert(group_index, ctx.clone());
        self.session.consolidation_snapshot = Some(crate::model::ConsolidationSnapshot {
            group_index,
            status: "ok".to_string(),
            context: ctx,
        });
        Ok(())
    }

    async fn run_revision_round(&mut self, issues: &[crate::model::RevisionIssue]) -> CoreResult<()> {
        let mut by_task: HashMap<TaskId, Vec<String>> = HashMap::new();
        for issue in issues {
            by_task.entry(issue.task_id.clone()).or_default().push(issue.description.clone());
        }

        for (task_id, descriptions) in by_task {
            let Some(instance_id) = self.session.task_to_instance.get(&task_id).cloned() else {
                continue;
            };
            let Some(instance) = self.session.instance(&instance_id) else {
                continue;
            };
            let working_dir = instance.working_dir.clone();
            let branch = instance.branch.clone();
            let round = self.session.synthesis_snapshot.as_ref().map(|s| s.revision_round).unwrap_or(0);

            let snapshot = run_revision_task(
                &task_id,
                working_dir,
                branch,
                round,
                &descriptions,
                self.terminal.clone(),
                &self.supervisor_config,
                &self.detector,
                self.cancel_rx.clone(),
            )
            .await?;

            if snapshot.remaining_issues.is_empty() {
                self.session.failed_tasks.remove(&task_id);
                self.session.completed_tasks.insert(task_id.clone());
            }
            self.session.revision_snapshot = Some(snapshot);
            self.persist()?;
        }
        Ok(())
    }
}

fn terminal_state_to_instance_status(state: TerminalState) -> InstanceStatus {
    match state {
        TerminalState::Working => InstanceStatus::Working,
        TerminalState::WaitingInput | TerminalState::WaitingQuestion | TerminalState::WaitingPermission => {
            InstanceStatus::WaitingInput
        }
        TerminalState::PrOpened => InstanceStatus::CreatingPr,
        TerminalState::Completed => InstanceStatus::Completed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::fakes::RecordingCallbacks;
    use crate::collaborators::fakes::{FakePrDriver, FakeTerminal, FakeWorkspace};

    fn test_coordinator(tmp: &std::path::Path) -> Coordinator {
        let config = SessionConfig {
            plan_candidates: 1,
            capture_interval_ms: 1,
            ..SessionConfig::default()
        };
        Coordinator::new(
            CoordinatorInputs {
                label: "lbl".into(),
                objective: "ship it".into(),
                verification_command: "true".into(),
            },
            config,
            SessionStore::new(tmp),
            Arc::new(FakeWorkspace),
            Arc::new(FakeTerminal::default()),
            Arc::new(FakePrDriver),
            Arc::new(RecordingCallbacks::default()),
        )
    }

    #[test]
    fn new_session_starts_in_planning_phase() {
        let tmp = tempfile::tempdir().unwrap();
        let coord = test_coordinator(tmp.path());
        assert_eq!(coord.session().phase, Phase::Planning);
    }

    #[test]
    fn stop_requests_cancellation() {
        let tmp = tempfile::tempdir().unwrap();
        let coord = test_coordinator(tmp.path());
        coord.stop();
        assert!(*coord.cancel_rx.borrow());
    }
}
