//! Instance Supervisor — owns one agent process per instance: starts it,
//! polls its terminal output, classifies state, parses metrics, enforces
//! timeouts, and forwards everything through four optional callbacks.
//!
//! The supervisor never runs the agent loop itself — it only watches a
//! process some other layer started inside a terminal multiplexer, via the
//! [`TerminalOps`] collaborator.

mod detect;
mod metrics;
mod timeout;

pub use detect::classify;
pub use metrics::{backfill_cost, parse_usage};
pub use timeout::{TimeoutConfig, TimeoutKind, TimeoutTracker};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;

use crate::collaborators::{SpawnSpec, TerminalOps, TerminalState};
use crate::error::{CoreError, CoreResult};
use crate::model::{InstanceId, InstanceMetrics};

/// Events the supervisor forwards to whichever coordinator wired the
/// callbacks: state, metrics, timeout, bell.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    StateChanged {
        instance: InstanceId,
        state: TerminalState,
    },
    MetricsUpdated {
        instance: InstanceId,
        metrics: InstanceMetrics,
    },
    TimedOut {
        instance: InstanceId,
        kind: TimeoutKind,
    },
    Bell {
        instance: InstanceId,
    },
}

#[derive(Clone)]
pub struct SupervisorConfig {
    pub capture_interval: Duration,
    pub timeouts: TimeoutConfig,
    pub tail_lines: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            capture_interval: Duration::from_millis(1000),
            timeouts: TimeoutConfig::from_minutes(15, 120),
            tail_lines: 200,
        }
    }
}

/// Drives the poll loop for one instance. Cheaply clonable; `stop_flag` is
/// shared with whoever holds the handle so cancellation is cooperative.
pub struct InstanceSupervisor {
    instance_id: InstanceId,
    session_name: String,
    working_dir: std::path::PathBuf,
    terminal: Arc<dyn TerminalOps>,
    config: SupervisorConfig,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    stop_flag: Arc<AtomicBool>,
    last_state: Mutex<Option<TerminalState>>,
}

impl InstanceSupervisor {
    pub fn new(
        instance_id: InstanceId,
        session_name: impl Into<String>,
        working_dir: std::path::PathBuf,
        terminal: Arc<dyn TerminalOps>,
        config: SupervisorConfig,
        events: mpsc::UnboundedSender<SupervisorEvent>,
    ) -> Self {
        Self {
            instance_id,
            session_name: session_name.into(),
            working_dir,
            terminal,
            config,
            events,
            stop_flag: Arc::new(AtomicBool::new(false)),
            last_state: Mutex::new(None),
        }
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop_flag.clone()
    }

    /// `Start` — reconnect to an existing session if one is live, otherwise
    /// spawn a fresh process.
    pub fn start(&self, prompt: String, branch: String) -> CoreResult<u32> {
        if self.terminal.session_exists(&self.session_name) {
            return self.reconnect();
        }
        let spec = SpawnSpec {
            instance_id: self.instance_id.clone(),
            working_dir: self.working_dir.clone(),
            branch,
            prompt,
            session_name: self.session_name.clone(),
        };
        self.terminal.start(&spec)
    }

    /// `Reconnect` — re-attach to the existing terminal session without
    /// spawning a new process.
    pub fn reconnect(&self) -> CoreResult<u32> {
        if !self.terminal.session_exists(&self.session_name) {
            return Err(CoreError::InvalidArgument(format!(
                "no terminal session {} to reconnect to",
                self.session_name
            )));
        }
        self.terminal.resume(&self.session_name)?;
        Ok(0)
    }

    pub fn stop(&self) -> CoreResult<()> {
        self.stop_flag.store(true, Ordering::SeqCst);
        self.terminal.stop(&self.session_name)
    }

    pub fn pause(&self) -> CoreResult<()> {
        self.terminal.pause(&self.session_name)
    }

    pub fn resize(&self, cols: u16, rows: u16) -> CoreResult<()> {
        self.terminal.resize(&self.session_name, cols, rows)
    }

    pub fn running(&self) -> bool {
        self.terminal.is_running(&self.session_name)
    }

    pub fn tmux_session_exists(&self) -> bool {
        self.terminal.session_exists(&self.session_name)
    }

    /// Capture-classify-timeout-emit, once. Intended to be called on
    /// `config.capture_interval` by an owning loop (the scheduler or
    /// coordinator drives the actual ticking; the supervisor stays a pure
    /// poll-once primitive so it is trivially testable without a clock).
    pub fn poll_once(&self, tracker: &mut TimeoutTracker, now: Instant) -> CoreResult<()> {
        if self.stop_flag.load(Ordering::SeqCst) {
            return Ok(());
        }
        let output = self.terminal.capture_output(&self.session_name, self.config.tail_lines)?;

        if output.contains('\u{0007}') {
            let _ = self.events.send(SupervisorEvent::Bell {
                instance: self.instance_id.clone(),
            });
        }

        tracker.record_output(output.clone(), now);

        let state = classify(&output);
        let mut last = self.last_state.lock().unwrap();
        if *last != Some(state) {
            *last = Some(state);
            let _ = self.events.send(SupervisorEvent::StateChanged {
                instance: self.instance_id.clone(),
                state,
            });
        }
        drop(last);

        if let Some(usage) = parse_usage(&output) {
            let _ = self.events.send(SupervisorEvent::MetricsUpdated {
                instance: self.instance_id.clone(),
                metrics: usage,
            });
        }

        if let Some(kind) = tracker.check(now) {
            let _ = self.events.send(SupervisorEvent::TimedOut {
                instance: self.instance_id.clone(),
                kind,
            });
        }

        Ok(())
    }

    /// Run the poll loop until `stop()` is called or `cancel` resolves.
    pub async fn run(&self, mut cancel: tokio::sync::watch::Receiver<bool>) -> CoreResult<()> {
        let mut tracker = TimeoutTracker::new(self.config.timeouts.clone(), Instant::now());
        loop {
            if self.stop_flag.load(Ordering::SeqCst) {
                return Ok(());
            }
            self.poll_once(&mut tracker, Instant::now())?;
            tokio::select! {
                _ = tokio::time::sleep(self.config.capture_interval) => {}
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }

    pub fn timestamp_now() -> chrono::DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::fakes::FakeTerminal;

    fn supervisor() -> (InstanceSupervisor, mpsc::UnboundedReceiver<SupervisorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let terminal = Arc::new(FakeTerminal::default());
        let sup = InstanceSupervisor::new(
            InstanceId::new(),
            "sess-1",
            std::path::PathBuf::from("/tmp/sess-1"),
            terminal,
            SupervisorConfig::default(),
            tx,
        );
        (sup, rx)
    }

    #[test]
    fn start_spawns_when_no_existing_session() {
        let (sup, _rx) = supervisor();
        assert!(sup.start("do the task".into(), "branch-1".into()).is_ok());
        assert!(sup.running());
    }

    #[test]
    fn stop_sets_flag_and_stops_terminal() {
        let (sup, _rx) = supervisor();
        sup.start("task".into(), "b".into()).unwrap();
        sup.stop().unwrap();
        assert!(sup.stop_flag.load(Ordering::SeqCst));
        assert!(!sup.running());
    }

    #[test]
    fn poll_once_emits_state_change_on_first_poll() {
        let (sup, mut rx) = supervisor();
        sup.start("task".into(), "b".into()).unwrap();
        let mut tracker = TimeoutTracker::new(TimeoutConfig::from_minutes(15, 120), Instant::now());
        sup.poll_once(&mut tracker, Instant::now()).unwrap();
        let event = rx.try_recv().unwrap();
        assert!(matches!(event, SupervisorEvent::StateChanged { .. }));
    }

    #[test]
    fn poll_once_suppresses_duplicate_state_transitions() {
        let (sup, mut rx) = supervisor();
        sup.start("task".into(), "b".into()).unwrap();
        let mut tracker = TimeoutTracker::new(TimeoutConfig::from_minutes(15, 120), Instant::now());
        sup.poll_once(&mut tracker, Instant::now()).unwrap();
        let _ = rx.try_recv().unwrap();
        sup.poll_once(&mut tracker, Instant::now()).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn reconnect_fails_without_existing_session() {
        let (sup, _rx) = supervisor();
        assert!(sup.reconnect().is_err());
    }
}
