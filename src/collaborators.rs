//! Narrow collaborator interfaces the core depends on but does not
//! implement: starting/polling a terminal-backed agent process, touching
//! the workspace filesystem, and driving a PR host.
//!
//! Each trait is plain, object-safe, and synchronous, returning `Result`
//! and dispatched through `Arc<dyn _>`. There are three: terminal,
//! workspace, and PR, because group-consolidation merges need a
//! workspace-only collaborator that never touches a live process. Methods
//! stay synchronous; async callers run them via
//! `tokio::task::spawn_blocking` at the call site so a slow collaborator
//! never blocks the coordinator's event loop.

use std::path::{Path, PathBuf};

use crate::error::CoreResult;
use crate::model::InstanceId;

/// Observed, coarse-grained state of a running agent's terminal session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    Working,
    WaitingInput,
    WaitingQuestion,
    WaitingPermission,
    PrOpened,
    Completed,
}

#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub instance_id: InstanceId,
    pub working_dir: PathBuf,
    pub branch: String,
    pub prompt: String,
    pub session_name: String,
}

/// Starts, polls, and tears down the terminal-backed agent process for one
/// instance. One instance per supervisor record; never shared.
pub trait TerminalOps: Send + Sync {
    fn start(&self, spec: &SpawnSpec) -> CoreResult<u32>;
    fn stop(&self, session_name: &str) -> CoreResult<()>;
    fn pause(&self, session_name: &str) -> CoreResult<()>;
    fn resume(&self, session_name: &str) -> CoreResult<()>;
    fn resize(&self, session_name: &str, cols: u16, rows: u16) -> CoreResult<()>;
    fn is_running(&self, session_name: &str) -> bool;
    fn session_exists(&self, session_name: &str) -> bool;
    fn capture_output(&self, session_name: &str, tail_lines: usize) -> CoreResult<String>;
    fn send_text(&self, session_name: &str, text: &str) -> CoreResult<()>;
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub succeeded: bool,
    pub conflicted_files: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct VerificationRun {
    pub success: bool,
    pub combined_output: String,
}

/// Filesystem/worktree/git operations the core needs but does not implement
/// directly, so that tests can substitute an in-memory fake.
pub trait WorkspaceOps: Send + Sync {
    fn create_worktree(&self, branch: &str, base: &str) -> CoreResult<PathBuf>;
    fn remove_worktree(&self, path: &Path) -> CoreResult<()>;
    fn merge_branch(&self, target_dir: &Path, branch: &str) -> CoreResult<MergeOutcome>;
    fn commit_count(&self, dir: &Path) -> CoreResult<u64>;
    fn run_verification(&self, dir: &Path, command: &str) -> CoreResult<VerificationRun>;
}

/// Opens (and later queries) pull requests. A no-op implementation is a
/// valid `PrDriver` for sessions that don't want PRs opened automatically.
pub trait PrDriver: Send + Sync {
    fn open_pr(&self, branch: &str, title: &str, body: &str) -> CoreResult<String>;
    fn pr_state(&self, branch: &str) -> CoreResult<Option<String>>;
}

#[cfg(test)]
pub mod fakes {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeTerminal {
        pub running: Mutex<HashMap<String, bool>>,
    }

    impl TerminalOps for FakeTerminal {
        fn start(&self, spec: &SpawnSpec) -> CoreResult<u32> {
            self.running
                .lock()
                .unwrap()
                .insert(spec.session_name.clone(), true);
            Ok(4242)
        }
        fn stop(&self, session_name: &str) -> CoreResult<()> {
            self.running
                .lock()
                .unwrap()
                .insert(session_name.to_string(), false);
            Ok(())
        }
        fn pause(&self, _session_name: &str) -> CoreResult<()> {
            Ok(())
        }
        fn resume(&self, _session_name: &str) -> CoreResult<()> {
            Ok(())
        }
        fn resize(&self, _session_name: &str, _cols: u16, _rows: u16) -> CoreResult<()> {
            Ok(())
        }
        fn is_running(&self, session_name: &str) -> bool {
            *self
                .running
                .lock()
                .unwrap()
                .get(session_name)
                .unwrap_or(&false)
        }
        fn session_exists(&self, session_name: &str) -> bool {
            self.running.lock().unwrap().contains_key(session_name)
        }
        fn capture_output(&self, _session_name: &str, _tail_lines: usize) -> CoreResult<String> {
            Ok(String::new())
        }
        fn send_text(&self, _session_name: &str, _text: &str) -> CoreResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeWorkspace;

    impl WorkspaceOps for FakeWorkspace {
        fn create_worktree(&self, branch: &str, _base: &str) -> CoreResult<PathBuf> {
            Ok(PathBuf::from("/tmp").join(branch))
        }
        fn remove_worktree(&self, _path: &Path) -> CoreResult<()> {
            Ok(())
        }
        fn merge_branch(&self, _target_dir: &Path, _branch: &str) -> CoreResult<MergeOutcome> {
            Ok(MergeOutcome {
                succeeded: true,
                conflicted_files: Vec::new(),
            })
        }
        fn commit_count(&self, _dir: &Path) -> CoreResult<u64> {
            Ok(1)
        }
        fn run_verification(&self, _dir: &Path, _command: &str) -> CoreResult<VerificationRun> {
            Ok(VerificationRun {
                success: true,
                combined_output: String::new(),
            })
        }
    }

    #[derive(Default)]
    pub struct FakePrDriver;

    impl PrDriver for FakePrDriver {
        fn open_pr(&self, branch: &str, _title: &str, _body: &str) -> CoreResult<String> {
            Ok(format!("https://example.invalid/pr/{branch}"))
        }
        fn pr_state(&self, _branch: &str) -> CoreResult<Option<String>> {
            Ok(Some("OPEN".to_string()))
        }
    }
}
