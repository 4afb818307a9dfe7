//! Directory polling and the normalized `Info` record.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::process::Command;

use crate::error::{CoreError, CoreResult};
use crate::model::TaskId;

use super::files::{
    CompletionFile, GROUP_CONSOLIDATION_COMPLETE_FILE, PLAN_FILE, REVISION_COMPLETE_FILE,
    SYNTHESIS_COMPLETE_FILE, TASK_COMPLETE_FILE,
};

/// Every sentinel file name the detector recognizes, in the fixed priority
/// order `scan_once` checks them. Exposed so callers that reuse a working
/// directory across runs (retries, revision passes) can clear stale
/// sentinels before starting a new one.
pub const SENTINEL_NAMES: [&str; 5] = [
    TASK_COMPLETE_FILE,
    SYNTHESIS_COMPLETE_FILE,
    REVISION_COMPLETE_FILE,
    GROUP_CONSOLIDATION_COMPLETE_FILE,
    PLAN_FILE,
];

/// The normalized view of whichever sentinel file was found, per
/// the completion-detector's contract.
#[derive(Debug, Clone)]
pub struct Info {
    pub kind: &'static str,
    pub success: bool,
    pub status: String,
    pub issues: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub task_id: Option<TaskId>,
    pub summary: String,
    pub files_modified: Vec<String>,
}

impl Info {
    fn from_file(file: &CompletionFile) -> Self {
        let now = Utc::now();
        match file {
            CompletionFile::Plan(p) => Info {
                kind: "plan",
                success: true,
                status: "complete".into(),
                issues: Vec::new(),
                timestamp: now,
                task_id: None,
                summary: p.objective.clone(),
                files_modified: Vec::new(),
            },
            CompletionFile::Task(t) => Info {
                kind: "task",
                success: t.status == super::files::TaskStatus::Complete,
                status: format!("{:?}", t.status).to_lowercase(),
                issues: t.issues.clone(),
                timestamp: now,
                task_id: Some(t.task_id.clone()),
                summary: t.summary.clone(),
                files_modified: t.files_modified.clone(),
            },
            CompletionFile::Synthesis(s) => Info {
                kind: "synthesis",
                success: !s.needs_revision(),
                status: s.status.clone(),
                issues: s.issues_found.iter().map(|i| i.description.clone()).collect(),
                timestamp: now,
                task_id: None,
                summary: s.integration_notes.clone(),
                files_modified: Vec::new(),
            },
            CompletionFile::Revision(r) => Info {
                kind: "revision",
                success: r.remaining_issues.is_empty(),
                status: "complete".into(),
                issues: r.remaining_issues.clone(),
                timestamp: now,
                task_id: Some(r.task_id.clone()),
                summary: r.issues_addressed.join("; "),
                files_modified: Vec::new(),
            },
            CompletionFile::GroupConsolidation(g) => Info {
                kind: "group_consolidation",
                success: g.verification.overall_success,
                status: g.status.clone(),
                issues: g.issues_for_next_group.clone(),
                timestamp: now,
                task_id: None,
                summary: g.notes.clone(),
                files_modified: Vec::new(),
            },
        }
    }
}

/// Polls a working directory for sentinel completion files.
#[derive(Clone)]
pub struct CompletionDetector {
    interval: Duration,
}

impl Default for CompletionDetector {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
        }
    }
}

impl CompletionDetector {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Scan `dir` once for the first matching sentinel file, in the fixed
    /// order task -> synthesis -> revision -> group-consolidation -> plan.
    /// Returns `Ok(None)` if no sentinel is present yet.
    pub async fn scan_once(&self, dir: &Path) -> CoreResult<Option<(CompletionFile, Info)>> {
        for name in SENTINEL_NAMES {
            let path = dir.join(name);
            let bytes = match tokio::fs::read(&path).await {
                Ok(b) => b,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(CoreError::Io(e)),
            };
            let parsed = CompletionFile::parse(name, &bytes)
                .expect("name drawn from SENTINEL_NAMES always parses")
                .map_err(|e| CoreError::InvalidCompletionFile {
                    path: path.display().to_string(),
                    source: e.to_string(),
                })?;
            let info = Info::from_file(&parsed);
            return Ok(Some((parsed, info)));
        }
        Ok(None)
    }

    /// Poll `dir` at `self.interval` until a sentinel appears or
    /// `cancel` resolves.
    pub async fn wait_for_completion(
        &self,
        dir: &Path,
        mut cancel: tokio::sync::watch::Receiver<bool>,
    ) -> CoreResult<Option<(CompletionFile, Info)>> {
        loop {
            if let Some(found) = self.scan_once(dir).await? {
                return Ok(Some(found));
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        return Ok(None);
                    }
                }
            }
        }
    }
}

/// `git rev-list --count HEAD` inside `dir`, or `None` if `dir` is not a
/// git working tree or the command fails.
pub async fn head_commit_count(dir: &Path) -> Option<u64> {
    let output = Command::new("git")
        .args(["rev-list", "--count", "HEAD"])
        .current_dir(dir)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout).trim().parse().ok()
}

/// Whether at least one commit has landed in `dir` since `baseline`
/// (a commit count captured via [`head_commit_count`] at task start).
pub async fn commits_since(dir: &Path, baseline: u64) -> bool {
    match head_commit_count(dir).await {
        Some(count) => count > baseline,
        None => false,
    }
}
