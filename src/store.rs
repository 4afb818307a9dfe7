//! Session Store — serializes the full `Session` to `session.json` under a
//! per-session directory, guards it with a cross-process advisory lock, and
//! regenerates a human-readable `context.md` coordination summary on every
//! mutation.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::model::{Phase, Session};

const SESSION_FILE: &str = "session.json";
const CONTEXT_FILE: &str = "context.md";
const LOCK_FILE: &str = "lock";

#[derive(Debug, Serialize, Deserialize)]
struct LockContents {
    pid: u32,
    hostname: String,
}

/// Holds the advisory lock for one session directory for as long as it is
/// alive; the lock is released on `Drop` as well as on an explicit
/// `release()`, so a crash still frees it once the OS reclaims the fd.
pub struct SessionLock {
    file: File,
    path: PathBuf,
}

impl SessionLock {
    fn acquire(dir: &Path) -> CoreResult<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE);
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        file.try_lock_exclusive().map_err(|_| {
            CoreError::SessionFatal(format!("session lock already held at {}", path.display()))
        })?;
        let contents = LockContents {
            pid: std::process::id(),
            hostname: hostname_best_effort(),
        };
        fs::write(&path, serde_json::to_vec_pretty(&contents)?)?;
        Ok(Self { file, path })
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = fs::remove_file(&self.path);
    }
}

fn hostname_best_effort() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown-host".to_string())
}

/// The on-disk root a `SessionStore` manages: `<root>/sessions/<id>/`.
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn session_dir(&self, id: &crate::model::SessionId) -> PathBuf {
        self.root.join("sessions").join(id.to_string())
    }

    /// Acquire the advisory lock for `session.id` and persist it for the
    /// first time. Fails with `SessionFatal` if another live process
    /// already holds the lock.
    pub fn start_session(&self, session: &Session) -> CoreResult<SessionLock> {
        let dir = self.session_dir(&session.id);
        let lock = SessionLock::acquire(&dir)?;
        self.save(session)?;
        Ok(lock)
    }

    /// Write `session.json` via a temp-file-then-rename so a crash mid-write
    /// never leaves a half-written file behind.
    pub fn save(&self, session: &Session) -> CoreResult<()> {
        let dir = self.session_dir(&session.id);
        fs::create_dir_all(&dir)?;
        let final_path = dir.join(SESSION_FILE);
        let tmp_path = dir.join(format!("{SESSION_FILE}.tmp"));
        fs::write(&tmp_path, serde_json::to_vec_pretty(session)?)?;
        fs::rename(&tmp_path, &final_path)?;
        fs::write(dir.join(CONTEXT_FILE), render_context(session))?;
        Ok(())
    }

    pub fn load(&self, id: &crate::model::SessionId) -> CoreResult<Session> {
        let path = self.session_dir(id).join(SESSION_FILE);
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CoreError::SessionNotFound(id.clone())
            } else {
                CoreError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Reconstruct a session from disk and re-acquire its lock, for
    /// resumption after a crash or restart.
    pub fn load_with_lock(&self, id: &crate::model::SessionId) -> CoreResult<(Session, SessionLock)> {
        let session = self.load(id)?;
        let lock = SessionLock::acquire(&self.session_dir(id))?;
        Ok((session, lock))
    }

    pub fn stop_session(&self, lock: SessionLock) {
        lock.release();
    }
}

/// Regenerate the human-readable coordination summary: current phase, a
/// task table with status, group progress, and active instances.
fn render_context(session: &Session) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let _ = writeln!(out, "# {}", session.label);
    let _ = writeln!(out);
    let _ = writeln!(out, "Objective: {}", session.objective);
    let _ = writeln!(out, "Phase: {}", phase_label(session.phase));
    let _ = writeln!(out);

    if let Some(plan) = &session.plan {
        let _ = writeln!(out, "## Tasks");
        let _ = writeln!(out, "| ID | Title | Group | Status |");
        let _ = writeln!(out, "|---|---|---|---|");
        for task in &plan.tasks {
            let group = plan.group_index_of(&task.id).map(|g| g.to_string()).unwrap_or_default();
            let status = if session.completed_tasks.contains(&task.id) {
                "completed"
            } else if session.failed_tasks.contains(&task.id) {
                "failed"
            } else if session.task_to_instance.contains_key(&task.id) {
                "running"
            } else {
                "pending"
            };
            let _ = writeln!(out, "| {} | {} | {} | {} |", task.id, task.title, group, status);
        }
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Group progress: {}/{} groups started (current group {})",
            session.current_group.min(plan.execution_order().len()),
            plan.execution_order().len(),
            session.current_group
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## Instances");
    for instance in &session.instances {
        let _ = writeln!(
            out,
            "- {} ({:?}) — task {}, branch `{}`",
            instance.id, instance.status, instance.task_id, instance.branch
        );
    }

    out
}

fn phase_label(phase: Phase) -> &'static str {
    phase.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Session;

    #[test]
    fn save_then_load_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path());
        let session = Session::new("lbl", "do the thing");
        let lock = store.start_session(&session).unwrap();
        let loaded = store.load(&session.id).unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.objective, session.objective);
        store.stop_session(lock);
    }

    #[test]
    fn context_md_is_written_alongside_session_json() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path());
        let session = Session::new("lbl", "do the thing");
        let lock = store.start_session(&session).unwrap();
        let context = fs::read_to_string(store.session_dir(&session.id).join(CONTEXT_FILE)).unwrap();
        assert!(context.contains("do the thing"));
        store.stop_session(lock);
    }

    #[test]
    fn second_lock_attempt_on_same_dir_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path());
        let session = Session::new("lbl", "obj");
        let _lock = store.start_session(&session).unwrap();
        let second = SessionLock::acquire(&store.session_dir(&session.id));
        assert!(second.is_err());
    }

    #[test]
    fn lock_is_released_on_drop() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path());
        let session = Session::new("lbl", "obj");
        {
            let _lock = store.start_session(&session).unwrap();
        }
        let reacquired = SessionLock::acquire(&store.session_dir(&session.id));
        assert!(reacquired.is_ok());
    }
}
