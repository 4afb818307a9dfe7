//! Completion Detector — parses the sentinel JSON files agents write into
//! their working directory to signal phase completion, and decides whether
//! a task run counts as a success.
//!
//! The protocol is file-based: the detector polls the working directory for
//! fixed-schema JSON documents rather than scanning conversation messages,
//! and cross-checks a task's "complete" status against the repository's
//! own commit count via `git`.

mod files;
mod poll;

pub use files::{
    CompletionFile, GroupConsolidationCompletion, PlanCompletion, RevisionCompletion,
    SynthesisCompletion, TaskCompletion, TaskStatus, VerificationReport,
};
pub use poll::{commits_since, head_commit_count, CompletionDetector, Info, SENTINEL_NAMES};
