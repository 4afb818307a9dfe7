//! Regex-based classifier that turns a captured terminal tail into a
//! coarse-grained [`TerminalState`].
//!
//! A single regex pass over captured pane text stands in for polling
//! several independent signals (PID liveness, marker files, PR state):
//! state is observed entirely through terminal output.

use std::sync::OnceLock;

use regex::{Regex, RegexSet};

use crate::collaborators::TerminalState;

struct Patterns {
    permission: RegexSet,
    question: RegexSet,
    waiting_input: RegexSet,
    pr_opened: Regex,
    completed: RegexSet,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        permission: RegexSet::new([
            r"(?i)do you want to (allow|proceed)",
            r"(?i)allow this (action|command|tool)\?",
            r"\[y/n\]\s*$",
        ])
        .expect("static permission patterns compile"),
        question: RegexSet::new([
            r"(?i)^\s*question:",
            r"(?i)which (option|approach) would you like",
            r"\?\s*$",
        ])
        .expect("static question patterns compile"),
        waiting_input: RegexSet::new([
            r"(?i)waiting for (your )?input",
            r"(?i)please (provide|confirm)",
            r">\s*$",
        ])
        .expect("static waiting-input patterns compile"),
        pr_opened: Regex::new(r"(?i)(pull request|pr) (opened|created).*https?://\S+")
            .expect("static pr pattern compiles"),
        completed: RegexSet::new([r"(?i)task[_ ]complete", r"(?i)all tasks finished"])
            .expect("static completed patterns compile"),
    })
}

/// Classify the most recent tail of captured terminal output. Checked in a
/// fixed priority order: an explicit completion/PR signal always wins over
/// an ambiguous "waiting" prompt, and permission/question prompts are
/// distinguished before falling back to the generic waiting-for-input case.
pub fn classify(tail: &str) -> TerminalState {
    let p = patterns();
    if p.pr_opened.is_match(tail) {
        return TerminalState::PrOpened;
    }
    if p.completed.is_match(tail) {
        return TerminalState::Completed;
    }
    if p.permission.is_match(tail) {
        return TerminalState::WaitingPermission;
    }
    if p.question.is_match(tail) {
        return TerminalState::WaitingQuestion;
    }
    if p.waiting_input.is_match(tail) {
        return TerminalState::WaitingInput;
    }
    TerminalState::Working
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_permission_prompt() {
        assert_eq!(
            classify("Do you want to allow this command to run?"),
            TerminalState::WaitingPermission
        );
    }

    #[test]
    fn classifies_pr_opened_over_completion_text() {
        let tail = "task_complete\nPull request opened: https://example.invalid/pr/1";
        assert_eq!(classify(tail), TerminalState::PrOpened);
    }

    #[test]
    fn classifies_plain_output_as_working() {
        assert_eq!(classify("compiling crate foo v0.1.0"), TerminalState::Working);
    }

    #[test]
    fn classifies_trailing_question_mark_as_question() {
        assert_eq!(
            classify("Should I refactor the retry loop too?"),
            TerminalState::WaitingQuestion
        );
    }
}
