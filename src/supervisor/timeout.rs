//! The three independent timeout timers a supervised instance runs:
//! activity, completion, and stale-output detection. Each kind runs its
//! own wall-clock/Instant-based timer rather than sharing a poll tick.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Activity,
    Completion,
    Stale,
}

#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub activity_timeout: Duration,
    pub completion_timeout: Duration,
    pub stale_detection_enabled: bool,
    /// Number of trailing identical snapshots that counts as stale.
    pub stale_snapshot_count: usize,
}

impl TimeoutConfig {
    pub fn from_minutes(activity_minutes: u64, completion_minutes: u64) -> Self {
        Self {
            activity_timeout: Duration::from_secs(activity_minutes * 60),
            completion_timeout: Duration::from_secs(completion_minutes * 60),
            stale_detection_enabled: true,
            stale_snapshot_count: 5,
        }
    }
}

/// Tracks timer state for a single instance. Each timeout fires at most
/// once — `check` returns `None` on every call after the first firing of a
/// given kind.
pub struct TimeoutTracker {
    config: TimeoutConfig,
    started_at: Instant,
    last_activity_at: Instant,
    recent_snapshots: Vec<String>,
    fired: [bool; 3],
}

impl TimeoutTracker {
    pub fn new(config: TimeoutConfig, now: Instant) -> Self {
        Self {
            config,
            started_at: now,
            last_activity_at: now,
            recent_snapshots: Vec::new(),
            fired: [false; 3],
        }
    }

    /// Record a fresh output snapshot, resetting the activity clock if the
    /// content differs from the previous snapshot.
    pub fn record_output(&mut self, snapshot: impl Into<String>, now: Instant) {
        let snapshot = snapshot.into();
        let changed = self.recent_snapshots.last() != Some(&snapshot);
        if changed {
            self.last_activity_at = now;
        }
        self.recent_snapshots.push(snapshot);
        let cap = self.config.stale_snapshot_count;
        if self.recent_snapshots.len() > cap {
            let excess = self.recent_snapshots.len() - cap;
            self.recent_snapshots.drain(0..excess);
        }
    }

    fn is_stale(&self) -> bool {
        self.config.stale_detection_enabled
            && self.recent_snapshots.len() >= self.config.stale_snapshot_count
            && self.recent_snapshots.windows(2).all(|w| w[0] == w[1])
    }

    /// Evaluate all three timers against `now`, returning the first
    /// not-yet-fired timeout that trips, if any. Checked in the fixed order
    /// completion, activity, stale, matching the severity of their
    /// resulting instance statuses.
    pub fn check(&mut self, now: Instant) -> Option<TimeoutKind> {
        if !self.fired[TimeoutKind::Completion as usize]
            && now.duration_since(self.started_at) > self.config.completion_timeout
        {
            self.fired[TimeoutKind::Completion as usize] = true;
            return Some(TimeoutKind::Completion);
        }
        if !self.fired[TimeoutKind::Activity as usize]
            && now.duration_since(self.last_activity_at) > self.config.activity_timeout
        {
            self.fired[TimeoutKind::Activity as usize] = true;
            return Some(TimeoutKind::Activity);
        }
        if !self.fired[TimeoutKind::Stale as usize] && self.is_stale() {
            self.fired[TimeoutKind::Stale as usize] = true;
            return Some(TimeoutKind::Stale);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TimeoutConfig {
        TimeoutConfig {
            activity_timeout: Duration::from_secs(10),
            completion_timeout: Duration::from_secs(3600),
            stale_detection_enabled: true,
            stale_snapshot_count: 3,
        }
    }

    #[test]
    fn activity_timeout_fires_once_after_silence() {
        let start = Instant::now();
        let mut tracker = TimeoutTracker::new(config(), start);
        let later = start + Duration::from_secs(11);
        assert_eq!(tracker.check(later), Some(TimeoutKind::Activity));
        assert_eq!(tracker.check(later), None);
    }

    #[test]
    fn fresh_output_resets_activity_clock() {
        let start = Instant::now();
        let mut tracker = TimeoutTracker::new(config(), start);
        let mid = start + Duration::from_secs(5);
        tracker.record_output("new output", mid);
        let later = mid + Duration::from_secs(5);
        assert_eq!(tracker.check(later), None);
    }

    #[test]
    fn stale_detection_fires_on_identical_snapshots() {
        let start = Instant::now();
        let mut tracker = TimeoutTracker::new(config(), start);
        for i in 0..3 {
            tracker.record_output("same output", start + Duration::from_secs(i));
        }
        assert_eq!(
            tracker.check(start + Duration::from_secs(4)),
            Some(TimeoutKind::Stale)
        );
    }

    #[test]
    fn disabled_stale_detection_never_fires() {
        let start = Instant::now();
        let mut cfg = config();
        cfg.stale_detection_enabled = false;
        let mut tracker = TimeoutTracker::new(cfg, start);
        for i in 0..5 {
            tracker.record_output("same", start + Duration::from_secs(i));
        }
        assert_eq!(tracker.check(start + Duration::from_secs(6)), None);
    }

    #[test]
    fn completion_timeout_takes_priority_over_activity() {
        let start = Instant::now();
        let mut cfg = config();
        cfg.completion_timeout = Duration::from_secs(5);
        let mut tracker = TimeoutTracker::new(cfg, start);
        let later = start + Duration::from_secs(20);
        assert_eq!(tracker.check(later), Some(TimeoutKind::Completion));
    }
}
