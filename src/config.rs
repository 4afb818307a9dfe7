//! Session configuration, loaded with a layered precedence chain:
//! environment variable, local project config, global user config,
//! built-in default. All tunables (parallelism caps, timeouts,
//! retry/budget limits) live on one `SessionConfig` struct read once at
//! session start rather than through scattered per-field accessors.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::CoreResult;

const ENV_PREFIX: &str = "ULTRAPLAN_";
const LOCAL_CONFIG_PATH: &str = ".ultraplan/config.json";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PartialSessionConfig {
    pub max_parallel: Option<usize>,
    pub max_retries: Option<u32>,
    pub activity_timeout_minutes: Option<u64>,
    pub completion_timeout_minutes: Option<u64>,
    pub stale_detection: Option<bool>,
    pub require_commits: Option<bool>,
    pub capture_interval_ms: Option<u64>,
    pub max_revision_rounds: Option<u32>,
    pub budget_cost_cap_usd: Option<f64>,
    pub budget_token_cap: Option<u64>,
    pub worktree_base: Option<PathBuf>,
    pub plan_candidates: Option<usize>,
    pub base_branch: Option<String>,
    pub include_instance_id_in_branch: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    pub max_parallel: usize,
    pub max_retries: u32,
    pub activity_timeout_minutes: u64,
    pub completion_timeout_minutes: u64,
    pub stale_detection: bool,
    pub require_commits: bool,
    pub capture_interval_ms: u64,
    pub max_revision_rounds: u32,
    pub budget_cost_cap_usd: Option<f64>,
    pub budget_token_cap: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree_base: Option<PathBuf>,
    pub plan_candidates: usize,
    pub base_branch: String,
    pub include_instance_id_in_branch: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            max_retries: 2,
            activity_timeout_minutes: 15,
            completion_timeout_minutes: 120,
            stale_detection: true,
            require_commits: true,
            capture_interval_ms: 1000,
            max_revision_rounds: 3,
            budget_cost_cap_usd: None,
            budget_token_cap: None,
            worktree_base: None,
            plan_candidates: 1,
            base_branch: "main".to_string(),
            include_instance_id_in_branch: false,
        }
    }
}

impl SessionConfig {
    fn merge(mut self, partial: PartialSessionConfig) -> Self {
        if let Some(v) = partial.max_parallel {
            self.max_parallel = v;
        }
        if let Some(v) = partial.max_retries {
            self.max_retries = v;
        }
        if let Some(v) = partial.activity_timeout_minutes {
            self.activity_timeout_minutes = v;
        }
        if let Some(v) = partial.completion_timeout_minutes {
            self.completion_timeout_minutes = v;
        }
        if let Some(v) = partial.stale_detection {
            self.stale_detection = v;
        }
        if let Some(v) = partial.require_commits {
            self.require_commits = v;
        }
        if let Some(v) = partial.capture_interval_ms {
            self.capture_interval_ms = v;
        }
        if let Some(v) = partial.max_revision_rounds {
            self.max_revision_rounds = v;
        }
        if partial.budget_cost_cap_usd.is_some() {
            self.budget_cost_cap_usd = partial.budget_cost_cap_usd;
        }
        if partial.budget_token_cap.is_some() {
            self.budget_token_cap = partial.budget_token_cap;
        }
        if partial.worktree_base.is_some() {
            self.worktree_base = partial.worktree_base;
        }
        if let Some(v) = partial.plan_candidates {
            self.plan_candidates = v;
        }
        if let Some(v) = partial.base_branch {
            self.base_branch = v;
        }
        if let Some(v) = partial.include_instance_id_in_branch {
            self.include_instance_id_in_branch = v;
        }
        self
    }

    /// Load with precedence env > local (`.ultraplan/config.json`) >
    /// global (`~/.config/ultraplan/config.json`) > built-in default.
    /// Each layer is merged over the previous one field-by-field, so a
    /// local config need only override the fields it cares about.
    pub fn load() -> CoreResult<Self> {
        let mut config = SessionConfig::default();
        if let Some(global) = load_global_config()? {
            config = config.merge(global);
        }
        if let Some(local) = load_local_config()? {
            config = config.merge(local);
        }
        config = config.merge(load_env_overrides());
        Ok(config)
    }
}

fn load_local_config() -> CoreResult<Option<PartialSessionConfig>> {
    let path = PathBuf::from(LOCAL_CONFIG_PATH);
    read_partial_config(&path)
}

fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("ultraplan").join("config.json"))
}

fn load_global_config() -> CoreResult<Option<PartialSessionConfig>> {
    match global_config_path() {
        Some(path) => read_partial_config(&path),
        None => Ok(None),
    }
}

fn read_partial_config(path: &PathBuf) -> CoreResult<Option<PartialSessionConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)?;
    let partial: PartialSessionConfig = serde_json::from_str(&contents)?;
    Ok(Some(partial))
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(format!("{ENV_PREFIX}{name}")).ok()?.parse().ok()
}

fn env_u32(name: &str) -> Option<u32> {
    std::env::var(format!("{ENV_PREFIX}{name}")).ok()?.parse().ok()
}

fn env_f64(name: &str) -> Option<f64> {
    std::env::var(format!("{ENV_PREFIX}{name}")).ok()?.parse().ok()
}

fn env_bool(name: &str) -> Option<bool> {
    std::env::var(format!("{ENV_PREFIX}{name}")).ok()?.parse().ok()
}

fn load_env_overrides() -> PartialSessionConfig {
    PartialSessionConfig {
        max_parallel: env_u64("MAX_PARALLEL").map(|v| v as usize),
        max_retries: env_u32("MAX_RETRIES"),
        activity_timeout_minutes: env_u64("ACTIVITY_TIMEOUT_MINUTES"),
        completion_timeout_minutes: env_u64("COMPLETION_TIMEOUT_MINUTES"),
        stale_detection: env_bool("STALE_DETECTION"),
        require_commits: env_bool("REQUIRE_COMMITS"),
        capture_interval_ms: env_u64("CAPTURE_INTERVAL_MS"),
        max_revision_rounds: env_u32("MAX_REVISION_ROUNDS"),
        budget_cost_cap_usd: env_f64("BUDGET_COST_CAP_USD"),
        budget_token_cap: env_u64("BUDGET_TOKEN_CAP"),
        worktree_base: std::env::var(format!("{ENV_PREFIX}WORKTREE_BASE"))
            .ok()
            .map(PathBuf::from),
        plan_candidates: env_u64("PLAN_CANDIDATES").map(|v| v as usize),
        base_branch: std::env::var(format!("{ENV_PREFIX}BASE_BRANCH")).ok(),
        include_instance_id_in_branch: env_bool("INCLUDE_INSTANCE_ID_IN_BRANCH"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn default_config_has_sane_values() {
        let config = SessionConfig::default();
        assert_eq!(config.max_parallel, 4);
        assert!(config.require_commits);
    }

    #[test]
    fn merge_overrides_only_set_fields() {
        let base = SessionConfig::default();
        let partial = PartialSessionConfig {
            max_parallel: Some(8),
            ..Default::default()
        };
        let merged = base.merge(partial);
        assert_eq!(merged.max_parallel, 8);
        assert_eq!(merged.max_retries, 2);
    }

    #[test]
    fn env_override_takes_precedence_over_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        std::env::set_var("ULTRAPLAN_MAX_PARALLEL", "9");
        let config = SessionConfig::load().unwrap();
        assert_eq!(config.max_parallel, 9);
        std::env::remove_var("ULTRAPLAN_MAX_PARALLEL");
    }
}
