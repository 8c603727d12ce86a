//! Application configuration
//!
//! Configuration loaded from `.gh-pr-queue.toml`. Every key has a default, so
//! an absent or partial file is fine.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration loaded from `.gh-pr-queue.toml`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    /// Repository hosting the fix workflow and, by default, the queue state
    #[serde(default = "default_bot_repo")]
    pub bot_repo: String,

    /// Git ref the fix workflow is dispatched on
    #[serde(default = "default_bot_ref")]
    pub bot_ref: String,

    /// Workflow file dispatched to fix a failing PR
    #[serde(default = "default_fix_workflow")]
    pub fix_workflow: String,

    /// Name of the check run the orchestrator itself runs as
    ///
    /// Excluded from check evaluation, otherwise the orchestrator would wait
    /// on itself.
    #[serde(default = "default_orchestrator_check_name")]
    pub orchestrator_check_name: String,

    /// Login the orchestrator posts comments as; resolved from the token if unset
    #[serde(default)]
    pub bot_login: Option<String>,

    /// Committer identity for manual rebases
    #[serde(default = "default_git_user_name")]
    pub git_user_name: String,

    #[serde(default = "default_git_user_email")]
    pub git_user_email: String,

    /// Review body used when approving a PR before auto-merge
    #[serde(default = "default_approval_message")]
    pub approval_message: String,

    /// Wall-clock budget of one invocation
    #[serde(default = "default_run_budget_minutes")]
    pub run_budget_minutes: u64,

    /// Stop processing when less than this remains before the deadline
    #[serde(default = "default_timeout_threshold_minutes")]
    pub timeout_threshold_minutes: u64,

    #[serde(default = "default_checks_timeout_minutes")]
    pub checks_timeout_minutes: u64,

    #[serde(default = "default_fix_timeout_minutes")]
    pub fix_timeout_minutes: u64,

    /// Fix workflow runs per PR before it is marked failed
    #[serde(default = "default_max_fix_attempts")]
    pub max_fix_attempts: u32,

    #[serde(default = "default_max_rebase_attempts")]
    pub max_rebase_attempts: u32,

    /// Processing steps per PR before it is marked failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub state: StateConfig,
}

/// Timing of status and workflow polling
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PollingConfig {
    /// Delay before the first status query
    #[serde(default = "default_warmup_secs")]
    pub warmup_secs: u64,

    /// Status queries while mergeability is still being computed
    #[serde(default = "default_mergeable_retries")]
    pub mergeable_retries: u32,

    /// Backoff unit; attempt `n` waits `n * mergeable_backoff_secs`
    #[serde(default = "default_mergeable_backoff_secs")]
    pub mergeable_backoff_secs: u64,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Polls without any visible check before reporting "no checks"
    #[serde(default = "default_no_checks_grace_attempts")]
    pub no_checks_grace_attempts: u32,

    /// Delay between dispatching a workflow and looking up its run
    #[serde(default = "default_run_visibility_delay_secs")]
    pub run_visibility_delay_secs: u64,
}

/// Where queue state is persisted
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local directory
    #[default]
    File,
    /// Files on a branch of a GitHub repository
    Github,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackend,

    /// Directory for the file backend
    #[serde(default = "crate::paths::default_state_dir")]
    pub dir: PathBuf,

    /// Repository for the github backend; defaults to `bot_repo`
    #[serde(default)]
    pub repo: Option<String>,

    /// Branch for the github backend
    #[serde(default = "default_state_branch")]
    pub branch: String,

    /// Key prefix under which shards are stored
    #[serde(default = "default_state_prefix")]
    pub prefix: String,
}

fn default_bot_repo() -> String {
    "VectorInstitute/aieng-bot-maintain".to_string()
}

fn default_bot_ref() -> String {
    "main".to_string()
}

fn default_fix_workflow() -> String {
    "fix-remote-pr.yml".to_string()
}

fn default_orchestrator_check_name() -> String {
    "Monitor Organization Bot PRs".to_string()
}

fn default_git_user_name() -> String {
    "aieng-bot-maintain[bot]".to_string()
}

fn default_git_user_email() -> String {
    "aieng-bot@vectorinstitute.ai".to_string()
}

fn default_approval_message() -> String {
    "All checks passed. Auto-approving bot PR.".to_string()
}

fn default_run_budget_minutes() -> u64 {
    350
}

fn default_timeout_threshold_minutes() -> u64 {
    10
}

fn default_checks_timeout_minutes() -> u64 {
    30
}

fn default_fix_timeout_minutes() -> u64 {
    30
}

fn default_max_fix_attempts() -> u32 {
    2
}

fn default_max_rebase_attempts() -> u32 {
    3
}

fn default_max_attempts() -> u32 {
    12
}

fn default_warmup_secs() -> u64 {
    15
}

fn default_mergeable_retries() -> u32 {
    5
}

fn default_mergeable_backoff_secs() -> u64 {
    10
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_no_checks_grace_attempts() -> u32 {
    2
}

fn default_run_visibility_delay_secs() -> u64 {
    5
}

fn default_state_branch() -> String {
    "bot-queue-state".to_string()
}

fn default_state_prefix() -> String {
    "queue-state".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bot_repo: default_bot_repo(),
            bot_ref: default_bot_ref(),
            fix_workflow: default_fix_workflow(),
            orchestrator_check_name: default_orchestrator_check_name(),
            bot_login: None,
            git_user_name: default_git_user_name(),
            git_user_email: default_git_user_email(),
            approval_message: default_approval_message(),
            run_budget_minutes: default_run_budget_minutes(),
            timeout_threshold_minutes: default_timeout_threshold_minutes(),
            checks_timeout_minutes: default_checks_timeout_minutes(),
            fix_timeout_minutes: default_fix_timeout_minutes(),
            max_fix_attempts: default_max_fix_attempts(),
            max_rebase_attempts: default_max_rebase_attempts(),
            max_attempts: default_max_attempts(),
            polling: PollingConfig::default(),
            state: StateConfig::default(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            warmup_secs: default_warmup_secs(),
            mergeable_retries: default_mergeable_retries(),
            mergeable_backoff_secs: default_mergeable_backoff_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            no_checks_grace_attempts: default_no_checks_grace_attempts(),
            run_visibility_delay_secs: default_run_visibility_delay_secs(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackend::default(),
            dir: crate::paths::default_state_dir(),
            repo: None,
            branch: default_state_branch(),
            prefix: default_state_prefix(),
        }
    }
}

impl AppConfig {
    /// Load config from CWD first, then home directory, or use defaults
    pub fn load() -> Self {
        if let Some((path, content)) = crate::load_config_file() {
            match toml::from_str(&content) {
                Ok(config) => {
                    log::info!("Loaded app config from {}", path.display());
                    return config;
                }
                Err(e) => {
                    log::warn!("Ignoring invalid config file {}: {}", path.display(), e);
                }
            }
        }

        log::debug!("Using default app config");
        Self::default()
    }

    /// Load config from an explicit path
    ///
    /// Unlike [`AppConfig::load`], a missing or invalid file is an error.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        log::info!("Loaded app config from {}", path.display());
        Ok(config)
    }

    /// Repository holding the state branch
    pub fn state_repo(&self) -> &str {
        self.state.repo.as_deref().unwrap_or(&self.bot_repo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.fix_workflow, "fix-remote-pr.yml");
        assert_eq!(config.orchestrator_check_name, "Monitor Organization Bot PRs");
        assert_eq!(config.run_budget_minutes, 350);
        assert_eq!(config.timeout_threshold_minutes, 10);
        assert_eq!(config.polling.warmup_secs, 15);
        assert_eq!(config.polling.mergeable_retries, 5);
        assert_eq!(config.polling.mergeable_backoff_secs, 10);
        assert_eq!(config.polling.poll_interval_secs, 30);
        assert_eq!(config.polling.no_checks_grace_attempts, 2);
        assert_eq!(config.state.backend, StateBackend::File);
        assert!(config.bot_login.is_none());
    }

    #[test]
    fn test_config_deserialize_partial() {
        let toml = r#"
            bot_repo = "acme/maintainer"
            max_fix_attempts = 1

            [polling]
            poll_interval_secs = 5

            [state]
            backend = "github"
            branch = "queue"
        "#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.bot_repo, "acme/maintainer");
        assert_eq!(config.max_fix_attempts, 1);
        // Untouched keys keep defaults, also inside sections
        assert_eq!(config.max_rebase_attempts, 3);
        assert_eq!(config.polling.poll_interval_secs, 5);
        assert_eq!(config.polling.warmup_secs, 15);
        assert_eq!(config.state.backend, StateBackend::Github);
        assert_eq!(config.state.branch, "queue");
        assert_eq!(config.state.prefix, "queue-state");
        assert_eq!(config.state_repo(), "acme/maintainer");
    }

    #[test]
    fn test_state_repo_override() {
        let toml = r#"
            [state]
            repo = "acme/state-store"
        "#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.state_repo(), "acme/state-store");
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let toml = r#"
            [state]
            backend = "s3"
        "#;
        assert!(toml::from_str::<AppConfig>(toml).is_err());
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bot_login = \"queue-bot[bot]\"").unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.bot_login.as_deref(), Some("queue-bot[bot]"));

        assert!(AppConfig::load_from(Path::new("/nonexistent/gh-pr-queue.toml")).is_err());
    }
}
