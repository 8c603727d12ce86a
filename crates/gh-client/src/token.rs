//! Token resolution
//!
//! Resolves the GitHub token the orchestrator authenticates with.

use anyhow::{Context, Result};
use log::debug;

/// Environment variables checked for a token, in order
pub const TOKEN_ENV_VARS: [&str; 2] = ["GH_TOKEN", "GITHUB_TOKEN"];

/// Resolves GitHub tokens
///
/// Tries multiple sources in order:
/// 1. `GH_TOKEN` (what Actions workflows export for the `gh` CLI)
/// 2. `GITHUB_TOKEN`
/// 3. `gh auth token` command
#[derive(Debug, Clone, Default)]
pub struct TokenResolver {
    env_token: Option<String>,
}

impl TokenResolver {
    /// Create a resolver from the process environment
    pub fn new() -> Self {
        let env_token = TOKEN_ENV_VARS
            .iter()
            .find_map(|key| std::env::var(key).ok())
            .filter(|token| !token.trim().is_empty());

        Self { env_token }
    }

    /// Create a resolver with a fixed token
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            env_token: Some(token.into()),
        }
    }

    /// Whether a token is available without asking the gh CLI
    pub fn has_env_token(&self) -> bool {
        self.env_token.is_some()
    }

    /// Get a token, falling back to the gh CLI
    pub async fn get_token(&self) -> Result<String> {
        if let Some(ref token) = self.env_token {
            debug!("Using token from environment");
            return Ok(token.trim().to_string());
        }

        debug!("Trying gh auth token");
        let output = tokio::process::Command::new("gh")
            .args(["auth", "token"])
            .output()
            .await
            .context("Failed to run 'gh auth token'")?;

        if output.status.success() {
            let token = String::from_utf8(output.stdout)
                .context("Invalid UTF-8 in gh auth token output")?
                .trim()
                .to_string();
            if !token.is_empty() {
                debug!("Using token from gh CLI");
                return Ok(token);
            }
        }

        Err(anyhow::anyhow!(
            "No GitHub token found. Set {} or run 'gh auth login'",
            TOKEN_ENV_VARS.join(" or ")
        ))
    }
}
