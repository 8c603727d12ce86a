//! Git CLI access for manual rebases

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::process::Stdio;

/// Runs git subcommands
#[async_trait]
pub trait GitRunner: Send + Sync {
    /// `git {args}` in `dir`; returns trimmed stdout, errors on non-zero exit
    async fn run(&self, dir: &Path, args: &[&str]) -> Result<String>;
}

/// Environment variable the credential helper reads the token from
const TOKEN_ENV: &str = "GH_PR_QUEUE_GIT_TOKEN";

/// Inline credential helper answering `get` with the token from the environment
const CREDENTIAL_HELPER: &str = "!f() { test \"$1\" = get || exit 0; echo username=x-access-token; echo \"password=${GH_PR_QUEUE_GIT_TOKEN}\"; }; f";

/// Real `git` CLI
///
/// Credentials and identity reach git only through the child environment:
/// `GIT_CONFIG_COUNT` installs the credential helper for the single process,
/// so nothing lands in `.git/config`, on disk or on the command line.
pub struct CommandGit {
    token: String,
    user_name: String,
    user_email: String,
}

impl CommandGit {
    pub fn new(
        token: impl Into<String>,
        user_name: impl Into<String>,
        user_email: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            user_name: user_name.into(),
            user_email: user_email.into(),
        }
    }
}

impl fmt::Debug for CommandGit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandGit")
            .field("token", &"<redacted>")
            .field("user_name", &self.user_name)
            .field("user_email", &self.user_email)
            .finish()
    }
}

#[async_trait]
impl GitRunner for CommandGit {
    async fn run(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let subcommand = args.first().copied().unwrap_or("");
        log::debug!("git {} (in {})", args.join(" "), dir.display());

        let output = tokio::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .env("GIT_TERMINAL_PROMPT", "0")
            // An empty helper value resets helpers inherited from user config
            .env("GIT_CONFIG_COUNT", "2")
            .env("GIT_CONFIG_KEY_0", "credential.helper")
            .env("GIT_CONFIG_VALUE_0", "")
            .env("GIT_CONFIG_KEY_1", "credential.helper")
            .env("GIT_CONFIG_VALUE_1", CREDENTIAL_HELPER)
            .env(TOKEN_ENV, &self.token)
            .env("GIT_AUTHOR_NAME", &self.user_name)
            .env("GIT_AUTHOR_EMAIL", &self.user_email)
            .env("GIT_COMMITTER_NAME", &self.user_name)
            .env("GIT_COMMITTER_EMAIL", &self.user_email)
            .output()
            .await
            .with_context(|| format!("Failed to run git {}", subcommand))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "git {} exited with {}: {}",
                subcommand,
                output.status,
                stderr.trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
