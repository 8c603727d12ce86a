use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use gh_client::{GitHubClient, OctocrabClient, RepoSlug, TokenResolver};
use gh_pr_queue::git::CommandGit;
use gh_pr_queue::input::read_prs_file;
use gh_pr_queue::runner::{open_store, render_status};
use gh_pr_queue::{logger, ProcessOutcome, ProcessRequest, Runner};
use gh_pr_queue_config::AppConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "gh-pr-queue",
    version,
    about = "Merge, fix and rebase bot pull requests one repository at a time"
)]
struct Cli {
    /// Config file (default: ./.gh-pr-queue.toml, then ~/.gh-pr-queue.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Work through one repository's queue
    Process(ProcessArgs),
    /// Print the saved queue state
    Status {
        /// Print the raw state as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete the saved queue state
    Clear,
}

#[derive(Args)]
struct ProcessArgs {
    /// Repository to process (owner/name)
    #[arg(long)]
    repo: RepoSlug,

    /// Identifier shared by all invocations of one orchestrator run
    #[arg(long, env = "GITHUB_RUN_ID")]
    workflow_run_id: String,

    /// Discovered PRs as a JSON array
    #[arg(long, conflicts_with = "all_prs_file", required_unless_present = "all_prs_file")]
    all_prs: Option<String>,

    /// File holding the discovered PRs, `-` for stdin
    #[arg(long)]
    all_prs_file: Option<PathBuf>,

    /// Time budget of this run in minutes
    #[arg(long)]
    budget_minutes: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logger::init(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load(),
    };

    if !TokenResolver::new().has_env_token() {
        // A missing .env is fine
        let _ = dotenvy::dotenv();
    }
    // Re-read the environment, .env may have added a token
    let token = TokenResolver::new()
        .get_token()
        .await
        .context("No GitHub token: set GH_TOKEN or GITHUB_TOKEN")?;

    let client: Arc<dyn GitHubClient> = Arc::new(OctocrabClient::from_token(token.clone())?);
    let git = Arc::new(CommandGit::new(
        token,
        config.git_user_name.clone(),
        config.git_user_email.clone(),
    ));
    let store = open_store(&config, client.clone())?;
    let runner = Runner::new(config, client, git, store);

    match cli.command {
        Command::Process(args) => {
            let prs_json = match (args.all_prs, args.all_prs_file) {
                (Some(json), _) => json,
                (None, Some(path)) => read_prs_file(&path)?,
                (None, None) => anyhow::bail!("--all-prs or --all-prs-file is required"),
            };
            let request = ProcessRequest {
                repo: args.repo,
                workflow_run_id: args.workflow_run_id,
                prs_json,
                budget_minutes: args.budget_minutes,
            };
            match runner.process(&request).await? {
                ProcessOutcome::Drained => log::info!("[{}] Queue drained", request.repo),
                ProcessOutcome::Suspended => log::info!("[{}] Queue suspended", request.repo),
            }
        }
        Command::Status { json } => match runner.status().await? {
            Some(state) if json => println!("{}", serde_json::to_string_pretty(&state)?),
            Some(state) => print!("{}", render_status(&state)),
            None if json => println!("null"),
            None => println!("No saved queue state"),
        },
        Command::Clear => runner.clear().await?,
    }
    Ok(())
}
