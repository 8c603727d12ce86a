//! Stderr logging using env_logger
//!
//! Runs in CI, so everything goes to stderr where the job log picks it up;
//! stdout is kept for `status` output.

use env_logger::{Builder, Env, Target};
use log::LevelFilter;

/// Initialize logging
///
/// Default level is `info`; `RUST_LOG` overrides it and `--verbose` forces
/// `debug` for this crate family.
pub fn init(verbose: bool) {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    builder.target(Target::Stderr).format_target(false);

    if verbose {
        for module in ["gh_pr_queue", "gh_client", "gh_pr_queue_config"] {
            builder.filter_module(module, LevelFilter::Debug);
        }
    }

    // A second init (tests, embedding) keeps the first logger
    let _ = builder.try_init();
}
