//! Configuration for gh-pr-queue
//!
//! This crate provides:
//! - Application configuration (AppConfig) with polling and state sections
//! - Configuration file discovery (TOML)
//! - Platform paths for locally stored queue state

pub mod app_config;
pub mod config_file;
pub mod paths;

pub use app_config::{AppConfig, PollingConfig, StateBackend, StateConfig};
pub use config_file::load_config_file;
