use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::cli::Cli;
use crate::paths::{default_config_dir, tracked_series_file_path};

pub const DEFAULT_CONCURRENCY: usize = 8;

#[derive(Debug, Clone)]
pub struct Config {
    pub config_dir: PathBuf,
    pub concurrency: usize,
    pub token: Option<String>,
}

impl Config {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            concurrency: DEFAULT_CONCURRENCY,
            token: None,
        }
    }

    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let config_dir = match &cli.config_dir {
            Some(dir) if !dir.as_os_str().is_empty() => dir.clone(),
            _ => default_config_dir()?,
        };

        Ok(Self {
            config_dir,
            concurrency: cli.concurrency.max(1),
            token: cli
                .token
                .as_deref()
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .map(str::to_string),
        })
    }

    pub fn tracked_file(&self) -> PathBuf {
        tracked_series_file_path(&self.config_dir)
    }

    /// Creates the configuration directory if it does not exist yet. Safe to
    /// call on every run.
    pub fn ensure_config_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.config_dir).with_context(|| {
            format!(
                "failed to create config directory {}",
                self.config_dir.display()
            )
        })
    }
}
