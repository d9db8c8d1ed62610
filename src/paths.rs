use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const TRACKED_FILE_NAME: &str = "tracked.json";

pub fn default_config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("unable to resolve home directory")?;
    Ok(home.join(".jncep"))
}

pub fn tracked_series_file_path(config_dir: &Path) -> PathBuf {
    config_dir.join(TRACKED_FILE_NAME)
}
