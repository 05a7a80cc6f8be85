use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

mod auth;
mod client;
mod preferences;

pub use client::{ApiClient, ApiError};
pub use preferences::UserPreferences;

/// `<config dir>/deus-code`, created on first use.
pub fn config_dir() -> Result<PathBuf> {
    let dir = dirs::config_dir()
        .context("Could not find config directory")?
        .join("deus-code");

    fs::create_dir_all(&dir).context("Could not create config directory")?;

    Ok(dir)
}
