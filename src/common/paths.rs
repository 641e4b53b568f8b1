use anyhow::{Context, Result};
use std::path::PathBuf;

/// Centralized path management for vidgen

/// Get the vidgen config directory
pub fn vidgen_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Unable to determine user config directory")?
        .join("vidgen");

    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("creating config directory at {}", config_dir.display()))?;

    Ok(config_dir)
}

/// Get the vidgen data directory
pub fn vidgen_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join("vidgen");

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data directory at {}", data_dir.display()))?;

    Ok(data_dir)
}

/// Get the default directory downloaded artifacts are written to
pub fn output_dir() -> Result<PathBuf> {
    let out_dir = vidgen_data_dir()?.join("output");
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("creating output directory at {}", out_dir.display()))?;
    Ok(out_dir)
}

/// Path of the main config file
pub fn config_path() -> Result<PathBuf> {
    Ok(vidgen_config_dir()?.join("config.toml"))
}

/// Path of the optional env file carrying the proxy API key
pub fn env_file_path() -> Result<PathBuf> {
    Ok(vidgen_config_dir()?.join(".env"))
}

/// Path of the persisted daily budget ledger
pub fn ledger_path() -> Result<PathBuf> {
    Ok(vidgen_data_dir()?.join("budget.json"))
}

/// Path of the stored session file written by the external login flow
pub fn session_path() -> Result<PathBuf> {
    Ok(vidgen_data_dir()?.join("session.json"))
}
