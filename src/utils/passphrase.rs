//! SQLCipher key for the job store and corpus: environment, then `.env`, then a prompt.

use anyhow::{Context, Result};
use colored::Colorize;
use log::{info, warn};
use std::path::Path;

const ENV_KEY: &str = "INVSTREAM_DB_KEY";

fn key_from_env() -> Option<String> {
    std::env::var(ENV_KEY)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Key from the process environment, or from `.env` in `dir` once loaded. Names where it came from.
fn stored_key(dir: &Path) -> Option<(String, &'static str)> {
    if let Some(key) = key_from_env() {
        return Some((key, "environment"));
    }
    let env_path = dir.join(".env");
    if !env_path.is_file() {
        return None;
    }
    if let Err(e) = dotenvy::from_path(&env_path) {
        warn!("{}: {}", env_path.display(), e);
        return None;
    }
    key_from_env().map(|key| (key, ".env"))
}

/// `is_new`: the encrypted database is about to be created, so the prompt asks for a new key.
pub fn get_passphrase(dir: &Path, is_new: bool) -> Result<String> {
    info!("Database is encrypted (SQLCipher)");
    if let Some((key, source)) = stored_key(dir) {
        info!("{} taken from {}", ENV_KEY, source);
        return Ok(key);
    }
    let label = format!("[{}]", env!("CARGO_PKG_NAME")).cyan().bold();
    let prompt = if is_new {
        "New database passphrase: "
    } else {
        "Database passphrase: "
    };
    let key = rpassword::prompt_password(format!("{label} {prompt}")).context("read passphrase")?;
    if is_new {
        warn!("Without this passphrase the job store and records cannot be read again");
    }
    Ok(key.trim().to_string())
}
