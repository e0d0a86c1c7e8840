//! Initialize the configuration directory: create ~/.relay, the default config, and the database.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config;
use crate::store;

/// Create the config directory and default config file if they do not exist.
/// Returns the config directory.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config::config_dir(config_path);
    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        std::fs::write(config_path, b"{}")
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    } else {
        log::debug!("config already exists at {}, skipping", config_path.display());
    }
    Ok(config_dir)
}

/// Full `relay init`: config directory plus a migrated database. Returns the database URL.
pub async fn init(config_path: &Path) -> Result<String> {
    init_config_dir(config_path)?;
    let (config, path) = config::load_config(Some(config_path.to_path_buf()))?;
    let url = config::resolve_database_url(&config, &path);
    store::connect(&url).await?;
    log::info!("database ready at {}", url);
    Ok(url)
}
