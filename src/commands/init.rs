//! Init command implementation

use crate::archive::ArchiveStore;
use crate::config::Config;
use crate::error::{Error, Result};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub base_dir: PathBuf,
    pub config_path: PathBuf,
    pub force: bool,
}

/// Write a starter config and create the archive schema
pub async fn cmd_init(options: InitOptions) -> Result<Config> {
    let InitOptions {
        base_dir,
        config_path,
        force,
    } = options;

    if config_path.exists() && !force {
        return Err(Error::AlreadyInitialized(config_path.display().to_string()));
    }

    let mut config = Config::example();
    config.init_paths(Some(base_dir));
    config.paths.config_file = config_path;
    config.save()?;

    let store = ArchiveStore::connect(&config).await?;
    if !store.is_initialized().await? {
        store.init_schema().await?;
    }

    info!(
        "Initialized horizons at {}",
        config.paths.base_dir.display()
    );

    println!("\n✓ horizons initialized\n");
    println!("Config:  {}", config.paths.config_file.display());
    println!("Archive: {}", config.paths.db_file.display());
    println!("\nNext steps:");
    println!("  1. Add followees and their feeds to the config file");
    println!("  2. Run 'horizons run' to fetch and archive their content");
    println!(
        "  3. Export {} and run 'horizons summarize'",
        config.summarizer.api_key_env
    );

    Ok(config)
}
