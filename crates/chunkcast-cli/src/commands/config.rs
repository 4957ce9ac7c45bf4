//! Config command implementation.

use std::path::Path;

use anyhow::{Context, Result};

use chunkcast_core::config::Config;

use super::{ConfigAction, ConfigArgs};

/// Run the config command.
pub fn run(args: ConfigArgs, config_path: Option<&Path>) -> Result<()> {
    let path = config_path.map_or_else(Config::config_path, Path::to_path_buf);

    match args.action {
        ConfigAction::Show => {
            let config = super::load_config(config_path)?;
            let rendered = toml::to_string_pretty(&config).context("Failed to render config")?;
            println!("{rendered}");
        }
        ConfigAction::Path => {
            println!("{}", path.display());
        }
        ConfigAction::Reset => {
            Config::default()
                .save_to(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Configuration reset to defaults at {}", path.display());
        }
    }
    Ok(())
}
