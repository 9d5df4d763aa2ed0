//! Local CLI configuration management.
//!
//! The CLI keeps a small TOML file with the API server URL so it does
//! not have to be passed on every invocation.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the current CLI configuration
    Show,

    /// Set the API server URL
    SetUrl {
        /// API server URL, e.g. http://mirror-host:8080
        url: String,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CliConfig {
    api_url: Option<String>,
}

fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("pakmirror").join("config.toml"))
}

fn load() -> CliConfig {
    let Some(path) = config_path() else {
        return CliConfig::default();
    };
    std::fs::read_to_string(path)
        .ok()
        .and_then(|content| toml::from_str(&content).ok())
        .unwrap_or_default()
}

/// API URL from the config file, if one is set.
pub fn load_api_url() -> Option<String> {
    load().api_url
}

pub async fn execute(cmd: ConfigCommands, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommands::Show => {
            let config = load();
            match format {
                OutputFormat::Table => {
                    output::print_header("CLI Configuration");
                    output::print_detail(
                        "Config File",
                        &config_path()
                            .map(|p| p.display().to_string())
                            .unwrap_or_else(|| "unavailable".to_string()),
                    );
                    output::print_detail(
                        "API URL",
                        config.api_url.as_deref().unwrap_or("http://localhost:8080 (default)"),
                    );
                }
                _ => output::print_item(&config, format),
            }
        }

        ConfigCommands::SetUrl { url } => {
            let path = config_path().context("Could not determine config directory")?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let config = CliConfig { api_url: Some(url.clone()) };
            let content = toml::to_string_pretty(&config)?;
            std::fs::write(&path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            output::print_success(&format!("API URL set to {}", url));
        }
    }

    Ok(())
}
