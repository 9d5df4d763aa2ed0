//! System information and validation commands.

use anyhow::Result;
use clap::Subcommand;
use serde_json::Value;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum SystemCommands {
    /// Show server version, disk space, and tool availability
    Info,

    /// Validate that the server host satisfies the mirroring prerequisites
    Validate,

    /// Check server health
    Health,
}

pub async fn execute(cmd: SystemCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        SystemCommands::Info => {
            let info: Value = client.get("/api/v1/system/info").await?;
            match format {
                OutputFormat::Table => {
                    output::print_header("System Info");
                    output::print_detail(
                        "Version",
                        info["version"].as_str().unwrap_or("unknown"),
                    );
                    output::print_detail(
                        "Home Directory",
                        info["home_dir"].as_str().unwrap_or("unknown"),
                    );
                    output::print_detail(
                        "Available Disk (GB)",
                        &info["available_disk_gb"].to_string(),
                    );
                    if let Some(tools) = info["tools"].as_array() {
                        for tool in tools {
                            let name = tool["name"].as_str().unwrap_or("?");
                            let available = tool["available"].as_bool().unwrap_or(false);
                            output::print_detail(
                                name,
                                if available { "available" } else { "missing" },
                            );
                        }
                    }
                }
                _ => output::print_item(&info, format),
            }
        }

        SystemCommands::Validate => {
            let result: Value = client.post("/api/v1/system/validate", &Value::Null).await?;
            let valid = result["valid"].as_bool().unwrap_or(false);
            match format {
                OutputFormat::Table => {
                    if valid {
                        output::print_success("All prerequisites validated");
                    } else {
                        output::print_error("Prerequisite validation failed");
                        if let Some(missing) = result["missing_tools"].as_array() {
                            for tool in missing {
                                output::print_detail("Missing", tool.as_str().unwrap_or("?"));
                            }
                        }
                        if !result["disk_space_ok"].as_bool().unwrap_or(true) {
                            output::print_detail("Disk", "insufficient free space");
                        }
                    }
                }
                _ => output::print_item(&result, format),
            }
            if !valid {
                std::process::exit(1);
            }
        }

        SystemCommands::Health => {
            let health = client.get_text("/health").await?;
            match format {
                OutputFormat::Table => output::print_success(&health),
                _ => println!("{}", health),
            }
        }
    }

    Ok(())
}
