//! Configuration loading
//!
//! Handles loading configuration from embedded defaults, files, and environment.

use crate::config::AppConfig;
use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Environment variable prefix
const ENV_PREFIX: &str = "BI_AGENT";

/// Load configuration from files and environment
pub fn load_config() -> Result<AppConfig> {
    load(builder(ENV_PREFIX))
}

fn load(builder: ConfigBuilder<DefaultState>) -> Result<AppConfig> {
    let config: AppConfig = builder
        .build()
        .context("Failed to build configuration")?
        .try_deserialize()
        .context("Failed to deserialize configuration")?;
    config
        .approval
        .pending_timeout()
        .context("Failed to validate configuration")?;
    Ok(config)
}

fn builder(env_prefix: &str) -> ConfigBuilder<DefaultState> {
    Config::builder()
        // 1. Embedded defaults (always available)
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        // 2. External overrides (optional)
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            File::with_name(&format!(
                "config/{}",
                std::env::var(format!("{}_ENV", env_prefix))
                    .unwrap_or_else(|_| "development".to_string())
            ))
            .required(false),
        )
        .add_source(File::with_name("config/local").required(false))
        // 3. Environment variables (highest priority)
        // prefix_separator("_") keeps BI_AGENT_APPROVAL__X working with a single
        // underscore after the prefix.
        .add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("approval.auto_approve")
                .with_list_parse_key("flow.passthrough_commands")
                .try_parsing(true),
        )
}
