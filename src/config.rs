//! Application configuration types
//!
//! Aggregates the library configuration sections with the binary's own
//! settings (data dir, logging, connection registry).

use anyhow::{Context, Result};
use bi_agent_core::config::{ApprovalConfig, FlowEngineConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root for relative paths; platform data dir when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub flow: FlowEngineConfig,
    #[serde(default)]
    pub connections: ConnectionsConfig,
}

/// Log file settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Log directory, relative to the data dir
    #[serde(default = "default_log_dir")]
    pub directory: PathBuf,
    /// Daily-rolled file name prefix
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    /// Emit JSON lines instead of text
    #[serde(default)]
    pub json: bool,
}

fn default_filter() -> String {
    "bi_agent=info,bi_agent_core=info,bi_agent_flows=info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_file_prefix() -> String {
    "bi-agent.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            directory: default_log_dir(),
            file_prefix: default_file_prefix(),
            json: false,
        }
    }
}

/// Connection registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionsConfig {
    /// Registry file, relative to the data dir
    #[serde(default = "default_registry")]
    pub registry: PathBuf,
}

fn default_registry() -> PathBuf {
    PathBuf::from("connections.json")
}

impl Default for ConnectionsConfig {
    fn default() -> Self {
        Self {
            registry: default_registry(),
        }
    }
}

impl AppConfig {
    /// Effective data directory
    pub fn data_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_local_dir()
                .map(|d| d.join("bi-agent"))
                .unwrap_or_else(|| PathBuf::from(".bi-agent")),
        }
    }

    /// Resolve `path` against the data dir unless it is absolute
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir().join(path)
        }
    }

    /// Approval audit log location
    pub fn audit_log_path(&self) -> PathBuf {
        self.resolve(&self.approval.audit_log)
    }

    /// Connection registry location
    pub fn registry_path(&self) -> PathBuf {
        self.resolve(&self.connections.registry)
    }

    /// Log directory
    pub fn log_dir(&self) -> PathBuf {
        self.resolve(&self.logging.directory)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    /// Write as TOML to `path`, creating parent directories
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = self.to_toml()?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_paths_resolve_against_data_dir() {
        let config = AppConfig {
            data_dir: Some(PathBuf::from("/var/lib/bi")),
            ..AppConfig::default()
        };
        assert_eq!(
            config.audit_log_path(),
            PathBuf::from("/var/lib/bi/approvals.jsonl")
        );
        assert_eq!(
            config.registry_path(),
            PathBuf::from("/var/lib/bi/connections.json")
        );
        assert_eq!(config.log_dir(), PathBuf::from("/var/lib/bi/logs"));
    }

    #[test]
    fn test_absolute_paths_are_kept() {
        let mut config = AppConfig::default();
        config.approval.audit_log = PathBuf::from("/tmp/audit.jsonl");
        assert_eq!(config.audit_log_path(), PathBuf::from("/tmp/audit.jsonl"));
    }

    #[test]
    fn test_save_writes_toml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("local.toml");

        AppConfig::default().save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("[approval]"));
        assert!(raw.contains("auto_approve"));
        assert!(raw.contains("\"low\""));
        assert!(!raw.contains("data_dir"));
    }
}
