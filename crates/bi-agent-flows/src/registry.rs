//! Database connection registry
//!
//! Named connection records plus the currently active one. Two
//! implementations: [`MemoryConnectionRegistry`] for tests and embedding, and
//! [`FileConnectionRegistry`], a JSON document in the data dir.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{FlowsError, Result};

/// How long a TCP reachability probe may take
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Supported database engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    /// PostgreSQL
    Postgres,
    /// MySQL / MariaDB
    Mysql,
    /// SQLite file
    Sqlite,
}

impl DbType {
    /// Every engine, in menu order
    pub const ALL: [DbType; 3] = [DbType::Postgres, DbType::Mysql, DbType::Sqlite];

    /// Stable identifier
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DbType::Postgres => "postgres",
            DbType::Mysql => "mysql",
            DbType::Sqlite => "sqlite",
        }
    }

    /// Human-readable name
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            DbType::Postgres => "PostgreSQL",
            DbType::Mysql => "MySQL",
            DbType::Sqlite => "SQLite",
        }
    }

    /// Standard server port; `None` for file databases
    #[must_use]
    pub fn default_port(&self) -> Option<u16> {
        match self {
            DbType::Postgres => Some(5432),
            DbType::Mysql => Some(3306),
            DbType::Sqlite => None,
        }
    }

    /// Whether the engine is reached over the network
    #[must_use]
    pub fn is_server(&self) -> bool {
        !matches!(self, DbType::Sqlite)
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DbType {
    type Err = FlowsError;

    fn from_str(s: &str) -> Result<Self> {
        DbType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| FlowsError::UnknownDbType(s.to_string()))
    }
}

/// A named database connection
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Unique name
    pub name: String,
    /// Engine
    pub db_type: DbType,
    /// Server host; empty for SQLite
    #[serde(default)]
    pub host: String,
    /// Server port; `None` for SQLite
    #[serde(default)]
    pub port: Option<u16>,
    /// Database name, or file path for SQLite
    pub database: String,
    /// Login user; empty for SQLite
    #[serde(default)]
    pub username: String,
    /// Login password; empty for SQLite
    #[serde(default)]
    pub password: String,
}

impl ConnectionConfig {
    /// SQLite connection to a file
    pub fn sqlite(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            db_type: DbType::Sqlite,
            host: String::new(),
            port: None,
            database: path.into(),
            username: String::new(),
            password: String::new(),
        }
    }

    /// Server connection on the engine's default port
    pub fn server(
        name: impl Into<String>,
        db_type: DbType,
        host: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            db_type,
            host: host.into(),
            port: db_type.default_port(),
            database: database.into(),
            username: username.into(),
            password: String::new(),
        }
    }

    /// Builder-style port override
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Builder-style password
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// One-line description without the password
    #[must_use]
    pub fn summary(&self) -> String {
        match self.db_type {
            DbType::Sqlite => format!("sqlite:{}", self.database),
            _ => format!(
                "{}://{}@{}:{}/{}",
                self.db_type,
                self.username,
                self.host,
                self.port.or(self.db_type.default_port()).unwrap_or(0),
                self.database
            ),
        }
    }

    /// Check the fields the engine needs are present
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("connection name is empty".to_string());
        }
        if self.database.trim().is_empty() {
            return Err("database is empty".to_string());
        }
        if self.db_type.is_server() {
            if self.host.trim().is_empty() {
                return Err("host is empty".to_string());
            }
            match self.port {
                Some(0) | None => return Err("port is missing".to_string()),
                Some(_) => {}
            }
            if self.username.trim().is_empty() {
                return Err("username is empty".to_string());
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("name", &self.name)
            .field("db_type", &self.db_type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Named connections plus the active one
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// All connections, sorted by name
    async fn list_connections(&self) -> Result<Vec<ConnectionConfig>>;

    /// Connection by name
    async fn get_connection(&self, name: &str) -> Result<Option<ConnectionConfig>>;

    /// Insert or overwrite a connection
    async fn register_connection(&self, config: ConnectionConfig) -> Result<()>;

    /// Remove a connection; `false` when it did not exist
    async fn delete_connection(&self, name: &str) -> Result<bool>;

    /// Check the connection is usable; failure is `ConnectionTest`
    async fn test_connection(&self, config: &ConnectionConfig) -> Result<()>;

    /// Make `name` the active connection
    async fn activate(&self, name: &str) -> Result<()>;

    /// Name of the active connection
    async fn active_connection(&self) -> Result<Option<String>>;
}

/// Registry contents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    active: Option<String>,
    #[serde(default)]
    connections: BTreeMap<String, ConnectionConfig>,
}

impl RegistryDocument {
    fn activate(&mut self, name: &str) -> Result<()> {
        if !self.connections.contains_key(name) {
            return Err(FlowsError::ConnectionNotFound(name.to_string()));
        }
        self.active = Some(name.to_string());
        Ok(())
    }

    fn delete(&mut self, name: &str) -> bool {
        let removed = self.connections.remove(name).is_some();
        if removed && self.active.as_deref() == Some(name) {
            self.active = None;
        }
        removed
    }
}

type ConnectionTester =
    Box<dyn Fn(&ConnectionConfig) -> std::result::Result<(), String> + Send + Sync>;

/// In-memory registry
///
/// `test_connection` only validates the record unless a tester is supplied.
pub struct MemoryConnectionRegistry {
    doc: RwLock<RegistryDocument>,
    tester: ConnectionTester,
}

impl MemoryConnectionRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            doc: RwLock::new(RegistryDocument::default()),
            tester: Box::new(ConnectionConfig::validate),
        }
    }

    /// Registry pre-populated with `connections`
    #[must_use]
    pub fn with_connections(connections: impl IntoIterator<Item = ConnectionConfig>) -> Self {
        let registry = Self::new();
        let doc = RegistryDocument {
            active: None,
            connections: connections
                .into_iter()
                .map(|c| (c.name.clone(), c))
                .collect(),
        };
        Self {
            doc: RwLock::new(doc),
            ..registry
        }
    }

    /// Replace the connection tester
    #[must_use]
    pub fn with_tester<F>(mut self, tester: F) -> Self
    where
        F: Fn(&ConnectionConfig) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.tester = Box::new(tester);
        self
    }
}

impl Default for MemoryConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionRegistry for MemoryConnectionRegistry {
    async fn list_connections(&self) -> Result<Vec<ConnectionConfig>> {
        Ok(self.doc.read().await.connections.values().cloned().collect())
    }

    async fn get_connection(&self, name: &str) -> Result<Option<ConnectionConfig>> {
        Ok(self.doc.read().await.connections.get(name).cloned())
    }

    async fn register_connection(&self, config: ConnectionConfig) -> Result<()> {
        info!(name = %config.name, db_type = %config.db_type, "Connection registered");
        self.doc
            .write()
            .await
            .connections
            .insert(config.name.clone(), config);
        Ok(())
    }

    async fn delete_connection(&self, name: &str) -> Result<bool> {
        let removed = self.doc.write().await.delete(name);
        info!(name, removed, "Connection deleted");
        Ok(removed)
    }

    async fn test_connection(&self, config: &ConnectionConfig) -> Result<()> {
        (self.tester)(config).map_err(FlowsError::ConnectionTest)
    }

    async fn activate(&self, name: &str) -> Result<()> {
        self.doc.write().await.activate(name)?;
        info!(name, "Connection activated");
        Ok(())
    }

    async fn active_connection(&self) -> Result<Option<String>> {
        Ok(self.doc.read().await.active.clone())
    }
}

/// Registry persisted as a JSON document
///
/// Every operation re-reads the file, so edits from another process are
/// picked up. Writes go through a temporary file and a rename.
#[derive(Debug)]
pub struct FileConnectionRegistry {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileConnectionRegistry {
    /// Registry backed by `path`; the file is created on first write
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<RegistryDocument> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) if raw.trim().is_empty() => Ok(RegistryDocument::default()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RegistryDocument::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, doc: &RegistryDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(doc)?).await?;

        // Passwords are stored in the document; owner read/write only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }

        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), "Connection registry saved");
        Ok(())
    }
}

#[async_trait]
impl ConnectionRegistry for FileConnectionRegistry {
    async fn list_connections(&self) -> Result<Vec<ConnectionConfig>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.connections.into_values().collect())
    }

    async fn get_connection(&self, name: &str) -> Result<Option<ConnectionConfig>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.connections.remove(name))
    }

    async fn register_connection(&self, config: ConnectionConfig) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load().await?;
        info!(name = %config.name, db_type = %config.db_type, "Connection registered");
        doc.connections.insert(config.name.clone(), config);
        self.store(&doc).await
    }

    async fn delete_connection(&self, name: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load().await?;
        let removed = doc.delete(name);
        if removed {
            self.store(&doc).await?;
        }
        info!(name, removed, "Connection deleted");
        Ok(removed)
    }

    async fn test_connection(&self, config: &ConnectionConfig) -> Result<()> {
        probe(config).await.map_err(FlowsError::ConnectionTest)
    }

    async fn activate(&self, name: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load().await?;
        doc.activate(name)?;
        self.store(&doc).await?;
        info!(name, "Connection activated");
        Ok(())
    }

    async fn active_connection(&self) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.active)
    }
}

/// Validate the record, then check the server accepts TCP connections or the
/// SQLite file's directory exists.
pub async fn probe(config: &ConnectionConfig) -> std::result::Result<(), String> {
    config.validate()?;

    if !config.db_type.is_server() {
        let path = Path::new(&config.database);
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        return match dir {
            Some(dir) if !dir.is_dir() => {
                Err(format!("directory {} does not exist", dir.display()))
            }
            _ => Ok(()),
        };
    }

    let port = config.port.unwrap_or(0);
    let addr = format!("{}:{}", config.host, port);
    match tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(&addr)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => {
            warn!(addr = %addr, error = %e, "Connection probe failed");
            Err(format!("cannot reach {}: {}", addr, e))
        }
        Err(_) => {
            warn!(addr = %addr, "Connection probe timed out");
            Err(format!("timed out reaching {}", addr))
        }
    }
}
