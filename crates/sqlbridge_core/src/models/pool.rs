//! Pool configuration and pool status models.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{BridgeError, Result};

/// Default maximum number of pooled connections.
pub const DEFAULT_MAX_POOL_SIZE: u32 = 10;
/// Default time to wait for a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default time allowed for a validation round-trip.
pub const DEFAULT_VALIDATION_TIMEOUT: Duration = Duration::from_secs(5);

/// External database binding used by a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// SQLite through rusqlite
    Sqlite,
    /// PostgreSQL through tokio-postgres
    Postgres,
}

impl DriverKind {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
        }
    }

    /// Parse an explicit driver option.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" | "sqlite3" | "org.sqlite.jdbc" => Some(Self::Sqlite),
            "postgres" | "postgresql" | "org.postgresql.driver" => Some(Self::Postgres),
            _ => None,
        }
    }

    /// Infer the driver from a connection url.
    pub fn from_url(url: &str) -> Option<Self> {
        let url = url.trim();
        let url = url.strip_prefix("jdbc:").unwrap_or(url);
        if url.starts_with("sqlite:") || url.starts_with("file:") {
            Some(Self::Sqlite)
        } else if url.starts_with("postgres://") || url.starts_with("postgresql:") {
            Some(Self::Postgres)
        } else {
            None
        }
    }
}

/// Default transaction isolation applied to pooled connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Dirty reads possible
    ReadUncommitted,
    /// No dirty reads
    ReadCommitted,
    /// No non-repeatable reads
    RepeatableRead,
    /// Full isolation
    Serializable,
}

impl IsolationLevel {
    /// Parse "TRANSACTION_READ_COMMITTED", "read committed", "read_committed", ...
    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_uppercase().replace([' ', '-'], "_");
        let normalized = normalized.strip_prefix("TRANSACTION_").unwrap_or(&normalized);
        match normalized {
            "READ_UNCOMMITTED" => Some(Self::ReadUncommitted),
            "READ_COMMITTED" => Some(Self::ReadCommitted),
            "REPEATABLE_READ" => Some(Self::RepeatableRead),
            "SERIALIZABLE" => Some(Self::Serializable),
            _ => None,
        }
    }

    /// SQL spelling for SET TRANSACTION.
    pub fn to_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "read uncommitted",
            Self::ReadCommitted => "read committed",
            Self::RepeatableRead => "repeatable read",
            Self::Serializable => "serializable",
        }
    }
}

/// Configuration of one named pool, built from a settings row.
///
/// Durations are read from the settings row-set as LONG milliseconds and
/// serialized to JSON as `*_ms` integers.
#[derive(Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Registry key
    pub name: String,
    /// Connection url (e.g., "sqlite::memory:", "postgres://host/db")
    pub url: String,
    /// Login user, passed through verbatim
    #[serde(default)]
    pub user: String,
    /// Login password, passed through verbatim
    #[serde(default)]
    pub password: String,
    /// Explicit driver name; inferred from the url when absent
    #[serde(default)]
    pub driver: Option<String>,
    /// Default schema
    #[serde(default)]
    pub schema: Option<String>,
    /// Default catalog (database)
    #[serde(default)]
    pub catalog: Option<String>,
    /// Autocommit flag, recorded only
    #[serde(default)]
    pub auto_commit: Option<bool>,
    /// Read-only connections
    #[serde(default)]
    pub read_only: Option<bool>,
    /// Include pool in the registry management snapshot
    #[serde(default, alias = "jmx")]
    pub expose_management: Option<bool>,
    /// Maximum pooled connections
    #[serde(default)]
    pub max_pool_size: Option<u32>,
    /// Default transaction isolation
    #[serde(default, alias = "transaction_isolation")]
    pub isolation_level: Option<String>,
    /// Idle connections older than this are retired
    #[serde(default, rename = "idle_timeout_ms", with = "duration_ms")]
    pub idle_timeout: Option<Duration>,
    /// Positive: fail pool creation if the first connection can't be made in time
    #[serde(default, rename = "init_fail_timeout_ms", with = "duration_ms")]
    pub init_fail_timeout: Option<Duration>,
    /// Time to wait for a connection
    #[serde(default, rename = "connect_timeout_ms", with = "duration_ms")]
    pub connect_timeout: Option<Duration>,
    /// Connections older than this are retired
    #[serde(default, rename = "max_lifetime_ms", with = "duration_ms")]
    pub max_lifetime: Option<Duration>,
    /// Idle connections kept warm
    #[serde(default)]
    pub min_idle: Option<u32>,
    /// Time allowed for a validation round-trip
    #[serde(default, rename = "validation_timeout_ms", with = "duration_ms")]
    pub validation_timeout: Option<Duration>,
}

impl PoolConfig {
    /// Create a configuration with the required fields.
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            user: user.into(),
            password: password.into(),
            driver: None,
            schema: None,
            catalog: None,
            auto_commit: None,
            read_only: None,
            expose_management: None,
            max_pool_size: None,
            isolation_level: None,
            idle_timeout: None,
            init_fail_timeout: None,
            connect_timeout: None,
            max_lifetime: None,
            min_idle: None,
            validation_timeout: None,
        }
    }

    /// Set the explicit driver.
    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = Some(driver.into());
        self
    }

    /// Set the maximum pool size.
    pub fn with_max_pool_size(mut self, size: u32) -> Self {
        self.max_pool_size = Some(size);
        self
    }

    /// Set read-only mode.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = Some(read_only);
        self
    }

    /// Set management exposure.
    pub fn with_expose_management(mut self, expose: bool) -> Self {
        self.expose_management = Some(expose);
        self
    }

    /// Set the connection wait timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the initialization fail timeout.
    pub fn with_init_fail_timeout(mut self, timeout: Duration) -> Self {
        self.init_fail_timeout = Some(timeout);
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(BridgeError::configuration("Pool name must not be empty"));
        }
        if self.url.trim().is_empty() {
            return Err(BridgeError::configuration(format!(
                "Pool {} has an empty url",
                self.name
            )));
        }
        if self.max_pool_size == Some(0) {
            return Err(BridgeError::configuration(format!(
                "Pool {} max_pool_size must be positive",
                self.name
            )));
        }
        if let Some(level) = &self.isolation_level {
            if IsolationLevel::parse(level).is_none() {
                return Err(BridgeError::configuration(format!(
                    "Pool {} has unknown isolation level {level}",
                    self.name
                )));
            }
        }
        self.driver_kind().map(|_| ())
    }

    /// Resolve the driver binding for this pool.
    pub fn driver_kind(&self) -> Result<DriverKind> {
        match &self.driver {
            Some(driver) => DriverKind::parse(driver).ok_or_else(|| {
                BridgeError::configuration(format!("Unknown driver {driver} for pool {}", self.name))
            }),
            None => DriverKind::from_url(&self.url).ok_or_else(|| {
                BridgeError::configuration(format!(
                    "Cannot infer driver from url of pool {}",
                    self.name
                ))
            }),
        }
    }

    /// Parsed isolation level, if configured and valid.
    pub fn isolation(&self) -> Option<IsolationLevel> {
        self.isolation_level.as_deref().and_then(IsolationLevel::parse)
    }

    /// Maximum pool size with default applied.
    pub fn effective_max_pool_size(&self) -> u32 {
        self.max_pool_size.unwrap_or(DEFAULT_MAX_POOL_SIZE)
    }

    /// Connection wait timeout with default applied.
    pub fn effective_connect_timeout(&self) -> Duration {
        self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT)
    }

    /// Validation timeout with default applied.
    pub fn effective_validation_timeout(&self) -> Duration {
        self.validation_timeout.unwrap_or(DEFAULT_VALIDATION_TIMEOUT)
    }

    /// Load pool configurations from a JSON array file.
    pub fn load_all(path: &Path) -> Result<Vec<PoolConfig>> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_all(&contents)
    }

    /// Parse pool configurations from a JSON array.
    pub fn parse_all(json: &str) -> Result<Vec<PoolConfig>> {
        Ok(serde_json::from_str(json)?)
    }
}

impl std::fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // password intentionally redacted
        f.debug_struct("PoolConfig")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &"***")
            .field("driver", &self.driver)
            .field("schema", &self.schema)
            .field("catalog", &self.catalog)
            .field("read_only", &self.read_only)
            .field("max_pool_size", &self.max_pool_size)
            .field("isolation_level", &self.isolation_level)
            .finish_non_exhaustive()
    }
}

/// Connection pool status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Maximum pool capacity
    pub max_size: usize,
    /// Current connections (idle + active)
    pub size: usize,
    /// Idle connections
    pub idle: usize,
}

impl PoolStatus {
    /// Get the number of active (in-use) connections.
    pub fn active(&self) -> usize {
        self.size.saturating_sub(self.idle)
    }

    /// Get pool utilization as a percentage.
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            (self.active() as f64 / self.max_size as f64) * 100.0
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
