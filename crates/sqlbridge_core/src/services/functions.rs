//! Engine-facing entry points: pool-init and query.
//!
//! # Settings columns
//!
//! Required, STRING: `name`, `url`, `user`, `password`.
//!
//! Optional:
//! - STRING: `driver`, `schema`, `catalog`, `isolation_level` (or `transaction_isolation`)
//! - BOOLEAN: `auto_commit`, `read_only`, `expose_management` (or `jmx`)
//! - INT: `max_pool_size`, `min_idle` (or `minimum_idle`)
//! - LONG milliseconds: `idle_timeout`, `init_fail_timeout` (or
//!   `initialization_fail_timeout`), `connect_timeout` (or `connection_timeout`),
//!   `max_lifetime`, `validation_timeout`
//!
//! Column names are case-sensitive and extra columns are ignored. Null or
//! non-positive numbers leave the setting at its default.

use std::time::Duration;

use crate::engine::{Record, RecordCursor, RecordCursorFactory};
use crate::error::{BridgeError, Result};
use crate::models::{ColumnType, PoolConfig, RecordMetadata};
use crate::services::cursor::ExternalCursorFactory;
use crate::services::registry::PoolRegistry;
use crate::services::session::StatementSession;
use crate::services::types::derive_metadata;

/// Resolve the first of `names` present in `metadata`.
///
/// A present column must have type `expected`; an absent required column is
/// an error.
fn resolve_column(
    metadata: &RecordMetadata,
    names: &[&str],
    expected: ColumnType,
    required: bool,
) -> Result<Option<usize>> {
    let found = names.iter().find_map(|name| metadata.column_index(name).map(|i| (*name, i)));
    match found {
        Some((name, index)) => match metadata.column_type(index) {
            Some(actual) if actual == expected => Ok(Some(index)),
            Some(actual) => Err(BridgeError::column_type_mismatch(name, index, expected, actual)),
            None => Err(BridgeError::column_not_found(name)),
        },
        None if required => Err(BridgeError::column_not_found(names[0])),
        None => Ok(None),
    }
}

/// Column positions of a settings row-set, resolved once before any row is read.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SettingsLayout {
    name: usize,
    url: usize,
    user: usize,
    password: usize,
    driver: Option<usize>,
    schema: Option<usize>,
    catalog: Option<usize>,
    auto_commit: Option<usize>,
    read_only: Option<usize>,
    expose_management: Option<usize>,
    max_pool_size: Option<usize>,
    isolation_level: Option<usize>,
    idle_timeout: Option<usize>,
    init_fail_timeout: Option<usize>,
    connect_timeout: Option<usize>,
    max_lifetime: Option<usize>,
    min_idle: Option<usize>,
    validation_timeout: Option<usize>,
}

impl SettingsLayout {
    fn resolve(metadata: &RecordMetadata) -> Result<Self> {
        let required = |name: &str| -> Result<usize> {
            resolve_column(metadata, &[name], ColumnType::String, true)?
                .ok_or_else(|| BridgeError::column_not_found(name))
        };
        fn optional(
            metadata: &RecordMetadata,
            names: &[&str],
            expected: ColumnType,
        ) -> Result<Option<usize>> {
            resolve_column(metadata, names, expected, false)
        }

        Ok(Self {
            name: required("name")?,
            url: required("url")?,
            user: required("user")?,
            password: required("password")?,
            driver: optional(metadata, &["driver"], ColumnType::String)?,
            schema: optional(metadata, &["schema"], ColumnType::String)?,
            catalog: optional(metadata, &["catalog"], ColumnType::String)?,
            auto_commit: optional(metadata, &["auto_commit"], ColumnType::Boolean)?,
            read_only: optional(metadata, &["read_only"], ColumnType::Boolean)?,
            expose_management: optional(metadata, &["expose_management", "jmx"], ColumnType::Boolean)?,
            max_pool_size: optional(metadata, &["max_pool_size"], ColumnType::Int)?,
            isolation_level: optional(
                metadata,
                &["isolation_level", "transaction_isolation"],
                ColumnType::String,
            )?,
            idle_timeout: optional(metadata, &["idle_timeout"], ColumnType::Long)?,
            init_fail_timeout: optional(
                metadata,
                &["init_fail_timeout", "initialization_fail_timeout"],
                ColumnType::Long,
            )?,
            connect_timeout: optional(metadata, &["connect_timeout", "connection_timeout"], ColumnType::Long)?,
            max_lifetime: optional(metadata, &["max_lifetime"], ColumnType::Long)?,
            min_idle: optional(metadata, &["min_idle", "minimum_idle"], ColumnType::Int)?,
            validation_timeout: optional(metadata, &["validation_timeout"], ColumnType::Long)?,
        })
    }

    /// Build a pool configuration from the current settings row.
    fn read(&self, record: &dyn Record) -> Result<PoolConfig> {
        let name = record.get_str(self.name)?.ok_or_else(|| BridgeError::Configuration {
            message: "Pool name must not be null".to_string(),
            column: Some("name".to_string()),
            position: Some(self.name),
        })?;
        let url = record.get_str(self.url)?.ok_or_else(|| BridgeError::Configuration {
            message: format!("Pool {name} has a null url"),
            column: Some("url".to_string()),
            position: Some(self.url),
        })?;
        let user = record.get_str(self.user)?.unwrap_or_default();
        let password = record.get_str(self.password)?.unwrap_or_default();

        let mut config = PoolConfig::new(name, url, user, password);
        config.driver = read_str(record, self.driver)?;
        config.schema = read_str(record, self.schema)?;
        config.catalog = read_str(record, self.catalog)?;
        config.auto_commit = read_bool(record, self.auto_commit)?;
        config.read_only = read_bool(record, self.read_only)?;
        config.expose_management = read_bool(record, self.expose_management)?;
        config.max_pool_size = read_count(record, self.max_pool_size)?.filter(|n| *n > 0);
        config.isolation_level = read_str(record, self.isolation_level)?;
        config.idle_timeout = read_millis(record, self.idle_timeout)?;
        config.init_fail_timeout = read_millis(record, self.init_fail_timeout)?;
        config.connect_timeout = read_millis(record, self.connect_timeout)?;
        config.max_lifetime = read_millis(record, self.max_lifetime)?;
        config.min_idle = read_count(record, self.min_idle)?;
        config.validation_timeout = read_millis(record, self.validation_timeout)?;
        Ok(config)
    }
}

fn read_str(record: &dyn Record, column: Option<usize>) -> Result<Option<String>> {
    match column {
        Some(col) => record.get_str(col),
        None => Ok(None),
    }
}

fn read_bool(record: &dyn Record, column: Option<usize>) -> Result<Option<bool>> {
    match column {
        Some(col) => record.get_bool(col).map(Some),
        None => Ok(None),
    }
}

/// INT setting; the null sentinel and negative values mean "not set".
fn read_count(record: &dyn Record, column: Option<usize>) -> Result<Option<u32>> {
    match column {
        Some(col) => Ok(u32::try_from(record.get_int(col)?).ok()),
        None => Ok(None),
    }
}

/// LONG millisecond setting; the null sentinel and non-positive values mean "not set".
fn read_millis(record: &dyn Record, column: Option<usize>) -> Result<Option<Duration>> {
    match column {
        Some(col) => {
            let ms = record.get_long(col)?;
            Ok((ms > 0).then(|| Duration::from_millis(ms as u64)))
        }
        None => Ok(None),
    }
}

// ========== Entry Points ==========

/// Register one pool per settings row.
///
/// The settings columns are checked before any row is read. Rows are then
/// registered in order; a failure stops the call but pools registered from
/// earlier rows stay registered.
pub fn pool_init(registry: &PoolRegistry, settings: &dyn RecordCursorFactory) -> Result<()> {
    let layout = SettingsLayout::resolve(settings.metadata())?;
    let mut cursor = settings.cursor()?;
    let outcome = register_rows(registry, &layout, cursor.as_mut());
    let closed = cursor.close();
    let registered = outcome?;
    closed?;
    tracing::info!(pools = registered, "Pool settings processed");
    Ok(())
}

fn register_rows(
    registry: &PoolRegistry,
    layout: &SettingsLayout,
    cursor: &mut dyn RecordCursor,
) -> Result<usize> {
    let mut rows = 0;
    while cursor.has_next()? {
        let config = layout.read(cursor.record())?;
        registry.create_if_absent(config)?;
        rows += 1;
    }
    Ok(rows)
}

/// Run `sql` against the pool registered as `pool`.
///
/// The query is prepared and probed for its result columns here; rows are
/// fetched only once a cursor from the returned factory is advanced.
pub fn query(registry: &PoolRegistry, pool: &str, sql: &str) -> Result<ExternalCursorFactory> {
    let mut session = StatementSession::open_in(registry, pool, sql, true)?;
    let metadata = match session.columns().and_then(|columns| derive_metadata(&columns)) {
        Ok(metadata) => metadata,
        Err(e) => {
            if let Err(close_err) = session.close() {
                tracing::warn!(session_id = %session.id(), error = %close_err, "Failed to release session");
            }
            return Err(e);
        }
    };
    tracing::debug!(
        session_id = %session.id(),
        pool,
        columns = metadata.column_count(),
        "Query prepared"
    );
    Ok(ExternalCursorFactory::new(metadata, session))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnDescriptor, Value};
    use crate::services::row_set::MemoryRowSet;

    fn settings_metadata(extra: &[(&str, ColumnType)]) -> RecordMetadata {
        let mut metadata = RecordMetadata::default();
        for name in ["name", "url", "user", "password"] {
            metadata.add(ColumnDescriptor::new(name, ColumnType::String));
        }
        for (name, ty) in extra {
            metadata.add(ColumnDescriptor::new(*name, *ty));
        }
        metadata
    }

    fn text(s: &str) -> Option<Value> {
        Some(Value::String(s.to_string()))
    }

    #[test]
    fn test_missing_required_column() {
        let mut metadata = RecordMetadata::default();
        metadata.add(ColumnDescriptor::new("name", ColumnType::String));
        metadata.add(ColumnDescriptor::new("url", ColumnType::String));
        metadata.add(ColumnDescriptor::new("password", ColumnType::String));
        match SettingsLayout::resolve(&metadata).unwrap_err() {
            BridgeError::Configuration { message, column, .. } => {
                assert_eq!(message, "Invalid column: user not found");
                assert_eq!(column.as_deref(), Some("user"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_wrong_column_type() {
        let metadata = settings_metadata(&[("max_pool_size", ColumnType::Long)]);
        let err = SettingsLayout::resolve(&metadata).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: Invalid column: max_pool_size, expected type INT but found LONG"
        );
        assert_eq!(err.position(), Some(4));
    }

    #[test]
    fn test_aliases_and_absent_optionals() {
        let metadata = settings_metadata(&[
            ("jmx", ColumnType::Boolean),
            ("connection_timeout", ColumnType::Long),
        ]);
        let layout = SettingsLayout::resolve(&metadata).unwrap();
        assert_eq!(layout.expose_management, Some(4));
        assert_eq!(layout.connect_timeout, Some(5));
        assert_eq!(layout.schema, None);
        assert_eq!(layout.min_idle, None);
    }

    #[test]
    fn test_row_values_become_config() {
        let metadata = settings_metadata(&[
            ("read_only", ColumnType::Boolean),
            ("max_pool_size", ColumnType::Int),
            ("idle_timeout", ColumnType::Long),
            ("connect_timeout", ColumnType::Long),
            ("schema", ColumnType::String),
        ]);
        let mut settings = MemoryRowSet::new(metadata);
        settings
            .push_row(vec![
                text("mem"),
                text("sqlite::memory:"),
                None,
                text("pw"),
                Some(Value::Bool(true)),
                Some(Value::Int(3)),
                None,
                Some(Value::Long(-1)),
                None,
            ])
            .unwrap();

        let layout = SettingsLayout::resolve(settings.metadata()).unwrap();
        let mut cursor = settings.cursor().unwrap();
        assert!(cursor.has_next().unwrap());
        let config = layout.read(cursor.record()).unwrap();
        assert_eq!(config.name, "mem");
        assert_eq!(config.user, "");
        assert_eq!(config.password, "pw");
        assert_eq!(config.read_only, Some(true));
        assert_eq!(config.max_pool_size, Some(3));
        assert_eq!(config.idle_timeout, None);
        assert_eq!(config.connect_timeout, None);
        assert_eq!(config.schema, None);
    }

    #[test]
    fn test_null_name_is_rejected() {
        let mut settings = MemoryRowSet::new(settings_metadata(&[]));
        settings.push_row(vec![None, text("sqlite::memory:"), None, None]).unwrap();
        let registry = PoolRegistry::new();
        let err = pool_init(&registry, &settings).unwrap_err();
        assert!(err.is_configuration());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_query_unknown_pool() {
        let registry = PoolRegistry::new();
        let err = query(&registry, "missing", "select 1").err().unwrap();
        assert_eq!(err.to_string(), "DataSource missing not found");
    }
}
