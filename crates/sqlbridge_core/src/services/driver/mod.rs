//! Driver bindings for external SQL sources.
//!
//! A binding exposes four capabilities, mirroring the classic pooled-datasource
//! stack: a [`DataSource`] hands out [`ExternalConnection`]s, a connection
//! prepares [`ExternalStatement`]s, and a statement executes into a
//! forward-only [`ResultIterator`].
//!
//! Every call is blocking. Bindings that talk to async drivers own a private
//! runtime and drive it with `block_on`, so none of these methods may be called
//! from inside an async task.

pub mod postgres;
pub mod sqlite;

use std::sync::Arc;

use crate::error::Result;
use crate::models::{ColumnType, DriverKind, ExternalColumn, PoolConfig, PoolStatus, Value};

/// Random access to the cells of the current row.
pub trait CellAccess {
    /// Read the cell at zero-based `column`; `None` when the value is NULL.
    ///
    /// `expected` is the engine type the caller is about to read, which a
    /// binding may use to pick a decoding for loosely typed storage.
    fn get(&self, column: usize, expected: ColumnType) -> Result<Option<Value>>;
}

/// Forward-only iterator over an executed statement's rows.
pub trait ResultIterator: CellAccess + Send {
    /// Move to the next row; `false` once the rows are exhausted.
    fn next(&mut self) -> Result<bool>;

    /// Release driver resources. Further calls are no-ops.
    fn close(&mut self) -> Result<()>;
}

/// A prepared statement bound to one connection.
pub trait ExternalStatement: Send {
    /// Cap the number of rows the next execution returns. `None` is unbounded.
    fn set_max_rows(&mut self, max_rows: Option<u64>);

    /// Current row cap.
    fn max_rows(&self) -> Option<u64>;

    /// Describe the result columns.
    fn columns(&mut self) -> Result<Vec<ExternalColumn>>;

    /// Execute with the current row cap.
    fn execute(&mut self) -> Result<Box<dyn ResultIterator>>;

    /// Release the statement. Further calls are no-ops.
    fn close(&mut self) -> Result<()>;
}

/// A connection checked out of a pool.
pub trait ExternalConnection: Send {
    /// Prepare `sql`, surfacing syntax and catalog errors immediately.
    fn prepare(&mut self, sql: &str) -> Result<Box<dyn ExternalStatement>>;

    /// Return the connection to its pool. Further calls are no-ops.
    fn close(&mut self) -> Result<()>;
}

/// A named, pooled external source.
pub trait DataSource: Send + Sync {
    /// Pool name.
    fn name(&self) -> &str;

    /// Binding behind this pool.
    fn driver(&self) -> DriverKind;

    /// Check out a connection, waiting up to the configured connect timeout.
    fn acquire(&self) -> Result<Box<dyn ExternalConnection>>;

    /// Pool occupancy.
    fn status(&self) -> PoolStatus;

    /// Close the pool. Connections already checked out finish normally.
    fn close(&self) -> Result<()>;

    /// Whether [`DataSource::close`] has been called.
    fn is_closed(&self) -> bool;
}

/// Open the pool described by `config` with the binding its url or driver
/// option selects.
pub fn open_data_source(config: &PoolConfig) -> Result<Arc<dyn DataSource>> {
    match config.driver_kind()? {
        DriverKind::Sqlite => Ok(Arc::new(sqlite::SqliteDataSource::open(config)?)),
        DriverKind::Postgres => Ok(Arc::new(postgres::PostgresDataSource::open(config)?)),
    }
}

/// Strip the optional `jdbc:` prefix from a connection url.
pub(crate) fn strip_url_prefix(url: &str) -> &str {
    let url = url.trim();
    url.strip_prefix("jdbc:").unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_url_prefix() {
        assert_eq!(strip_url_prefix("jdbc:sqlite::memory:"), "sqlite::memory:");
        assert_eq!(strip_url_prefix("  postgres://h/db "), "postgres://h/db");
    }

    #[test]
    fn test_open_data_source_rejects_unknown_driver() {
        let config = PoolConfig::new("x", "h2:mem:test", "", "");
        let err = open_data_source(&config).err().unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_open_data_source_picks_sqlite() {
        let config = PoolConfig::new("mem", "sqlite::memory:", "", "");
        let source = open_data_source(&config).unwrap();
        assert_eq!(source.driver(), DriverKind::Sqlite);
        assert_eq!(source.name(), "mem");
    }
}
