//! PostgreSQL binding: deadpool-postgres driven from a private tokio runtime.
//!
//! Provides:
//! - Pool settings applied through the connection startup options
//! - Eager validation when an init-fail timeout is configured
//! - Idle and lifetime retirement of pooled clients on acquire
//! - Row-at-a-time streaming via `query_raw`

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use futures_util::StreamExt;
use tokio_postgres::types::{FromSql, ToSql, Type};
use tokio_postgres::{NoTls, Row, RowStream, Statement};

use super::{
    strip_url_prefix, CellAccess, DataSource, ExternalConnection, ExternalStatement,
    ResultIterator,
};
use crate::error::{BridgeError, Result};
use crate::models::{
    ColumnType, DriverKind, ExternalColumn, ExternalType, PoolConfig, PoolStatus, Value,
};

const APPLICATION_NAME: &str = "sqlbridge";

/// Build the driver configuration for `config`.
///
/// User and password from the settings row override any in the url; the
/// catalog becomes the database name. Schema, read-only and isolation are
/// session defaults sent as startup options.
fn pg_config(config: &PoolConfig) -> Result<tokio_postgres::Config> {
    let url = strip_url_prefix(&config.url);
    let mut pg_config: tokio_postgres::Config = url.parse().map_err(|e| {
        BridgeError::Configuration {
            message: format!("Invalid postgres url for pool {}: {e}", config.name),
            column: Some("url".to_string()),
            position: None,
        }
    })?;

    if !config.user.is_empty() {
        pg_config.user(&config.user);
    }
    if !config.password.is_empty() {
        pg_config.password(&config.password);
    }
    if let Some(catalog) = &config.catalog {
        pg_config.dbname(catalog);
    }
    pg_config.application_name(APPLICATION_NAME);
    pg_config.connect_timeout(config.effective_connect_timeout());

    let options = startup_options(config);
    if !options.is_empty() {
        pg_config.options(&options);
    }
    Ok(pg_config)
}

fn startup_options(config: &PoolConfig) -> String {
    let mut options = Vec::new();
    if let Some(schema) = &config.schema {
        options.push(format!("-c search_path={schema}"));
    }
    if config.read_only == Some(true) {
        options.push("-c default_transaction_read_only=on".to_string());
    }
    if let Some(level) = config.isolation() {
        // Spaces inside an option value are backslash-escaped.
        options.push(format!(
            "-c default_transaction_isolation={}",
            level.to_sql().replace(' ', "\\ ")
        ));
    }
    options.join(" ")
}

// ========== Data Source ==========

/// Pool of PostgreSQL clients registered under one name.
pub struct PostgresDataSource {
    name: String,
    pool: Pool,
    runtime: Arc<tokio::runtime::Runtime>,
    idle_timeout: Option<Duration>,
    max_lifetime: Option<Duration>,
    closed: AtomicBool,
}

impl PostgresDataSource {
    /// Build the pool described by `config`.
    ///
    /// With a positive init-fail timeout one client is opened and validated
    /// with `SELECT 1` before this returns; otherwise clients are opened on
    /// first use.
    pub fn open(config: &PoolConfig) -> Result<Self> {
        let pg_config = pg_config(config)?;
        let connect_timeout = config.effective_connect_timeout();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(format!("sqlbridge-pg-{}", config.name))
            .enable_all()
            .build()
            .map_err(|e| BridgeError::internal(format!("Failed to create tokio runtime: {e}")))?;

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );

        let max_size = config.effective_max_pool_size() as usize;
        let pool = Pool::builder(manager)
            .max_size(max_size)
            .wait_timeout(Some(connect_timeout))
            .create_timeout(Some(connect_timeout))
            .recycle_timeout(Some(config.effective_validation_timeout()))
            .runtime(Runtime::Tokio1)
            .build()?;

        if let Some(timeout) = config.init_fail_timeout.filter(|t| !t.is_zero()) {
            runtime.block_on(validate(&pool, timeout)).map_err(|e| {
                pool.close();
                e
            })?;
        }

        if let Some(min_idle) = config.min_idle.filter(|n| *n > 0) {
            runtime.block_on(warm_up(&pool, (min_idle as usize).min(max_size), &config.name));
        }

        tracing::info!(pool = %config.name, max_size, "PostgreSQL pool created");

        Ok(Self {
            name: config.name.clone(),
            pool,
            runtime: Arc::new(runtime),
            idle_timeout: config.idle_timeout,
            max_lifetime: config.max_lifetime,
            closed: AtomicBool::new(false),
        })
    }

    /// Drop pooled clients that outlived the idle timeout or max lifetime.
    fn retire_expired(&self) {
        if self.idle_timeout.is_none() && self.max_lifetime.is_none() {
            return;
        }
        let result = self.pool.retain(|_, metrics| {
            self.max_lifetime.map_or(true, |max| metrics.age() < max)
                && self.idle_timeout.map_or(true, |idle| metrics.last_used() < idle)
        });
        if !result.removed.is_empty() {
            tracing::debug!(
                pool = %self.name,
                retired = result.removed.len(),
                "Retired expired connections"
            );
        }
    }
}

async fn validate(pool: &Pool, timeout: Duration) -> Result<()> {
    let client = tokio::time::timeout(timeout, pool.get())
        .await
        .map_err(|_| BridgeError::connection(format!("No connection within {timeout:?}")))??;
    client
        .simple_query("SELECT 1")
        .await
        .map_err(|e| BridgeError::connection_with_source("Connection validation failed", e))?;
    Ok(())
}

/// Open up to `count` clients and return them to the pool idle.
async fn warm_up(pool: &Pool, count: usize, name: &str) {
    let mut held = Vec::with_capacity(count);
    for _ in 0..count {
        match pool.get().await {
            Ok(client) => held.push(client),
            Err(e) => {
                tracing::warn!(pool = %name, error = %e, "Could not pre-open idle connection");
                break;
            }
        }
    }
}

impl DataSource for PostgresDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn driver(&self) -> DriverKind {
        DriverKind::Postgres
    }

    fn acquire(&self) -> Result<Box<dyn ExternalConnection>> {
        if self.is_closed() {
            return Err(BridgeError::connection(format!("DataSource {} is closed", self.name)));
        }
        self.retire_expired();
        let client = self.runtime.block_on(self.pool.get())?;
        Ok(Box::new(PostgresConnection {
            client: Some(Arc::new(client)),
            runtime: Arc::clone(&self.runtime),
        }))
    }

    fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus { max_size: status.max_size, size: status.size, idle: status.available }
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.pool.close();
            tracing::info!(pool = %self.name, "PostgreSQL pool closed");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.pool.is_closed()
    }
}

// ========== Connection, Statement, Rows ==========

/// A pooled client; returned to the pool once every handle on it is closed.
pub struct PostgresConnection {
    client: Option<Arc<Object>>,
    runtime: Arc<tokio::runtime::Runtime>,
}

impl ExternalConnection for PostgresConnection {
    fn prepare(&mut self, sql: &str) -> Result<Box<dyn ExternalStatement>> {
        let client = self.client.as_ref().ok_or_else(|| BridgeError::execution("Connection is closed"))?;
        let statement = self.runtime.block_on(client.prepare(sql))?;
        Ok(Box::new(PostgresStatement {
            client: Some(Arc::clone(client)),
            runtime: Arc::clone(&self.runtime),
            statement,
            max_rows: None,
        }))
    }

    fn close(&mut self) -> Result<()> {
        self.client = None;
        Ok(())
    }
}

/// A server-side prepared statement.
pub struct PostgresStatement {
    client: Option<Arc<Object>>,
    runtime: Arc<tokio::runtime::Runtime>,
    statement: Statement,
    max_rows: Option<u64>,
}

impl ExternalStatement for PostgresStatement {
    fn set_max_rows(&mut self, max_rows: Option<u64>) {
        self.max_rows = max_rows;
    }

    fn max_rows(&self) -> Option<u64> {
        self.max_rows
    }

    fn columns(&mut self) -> Result<Vec<ExternalColumn>> {
        Ok(self
            .statement
            .columns()
            .iter()
            .map(|c| ExternalColumn::new(c.name(), type_code(c.type_()), c.type_().name()))
            .collect())
    }

    fn execute(&mut self) -> Result<Box<dyn ResultIterator>> {
        let client = self.client.as_ref().ok_or_else(|| BridgeError::execution("Statement is closed"))?;
        if self.max_rows == Some(0) {
            return Ok(Box::new(PostgresRows::empty(Arc::clone(&self.runtime))));
        }
        let stream = self.runtime.block_on(
            client.query_raw(&self.statement, std::iter::empty::<&(dyn ToSql + Sync)>()),
        )?;
        Ok(Box::new(PostgresRows {
            stream: Some(Box::pin(stream)),
            runtime: Arc::clone(&self.runtime),
            current: None,
            remaining: self.max_rows,
        }))
    }

    fn close(&mut self) -> Result<()> {
        self.client = None;
        Ok(())
    }
}

/// Streaming PostgreSQL result, one row pulled per advance.
pub struct PostgresRows {
    stream: Option<Pin<Box<RowStream>>>,
    runtime: Arc<tokio::runtime::Runtime>,
    current: Option<Row>,
    remaining: Option<u64>,
}

impl PostgresRows {
    fn empty(runtime: Arc<tokio::runtime::Runtime>) -> Self {
        Self { stream: None, runtime, current: None, remaining: Some(0) }
    }
}

impl CellAccess for PostgresRows {
    fn get(&self, column: usize, expected: ColumnType) -> Result<Option<Value>> {
        let row = self.current.as_ref().ok_or_else(|| BridgeError::execution("No current row"))?;
        if column >= row.len() {
            return Err(BridgeError::execution(format!("Column index {column} out of range")));
        }
        decode(row, column, expected)
    }
}

impl ResultIterator for PostgresRows {
    fn next(&mut self) -> Result<bool> {
        self.current = None;
        if self.remaining == Some(0) {
            // Dropping the stream stops reading the rest of the portal.
            self.stream = None;
            return Ok(false);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Ok(false);
        };
        match self.runtime.block_on(stream.next()) {
            Some(Ok(row)) => {
                self.current = Some(row);
                if let Some(remaining) = self.remaining.as_mut() {
                    *remaining -= 1;
                }
                Ok(true)
            }
            Some(Err(e)) => {
                self.stream = None;
                Err(BridgeError::from(e))
            }
            None => {
                self.stream = None;
                Ok(false)
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.stream = None;
        self.current = None;
        Ok(())
    }
}

// ========== Type Codes ==========

/// Standard type code for a PostgreSQL type.
fn type_code(ty: &Type) -> ExternalType {
    match *ty {
        Type::BOOL => ExternalType::BOOLEAN,
        Type::INT2 => ExternalType::SMALLINT,
        Type::INT4 => ExternalType::INTEGER,
        Type::INT8 => ExternalType::BIGINT,
        Type::FLOAT4 => ExternalType::REAL,
        Type::FLOAT8 => ExternalType::DOUBLE,
        Type::TEXT | Type::VARCHAR | Type::NAME | Type::UNKNOWN => ExternalType::VARCHAR,
        Type::BPCHAR | Type::CHAR => ExternalType::CHAR,
        Type::NUMERIC => ExternalType::NUMERIC,
        Type::DATE => ExternalType::DATE,
        Type::TIME => ExternalType::TIME,
        Type::TIMETZ => ExternalType::TIME_WITH_TIMEZONE,
        Type::TIMESTAMP => ExternalType::TIMESTAMP,
        Type::TIMESTAMPTZ => ExternalType::TIMESTAMP_WITH_TIMEZONE,
        Type::BYTEA => ExternalType::BINARY,
        _ => ExternalType::OTHER,
    }
}

/// Typed reads of one row's columns.
trait ColumnReader {
    fn column_type(&self, idx: usize) -> &Type;

    fn read<'a, T: FromSql<'a>>(&'a self, idx: usize) -> Result<T>;
}

impl ColumnReader for Row {
    fn column_type(&self, idx: usize) -> &Type {
        self.columns()[idx].type_()
    }

    fn read<'a, T: FromSql<'a>>(&'a self, idx: usize) -> Result<T> {
        Ok(self.try_get(idx)?)
    }
}

fn decode(row: &impl ColumnReader, idx: usize, expected: ColumnType) -> Result<Option<Value>> {
    let ty = row.column_type(idx).clone();
    let value = match ty {
        Type::BOOL => row.read::<Option<bool>>(idx)?.map(Value::Bool),
        Type::INT2 => row.read::<Option<i16>>(idx)?.map(Value::Short),
        Type::INT4 => row.read::<Option<i32>>(idx)?.map(Value::Int),
        Type::INT8 => row.read::<Option<i64>>(idx)?.map(Value::Long),
        Type::FLOAT4 => row.read::<Option<f32>>(idx)?.map(Value::Float),
        Type::FLOAT8 => row.read::<Option<f64>>(idx)?.map(Value::Double),
        Type::CHAR => row.read::<Option<i8>>(idx)?.map(Value::Byte),
        Type::BYTEA => row.read::<Option<Vec<u8>>>(idx)?.map(Value::Binary),
        Type::DATE => row.read::<Option<NaiveDate>>(idx)?.map(Value::Date),
        Type::TIME => row.read::<Option<NaiveTime>>(idx)?.map(Value::Time),
        Type::TIMESTAMP => row.read::<Option<NaiveDateTime>>(idx)?.map(Value::Timestamp),
        Type::TIMESTAMPTZ => row.read::<Option<DateTime<Utc>>>(idx)?.map(Value::TimestampTz),
        _ => match expected {
            ColumnType::String => row.read::<Option<String>>(idx)?.map(Value::String),
            _ => {
                return Err(BridgeError::execution(format!(
                    "Cannot decode {} as {expected}",
                    ty.name()
                )))
            }
        },
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IsolationLevel;

    /// Binary wire cells, decoded the way a live row decodes them.
    struct WireRow(Vec<(Type, Option<Vec<u8>>)>);

    impl ColumnReader for WireRow {
        fn column_type(&self, idx: usize) -> &Type {
            &self.0[idx].0
        }

        fn read<'a, T: FromSql<'a>>(&'a self, idx: usize) -> Result<T> {
            let (ty, raw) = &self.0[idx];
            if !T::accepts(ty) {
                return Err(BridgeError::execution(format!("wrong type {}", ty.name())));
            }
            T::from_sql_nullable(ty, raw.as_deref()).map_err(|e| BridgeError::Execution {
                message: e.to_string(),
                detail: None,
                hint: None,
                position: None,
                code: None,
                source: Some(e),
            })
        }
    }

    fn cell(ty: Type, raw: &[u8]) -> (Type, Option<Vec<u8>>) {
        (ty, Some(raw.to_vec()))
    }

    #[test]
    fn test_decode_native_types() {
        let row = WireRow(vec![
            cell(Type::BOOL, &[1]),
            cell(Type::INT2, &7i16.to_be_bytes()),
            cell(Type::INT4, &(-42i32).to_be_bytes()),
            cell(Type::INT8, &5_000_000_000i64.to_be_bytes()),
            cell(Type::FLOAT8, &2.5f64.to_be_bytes()),
            cell(Type::TEXT, b"hello"),
            cell(Type::BYTEA, &[0xde, 0xad]),
            // 2000-01-02, days after the postgres epoch
            cell(Type::DATE, &1i32.to_be_bytes()),
            // 2000-01-01T00:00:01, microseconds after the postgres epoch
            cell(Type::TIMESTAMP, &1_000_000i64.to_be_bytes()),
        ]);

        assert_eq!(decode(&row, 0, ColumnType::Boolean).unwrap(), Some(Value::Bool(true)));
        assert_eq!(decode(&row, 1, ColumnType::Short).unwrap(), Some(Value::Short(7)));
        assert_eq!(decode(&row, 2, ColumnType::Int).unwrap(), Some(Value::Int(-42)));
        assert_eq!(decode(&row, 3, ColumnType::Long).unwrap(), Some(Value::Long(5_000_000_000)));
        assert_eq!(decode(&row, 4, ColumnType::Double).unwrap(), Some(Value::Double(2.5)));
        assert_eq!(decode(&row, 5, ColumnType::String).unwrap(), Some(Value::String("hello".into())));
        assert_eq!(decode(&row, 6, ColumnType::Binary).unwrap(), Some(Value::Binary(vec![0xde, 0xad])));

        let date = decode(&row, 7, ColumnType::Date).unwrap().unwrap();
        assert_eq!(date, Value::Date(NaiveDate::from_ymd_opt(2000, 1, 2).unwrap()));
        let ts = decode(&row, 8, ColumnType::Timestamp).unwrap().unwrap();
        assert_eq!(ts.as_epoch_micros(), Some(946_684_801_000_000));
    }

    #[test]
    fn test_decode_null_cell() {
        let row = WireRow(vec![(Type::INT4, None), (Type::TEXT, None)]);
        assert_eq!(decode(&row, 0, ColumnType::Int).unwrap(), None);
        assert_eq!(decode(&row, 1, ColumnType::String).unwrap(), None);
    }

    #[test]
    fn test_decode_other_types_only_as_text() {
        let row = WireRow(vec![cell(Type::NAME, b"pg_class"), cell(Type::NAME, b"pg_class")]);
        assert_eq!(
            decode(&row, 0, ColumnType::String).unwrap(),
            Some(Value::String("pg_class".into()))
        );
        let err = decode(&row, 1, ColumnType::Long).err().unwrap();
        assert!(err.to_string().contains("Cannot decode name"));

        // A type with no text form fails even when text is expected.
        let row = WireRow(vec![cell(Type::NUMERIC, &[0, 0, 0, 0, 0, 0, 0, 0])]);
        assert!(decode(&row, 0, ColumnType::String).is_err());
    }

    #[test]
    fn test_type_codes_agree_with_decoding() {
        assert_eq!(type_code(&Type::NAME), ExternalType::VARCHAR);
        assert_eq!(type_code(&Type::BPCHAR), ExternalType::CHAR);
        assert_eq!(type_code(&Type::CHAR), ExternalType::CHAR);
        assert_eq!(type_code(&Type::DATE), ExternalType::DATE);
        assert_eq!(type_code(&Type::TIME), ExternalType::TIME);
        assert_eq!(type_code(&Type::TIMETZ), ExternalType::TIME_WITH_TIMEZONE);
        assert_eq!(type_code(&Type::TIMESTAMP), ExternalType::TIMESTAMP);
        assert_eq!(type_code(&Type::UUID), ExternalType::OTHER);
    }

    #[test]
    fn test_type_codes() {
        assert_eq!(type_code(&Type::INT4), ExternalType::INTEGER);
        assert_eq!(type_code(&Type::INT8), ExternalType::BIGINT);
        assert_eq!(type_code(&Type::FLOAT4), ExternalType::REAL);
        assert_eq!(type_code(&Type::VARCHAR), ExternalType::VARCHAR);
        assert_eq!(type_code(&Type::TIMESTAMPTZ), ExternalType::TIMESTAMP_WITH_TIMEZONE);
        assert_eq!(type_code(&Type::BYTEA), ExternalType::BINARY);
        assert_eq!(type_code(&Type::NUMERIC), ExternalType::NUMERIC);
        assert_eq!(type_code(&Type::JSONB), ExternalType::OTHER);
    }

    #[test]
    fn test_startup_options() {
        let mut config = PoolConfig::new("pg", "postgres://localhost/app", "u", "p");
        assert_eq!(startup_options(&config), "");

        config.schema = Some("reporting".into());
        config.read_only = Some(true);
        config.isolation_level = Some(IsolationLevel::ReadCommitted.to_sql().into());
        assert_eq!(
            startup_options(&config),
            "-c search_path=reporting -c default_transaction_read_only=on \
             -c default_transaction_isolation=read\\ committed"
        );
    }

    #[test]
    fn test_pg_config_overrides_credentials_and_database() {
        let mut config = PoolConfig::new(
            "pg",
            "jdbc:postgresql://db.internal:6543/app?user=url_user",
            "settings_user",
            "secret",
        );
        config.catalog = Some("warehouse".into());
        let pg = pg_config(&config).unwrap();
        assert_eq!(pg.get_user(), Some("settings_user"));
        assert_eq!(pg.get_password(), Some(&b"secret"[..]));
        assert_eq!(pg.get_dbname(), Some("warehouse"));
        assert_eq!(pg.get_ports(), &[6543]);
        assert_eq!(pg.get_application_name(), Some(APPLICATION_NAME));
    }

    #[test]
    fn test_pg_config_rejects_bad_url() {
        let config = PoolConfig::new("pg", "postgres://host:notaport/db", "", "");
        assert!(pg_config(&config).unwrap_err().is_configuration());
    }

    #[test]
    fn test_pool_creation_is_lazy_without_init_fail_timeout() {
        // Nothing listens here; building the pool must not connect.
        let config = PoolConfig::new("lazy", "postgres://127.0.0.1:1/none", "u", "p")
            .with_connect_timeout(Duration::from_millis(200));
        let source = PostgresDataSource::open(&config).unwrap();
        assert_eq!(source.status().size, 0);
        assert!(source.acquire().is_err());
        source.close().unwrap();
        assert!(source.is_closed());
        assert!(source.acquire().is_err());
    }

    #[test]
    fn test_init_fail_timeout_reports_unreachable_server() {
        let config = PoolConfig::new("eager", "postgres://127.0.0.1:1/none", "u", "p")
            .with_connect_timeout(Duration::from_millis(200))
            .with_init_fail_timeout(Duration::from_millis(500));
        assert!(PostgresDataSource::open(&config).is_err());
    }
}
