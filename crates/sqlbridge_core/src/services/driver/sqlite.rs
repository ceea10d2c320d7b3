//! SQLite binding: rusqlite connections pooled by r2d2.
//!
//! Urls take the forms `sqlite::memory:`, `sqlite:<path>`, `sqlite://<path>` or
//! a `file:` URI. Every pooled connection to `sqlite::memory:` opens its own
//! private database.
//!
//! An execution hands its pooled connection to a reader thread that steps a
//! single live statement and sends rows back in pages of [`FETCH_SIZE`] over a
//! bounded channel. The statement text is run exactly as written and the
//! result reads from one snapshot. Closing the result stops the reader and
//! puts the connection back.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use r2d2::{ManageConnection, Pool, PooledConnection};
use rusqlite::types::{Type, ValueRef};
use rusqlite::{Connection, InterruptHandle, OpenFlags};
use tokio::sync::mpsc;

use super::{
    strip_url_prefix, CellAccess, DataSource, ExternalConnection, ExternalStatement,
    ResultIterator,
};
use crate::error::{BridgeError, Result};
use crate::models::{
    ColumnType, DriverKind, ExternalColumn, ExternalType, IsolationLevel, PoolConfig, PoolStatus,
    Value,
};

/// Rows per page sent by the reader thread.
pub const FETCH_SIZE: usize = 1024;

/// Pages the reader may run ahead of the consumer.
const READ_AHEAD_PAGES: usize = 2;

/// Where pooled connections point.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SqliteTarget {
    Memory,
    File(PathBuf),
    Uri(String),
}

impl SqliteTarget {
    fn parse(url: &str) -> Result<Self> {
        let url = strip_url_prefix(url);
        if url.starts_with("file:") {
            return Ok(Self::Uri(url.to_string()));
        }
        let rest = url.strip_prefix("sqlite:").ok_or_else(|| {
            BridgeError::configuration(format!("Not a sqlite url: {url}"))
        })?;
        let rest = rest.strip_prefix("//").unwrap_or(rest);
        match rest {
            "" => Err(BridgeError::configuration(format!("Missing database path in {url}"))),
            ":memory:" => Ok(Self::Memory),
            path => Ok(Self::File(PathBuf::from(path))),
        }
    }
}

// ========== Connection Manager ==========

/// r2d2 manager that opens rusqlite connections with the pool's settings.
#[derive(Debug, Clone)]
pub struct SqliteManager {
    target: SqliteTarget,
    read_only: bool,
    busy_timeout: Duration,
    isolation: Option<IsolationLevel>,
}

impl ManageConnection for SqliteManager {
    type Connection = Connection;
    type Error = rusqlite::Error;

    fn connect(&self) -> std::result::Result<Connection, rusqlite::Error> {
        let conn = match &self.target {
            SqliteTarget::Memory => Connection::open_in_memory()?,
            SqliteTarget::File(path) => Connection::open(path)?,
            SqliteTarget::Uri(uri) => Connection::open_with_flags(
                uri,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?,
        };
        conn.busy_timeout(self.busy_timeout)?;
        if self.read_only {
            conn.execute_batch("PRAGMA query_only = ON;")?;
        }
        // Only meaningful for shared-cache connections; SQLite is otherwise serializable.
        if self.isolation == Some(IsolationLevel::ReadUncommitted) {
            conn.execute_batch("PRAGMA read_uncommitted = ON;")?;
        }
        Ok(conn)
    }

    fn is_valid(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch("SELECT 1;")
    }

    fn has_broken(&self, _conn: &mut Connection) -> bool {
        false
    }
}

// ========== Data Source ==========

/// Pool of SQLite connections registered under one name.
pub struct SqliteDataSource {
    name: String,
    pool: RwLock<Option<Pool<SqliteManager>>>,
    max_size: u32,
    connect_timeout: Duration,
}

impl SqliteDataSource {
    /// Build the pool described by `config`.
    ///
    /// With a positive init-fail timeout the pool opens its idle connections
    /// up front and fails if they can't be made in time; otherwise
    /// connections are opened lazily.
    pub fn open(config: &PoolConfig) -> Result<Self> {
        let target = SqliteTarget::parse(&config.url)?;
        if config.schema.is_some() || config.catalog.is_some() {
            tracing::debug!(pool = %config.name, "sqlite ignores schema and catalog settings");
        }

        let manager = SqliteManager {
            target,
            read_only: config.read_only.unwrap_or(false),
            busy_timeout: config.effective_validation_timeout(),
            isolation: config.isolation(),
        };

        let max_size = config.effective_max_pool_size();
        let mut builder = Pool::builder()
            .max_size(max_size)
            .min_idle(config.min_idle.map(|n| n.min(max_size)));
        if let Some(idle) = config.idle_timeout {
            builder = builder.idle_timeout(Some(idle));
        }
        if let Some(lifetime) = config.max_lifetime {
            builder = builder.max_lifetime(Some(lifetime));
        }

        let pool = match config.init_fail_timeout.filter(|t| !t.is_zero()) {
            Some(timeout) => builder.connection_timeout(timeout).build(manager).map_err(|e| {
                BridgeError::connection_with_source(
                    format!("Failed to initialize pool {}", config.name),
                    e,
                )
            })?,
            None => builder.build_unchecked(manager),
        };

        tracing::info!(pool = %config.name, max_size, "SQLite pool created");

        Ok(Self {
            name: config.name.clone(),
            pool: RwLock::new(Some(pool)),
            max_size,
            connect_timeout: config.effective_connect_timeout(),
        })
    }
}

impl DataSource for SqliteDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn driver(&self) -> DriverKind {
        DriverKind::Sqlite
    }

    fn acquire(&self) -> Result<Box<dyn ExternalConnection>> {
        let guard = self.pool.read();
        let pool = guard
            .as_ref()
            .ok_or_else(|| BridgeError::connection(format!("DataSource {} is closed", self.name)))?;
        let conn = pool.get_timeout(self.connect_timeout)?;
        Ok(Box::new(SqliteConnection {
            conn: Arc::new(Mutex::new(ConnectionSlot { conn: Some(conn), closed: false })),
        }))
    }

    fn status(&self) -> PoolStatus {
        match self.pool.read().as_ref() {
            Some(pool) => {
                let state = pool.state();
                PoolStatus {
                    max_size: pool.max_size() as usize,
                    size: state.connections as usize,
                    idle: state.idle_connections as usize,
                }
            }
            None => PoolStatus { max_size: self.max_size as usize, size: 0, idle: 0 },
        }
    }

    fn close(&self) -> Result<()> {
        if self.pool.write().take().is_some() {
            tracing::info!(pool = %self.name, "SQLite pool closed");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.pool.read().is_none()
    }
}

// ========== Connection, Statement, Rows ==========

/// The checked-out connection, shared by a connection and its statements.
///
/// `conn` is empty while a result's reader thread holds it.
struct ConnectionSlot {
    conn: Option<PooledConnection<SqliteManager>>,
    closed: bool,
}

type SharedConnection = Arc<Mutex<ConnectionSlot>>;

fn with_conn<T>(slot: &SharedConnection, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
    let guard = slot.lock();
    if guard.closed {
        return Err(BridgeError::execution("Connection is closed"));
    }
    let conn = guard
        .conn
        .as_ref()
        .ok_or_else(|| BridgeError::execution("Connection is busy with an open result"))?;
    f(conn)
}

/// A pooled SQLite connection; returned to the pool on close or drop.
pub struct SqliteConnection {
    conn: SharedConnection,
}

impl ExternalConnection for SqliteConnection {
    fn prepare(&mut self, sql: &str) -> Result<Box<dyn ExternalStatement>> {
        let sql = sql.trim().trim_end_matches(';').trim_end().to_string();
        let declared = with_conn(&self.conn, |conn| {
            let stmt = conn.prepare(&sql)?;
            let declared: Vec<DeclaredColumn> = stmt
                .columns()
                .iter()
                .map(|c| DeclaredColumn {
                    name: c.name().to_string(),
                    decl_type: c.decl_type().map(str::to_string),
                })
                .collect();
            Ok(declared)
        })?;
        if declared.is_empty() {
            return Err(BridgeError::execution(format!("Statement returns no rows: {sql}")));
        }
        Ok(Box::new(SqliteStatement {
            conn: Arc::clone(&self.conn),
            sql,
            declared,
            resolved: None,
            max_rows: None,
            closed: false,
        }))
    }

    fn close(&mut self) -> Result<()> {
        let mut slot = self.conn.lock();
        slot.closed = true;
        slot.conn.take();
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct DeclaredColumn {
    name: String,
    decl_type: Option<String>,
}

/// A prepared SQLite query.
pub struct SqliteStatement {
    conn: SharedConnection,
    sql: String,
    declared: Vec<DeclaredColumn>,
    resolved: Option<Vec<ExternalColumn>>,
    max_rows: Option<u64>,
    closed: bool,
}

impl SqliteStatement {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(BridgeError::execution("Statement is closed"))
        } else {
            Ok(())
        }
    }

    /// Storage classes of the first row, used for columns with no declared type.
    fn peek_storage_classes(&self) -> Result<Vec<Type>> {
        let width = self.declared.len();
        with_conn(&self.conn, |conn| {
            let mut stmt = conn.prepare_cached(&self.sql)?;
            let mut rows = stmt.query([])?;
            let classes = match rows.next()? {
                Some(row) => {
                    let mut classes = Vec::with_capacity(width);
                    for i in 0..width {
                        classes.push(row.get_ref(i)?.data_type());
                    }
                    classes
                }
                None => Vec::new(),
            };
            Ok(classes)
        })
    }
}

impl ExternalStatement for SqliteStatement {
    fn set_max_rows(&mut self, max_rows: Option<u64>) {
        self.max_rows = max_rows;
    }

    fn max_rows(&self) -> Option<u64> {
        self.max_rows
    }

    fn columns(&mut self) -> Result<Vec<ExternalColumn>> {
        self.ensure_open()?;
        if let Some(columns) = &self.resolved {
            return Ok(columns.clone());
        }

        let classes = if self.declared.iter().any(|c| c.decl_type.is_none()) {
            self.peek_storage_classes()?
        } else {
            Vec::new()
        };

        let columns: Vec<ExternalColumn> = self
            .declared
            .iter()
            .enumerate()
            .map(|(i, column)| match &column.decl_type {
                Some(decl) => ExternalColumn::new(&column.name, declared_type_code(decl), decl),
                None => {
                    let (code, name) = storage_class_code(classes.get(i).copied().unwrap_or(Type::Null));
                    ExternalColumn::new(&column.name, code, name)
                }
            })
            .collect();

        self.resolved = Some(columns.clone());
        Ok(columns)
    }

    fn execute(&mut self) -> Result<Box<dyn ResultIterator>> {
        self.ensure_open()?;
        if self.max_rows == Some(0) {
            with_conn(&self.conn, |_| Ok(()))?;
            return Ok(Box::new(SqliteRows::empty(Arc::clone(&self.conn))));
        }

        let conn = {
            let mut slot = self.conn.lock();
            if slot.closed {
                return Err(BridgeError::execution("Connection is closed"));
            }
            slot.conn
                .take()
                .ok_or_else(|| BridgeError::execution("Connection is busy with an open result"))?
        };
        let rows = SqliteRows::start(
            Arc::clone(&self.conn),
            conn,
            self.sql.clone(),
            self.declared.len(),
            self.max_rows,
        )?;
        Ok(Box::new(rows))
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.resolved = None;
        Ok(())
    }
}

type Row = Vec<Option<Value>>;
type Page = Vec<Row>;

/// Forward-only SQLite result fed by a reader thread.
pub struct SqliteRows {
    slot: SharedConnection,
    pages: Option<mpsc::Receiver<Result<Page>>>,
    reader: Option<JoinHandle<PooledConnection<SqliteManager>>>,
    interrupt: Option<InterruptHandle>,
    page: VecDeque<Row>,
    current: Option<Row>,
    closed: bool,
}

impl SqliteRows {
    /// A result with no rows that never touches the connection.
    fn empty(slot: SharedConnection) -> Self {
        Self {
            slot,
            pages: None,
            reader: None,
            interrupt: None,
            page: VecDeque::new(),
            current: None,
            closed: false,
        }
    }

    /// Move `conn` to a reader thread and wait for the first page, so
    /// execution errors surface here rather than on `next()`.
    fn start(
        slot: SharedConnection,
        conn: PooledConnection<SqliteManager>,
        sql: String,
        width: usize,
        max_rows: Option<u64>,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel(READ_AHEAD_PAGES);
        let interrupt = conn.get_interrupt_handle();
        let reader = std::thread::Builder::new()
            .name("sqlbridge-sqlite-reader".to_string())
            .spawn(move || {
                if let Err(e) = stream_rows(&conn, &sql, width, max_rows, &tx) {
                    let _ = tx.blocking_send(Err(e));
                }
                conn
            })?;

        let mut rows = Self {
            slot,
            pages: Some(rx),
            reader: Some(reader),
            interrupt: Some(interrupt),
            page: VecDeque::new(),
            current: None,
            closed: false,
        };
        if let Err(e) = rows.fetch_page() {
            if let Err(close_err) = rows.close() {
                tracing::warn!(error = %close_err, "Failed to stop sqlite reader");
            }
            return Err(e);
        }
        Ok(rows)
    }

    fn fetch_page(&mut self) -> Result<()> {
        let Some(pages) = self.pages.as_mut() else {
            return Ok(());
        };
        match pages.blocking_recv() {
            Some(Ok(page)) => {
                tracing::trace!(fetched = page.len(), "Received sqlite page");
                self.page.extend(page);
                Ok(())
            }
            Some(Err(e)) => {
                self.pages = None;
                Err(e)
            }
            None => {
                self.pages = None;
                Ok(())
            }
        }
    }
}

/// Reader thread body: one statement, one pass, pages sent as they fill.
fn stream_rows(
    conn: &Connection,
    sql: &str,
    width: usize,
    max_rows: Option<u64>,
    pages: &mpsc::Sender<Result<Page>>,
) -> Result<()> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    let mut page = Vec::with_capacity(FETCH_SIZE);
    let mut read: u64 = 0;

    while max_rows.map_or(true, |max| read < max) {
        let Some(row) = rows.next()? else {
            break;
        };
        let mut cells = Vec::with_capacity(width);
        for i in 0..width {
            cells.push(read_cell(row.get_ref(i)?));
        }
        page.push(cells);
        read += 1;

        if page.len() == FETCH_SIZE && pages.blocking_send(Ok(std::mem::take(&mut page))).is_err() {
            // Consumer closed the result.
            return Ok(());
        }
    }

    if !page.is_empty() {
        let _ = pages.blocking_send(Ok(page));
    }
    tracing::trace!(rows = read, "SQLite result drained");
    Ok(())
}

impl CellAccess for SqliteRows {
    // SQLite values carry their own storage class; the accessor coerces.
    fn get(&self, column: usize, _expected: ColumnType) -> Result<Option<Value>> {
        let row = self.current.as_ref().ok_or_else(|| BridgeError::execution("No current row"))?;
        row.get(column)
            .cloned()
            .ok_or_else(|| BridgeError::execution(format!("Column index {column} out of range")))
    }
}

impl ResultIterator for SqliteRows {
    fn next(&mut self) -> Result<bool> {
        if self.closed {
            return Err(BridgeError::execution("Result set is closed"));
        }
        if self.page.is_empty() {
            self.fetch_page()?;
        }
        self.current = self.page.pop_front();
        Ok(self.current.is_some())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.page.clear();
        self.current = None;
        // Dropping the receiver fails the reader's next send.
        self.pages = None;

        let Some(reader) = self.reader.take() else {
            return Ok(());
        };
        if let Some(interrupt) = self.interrupt.take() {
            if !reader.is_finished() {
                interrupt.interrupt();
            }
        }
        let conn = reader
            .join()
            .map_err(|_| BridgeError::internal("SQLite reader thread panicked"))?;

        let mut slot = self.slot.lock();
        if !slot.closed {
            slot.conn = Some(conn);
        }
        Ok(())
    }
}

impl Drop for SqliteRows {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "Failed to close sqlite result");
        }
    }
}

// ========== Type Codes ==========

fn read_cell(value: ValueRef<'_>) -> Option<Value> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(n) => Some(Value::Long(n)),
        ValueRef::Real(n) => Some(Value::Double(n)),
        ValueRef::Text(t) => Some(Value::String(String::from_utf8_lossy(t).into_owned())),
        ValueRef::Blob(b) => Some(Value::Binary(b.to_vec())),
    }
}

/// Type code for a declared column type.
///
/// Well-known names map directly; anything else falls back to SQLite's column
/// affinity rules. `INTEGER` is SQLite's 64-bit integer.
fn declared_type_code(decl: &str) -> ExternalType {
    let upper = decl.to_ascii_uppercase();
    let base = upper.split('(').next().unwrap_or("").trim();
    match base {
        "BOOLEAN" | "BOOL" => ExternalType::BOOLEAN,
        "TINYINT" => ExternalType::TINYINT,
        "SMALLINT" | "INT2" => ExternalType::SMALLINT,
        "INT" | "INT4" | "MEDIUMINT" => ExternalType::INTEGER,
        "INTEGER" | "BIGINT" | "INT8" | "UNSIGNED BIG INT" => ExternalType::BIGINT,
        "FLOAT" | "REAL" | "DOUBLE" | "DOUBLE PRECISION" => ExternalType::DOUBLE,
        "DATE" => ExternalType::DATE,
        "TIME" => ExternalType::TIME,
        "DATETIME" | "TIMESTAMP" => ExternalType::TIMESTAMP,
        "NUMERIC" | "DECIMAL" => ExternalType::NUMERIC,
        "BLOB" => ExternalType::VARBINARY,
        _ if base.contains("INT") => ExternalType::BIGINT,
        _ if base.contains("CHAR") || base.contains("CLOB") || base.contains("TEXT") => {
            ExternalType::VARCHAR
        }
        _ if base.contains("BLOB") => ExternalType::VARBINARY,
        _ if base.contains("REAL") || base.contains("FLOA") || base.contains("DOUB") => {
            ExternalType::DOUBLE
        }
        _ => ExternalType::NUMERIC,
    }
}

/// Type code for an expression column, from the storage class of its first value.
fn storage_class_code(class: Type) -> (ExternalType, &'static str) {
    match class {
        Type::Integer => (ExternalType::BIGINT, "INTEGER"),
        Type::Real => (ExternalType::DOUBLE, "REAL"),
        Type::Text => (ExternalType::VARCHAR, "TEXT"),
        Type::Blob => (ExternalType::VARBINARY, "BLOB"),
        Type::Null => (ExternalType::VARCHAR, "NULL"),
    }
}
