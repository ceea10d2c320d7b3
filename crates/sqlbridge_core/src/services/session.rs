//! Statement session: the connection, prepared statement and result of one query.
//!
//! A session opens in one of two fetch modes. A probe execution is capped at
//! zero rows and exists only so the column metadata can be read; the first
//! real read upgrades the session to an unlimited execution of the same text.
//!
//! The three resources are always released together, result first, then
//! statement, then connection.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{BridgeError, Result};
use crate::models::{ColumnType, ExternalColumn, Value};
use crate::services::driver::{DataSource, ExternalConnection, ExternalStatement, ResultIterator};
use crate::services::registry::PoolRegistry;

/// Row cap applied to a probe execution.
const PROBE_ROWS: u64 = 0;

/// How many rows the current execution may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Capped at zero rows; metadata only
    Probe,
    /// No row cap
    Unlimited,
}

impl FetchMode {
    fn max_rows(self) -> Option<u64> {
        match self {
            Self::Probe => Some(PROBE_ROWS),
            Self::Unlimited => None,
        }
    }
}

/// Owner of one query's connection, statement and result iterator.
pub struct StatementSession {
    id: Uuid,
    source: Arc<dyn DataSource>,
    sql: String,
    mode: FetchMode,
    connection: Option<Box<dyn ExternalConnection>>,
    statement: Option<Box<dyn ExternalStatement>>,
    results: Option<Box<dyn ResultIterator>>,
}

impl StatementSession {
    /// Acquire a connection from `source`, prepare `sql` and execute it.
    ///
    /// With `probe_only` the execution is capped at zero rows. If prepare or
    /// execute fails, whatever was opened is released before the error is
    /// returned.
    pub fn open(source: Arc<dyn DataSource>, sql: impl Into<String>, probe_only: bool) -> Result<Self> {
        let mode = if probe_only { FetchMode::Probe } else { FetchMode::Unlimited };
        let mut session = Self {
            id: Uuid::new_v4(),
            source,
            sql: sql.into(),
            mode,
            connection: None,
            statement: None,
            results: None,
        };
        session.start(mode)?;
        Ok(session)
    }

    /// Resolve `pool` in `registry` and open a session on it.
    pub fn open_in(
        registry: &PoolRegistry,
        pool: &str,
        sql: impl Into<String>,
        probe_only: bool,
    ) -> Result<Self> {
        Self::open(registry.resolve(pool)?, sql, probe_only)
    }

    fn start(&mut self, mode: FetchMode) -> Result<()> {
        let mut connection = self.source.acquire()?;
        let mut statement = match connection.prepare(&self.sql) {
            Ok(statement) => statement,
            Err(e) => {
                self.release_after_failure(None, None, Some(connection));
                return Err(e);
            }
        };
        statement.set_max_rows(mode.max_rows());
        match statement.execute() {
            Ok(results) => {
                self.connection = Some(connection);
                self.statement = Some(statement);
                self.results = Some(results);
                self.mode = mode;
                tracing::debug!(
                    session_id = %self.id,
                    pool = %self.source.name(),
                    sql = %self.sql,
                    mode = ?mode,
                    "Session opened"
                );
                Ok(())
            }
            Err(e) => {
                self.release_after_failure(None, Some(statement), Some(connection));
                Err(e)
            }
        }
    }

    fn release_after_failure(
        &self,
        results: Option<Box<dyn ResultIterator>>,
        statement: Option<Box<dyn ExternalStatement>>,
        connection: Option<Box<dyn ExternalConnection>>,
    ) {
        if let Err(e) = release_all(results, statement, connection) {
            tracing::warn!(session_id = %self.id, error = %e, "Release after failure also failed");
        }
    }

    // ========== Accessors ==========

    /// Session identifier used in logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Query text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Fetch mode of the current execution.
    pub fn mode(&self) -> FetchMode {
        self.mode
    }

    /// Whether the session holds its resources.
    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    /// Whether an unlimited result is open.
    pub fn is_streaming(&self) -> bool {
        self.mode == FetchMode::Unlimited && self.results.is_some()
    }

    /// Describe the result columns of the prepared statement.
    pub fn columns(&mut self) -> Result<Vec<ExternalColumn>> {
        self.statement.as_mut().ok_or_else(|| BridgeError::execution("Session is closed"))?.columns()
    }

    // ========== Fetch Protocol ==========

    /// Switch to an unlimited execution of the query.
    ///
    /// No-op while an unlimited result is already open. A closed session is
    /// reopened first. On failure the session is closed and the error
    /// returned.
    pub fn upgrade_to_unlimited(&mut self) -> Result<()> {
        if self.is_streaming() {
            return Ok(());
        }
        if !self.is_open() {
            return self.start(FetchMode::Unlimited);
        }
        tracing::debug!(session_id = %self.id, "Upgrading session to unlimited fetch");
        self.execute_unlimited()
    }

    /// Run the query again from the first row with no row cap.
    ///
    /// Replaces any open result. On failure the session is closed and the
    /// error returned.
    pub fn reexecute(&mut self) -> Result<()> {
        if !self.is_open() {
            return self.start(FetchMode::Unlimited);
        }
        tracing::debug!(session_id = %self.id, "Re-executing query");
        self.execute_unlimited()
    }

    fn execute_unlimited(&mut self) -> Result<()> {
        let outcome = self.try_execute_unlimited();
        if outcome.is_err() {
            if let Err(e) = self.close() {
                tracing::warn!(session_id = %self.id, error = %e, "Close after failed execution also failed");
            }
        }
        outcome
    }

    fn try_execute_unlimited(&mut self) -> Result<()> {
        if let Some(mut results) = self.results.take() {
            results.close()?;
        }
        let statement =
            self.statement.as_mut().ok_or_else(|| BridgeError::execution("Session is closed"))?;
        statement.set_max_rows(None);
        self.results = Some(statement.execute()?);
        self.mode = FetchMode::Unlimited;
        Ok(())
    }

    /// Move the open result to its next row.
    pub fn next(&mut self) -> Result<bool> {
        match self.results.as_mut() {
            Some(results) => results.next(),
            None => Err(BridgeError::execution("Session has no open result")),
        }
    }

    /// Read a cell of the current row.
    pub fn cell(&self, column: usize, expected: ColumnType) -> Result<Option<Value>> {
        match self.results.as_ref() {
            Some(results) => results.get(column, expected),
            None => Err(BridgeError::execution("Session has no open result")),
        }
    }

    /// Release result, statement and connection in that order.
    ///
    /// Every release is attempted; the first failure is returned. Calling
    /// this on a closed session does nothing.
    pub fn close(&mut self) -> Result<()> {
        let results = self.results.take();
        let statement = self.statement.take();
        let connection = self.connection.take();
        if results.is_none() && statement.is_none() && connection.is_none() {
            return Ok(());
        }
        tracing::debug!(session_id = %self.id, "Closing session");
        release_all(results, statement, connection)
    }
}

impl Drop for StatementSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(session_id = %self.id, error = %e, "Failed to release session on drop");
        }
    }
}

/// Close each resource in order, remembering the first failure.
fn release_all(
    results: Option<Box<dyn ResultIterator>>,
    statement: Option<Box<dyn ExternalStatement>>,
    connection: Option<Box<dyn ExternalConnection>>,
) -> Result<()> {
    let mut first_error: Option<BridgeError> = None;

    if let Some(mut results) = results {
        if let Err(e) = results.close() {
            tracing::warn!(error = %e, "Failed to close result");
            first_error.get_or_insert(e);
        }
    }
    if let Some(mut statement) = statement {
        if let Err(e) = statement.close() {
            tracing::warn!(error = %e, "Failed to close statement");
            first_error.get_or_insert(e);
        }
    }
    if let Some(mut connection) = connection {
        if let Err(e) = connection.close() {
            tracing::warn!(error = %e, "Failed to close connection");
            first_error.get_or_insert(e);
        }
    }

    first_error.map_or(Ok(()), Err)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{DriverKind, ExternalType, PoolStatus};
    use crate::services::driver::CellAccess;
    use parking_lot::Mutex;

    /// Scripted driver that records every call.
    #[derive(Default)]
    pub(crate) struct Script {
        pub events: Mutex<Vec<String>>,
        pub rows: i64,
        pub fail_prepare: bool,
        pub fail_execute: bool,
        /// Executions that succeed before every later one fails.
        pub fail_execute_after: Option<usize>,
        pub fail_close: Vec<&'static str>,
        pub fail_source_close: bool,
    }

    impl Script {
        fn record(&self, event: impl Into<String>) {
            self.events.lock().push(event.into());
        }

        fn close_result(&self, what: &'static str) -> Result<()> {
            self.record(format!("close {what}"));
            if self.fail_close.contains(&what) {
                Err(BridgeError::execution(format!("{what} close failed")))
            } else {
                Ok(())
            }
        }

        pub fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }

        fn executions(&self) -> usize {
            self.events.lock().iter().filter(|e| e.starts_with("execute")).count()
        }
    }

    pub(crate) struct ScriptedSource(pub Arc<Script>);

    impl DataSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }
        fn driver(&self) -> DriverKind {
            DriverKind::Sqlite
        }
        fn acquire(&self) -> Result<Box<dyn ExternalConnection>> {
            self.0.record("acquire");
            Ok(Box::new(ScriptedConnection(Arc::clone(&self.0))))
        }
        fn status(&self) -> PoolStatus {
            PoolStatus { max_size: 1, size: 0, idle: 0 }
        }
        fn close(&self) -> Result<()> {
            self.0.record("close source");
            if self.0.fail_source_close {
                Err(BridgeError::connection("source close failed"))
            } else {
                Ok(())
            }
        }
        fn is_closed(&self) -> bool {
            false
        }
    }

    struct ScriptedConnection(Arc<Script>);

    impl ExternalConnection for ScriptedConnection {
        fn prepare(&mut self, _sql: &str) -> Result<Box<dyn ExternalStatement>> {
            self.0.record("prepare");
            if self.0.fail_prepare {
                return Err(BridgeError::execution("syntax error"));
            }
            Ok(Box::new(ScriptedStatement { script: Arc::clone(&self.0), max_rows: None }))
        }
        fn close(&mut self) -> Result<()> {
            self.0.close_result("connection")
        }
    }

    struct ScriptedStatement {
        script: Arc<Script>,
        max_rows: Option<u64>,
    }

    impl ExternalStatement for ScriptedStatement {
        fn set_max_rows(&mut self, max_rows: Option<u64>) {
            self.max_rows = max_rows;
        }
        fn max_rows(&self) -> Option<u64> {
            self.max_rows
        }
        fn columns(&mut self) -> Result<Vec<ExternalColumn>> {
            Ok(vec![ExternalColumn::new("n", ExternalType::BIGINT, "int8")])
        }
        fn execute(&mut self) -> Result<Box<dyn ResultIterator>> {
            self.script.record(format!("execute {:?}", self.max_rows));
            let late_failure =
                self.script.fail_execute_after.is_some_and(|n| self.script.executions() > n);
            if self.script.fail_execute || late_failure {
                return Err(BridgeError::execution("execution failed"));
            }
            let limit = self.max_rows.map_or(self.script.rows, |m| (m as i64).min(self.script.rows));
            Ok(Box::new(ScriptedRows { script: Arc::clone(&self.script), limit, current: 0 }))
        }
        fn close(&mut self) -> Result<()> {
            self.script.close_result("statement")
        }
    }

    struct ScriptedRows {
        script: Arc<Script>,
        limit: i64,
        current: i64,
    }

    impl CellAccess for ScriptedRows {
        fn get(&self, _column: usize, _expected: ColumnType) -> Result<Option<Value>> {
            Ok(Some(Value::Long(self.current)))
        }
    }

    impl ResultIterator for ScriptedRows {
        fn next(&mut self) -> Result<bool> {
            if self.current < self.limit {
                self.current += 1;
                Ok(true)
            } else {
                Ok(false)
            }
        }
        fn close(&mut self) -> Result<()> {
            self.script.close_result("results")
        }
    }

    pub(crate) fn scripted(script: Script) -> (Arc<Script>, Arc<dyn DataSource>) {
        let script = Arc::new(script);
        let source: Arc<dyn DataSource> = Arc::new(ScriptedSource(Arc::clone(&script)));
        (script, source)
    }

    #[test]
    fn test_probe_caps_rows_at_zero() {
        let (script, source) = scripted(Script { rows: 3, ..Default::default() });
        let mut session = StatementSession::open(source, "select n", true).unwrap();
        assert_eq!(session.mode(), FetchMode::Probe);
        assert!(!session.next().unwrap());
        assert_eq!(script.events(), vec!["acquire", "prepare", "execute Some(0)"]);
    }

    #[test]
    fn test_upgrade_is_idempotent() {
        let (script, source) = scripted(Script { rows: 3, ..Default::default() });
        let mut session = StatementSession::open(source, "select n", true).unwrap();
        session.upgrade_to_unlimited().unwrap();
        session.upgrade_to_unlimited().unwrap();
        assert!(session.is_streaming());

        let executions = script.events().iter().filter(|e| e.starts_with("execute")).count();
        assert_eq!(executions, 2);

        let mut seen = 0;
        while session.next().unwrap() {
            seen += 1;
        }
        assert_eq!(seen, 3);
    }

    #[test]
    fn test_reexecute_restarts_from_first_row() {
        let (_, source) = scripted(Script { rows: 2, ..Default::default() });
        let mut session = StatementSession::open(source, "select n", false).unwrap();
        while session.next().unwrap() {}
        session.reexecute().unwrap();
        assert!(session.next().unwrap());
        assert_eq!(session.cell(0, ColumnType::Long).unwrap(), Some(Value::Long(1)));
    }

    #[test]
    fn test_close_releases_in_order_once() {
        let (script, source) = scripted(Script { rows: 1, ..Default::default() });
        let mut session = StatementSession::open(source, "select n", true).unwrap();
        session.close().unwrap();
        session.close().unwrap();
        assert!(!session.is_open());

        let closes: Vec<String> =
            script.events().into_iter().filter(|e| e.starts_with("close")).collect();
        assert_eq!(closes, vec!["close results", "close statement", "close connection"]);
    }

    #[test]
    fn test_close_reports_first_failure_and_keeps_going() {
        let (script, source) = scripted(Script {
            rows: 1,
            fail_close: vec!["results", "statement"],
            ..Default::default()
        });
        let mut session = StatementSession::open(source, "select n", true).unwrap();
        let err = session.close().unwrap_err();
        assert_eq!(err.to_string(), "results close failed");
        assert!(script.events().contains(&"close connection".to_string()));
        session.close().unwrap();
    }

    #[test]
    fn test_failed_execute_releases_statement_then_connection() {
        let (script, source) = scripted(Script { fail_execute: true, ..Default::default() });
        let err = StatementSession::open(source, "select n", true).err().unwrap();
        assert_eq!(err.to_string(), "execution failed");
        assert_eq!(
            script.events(),
            vec!["acquire", "prepare", "execute Some(0)", "close statement", "close connection"]
        );
    }

    #[test]
    fn test_failed_upgrade_closes_the_session() {
        let (script, source) = scripted(Script {
            rows: 3,
            fail_execute_after: Some(1),
            ..Default::default()
        });
        let mut session = StatementSession::open(source, "select n", true).unwrap();
        let err = session.upgrade_to_unlimited().err().unwrap();
        assert_eq!(err.to_string(), "execution failed");
        assert!(!session.is_open());
        assert!(!session.is_streaming());
        assert!(session.next().is_err());
        assert_eq!(
            script.events(),
            vec![
                "acquire",
                "prepare",
                "execute Some(0)",
                "close results",
                "execute None",
                "close statement",
                "close connection",
            ]
        );

        // Closing again releases nothing twice.
        session.close().unwrap();
        assert_eq!(script.events().iter().filter(|e| e.starts_with("close")).count(), 3);
    }

    #[test]
    fn test_failed_reexecute_closes_the_session() {
        let (script, source) = scripted(Script {
            rows: 2,
            fail_execute_after: Some(1),
            ..Default::default()
        });
        let mut session = StatementSession::open(source, "select n", false).unwrap();
        while session.next().unwrap() {}
        assert!(session.reexecute().is_err());
        assert!(!session.is_open());
        assert!(script.events().ends_with(&["close statement".to_string(), "close connection".to_string()]));
    }

    #[test]
    fn test_failed_prepare_releases_connection() {
        let (script, source) = scripted(Script { fail_prepare: true, ..Default::default() });
        assert!(StatementSession::open(source, "selec", true).is_err());
        assert_eq!(script.events(), vec!["acquire", "prepare", "close connection"]);
    }

    #[test]
    fn test_upgrade_after_close_reopens() {
        let (script, source) = scripted(Script { rows: 2, ..Default::default() });
        let mut session = StatementSession::open(source, "select n", true).unwrap();
        session.close().unwrap();
        session.upgrade_to_unlimited().unwrap();
        assert!(session.is_streaming());
        assert_eq!(script.events().iter().filter(|e| *e == "acquire").count(), 2);
    }

    #[test]
    fn test_drop_releases_resources() {
        let (script, source) = scripted(Script { rows: 1, ..Default::default() });
        drop(StatementSession::open(source, "select n", true).unwrap());
        assert!(script.events().contains(&"close connection".to_string()));
    }

    #[test]
    fn test_open_in_unknown_pool() {
        let registry = PoolRegistry::new();
        let err = StatementSession::open_in(&registry, "nope", "select 1", true).err().unwrap();
        assert!(matches!(err, BridgeError::PoolNotFound { .. }));
    }
}
