//! Result adapter: an engine row cursor over a statement session.
//!
//! The cursor is forward-only. Rewinding re-executes the query on the external
//! source; nothing is buffered.

use parking_lot::{Mutex, MutexGuard};

use crate::engine::{Record, RecordCursor, RecordCursorFactory};
use crate::error::{BridgeError, Result};
use crate::models::{ColumnType, RecordMetadata, Value};
use crate::services::session::StatementSession;

/// Factory returned by a query: fixed metadata plus the session behind it.
///
/// One cursor may be open at a time; the session is released when the cursor
/// is closed and reopened by the next cursor that reads.
pub struct ExternalCursorFactory {
    metadata: RecordMetadata,
    session: Mutex<StatementSession>,
}

impl ExternalCursorFactory {
    /// Wrap a session whose metadata has already been derived.
    pub fn new(metadata: RecordMetadata, session: StatementSession) -> Self {
        Self { metadata, session: Mutex::new(session) }
    }

    /// Release the session now rather than on drop.
    pub fn close(&self) -> Result<()> {
        self.session.lock().close()
    }
}

impl RecordCursorFactory for ExternalCursorFactory {
    fn metadata(&self) -> &RecordMetadata {
        &self.metadata
    }

    fn cursor(&self) -> Result<Box<dyn RecordCursor + '_>> {
        let session = self
            .session
            .try_lock()
            .ok_or_else(|| BridgeError::internal("A cursor is already open for this query"))?;
        Ok(Box::new(ExternalRecordCursor::new(session)))
    }
}

/// Row cursor bound to a locked statement session.
pub struct ExternalRecordCursor<'a> {
    session: MutexGuard<'a, StatementSession>,
    /// Re-execute before the first read, because an earlier cursor already read
    restart: bool,
    positioned: bool,
    exhausted: bool,
    closed: bool,
}

impl<'a> ExternalRecordCursor<'a> {
    fn new(session: MutexGuard<'a, StatementSession>) -> Self {
        let restart = session.is_streaming();
        Self { session, restart, positioned: false, exhausted: false, closed: false }
    }

    fn ensure_unlimited(&mut self) -> Result<()> {
        if self.restart {
            self.restart = false;
            self.session.reexecute()
        } else {
            self.session.upgrade_to_unlimited()
        }
    }
}

impl RecordCursor for ExternalRecordCursor<'_> {
    fn has_next(&mut self) -> Result<bool> {
        if self.closed || self.exhausted {
            return Ok(false);
        }
        self.ensure_unlimited()?;
        let advanced = self.session.next()?;
        self.positioned = advanced;
        if !advanced {
            self.exhausted = true;
        }
        tracing::trace!(session_id = %self.session.id(), advanced, "Cursor advance");
        Ok(advanced)
    }

    fn record(&self) -> &dyn Record {
        self
    }

    fn to_top(&mut self) -> Result<()> {
        self.positioned = false;
        self.exhausted = false;
        self.closed = false;
        if self.restart || self.session.is_streaming() {
            self.restart = false;
            self.session.reexecute()
        } else {
            self.session.upgrade_to_unlimited()
        }
    }

    fn size(&self) -> Option<u64> {
        None
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.positioned = false;
        self.restart = false;
        self.session.close()
    }
}

impl Record for ExternalRecordCursor<'_> {
    fn cell(&self, col: usize, expected: ColumnType) -> Result<Option<Value>> {
        if !self.positioned {
            return Err(BridgeError::execution("Cursor is not positioned on a row"));
        }
        self.session.cell(col, expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnDescriptor;
    use crate::services::session::tests::{scripted, Script};

    fn factory(rows: i64) -> (std::sync::Arc<Script>, ExternalCursorFactory) {
        let (script, source) = scripted(Script { rows, ..Default::default() });
        let session = StatementSession::open(source, "select n", true).unwrap();
        let metadata = RecordMetadata::new(vec![ColumnDescriptor::new("n", ColumnType::Long)]);
        (script, ExternalCursorFactory::new(metadata, session))
    }

    fn executions(script: &Script) -> usize {
        script.events().iter().filter(|e| e.starts_with("execute")).count()
    }

    #[test]
    fn test_first_advance_upgrades_once() {
        let (script, factory) = factory(3);
        let mut cursor = factory.cursor().unwrap();
        let mut values = Vec::new();
        while cursor.has_next().unwrap() {
            values.push(cursor.record().get_long(0).unwrap());
        }
        assert_eq!(values, vec![1, 2, 3]);
        assert_eq!(executions(&script), 2);
        assert_eq!(cursor.size(), None);
    }

    #[test]
    fn test_stays_exhausted_until_to_top() {
        let (script, factory) = factory(1);
        let mut cursor = factory.cursor().unwrap();
        assert!(cursor.has_next().unwrap());
        assert!(!cursor.has_next().unwrap());
        assert!(!cursor.has_next().unwrap());
        assert!(!cursor.has_next().unwrap());

        cursor.to_top().unwrap();
        assert!(cursor.has_next().unwrap());
        assert_eq!(cursor.record().get_long(0).unwrap(), 1);
        assert_eq!(executions(&script), 3);
    }

    #[test]
    fn test_to_top_before_reading_upgrades_only() {
        let (script, factory) = factory(2);
        let mut cursor = factory.cursor().unwrap();
        cursor.to_top().unwrap();
        assert!(cursor.has_next().unwrap());
        assert_eq!(executions(&script), 2);
    }

    #[test]
    fn test_close_twice_is_safe() {
        let (script, factory) = factory(2);
        let mut cursor = factory.cursor().unwrap();
        assert!(cursor.has_next().unwrap());
        cursor.close().unwrap();
        cursor.close().unwrap();
        assert!(!cursor.has_next().unwrap());

        let connection_closes =
            script.events().iter().filter(|e| *e == "close connection").count();
        assert_eq!(connection_closes, 1);
    }

    #[test]
    fn test_one_cursor_at_a_time() {
        let (_, factory) = factory(1);
        let cursor = factory.cursor().unwrap();
        assert!(factory.cursor().is_err());
        drop(cursor);
        assert!(factory.cursor().is_ok());
    }

    #[test]
    fn test_new_cursor_restarts_from_first_row() {
        let (_, factory) = factory(3);
        {
            let mut cursor = factory.cursor().unwrap();
            assert!(cursor.has_next().unwrap());
            assert!(cursor.has_next().unwrap());
        }
        let mut cursor = factory.cursor().unwrap();
        assert!(cursor.has_next().unwrap());
        assert_eq!(cursor.record().get_long(0).unwrap(), 1);
    }

    #[test]
    fn test_cursor_after_close_reopens_session() {
        let (_, factory) = factory(2);
        {
            let mut cursor = factory.cursor().unwrap();
            assert!(cursor.has_next().unwrap());
            cursor.close().unwrap();
        }
        let mut cursor = factory.cursor().unwrap();
        let mut count = 0;
        while cursor.has_next().unwrap() {
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn test_reading_before_advance_fails() {
        let (_, factory) = factory(1);
        let cursor = factory.cursor().unwrap();
        assert!(cursor.record().get_long(0).is_err());
    }
}
