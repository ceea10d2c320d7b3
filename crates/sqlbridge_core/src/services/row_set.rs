//! In-memory row-set, used to hand pool settings to pool-init.

use crate::engine::{Record, RecordCursor, RecordCursorFactory};
use crate::error::{BridgeError, Result};
use crate::models::{ColumnDescriptor, ColumnType, PoolConfig, RecordMetadata, Value};

type Row = Vec<Option<Value>>;

/// Fixed rows with fixed metadata.
#[derive(Debug, Clone, Default)]
pub struct MemoryRowSet {
    metadata: RecordMetadata,
    rows: Vec<Row>,
}

impl MemoryRowSet {
    /// Create an empty row-set with the given columns.
    pub fn new(metadata: RecordMetadata) -> Self {
        Self { metadata, rows: Vec::new() }
    }

    /// Append a row; it must have one cell per column.
    pub fn push_row(&mut self, row: Row) -> Result<()> {
        if row.len() != self.metadata.column_count() {
            return Err(BridgeError::internal(format!(
                "Row has {} cells but the row-set has {} columns",
                row.len(),
                self.metadata.column_count()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Settings row-set describing `configs`, one row per pool.
    ///
    /// Optional columns appear only when at least one configuration sets them.
    pub fn from_pool_configs(configs: &[PoolConfig]) -> Self {
        let mut columns: Vec<SettingsColumn> = vec![
            ("name", ColumnType::String, Box::new(|c: &PoolConfig| text(&c.name))),
            ("url", ColumnType::String, Box::new(|c: &PoolConfig| text(&c.url))),
            ("user", ColumnType::String, Box::new(|c: &PoolConfig| text(&c.user))),
            ("password", ColumnType::String, Box::new(|c: &PoolConfig| text(&c.password))),
        ];

        let optional: Vec<SettingsColumn> = vec![
            ("driver", ColumnType::String, Box::new(|c: &PoolConfig| opt_text(&c.driver))),
            ("schema", ColumnType::String, Box::new(|c: &PoolConfig| opt_text(&c.schema))),
            ("catalog", ColumnType::String, Box::new(|c: &PoolConfig| opt_text(&c.catalog))),
            ("auto_commit", ColumnType::Boolean, Box::new(|c: &PoolConfig| c.auto_commit.map(Value::Bool))),
            ("read_only", ColumnType::Boolean, Box::new(|c: &PoolConfig| c.read_only.map(Value::Bool))),
            (
                "expose_management",
                ColumnType::Boolean,
                Box::new(|c: &PoolConfig| c.expose_management.map(Value::Bool)),
            ),
            ("max_pool_size", ColumnType::Int, Box::new(|c: &PoolConfig| int(c.max_pool_size))),
            (
                "isolation_level",
                ColumnType::String,
                Box::new(|c: &PoolConfig| opt_text(&c.isolation_level)),
            ),
            ("idle_timeout", ColumnType::Long, Box::new(|c: &PoolConfig| millis(c.idle_timeout))),
            (
                "init_fail_timeout",
                ColumnType::Long,
                Box::new(|c: &PoolConfig| millis(c.init_fail_timeout)),
            ),
            (
                "connect_timeout",
                ColumnType::Long,
                Box::new(|c: &PoolConfig| millis(c.connect_timeout)),
            ),
            ("max_lifetime", ColumnType::Long, Box::new(|c: &PoolConfig| millis(c.max_lifetime))),
            ("min_idle", ColumnType::Int, Box::new(|c: &PoolConfig| int(c.min_idle))),
            (
                "validation_timeout",
                ColumnType::Long,
                Box::new(|c: &PoolConfig| millis(c.validation_timeout)),
            ),
        ];
        for column in optional {
            if configs.iter().any(|config| (column.2)(config).is_some()) {
                columns.push(column);
            }
        }

        let metadata = RecordMetadata::new(
            columns.iter().map(|(name, ty, _)| ColumnDescriptor::new(*name, *ty)).collect(),
        );
        let rows = configs
            .iter()
            .map(|config| columns.iter().map(|(_, _, read)| read(config)).collect())
            .collect();
        Self { metadata, rows }
    }
}

/// Column name, type and how to read it from a configuration.
type SettingsColumn = (&'static str, ColumnType, Box<dyn Fn(&PoolConfig) -> Option<Value>>);

fn text(s: &str) -> Option<Value> {
    Some(Value::String(s.to_string()))
}

fn opt_text(s: &Option<String>) -> Option<Value> {
    s.clone().map(Value::String)
}

fn int(value: Option<u32>) -> Option<Value> {
    value.map(|n| Value::Int(i32::try_from(n).unwrap_or(i32::MAX)))
}

fn millis(value: Option<std::time::Duration>) -> Option<Value> {
    value.map(|d| Value::Long(i64::try_from(d.as_millis()).unwrap_or(i64::MAX)))
}

impl RecordCursorFactory for MemoryRowSet {
    fn metadata(&self) -> &RecordMetadata {
        &self.metadata
    }

    fn cursor(&self) -> Result<Box<dyn RecordCursor + '_>> {
        Ok(Box::new(MemoryCursor { rows: &self.rows, position: None }))
    }
}

struct MemoryCursor<'a> {
    rows: &'a [Row],
    /// Index of the current row; `None` before the first
    position: Option<usize>,
}

impl RecordCursor for MemoryCursor<'_> {
    fn has_next(&mut self) -> Result<bool> {
        let next = self.position.map_or(0, |p| p + 1);
        if next < self.rows.len() {
            self.position = Some(next);
            Ok(true)
        } else {
            self.position = Some(self.rows.len());
            Ok(false)
        }
    }

    fn record(&self) -> &dyn Record {
        self
    }

    fn to_top(&mut self) -> Result<()> {
        self.position = None;
        Ok(())
    }

    fn size(&self) -> Option<u64> {
        Some(self.rows.len() as u64)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Record for MemoryCursor<'_> {
    fn cell(&self, col: usize, _expected: ColumnType) -> Result<Option<Value>> {
        let row = self
            .position
            .and_then(|p| self.rows.get(p))
            .ok_or_else(|| BridgeError::execution("Cursor is not positioned on a row"))?;
        row.get(col)
            .cloned()
            .ok_or_else(|| BridgeError::execution(format!("Column index {col} out of range")))
    }
}
