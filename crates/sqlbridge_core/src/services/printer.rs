//! Tab-separated text rendering of a record cursor.
//!
//! Rows are written to the sink as the cursor yields them.

use std::io::Write;

use chrono::{DateTime, SecondsFormat};

use crate::engine::{Record, RecordCursor};
use crate::error::{BridgeError, Result};
use crate::models::{nulls, ColumnType, RecordMetadata};

/// Prints every remaining record of a cursor, one line per record.
///
/// Null cells print as empty fields. DATE and TIMESTAMP print as ISO-8601 UTC,
/// BINARY as lowercase hex.
#[derive(Debug, Clone)]
pub struct RecordCursorPrinter {
    delimiter: char,
}

impl Default for RecordCursorPrinter {
    fn default() -> Self {
        Self { delimiter: '\t' }
    }
}

impl RecordCursorPrinter {
    /// Printer with a tab delimiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `delimiter` between fields instead of a tab.
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Write the header (when asked) and then each row as it is read.
    ///
    /// Returns the number of rows written.
    pub fn print(
        &self,
        cursor: &mut dyn RecordCursor,
        metadata: &RecordMetadata,
        header: bool,
        sink: &mut dyn Write,
    ) -> Result<u64> {
        if header {
            self.print_header(metadata, sink)?;
        }
        let mut rows = 0;
        while cursor.has_next()? {
            self.print_record(cursor.record(), metadata, sink)?;
            rows += 1;
        }
        sink.flush()?;
        Ok(rows)
    }

    /// [`RecordCursorPrinter::print`] into a fresh string.
    pub fn print_to_string(
        &self,
        cursor: &mut dyn RecordCursor,
        metadata: &RecordMetadata,
        header: bool,
    ) -> Result<String> {
        let mut out = Vec::new();
        self.print(cursor, metadata, header, &mut out)?;
        String::from_utf8(out).map_err(|e| BridgeError::internal(format!("Printed non UTF-8 text: {e}")))
    }

    fn print_header(&self, metadata: &RecordMetadata, sink: &mut dyn Write) -> Result<()> {
        for (i, column) in metadata.columns().iter().enumerate() {
            if i > 0 {
                write!(sink, "{}", self.delimiter)?;
            }
            sink.write_all(column.name.as_bytes())?;
        }
        sink.write_all(b"\n")?;
        Ok(())
    }

    fn print_record(
        &self,
        record: &dyn Record,
        metadata: &RecordMetadata,
        sink: &mut dyn Write,
    ) -> Result<()> {
        for (i, column) in metadata.columns().iter().enumerate() {
            if i > 0 {
                write!(sink, "{}", self.delimiter)?;
            }
            print_cell(record, i, column.column_type, sink)?;
        }
        sink.write_all(b"\n")?;
        Ok(())
    }
}

fn print_cell(record: &dyn Record, col: usize, column_type: ColumnType, sink: &mut dyn Write) -> Result<()> {
    match column_type {
        ColumnType::Boolean => write!(sink, "{}", record.get_bool(col)?)?,
        ColumnType::Byte => write!(sink, "{}", record.get_byte(col)?)?,
        ColumnType::Short => write!(sink, "{}", record.get_short(col)?)?,
        ColumnType::Int => {
            let v = record.get_int(col)?;
            if !nulls::is_int_null(v) {
                write!(sink, "{v}")?;
            }
        }
        ColumnType::Long => {
            let v = record.get_long(col)?;
            if !nulls::is_long_null(v) {
                write!(sink, "{v}")?;
            }
        }
        ColumnType::Float => {
            let v = record.get_float(col)?;
            if !v.is_nan() {
                write!(sink, "{v}")?;
            }
        }
        ColumnType::Double => {
            let v = record.get_double(col)?;
            if !v.is_nan() {
                write!(sink, "{v}")?;
            }
        }
        ColumnType::Date => {
            let ms = record.get_date(col)?;
            if !nulls::is_long_null(ms) {
                let dt = DateTime::from_timestamp_millis(ms)
                    .ok_or_else(|| BridgeError::execution(format!("Date out of range: {ms}")))?;
                sink.write_all(dt.to_rfc3339_opts(SecondsFormat::Millis, true).as_bytes())?;
            }
        }
        ColumnType::Timestamp => {
            let us = record.get_timestamp(col)?;
            if !nulls::is_long_null(us) {
                let dt = DateTime::from_timestamp_micros(us).ok_or_else(|| {
                    BridgeError::execution(format!("Timestamp out of range: {us}"))
                })?;
                sink.write_all(dt.to_rfc3339_opts(SecondsFormat::Micros, true).as_bytes())?;
            }
        }
        ColumnType::String => {
            if let Some(s) = record.get_str(col)? {
                sink.write_all(s.as_bytes())?;
            }
        }
        ColumnType::Binary => {
            if let Some(bytes) = record.get_bin(col)? {
                for b in bytes {
                    write!(sink, "{b:02x}")?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RecordCursorFactory;
    use crate::models::{ColumnDescriptor, Value};
    use crate::services::row_set::MemoryRowSet;
    use chrono::NaiveDate;

    fn rows(columns: Vec<ColumnDescriptor>, data: Vec<Vec<Option<Value>>>) -> MemoryRowSet {
        let mut set = MemoryRowSet::new(RecordMetadata::new(columns));
        for row in data {
            set.push_row(row).unwrap();
        }
        set
    }

    #[test]
    fn test_header_and_rows() {
        let set = rows(
            vec![
                ColumnDescriptor::new("id", ColumnType::Long),
                ColumnDescriptor::new("name", ColumnType::String),
            ],
            vec![
                vec![Some(Value::Long(1)), Some(Value::String("a".into()))],
                vec![Some(Value::Long(2)), None],
            ],
        );
        let mut cursor = set.cursor().unwrap();
        let out = RecordCursorPrinter::new()
            .print_to_string(cursor.as_mut(), set.metadata(), true)
            .unwrap();
        assert_eq!(out, "id\tname\n1\ta\n2\t\n");
    }

    #[test]
    fn test_nulls_print_empty() {
        let set = rows(
            vec![
                ColumnDescriptor::new("i", ColumnType::Int),
                ColumnDescriptor::new("d", ColumnType::Double),
                ColumnDescriptor::new("t", ColumnType::Timestamp),
                ColumnDescriptor::new("b", ColumnType::Binary),
            ],
            vec![vec![None, None, None, None]],
        );
        let mut cursor = set.cursor().unwrap();
        let out = RecordCursorPrinter::new()
            .with_delimiter(',')
            .print_to_string(cursor.as_mut(), set.metadata(), false)
            .unwrap();
        assert_eq!(out, ",,,\n");
    }

    /// Yields `rows` records of one LONG cell, then fails.
    struct FailingCursor {
        rows: i64,
        current: i64,
    }

    impl Record for FailingCursor {
        fn cell(&self, _col: usize, _expected: ColumnType) -> Result<Option<Value>> {
            Ok(Some(Value::Long(self.current)))
        }
    }

    impl RecordCursor for FailingCursor {
        fn has_next(&mut self) -> Result<bool> {
            if self.current == self.rows {
                return Err(BridgeError::execution("connection reset"));
            }
            self.current += 1;
            Ok(true)
        }
        fn record(&self) -> &dyn Record {
            self
        }
        fn to_top(&mut self) -> Result<()> {
            self.current = 0;
            Ok(())
        }
        fn size(&self) -> Option<u64> {
            None
        }
        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_rows_reach_the_sink_before_the_cursor_ends() {
        let metadata = RecordMetadata::new(vec![ColumnDescriptor::new("n", ColumnType::Long)]);
        let mut cursor = FailingCursor { rows: 2, current: 0 };
        let mut out = Vec::new();
        let err = RecordCursorPrinter::new()
            .print(&mut cursor, &metadata, true, &mut out)
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "connection reset");
        assert_eq!(String::from_utf8(out).unwrap(), "n\n1\n2\n");
    }

    #[test]
    fn test_print_reports_row_count() {
        let set = rows(
            vec![ColumnDescriptor::new("n", ColumnType::Short)],
            vec![vec![Some(Value::Short(1))], vec![Some(Value::Short(2))]],
        );
        let mut cursor = set.cursor().unwrap();
        let mut out = Vec::new();
        let printed = RecordCursorPrinter::new()
            .print(cursor.as_mut(), set.metadata(), false, &mut out)
            .unwrap();
        assert_eq!(printed, 2);
        assert_eq!(out, b"1\n2\n");
    }

    #[test]
    fn test_temporal_and_binary_formatting() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let set = rows(
            vec![
                ColumnDescriptor::new("d", ColumnType::Date),
                ColumnDescriptor::new("ts", ColumnType::Timestamp),
                ColumnDescriptor::new("bin", ColumnType::Binary),
                ColumnDescriptor::new("ok", ColumnType::Boolean),
            ],
            vec![vec![
                Some(Value::Date(day)),
                Some(Value::Timestamp(day.and_hms_micro_opt(1, 2, 3, 4).unwrap())),
                Some(Value::Binary(vec![0x0a, 0xff])),
                Some(Value::Bool(true)),
            ]],
        );
        let mut cursor = set.cursor().unwrap();
        let out = RecordCursorPrinter::new()
            .print_to_string(cursor.as_mut(), set.metadata(), false)
            .unwrap();
        assert_eq!(out, "2024-03-05T00:00:00.000Z\t2024-03-05T01:02:03.000004Z\t0aff\ttrue\n");
    }
}
