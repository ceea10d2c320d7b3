//! Contract with the host query engine.
//!
//! The host supplies settings as a [`RecordCursorFactory`] and consumes query
//! results through the same abstraction. Records expose typed accessors that
//! substitute the engine's null sentinels (see [`crate::models::nulls`]) for
//! SQL NULL.

use crate::error::{BridgeError, Result};
use crate::models::{nulls, ColumnType, RecordMetadata, Value};

/// One row, read column by column.
///
/// Implementors only provide [`Record::cell`]; the typed accessors coerce the
/// cell to the requested type and map NULL to the type's sentinel.
pub trait Record {
    /// Read the raw cell at zero-based `col`, `None` when the value is NULL.
    fn cell(&self, col: usize, expected: ColumnType) -> Result<Option<Value>>;

    /// BOOLEAN accessor; NULL reads as `false`.
    fn get_bool(&self, col: usize) -> Result<bool> {
        match self.cell(col, ColumnType::Boolean)? {
            Some(v) => v.as_bool().ok_or_else(|| mismatch(col, &v, ColumnType::Boolean)),
            None => Ok(nulls::BOOL_NULL),
        }
    }

    /// BYTE accessor; NULL reads as `0`. Values out of range are an error.
    fn get_byte(&self, col: usize) -> Result<i8> {
        match self.cell(col, ColumnType::Byte)? {
            Some(v) => v
                .as_i64()
                .and_then(|n| i8::try_from(n).ok())
                .ok_or_else(|| mismatch(col, &v, ColumnType::Byte)),
            None => Ok(nulls::BYTE_NULL),
        }
    }

    /// SHORT accessor; NULL reads as `0`.
    fn get_short(&self, col: usize) -> Result<i16> {
        match self.cell(col, ColumnType::Short)? {
            Some(v) => v
                .as_i64()
                .and_then(|n| i16::try_from(n).ok())
                .ok_or_else(|| mismatch(col, &v, ColumnType::Short)),
            None => Ok(nulls::SHORT_NULL),
        }
    }

    /// INT accessor; NULL reads as `i32::MIN`.
    fn get_int(&self, col: usize) -> Result<i32> {
        match self.cell(col, ColumnType::Int)? {
            Some(v) => v
                .as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .ok_or_else(|| mismatch(col, &v, ColumnType::Int)),
            None => Ok(nulls::INT_NULL),
        }
    }

    /// LONG accessor; NULL reads as `i64::MIN`.
    fn get_long(&self, col: usize) -> Result<i64> {
        match self.cell(col, ColumnType::Long)? {
            Some(v) => v.as_i64().ok_or_else(|| mismatch(col, &v, ColumnType::Long)),
            None => Ok(nulls::LONG_NULL),
        }
    }

    /// FLOAT accessor; NULL reads as NaN.
    fn get_float(&self, col: usize) -> Result<f32> {
        match self.cell(col, ColumnType::Float)? {
            Some(v) => v
                .as_f64()
                .filter(|n| !n.is_finite() || n.abs() <= f64::from(f32::MAX))
                .map(|n| n as f32)
                .ok_or_else(|| mismatch(col, &v, ColumnType::Float)),
            None => Ok(nulls::FLOAT_NULL),
        }
    }

    /// DOUBLE accessor; NULL reads as NaN.
    fn get_double(&self, col: usize) -> Result<f64> {
        match self.cell(col, ColumnType::Double)? {
            Some(v) => v.as_f64().ok_or_else(|| mismatch(col, &v, ColumnType::Double)),
            None => Ok(nulls::DOUBLE_NULL),
        }
    }

    /// STRING accessor; NULL reads as `None`.
    fn get_str(&self, col: usize) -> Result<Option<String>> {
        Ok(self.cell(col, ColumnType::String)?.map(|v| match v {
            Value::String(s) => s,
            other => other.to_text(),
        }))
    }

    /// BINARY accessor; NULL reads as `None`.
    fn get_bin(&self, col: usize) -> Result<Option<Vec<u8>>> {
        Ok(self.cell(col, ColumnType::Binary)?.map(Value::into_bytes))
    }

    /// DATE accessor in epoch milliseconds; NULL reads as the LONG sentinel.
    fn get_date(&self, col: usize) -> Result<i64> {
        match self.cell(col, ColumnType::Date)? {
            Some(v) => v.as_epoch_millis().ok_or_else(|| mismatch(col, &v, ColumnType::Date)),
            None => Ok(nulls::LONG_NULL),
        }
    }

    /// TIMESTAMP accessor in epoch microseconds; NULL reads as the LONG sentinel.
    fn get_timestamp(&self, col: usize) -> Result<i64> {
        match self.cell(col, ColumnType::Timestamp)? {
            Some(v) => v.as_epoch_micros().ok_or_else(|| mismatch(col, &v, ColumnType::Timestamp)),
            None => Ok(nulls::LONG_NULL),
        }
    }
}

fn mismatch(col: usize, value: &Value, expected: ColumnType) -> BridgeError {
    BridgeError::Execution {
        message: format!("Cannot read {value:?} as {expected}"),
        detail: None,
        hint: None,
        position: Some(col),
        code: None,
        source: None,
    }
}

/// Forward-only, pull-based iteration over records.
pub trait RecordCursor {
    /// Advance to the next record; `false` at end of data.
    fn has_next(&mut self) -> Result<bool>;

    /// The current record.
    fn record(&self) -> &dyn Record;

    /// Rewind to "before first".
    fn to_top(&mut self) -> Result<()>;

    /// Number of records if known up front.
    fn size(&self) -> Option<u64>;

    /// Release resources held by the cursor.
    fn close(&mut self) -> Result<()>;
}

/// Source of cursors over a fixed schema.
///
/// The settings row-set handed to pool-init and the result of a query are both
/// factories.
pub trait RecordCursorFactory: Send + Sync {
    /// Column names and types.
    fn metadata(&self) -> &RecordMetadata;

    /// Open a cursor positioned before the first record.
    fn cursor(&self) -> Result<Box<dyn RecordCursor + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Cells(Vec<Option<Value>>);

    impl Record for Cells {
        fn cell(&self, col: usize, _expected: ColumnType) -> Result<Option<Value>> {
            Ok(self.0[col].clone())
        }
    }

    #[test]
    fn test_narrowing_accessors_reject_out_of_range_values() {
        let record = Cells(vec![
            Some(Value::Long(5_000_000_000)),
            Some(Value::Long(40_000)),
            Some(Value::Long(300)),
            Some(Value::Double(1e300)),
        ]);

        let err = record.get_int(0).err().unwrap();
        assert_eq!(err.position(), Some(0));
        assert!(record.get_short(1).is_err());
        assert!(record.get_byte(2).is_err());
        assert!(record.get_float(3).is_err());

        assert_eq!(record.get_long(0).unwrap(), 5_000_000_000);
        assert_eq!(record.get_int(1).unwrap(), 40_000);
        assert_eq!(record.get_short(2).unwrap(), 300);
        assert_eq!(record.get_double(3).unwrap(), 1e300);
    }

    #[test]
    fn test_narrowing_accessors_keep_boundary_values() {
        let record = Cells(vec![
            Some(Value::Long(i64::from(i32::MAX))),
            Some(Value::Long(i64::from(i16::MIN))),
            Some(Value::Long(-128)),
            Some(Value::Double(f64::from(f32::MAX))),
            Some(Value::Double(f64::INFINITY)),
            Some(Value::Double(0.1)),
        ]);

        assert_eq!(record.get_int(0).unwrap(), i32::MAX);
        assert_eq!(record.get_short(1).unwrap(), i16::MIN);
        assert_eq!(record.get_byte(2).unwrap(), i8::MIN);
        assert_eq!(record.get_float(3).unwrap(), f32::MAX);
        assert_eq!(record.get_float(4).unwrap(), f32::INFINITY);
        assert_eq!(record.get_float(5).unwrap(), 0.1f32);
    }

    #[test]
    fn test_null_cells_read_as_sentinels() {
        let record = Cells(vec![None]);
        assert_eq!(record.get_int(0).unwrap(), nulls::INT_NULL);
        assert!(record.get_float(0).unwrap().is_nan());
        assert_eq!(record.get_str(0).unwrap(), None);
    }
}
