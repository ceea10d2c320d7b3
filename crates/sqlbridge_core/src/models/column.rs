//! Engine column types, null sentinels and record metadata.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Engine-native column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    /// true/false
    Boolean,
    /// 8-bit signed integer
    Byte,
    /// 16-bit signed integer
    Short,
    /// 32-bit signed integer
    Int,
    /// 64-bit signed integer
    Long,
    /// Calendar date, epoch milliseconds
    Date,
    /// Point in time, epoch microseconds
    Timestamp,
    /// 32-bit float
    Float,
    /// 64-bit float
    Double,
    /// UTF-8 text
    String,
    /// Raw bytes
    Binary,
}

impl ColumnType {
    /// Upper-case type name as shown in metadata and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Boolean => "BOOLEAN",
            Self::Byte => "BYTE",
            Self::Short => "SHORT",
            Self::Int => "INT",
            Self::Long => "LONG",
            Self::Date => "DATE",
            Self::Timestamp => "TIMESTAMP",
            Self::Float => "FLOAT",
            Self::Double => "DOUBLE",
            Self::String => "STRING",
            Self::Binary => "BINARY",
        }
    }

    /// Parse a type name (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BOOLEAN" => Some(Self::Boolean),
            "BYTE" => Some(Self::Byte),
            "SHORT" => Some(Self::Short),
            "INT" => Some(Self::Int),
            "LONG" => Some(Self::Long),
            "DATE" => Some(Self::Date),
            "TIMESTAMP" => Some(Self::Timestamp),
            "FLOAT" => Some(Self::Float),
            "DOUBLE" => Some(Self::Double),
            "STRING" => Some(Self::String),
            "BINARY" => Some(Self::Binary),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Out-of-band values the engine uses in place of SQL NULL.
///
/// STRING and BINARY have no sentinel; their accessors return `None`.
pub mod nulls {
    /// BOOLEAN null.
    pub const BOOL_NULL: bool = false;
    /// BYTE null.
    pub const BYTE_NULL: i8 = 0;
    /// SHORT null.
    pub const SHORT_NULL: i16 = 0;
    /// INT null.
    pub const INT_NULL: i32 = i32::MIN;
    /// LONG null, also used for DATE and TIMESTAMP.
    pub const LONG_NULL: i64 = i64::MIN;
    /// FLOAT null.
    pub const FLOAT_NULL: f32 = f32::NAN;
    /// DOUBLE null.
    pub const DOUBLE_NULL: f64 = f64::NAN;

    /// Check whether an INT value is the null sentinel.
    pub fn is_int_null(value: i32) -> bool {
        value == INT_NULL
    }

    /// Check whether a LONG/DATE/TIMESTAMP value is the null sentinel.
    pub fn is_long_null(value: i64) -> bool {
        value == LONG_NULL
    }
}

/// Name and engine type of one result column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name as reported by the source
    pub name: String,
    /// Engine column type
    pub column_type: ColumnType,
}

impl ColumnDescriptor {
    /// Create a new column descriptor.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self { name: name.into(), column_type }
    }
}

/// Ordered column descriptors of a row-set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    columns: Vec<ColumnDescriptor>,
}

impl RecordMetadata {
    /// Create metadata from column descriptors.
    pub fn new(columns: Vec<ColumnDescriptor>) -> Self {
        Self { columns }
    }

    /// Append a column.
    pub fn add(&mut self, column: ColumnDescriptor) {
        self.columns.push(column);
    }

    /// Number of columns.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Look up a column index by exact (case-sensitive) name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Get the column type at `index`.
    pub fn column_type(&self, index: usize) -> Option<ColumnType> {
        self.columns.get(index).map(|c| c.column_type)
    }

    /// Get the column name at `index`.
    pub fn column_name(&self, index: usize) -> Option<&str> {
        self.columns.get(index).map(|c| c.name.as_str())
    }

    /// All column descriptors in order.
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }
}
