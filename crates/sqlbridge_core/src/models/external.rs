//! External driver type codes and result column descriptions.
//!
//! Codes follow the standard SQL type numbering used by JDBC/ODBC drivers, so
//! bindings for different databases translate into one shared vocabulary.

use std::fmt;

/// Type code reported by an external driver for a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExternalType(pub i32);

impl ExternalType {
    pub const BIT: Self = Self(-7);
    pub const TINYINT: Self = Self(-6);
    pub const SMALLINT: Self = Self(5);
    pub const INTEGER: Self = Self(4);
    pub const BIGINT: Self = Self(-5);
    pub const FLOAT: Self = Self(6);
    pub const REAL: Self = Self(7);
    pub const DOUBLE: Self = Self(8);
    pub const NUMERIC: Self = Self(2);
    pub const DECIMAL: Self = Self(3);
    pub const CHAR: Self = Self(1);
    pub const VARCHAR: Self = Self(12);
    pub const LONGVARCHAR: Self = Self(-1);
    pub const NCHAR: Self = Self(-15);
    pub const NVARCHAR: Self = Self(-9);
    pub const LONGNVARCHAR: Self = Self(-16);
    pub const DATE: Self = Self(91);
    pub const TIME: Self = Self(92);
    pub const TIMESTAMP: Self = Self(93);
    pub const TIME_WITH_TIMEZONE: Self = Self(2013);
    pub const TIMESTAMP_WITH_TIMEZONE: Self = Self(2014);
    pub const BINARY: Self = Self(-2);
    pub const VARBINARY: Self = Self(-3);
    pub const LONGVARBINARY: Self = Self(-4);
    pub const NULL: Self = Self(0);
    pub const OTHER: Self = Self(1111);
    pub const BLOB: Self = Self(2004);
    pub const CLOB: Self = Self(2005);
    pub const ARRAY: Self = Self(2003);
    pub const BOOLEAN: Self = Self(16);

    /// Standard name of the code, or "TYPE(<code>)" for vendor codes.
    pub fn name(&self) -> String {
        let known = match *self {
            Self::BIT => "BIT",
            Self::TINYINT => "TINYINT",
            Self::SMALLINT => "SMALLINT",
            Self::INTEGER => "INTEGER",
            Self::BIGINT => "BIGINT",
            Self::FLOAT => "FLOAT",
            Self::REAL => "REAL",
            Self::DOUBLE => "DOUBLE",
            Self::NUMERIC => "NUMERIC",
            Self::DECIMAL => "DECIMAL",
            Self::CHAR => "CHAR",
            Self::VARCHAR => "VARCHAR",
            Self::LONGVARCHAR => "LONGVARCHAR",
            Self::NCHAR => "NCHAR",
            Self::NVARCHAR => "NVARCHAR",
            Self::LONGNVARCHAR => "LONGNVARCHAR",
            Self::DATE => "DATE",
            Self::TIME => "TIME",
            Self::TIMESTAMP => "TIMESTAMP",
            Self::TIME_WITH_TIMEZONE => "TIME_WITH_TIMEZONE",
            Self::TIMESTAMP_WITH_TIMEZONE => "TIMESTAMP_WITH_TIMEZONE",
            Self::BINARY => "BINARY",
            Self::VARBINARY => "VARBINARY",
            Self::LONGVARBINARY => "LONGVARBINARY",
            Self::NULL => "NULL",
            Self::OTHER => "OTHER",
            Self::BLOB => "BLOB",
            Self::CLOB => "CLOB",
            Self::ARRAY => "ARRAY",
            Self::BOOLEAN => "BOOLEAN",
            Self(code) => return format!("TYPE({code})"),
        };
        known.to_string()
    }
}

impl fmt::Display for ExternalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Result column as described by the external driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalColumn {
    /// Column label reported by the driver
    pub name: String,
    /// Standard type code
    pub type_code: ExternalType,
    /// Vendor type name (e.g., "int4", "TEXT")
    pub type_name: String,
}

impl ExternalColumn {
    /// Create a column description.
    pub fn new(
        name: impl Into<String>,
        type_code: ExternalType,
        type_name: impl Into<String>,
    ) -> Self {
        Self { name: name.into(), type_code, type_name: type_name.into() }
    }
}
