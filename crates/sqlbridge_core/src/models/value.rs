//! Cell values read from external drivers.
//!
//! A driver hands back the value in its natural type; the row cursor narrows or
//! widens it to whatever accessor the engine calls, the way typed getters on a
//! result set coerce between compatible types.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

/// A non-null value from one result cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// BOOLEAN
    Bool(bool),
    /// TINYINT
    Byte(i8),
    /// SMALLINT
    Short(i16),
    /// INTEGER
    Int(i32),
    /// BIGINT
    Long(i64),
    /// REAL / FLOAT4
    Float(f32),
    /// DOUBLE / FLOAT8
    Double(f64),
    /// Text
    String(String),
    /// Raw bytes
    Binary(Vec<u8>),
    /// Date without time
    Date(NaiveDate),
    /// Time without date
    Time(NaiveTime),
    /// Timestamp without timezone, read as UTC
    Timestamp(NaiveDateTime),
    /// Timestamp with timezone
    TimestampTz(DateTime<Utc>),
}

const TIMESTAMP_FORMATS: [&str; 4] =
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"];

impl Value {
    /// Coerce to bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Byte(_) | Self::Short(_) | Self::Int(_) | Self::Long(_) => {
                self.as_i64().map(|n| n != 0)
            }
            Self::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "1" => Some(true),
                "false" | "f" | "no" | "n" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Coerce to i64, truncating floating point values.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Byte(n) => Some(i64::from(*n)),
            Self::Short(n) => Some(i64::from(*n)),
            Self::Int(n) => Some(i64::from(*n)),
            Self::Long(n) => Some(*n),
            Self::Float(n) if n.is_finite() => Some(*n as i64),
            Self::Double(n) if n.is_finite() => Some(*n as i64),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Coerce to f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(n) => Some(f64::from(*n)),
            Self::Double(n) => Some(*n),
            Self::String(s) => s.trim().parse().ok(),
            _ => self.as_i64().map(|n| n as f64),
        }
    }

    /// Render as text.
    pub fn to_text(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Byte(n) => n.to_string(),
            Self::Short(n) => n.to_string(),
            Self::Int(n) => n.to_string(),
            Self::Long(n) => n.to_string(),
            Self::Float(n) => n.to_string(),
            Self::Double(n) => n.to_string(),
            Self::String(s) => s.clone(),
            Self::Binary(b) => String::from_utf8_lossy(b).into_owned(),
            Self::Date(d) => d.format("%Y-%m-%d").to_string(),
            Self::Time(t) => t.format("%H:%M:%S%.f").to_string(),
            Self::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            Self::TimestampTz(ts) => ts.to_rfc3339(),
        }
    }

    /// Consume into raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Binary(b) => b,
            Self::String(s) => s.into_bytes(),
            other => other.to_text().into_bytes(),
        }
    }

    /// Interpret as a UTC point in time.
    ///
    /// Integers are taken as epoch milliseconds; TIME values are placed on
    /// 1970-01-01.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Date(d) => Some(d.and_time(NaiveTime::MIN).and_utc()),
            Self::Time(t) => Some(NaiveDate::default().and_time(*t).and_utc()),
            Self::Timestamp(ts) => Some(ts.and_utc()),
            Self::TimestampTz(ts) => Some(*ts),
            Self::Byte(_) | Self::Short(_) | Self::Int(_) | Self::Long(_) => {
                self.as_i64().and_then(DateTime::from_timestamp_millis)
            }
            Self::String(s) => parse_datetime(s.trim()),
            _ => None,
        }
    }

    /// Epoch milliseconds, the engine's DATE representation.
    pub fn as_epoch_millis(&self) -> Option<i64> {
        self.as_datetime().map(|dt| dt.timestamp_millis())
    }

    /// Epoch microseconds, the engine's TIMESTAMP representation.
    pub fn as_epoch_micros(&self) -> Option<i64> {
        self.as_datetime().map(|dt| dt.timestamp_micros())
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, format) {
            return Some(ts.and_utc());
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d.and_time(NaiveTime::MIN).and_utc());
    }
    NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .ok()
        .map(|t| NaiveDate::default().and_time(t).and_utc())
}
