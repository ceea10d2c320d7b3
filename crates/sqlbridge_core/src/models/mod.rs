//! Data models for sqlbridge.
//!
//! This module contains all core data structures:
//! - `column` - ColumnType, null sentinels, ColumnDescriptor, RecordMetadata
//! - `value` - Value read from an external result cell
//! - `external` - ExternalType codes and ExternalColumn
//! - `pool` - PoolConfig, DriverKind, IsolationLevel, PoolStatus

pub mod column;
pub mod external;
pub mod pool;
pub mod value;

pub use column::{nulls, ColumnDescriptor, ColumnType, RecordMetadata};
pub use external::{ExternalColumn, ExternalType};
pub use pool::{DriverKind, IsolationLevel, PoolConfig, PoolStatus};
pub use value::Value;
