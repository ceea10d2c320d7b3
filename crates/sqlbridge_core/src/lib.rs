//! Pooled external SQL sources exposed as typed engine row cursors.
//!
//! - **error**: Error type with configuration, pool and driver categories
//! - **engine**: Record, cursor and cursor factory contract with the host engine
//! - **models**: Column types, null sentinels, values and pool settings
//! - **services**: Pool registry, statement sessions, result cursors and the
//!   `pool_init` / `query` entry points
//! - **logging**: Structured logging setup

pub mod engine;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;


pub use engine::{Record, RecordCursor, RecordCursorFactory};
pub use error::{BridgeError, ErrorInfo, Result};
pub use models::{
    nulls, ColumnDescriptor, ColumnType, DriverKind, ExternalColumn, ExternalType, IsolationLevel,
    PoolConfig, PoolStatus, RecordMetadata, Value,
};
pub use services::{
    pool_init, query, ExternalCursorFactory, MemoryRowSet, PoolRegistry, RecordCursorPrinter,
};
