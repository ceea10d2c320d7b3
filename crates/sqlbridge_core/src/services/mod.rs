//! Bridge services.
//!
//! - `types` - external type code to engine column type mapping
//! - `driver` - data source abstraction with SQLite (r2d2) and PostgreSQL (deadpool-postgres) pools
//! - `registry` - process-wide named pool registry
//! - `session` - statement session with probe and unlimited fetch
//! - `cursor` - engine row cursor over a statement session
//! - `functions` - `pool_init` and `query` entry points
//! - `row_set` - in-memory row-set used for settings
//! - `printer` - tab-separated cursor printer

pub mod cursor;
pub mod driver;
pub mod functions;
pub mod printer;
pub mod registry;
pub mod row_set;
pub mod session;
pub mod types;

pub use cursor::{ExternalCursorFactory, ExternalRecordCursor};
pub use driver::{open_data_source, DataSource};
pub use functions::{pool_init, query};
pub use printer::RecordCursorPrinter;
pub use registry::PoolRegistry;
pub use row_set::MemoryRowSet;
pub use session::{FetchMode, StatementSession};
pub use types::{derive_metadata, map_type};
