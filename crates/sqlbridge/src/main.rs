//! sqlbridge - run a query against a pooled external SQL source.

use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use sqlbridge_core::logging::{init_logging, log_dir, LogConfig};
use sqlbridge_core::{
    pool_init, query, MemoryRowSet, PoolConfig, PoolRegistry, RecordCursorFactory,
    RecordCursorPrinter,
};

/// Query pooled external SQL sources and print tab-separated rows
#[derive(Parser, Debug)]
#[command(name = "sqlbridge", version)]
#[command(about = "Query pooled external SQL sources and print tab-separated rows", long_about = None)]
struct Args {
    /// JSON file with an array of pool definitions
    #[arg(short, long)]
    pools: PathBuf,

    /// Name of the pool to query
    #[arg(short = 'n', long)]
    pool: String,

    /// SQL to run
    sql: String,

    /// Omit the header line of column names
    #[arg(long)]
    no_header: bool,

    /// Log filter, e.g. "sqlbridge_core=debug"
    #[arg(long)]
    log: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let mut log_config = LogConfig::new(log_dir());
    if let Some(filter) = &args.log {
        log_config = log_config.with_filter(filter);
    }
    let _logging_guard = init_logging(log_config);

    let registry = PoolRegistry::global();
    let outcome = run(registry, &args);
    let shutdown = registry.shutdown();

    match outcome.and(shutdown) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, category = e.category(), "Query failed");
            eprintln!("error: {e}");
            if let Some(hint) = e.hint() {
                eprintln!("hint: {hint}");
            }
            ExitCode::FAILURE
        }
    }
}

fn run(registry: &PoolRegistry, args: &Args) -> sqlbridge_core::Result<()> {
    let configs = PoolConfig::load_all(&args.pools)?;
    tracing::info!(pools = configs.len(), path = %args.pools.display(), "Loaded pool definitions");
    pool_init(registry, &MemoryRowSet::from_pool_configs(&configs))?;

    let factory = query(registry, &args.pool, &args.sql)?;
    let mut cursor = factory.cursor()?;
    let mut out = BufWriter::new(std::io::stdout().lock());
    let printed =
        RecordCursorPrinter::new().print(cursor.as_mut(), factory.metadata(), !args.no_header, &mut out);
    let closed = cursor.close();
    let rows = printed?;
    closed?;
    tracing::debug!(pool = %args.pool, rows, "Query printed");
    Ok(())
}
