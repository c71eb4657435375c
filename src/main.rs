//! db-exec - Main entry point.
//!
//! Runs a paginated query through the managed execution layer against a
//! generated in-memory table and prints the page as JSON.

use clap::Parser;
use db_exec::config::Config;
use db_exec::db::ExecutionContext;
use db_exec::driver::{MemoryDatabase, MemorySource, MemoryTable};
use db_exec::models::{StatementOptions, Value};
use db_exec::monitor::{BlockStack, TracingMonitor};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEMO_QUERY: &str = "SELECT id, label FROM numbers";

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

fn demo_database(rows: u64) -> Arc<MemoryDatabase> {
    let db = Arc::new(MemoryDatabase::new("demo"));
    let table = MemoryTable::new(&["id", "label"]).with_rows(
        (1..=rows)
            .map(|i| vec![Value::Int(i as i64), Value::Text(format!("row {i}"))])
            .collect(),
    );
    db.create_table("numbers", table);
    db.register_scan(DEMO_QUERY, "numbers");
    db
}

fn run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let source = Arc::new(MemorySource::new(demo_database(config.rows)));
    let tracker = Arc::new(BlockStack::new());
    let ctx = ExecutionContext::builder(source)
        .title("Demo page")
        .isolated(config.isolated)
        .tracker(tracker.clone())
        .monitor(Arc::new(TracingMonitor))
        .config(config.execution.clone())
        .build()?;

    let mut stmt = ctx.create_statement(&StatementOptions::new())?;
    stmt.set_purpose("demo");
    stmt.set_limit(config.offset, config.limit);
    let mut rs = stmt.execute_query(DEMO_QUERY)?;
    let rows = rs.fetch_all()?;
    let fetched = rs.rows_fetched();
    rs.close();
    stmt.close();
    ctx.close();

    info!(
        rows = fetched,
        blocks_started = tracker.started(),
        blocks_ended = tracker.ended(),
        "Query finished"
    );
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    info!(
        rows = config.rows,
        offset = config.offset,
        limit = config.limit,
        isolated = config.isolated,
        "Starting db-exec v{}",
        env!("CARGO_PKG_VERSION")
    );

    if let Err(e) = run(&config) {
        error!(error = %e, "Demo query failed");
        return Err(e);
    }
    Ok(())
}
