//! # SQL Approval Gate
//!
//! Safety gate for SQL produced by untrusted sources.
//!
//! A statement is only ever executed after it passed four checks:
//!
//! 1. **Classification** - exactly one read-only `SELECT`, no write keyword
//!    anywhere in the text.
//! 2. **Whitelist** - every table is allowed and none lives in a catalog
//!    schema.
//! 3. **Plan analysis** - the backend's `EXPLAIN` is reduced to cost, row and
//!    width estimates plus full-scan and cartesian-join markers.
//! 4. **Risk thresholds** - metrics above their limits warn or block.
//!
//! Approved statements run read-only under a row cap and a time budget. Each
//! execution appends one event to a SQLite audit log with a SHA-256 hash of
//! the preview rows and the provenance of every table read.
//!
//! # Quick Start
//!
//! ```bash
//! # Offline check, no database needed
//! sql-gate lint --sql "SELECT * FROM items LIMIT 2" --allow items
//!
//! # Plan-based review
//! sql-gate --dsn postgres://reader@localhost/demo validate --sql "SELECT * FROM items"
//!
//! # Bounded, audited execution
//! sql-gate approve --sql "SELECT id FROM items" -q "how many items?" --show-rows
//!
//! # Audit trail
//! sql-gate history recent -l 5
//! ```
//!
//! # Backends
//!
//! The DSN scheme picks the backend: `postgres://`, `mysql://` or
//! `snowflake://` (with `SNOWFLAKE_TOKEN`).

use std::process;

use clap::Parser;
use sql_approval_gate::{app, cli::Cli, config::Config, error::AppResult, logging};
use tokio::main;

#[main]
async fn main() {
    match run().await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

async fn run() -> AppResult<i32> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_json);

    let mut config = Config::load()?;
    if let Some(dsn) = &cli.dsn {
        config.connection.dsn = Some(dsn.clone());
    }

    let output = app::run(cli, config).await?;
    println!("{}", output.stdout.trim_end());
    Ok(output.exit_code)
}
