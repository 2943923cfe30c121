//! Application logic for the `sql-gate` CLI.
//!
//! Command handlers live here rather than in the binary so they can be
//! driven from tests. Every handler returns a [`CommandOutput`]; the binary
//! prints it and exits with its code.
//!
//! # Exit Codes
//!
//! - `0` - passed, verdict `ok`
//! - `1` - verdict `warn`
//! - `2` - verdict `block`, or the statement was rejected before planning

mod commands;
mod convert;
mod helpers;
mod types;

pub use commands::{
    ApproveParams, rejection_reasons, run_approve, run_history, run_lint, run_ping, run_schema,
    run_validate
};
pub use convert::{convert_dialect, convert_format};
pub use helpers::{
    AppGate, connect_backend, connect_gate, create_output_options, effective_allowed,
    lint_blocked_schemas, lint_exit_code, lint_statements, read_sql_input, spinner
};
pub use types::{CommandOutput, LintEntry, PingReport};

use crate::{
    cli::{Cli, Commands},
    config::Config,
    error::AppResult
};

/// Dispatch a parsed command line.
///
/// `config` already carries the `--dsn` override.
pub async fn run(cli: Cli, config: Config) -> AppResult<CommandOutput> {
    let opts = create_output_options(cli.format, cli.no_color, cli.verbose);
    match cli.command {
        Commands::Lint {
            input,
            allow,
            dialect
        } => run_lint(&input, &allow, dialect, &config, &opts),
        Commands::Validate {
            input,
            allow
        } => run_validate(&input, &allow, &config, &opts).await,
        Commands::Approve {
            input,
            allow,
            question,
            max_rows,
            preview_rows,
            show_rows
        } => {
            let params = ApproveParams {
                allow,
                question,
                max_rows,
                preview_rows,
                show_rows
            };
            run_approve(&input, params, &config, &opts).await
        }
        Commands::History {
            action
        } => run_history(&action, &config, &opts),
        Commands::Ping => run_ping(&config, &opts).await,
        Commands::Schema {
            samples
        } => run_schema(samples, &config, &opts).await
    }
}
