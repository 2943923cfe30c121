use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// SQL approval gate - classify SQL, assess its plan, run it bounded and audited
#[derive(Parser, Debug)]
#[command(name = "sql-gate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Connection string; the scheme selects the backend
    #[arg(long, global = true)]
    pub dsn: Option<String>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    pub format: Format,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Debug logging to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify statements and check the whitelist without a database
    Lint {
        #[command(flatten)]
        input: SqlInput,

        /// Allowed tables, comma separated (defaults to the config whitelist)
        #[arg(short, long, value_delimiter = ',')]
        allow: Vec<String>,

        /// SQL dialect for parsing
        #[arg(long, value_enum, default_value = "generic")]
        dialect: Dialect
    },

    /// Review a statement against its EXPLAIN plan without running it
    Validate {
        #[command(flatten)]
        input: SqlInput,

        /// Allowed tables, comma separated (defaults to the config whitelist)
        #[arg(short, long, value_delimiter = ',')]
        allow: Vec<String>
    },

    /// Review, run bounded and record an audit event
    Approve {
        #[command(flatten)]
        input: SqlInput,

        /// Allowed tables, comma separated (defaults to the config whitelist)
        #[arg(short, long, value_delimiter = ',')]
        allow: Vec<String>,

        /// Question or context recorded with the event
        #[arg(short, long)]
        question: Option<String>,

        /// Row cap for the bounded execution
        #[arg(long)]
        max_rows: Option<usize>,

        /// Rows covered by the preview hash
        #[arg(long)]
        preview_rows: Option<usize>,

        /// Print the returned rows as well
        #[arg(long)]
        show_rows: bool
    },

    /// Inspect the audit log
    History {
        #[command(subcommand)]
        action: HistoryAction
    },

    /// Check connectivity and the read-only guarantee
    Ping,

    /// List tables with columns and sample values
    Schema {
        /// Sample values per column
        #[arg(long)]
        samples: Option<usize>
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum HistoryAction {
    /// Most recent events first
    Recent {
        #[arg(short, long, default_value_t = 20)]
        limit: usize
    },
    /// One event by id
    Show { id: i64 }
}

/// SQL text given inline or read from a file (`-` for stdin).
#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct SqlInput {
    /// SQL text
    #[arg(long)]
    pub sql: Option<String>,

    /// Path to a SQL file (use - for stdin)
    #[arg(long)]
    pub file: Option<PathBuf>
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Dialect {
    Generic,
    Postgresql,
    Mysql,
    Snowflake
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Format {
    Text,
    Json,
    Yaml
}
