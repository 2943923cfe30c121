//! Conversions from CLI-facing enums to internal types.

use crate::{
    cli::{Dialect, Format},
    output::OutputFormat,
    query::SqlDialect
};

/// Converts a CLI dialect enum to the internal SQL dialect type.
///
/// # Example
///
/// ```
/// use sql_approval_gate::{app::convert_dialect, cli::Dialect, query::SqlDialect};
///
/// let dialect = convert_dialect(Dialect::Snowflake);
/// assert!(matches!(dialect, SqlDialect::Snowflake));
/// ```
pub fn convert_dialect(dialect: Dialect) -> SqlDialect {
    match dialect {
        Dialect::Generic => SqlDialect::Generic,
        Dialect::Postgresql => SqlDialect::PostgreSQL,
        Dialect::Mysql => SqlDialect::MySQL,
        Dialect::Snowflake => SqlDialect::Snowflake
    }
}

pub fn convert_format(format: Format) -> OutputFormat {
    match format {
        Format::Text => OutputFormat::Text,
        Format::Json => OutputFormat::Json,
        Format::Yaml => OutputFormat::Yaml
    }
}
