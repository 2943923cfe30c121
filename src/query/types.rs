use std::fmt;

use compact_str::CompactString;
use serde::Serialize;

/// A relation referenced by a statement, as written in the SQL text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TableRef {
    pub schema: Option<CompactString>,
    pub name:   CompactString
}

impl TableRef {
    pub fn new(schema: Option<&str>, name: &str) -> Self {
        Self {
            schema: schema.map(CompactString::from),
            name:   CompactString::from(name)
        }
    }

    /// `schema.name` when a qualifier is present, otherwise `name`
    pub fn qualified(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.name),
            None => self.name.to_string()
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified())
    }
}

/// Kind of the root statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatementKind {
    Select,
    Other
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Select => write!(f, "SELECT"),
            Self::Other => write!(f, "OTHER")
        }
    }
}

/// A classified statement.
///
/// `sql` is the normalized text and is the only form used downstream
/// (explain, execution, audit). Built fresh for every request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlStatement {
    pub sql:       String,
    pub kind:      StatementKind,
    /// Base tables in traversal order, deduplicated, CTE names excluded
    pub tables:    Vec<TableRef>,
    pub cte_names: Vec<CompactString>
}

impl SqlStatement {
    pub fn new(sql: String, kind: StatementKind) -> Self {
        Self {
            sql,
            kind,
            tables: Vec::new(),
            cte_names: Vec::new()
        }
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(TableRef::qualified).collect()
    }
}
