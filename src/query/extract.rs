//! Relation collection over the full statement AST.
//!
//! Every `TableFactor::Table` reached by the sqlparser visitor is a relation,
//! wherever it sits: FROM, joins, WHERE, ORDER BY, GROUP BY, function
//! arguments, `ANY (...)`, `ARRAY (...)`. References that resolve to a CTE
//! in scope are left out.

use std::ops::ControlFlow;

use compact_str::CompactString;
use indexmap::IndexSet;
use sqlparser::ast::{ObjectName, ObjectNamePart, Query, Statement, Visit, Visitor};

use super::types::TableRef;

/// Base tables and CTE names of one statement, both in traversal order.
pub struct Relations {
    pub tables:    Vec<TableRef>,
    pub cte_names: Vec<CompactString>
}

/// Collect relations of `statement`.
pub fn collect_relations(statement: &Statement) -> Relations {
    let mut collector = RelationCollector::default();
    let _ = statement.visit(&mut collector);
    Relations {
        tables:    collector.tables.into_iter().collect(),
        cte_names: collector.cte_names.into_iter().collect()
    }
}

/// CTEs declared by one query.
///
/// The visitor walks `WITH` before the body and each CTE body in order, so
/// the first query entered while `next < names.len()` is the body of
/// `names[next]`. A non-recursive CTE sees only the ones before it.
struct Scope {
    names:     Vec<CompactString>,
    next:      usize,
    recursive: bool,
    closes:    bool
}

impl Scope {
    fn visible(&self) -> &[CompactString] {
        if self.recursive {
            &self.names
        } else {
            &self.names[..self.next]
        }
    }
}

#[derive(Default)]
struct RelationCollector {
    tables:    IndexSet<TableRef>,
    cte_names: IndexSet<CompactString>,
    scopes:    Vec<Scope>
}

impl RelationCollector {
    fn is_cte(&self, table: &TableRef) -> bool {
        if table.schema.is_some() {
            return false;
        }
        let name = table.name.as_str().to_lowercase();
        self.scopes
            .iter()
            .any(|scope| scope.visible().iter().any(|cte| cte.as_str() == name))
    }
}

impl Visitor for RelationCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        let closes = self
            .scopes
            .last()
            .is_some_and(|parent| parent.next < parent.names.len());
        let (names, recursive) = match &query.with {
            Some(with) => (
                with.cte_tables
                    .iter()
                    .map(|cte| CompactString::from(cte.alias.name.value.to_lowercase()))
                    .collect(),
                with.recursive
            ),
            None => (Vec::new(), false)
        };
        self.cte_names.extend(names.iter().cloned());
        self.scopes.push(Scope {
            names,
            next: 0,
            recursive,
            closes
        });
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        if let Some(scope) = self.scopes.pop()
            && scope.closes
            && let Some(parent) = self.scopes.last_mut()
        {
            parent.next += 1;
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        if let Some(table) = table_ref(relation)
            && !self.is_cte(&table)
        {
            self.tables.insert(table);
        }
        ControlFlow::Continue(())
    }
}

/// Last identifier is the relation, the one before it the schema.
/// A leading database/catalog part (`db.schema.table`) is dropped.
fn table_ref(name: &ObjectName) -> Option<TableRef> {
    let parts: Vec<&str> = name
        .0
        .iter()
        .filter_map(|part| match part {
            ObjectNamePart::Identifier(ident) => Some(ident.value.as_str()),
            #[allow(unreachable_patterns)]
            _ => None
        })
        .collect();
    match parts.as_slice() {
        [] => None,
        [table] => Some(TableRef::new(None, table)),
        [.., schema, table] => Some(TableRef::new(Some(schema), table))
    }
}
