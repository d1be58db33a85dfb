//! Tables joined into a single query scope.
//!
//! Every table appears at most once per scope, under its logical name. Reaching
//! a table a second time through a different route is a [`SearchError::JoinCycle`].

use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{Result, SearchError};
use crate::registry::{SearchRegistry, Sublist};
use crate::sql::{Condition, Expr, SqlBuilder};
use crate::table::{JoinKind, TableDescriptor, TableJoin, VisibilityRule};
use crate::visibility::VisibilityContext;

/// How a table entered the scope.
#[derive(Debug, Clone, PartialEq)]
enum Route {
    Source,
    Sublists(Vec<String>),
    Visibility,
}

#[derive(Debug)]
pub(crate) struct JoinScope {
    registry: Arc<SearchRegistry>,
    tables: IndexMap<String, Route>,
    joins: Vec<TableJoin>,
    /// Alias owned by an enclosing query that must stay visible.
    reserved: Option<String>,
}

impl JoinScope {
    pub fn new(registry: Arc<SearchRegistry>, source: &TableDescriptor) -> Self {
        Self {
            registry,
            tables: IndexMap::from([(source.name.clone(), Route::Source)]),
            joins: Vec::new(),
            reserved: None,
        }
    }

    /// Forbid joining `alias`, which an outer query correlates against.
    pub fn reserve(&mut self, alias: &str) -> Result<()> {
        if self.tables.contains_key(alias) {
            return Err(self.cycle(alias));
        }
        self.reserved = Some(alias.to_string());
        Ok(())
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Left-join every table along a chain of sublists starting at a table
    /// already in scope.
    pub fn join_sublists(&mut self, chain: &[Arc<Sublist>]) -> Result<()> {
        let mut route = Vec::new();
        for sublist in chain {
            route.push(format!("{}.{}", sublist.owner, sublist.name));
            let table = sublist.child_table();
            match self.tables.get(table) {
                Some(Route::Sublists(existing)) if *existing == route => continue,
                Some(_) => return Err(self.cycle(table)),
                None if self.reserved.as_deref() == Some(table) => return Err(self.cycle(table)),
                None => {}
            }
            if !self.contains(sublist.parent_table()) {
                return Err(SearchError::internal(format!(
                    "sublist '{}' joins from '{}', which is not in the query",
                    sublist.name,
                    sublist.parent_table()
                )));
            }
            let parent = self.table(sublist.parent_table())?;
            let child = self.table(table)?;
            self.joins.push(parent.join(child, &sublist.on, JoinKind::Left));
            self.tables
                .insert(table.to_string(), Route::Sublists(route.clone()));
        }
        Ok(())
    }

    /// Join whatever `table` needs to express its visibility rule and return
    /// the rule's condition. `None` means unrestricted.
    pub fn join_visibility(
        &mut self,
        table: &TableDescriptor,
        context: &dyn VisibilityContext,
    ) -> Result<Option<Condition>> {
        let mut chain = vec![table.name.clone()];
        let mut current = table.clone();
        loop {
            match &current.visibility {
                VisibilityRule::Unrestricted => return Ok(None),
                VisibilityRule::Column { column, scope } => {
                    return Ok(context
                        .ids_for(scope)
                        .map(|ids| Condition::in_list(Expr::column(&current.name, column), ids)));
                }
                VisibilityRule::InheritFromParent | VisibilityRule::Inherit(_) => {
                    let link = current.visibility_link().cloned().ok_or_else(|| {
                        SearchError::internal(format!(
                            "table '{}' inherits visibility but has no parent",
                            current.name
                        ))
                    })?;
                    if chain.contains(&link.table) {
                        chain.push(link.table.clone());
                        return Err(SearchError::JoinCycle {
                            table: link.table,
                            chain,
                        });
                    }
                    chain.push(link.table.clone());
                    let next = self.table(&link.table)?.clone();
                    if !self.contains(&next.name) {
                        if self.reserved.as_deref() == Some(next.name.as_str()) {
                            return Err(self.cycle(&next.name));
                        }
                        self.joins.push(current.join(&next, &link.on, JoinKind::Inner));
                        self.tables.insert(next.name.clone(), Route::Visibility);
                    }
                    current = next;
                }
            }
        }
    }

    pub fn to_sql(&self, builder: &mut SqlBuilder) -> Result<String> {
        let mut sql = String::new();
        for join in &self.joins {
            sql.push_str(&join.to_sql(builder)?);
        }
        Ok(sql)
    }

    fn table(&self, name: &str) -> Result<&TableDescriptor> {
        self.registry
            .table(name)
            .ok_or_else(|| SearchError::internal(format!("table '{name}' is not registered")))
    }

    fn cycle(&self, table: &str) -> SearchError {
        let mut chain: Vec<String> = self.tables.keys().cloned().collect();
        chain.extend(self.reserved.iter().cloned());
        chain.push(table.to_string());
        SearchError::JoinCycle {
            table: table.to_string(),
            chain,
        }
    }
}
