//! Table descriptors.
//!
//! A [`TableDescriptor`] names a physical table, its primary key, its default
//! ordering and how row visibility is decided for it. Tables are always
//! referenced in queries through their logical name, which doubles as the SQL
//! alias.

use crate::sql::{
    ColumnRef, Condition, Expr, SqlBuilder, SqlBuilderError, SqlValue, escape_identifier,
};

/// Equality between a column of the left table and a column of the right table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnPair {
    pub left: String,
    pub right: String,
}

/// Constant restriction on a column of the right table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnFilter {
    pub column: String,
    pub value: SqlValue,
}

/// Join predicate between two tables.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JoinOn {
    pub pairs: Vec<ColumnPair>,
    pub filters: Vec<ColumnFilter>,
}

impl JoinOn {
    /// `left.left_column = right.right_column`
    pub fn columns(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self::default().and_columns(left, right)
    }

    #[must_use]
    pub fn and_columns(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        self.pairs.push(ColumnPair {
            left: left.into(),
            right: right.into(),
        });
        self
    }

    #[must_use]
    pub fn with_filter(mut self, column: impl Into<String>, value: SqlValue) -> Self {
        self.filters.push(ColumnFilter {
            column: column.into(),
            value,
        });
        self
    }

    pub fn to_condition(&self, left_alias: &str, right_alias: &str) -> Condition {
        let mut conditions: Vec<Condition> = self
            .pairs
            .iter()
            .map(|pair| {
                Condition::columns_equal(
                    ColumnRef::new(left_alias, &pair.left),
                    ColumnRef::new(right_alias, &pair.right),
                )
            })
            .collect();
        conditions.extend(self.filters.iter().map(|filter| {
            Condition::compare(
                Expr::column(right_alias, &filter.column),
                crate::sql::Operator::Eq,
                Expr::Literal(filter.value.clone()),
            )
        }));
        Condition::and(conditions)
    }
}

/// A pointer from one table to another along with the predicate joining them.
/// The left side of `on` is the owning table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableLink {
    pub table: String,
    pub on: JoinOn,
}

impl TableLink {
    pub fn new(table: impl Into<String>, on: JoinOn) -> Self {
        Self {
            table: table.into(),
            on,
        }
    }
}

/// How a table decides which rows the current principal may see.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum VisibilityRule {
    /// Every row is visible.
    #[default]
    Unrestricted,
    /// `column IN (ids)` where the ids come from the visibility context.
    Column { column: String, scope: String },
    /// Visibility is decided by the parent table.
    InheritFromParent,
    /// Visibility is decided by another table reached through the link.
    Inherit(TableLink),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Inner => "JOIN",
            Self::Left => "LEFT JOIN",
        }
    }
}

/// A join of one table into a query.
#[derive(Debug, Clone, PartialEq)]
pub struct TableJoin {
    pub kind: JoinKind,
    pub sql_name: String,
    pub alias: String,
    pub on: Condition,
}

impl TableJoin {
    pub fn to_sql(&self, builder: &mut SqlBuilder) -> Result<String, SqlBuilderError> {
        Ok(format!(
            " {} {} AS {} ON {}",
            self.kind.as_sql(),
            escape_identifier(&self.sql_name)?,
            escape_identifier(&self.alias)?,
            self.on.to_sql(builder)?
        ))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDescriptor {
    /// Logical name, also used as the alias in generated SQL.
    pub name: String,
    /// Physical table name.
    pub sql_name: String,
    pub primary_key: Vec<String>,
    pub parent: Option<TableLink>,
    pub visibility: VisibilityRule,
    /// Tie-break ordering; the primary key when empty.
    pub default_order: Vec<String>,
}

impl TableDescriptor {
    pub fn new<I, S>(name: impl Into<String>, primary_key: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        Self {
            sql_name: name.clone(),
            name,
            primary_key: primary_key.into_iter().map(Into::into).collect(),
            parent: None,
            visibility: VisibilityRule::Unrestricted,
            default_order: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_sql_name(mut self, sql_name: impl Into<String>) -> Self {
        self.sql_name = sql_name.into();
        self
    }

    #[must_use]
    pub fn with_parent(mut self, table: impl Into<String>, on: JoinOn) -> Self {
        self.parent = Some(TableLink::new(table, on));
        self
    }

    #[must_use]
    pub fn with_visibility(mut self, visibility: VisibilityRule) -> Self {
        self.visibility = visibility;
        self
    }

    /// Shorthand for [`VisibilityRule::Column`].
    #[must_use]
    pub fn visible_by(self, column: impl Into<String>, scope: impl Into<String>) -> Self {
        self.with_visibility(VisibilityRule::Column {
            column: column.into(),
            scope: scope.into(),
        })
    }

    #[must_use]
    pub fn with_default_order<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_order = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn primary_key_exprs(&self) -> Vec<Expr> {
        self.primary_key
            .iter()
            .map(|column| Expr::column(&self.name, column))
            .collect()
    }

    pub fn default_order_exprs(&self) -> Vec<Expr> {
        let columns = if self.default_order.is_empty() {
            &self.primary_key
        } else {
            &self.default_order
        };
        columns
            .iter()
            .map(|column| Expr::column(&self.name, column))
            .collect()
    }

    /// `"sql_name" AS "name"`
    pub fn from_sql(&self) -> Result<String, SqlBuilderError> {
        Ok(format!(
            "{} AS {}",
            escape_identifier(&self.sql_name)?,
            escape_identifier(&self.name)?
        ))
    }

    /// The link visibility is inherited through, if any.
    pub fn visibility_link(&self) -> Option<&TableLink> {
        match &self.visibility {
            VisibilityRule::Inherit(link) => Some(link),
            VisibilityRule::InheritFromParent => self.parent.as_ref(),
            _ => None,
        }
    }

    /// Join `target` into a query where this table is already present.
    pub fn join(&self, target: &TableDescriptor, on: &JoinOn, kind: JoinKind) -> TableJoin {
        TableJoin {
            kind,
            sql_name: target.sql_name.clone(),
            alias: target.name.clone(),
            on: on.to_condition(&self.name, &target.name),
        }
    }
}
