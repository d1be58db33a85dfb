//! SQL primitives used by the query compiler.
//!
//! Everything the compiler emits goes through the types in this module:
//!
//! - **Identifiers** are validated and double-quoted, never interpolated raw
//! - **User values** become numbered bind parameters (`$1`, `$2`, ...) collected
//!   by a [`SqlBuilder`]
//! - **Registry constants** (enum display names, correlation filters) are rendered
//!   as escaped literals so that a rendered fragment does not depend on parameter
//!   numbering

use std::fmt;
use thiserror::Error;

/// Errors that can occur while rendering SQL.
#[derive(Debug, Error)]
pub enum SqlBuilderError {
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Query too complex: {0}")]
    QueryTooComplex(String),
}

/// Validate an identifier (table name, column name, alias).
///
/// Only allows alphanumeric characters and underscores.
pub fn validate_identifier(name: &str) -> Result<(), SqlBuilderError> {
    if name.is_empty() {
        return Err(SqlBuilderError::InvalidIdentifier(
            "Empty identifier".to_string(),
        ));
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(SqlBuilderError::InvalidIdentifier(name.to_string()));
    }

    Ok(())
}

/// Escape a PostgreSQL identifier (table name, column name).
pub fn escape_identifier(name: &str) -> Result<String, SqlBuilderError> {
    validate_identifier(name)?;
    Ok(format!("\"{name}\""))
}

/// Quote a string literal, doubling embedded single quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Escape `%`, `_` and `\` so a value can be embedded in a LIKE pattern.
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

// ============================================================================
// Values and expressions
// ============================================================================

/// SQL value types for parameterized queries.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    /// Arbitrary-precision number kept in its textual form.
    Decimal(String),
    /// ISO-8601 calendar date (`YYYY-MM-DD`).
    Date(String),
    /// RFC 3339 timestamp.
    Timestamp(String),
    Null,
}

impl SqlValue {
    /// Type cast appended to a placeholder so text-bound values compare
    /// against typed columns.
    pub fn cast(&self) -> &'static str {
        match self {
            Self::Decimal(_) => "::numeric",
            Self::Date(_) => "::date",
            Self::Timestamp(_) => "::timestamptz",
            _ => "",
        }
    }

    /// Render the value inline. Only used for trusted registry constants.
    pub fn to_literal(&self) -> String {
        match self {
            Self::Text(s) => quote_literal(s),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Boolean(true) => "TRUE".to_string(),
            Self::Boolean(false) => "FALSE".to_string(),
            Self::Decimal(s) | Self::Date(s) | Self::Timestamp(s) => {
                format!("{}{}", quote_literal(s), self.cast())
            }
            Self::Null => "NULL".to_string(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// A column qualified by the alias of the table it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn to_sql(&self) -> Result<String, SqlBuilderError> {
        Ok(format!(
            "{}.{}",
            escape_identifier(&self.table)?,
            escape_identifier(&self.column)?
        ))
    }
}

/// A scalar SQL expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(ColumnRef),
    /// A bind parameter.
    Param(SqlValue),
    /// An inline literal.
    Literal(SqlValue),
    Upper(Box<Expr>),
    /// `CAST(expr AS TEXT)`, keeping the value's exact textual form.
    AsText(Box<Expr>),
    /// `CASE operand WHEN k THEN v ... END`, arms rendered as literals.
    Case {
        operand: Box<Expr>,
        arms: Vec<(SqlValue, SqlValue)>,
    },
    /// A fragment that has already been rendered.
    Raw(String),
}

impl Expr {
    pub fn column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::Column(ColumnRef::new(table, column))
    }

    pub fn to_sql(&self, builder: &mut SqlBuilder) -> Result<String, SqlBuilderError> {
        match self {
            Self::Column(column) => column.to_sql(),
            Self::Param(value) => Ok(builder.add_param(value.clone())),
            Self::Literal(value) => Ok(value.to_literal()),
            Self::Upper(inner) => Ok(format!("UPPER({})", inner.to_sql(builder)?)),
            Self::AsText(inner) => Ok(format!("CAST({} AS TEXT)", inner.to_sql(builder)?)),
            Self::Case { operand, arms } => {
                let mut sql = format!("CASE {}", operand.to_sql(builder)?);
                for (when, then) in arms {
                    sql.push_str(&format!(
                        " WHEN {} THEN {}",
                        when.to_literal(),
                        then.to_literal()
                    ));
                }
                sql.push_str(" END");
                Ok(sql)
            }
            Self::Raw(sql) => Ok(sql.clone()),
        }
    }
}

// ============================================================================
// Conditions
// ============================================================================

/// Comparison operators for conditions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operator {
    /// Equal (=)
    Eq,
    /// Not equal (!=)
    Ne,
    /// Greater than (>)
    Gt,
    /// Less than (<)
    Lt,
    /// Greater than or equal (>=)
    Ge,
    /// Less than or equal (<=)
    Le,
    /// LIKE pattern match
    Like,
    /// Case-insensitive LIKE
    ILike,
}

impl Operator {
    /// Get the SQL operator string.
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Like => "LIKE",
            Self::ILike => "ILIKE",
        }
    }
}

/// A boolean condition that can be combined with other conditions.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Simple comparison: left op right
    Compare {
        left: Expr,
        op: Operator,
        right: Expr,
    },

    /// `expr IN (values)`, each value bound as a parameter
    InList { expr: Expr, values: Vec<SqlValue> },

    /// `expr BETWEEN low AND high`
    Between {
        expr: Expr,
        low: SqlValue,
        high: SqlValue,
    },

    /// `expr IS NULL`
    IsNull(Expr),

    /// `(exprs) IN (subquery)` where the subquery is already rendered against
    /// the same [`SqlBuilder`]
    InSubquery { exprs: Vec<Expr>, subquery: String },

    /// Combine conditions with OR
    Or(Vec<Condition>),

    /// Combine conditions with AND
    And(Vec<Condition>),

    /// Negation of a condition
    Not(Box<Condition>),

    /// Always true (used for empty AND lists)
    True,

    /// Always false (used for empty OR lists)
    False,
}

impl Condition {
    pub fn compare(left: Expr, op: Operator, right: Expr) -> Self {
        Self::Compare { left, op, right }
    }

    /// `left = right` between two columns.
    pub fn columns_equal(left: ColumnRef, right: ColumnRef) -> Self {
        Self::compare(Expr::Column(left), Operator::Eq, Expr::Column(right))
    }

    pub fn in_list(expr: Expr, values: Vec<SqlValue>) -> Self {
        Self::InList { expr, values }
    }

    /// Create an OR condition.
    pub fn or(mut conditions: Vec<Condition>) -> Self {
        match conditions.len() {
            0 => Self::False,
            1 => conditions.remove(0),
            _ => Self::Or(conditions),
        }
    }

    /// Create an AND condition.
    pub fn and(mut conditions: Vec<Condition>) -> Self {
        match conditions.len() {
            0 => Self::True,
            1 => conditions.remove(0),
            _ => Self::And(conditions),
        }
    }

    /// Create a NOT condition.
    pub fn negate(condition: Condition) -> Self {
        Self::Not(Box::new(condition))
    }

    pub fn to_sql(&self, builder: &mut SqlBuilder) -> Result<String, SqlBuilderError> {
        match self {
            Self::Compare { left, op, right } => {
                let left = left.to_sql(builder)?;
                let right = right.to_sql(builder)?;
                Ok(format!("({left} {} {right})", op.as_sql()))
            }

            Self::InList { expr, values } => {
                if values.is_empty() {
                    return Ok("FALSE".to_string());
                }
                let expr = expr.to_sql(builder)?;
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|v| builder.add_param(v.clone()))
                    .collect();
                Ok(format!("({expr} IN ({}))", placeholders.join(", ")))
            }

            Self::Between { expr, low, high } => {
                let expr = expr.to_sql(builder)?;
                let low = builder.add_param(low.clone());
                let high = builder.add_param(high.clone());
                Ok(format!("({expr} BETWEEN {low} AND {high})"))
            }

            Self::IsNull(expr) => Ok(format!("({} IS NULL)", expr.to_sql(builder)?)),

            Self::InSubquery { exprs, subquery } => {
                let exprs: Vec<String> = exprs
                    .iter()
                    .map(|e| e.to_sql(builder))
                    .collect::<Result<Vec<_>, _>>()?;
                let lhs = if exprs.len() == 1 {
                    exprs[0].clone()
                } else {
                    format!("({})", exprs.join(", "))
                };
                Ok(format!("({lhs} IN ({subquery}))"))
            }

            Self::Or(conditions) => {
                if conditions.is_empty() {
                    return Ok("FALSE".to_string());
                }
                let parts: Vec<String> = conditions
                    .iter()
                    .map(|c| c.to_sql(builder))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!("({})", parts.join(" OR ")))
            }

            Self::And(conditions) => {
                if conditions.is_empty() {
                    return Ok("TRUE".to_string());
                }
                let parts: Vec<String> = conditions
                    .iter()
                    .map(|c| c.to_sql(builder))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!("({})", parts.join(" AND ")))
            }

            Self::Not(condition) => Ok(format!("(NOT {})", condition.to_sql(builder)?)),

            Self::True => Ok("TRUE".to_string()),
            Self::False => Ok("FALSE".to_string()),
        }
    }
}

// ============================================================================
// Sort and Pagination
// ============================================================================

/// Sort order for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Pagination settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Pagination {
    pub fn new(limit: usize, offset: usize) -> Self {
        Self {
            limit: Some(limit),
            offset,
        }
    }

    pub fn to_sql(&self) -> String {
        let mut clause = String::new();
        if let Some(limit) = self.limit {
            clause.push_str(&format!(" LIMIT {limit}"));
        }
        if self.offset > 0 {
            clause.push_str(&format!(" OFFSET {}", self.offset));
        }
        clause
    }
}

// ============================================================================
// Built queries
// ============================================================================

/// A built SQL query with parameters.
#[derive(Debug, Clone)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
    /// Number of columns in each result row.
    pub column_count: usize,
    pub pagination: Pagination,
}

impl fmt::Display for BuiltQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql)
    }
}

/// Parameter sink shared by every fragment of one query.
///
/// Placeholders are numbered in the order parameters are added. PostgreSQL
/// binds by number, so fragments may be rendered in any order as long as they
/// all share one builder.
#[derive(Debug, Default)]
pub struct SqlBuilder {
    params: Vec<SqlValue>,
}

impl SqlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter and return its placeholder, including any type cast.
    pub fn add_param(&mut self, value: SqlValue) -> String {
        let cast = value.cast();
        self.params.push(value);
        format!("${}{cast}", self.params.len())
    }

    /// Get the current parameter count.
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// Get all parameters.
    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    pub fn into_params(self) -> Vec<SqlValue> {
        self.params
    }
}
