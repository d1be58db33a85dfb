//! Scalar search fields.

use std::sync::Arc;

use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

use crate::error::{Result, SearchError};
use crate::filter::MatchType;
use crate::registry::Sublist;
use crate::sql::{Condition, Expr, Operator, SqlValue, escape_like};

/// Storage and matching behavior of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Text,
    /// Text stored upper-case; search values are upper-cased before matching.
    UpperText,
    Integer,
    Decimal,
    Date,
    Timestamp,
    Boolean,
    /// Numeric identifier. Only exact matching is meaningful.
    Id,
    /// Integer codes presented as display names.
    Enum(Vec<EnumValue>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumValue {
    pub code: i64,
    pub display: String,
}

impl EnumValue {
    pub fn new(code: i64, display: impl Into<String>) -> Self {
        Self {
            code,
            display: display.into(),
        }
    }
}

/// Resolved target of an alias field.
#[derive(Debug, Clone, PartialEq)]
pub struct AliasTarget {
    /// Path of the target relative to the alias's namespace.
    pub path: String,
    /// Flattened sublists leading from the alias's namespace to the target.
    pub sublists: Vec<Arc<Sublist>>,
}

/// A scalar value that can be selected, sorted and filtered on.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub display_name: String,
    /// Logical name of the table the column lives in.
    pub table: String,
    pub column: String,
    pub kind: FieldKind,
    pub nullable: bool,
    pub exportable: bool,
    pub(crate) alias: Option<AliasTarget>,
    pub(crate) alias_path: Option<String>,
}

/// Fields are identified by name and table; two paths can reach the same field.
impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.table == other.table
    }
}

impl Field {
    pub fn new(name: impl Into<String>, column: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            table: String::new(),
            column: column.into(),
            kind,
            nullable: true,
            exportable: true,
            alias: None,
            alias_path: None,
        }
    }

    pub fn text(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self::new(name, column, FieldKind::Text)
    }

    pub fn upper_text(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self::new(name, column, FieldKind::UpperText)
    }

    pub fn integer(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self::new(name, column, FieldKind::Integer)
    }

    pub fn decimal(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self::new(name, column, FieldKind::Decimal)
    }

    pub fn date(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self::new(name, column, FieldKind::Date)
    }

    pub fn timestamp(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self::new(name, column, FieldKind::Timestamp)
    }

    pub fn boolean(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self::new(name, column, FieldKind::Boolean)
    }

    pub fn id(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self::new(name, column, FieldKind::Id).non_null()
    }

    pub fn enumeration(
        name: impl Into<String>,
        column: impl Into<String>,
        values: Vec<EnumValue>,
    ) -> Self {
        Self::new(name, column, FieldKind::Enum(values))
    }

    /// A field presenting another field, reached through flattened sublists,
    /// under a local name. The target is resolved when the registry is built.
    pub fn alias(name: impl Into<String>, target: impl Into<String>) -> Self {
        let mut field = Self::new(name, String::new(), FieldKind::Text);
        field.alias_path = Some(target.into());
        field
    }

    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    /// Place the column in a table other than the namespace's own.
    #[must_use]
    pub fn on_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    #[must_use]
    pub fn non_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn not_exportable(mut self) -> Self {
        self.exportable = false;
        self
    }

    pub fn is_alias(&self) -> bool {
        self.alias_path.is_some()
    }

    /// Flattened sublists that must be joined to reach an alias's column.
    pub fn alias_sublists(&self) -> &[Arc<Sublist>] {
        self.alias
            .as_ref()
            .map(|target| target.sublists.as_slice())
            .unwrap_or_default()
    }

    pub(crate) fn resolve_alias(&mut self, target: &Field, sublists: Vec<Arc<Sublist>>) {
        self.table = target.table.clone();
        self.column = target.column.clone();
        self.kind = target.kind.clone();
        self.nullable = target.nullable || !sublists.is_empty();
        self.alias = Some(AliasTarget {
            path: self.alias_path.clone().unwrap_or_default(),
            sublists,
        });
    }

    /// The column itself, as filtered on.
    pub fn column_expr(&self) -> Expr {
        Expr::column(&self.table, &self.column)
    }

    /// Expression for the selected value. Decimals come back as text so their
    /// scale and precision survive the trip through JSON.
    pub fn select_expr(&self) -> Expr {
        match self.kind {
            FieldKind::Decimal => Expr::AsText(Box::new(self.column_expr())),
            _ => self.column_expr(),
        }
    }

    /// Expression to sort by. Enum fields sort by display name rather than code;
    /// decimals sort numerically.
    pub fn order_by_expr(&self) -> Expr {
        match &self.kind {
            FieldKind::Enum(values) => Expr::Case {
                operand: Box::new(self.column_expr()),
                arms: values
                    .iter()
                    .map(|v| (SqlValue::Integer(v.code), SqlValue::Text(v.display.clone())))
                    .collect(),
            },
            _ => self.column_expr(),
        }
    }

    /// Display value of a raw column value, `None` for SQL NULL.
    pub fn compute_value(&self, raw: &Value) -> Option<String> {
        match (raw, &self.kind) {
            (Value::Null, _) => None,
            (Value::Number(n), FieldKind::Enum(values)) => {
                let display = n
                    .as_i64()
                    .and_then(|code| values.iter().find(|v| v.code == code))
                    .map(|v| v.display.clone());
                Some(display.unwrap_or_else(|| n.to_string()))
            }
            (Value::String(s), _) => Some(s.clone()),
            (Value::Number(n), _) => Some(n.to_string()),
            (Value::Bool(b), _) => Some(b.to_string()),
            (other, _) => Some(other.to_string()),
        }
    }

    /// The complete value set for fields that have one.
    pub fn possible_values(&self) -> Option<Vec<String>> {
        match &self.kind {
            FieldKind::Enum(values) => Some(values.iter().map(|v| v.display.clone()).collect()),
            FieldKind::Boolean => Some(vec!["false".to_string(), "true".to_string()]),
            _ => None,
        }
    }

    pub fn supported_match_types(&self) -> &'static [MatchType] {
        match self.kind {
            FieldKind::Text | FieldKind::UpperText => &[MatchType::Exact, MatchType::Fuzzy],
            FieldKind::Integer | FieldKind::Decimal | FieldKind::Date | FieldKind::Timestamp => {
                &[MatchType::Exact, MatchType::Range]
            }
            FieldKind::Boolean | FieldKind::Id | FieldKind::Enum(_) => &[MatchType::Exact],
        }
    }

    /// Condition matching any of `values`. A `None` value matches NULL. Fuzzy
    /// matching on a kind that has no fuzzy form falls back to exact matching.
    pub fn condition(&self, values: &[Option<String>], match_type: MatchType) -> Result<Condition> {
        match (match_type, &self.kind) {
            (
                MatchType::Range,
                FieldKind::Integer | FieldKind::Decimal | FieldKind::Date | FieldKind::Timestamp,
            ) => self.range_condition(values),
            (MatchType::Range, _) => Err(SearchError::UnsupportedMatchType {
                field: self.name.clone(),
                match_type: match_type.to_string(),
            }),
            (MatchType::Fuzzy, FieldKind::Text | FieldKind::UpperText) => {
                Ok(self.fuzzy_text_condition(values))
            }
            _ => self.exact_condition(values),
        }
    }

    fn exact_condition(&self, values: &[Option<String>]) -> Result<Condition> {
        let mut conditions = Vec::new();
        let typed = values
            .iter()
            .flatten()
            .map(|v| self.parse_value(v))
            .collect::<Result<Vec<_>>>()?;
        if !typed.is_empty() {
            conditions.push(Condition::in_list(self.column_expr(), typed));
        }
        if values.iter().any(Option::is_none) {
            conditions.push(Condition::IsNull(self.column_expr()));
        }
        Ok(Condition::or(conditions))
    }

    fn fuzzy_text_condition(&self, values: &[Option<String>]) -> Condition {
        let conditions = values
            .iter()
            .map(|value| match value {
                Some(v) => Condition::compare(
                    self.column_expr(),
                    Operator::ILike,
                    Expr::Param(SqlValue::Text(format!("%{}%", escape_like(v.trim())))),
                ),
                None => Condition::IsNull(self.column_expr()),
            })
            .collect();
        Condition::or(conditions)
    }

    fn range_condition(&self, values: &[Option<String>]) -> Result<Condition> {
        let (low, high) = match values {
            [low, high] => (low, high),
            _ => {
                return Err(self.invalid(
                    &format!("{values:?}"),
                    "range search requires exactly two values",
                ));
            }
        };
        let low = low.as_deref().map(|v| self.parse_value(v)).transpose()?;
        let high = high.as_deref().map(|v| self.parse_value(v)).transpose()?;
        let expr = self.column_expr();
        match (low, high) {
            (Some(low), Some(high)) => Ok(Condition::Between { expr, low, high }),
            (Some(low), None) => Ok(Condition::compare(expr, Operator::Ge, Expr::Param(low))),
            (None, Some(high)) => Ok(Condition::compare(expr, Operator::Le, Expr::Param(high))),
            (None, None) => Err(self.invalid("", "range search requires at least one bound")),
        }
    }

    /// Convert a search value to a typed bind parameter.
    pub fn parse_value(&self, value: &str) -> Result<SqlValue> {
        let trimmed = value.trim();
        match &self.kind {
            FieldKind::Text => Ok(SqlValue::Text(value.to_string())),
            FieldKind::UpperText => Ok(SqlValue::Text(value.to_uppercase())),
            FieldKind::Integer | FieldKind::Id => trimmed
                .parse::<i64>()
                .map(SqlValue::Integer)
                .map_err(|e| self.invalid(value, &e.to_string())),
            FieldKind::Decimal => match trimmed.parse::<f64>() {
                Ok(n) if n.is_finite() => Ok(SqlValue::Decimal(trimmed.to_string())),
                _ => Err(self.invalid(value, "not a decimal number")),
            },
            FieldKind::Date => Date::parse(trimmed, format_description!("[year]-[month]-[day]"))
                .map(|_| SqlValue::Date(trimmed.to_string()))
                .map_err(|e| self.invalid(value, &e.to_string())),
            FieldKind::Timestamp => OffsetDateTime::parse(trimmed, &Rfc3339)
                .map(|_| SqlValue::Timestamp(trimmed.to_string()))
                .map_err(|e| self.invalid(value, &e.to_string())),
            FieldKind::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "true" => Ok(SqlValue::Boolean(true)),
                "false" => Ok(SqlValue::Boolean(false)),
                _ => Err(self.invalid(value, "expected true or false")),
            },
            FieldKind::Enum(values) => values
                .iter()
                .find(|v| v.display == trimmed)
                .or_else(|| values.iter().find(|v| v.display.eq_ignore_ascii_case(trimmed)))
                .map(|v| SqlValue::Integer(v.code))
                .ok_or_else(|| self.invalid(value, "not one of the allowed values")),
        }
    }

    fn invalid(&self, value: &str, reason: &str) -> SearchError {
        SearchError::invalid_value(&self.name, value, reason)
    }
}
