//! Declarative registry definitions.
//!
//! A registry can be described in TOML instead of code:
//!
//! ```toml
//! [[tables]]
//! name = "accessions"
//! primary_key = ["id"]
//! parent = { table = "facilities", on = [{ left = "facility_id", right = "id" }] }
//! visibility = { rule = "inherit_from_parent" }
//!
//! [[namespaces]]
//! name = "accessions"
//! table = "accessions"
//! fields = [
//!     { name = "accessionNumber", column = "number", kind = "text" },
//!     { name = "bagNumber", kind = "alias", target = "bags_number" },
//! ]
//! sublists = [
//!     { name = "bags", namespace = "bags", on = [{ left = "id", right = "accession_id" }] },
//! ]
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::field::{EnumValue, Field, FieldKind};
use crate::registry::{
    Multiplicity, Namespace, RegistryError, SearchRegistry, SearchRegistryBuilder, Sublist,
};
use crate::sql::SqlValue;
use crate::table::{JoinOn, TableDescriptor, TableLink, VisibilityRule};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryDefinition {
    #[serde(default)]
    pub tables: Vec<TableDefinition>,
    #[serde(default)]
    pub namespaces: Vec<NamespaceDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableDefinition {
    pub name: String,
    pub sql_name: Option<String>,
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub default_order: Vec<String>,
    pub parent: Option<LinkDefinition>,
    #[serde(default)]
    pub visibility: VisibilityDefinition,
}

/// A join to another table: column pairs plus constant filters on the
/// joined table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkDefinition {
    pub table: String,
    pub on: Vec<ColumnPairDefinition>,
    #[serde(default)]
    pub filters: Vec<FilterDefinition>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnPairDefinition {
    pub left: String,
    pub right: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterDefinition {
    pub column: String,
    pub value: LiteralDefinition,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LiteralDefinition {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum VisibilityDefinition {
    #[default]
    Unrestricted,
    Column {
        column: String,
        scope: String,
    },
    InheritFromParent,
    Inherit {
        table: String,
        on: Vec<ColumnPairDefinition>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NamespaceDefinition {
    pub name: String,
    pub table: String,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub sublists: Vec<SublistDefinition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKindDefinition {
    Text,
    UpperText,
    Integer,
    Decimal,
    Date,
    Timestamp,
    Boolean,
    Id,
    Enum,
    Alias,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDefinition {
    pub name: String,
    pub kind: FieldKindDefinition,
    pub column: Option<String>,
    /// Table holding the column when it is not the namespace's table.
    pub table: Option<String>,
    pub display_name: Option<String>,
    pub nullable: Option<bool>,
    #[serde(default = "default_exportable")]
    pub exportable: bool,
    /// Enum values.
    #[serde(default)]
    pub values: Vec<EnumValueDefinition>,
    /// Alias target path.
    pub target: Option<String>,
}

fn default_exportable() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnumValueDefinition {
    pub code: i64,
    pub display: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SublistDefinition {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub multiplicity: MultiplicityDefinition,
    pub on: Vec<ColumnPairDefinition>,
    #[serde(default)]
    pub filters: Vec<FilterDefinition>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiplicityDefinition {
    #[default]
    OneToMany,
    OneToOne,
}

impl RegistryDefinition {
    pub fn from_toml_str(source: &str) -> Result<Self, RegistryError> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let definition = Self::from_toml_str(&source)?;
        tracing::debug!(
            path = %path.display(),
            tables = definition.tables.len(),
            namespaces = definition.namespaces.len(),
            "Loaded registry definition"
        );
        Ok(definition)
    }

    pub fn into_builder(self) -> Result<SearchRegistryBuilder, RegistryError> {
        let mut builder = SearchRegistry::builder();
        for table in self.tables {
            builder = builder.table(table.into_descriptor());
        }
        for namespace in self.namespaces {
            builder = builder.namespace(namespace.into_namespace()?);
        }
        Ok(builder)
    }

    pub fn build(self) -> Result<Arc<SearchRegistry>, RegistryError> {
        self.into_builder()?.build()
    }
}

impl LiteralDefinition {
    fn to_sql_value(&self) -> SqlValue {
        match self {
            Self::Boolean(b) => SqlValue::Boolean(*b),
            Self::Integer(i) => SqlValue::Integer(*i),
            Self::Float(f) => SqlValue::Float(*f),
            Self::Text(s) => SqlValue::Text(s.clone()),
        }
    }
}

fn join_on(pairs: &[ColumnPairDefinition], filters: &[FilterDefinition]) -> JoinOn {
    let on = pairs
        .iter()
        .fold(JoinOn::default(), |on, pair| on.and_columns(&pair.left, &pair.right));
    filters
        .iter()
        .fold(on, |on, filter| on.with_filter(&filter.column, filter.value.to_sql_value()))
}

impl TableDefinition {
    fn into_descriptor(self) -> TableDescriptor {
        let mut table = TableDescriptor::new(self.name, self.primary_key)
            .with_default_order(self.default_order)
            .with_visibility(match self.visibility {
                VisibilityDefinition::Unrestricted => VisibilityRule::Unrestricted,
                VisibilityDefinition::Column { column, scope } => {
                    VisibilityRule::Column { column, scope }
                }
                VisibilityDefinition::InheritFromParent => VisibilityRule::InheritFromParent,
                VisibilityDefinition::Inherit { table, on } => {
                    VisibilityRule::Inherit(TableLink::new(table, join_on(&on, &[])))
                }
            });
        if let Some(sql_name) = self.sql_name {
            table = table.with_sql_name(sql_name);
        }
        if let Some(parent) = self.parent {
            table = table.with_parent(parent.table, join_on(&parent.on, &parent.filters));
        }
        table
    }
}

impl NamespaceDefinition {
    fn into_namespace(self) -> Result<Namespace, RegistryError> {
        let mut namespace = Namespace::new(&self.name, self.table);
        for field in self.fields {
            namespace = namespace.with_field(field.into_field(&self.name)?);
        }
        for sublist in self.sublists {
            let multiplicity = match sublist.multiplicity {
                MultiplicityDefinition::OneToMany => Multiplicity::OneToMany,
                MultiplicityDefinition::OneToOne => Multiplicity::OneToOne,
            };
            namespace = namespace.with_sublist(Sublist::new(
                sublist.name,
                sublist.namespace,
                multiplicity,
                join_on(&sublist.on, &sublist.filters),
            ));
        }
        Ok(namespace)
    }
}

impl FieldDefinition {
    fn into_field(self, namespace: &str) -> Result<Field, RegistryError> {
        let invalid = |reason: &str| {
            RegistryError::InvalidDefinition(format!(
                "field '{}.{}' {reason}",
                namespace, self.name
            ))
        };

        let kind = match self.kind {
            FieldKindDefinition::Alias => {
                let target = self
                    .target
                    .clone()
                    .ok_or_else(|| invalid("is an alias without a target"))?;
                let field = Field::alias(self.name.clone(), target);
                return Ok(match &self.display_name {
                    Some(display_name) => field.with_display_name(display_name),
                    None => field,
                });
            }
            FieldKindDefinition::Text => FieldKind::Text,
            FieldKindDefinition::UpperText => FieldKind::UpperText,
            FieldKindDefinition::Integer => FieldKind::Integer,
            FieldKindDefinition::Decimal => FieldKind::Decimal,
            FieldKindDefinition::Date => FieldKind::Date,
            FieldKindDefinition::Timestamp => FieldKind::Timestamp,
            FieldKindDefinition::Boolean => FieldKind::Boolean,
            FieldKindDefinition::Id => FieldKind::Id,
            FieldKindDefinition::Enum => {
                if self.values.is_empty() {
                    return Err(invalid("is an enum without values"));
                }
                FieldKind::Enum(
                    self.values
                        .iter()
                        .map(|v| EnumValue::new(v.code, &v.display))
                        .collect(),
                )
            }
        };

        let column = self.column.clone().ok_or_else(|| invalid("has no column"))?;
        let mut field = Field::new(self.name.clone(), column, kind);
        field.nullable = self.nullable.unwrap_or(self.kind != FieldKindDefinition::Id);
        field.exportable = self.exportable;
        if let Some(display_name) = self.display_name {
            field = field.with_display_name(display_name);
        }
        if let Some(table) = self.table {
            field = field.on_table(table);
        }
        Ok(field)
    }
}
