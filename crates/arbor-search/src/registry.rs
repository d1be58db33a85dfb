//! Search registry: namespaces, their fields and the sublists between them.
//!
//! A namespace is one node of the searchable tree. It is backed by a table and
//! exposes scalar [`Field`]s plus named [`Sublist`] edges to other namespaces.
//! The registry is built once through [`SearchRegistryBuilder`], validated, and
//! then shared read-only behind an `Arc`.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use thiserror::Error;

use crate::field::Field;
use crate::path::{FieldPrefix, resolve_in};
use crate::sql::{Condition, SqlBuilderError, validate_identifier};
use crate::table::{JoinOn, TableDescriptor};

/// Separates a nested sublist from the rest of a field path.
pub const NESTED_SUBLIST_DELIMITER: char = '.';

/// Separates a flattened sublist from the rest of a field path.
pub const FLATTENED_SUBLIST_DELIMITER: char = '_';

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Duplicate table '{0}'")]
    DuplicateTable(String),

    #[error("Duplicate namespace '{0}'")]
    DuplicateNamespace(String),

    #[error("Duplicate name '{name}' in namespace '{namespace}'")]
    DuplicateName { namespace: String, name: String },

    #[error("Invalid name '{0}': names must be non-empty and may not contain '.' or '_'")]
    InvalidName(String),

    #[error("Unknown table '{table}' referenced by '{referenced_by}'")]
    UnknownTable { table: String, referenced_by: String },

    #[error("Unknown namespace '{namespace}' referenced by '{referenced_by}'")]
    UnknownNamespace {
        namespace: String,
        referenced_by: String,
    },

    #[error("Table '{table}' has no primary key")]
    MissingPrimaryKey { table: String },

    #[error("Cycle through table '{table}' in chain {chain:?}")]
    Cycle { table: String, chain: Vec<String> },

    #[error("Invalid alias '{field}': {reason}")]
    InvalidAlias { field: String, reason: String },

    #[error("Invalid registry definition: {0}")]
    InvalidDefinition(String),

    #[error(transparent)]
    Sql(#[from] SqlBuilderError),

    #[error("Failed to parse registry definition: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to read registry definition: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Multiplicity {
    #[default]
    OneToMany,
    OneToOne,
}

/// Named edge from one namespace to another.
#[derive(Debug, Clone, PartialEq)]
pub struct Sublist {
    pub name: String,
    /// Namespace the sublist belongs to.
    pub owner: String,
    /// Namespace the sublist leads to.
    pub namespace: String,
    pub multiplicity: Multiplicity,
    /// Correlation between the owner's table (left) and the target's table (right).
    pub on: JoinOn,
    pub flattened: bool,
    pub(crate) parent_table: String,
    pub(crate) child_table: String,
}

impl Sublist {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        multiplicity: Multiplicity,
        on: JoinOn,
    ) -> Self {
        Self {
            name: name.into(),
            owner: String::new(),
            namespace: namespace.into(),
            multiplicity,
            on,
            flattened: false,
            parent_table: String::new(),
            child_table: String::new(),
        }
    }

    pub fn one_to_many(name: impl Into<String>, namespace: impl Into<String>, on: JoinOn) -> Self {
        Self::new(name, namespace, Multiplicity::OneToMany, on)
    }

    pub fn one_to_one(name: impl Into<String>, namespace: impl Into<String>, on: JoinOn) -> Self {
        Self::new(name, namespace, Multiplicity::OneToOne, on)
    }

    pub fn is_multi_value(&self) -> bool {
        self.multiplicity == Multiplicity::OneToMany
    }

    pub fn delimiter(&self) -> char {
        if self.flattened {
            FLATTENED_SUBLIST_DELIMITER
        } else {
            NESTED_SUBLIST_DELIMITER
        }
    }

    /// The same edge presented with its fields merged into the parent.
    pub fn as_flattened(&self) -> Sublist {
        Sublist {
            flattened: true,
            ..self.clone()
        }
    }

    pub fn parent_table(&self) -> &str {
        &self.parent_table
    }

    pub fn child_table(&self) -> &str {
        &self.child_table
    }

    /// Predicate matching child rows to the current parent row.
    pub fn correlation(&self) -> Condition {
        self.on.to_condition(&self.parent_table, &self.child_table)
    }
}

#[derive(Debug, Clone)]
pub struct Namespace {
    pub name: String,
    pub table: String,
    fields: IndexMap<String, Arc<Field>>,
    sublists: IndexMap<String, Arc<Sublist>>,
    pending_fields: Vec<Field>,
    pending_sublists: Vec<Sublist>,
}

impl Namespace {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            fields: IndexMap::new(),
            sublists: IndexMap::new(),
            pending_fields: Vec::new(),
            pending_sublists: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_field(mut self, field: Field) -> Self {
        self.pending_fields.push(field);
        self
    }

    #[must_use]
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = Field>) -> Self {
        self.pending_fields.extend(fields);
        self
    }

    #[must_use]
    pub fn with_sublist(mut self, sublist: Sublist) -> Self {
        self.pending_sublists.push(sublist);
        self
    }

    pub fn field(&self, name: &str) -> Option<&Arc<Field>> {
        self.fields.get(name)
    }

    pub fn sublist(&self, name: &str) -> Option<&Arc<Sublist>> {
        self.sublists.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = &Arc<Field>> {
        self.fields.values()
    }

    pub fn sublists(&self) -> impl Iterator<Item = &Arc<Sublist>> {
        self.sublists.values()
    }
}

/// Immutable catalog of tables and namespaces.
#[derive(Debug, Default)]
pub struct SearchRegistry {
    tables: IndexMap<String, TableDescriptor>,
    namespaces: IndexMap<String, Namespace>,
}

impl SearchRegistry {
    pub fn builder() -> SearchRegistryBuilder {
        SearchRegistryBuilder::default()
    }

    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.get(name)
    }

    pub fn namespace(&self, name: &str) -> Option<&Namespace> {
        self.namespaces.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDescriptor> {
        self.tables.values()
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &Namespace> {
        self.namespaces.values()
    }

    /// Prefix addressing the top of `namespace`.
    pub fn root_prefix(
        self: &Arc<Self>,
        namespace: &str,
    ) -> Result<FieldPrefix, crate::error::SearchError> {
        FieldPrefix::root(Arc::clone(self), namespace)
    }
}

#[derive(Debug, Default)]
pub struct SearchRegistryBuilder {
    tables: Vec<TableDescriptor>,
    namespaces: Vec<Namespace>,
}

impl SearchRegistryBuilder {
    #[must_use]
    pub fn table(mut self, table: TableDescriptor) -> Self {
        self.tables.push(table);
        self
    }

    #[must_use]
    pub fn namespace(mut self, namespace: Namespace) -> Self {
        self.namespaces.push(namespace);
        self
    }

    /// Validate everything and produce the shared registry.
    pub fn build(self) -> Result<Arc<SearchRegistry>, RegistryError> {
        let mut registry = SearchRegistry::default();

        for table in self.tables {
            validate_table(&table)?;
            if registry.tables.contains_key(&table.name) {
                return Err(RegistryError::DuplicateTable(table.name));
            }
            registry.tables.insert(table.name.clone(), table);
        }
        for table in registry.tables.values() {
            check_table_links(&registry, table)?;
        }

        let table_of: IndexMap<String, String> = self
            .namespaces
            .iter()
            .map(|ns| (ns.name.clone(), ns.table.clone()))
            .collect();

        for mut namespace in self.namespaces {
            if registry.namespaces.contains_key(&namespace.name) {
                return Err(RegistryError::DuplicateNamespace(namespace.name));
            }
            if !registry.tables.contains_key(&namespace.table) {
                return Err(RegistryError::UnknownTable {
                    table: namespace.table.clone(),
                    referenced_by: namespace.name.clone(),
                });
            }

            for mut field in std::mem::take(&mut namespace.pending_fields) {
                validate_name(&field.name)?;
                if field.table.is_empty() {
                    field.table = namespace.table.clone();
                }
                if !field.is_alias() {
                    if !registry.tables.contains_key(&field.table) {
                        return Err(RegistryError::UnknownTable {
                            table: field.table.clone(),
                            referenced_by: format!("{}.{}", namespace.name, field.name),
                        });
                    }
                    validate_identifier(&field.column)?;
                }
                if namespace.fields.contains_key(&field.name) {
                    return Err(duplicate(&namespace.name, &field.name));
                }
                namespace.fields.insert(field.name.clone(), Arc::new(field));
            }

            for mut sublist in std::mem::take(&mut namespace.pending_sublists) {
                validate_name(&sublist.name)?;
                let Some(child_table) = table_of.get(&sublist.namespace) else {
                    return Err(RegistryError::UnknownNamespace {
                        namespace: sublist.namespace.clone(),
                        referenced_by: format!("{}.{}", namespace.name, sublist.name),
                    });
                };
                if namespace.fields.contains_key(&sublist.name)
                    || namespace.sublists.contains_key(&sublist.name)
                {
                    return Err(duplicate(&namespace.name, &sublist.name));
                }
                sublist.owner = namespace.name.clone();
                sublist.parent_table = namespace.table.clone();
                sublist.child_table = child_table.clone();
                sublist.flattened = false;
                namespace
                    .sublists
                    .insert(sublist.name.clone(), Arc::new(sublist));
            }

            registry
                .namespaces
                .insert(namespace.name.clone(), namespace);
        }

        resolve_aliases(&mut registry)?;

        tracing::debug!(
            tables = registry.tables.len(),
            namespaces = registry.namespaces.len(),
            "Built search registry"
        );

        Ok(Arc::new(registry))
    }
}

fn duplicate(namespace: &str, name: &str) -> RegistryError {
    RegistryError::DuplicateName {
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

fn validate_name(name: &str) -> Result<(), RegistryError> {
    if name.is_empty()
        || name.contains(NESTED_SUBLIST_DELIMITER)
        || name.contains(FLATTENED_SUBLIST_DELIMITER)
    {
        return Err(RegistryError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn validate_table(table: &TableDescriptor) -> Result<(), RegistryError> {
    validate_identifier(&table.name)?;
    validate_identifier(&table.sql_name)?;
    if table.primary_key.is_empty() {
        return Err(RegistryError::MissingPrimaryKey {
            table: table.name.clone(),
        });
    }
    for column in table.primary_key.iter().chain(&table.default_order) {
        validate_identifier(column)?;
    }
    Ok(())
}

/// Links must point at known tables, and neither the parent chain nor the
/// visibility chain may loop back on itself.
fn check_table_links(
    registry: &SearchRegistry,
    table: &TableDescriptor,
) -> Result<(), RegistryError> {
    for link in table.parent.iter().chain(table.visibility_link()) {
        if !registry.tables.contains_key(&link.table) {
            return Err(RegistryError::UnknownTable {
                table: link.table.clone(),
                referenced_by: table.name.clone(),
            });
        }
    }

    let walks: [fn(&TableDescriptor) -> Option<String>; 2] = [
        |t| t.parent.as_ref().map(|l| l.table.clone()),
        |t| t.visibility_link().map(|l| l.table.clone()),
    ];
    for next in walks {
        let mut chain = vec![table.name.clone()];
        let mut seen: HashSet<String> = HashSet::from([table.name.clone()]);
        let mut current = table;
        while let Some(name) = next(current) {
            chain.push(name.clone());
            if !seen.insert(name.clone()) {
                return Err(RegistryError::Cycle { table: name, chain });
            }
            match registry.tables.get(&name) {
                Some(t) => current = t,
                None => break,
            }
        }
    }
    Ok(())
}

/// Point every alias at its target's column and record the flattened joins
/// needed to reach it.
fn resolve_aliases(registry: &mut SearchRegistry) -> Result<(), RegistryError> {
    let mut resolved = Vec::new();
    for namespace in registry.namespaces.values() {
        for field in namespace.fields.values().filter(|f| f.is_alias()) {
            let target_path = field.alias_path.clone().unwrap_or_default();
            let invalid = |reason: String| RegistryError::InvalidAlias {
                field: format!("{}.{}", namespace.name, field.name),
                reason,
            };
            let (sublists, target) =
                resolve_in(registry, &namespace.name, &[], &target_path, &target_path)
                    .map_err(|e| invalid(e.to_string()))?;
            if target.is_alias() {
                return Err(invalid("aliases cannot target other aliases".to_string()));
            }
            if sublists.iter().any(|s| !s.flattened) {
                return Err(invalid(format!(
                    "'{target_path}' must only use flattened sublists"
                )));
            }
            let mut field = Field::clone(field);
            field.resolve_alias(&target, sublists);
            resolved.push((namespace.name.clone(), field));
        }
    }

    for (namespace, field) in resolved {
        if let Some(ns) = registry.namespaces.get_mut(&namespace) {
            ns.fields.insert(field.name.clone(), Arc::new(field));
        }
    }
    Ok(())
}
