//! Field prefixes and paths.
//!
//! A [`FieldPrefix`] is a position in the searchable tree: a root namespace and
//! the sublists walked from it. A [`FieldPath`] adds the scalar field found
//! there. Both render back to the string syntax they are parsed from, so
//! `prefix.resolve(&path.to_string())` always yields `path` again.

use std::fmt;
use std::sync::Arc;

use crate::error::{Result, SearchError};
use crate::field::Field;
use crate::registry::{
    FLATTENED_SUBLIST_DELIMITER, NESTED_SUBLIST_DELIMITER, Namespace, SearchRegistry, Sublist,
};
use crate::table::TableDescriptor;

#[derive(Clone)]
pub struct FieldPrefix {
    registry: Arc<SearchRegistry>,
    root: String,
    sublists: Vec<Arc<Sublist>>,
}

impl FieldPrefix {
    pub fn root(registry: Arc<SearchRegistry>, namespace: &str) -> Result<Self> {
        if registry.namespace(namespace).is_none() {
            return Err(SearchError::unknown_field(namespace, namespace));
        }
        Ok(Self {
            registry,
            root: namespace.to_string(),
            sublists: Vec::new(),
        })
    }

    pub fn registry(&self) -> &Arc<SearchRegistry> {
        &self.registry
    }

    pub fn root_namespace(&self) -> &str {
        &self.root
    }

    pub fn sublists(&self) -> &[Arc<Sublist>] {
        &self.sublists
    }

    /// Name of the namespace this prefix points at.
    pub fn namespace_name(&self) -> &str {
        self.sublists
            .last()
            .map(|s| s.namespace.as_str())
            .unwrap_or(&self.root)
    }

    pub fn namespace(&self) -> Result<&Namespace> {
        let name = self.namespace_name();
        self.registry
            .namespace(name)
            .ok_or_else(|| SearchError::internal(format!("namespace '{name}' is not registered")))
    }

    pub fn table(&self) -> Result<&TableDescriptor> {
        let name = &self.namespace()?.table;
        self.registry
            .table(name)
            .ok_or_else(|| SearchError::internal(format!("table '{name}' is not registered")))
    }

    pub fn is_root(&self) -> bool {
        self.sublists.is_empty()
    }

    /// Whether any sublist on the prefix produces a level of nesting.
    pub fn is_nested(&self) -> bool {
        self.sublists.iter().any(|s| !s.flattened)
    }

    pub fn is_flattened(&self) -> bool {
        self.sublists.last().is_some_and(|s| s.flattened)
    }

    pub fn is_multi_value(&self) -> bool {
        self.sublists.last().is_some_and(|s| s.is_multi_value())
    }

    pub fn with_sublist(&self, name: &str, flattened: bool) -> Result<FieldPrefix> {
        let namespace = self.namespace()?;
        let sublist = next_sublist(namespace, &self.sublists, name, flattened, name)?;
        let mut sublists = self.sublists.clone();
        sublists.push(sublist);
        Ok(Self {
            registry: Arc::clone(&self.registry),
            root: self.root.clone(),
            sublists,
        })
    }

    /// Resolve a field name relative to this prefix.
    pub fn resolve(&self, name: &str) -> Result<FieldPath> {
        let (sublists, field) = resolve_in(
            &self.registry,
            self.namespace_name(),
            &self.sublists,
            name,
            name,
        )?;
        Ok(FieldPath {
            prefix: Self {
                registry: Arc::clone(&self.registry),
                root: self.root.clone(),
                sublists,
            },
            field,
        })
    }

    /// The first `depth` sublists of this prefix.
    pub(crate) fn truncated(&self, depth: usize) -> FieldPrefix {
        Self {
            registry: Arc::clone(&self.registry),
            root: self.root.clone(),
            sublists: self.sublists[..depth.min(self.sublists.len())].to_vec(),
        }
    }

    /// Re-root this prefix at `other`, which must be a literal prefix of it.
    pub fn relative_to(&self, other: &FieldPrefix) -> Result<FieldPrefix> {
        let is_prefix = self.root == other.root
            && other.sublists.len() <= self.sublists.len()
            && self.sublists.iter().zip(&other.sublists).all(|(a, b)| a == b);
        if !is_prefix {
            return Err(SearchError::NotAPrefix {
                prefix: other.describe(),
                path: self.describe(),
            });
        }
        Ok(Self {
            registry: Arc::clone(&self.registry),
            root: other.namespace_name().to_string(),
            sublists: self.sublists[other.sublists.len()..].to_vec(),
        })
    }

    /// The same prefix with every sublist flattened.
    pub fn as_flattened(&self) -> FieldPrefix {
        Self {
            registry: Arc::clone(&self.registry),
            root: self.root.clone(),
            sublists: self
                .sublists
                .iter()
                .map(|s| {
                    if s.flattened {
                        Arc::clone(s)
                    } else {
                        Arc::new(s.as_flattened())
                    }
                })
                .collect(),
        }
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.root, self)
    }
}

impl PartialEq for FieldPrefix {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root && self.sublists == other.sublists
    }
}

impl fmt::Display for FieldPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for sublist in &self.sublists {
            write!(f, "{}{}", sublist.name, sublist.delimiter())?;
        }
        Ok(())
    }
}

impl fmt::Debug for FieldPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldPrefix({})", self.describe())
    }
}

/// A prefix plus the scalar field it ends in.
#[derive(Clone, PartialEq)]
pub struct FieldPath {
    prefix: FieldPrefix,
    field: Arc<Field>,
}

impl FieldPath {
    pub fn new(prefix: FieldPrefix, field: Arc<Field>) -> Self {
        Self { prefix, field }
    }

    pub fn prefix(&self) -> &FieldPrefix {
        &self.prefix
    }

    pub fn field(&self) -> &Arc<Field> {
        &self.field
    }

    pub fn is_nested(&self) -> bool {
        self.prefix.is_nested()
    }

    /// Table holding the field's column.
    pub fn table(&self) -> &str {
        &self.field.table
    }

    pub fn relative_to(&self, prefix: &FieldPrefix) -> Result<FieldPath> {
        Ok(Self {
            prefix: self.prefix.relative_to(prefix)?,
            field: Arc::clone(&self.field),
        })
    }

    /// Every sublist that has to be joined to reach the column, including the
    /// hidden hops of an alias field.
    pub fn join_chain(&self) -> Vec<Arc<Sublist>> {
        self.prefix
            .sublists
            .iter()
            .chain(self.field.alias_sublists())
            .cloned()
            .collect()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix, self.field.name)
    }
}

impl fmt::Debug for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldPath({}:{})", self.prefix.root, self)
    }
}

/// Walk `name` from `namespace`, returning the sublists crossed and the field
/// found at the end. When both delimiters occur, the one closest to the start
/// decides the next segment.
pub(crate) fn resolve_in(
    registry: &SearchRegistry,
    namespace: &str,
    chain: &[Arc<Sublist>],
    name: &str,
    full_name: &str,
) -> Result<(Vec<Arc<Sublist>>, Arc<Field>)> {
    let ns = registry.namespace(namespace).ok_or_else(|| {
        SearchError::internal(format!("namespace '{namespace}' is not registered"))
    })?;

    let nested = name.split_once(NESTED_SUBLIST_DELIMITER);
    let flattened = name.split_once(FLATTENED_SUBLIST_DELIMITER);
    let ((head, rest), is_flattened) = match (nested, flattened) {
        (None, None) => {
            let field = ns
                .field(name)
                .ok_or_else(|| SearchError::unknown_field(name, full_name))?;
            return Ok((chain.to_vec(), Arc::clone(field)));
        }
        (Some(n), None) => (n, false),
        (None, Some(f)) => (f, true),
        (Some(n), Some(f)) if n.0.len() < f.0.len() => (n, false),
        (Some(_), Some(f)) => (f, true),
    };

    let sublist = next_sublist(ns, chain, head, is_flattened, full_name)?;
    let target = sublist.namespace.clone();
    let mut next_chain = chain.to_vec();
    next_chain.push(sublist);
    resolve_in(registry, &target, &next_chain, rest, full_name)
}

fn next_sublist(
    namespace: &Namespace,
    chain: &[Arc<Sublist>],
    name: &str,
    flattened: bool,
    full_name: &str,
) -> Result<Arc<Sublist>> {
    if !flattened && chain.last().is_some_and(|s| s.flattened) {
        return Err(SearchError::NestedUnderFlattened {
            name: full_name.to_string(),
        });
    }
    let sublist = namespace
        .sublist(name)
        .ok_or_else(|| SearchError::unknown_field(name, full_name))?;
    Ok(if flattened {
        Arc::new(sublist.as_flattened())
    } else {
        Arc::clone(sublist)
    })
}
