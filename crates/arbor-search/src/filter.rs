//! Filter expression tree.

use std::fmt;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};
use crate::path::FieldPath;
use crate::sql::Condition;

/// How a field compares against search values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    #[default]
    Exact,
    /// Relaxed matching; what that means depends on the field kind.
    Fuzzy,
    /// Two values, either of which may be absent, bounding the result.
    Range,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Exact => "exact",
            Self::Fuzzy => "fuzzy",
            Self::Range => "range",
        };
        f.write_str(name)
    }
}

/// Leaf of the tree: one field compared against a list of values.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldNode {
    pub path: FieldPath,
    /// `None` matches NULL.
    pub values: Vec<Option<String>>,
    pub match_type: MatchType,
}

impl FieldNode {
    pub fn new(
        path: FieldPath,
        values: Vec<Option<String>>,
        match_type: MatchType,
    ) -> Result<Self> {
        if !path.field().supported_match_types().contains(&match_type) {
            return Err(SearchError::UnsupportedMatchType {
                field: path.to_string(),
                match_type: match_type.to_string(),
            });
        }
        Ok(Self {
            path,
            values,
            match_type,
        })
    }

    /// Leaf using the most relaxed non-range mode the field supports. Exact
    /// matching is tried first at search time and this mode is the fallback.
    pub fn relaxed(path: FieldPath, values: Vec<Option<String>>) -> Self {
        let match_type = if path.field().supported_match_types().contains(&MatchType::Fuzzy) {
            MatchType::Fuzzy
        } else {
            MatchType::Exact
        };
        Self {
            path,
            values,
            match_type,
        }
    }
}

/// A boolean search expression.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchNode {
    And(Vec<SearchNode>),
    Or(Vec<SearchNode>),
    Not(Box<SearchNode>),
    Field(FieldNode),
    NoCondition,
}

impl SearchNode {
    pub fn and(children: Vec<SearchNode>) -> Self {
        Self::And(children)
    }

    pub fn or(children: Vec<SearchNode>) -> Self {
        Self::Or(children)
    }

    pub fn not(child: SearchNode) -> Self {
        Self::Not(Box::new(child))
    }

    pub fn field(node: FieldNode) -> Self {
        Self::Field(node)
    }

    pub fn to_condition(&self) -> Result<Condition> {
        match self {
            Self::And(children) => Ok(Condition::and(
                children
                    .iter()
                    .map(SearchNode::to_condition)
                    .collect::<Result<Vec<_>>>()?,
            )),
            Self::Or(children) => Ok(Condition::or(
                children
                    .iter()
                    .map(SearchNode::to_condition)
                    .collect::<Result<Vec<_>>>()?,
            )),
            Self::Not(child) => Ok(Condition::negate(child.to_condition()?)),
            Self::Field(node) => node.path.field().condition(&node.values, node.match_type),
            Self::NoCondition => Ok(Condition::True),
        }
    }

    /// Tables whose columns the condition reads, in first-use order.
    pub fn referenced_tables(&self) -> IndexSet<String> {
        self.referenced_paths()
            .into_iter()
            .map(|path| path.table().to_string())
            .collect()
    }

    pub fn referenced_paths(&self) -> Vec<&FieldPath> {
        let mut paths = Vec::new();
        self.collect_paths(&mut paths);
        paths
    }

    fn collect_paths<'a>(&'a self, paths: &mut Vec<&'a FieldPath>) {
        match self {
            Self::And(children) | Self::Or(children) => {
                children.iter().for_each(|c| c.collect_paths(paths));
            }
            Self::Not(child) => child.collect_paths(paths),
            Self::Field(node) => paths.push(&node.path),
            Self::NoCondition => {}
        }
    }

    /// The same tree with every fuzzy leaf switched to exact matching.
    pub fn to_exact_search(&self) -> SearchNode {
        match self {
            Self::And(children) => Self::And(children.iter().map(Self::to_exact_search).collect()),
            Self::Or(children) => Self::Or(children.iter().map(Self::to_exact_search).collect()),
            Self::Not(child) => Self::not(child.to_exact_search()),
            Self::Field(node) if node.match_type == MatchType::Fuzzy => Self::Field(FieldNode {
                match_type: MatchType::Exact,
                ..node.clone()
            }),
            other => other.clone(),
        }
    }
}
