//! Registry-driven compiler for nested, hierarchical search queries.
//!
//! A [`SearchRegistry`] describes the searchable tree: namespaces backed by
//! tables, the scalar fields they expose and the sublists linking them. Field
//! paths such as `germinationTests.germinations.seedsGerminated` are resolved
//! against it, and a [`SearchService`] compiles requests for any subset of
//! fields into a single PostgreSQL statement returning nested result maps.

pub mod compiler;
pub mod definition;
pub mod error;
pub mod executor;
pub mod field;
pub mod filter;
mod joins;
pub mod path;
pub mod registry;
pub mod results;
pub mod service;
pub mod settings;
pub mod sql;
pub mod table;
pub mod visibility;

#[cfg(test)]
mod testing;

pub use compiler::{NestedQueryBuilder, SortField};
pub use definition::RegistryDefinition;
pub use error::{Result, SearchError};
pub use executor::{Row, RowSource};
pub use field::{EnumValue, Field, FieldKind};
pub use filter::{FieldNode, MatchType, SearchNode};
pub use path::{FieldPath, FieldPrefix};
pub use registry::{Multiplicity, Namespace, RegistryError, SearchRegistry, Sublist};
pub use results::{SearchResultMap, SearchResults, SearchValue};
pub use service::{CompiledSearch, SearchRequest, SearchService, ValuesPage, compile_search};
pub use settings::SearchSettings;
pub use sql::{BuiltQuery, Pagination, SortOrder, SqlValue};
pub use table::{JoinOn, TableDescriptor, VisibilityRule};
pub use visibility::{StaticVisibility, Unrestricted, VisibilityContext};
