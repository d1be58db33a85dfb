//! Row visibility for the current principal.

use std::collections::HashMap;

use crate::sql::SqlValue;

/// Supplies the identifiers a [`crate::table::VisibilityRule::Column`] rule
/// closes over.
pub trait VisibilityContext: Send + Sync {
    /// Identifiers visible in `scope`. `None` means no restriction; an empty
    /// list means nothing is visible.
    fn ids_for(&self, scope: &str) -> Option<Vec<SqlValue>>;
}

/// Sees everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unrestricted;

impl VisibilityContext for Unrestricted {
    fn ids_for(&self, _scope: &str) -> Option<Vec<SqlValue>> {
        None
    }
}

/// Fixed identifier lists per scope. Scopes that were never configured see
/// nothing.
#[derive(Debug, Clone, Default)]
pub struct StaticVisibility {
    scopes: HashMap<String, Vec<SqlValue>>,
}

impl StaticVisibility {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_scope(
        mut self,
        scope: impl Into<String>,
        ids: impl IntoIterator<Item = SqlValue>,
    ) -> Self {
        self.scopes.insert(scope.into(), ids.into_iter().collect());
        self
    }
}

impl VisibilityContext for StaticVisibility {
    fn ids_for(&self, scope: &str) -> Option<Vec<SqlValue>> {
        Some(self.scopes.get(scope).cloned().unwrap_or_default())
    }
}
