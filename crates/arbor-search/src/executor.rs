//! Query execution seam.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::sql::BuiltQuery;

/// One result row, one JSON value per output column.
pub type Row = Vec<Value>;

/// Runs compiled queries against a database.
///
/// Implementations execute `query.sql` with `query.params` bound to `$1..$n`
/// and return each row as `query.column_count` JSON values, in the order the
/// query produced them. The SQL already ends in `query.pagination`; sources
/// that do not run SQL apply it themselves.
#[async_trait]
pub trait RowSource: Send + Sync {
    async fn fetch_rows(&self, query: &BuiltQuery) -> Result<Vec<Row>>;
}
