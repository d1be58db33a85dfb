//! [`RowSource`] backed by a PostgreSQL pool.

use arbor_search::{BuiltQuery, Row, RowSource, SqlValue};
use async_trait::async_trait;
use serde_json::Value;
use sqlx_core::query_scalar::query_scalar;
use sqlx_postgres::{PgPool, Postgres};
use tracing::{debug, instrument, warn};

use crate::config::PostgresConfig;
use crate::error::{PostgresError, Result};
use crate::pool::create_pool;

/// Runs compiled search queries on PostgreSQL.
///
/// Each query is wrapped so that every row comes back as a single `jsonb`
/// array, which keeps decoding independent of the column types involved.
#[derive(Debug, Clone)]
pub struct PgRowSource {
    pool: PgPool,
}

impl PgRowSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        Ok(Self::new(create_pool(config).await?))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip_all, fields(columns = query.column_count))]
    async fn fetch_json_rows(&self, query: &BuiltQuery) -> Result<Vec<Row>> {
        let sql = wrap_as_json(query);
        debug!(sql = %sql, params_count = query.params.len(), "Executing search query");

        let rows: Vec<Value> = query_scalar::<Postgres, Value>(&sql)
            .bind_all_params(&query.params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                let err = PostgresError::from(e);
                if err.is_schema_mismatch() {
                    warn!(
                        error = %err,
                        "Search query failed; the registry does not match the database schema"
                    );
                } else {
                    warn!(error = %err, "Search query failed");
                }
                err
            })?;

        rows.into_iter()
            .map(|row| match row {
                Value::Array(values) if values.len() == query.column_count => Ok(values),
                other => Err(PostgresError::decode(format!(
                    "expected an array of {} values, got {other}",
                    query.column_count
                ))),
            })
            .collect()
    }
}

#[async_trait]
impl RowSource for PgRowSource {
    async fn fetch_rows(&self, query: &BuiltQuery) -> arbor_search::Result<Vec<Row>> {
        Ok(self.fetch_json_rows(query).await?)
    }
}

/// `SELECT jsonb_build_array("q"."c0", ...) FROM (<query>) AS "q"`
fn wrap_as_json(query: &BuiltQuery) -> String {
    let columns: Vec<String> = (0..query.column_count)
        .map(|i| format!("\"q\".\"c{i}\""))
        .collect();
    format!(
        "SELECT jsonb_build_array({}) FROM ({}) AS \"q\"",
        columns.join(", "),
        query.sql
    )
}

/// Helper trait to bind all params to a query.
trait BindAllParams<'q> {
    fn bind_all_params(self, params: &'q [SqlValue]) -> Self;
}

impl<'q> BindAllParams<'q>
    for sqlx_core::query_scalar::QueryScalar<'q, Postgres, Value, sqlx_postgres::PgArguments>
{
    fn bind_all_params(mut self, params: &'q [SqlValue]) -> Self {
        for param in params {
            self = match param {
                SqlValue::Text(s) => self.bind(s.as_str()),
                SqlValue::Integer(i) => self.bind(*i),
                SqlValue::Float(f) => self.bind(*f),
                SqlValue::Boolean(b) => self.bind(*b),
                // Cast by the placeholder.
                SqlValue::Decimal(s) | SqlValue::Date(s) | SqlValue::Timestamp(s) => {
                    self.bind(s.as_str())
                }
                SqlValue::Null => self.bind(None::<String>),
            };
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_search::Pagination;

    #[test]
    fn test_wrap_as_json() {
        let query = BuiltQuery {
            sql: "SELECT 1 AS \"c0\", 2 AS \"c1\"".to_string(),
            params: Vec::new(),
            column_count: 2,
            pagination: Pagination::default(),
        };
        assert_eq!(
            wrap_as_json(&query),
            "SELECT jsonb_build_array(\"q\".\"c0\", \"q\".\"c1\") FROM (SELECT 1 AS \"c0\", 2 AS \"c1\") AS \"q\""
        );
    }
}
