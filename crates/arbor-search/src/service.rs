//! Search orchestration.
//!
//! Every search runs in two parts. A subquery selects the primary keys of the
//! root rows that match the criteria and are visible to the caller; the
//! compiled nested query then returns those roots with all their selected
//! children. Criteria never filter children.

use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexSet;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::compiler::{NestedQueryBuilder, SortField};
use crate::error::{Result, SearchError};
use crate::executor::{Row, RowSource};
use crate::filter::SearchNode;
use crate::joins::JoinScope;
use crate::path::{FieldPath, FieldPrefix};
use crate::results::{SearchResultMap, SearchResults};
use crate::settings::SearchSettings;
use crate::sql::{BuiltQuery, Condition, Pagination, SqlBuilder};
use crate::visibility::VisibilityContext;

/// A search over one prefix.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub prefix: FieldPrefix,
    pub fields: Vec<FieldPath>,
    pub criteria: SearchNode,
    pub sort_order: Vec<SortField>,
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

impl SearchRequest {
    pub fn new(prefix: FieldPrefix) -> Self {
        Self {
            prefix,
            fields: Vec::new(),
            criteria: SearchNode::NoCondition,
            sort_order: Vec::new(),
            cursor: None,
            limit: None,
        }
    }

    #[must_use]
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = FieldPath>) -> Self {
        self.fields.extend(fields);
        self
    }

    #[must_use]
    pub fn with_criteria(mut self, criteria: SearchNode) -> Self {
        self.criteria = criteria;
        self
    }

    #[must_use]
    pub fn with_sort(mut self, sort: SortField) -> Self {
        self.sort_order.push(sort);
        self
    }

    #[must_use]
    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A compiled search, ready to run.
#[derive(Debug)]
pub struct CompiledSearch {
    pub query: BuiltQuery,
    node: NestedQueryBuilder,
}

impl CompiledSearch {
    pub fn convert_row(&self, row: &[Value]) -> Result<SearchResultMap> {
        self.node.convert_to_map(row)
    }
}

/// Distinct values of one field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValuesPage {
    /// `None` stands for rows where the field is null.
    pub values: Vec<Option<String>>,
    pub cursor: Option<String>,
}

/// Compile a search without running it.
pub fn compile_search(
    visibility: &dyn VisibilityContext,
    request: &SearchRequest,
    criteria: &SearchNode,
    pagination: Pagination,
) -> Result<CompiledSearch> {
    let mut builder = SqlBuilder::new();
    let mut node = NestedQueryBuilder::new(request.prefix.clone());
    node.add_select_fields(&request.fields)?;
    node.add_sort_fields(&request.sort_order)?;
    node.add_condition(root_id_condition(
        &request.prefix,
        criteria,
        visibility,
        &mut builder,
    )?)?;

    let mut sql = node.to_select_query(&mut builder, false)?;
    sql.push_str(&pagination.to_sql());
    let query = BuiltQuery {
        sql,
        params: builder.into_params(),
        column_count: node.column_count()?,
        pagination,
    };
    Ok(CompiledSearch { query, node })
}

/// `(pk) IN (SELECT DISTINCT pk ...)` restricting `prefix`'s table to rows
/// matching `criteria` that `visibility` allows.
fn root_id_condition(
    prefix: &FieldPrefix,
    criteria: &SearchNode,
    visibility: &dyn VisibilityContext,
    builder: &mut SqlBuilder,
) -> Result<Condition> {
    let table = prefix.table()?;
    Ok(Condition::InSubquery {
        exprs: table.primary_key_exprs(),
        subquery: root_ids_query(prefix, criteria, visibility, builder)?,
    })
}

fn root_ids_query(
    prefix: &FieldPrefix,
    criteria: &SearchNode,
    visibility: &dyn VisibilityContext,
    builder: &mut SqlBuilder,
) -> Result<String> {
    let table = prefix.table()?;
    let mut scope = JoinScope::new(Arc::clone(prefix.registry()), table);
    for path in criteria.referenced_paths() {
        scope.join_sublists(&path.relative_to(prefix)?.join_chain())?;
    }

    let mut conditions = vec![criteria.to_condition()?];
    conditions.extend(scope.join_visibility(table, visibility)?);

    let keys = table
        .primary_key_exprs()
        .iter()
        .map(|expr| expr.to_sql(builder))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let joins = scope.to_sql(builder)?;
    let condition = Condition::and(conditions).to_sql(builder)?;
    Ok(format!(
        "SELECT DISTINCT {} FROM {}{joins} WHERE {condition}",
        keys.join(", "),
        table.from_sql()?
    ))
}

fn parse_cursor(cursor: Option<&str>) -> Result<usize> {
    match cursor {
        None => Ok(0),
        Some(cursor) => cursor
            .trim()
            .parse()
            .map_err(|_| SearchError::InvalidCursor(cursor.to_string())),
    }
}

/// Runs searches against a [`RowSource`].
#[derive(Clone)]
pub struct SearchService {
    source: Arc<dyn RowSource>,
    settings: SearchSettings,
}

impl SearchService {
    pub fn new(source: Arc<dyn RowSource>, settings: SearchSettings) -> Self {
        Self { source, settings }
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Run a search. Fuzzy criteria are tried as exact matches first; if that
    /// finds nothing, the search is repeated as given.
    #[instrument(
        skip_all,
        fields(namespace = %request.prefix.root_namespace(), prefix = %request.prefix)
    )]
    pub async fn search(
        &self,
        visibility: &dyn VisibilityContext,
        request: &SearchRequest,
    ) -> Result<SearchResults> {
        let exact = request.criteria.to_exact_search();
        let results = self.search_with(visibility, request, &exact).await?;
        if results.is_empty() && self.should_retry(&exact, &request.criteria) {
            debug!("Exact search found nothing, retrying with fuzzy matching");
            return self.search_with(visibility, request, &request.criteria).await;
        }
        Ok(results)
    }

    /// Number of distinct root rows a search would return across all pages.
    #[instrument(skip_all, fields(prefix = %prefix))]
    pub async fn search_count(
        &self,
        visibility: &dyn VisibilityContext,
        prefix: &FieldPrefix,
        criteria: &SearchNode,
    ) -> Result<u64> {
        let exact = criteria.to_exact_search();
        let count = self.count_with(visibility, prefix, &exact).await?;
        if count == 0 && self.should_retry(&exact, criteria) {
            debug!("Exact count found nothing, retrying with fuzzy matching");
            return self.count_with(visibility, prefix, criteria).await;
        }
        Ok(count)
    }

    /// Distinct values of `field` among the root rows matching `criteria`,
    /// in the field's sort order.
    #[instrument(skip_all, fields(field = %field))]
    pub async fn fetch_values(
        &self,
        visibility: &dyn VisibilityContext,
        prefix: &FieldPrefix,
        field: &FieldPath,
        criteria: &SearchNode,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<ValuesPage> {
        let relative = field.relative_to(prefix)?;
        if relative.is_nested() {
            return Err(SearchError::NestedFieldNotAllowed {
                field: field.to_string(),
            });
        }
        let limit = self.page_size(limit)?;
        let offset = parse_cursor(cursor)?;
        let pagination = Pagination::new(limit + 1, offset);

        let mut builder = SqlBuilder::new();
        let mut node = NestedQueryBuilder::new(prefix.clone());
        node.add_select_field(field)?;
        node.add_sort_field(&SortField::asc(field.clone()))?;
        node.add_condition(root_id_condition(prefix, criteria, visibility, &mut builder)?)?;
        let mut sql = node.to_select_query(&mut builder, true)?;
        sql.push_str(&pagination.to_sql());
        let query = BuiltQuery {
            sql,
            params: builder.into_params(),
            column_count: node.column_count()?,
            pagination,
        };

        let rows = self.fetch(&query).await?;
        let has_more = rows.len() > limit;
        let key = relative.to_string();
        let mut values = IndexSet::new();
        for row in rows.iter().take(limit) {
            let map = node.convert_to_map(row)?;
            values.insert(map.get(&key).and_then(|v| v.as_scalar()).map(str::to_string));
        }
        Ok(ValuesPage {
            values: values.into_iter().collect(),
            cursor: has_more.then(|| (offset + limit).to_string()),
        })
    }

    /// Every value `field` can have among the rows visible to the caller,
    /// regardless of any search criteria. Nullable fields list `None` first.
    #[instrument(skip_all, fields(field = %field))]
    pub async fn fetch_all_values(
        &self,
        visibility: &dyn VisibilityContext,
        field: &FieldPath,
        limit: Option<usize>,
    ) -> Result<Vec<Option<String>>> {
        let definition = field.field();
        let mut values = Vec::new();
        if definition.nullable {
            values.push(None);
        }

        if let Some(possible) = definition.possible_values() {
            values.extend(possible.into_iter().map(Some));
            return Ok(values);
        }

        let registry = field.prefix().registry();
        let table = registry.table(field.table()).ok_or_else(|| {
            SearchError::internal(format!("table '{}' is not registered", field.table()))
        })?;
        let pagination = Pagination::new(self.page_size(limit)?, 0);

        let mut builder = SqlBuilder::new();
        let mut scope = JoinScope::new(Arc::clone(registry), table);
        let condition = scope.join_visibility(table, visibility)?;
        let mut sql = format!(
            "SELECT DISTINCT {} AS \"c0\", {} AS \"c1\" FROM {}{}",
            definition.select_expr().to_sql(&mut builder)?,
            definition.order_by_expr().to_sql(&mut builder)?,
            table.from_sql()?,
            scope.to_sql(&mut builder)?
        );
        let not_null = Condition::negate(Condition::IsNull(definition.column_expr()));
        let condition = Condition::and(std::iter::once(not_null).chain(condition).collect());
        sql.push_str(&format!(" WHERE {}", condition.to_sql(&mut builder)?));
        sql.push_str(" ORDER BY \"c1\" ASC");
        sql.push_str(&pagination.to_sql());
        let query = BuiltQuery {
            sql,
            params: builder.into_params(),
            column_count: 2,
            pagination,
        };

        for row in self.fetch(&query).await? {
            let value = row
                .first()
                .ok_or_else(|| SearchError::MalformedRow("expected a value column".to_string()))?;
            if let Some(value) = definition.compute_value(value) {
                values.push(Some(value));
            }
        }
        Ok(values)
    }

    /// Column headers for exporting `fields`, rejecting any that may not be
    /// exported.
    pub fn export_columns(&self, fields: &[FieldPath]) -> Result<Vec<String>> {
        fields
            .iter()
            .map(|path| {
                if path.field().exportable {
                    Ok(path.to_string())
                } else {
                    Err(SearchError::FieldNotExportable {
                        field: path.to_string(),
                    })
                }
            })
            .collect()
    }

    fn should_retry(&self, exact: &SearchNode, original: &SearchNode) -> bool {
        self.settings.fuzzy_fallback && exact != original
    }

    fn page_size(&self, requested: Option<usize>) -> Result<usize> {
        match self.settings.page_size(requested) {
            0 => Err(SearchError::InvalidRequest(
                "limit must be greater than zero".to_string(),
            )),
            limit => Ok(limit),
        }
    }

    async fn search_with(
        &self,
        visibility: &dyn VisibilityContext,
        request: &SearchRequest,
        criteria: &SearchNode,
    ) -> Result<SearchResults> {
        let limit = self.page_size(request.limit)?;
        let offset = parse_cursor(request.cursor.as_deref())?;
        let compiled = compile_search(
            visibility,
            request,
            criteria,
            Pagination::new(limit + 1, offset),
        )?;

        let rows = self.fetch(&compiled.query).await?;
        let has_more = rows.len() > limit;
        let results = rows
            .iter()
            .take(limit)
            .map(|row| compiled.convert_row(row))
            .collect::<Result<Vec<_>>>()?;
        Ok(SearchResults::new(
            results,
            has_more.then(|| (offset + limit).to_string()),
        ))
    }

    async fn count_with(
        &self,
        visibility: &dyn VisibilityContext,
        prefix: &FieldPrefix,
        criteria: &SearchNode,
    ) -> Result<u64> {
        let mut builder = SqlBuilder::new();
        let ids = root_ids_query(prefix, criteria, visibility, &mut builder)?;
        let query = BuiltQuery {
            sql: format!("SELECT COUNT(*) AS \"c0\" FROM ({ids}) AS \"ids\""),
            params: builder.into_params(),
            column_count: 1,
            pagination: Pagination::default(),
        };

        let rows = self.fetch(&query).await?;
        let value = rows.first().and_then(|row| row.first());
        let count = match value {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        };
        count.ok_or_else(|| SearchError::MalformedRow(format!("expected a count, got {value:?}")))
    }

    async fn fetch(&self, query: &BuiltQuery) -> Result<Vec<Row>> {
        let started = Instant::now();
        let rows = self.source.fetch_rows(query).await?;
        debug!(
            sql = %query.sql,
            params_count = query.params.len(),
            rows = rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Search query finished"
        );
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::filter::FieldNode;
    use crate::sql::SqlValue;
    use crate::testing::seed_registry;
    use crate::visibility::{StaticVisibility, Unrestricted};

    /// Serves fixed rows, honoring pagination, and records every query.
    #[derive(Default)]
    struct MockSource {
        rows: Vec<Row>,
        fuzzy_only: bool,
        queries: Mutex<Vec<BuiltQuery>>,
    }

    impl MockSource {
        fn with_rows(rows: Vec<Row>) -> Arc<Self> {
            Arc::new(Self {
                rows,
                ..Default::default()
            })
        }

        fn queries(&self) -> Vec<BuiltQuery> {
            self.queries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RowSource for MockSource {
        async fn fetch_rows(&self, query: &BuiltQuery) -> Result<Vec<Row>> {
            self.queries.lock().unwrap().push(query.clone());
            let fuzzy = query
                .params
                .iter()
                .any(|p| matches!(p, SqlValue::Text(s) if s.contains('%')));
            if self.fuzzy_only && !fuzzy {
                return Ok(Vec::new());
            }
            let rows = self.rows.iter().skip(query.pagination.offset);
            Ok(match query.pagination.limit {
                Some(limit) => rows.take(limit).cloned().collect(),
                None => rows.cloned().collect(),
            })
        }
    }

    fn service(source: Arc<MockSource>) -> SearchService {
        SearchService::new(source, SearchSettings::default())
    }

    fn root() -> FieldPrefix {
        seed_registry().root_prefix("accessions").unwrap()
    }

    fn numbers_request() -> SearchRequest {
        let prefix = root();
        SearchRequest::new(prefix.clone())
            .with_fields([prefix.resolve("accessionNumber").unwrap()])
            .with_sort(SortField::asc(prefix.resolve("accessionNumber").unwrap()))
    }

    #[test]
    fn test_pagination_pages_are_two_two_one() {
        let rows = (1..=5).map(|i| vec![json!(format!("A{i}"))]).collect();
        let svc = service(MockSource::with_rows(rows));

        let mut request = numbers_request().with_limit(2);
        let mut sizes = Vec::new();
        let mut seen = Vec::new();
        loop {
            let page = tokio_test::block_on(svc.search(&Unrestricted, &request)).unwrap();
            sizes.push(page.len());
            seen.extend(page.results.iter().map(|r| r["accessionNumber"].clone()));
            match page.cursor {
                Some(cursor) => request = request.with_cursor(cursor),
                None => break,
            }
        }
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn test_search_sql_restricts_root_ids() {
        let prefix = root();
        let request = numbers_request().with_criteria(SearchNode::field(FieldNode::relaxed(
            prefix.resolve("bags.number").unwrap(),
            vec![Some("B1".into())],
        )));
        let visibility = StaticVisibility::new().with_scope("facility", [SqlValue::Integer(1)]);
        let compiled = compile_search(
            &visibility,
            &request,
            &request.criteria.to_exact_search(),
            Pagination::new(26, 0),
        )
        .unwrap();

        let sql = &compiled.query.sql;
        assert!(sql.contains(
            "WHERE (\"accessions\".\"id\" IN (SELECT DISTINCT \"accessions\".\"id\" FROM \"accessions\" AS \"accessions\" \
             LEFT JOIN \"accession_bags\" AS \"bags\" ON (\"accessions\".\"id\" = \"bags\".\"accession_id\") \
             JOIN \"facilities\" AS \"facilities\" ON (\"accessions\".\"facility_id\" = \"facilities\".\"id\") \
             WHERE ((\"bags\".\"bag_number\" IN ($1)) AND (\"facilities\".\"id\" IN ($2)))))"
        ));
        assert!(sql.ends_with(" LIMIT 26"));
        assert_eq!(
            compiled.query.params,
            vec![SqlValue::Text("B1".into()), SqlValue::Integer(1)]
        );
        assert_eq!(compiled.query.column_count, 1);
    }

    #[test]
    fn test_exact_then_fuzzy_fallback() {
        let source = Arc::new(MockSource {
            rows: vec![vec![json!("A10")]],
            fuzzy_only: true,
            ..Default::default()
        });
        let svc = service(Arc::clone(&source));
        let prefix = root();
        let request = numbers_request().with_criteria(SearchNode::field(FieldNode::relaxed(
            prefix.resolve("accessionNumber").unwrap(),
            vec![Some("A1".into())],
        )));

        let results = tokio_test::block_on(svc.search(&Unrestricted, &request)).unwrap();
        assert_eq!(results.len(), 1);
        let queries = source.queries();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].params, vec![SqlValue::Text("A1".into())]);
        assert_eq!(queries[1].params, vec![SqlValue::Text("%A1%".into())]);
    }

    #[test]
    fn test_no_fallback_for_exact_criteria_or_when_disabled() {
        let prefix = root();
        let exact = numbers_request().with_criteria(SearchNode::field(
            FieldNode::new(
                prefix.resolve("state").unwrap(),
                vec![Some("Pending".into())],
                crate::filter::MatchType::Exact,
            )
            .unwrap(),
        ));
        let source = Arc::new(MockSource {
            fuzzy_only: true,
            ..Default::default()
        });
        let svc = service(Arc::clone(&source));
        let results = tokio_test::block_on(svc.search(&Unrestricted, &exact)).unwrap();
        assert!(results.is_empty());
        assert_eq!(source.queries().len(), 1);

        let fuzzy = numbers_request().with_criteria(SearchNode::field(FieldNode::relaxed(
            prefix.resolve("accessionNumber").unwrap(),
            vec![Some("A".into())],
        )));
        let source = Arc::new(MockSource {
            fuzzy_only: true,
            ..Default::default()
        });
        let svc = SearchService::new(
            Arc::clone(&source) as Arc<dyn RowSource>,
            SearchSettings::default().with_fuzzy_fallback(false),
        );
        tokio_test::block_on(svc.search(&Unrestricted, &fuzzy)).unwrap();
        assert_eq!(source.queries().len(), 1);
    }

    #[test]
    fn test_no_fallback_for_relaxed_numeric_criteria() {
        let prefix = root();
        let request = numbers_request().with_criteria(SearchNode::field(FieldNode::relaxed(
            prefix.resolve("quantity").unwrap(),
            vec![Some("10".into())],
        )));
        let source = Arc::new(MockSource {
            fuzzy_only: true,
            ..Default::default()
        });
        let svc = service(Arc::clone(&source));
        let results = tokio_test::block_on(svc.search(&Unrestricted, &request)).unwrap();
        assert!(results.is_empty());
        let queries = source.queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].params, vec![SqlValue::Integer(10)]);
    }

    #[test]
    fn test_invalid_cursor_and_limit() {
        let svc = service(MockSource::with_rows(vec![]));
        let err = tokio_test::block_on(
            svc.search(&Unrestricted, &numbers_request().with_cursor("page-two")),
        )
        .unwrap_err();
        assert!(matches!(err, SearchError::InvalidCursor(_)));

        let err = tokio_test::block_on(svc.search(&Unrestricted, &numbers_request().with_limit(0)))
            .unwrap_err();
        assert!(matches!(err, SearchError::InvalidRequest(_)));
    }

    #[test]
    fn test_search_count() {
        let source = MockSource::with_rows(vec![vec![json!(3)]]);
        let svc = service(Arc::clone(&source));
        let count = tokio_test::block_on(svc.search_count(
            &Unrestricted,
            &root(),
            &SearchNode::NoCondition,
        ))
        .unwrap();
        assert_eq!(count, 3);
        assert!(source.queries()[0].sql.starts_with(
            "SELECT COUNT(*) AS \"c0\" FROM (SELECT DISTINCT \"accessions\".\"id\" FROM \"accessions\" AS \"accessions\" WHERE TRUE) AS \"ids\""
        ));
    }

    #[test]
    fn test_fetch_values_dedupes_display_values() {
        let source = MockSource::with_rows(vec![
            vec![json!(10), json!("Pending")],
            vec![json!(10), json!("Pending")],
            vec![json!(30), json!("Stored")],
            vec![json!(null), json!(null)],
        ]);
        let svc = service(Arc::clone(&source));
        let prefix = root();
        let page = tokio_test::block_on(svc.fetch_values(
            &Unrestricted,
            &prefix,
            &prefix.resolve("state").unwrap(),
            &SearchNode::NoCondition,
            None,
            None,
        ))
        .unwrap();

        assert_eq!(
            page.values,
            vec![Some("Pending".to_string()), Some("Stored".to_string()), None]
        );
        assert_eq!(page.cursor, None);
        assert!(source.queries()[0].sql.starts_with("SELECT DISTINCT "));
    }

    #[test]
    fn test_fetch_values_pages_through_values() {
        let rows = (1..=5).map(|i| vec![json!(format!("A{i}"))]).collect();
        let source = MockSource::with_rows(rows);
        let svc = service(Arc::clone(&source));
        let prefix = root();
        let field = prefix.resolve("accessionNumber").unwrap();

        let mut cursor = None;
        let mut pages = Vec::new();
        loop {
            let page = tokio_test::block_on(svc.fetch_values(
                &Unrestricted,
                &prefix,
                &field,
                &SearchNode::NoCondition,
                cursor.as_deref(),
                Some(2),
            ))
            .unwrap();
            pages.push(page.values);
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        assert_eq!(
            pages,
            vec![
                vec![Some("A1".to_string()), Some("A2".to_string())],
                vec![Some("A3".to_string()), Some("A4".to_string())],
                vec![Some("A5".to_string())],
            ]
        );
        let offsets: Vec<_> = source
            .queries()
            .iter()
            .map(|q| (q.pagination.limit, q.pagination.offset))
            .collect();
        assert_eq!(offsets, vec![(Some(3), 0), (Some(3), 2), (Some(3), 4)]);
    }

    #[test]
    fn test_fetch_values_rejects_nested_fields() {
        let svc = service(MockSource::with_rows(vec![]));
        let prefix = root();
        let err = tokio_test::block_on(svc.fetch_values(
            &Unrestricted,
            &prefix,
            &prefix.resolve("bags.number").unwrap(),
            &SearchNode::NoCondition,
            None,
            None,
        ))
        .unwrap_err();
        assert!(matches!(err, SearchError::NestedFieldNotAllowed { .. }));
    }

    #[test]
    fn test_fetch_all_values() {
        let source = MockSource::with_rows(vec![
            vec![json!("A1"), json!("A1")],
            vec![json!("A2"), json!("A2")],
        ]);
        let svc = service(Arc::clone(&source));
        let prefix = root();
        let visibility = StaticVisibility::new().with_scope("facility", [SqlValue::Integer(4)]);

        let values = tokio_test::block_on(svc.fetch_all_values(
            &visibility,
            &prefix.resolve("accessionNumber").unwrap(),
            None,
        ))
        .unwrap();
        assert_eq!(values, vec![None, Some("A1".into()), Some("A2".into())]);

        let query = &source.queries()[0];
        assert!(query.sql.contains("JOIN \"facilities\" AS \"facilities\""));
        assert!(query.sql.contains("(\"facilities\".\"id\" IN ($1))"));
        assert!(query.sql.contains("ORDER BY \"c1\" ASC LIMIT 25"));

        let states = tokio_test::block_on(svc.fetch_all_values(
            &visibility,
            &prefix.resolve("state").unwrap(),
            None,
        ))
        .unwrap();
        assert_eq!(
            states,
            vec![
                None,
                Some("Pending".into()),
                Some("Processing".into()),
                Some("Stored".into())
            ]
        );
        assert_eq!(source.queries().len(), 1);
    }

    #[test]
    fn test_export_columns() {
        let svc = service(MockSource::with_rows(vec![]));
        let prefix = root();
        let ok = svc
            .export_columns(&[prefix.resolve("accessionNumber").unwrap()])
            .unwrap();
        assert_eq!(ok, vec!["accessionNumber".to_string()]);

        let err = svc
            .export_columns(&[prefix.resolve("notes").unwrap()])
            .unwrap_err();
        assert!(matches!(err, SearchError::FieldNotExportable { ref field } if field == "notes"));
    }
}
