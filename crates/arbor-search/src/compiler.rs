//! Nested query compiler.
//!
//! A [`NestedQueryBuilder`] compiles one level of the searchable tree. Fields
//! and sort keys are registered against it relative to its prefix; anything
//! that lives under a nested sublist is routed to a child builder, created on
//! demand. Rendering turns the whole tree into one PostgreSQL statement:
//!
//! ```text
//! SELECT "accessions"."number" AS "c0", "bags_agg"."agg" AS "c1"
//! FROM "accessions" AS "accessions"
//! LEFT JOIN LATERAL (
//!     SELECT COALESCE(jsonb_agg(jsonb_build_array("rows"."c0")), '[]'::jsonb) AS "agg"
//!     FROM (SELECT "bags"."bag_number" AS "c0" FROM "accession_bags" AS "bags"
//!           WHERE ("accessions"."id" = "bags"."accession_id")
//!           ORDER BY "c0" ASC, "bags"."id" ASC) AS "rows"
//! ) AS "bags_agg" ON TRUE
//! ORDER BY NULLIF("bags_agg"."agg"->0->0, 'null'::jsonb) ASC, "accessions"."id" ASC
//! ```
//!
//! Each child becomes a lateral join producing a JSON array of per-row arrays.
//! Being a `FROM` item, it can be referenced from the parent's `ORDER BY`,
//! which sorts by the first element of the child's (already sorted) array.
//! Column positions are assigned when a level is rendered, in the order its
//! select list is built, and the parent reads its children's positions only
//! after rendering them.
//!
//! Filter conditions are not pushed into children: the caller restricts the
//! root rows, and every child row of a selected root is returned.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{Result, SearchError};
use crate::joins::JoinScope;
use crate::path::{FieldPath, FieldPrefix};
use crate::results::{SearchResultMap, SearchValue};
use crate::sql::{Condition, SortOrder, SqlBuilder, SqlBuilderError, escape_identifier};

/// Most arguments a PostgreSQL function call accepts.
const MAX_AGGREGATE_COLUMNS: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct SortField {
    pub path: FieldPath,
    pub order: SortOrder,
}

impl SortField {
    pub fn new(path: FieldPath, order: SortOrder) -> Self {
        Self { path, order }
    }

    pub fn asc(path: FieldPath) -> Self {
        Self::new(path, SortOrder::Asc)
    }

    pub fn desc(path: FieldPath) -> Self {
        Self::new(path, SortOrder::Desc)
    }
}

#[derive(Debug)]
struct RenderedNode {
    sql: String,
    column_count: usize,
    field_positions: IndexMap<String, usize>,
    sublist_positions: IndexMap<String, usize>,
    sort_positions: IndexMap<String, usize>,
    /// Lateral subquery body, for nodes rendered as a child of another node.
    aggregate: Option<String>,
}

#[derive(Debug)]
enum NodeState {
    Building,
    Rendered(RenderedNode),
}

#[derive(Debug)]
pub struct NestedQueryBuilder {
    prefix: FieldPrefix,
    /// Local fields keyed by their name relative to `prefix`.
    scalar_fields: IndexMap<String, FieldPath>,
    /// Child levels keyed by sublist name.
    children: IndexMap<String, NestedQueryBuilder>,
    /// Every sort key routed through this level, in request order.
    sort_fields: Vec<SortField>,
    conditions: Vec<Condition>,
    state: NodeState,
}

impl NestedQueryBuilder {
    pub fn new(prefix: FieldPrefix) -> Self {
        Self {
            prefix,
            scalar_fields: IndexMap::new(),
            children: IndexMap::new(),
            sort_fields: Vec::new(),
            conditions: Vec::new(),
            state: NodeState::Building,
        }
    }

    pub fn prefix(&self) -> &FieldPrefix {
        &self.prefix
    }

    pub fn add_select_fields<'a>(
        &mut self,
        fields: impl IntoIterator<Item = &'a FieldPath>,
    ) -> Result<()> {
        for field in fields {
            self.add_select_field(field)?;
        }
        Ok(())
    }

    pub fn add_select_field(&mut self, field: &FieldPath) -> Result<()> {
        self.ensure_building()?;
        let relative = field.relative_to(&self.prefix)?;
        if relative.is_nested() {
            self.child_for(field, &relative)?.add_select_field(field)
        } else {
            self.scalar_fields.insert(relative.to_string(), relative);
            Ok(())
        }
    }

    pub fn add_sort_fields<'a>(
        &mut self,
        sorts: impl IntoIterator<Item = &'a SortField>,
    ) -> Result<()> {
        for sort in sorts {
            self.add_sort_field(sort)?;
        }
        Ok(())
    }

    /// Sort keys under a nested sublist are registered with the child too, so
    /// that the child exposes the value even when it is not selected.
    pub fn add_sort_field(&mut self, sort: &SortField) -> Result<()> {
        self.ensure_building()?;
        if self.sort_fields.iter().any(|s| s.path == sort.path) {
            return Ok(());
        }
        let relative = sort.path.relative_to(&self.prefix)?;
        if relative.is_nested() {
            self.child_for(&sort.path, &relative)?.add_sort_field(sort)?;
        }
        self.sort_fields.push(sort.clone());
        Ok(())
    }

    pub fn add_condition(&mut self, condition: Condition) -> Result<()> {
        self.ensure_building()?;
        self.conditions.push(condition);
        Ok(())
    }

    /// Whether this level or any level below it has fields to return.
    pub fn has_select_fields(&self) -> bool {
        !self.scalar_fields.is_empty() || self.children.values().any(|c| c.has_select_fields())
    }

    /// Render this level as a standalone query. Rendering happens once; later
    /// calls return the memoized SQL, whose parameters are already in the
    /// builder the first call was given.
    pub fn to_select_query(&mut self, builder: &mut SqlBuilder, distinct: bool) -> Result<String> {
        if let NodeState::Rendered(rendered) = &self.state {
            return Ok(rendered.sql.clone());
        }
        self.render(builder, distinct, None)?;
        Ok(self.rendered()?.sql.clone())
    }

    /// Number of columns in each row of the rendered query.
    pub fn column_count(&self) -> Result<usize> {
        Ok(self.rendered()?.column_count)
    }

    /// Convert one row of the rendered query into a result map. Null values
    /// and empty sublists are left out; the map itself may be empty.
    pub fn convert_to_map(&self, row: &[Value]) -> Result<SearchResultMap> {
        Ok(self.convert_row(row)?.unwrap_or_default())
    }

    fn convert_row(&self, row: &[Value]) -> Result<Option<SearchResultMap>> {
        let rendered = self.rendered()?;
        if row.len() < rendered.column_count {
            return Err(SearchError::MalformedRow(format!(
                "expected {} columns for '{}', got {}",
                rendered.column_count,
                self.prefix,
                row.len()
            )));
        }

        let mut map = SearchResultMap::new();
        for (name, path) in &self.scalar_fields {
            let position = position(&rendered.field_positions, name)?;
            if let Some(value) = path.field().compute_value(&row[position]) {
                map.insert(name.clone(), SearchValue::Scalar(value));
            }
        }

        for (name, child) in &self.children {
            if !child.has_select_fields() {
                continue;
            }
            let elements = match &row[position(&rendered.sublist_positions, name)?] {
                Value::Array(elements) => elements,
                Value::Null => continue,
                other => {
                    return Err(SearchError::MalformedRow(format!(
                        "expected an array for sublist '{name}', got {other}"
                    )));
                }
            };
            let mut maps = Vec::with_capacity(elements.len());
            for element in elements {
                let Value::Array(child_row) = element else {
                    return Err(SearchError::MalformedRow(format!(
                        "expected an array element in sublist '{name}', got {element}"
                    )));
                };
                maps.extend(child.convert_row(child_row)?);
            }
            if maps.is_empty() {
                continue;
            }
            let value = if child.prefix.is_multi_value() {
                SearchValue::List(maps)
            } else {
                SearchValue::Map(maps.swap_remove(0))
            };
            map.insert(name.clone(), value);
        }

        Ok((!map.is_empty()).then_some(map))
    }

    fn ensure_building(&self) -> Result<()> {
        match self.state {
            NodeState::Building => Ok(()),
            NodeState::Rendered(_) => Err(SearchError::internal(format!(
                "query for '{}' was modified after it was rendered",
                self.describe()
            ))),
        }
    }

    fn rendered(&self) -> Result<&RenderedNode> {
        match &self.state {
            NodeState::Rendered(rendered) => Ok(rendered),
            NodeState::Building => Err(SearchError::internal(format!(
                "query for '{}' has not been rendered",
                self.describe()
            ))),
        }
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.prefix.root_namespace(), self.prefix)
    }

    /// The child for the first sublist of `relative`, creating it if needed.
    fn child_for(
        &mut self,
        path: &FieldPath,
        relative: &FieldPath,
    ) -> Result<&mut NestedQueryBuilder> {
        let sublist = relative
            .prefix()
            .sublists()
            .first()
            .ok_or_else(|| {
                SearchError::internal(format!("'{path}' has no sublist to route through"))
            })?;
        let depth = self.prefix.sublists().len() + 1;
        let child_prefix = path.prefix().truncated(depth);
        Ok(self
            .children
            .entry(sublist.name.clone())
            .or_insert_with(|| NestedQueryBuilder::new(child_prefix)))
    }

    fn lateral_alias(&self) -> String {
        format!(
            "{}agg",
            self.prefix
                .to_string()
                .replace(crate::registry::NESTED_SUBLIST_DELIMITER, "_")
        )
    }

    /// Render this level as the body of a lateral join correlated with its
    /// parent row.
    fn render_aggregate(&mut self, builder: &mut SqlBuilder) -> Result<String> {
        let Some(sublist) = self.prefix.sublists().last().cloned() else {
            return Err(SearchError::internal(
                "root query cannot be rendered as a nested aggregate",
            ));
        };
        if let NodeState::Rendered(rendered) = &self.state {
            return rendered.aggregate.clone().ok_or_else(|| {
                SearchError::internal(format!(
                    "'{}' was already rendered as a top-level query",
                    self.describe()
                ))
            });
        }

        self.conditions.push(sublist.correlation());
        self.render(builder, false, Some(sublist.parent_table()))?;

        let NodeState::Rendered(rendered) = &mut self.state else {
            return Err(SearchError::internal("render did not complete"));
        };
        if rendered.column_count > MAX_AGGREGATE_COLUMNS {
            return Err(SqlBuilderError::QueryTooComplex(format!(
                "sublist '{}' selects {} columns; at most {MAX_AGGREGATE_COLUMNS} are supported",
                sublist.name, rendered.column_count
            ))
            .into());
        }
        let columns: Vec<String> = (0..rendered.column_count)
            .map(|i| format!("\"rows\".\"c{i}\""))
            .collect();
        let aggregate = format!(
            "SELECT COALESCE(jsonb_agg(jsonb_build_array({})), '[]'::jsonb) AS \"agg\" FROM ({}) AS \"rows\"",
            columns.join(", "),
            rendered.sql
        );
        rendered.aggregate = Some(aggregate.clone());
        Ok(aggregate)
    }

    /// Expression for a sort key's value in the first row of this level's
    /// aggregate, where `aggregate` evaluates to that aggregate in the parent.
    fn first_row_sort_expr(&self, aggregate: &str, sort_path: &FieldPath) -> Result<String> {
        let rendered = self.rendered()?;
        let relative = sort_path.relative_to(&self.prefix)?;
        if relative.is_nested() {
            let name = first_sublist_name(&relative)?;
            let child = self.children.get(&name).ok_or_else(|| {
                SearchError::internal(format!("no child query for sort field '{sort_path}'"))
            })?;
            let position = position(&rendered.sublist_positions, &name)?;
            child.first_row_sort_expr(&format!("{aggregate}->0->{position}"), sort_path)
        } else {
            let position = position(&rendered.sort_positions, &relative.to_string())?;
            Ok(format!("NULLIF({aggregate}->0->{position}, 'null'::jsonb)"))
        }
    }

    fn render(
        &mut self,
        builder: &mut SqlBuilder,
        distinct: bool,
        reserved: Option<&str>,
    ) -> Result<()> {
        self.ensure_building()?;

        let registry = Arc::clone(self.prefix.registry());
        let source = self.prefix.table()?.clone();
        let mut scope = JoinScope::new(Arc::clone(&registry), &source);
        if let Some(alias) = reserved {
            scope.reserve(alias)?;
        }

        let mut items: Vec<String> = Vec::new();
        let mut field_positions = IndexMap::new();
        let mut sublist_positions = IndexMap::new();
        let mut sort_positions = IndexMap::new();
        let mut laterals = String::new();
        let mut order_by = Vec::new();
        let mut order_tables = vec![source.name.clone()];

        for (name, path) in &self.scalar_fields {
            scope.join_sublists(&path.join_chain())?;
            if !scope.contains(path.table()) {
                return Err(SearchError::internal(format!(
                    "field '{name}' lives in table '{}', which is not reachable from '{}'",
                    path.table(),
                    source.name
                )));
            }
            if !order_tables.iter().any(|t| t == path.table()) {
                order_tables.push(path.table().to_string());
            }
            field_positions.insert(name.clone(), items.len());
            items.push(path.field().select_expr().to_sql(builder)?);
        }

        for (name, child) in &mut self.children {
            let aggregate = child.render_aggregate(builder)?;
            let alias = escape_identifier(&child.lateral_alias())?;
            laterals.push_str(&format!(" LEFT JOIN LATERAL ({aggregate}) AS {alias} ON TRUE"));
            sublist_positions.insert(name.clone(), items.len());
            items.push(format!("{alias}.\"agg\""));
        }

        for sort in &self.sort_fields {
            let relative = sort.path.relative_to(&self.prefix)?;
            let expr = if relative.is_nested() {
                let name = first_sublist_name(&relative)?;
                let child = self.children.get(&name).ok_or_else(|| {
                    SearchError::internal(format!("no child query for sort field '{}'", sort.path))
                })?;
                let aggregate = format!("{}.\"agg\"", escape_identifier(&child.lateral_alias())?);
                child.first_row_sort_expr(&aggregate, &sort.path)?
            } else {
                scope.join_sublists(&relative.join_chain())?;
                let name = relative.to_string();
                let field = relative.field();
                let order_expr = field.order_by_expr();
                let position = match field_positions.get(&name) {
                    Some(&position) if order_expr == field.select_expr() => position,
                    _ => {
                        items.push(order_expr.to_sql(builder)?);
                        items.len() - 1
                    }
                };
                sort_positions.insert(name, position);
                format!("\"c{position}\"")
            };
            order_by.push(format!("{expr} {}", sort.order.as_sql()));
        }

        if items.is_empty() {
            return Err(SearchError::internal(format!(
                "query for '{}' has nothing to select",
                self.describe()
            )));
        }

        if !distinct {
            for table in &order_tables {
                if let Some(descriptor) = registry.table(table) {
                    for expr in descriptor.default_order_exprs() {
                        order_by.push(format!("{} ASC", expr.to_sql(builder)?));
                    }
                }
            }
        }

        let select: Vec<String> = items
            .iter()
            .enumerate()
            .map(|(i, item)| format!("{item} AS \"c{i}\""))
            .collect();
        let mut sql = format!(
            "SELECT {}{} FROM {}{}{}",
            if distinct { "DISTINCT " } else { "" },
            select.join(", "),
            source.from_sql()?,
            scope.to_sql(builder)?,
            laterals
        );
        if !self.conditions.is_empty() {
            let condition = Condition::and(self.conditions.clone());
            sql.push_str(&format!(" WHERE {}", condition.to_sql(builder)?));
        }
        if !order_by.is_empty() {
            sql.push_str(&format!(" ORDER BY {}", order_by.join(", ")));
        }

        tracing::trace!(
            prefix = %self.describe(),
            columns = items.len(),
            "Rendered nested query level"
        );

        self.state = NodeState::Rendered(RenderedNode {
            sql,
            column_count: items.len(),
            field_positions,
            sublist_positions,
            sort_positions,
            aggregate: None,
        });
        Ok(())
    }
}

fn first_sublist_name(relative: &FieldPath) -> Result<String> {
    relative
        .prefix()
        .sublists()
        .first()
        .map(|s| s.name.clone())
        .ok_or_else(|| SearchError::internal(format!("'{relative}' has no sublist")))
}

fn position(positions: &IndexMap<String, usize>, name: &str) -> Result<usize> {
    positions
        .get(name)
        .copied()
        .ok_or_else(|| SearchError::internal(format!("no column position recorded for '{name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::seed_registry;
    use serde_json::json;

    fn root() -> FieldPrefix {
        seed_registry().root_prefix("accessions").unwrap()
    }

    fn paths(prefix: &FieldPrefix, names: &[&str]) -> Vec<FieldPath> {
        names.iter().map(|n| prefix.resolve(n).unwrap()).collect()
    }

    fn render(node: &mut NestedQueryBuilder) -> String {
        node.to_select_query(&mut SqlBuilder::new(), false).unwrap()
    }

    #[test]
    fn test_scalar_query() {
        let prefix = root();
        let mut node = NestedQueryBuilder::new(prefix.clone());
        node.add_select_fields(&paths(&prefix, &["accessionNumber", "state"]))
            .unwrap();
        node.add_sort_field(&SortField::desc(prefix.resolve("accessionNumber").unwrap()))
            .unwrap();

        assert_eq!(
            render(&mut node),
            "SELECT \"accessions\".\"number\" AS \"c0\", \"accessions\".\"state_id\" AS \"c1\" \
             FROM \"accessions\" AS \"accessions\" \
             ORDER BY \"c0\" DESC, \"accessions\".\"id\" ASC"
        );
        assert_eq!(node.column_count().unwrap(), 2);
    }

    #[test]
    fn test_enum_sort_adds_display_column() {
        let prefix = root();
        let mut node = NestedQueryBuilder::new(prefix.clone());
        node.add_select_fields(&paths(&prefix, &["state"])).unwrap();
        node.add_sort_field(&SortField::asc(prefix.resolve("state").unwrap()))
            .unwrap();
        let sql = render(&mut node);

        assert!(sql.contains(
            "CASE \"accessions\".\"state_id\" WHEN 10 THEN 'Pending' WHEN 20 THEN 'Processing' WHEN 30 THEN 'Stored' END AS \"c1\""
        ));
        assert!(sql.contains("ORDER BY \"c1\" ASC"));
        assert_eq!(node.column_count().unwrap(), 2);
    }

    #[test]
    fn test_nested_sublist_uses_lateral_aggregate() {
        let prefix = root();
        let mut node = NestedQueryBuilder::new(prefix.clone());
        node.add_select_fields(&paths(&prefix, &["accessionNumber", "bags.number"]))
            .unwrap();
        let sql = render(&mut node);

        assert!(sql.starts_with(
            "SELECT \"accessions\".\"number\" AS \"c0\", \"bags_agg\".\"agg\" AS \"c1\" FROM \"accessions\" AS \"accessions\" LEFT JOIN LATERAL ("
        ));
        assert!(sql.contains(
            "SELECT COALESCE(jsonb_agg(jsonb_build_array(\"rows\".\"c0\")), '[]'::jsonb) AS \"agg\" \
             FROM (SELECT \"bags\".\"bag_number\" AS \"c0\" FROM \"accession_bags\" AS \"bags\" \
             WHERE (\"accessions\".\"id\" = \"bags\".\"accession_id\") ORDER BY \"bags\".\"id\" ASC) AS \"rows\""
        ));
        assert!(sql.contains(") AS \"bags_agg\" ON TRUE"));
    }

    #[test]
    fn test_sort_by_field_two_levels_deep() {
        let prefix = root();
        let mut node = NestedQueryBuilder::new(prefix.clone());
        node.add_select_fields(&paths(
            &prefix,
            &["accessionNumber", "germinationTests.testType"],
        ))
        .unwrap();
        node.add_sort_field(&SortField::asc(
            prefix
                .resolve("germinationTests.germinations.seedsGerminated")
                .unwrap(),
        ))
        .unwrap();
        let sql = render(&mut node);

        // germinationTests selects testType (c0) then the germinations
        // aggregate (c1); germinations exposes seedsGerminated as c0.
        assert!(sql.contains(
            "ORDER BY NULLIF(\"germinationTests_agg\".\"agg\"->0->1->0->0, 'null'::jsonb) ASC, \"accessions\".\"id\" ASC"
        ));
        assert!(sql.contains(") AS \"germinationTests_germinations_agg\" ON TRUE"));
        assert!(sql.contains(
            "ORDER BY NULLIF(\"germinationTests_germinations_agg\".\"agg\"->0->0, 'null'::jsonb) ASC, \"germination_tests\".\"id\" ASC"
        ));
    }

    #[test]
    fn test_flattened_fields_are_joined() {
        let prefix = root();
        let mut node = NestedQueryBuilder::new(prefix.clone());
        node.add_select_fields(&paths(&prefix, &["accessionNumber", "facility_name", "bagNumber"]))
            .unwrap();
        let sql = render(&mut node);

        assert!(sql.contains(
            " LEFT JOIN \"facilities\" AS \"facilities\" ON (\"accessions\".\"facility_id\" = \"facilities\".\"id\")"
        ));
        assert!(sql.contains(
            " LEFT JOIN \"accession_bags\" AS \"bags\" ON (\"accessions\".\"id\" = \"bags\".\"accession_id\")"
        ));
        assert!(sql.contains("\"facilities\".\"name\" AS \"c1\""));
        assert!(sql.contains("\"bags\".\"bag_number\" AS \"c2\""));
        assert!(sql.ends_with(
            "ORDER BY \"accessions\".\"id\" ASC, \"facilities\".\"name\" ASC, \"facilities\".\"id\" ASC, \"bags\".\"id\" ASC"
        ));
    }

    #[test]
    fn test_distinct_query_skips_default_order() {
        let prefix = root();
        let field = prefix.resolve("accessionNumber").unwrap();
        let mut node = NestedQueryBuilder::new(prefix);
        node.add_select_field(&field).unwrap();
        node.add_sort_field(&SortField::asc(field)).unwrap();
        let sql = node.to_select_query(&mut SqlBuilder::new(), true).unwrap();
        assert_eq!(
            sql,
            "SELECT DISTINCT \"accessions\".\"number\" AS \"c0\" FROM \"accessions\" AS \"accessions\" ORDER BY \"c0\" ASC"
        );
    }

    #[test]
    fn test_conditions_are_rendered() {
        let prefix = root();
        let mut node = NestedQueryBuilder::new(prefix.clone());
        node.add_select_fields(&paths(&prefix, &["accessionNumber"])).unwrap();
        node.add_condition(Condition::InSubquery {
            exprs: vec![crate::sql::Expr::column("accessions", "id")],
            subquery: "SELECT 1".to_string(),
        })
        .unwrap();
        let sql = render(&mut node);
        assert!(sql.contains(" WHERE (\"accessions\".\"id\" IN (SELECT 1))"));
    }

    #[test]
    fn test_mutation_after_render_fails() {
        let prefix = root();
        let mut node = NestedQueryBuilder::new(prefix.clone());
        node.add_select_fields(&paths(&prefix, &["accessionNumber"])).unwrap();
        let first = render(&mut node);

        let err = node
            .add_select_field(&prefix.resolve("state").unwrap())
            .unwrap_err();
        assert!(matches!(err, SearchError::Internal(_)));
        assert!(node.add_condition(Condition::True).is_err());

        // Rendering again returns the memoized query.
        assert_eq!(render(&mut node), first);
    }

    #[test]
    fn test_empty_node_is_an_internal_error() {
        let mut node = NestedQueryBuilder::new(root());
        let err = node.to_select_query(&mut SqlBuilder::new(), false).unwrap_err();
        assert!(matches!(err, SearchError::Internal(_)));
    }

    #[test]
    fn test_convert_before_render_fails() {
        let node = NestedQueryBuilder::new(root());
        assert!(node.convert_to_map(&[]).is_err());
    }

    #[test]
    fn test_shape_of_nested_results() {
        let prefix = root();
        let mut node = NestedQueryBuilder::new(prefix.clone());
        node.add_select_fields(&paths(&prefix, &["bags.number"])).unwrap();
        node.add_sort_field(&SortField::asc(prefix.resolve("bags.number").unwrap()))
            .unwrap();
        render(&mut node);

        let first = node.convert_to_map(&[json!([["1"], ["2"]])]).unwrap();
        let second = node.convert_to_map(&[json!([])]).unwrap();

        assert_eq!(
            serde_json::to_value(vec![first, second]).unwrap(),
            json!([{"bags": [{"number": "1"}, {"number": "2"}]}, {}])
        );
    }

    #[test]
    fn test_same_field_from_child_root_is_flat() {
        let bags = seed_registry().root_prefix("bags").unwrap();
        let mut node = NestedQueryBuilder::new(bags.clone());
        node.add_select_fields(&paths(&bags, &["number"])).unwrap();
        render(&mut node);

        let map = node.convert_to_map(&[json!("1")]).unwrap();
        assert_eq!(serde_json::to_value(map).unwrap(), json!({"number": "1"}));
    }

    #[test]
    fn test_sort_only_children_are_invisible() {
        let prefix = root();
        let mut node = NestedQueryBuilder::new(prefix.clone());
        node.add_select_fields(&paths(&prefix, &["accessionNumber"])).unwrap();
        node.add_sort_field(&SortField::asc(prefix.resolve("bags.number").unwrap()))
            .unwrap();
        let sql = render(&mut node);
        assert!(sql.contains("ORDER BY NULLIF(\"bags_agg\".\"agg\"->0->0, 'null'::jsonb) ASC"));

        let map = node
            .convert_to_map(&[json!("A1"), json!([["B1"]])])
            .unwrap();
        assert_eq!(serde_json::to_value(map).unwrap(), json!({"accessionNumber": "A1"}));
    }

    #[test]
    fn test_one_to_one_sublist_is_a_map() {
        let prefix = root();
        let mut node = NestedQueryBuilder::new(prefix.clone());
        node.add_select_fields(&paths(&prefix, &["facility.name"])).unwrap();
        render(&mut node);

        let map = node.convert_to_map(&[json!([["Main"]])]).unwrap();
        assert_eq!(
            serde_json::to_value(map).unwrap(),
            json!({"facility": {"name": "Main"}})
        );
    }

    #[test]
    fn test_nulls_and_empty_children_are_omitted() {
        let prefix = root();
        let mut node = NestedQueryBuilder::new(prefix.clone());
        node.add_select_fields(&paths(
            &prefix,
            &["accessionNumber", "state", "germinationTests.germinations.seedsGerminated"],
        ))
        .unwrap();
        render(&mut node);

        let map = node
            .convert_to_map(&[json!(null), json!(20), json!([[[]], [[[5]]]])])
            .unwrap();
        assert_eq!(
            serde_json::to_value(map).unwrap(),
            json!({
                "state": "Processing",
                "germinationTests": [{"germinations": [{"seedsGerminated": "5"}]}]
            })
        );
    }

    #[test]
    fn test_malformed_rows_are_rejected() {
        let prefix = root();
        let mut node = NestedQueryBuilder::new(prefix.clone());
        node.add_select_fields(&paths(&prefix, &["accessionNumber", "bags.number"]))
            .unwrap();
        render(&mut node);

        assert!(matches!(
            node.convert_to_map(&[json!("A1")]),
            Err(SearchError::MalformedRow(_))
        ));
        assert!(matches!(
            node.convert_to_map(&[json!("A1"), json!("oops")]),
            Err(SearchError::MalformedRow(_))
        ));
    }

    #[test]
    fn test_flattened_join_shadowing_parent_is_a_cycle() {
        let prefix = root();
        let mut node = NestedQueryBuilder::new(prefix.clone());
        node.add_select_fields(&paths(&prefix, &["facility.accessions_accessionNumber"]))
            .unwrap();
        let err = node.to_select_query(&mut SqlBuilder::new(), false).unwrap_err();
        assert!(matches!(err, SearchError::JoinCycle { .. }));
    }
}
