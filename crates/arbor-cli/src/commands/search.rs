use anyhow::{Context, Result, bail};
use arbor_search::{
    BuiltQuery, FieldPrefix, Pagination, SearchRequest, SearchService, SearchSettings,
    VisibilityContext, compile_search,
};
use colored::Colorize;

use crate::cli::{CriteriaArgs, OutputFormat, SearchArgs};
use crate::criteria::{parse_criteria, parse_sort};
use crate::output::{print_json, print_note, print_table};

pub fn build_request(prefix: &FieldPrefix, args: &SearchArgs) -> Result<SearchRequest> {
    let fields = args
        .fields
        .iter()
        .map(|name| prefix.resolve(name).with_context(|| format!("invalid field '{name}'")))
        .collect::<Result<Vec<_>>>()?;
    let mut request = SearchRequest::new(prefix.clone())
        .with_fields(fields)
        .with_criteria(parse_criteria(prefix, &args.criteria)?);
    for raw in &args.sort {
        request = request.with_sort(parse_sort(prefix, raw)?);
    }
    if let Some(cursor) = &args.cursor {
        request = request.with_cursor(cursor.clone());
    }
    if let Some(limit) = args.limit {
        request = request.with_limit(limit);
    }
    Ok(request)
}

/// The queries a search runs: the exact-match query, then the relaxed one
/// if fallback could apply.
pub fn explain_queries(
    prefix: &FieldPrefix,
    visibility: &dyn VisibilityContext,
    settings: &SearchSettings,
    args: &SearchArgs,
) -> Result<Vec<(&'static str, BuiltQuery)>> {
    let request = build_request(prefix, args)?;
    let limit = settings.page_size(request.limit);
    if limit == 0 {
        bail!("limit must be greater than zero");
    }
    let offset = match request.cursor.as_deref() {
        Some(cursor) => cursor
            .trim()
            .parse()
            .with_context(|| format!("invalid cursor '{cursor}'"))?,
        None => 0,
    };
    let pagination = Pagination::new(limit + 1, offset);

    let exact = request.criteria.to_exact_search();
    let mut queries = vec![(
        "Search",
        compile_search(visibility, &request, &exact, pagination)?.query,
    )];
    if settings.fuzzy_fallback && exact != request.criteria {
        queries.push((
            "Fallback when nothing matches exactly",
            compile_search(visibility, &request, &request.criteria, pagination)?.query,
        ));
    }
    Ok(queries)
}

pub fn explain(
    prefix: &FieldPrefix,
    visibility: &dyn VisibilityContext,
    settings: &SearchSettings,
    args: &SearchArgs,
) -> Result<()> {
    for (title, query) in explain_queries(prefix, visibility, settings, args)? {
        println!("{}", format!("-- {title}").cyan());
        println!("{};", query.sql);
        for (i, param) in query.params.iter().enumerate() {
            println!("{}", format!("--   ${} = {param:?}", i + 1).dimmed());
        }
        println!();
    }
    Ok(())
}

pub async fn search(
    service: &SearchService,
    prefix: &FieldPrefix,
    visibility: &dyn VisibilityContext,
    args: &SearchArgs,
) -> Result<()> {
    let request = build_request(prefix, args)?;
    let results = service.search(visibility, &request).await?;

    match args.format {
        OutputFormat::Json => print_json(&results.results)?,
        OutputFormat::Table => {
            let headers = service.export_columns(&request.fields)?;
            let rows = results.flatten_for_csv(prefix, &request.fields)?;
            print_table(&headers, &rows);
        }
    }
    if let Some(cursor) = &results.cursor {
        print_note(&format!("More results: --cursor {cursor}"));
    }
    Ok(())
}

pub async fn count(
    service: &SearchService,
    prefix: &FieldPrefix,
    visibility: &dyn VisibilityContext,
    args: &CriteriaArgs,
) -> Result<()> {
    let criteria = parse_criteria(prefix, args)?;
    let count = service.search_count(visibility, prefix, &criteria).await?;
    println!("{count}");
    Ok(())
}
