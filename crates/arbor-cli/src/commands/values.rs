use anyhow::{Context, Result};
use arbor_search::{FieldPrefix, SearchService, VisibilityContext};
use colored::Colorize;

use crate::cli::ValuesArgs;
use crate::criteria::parse_criteria;
use crate::output::print_note;

pub async fn values(
    service: &SearchService,
    prefix: &FieldPrefix,
    visibility: &dyn VisibilityContext,
    args: &ValuesArgs,
) -> Result<()> {
    let field = prefix
        .resolve(&args.field)
        .with_context(|| format!("invalid field '{}'", args.field))?;

    if args.all {
        let values = service.fetch_all_values(visibility, &field, args.limit).await?;
        print_values(&values);
        return Ok(());
    }

    let criteria = parse_criteria(prefix, &args.criteria)?;
    let page = service
        .fetch_values(
            visibility,
            prefix,
            &field,
            &criteria,
            args.cursor.as_deref(),
            args.limit,
        )
        .await?;
    print_values(&page.values);
    if let Some(cursor) = &page.cursor {
        print_note(&format!("More values: --cursor {cursor}"));
    }
    Ok(())
}

fn print_values(values: &[Option<String>]) {
    for value in values {
        match value {
            Some(value) => println!("{value}"),
            None => println!("{}", "(null)".dimmed()),
        }
    }
}
