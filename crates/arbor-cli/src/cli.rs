use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "arbor")]
#[command(about = "Explain and run nested searches over a registry-described database")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./arbor.toml when present)
    #[arg(short, long, global = true, env = "ARBOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Registry definition file (overrides registry.path)
    #[arg(short, long, global = true)]
    pub registry: Option<PathBuf>,

    /// Root namespace to search (overrides registry.namespace)
    #[arg(short, long, global = true)]
    pub namespace: Option<String>,

    /// Restrict visibility: scope=id[,id...]. Repeatable; without it every row is visible.
    #[arg(long = "scope", global = true, value_name = "SCOPE=IDS")]
    pub scopes: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the SQL a search would run, without connecting
    Explain(SearchArgs),
    /// Run a search and print the results
    Search(SearchArgs),
    /// Count the root rows matching the criteria
    Count(CriteriaArgs),
    /// List the distinct values of a field
    Values(ValuesArgs),
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Table,
}

#[derive(clap::Args, Default)]
pub struct CriteriaArgs {
    /// Match a field: field=value. Exact first, relaxed when nothing matches.
    #[arg(short = 'w', long = "where", value_name = "FIELD=VALUE")]
    pub conditions: Vec<String>,

    /// Bound a field: field=low..high, either end may be empty
    #[arg(long = "range", value_name = "FIELD=LOW..HIGH")]
    pub ranges: Vec<String>,
}

#[derive(clap::Args)]
pub struct SearchArgs {
    /// Fields to return (e.g. accessionNumber bags.number)
    #[arg(required = true)]
    pub fields: Vec<String>,

    #[command(flatten)]
    pub criteria: CriteriaArgs,

    /// Sort key; prefix with '-' for descending. Repeatable.
    #[arg(short, long = "sort", value_name = "[-]FIELD", allow_hyphen_values = true)]
    pub sort: Vec<String>,

    /// Page size
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Cursor returned by a previous page
    #[arg(long)]
    pub cursor: Option<String>,

    /// Output format
    #[arg(short, long, default_value = "json")]
    pub format: OutputFormat,
}

#[derive(clap::Args)]
pub struct ValuesArgs {
    /// Field to list values of
    pub field: String,

    #[command(flatten)]
    pub criteria: CriteriaArgs,

    /// List every value visible, ignoring criteria
    #[arg(long, conflicts_with_all = ["conditions", "ranges", "cursor"])]
    pub all: bool,

    /// Page size
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Cursor returned by a previous page
    #[arg(long)]
    pub cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search() {
        let cli = Cli::try_parse_from([
            "arbor",
            "search",
            "accessionNumber",
            "bags.number",
            "--where",
            "bags.number=2",
            "--sort",
            "-accessionNumber",
            "--limit",
            "10",
            "--scope",
            "facility=1,2",
        ])
        .unwrap();

        assert_eq!(cli.scopes, vec!["facility=1,2"]);
        let Commands::Search(args) = cli.command else {
            panic!("expected search");
        };
        assert_eq!(args.fields, vec!["accessionNumber", "bags.number"]);
        assert_eq!(args.criteria.conditions, vec!["bags.number=2"]);
        assert_eq!(args.sort, vec!["-accessionNumber"]);
        assert_eq!(args.limit, Some(10));
    }

    #[test]
    fn test_values_all_conflicts_with_criteria() {
        let result = Cli::try_parse_from([
            "arbor", "values", "state", "--all", "--where", "state=Stored",
        ]);
        assert!(result.is_err());
    }
}
