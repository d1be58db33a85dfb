mod cli;
mod commands;
mod config;
mod criteria;
mod observability;
mod output;

use std::sync::Arc;

use anyhow::{Context, Result};
use arbor_db_postgres::{PgRowSource, mask_password};
use arbor_search::{RegistryDefinition, SearchService};
use clap::Parser;
use tracing::info;

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::output::print_error;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    observability::init_tracing();

    let config = config::load_config(cli.config.as_deref())?;
    observability::apply_logging_level(&config.logging.level);

    let registry_path = cli.registry.as_ref().unwrap_or(&config.registry.path);
    let registry = RegistryDefinition::load(registry_path)
        .and_then(RegistryDefinition::build)
        .with_context(|| format!("failed to load registry {}", registry_path.display()))?;
    let namespace = cli
        .namespace
        .as_deref()
        .or(config.registry.namespace.as_deref())
        .context("no namespace to search; pass --namespace or set registry.namespace")?;
    let prefix = registry.root_prefix(namespace)?;
    let visibility = criteria::parse_visibility(&cli.scopes)?;

    match &cli.command {
        Commands::Explain(args) => {
            commands::search::explain(&prefix, visibility.as_ref(), &config.search, args)?;
        }
        Commands::Search(args) => {
            let service = connect(&config).await?;
            commands::search::search(&service, &prefix, visibility.as_ref(), args).await?;
        }
        Commands::Count(args) => {
            let service = connect(&config).await?;
            commands::search::count(&service, &prefix, visibility.as_ref(), args).await?;
        }
        Commands::Values(args) => {
            let service = connect(&config).await?;
            commands::values::values(&service, &prefix, visibility.as_ref(), args).await?;
        }
    }

    Ok(())
}

async fn connect(config: &AppConfig) -> Result<SearchService> {
    let url = mask_password(&config.database.url);
    let source = PgRowSource::connect(&config.database)
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    info!(url = %url, "Connected to database");
    Ok(SearchService::new(Arc::new(source), config.search.clone()))
}
