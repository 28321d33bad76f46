//! cno-query: a terminal dashboard for CNO construction records
//!
//! Builds a filtered query over the Base dos Dados CNO tables, runs it on
//! BigQuery, previews the rows and exports them as xlsx, csv or zip.

mod app;
mod cli;
mod export;
mod logging;
mod query;
mod ui;
mod warehouse;

use anyhow::{bail, Context, Result};
use cli::{AppConfig, Cli, Commands, BILLING_PROJECT_ENV};
use export::ExportFormat;
use logging::LogTarget;
use warehouse::{BigQueryClient, Warehouse};

fn main() -> Result<()> {
    // Secrets may live in a local .env file
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Show {
            connection,
            filters,
        } => {
            logging::init(LogTarget::File)?;
            let config = AppConfig::from_args(connection, &filters)?;

            // Run the TUI application
            app::run(config)?;
        }
        Commands::Query {
            connection,
            filters,
            formats,
        } => {
            logging::init(LogTarget::Stderr)?;
            let config = AppConfig::from_args(connection, &filters)?;
            run_once(config, &formats)?;
        }
        Commands::Sql { filters } => {
            let params = filters.to_params()?;
            println!("{}", query::build_query(&params));
        }
    }

    Ok(())
}

/// Run the query once and write every requested export
fn run_once(config: AppConfig, formats: &[ExportFormat]) -> Result<()> {
    let Some(billing_project) = config.billing_project else {
        bail!("Billing project ID is required: pass --billing-project or set {BILLING_PROJECT_ENV}");
    };
    let credentials = config
        .credentials
        .context("No service-account credentials found")?;

    let sql = query::build_query(&config.filters);
    let client = BigQueryClient::new(billing_project, credentials)?;
    let result = client.run_query(&sql).context("Query failed")?;

    if result.is_empty() {
        tracing::warn!("No rows found for the selected filters");
        return Ok(());
    }

    for format in formats {
        let artifact = export::encode(&result, *format, &config.file_base)?;
        let path = artifact.write_to(&config.output_dir)?;
        println!("{}", path.display());
    }

    Ok(())
}
