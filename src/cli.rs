//! Command-line interface argument parsing for cno-query.
//!
//! - `cno-query show --uf SC`: interactive dashboard
//! - `cno-query query --uf PR --start 2024-01-01 --format csv --format zip`
//! - `cno-query sql --uf all --city "Pérola d'Oeste"`: print the SQL only

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::export::{ExportFormat, DEFAULT_BASE_NAME};
use crate::query::{parse_date, parse_municipalities, FilterParams, StateFilter};
use crate::warehouse::Credentials;

/// Secret holding the billing project ID
pub const BILLING_PROJECT_ENV: &str = "BILLING_PROJECT_ID";
/// Secret holding the service-account key JSON itself
pub const SERVICE_ACCOUNT_JSON_ENV: &str = "GCP_SERVICE_ACCOUNT_JSON";
/// Path to a service-account key file
pub const CREDENTIALS_PATH_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Query CNO (Cadastro Nacional de Obras) microdata from Base dos Dados on BigQuery.
#[derive(Parser, Debug)]
#[command(name = "cno-query")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch the interactive dashboard
    Show {
        #[command(flatten)]
        connection: ConnectionArgs,

        #[command(flatten)]
        filters: FilterArgs,
    },

    /// Run one query and write the requested exports
    Query {
        #[command(flatten)]
        connection: ConnectionArgs,

        #[command(flatten)]
        filters: FilterArgs,

        /// Export format (xlsx, csv or zip); repeat for several
        #[arg(short, long = "format", default_value = "xlsx", value_parser = parse_format)]
        formats: Vec<ExportFormat>,
    },

    /// Print the generated SQL without running it
    Sql {
        #[command(flatten)]
        filters: FilterArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Google Cloud project billed for the queries [env: BILLING_PROJECT_ID]
    #[arg(short, long)]
    pub billing_project: Option<String>,

    /// Path to a service-account key file
    #[arg(long)]
    pub credentials: Option<PathBuf>,

    /// Directory the exports are written to
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct FilterArgs {
    /// State code (UF), or "all"
    #[arg(long, default_value = "PR")]
    pub uf: String,

    /// First `data_inicio` day (YYYY-MM-DD); pass "" for no lower bound
    #[arg(long, default_value = "2023-05-16")]
    pub start: String,

    /// Last `data_inicio` day (YYYY-MM-DD); pass "" for no upper bound
    #[arg(long, default_value = "2025-05-16")]
    pub end: String,

    /// Municipality name; repeat or comma-separate for several
    #[arg(long = "city")]
    pub cities: Vec<String>,

    /// Maximum rows to fetch (1-500000)
    #[arg(short, long, default_value_t = crate::query::DEFAULT_ROW_LIMIT)]
    pub limit: u32,

    /// Decode coded columns through the dictionary table
    #[arg(long)]
    pub decode: bool,

    /// Base name for exported files
    #[arg(short, long, default_value = DEFAULT_BASE_NAME)]
    pub name: String,
}

fn parse_format(s: &str) -> Result<ExportFormat, String> {
    ExportFormat::parse(s).ok_or_else(|| format!("unknown format '{s}' (expected xlsx, csv or zip)"))
}

impl FilterArgs {
    /// Parse and validate into query parameters
    pub fn to_params(&self) -> Result<FilterParams> {
        let municipalities = self
            .cities
            .iter()
            .flat_map(|c| parse_municipalities(c))
            .collect();

        let params = FilterParams {
            state: StateFilter::parse(&self.uf)?,
            start_date: parse_date(&self.start)?,
            end_date: parse_date(&self.end)?,
            municipalities,
            row_limit: self.limit,
            decode_dictionary: self.decode,
        };
        params.validate().context("Invalid filters")
    }
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

/// Pick the service-account source: the flag wins, then the inline JSON
/// secret, then the key-file path variable.
pub fn resolve_credentials(
    flag: Option<PathBuf>,
    inline_json: Option<String>,
    path_env: Option<String>,
) -> Option<Credentials> {
    let non_blank = |s: &String| !s.trim().is_empty();
    flag.map(Credentials::File)
        .or_else(|| inline_json.filter(non_blank).map(Credentials::Inline))
        .or_else(|| path_env.filter(non_blank).map(|p| Credentials::File(PathBuf::from(p))))
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Configuration derived from CLI arguments and the secrets store
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub billing_project: Option<String>,
    pub credentials: Option<Credentials>,
    pub output_dir: PathBuf,
    pub filters: FilterParams,
    pub file_base: String,
}

impl AppConfig {
    /// Combine parsed arguments with the secrets found in the environment
    /// (after `.env` has been loaded).
    pub fn from_args(connection: ConnectionArgs, filters: &FilterArgs) -> Result<Self> {
        let billing_project = connection
            .billing_project
            .filter(|p| !p.trim().is_empty())
            .or_else(|| env_var(BILLING_PROJECT_ENV));

        let credentials = resolve_credentials(
            connection.credentials,
            env_var(SERVICE_ACCOUNT_JSON_ENV),
            env_var(CREDENTIALS_PATH_ENV),
        );

        Ok(AppConfig {
            billing_project,
            credentials,
            output_dir: connection.output_dir,
            filters: filters.to_params()?,
            file_base: filters.name.clone(),
        })
    }
}
