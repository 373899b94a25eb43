//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use dashboard_export_core::{ApiKey, ExportKind};
use dashboard_export_core::graphql::DEFAULT_ENDPOINT;
use dashboard_export_core::pipeline::DEFAULT_WORKERS;

/// Export dashboard widgets and their queries to CSV.
///
/// Lists every dashboard (or alert condition) in an account through the
/// GraphQL API, fetches widget details concurrently and writes one CSV row
/// per widget query.
#[derive(Parser, Debug)]
#[command(name = "dashboard-export")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Account id to export
    #[arg(long, env = "NEW_RELIC_ACCOUNT", value_parser = clap::value_parser!(u64).range(1..))]
    pub account: u64,

    /// User API key sent in the API-Key header
    #[arg(long, env = "NEW_RELIC_USER_KEY", hide_env_values = true, value_parser = parse_api_key)]
    pub user_key: ApiKey,

    /// GraphQL endpoint URL
    #[arg(long, env = "NEW_RELIC_GRAPHQL_ENDPOINT", default_value = DEFAULT_ENDPOINT, value_parser = parse_endpoint)]
    pub endpoint: String,

    /// Concurrent detail workers (1-64)
    #[arg(short = 'w', long, default_value_t = DEFAULT_WORKERS as u8, value_parser = clap::value_parser!(u8).range(1..=64))]
    pub workers: u8,

    /// Which entities to export
    #[arg(long, value_enum, default_value_t = KindArg::Dashboards)]
    pub kind: KindArg,

    /// Directory the CSV file is written to (created if missing)
    #[arg(short = 'o', long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Per-request timeout in seconds (1-600)
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..=600))]
    pub request_timeout: u64,

    /// Deadline for the whole run in seconds (0 to disable, max 86400)
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u64).range(0..=86400))]
    pub run_timeout: u64,
}

/// Export kind as spelled on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Dashboards,
    Conditions,
}

impl From<KindArg> for ExportKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Dashboards => ExportKind::Dashboards,
            KindArg::Conditions => ExportKind::Conditions,
        }
    }
}

fn parse_api_key(value: &str) -> Result<ApiKey, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("API key must not be empty".to_string());
    }
    Ok(ApiKey::new(value))
}

fn parse_endpoint(value: &str) -> Result<String, String> {
    let url = url::Url::parse(value).map_err(|e| format!("invalid URL: {e}"))?;
    match url.scheme() {
        "http" | "https" => Ok(value.to_string()),
        other => Err(format!("unsupported scheme '{other}', expected http or https")),
    }
}
