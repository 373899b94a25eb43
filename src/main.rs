//! CLI entry point for the dashboard export tool.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dashboard_export_core::{
    ClientSettings, ExportKind, PipelineConfig, run_pipeline, write_csv_file,
};
use tracing::{debug, info};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    debug!(?args, "CLI arguments parsed");

    let kind = ExportKind::from(args.kind);
    let mut client = ClientSettings::new(args.endpoint.clone(), args.user_key.clone());
    client.request_timeout = Duration::from_secs(args.request_timeout);

    let config = PipelineConfig {
        account_id: args.account,
        kind,
        workers: usize::from(args.workers),
        run_timeout: (args.run_timeout > 0).then_some(Duration::from_secs(args.run_timeout)),
        client,
    };

    info!(account_id = config.account_id, %kind, workers = config.workers, "export starting");

    let output = run_pipeline(&config)
        .await
        .with_context(|| format!("export for account {} failed", config.account_id))?;

    let (path, rows) = write_csv_file(&args.output_dir, kind, config.account_id, &output.dashboards)
        .with_context(|| format!("failed to write CSV into '{}'", args.output_dir.display()))?;

    let stats = &output.stats;
    info!(
        path = %path.display(),
        rows,
        entities = output.dashboards.len(),
        parents = stats.parents_listed(),
        widgets = stats.widgets_merged(),
        skipped = stats.not_found() + stats.upstream_errors() + stats.parse_failures(),
        "export complete"
    );

    Ok(())
}
