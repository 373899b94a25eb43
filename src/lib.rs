//! Dashboard Export Core Library
//!
//! This library retrieves dashboard and alert-condition definitions from a
//! GraphQL observability API and flattens them into a CSV export.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`graphql`] - Retrying HTTP client, wire types and fixed query documents
//! - [`model`] - Dashboard, widget and query records
//! - [`pipeline`] - Paginated listing, bounded worker pool and single-writer aggregator
//! - [`export`] - CSV serialization of the aggregated result map

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod export;
pub mod graphql;
pub mod model;
pub mod pipeline;

// Re-export commonly used types
pub use export::{ExportError, output_file_name, write_csv, write_csv_file};
pub use graphql::{ApiKey, ClientSettings, GraphQlClient, GraphQlError, RetryDecision, RetryPolicy};
pub use model::{Dashboard, ExportKind, NrqlQuery, Widget};
pub use pipeline::{
    DEFAULT_WORKERS, PipelineConfig, PipelineError, PipelineOutput, PipelineStats, run_pipeline,
};
