//! GraphQL transport for the retrieval pipeline.
//!
//! # Features
//!
//! - One pooled HTTP client per run, shared by cloning
//! - Fixed API-Key and Content-Type headers built once at construction
//! - Bounded fixed-delay retry on transport failure or non-success status
//! - Lenient response decoding (`null` lists and objects become empty)
//!
//! # Example
//!
//! ```no_run
//! use dashboard_export_core::graphql::{ApiKey, ClientSettings, GraphQlClient, GraphQlPayload};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = ClientSettings::new("https://api.newrelic.com/graphql", ApiKey::new("NRAK-..."));
//! let client = GraphQlClient::new(&settings)?;
//! let body = client.fetch_graphql(&GraphQlPayload::dashboard_detail("MXxWSVp8...")).await;
//! println!("{} bytes", body.len());
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
pub mod payload;
mod retry;

pub use client::{
    ApiKey, ClientSettings, DEFAULT_CONNECT_TIMEOUT, DEFAULT_ENDPOINT, DEFAULT_REQUEST_TIMEOUT,
    GraphQlClient,
};
pub use error::GraphQlError;
pub use payload::{GraphQlPayload, GraphQlResponse, NOT_FOUND_MESSAGE, null_to_default};
pub use retry::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY, RetryDecision, RetryPolicy};
