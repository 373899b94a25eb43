//! Error types for the GraphQL module.
//!
//! Transport errors are observed inside the retry loop and only logged; the
//! caller of [`GraphQlClient::fetch`](super::GraphQlClient::fetch) never sees
//! them. Construction and decode errors are returned to the caller.

use thiserror::Error;

/// Errors that can occur while talking to the GraphQL endpoint.
#[derive(Debug, Error)]
pub enum GraphQlError {
    /// The underlying reqwest client could not be built.
    #[error("failed to build HTTP client: {source}")]
    ClientBuild {
        #[source]
        source: reqwest::Error,
    },

    /// A configured header value contains characters HTTP does not allow.
    #[error("invalid value for header {name}")]
    InvalidHeader {
        /// Header name whose value was rejected.
        name: &'static str,
    },

    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error calling {url}: {source}")]
    Network {
        /// The endpoint that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before a response arrived.
    #[error("timeout calling {url}")]
    Timeout {
        /// The endpoint that timed out.
        url: String,
    },

    /// Request payload could not be serialized.
    #[error("failed to encode GraphQL payload: {source}")]
    Encode {
        #[source]
        source: serde_json::Error,
    },

    /// Response body is not the JSON shape the query expects.
    #[error("failed to decode GraphQL response ({bytes} bytes): {source}")]
    Decode {
        /// Size of the body that failed to decode.
        bytes: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl GraphQlError {
    /// Maps a reqwest send/read failure to a timeout or network error.
    pub fn transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Network { url, source }
        }
    }

    /// Creates a decode error for a body of `bytes` length.
    pub fn decode(bytes: usize, source: serde_json::Error) -> Self {
        Self::Decode { bytes, source }
    }
}
