//! Error types for smart-conn.

use thiserror::Error;

/// Errors that can occur in the failover service.
#[derive(Debug, Error)]
pub enum FailoverError {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error (Cloudflare or probe service transport)
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// The DNS record does not exist at the provider
    #[error("record {record_id} not found in zone {zone_id}")]
    RecordNotFound {
        /// Zone the record was looked up in.
        zone_id: String,
        /// Record that could not be found.
        record_id: String,
    },

    /// DNS provider rejected an operation
    #[error("provider error: {0}")]
    Provider(String),

    /// Durable state could not be written; the in-memory change was rolled back
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Failed to parse an IP address
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}
