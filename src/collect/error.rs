// src/collect/error.rs
use thiserror::Error;

/// Failures that downgrade a region (or reject a registry) instead of a run.
///
/// Fetch and HTTP failures are not here: they are encoded in `FetchResult`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollectError {
    /// Malformed descriptor, missing endpoint or missing API key.
    #[error("configuration error in {region}: {message}")]
    Configuration { region: String, message: String },

    #[error("unknown region: {0}")]
    UnknownRegion(String),

    #[error("duplicate region id: {0}")]
    DuplicateRegion(String),

    /// A strategy panicked while reading a page from `endpoint`.
    #[error("extraction failed for {endpoint}: {message}")]
    Extraction { endpoint: String, message: String },
}

impl CollectError {
    pub fn config(region: impl Into<String>, message: impl Into<String>) -> Self {
        CollectError::Configuration {
            region: region.into(),
            message: message.into(),
        }
    }
}
