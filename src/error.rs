//! Error types for the image cache.
//!
//! All errors use the `thiserror` crate for minimal boilerplate and proper
//! error trait implementations. Pipeline errors (transfer failures, disk I/O
//! on individual blobs, index flushes) are recovered where they occur and
//! reported through logging; the types here surface only at the seams that
//! return `Result`: cache construction and the [`OriginFetcher`] trait.
//!
//! [`OriginFetcher`]: crate::origin::OriginFetcher

use thiserror::Error;

/// Result type alias for image cache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the image cache
#[derive(Error, Debug)]
pub enum Error {
  /// Fetching from the HTTP origin failed
  #[error("Fetch error: {0}")]
  Fetch(#[from] FetchError),

  /// I/O error (cache directory, blob files, sidecar index)
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  /// Generic error for miscellaneous issues
  #[error("{0}")]
  Other(String),
}

/// Errors produced while talking to the HTTP origin
///
/// DNS failures, connect errors, TLS errors, timeouts, and malformed
/// responses all collapse into [`FetchError::TransferFailed`]; the caller
/// treats them uniformly as a failed request.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
  /// The transfer did not complete
  #[error("Failed to fetch '{url}': {reason}")]
  TransferFailed { url: String, reason: String },

  /// The redirect chain exceeded the hop limit
  #[error("Too many redirects fetching '{url}' (limit {limit})")]
  TooManyRedirects { url: String, limit: usize },
}
