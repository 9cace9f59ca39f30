//! Cache tunables.

use std::time::Duration;

/// Default User-Agent string sent with origin requests
pub const DEFAULT_USER_AGENT: &str = "imgcache/0.1";

/// Configuration for [`ImageCache`](crate::ImageCache).
///
/// The filename shape (prefix and hash width) is deliberately not
/// configurable: eviction relies on the exact prefix and length to tell cache
/// blobs apart from unrelated directory entries.
#[derive(Debug, Clone)]
pub struct CacheConfig {
  /// Maximum parallel HTTP transfers.
  pub max_requests: usize,
  /// Maximum number of blob files kept by eviction.
  pub max_files: usize,
  /// Access-time TTL for blob files before eviction reclaims them.
  pub max_age: Duration,
  /// Overall per-transfer timeout.
  pub request_timeout: Duration,
  /// Maximum response body size in bytes.
  pub max_response_size: usize,
  /// Verify TLS certificates. Off by default for parity with permissive
  /// embedding environments; turn on for a stricter posture.
  pub verify_tls: bool,
  /// User-Agent header sent with origin requests.
  pub user_agent: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      max_requests: 4,
      max_files: 3,
      max_age: Duration::from_secs(60 * 60 * 24 * 7), // 7 days
      request_timeout: Duration::from_secs(60),
      max_response_size: 50 * 1024 * 1024,
      verify_tls: false,
      user_agent: DEFAULT_USER_AGENT.to_string(),
    }
  }
}

impl CacheConfig {
  pub fn new() -> Self {
    Self::default()
  }

  /// Set the maximum number of parallel HTTP transfers
  pub fn with_max_requests(mut self, max_requests: usize) -> Self {
    self.max_requests = max_requests.max(1);
    self
  }

  /// Set the maximum number of kept blob files
  pub fn with_max_files(mut self, max_files: usize) -> Self {
    self.max_files = max_files;
    self
  }

  /// Set the access-time TTL for cached blobs
  pub fn with_max_age(mut self, max_age: Duration) -> Self {
    self.max_age = max_age;
    self
  }

  /// Set the overall per-transfer timeout
  pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
    self.request_timeout = timeout;
    self
  }

  /// Set the maximum response body size in bytes
  pub fn with_max_response_size(mut self, max_response_size: usize) -> Self {
    self.max_response_size = max_response_size;
    self
  }

  /// Enable or disable TLS certificate verification
  pub fn with_verify_tls(mut self, verify_tls: bool) -> Self {
    self.verify_tls = verify_tls;
    self
  }

  /// Set the User-Agent header
  pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
    self.user_agent = user_agent.into();
    self
  }
}
