//! HTTP origin access.
//!
//! [`OriginFetcher`] is the seam between the cache pipeline and the network.
//! The default implementation, [`HttpOrigin`], drives `ureq`; tests and
//! embedders can substitute scripted or offline implementations.
//!
//! The trait deliberately reports "no newer copy" as an empty body rather
//! than a status code: a `304 Not Modified` carries no body, and the caching
//! layer does not otherwise distinguish statuses (an origin error page is
//! cached like any other payload).

use crate::config::CacheConfig;
use crate::error::{Error, FetchError, Result};
use http::header::{ETAG, LOCATION};
use std::sync::Arc;
use url::Url;

/// Outcome of a single origin transfer.
#[derive(Debug, Clone)]
pub struct OriginResponse {
  /// Response body. Empty means the origin had nothing newer to send.
  pub bytes: Vec<u8>,
  /// Validator extracted from the `ETag` response header, if any.
  pub etag: Option<String>,
}

/// Trait for fetching image bytes from an origin
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; transfers run on short-lived
/// threads owned by the fetcher.
pub trait OriginFetcher: Send + Sync {
  /// Fetch `url`, sending `If-None-Match: "<etag>"` when a validator is
  /// provided.
  fn fetch(&self, url: &str, etag: Option<&str>) -> Result<OriginResponse>;
}

// Allow Arc<dyn OriginFetcher> to be used as OriginFetcher
impl<T: OriginFetcher + ?Sized> OriginFetcher for Arc<T> {
  fn fetch(&self, url: &str, etag: Option<&str>) -> Result<OriginResponse> {
    (**self).fetch(url, etag)
  }
}

const MAX_REDIRECTS: usize = 10;

/// Default HTTP origin fetcher
///
/// Follows redirects (dropping conditional validators after the first hop),
/// applies the configured overall timeout and body size cap, and skips TLS
/// certificate verification unless the configuration says otherwise.
#[derive(Debug, Clone)]
pub struct HttpOrigin {
  agent: ureq::Agent,
  user_agent: String,
  max_response_size: usize,
}

impl HttpOrigin {
  pub fn new(config: &CacheConfig) -> Self {
    let agent_config = ureq::Agent::config_builder()
      .timeout_global(Some(config.request_timeout))
      .http_status_as_error(false)
      .max_redirects(0)
      .tls_config(
        ureq::tls::TlsConfig::builder()
          .disable_verification(!config.verify_tls)
          .build(),
      )
      .build();
    Self {
      agent: agent_config.into(),
      user_agent: config.user_agent.clone(),
      max_response_size: config.max_response_size,
    }
  }
}

impl OriginFetcher for HttpOrigin {
  fn fetch(&self, url: &str, etag: Option<&str>) -> Result<OriginResponse> {
    let mut current = url.to_string();
    let mut validator = etag;

    for _ in 0..MAX_REDIRECTS {
      let mut request = self
        .agent
        .get(&current)
        .header("User-Agent", &self.user_agent);
      let conditional;
      if let Some(etag) = validator {
        conditional = format!("\"{}\"", etag);
        request = request.header("If-None-Match", &conditional);
      }

      let mut response = request.call().map_err(|err| {
        Error::Fetch(FetchError::TransferFailed {
          url: current.clone(),
          reason: err.to_string(),
        })
      })?;

      let status = response.status().as_u16();
      if (300..400).contains(&status) {
        if let Some(loc) = response.headers().get(LOCATION).and_then(|h| h.to_str().ok()) {
          let next = Url::parse(&current)
            .ok()
            .and_then(|base| base.join(loc).ok())
            .map(|u| u.to_string())
            .unwrap_or_else(|| loc.to_string());
          current = next;
          // A validator does not apply to the redirect target.
          validator = None;
          continue;
        }
      }

      let etag = response
        .headers()
        .get(ETAG)
        .and_then(|h| h.to_str().ok())
        .and_then(etag_token)
        .map(|s| s.to_string());

      let bytes = response
        .body_mut()
        .with_config()
        .limit(self.max_response_size as u64)
        .read_to_vec()
        .map_err(|err| {
          Error::Fetch(FetchError::TransferFailed {
            url: current.clone(),
            reason: err.to_string(),
          })
        })?;

      return Ok(OriginResponse { bytes, etag });
    }

    Err(Error::Fetch(FetchError::TooManyRedirects {
      url: url.to_string(),
      limit: MAX_REDIRECTS,
    }))
  }
}

/// Extracts the opaque validator between double quotes. Ill-formed values
/// (no quotes, nothing between them) yield `None`.
fn etag_token(raw: &str) -> Option<&str> {
  let start = raw.find('"')? + 1;
  let end = start + raw[start..].find('"')?;
  if end > start {
    Some(&raw[start..end])
  } else {
    None
  }
}
