//! Asynchronous on-disk image cache with ETag revalidation.
//!
//! `imgcache` keeps one blob file per cached URL in a flat directory, plus a
//! `.etags` sidecar mapping URLs to their origin validators. Two long-lived
//! threads do the work: a *fetcher* that multiplexes HTTP transfers (sending
//! `If-None-Match` for anything already on disk) and a *worker* that
//! persists fresh downloads, reads cached blobs, and invokes the single
//! application callback.
//!
//! Loading a cached URL delivers twice: once immediately from disk, and once
//! more when the background revalidation settles (stale-while-revalidate).
//! A cold miss delivers exactly once with the network result (empty bytes
//! if the transfer failed and nothing was cached). Eviction caps the number
//! of blob files and drops entries whose access time is older than the
//! configured TTL.
//!
//! # Example
//!
//! ```rust,ignore
//! use imgcache::ImageCache;
//!
//! let cache = ImageCache::init("/tmp/images", Box::new(|image| {
//!   println!("{}: {} bytes", image.url, image.bytes.len());
//! }))?;
//! cache.load("https://example.com/logo.png");
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod origin;

mod fetcher;
mod filename;
mod index;
mod queue;
mod store;
mod worker;

pub use cache::{ImageCache, ImageData, LoadCallback};
pub use config::CacheConfig;
pub use error::{Error, FetchError, Result};
pub use origin::{HttpOrigin, OriginFetcher, OriginResponse};
