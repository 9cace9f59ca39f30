//! Public cache handle and API surface.
//!
//! [`ImageCache`] owns the whole pipeline: the blob directory, the ETag
//! index, both queues, and the two long-lived threads. `load` is fire and
//! forget; every result, including failures, arrives through the single
//! callback supplied at init.
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
//! // ... later
//! cache.destroy();
//! ```

use crate::config::CacheConfig;
use crate::error::Result;
use crate::index::EtagIndex;
use crate::origin::{HttpOrigin, OriginFetcher};
use crate::queue::SignalQueue;
use crate::store::BlobStore;
use crate::worker::{self, WorkItem};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

/// A delivered image: the requested URL and the raw bytes.
///
/// The byte buffer belongs to the worker; the borrow ends with the callback
/// invocation, so callers that need the bytes longer must copy them.
#[derive(Debug)]
pub struct ImageData<'a> {
  pub url: &'a str,
  pub bytes: &'a [u8],
}

/// Delivery callback supplied at init. Invoked from the worker thread.
pub type LoadCallback = Box<dyn Fn(ImageData<'_>) + Send + Sync>;

pub(crate) struct Shared {
  pub(crate) config: CacheConfig,
  pub(crate) store: BlobStore,
  pub(crate) index: Mutex<EtagIndex>,
  pub(crate) load_queue: SignalQueue<String>,
  pub(crate) work_queue: SignalQueue<WorkItem>,
  pub(crate) origin: Arc<dyn OriginFetcher>,
  pub(crate) callback: LoadCallback,
  pub(crate) fetcher_running: AtomicBool,
  pub(crate) fetcher_handle: Mutex<Option<JoinHandle<()>>>,
}

/// Asynchronous on-disk image cache with ETag revalidation.
pub struct ImageCache {
  shared: Arc<Shared>,
  worker: Option<JoinHandle<()>>,
}

impl ImageCache {
  /// Creates the cache directory if needed and starts the worker thread
  /// (which in turn starts the fetcher).
  pub fn init(cache_dir: impl Into<PathBuf>, callback: LoadCallback) -> Result<Self> {
    Self::with_config(cache_dir, callback, CacheConfig::default())
  }

  /// Like [`init`](Self::init) with explicit tunables.
  pub fn with_config(
    cache_dir: impl Into<PathBuf>,
    callback: LoadCallback,
    config: CacheConfig,
  ) -> Result<Self> {
    let origin = Arc::new(HttpOrigin::new(&config));
    Self::with_origin(cache_dir, callback, config, origin)
  }

  /// Full constructor with a custom origin fetcher (offline modes, tests).
  pub fn with_origin(
    cache_dir: impl Into<PathBuf>,
    callback: LoadCallback,
    config: CacheConfig,
    origin: Arc<dyn OriginFetcher>,
  ) -> Result<Self> {
    let cache_dir = cache_dir.into();
    fs::create_dir_all(&cache_dir)?;
    info!(dir = %cache_dir.display(), "initializing image cache");

    let shared = Arc::new(Shared {
      store: BlobStore::new(cache_dir.clone(), config.max_files, config.max_age),
      index: Mutex::new(EtagIndex::new(&cache_dir)),
      load_queue: SignalQueue::new(),
      work_queue: SignalQueue::new(),
      origin,
      callback,
      fetcher_running: AtomicBool::new(true),
      fetcher_handle: Mutex::new(None),
      config,
    });

    let worker = thread::Builder::new().name("imgcache-worker".into()).spawn({
      let shared = Arc::clone(&shared);
      move || worker::run(shared)
    })?;

    Ok(Self {
      shared,
      worker: Some(worker),
    })
  }

  /// Requests `url`.
  ///
  /// When a cached copy exists it is delivered first, straight from disk;
  /// a revalidation request then follows in the background and delivers a
  /// second time with whatever the origin answered (stale-while-revalidate).
  /// On a cold miss the single delivery carries the network result.
  pub fn load(&self, url: &str) {
    if self.shared.store.exists(url) {
      // Enqueued ahead of the load item, so the cached copy always arrives
      // before the revalidation outcome.
      self.shared.work_queue.push(WorkItem {
        url: url.to_string(),
        bytes: None,
        request_failed: false,
      });
    }
    self.shared.load_queue.push(url.to_string());
  }

  /// Drops the cached copy of `url` and forgets its validator, so the next
  /// `load` behaves like a cold miss.
  pub fn remove(&self, url: &str) {
    if !self.shared.store.exists(url) {
      return;
    }
    self.shared.store.remove(url);
    let mut index = self.shared.index.lock().unwrap();
    index.clear_etag(url);
    if let Err(err) = index.flush_to_disk() {
      warn!(url = %url, error = %err, "failed to flush etag index after remove");
    }
  }

  /// Stops both threads and clears queued work. In-flight transfers are
  /// allowed to finish before the fetcher exits.
  pub fn destroy(mut self) {
    self.shutdown();
  }

  fn shutdown(&mut self) {
    let Some(worker) = self.worker.take() else {
      return;
    };
    info!("shutting down image cache");

    self.shared.fetcher_running.store(false, Ordering::Release);
    // Queued work items are discarded; not-yet-admitted load items are only
    // abandoned, since the fetcher stops admitting once its flag falls.
    self.shared.load_queue.close();
    self.shared.work_queue.close_and_discard();

    // The worker owns the fetcher's lifetime, so it goes first.
    if worker.join().is_err() {
      warn!("worker thread panicked");
    }
    let fetcher = self.shared.fetcher_handle.lock().unwrap().take();
    if let Some(fetcher) = fetcher {
      if fetcher.join().is_err() {
        warn!("fetcher thread panicked");
      }
    }

    self.shared.index.lock().unwrap().clear();
  }
}

impl Drop for ImageCache {
  fn drop(&mut self) {
    self.shutdown();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;

  struct NeverFetches;

  impl OriginFetcher for NeverFetches {
    fn fetch(&self, url: &str, _etag: Option<&str>) -> Result<crate::origin::OriginResponse> {
      panic!("unexpected fetch of {url}");
    }
  }

  #[test]
  fn init_creates_the_cache_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("nested").join("cache");
    let cache = ImageCache::with_origin(
      &dir,
      Box::new(|_| {}),
      CacheConfig::default(),
      Arc::new(NeverFetches),
    )
    .expect("init");
    assert!(dir.is_dir());
    cache.destroy();
  }

  #[test]
  fn drop_shuts_down_without_destroy() {
    let tmp = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    {
      let calls = Arc::clone(&calls);
      let _cache = ImageCache::with_origin(
        tmp.path(),
        Box::new(move |_| {
          calls.fetch_add(1, Ordering::SeqCst);
        }),
        CacheConfig::default(),
        Arc::new(NeverFetches),
      )
      .expect("init");
      // Dropping joins both threads; NeverFetches proves no load ran.
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn remove_on_a_missing_url_is_a_no_op() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = ImageCache::with_origin(
      tmp.path(),
      Box::new(|_| {}),
      CacheConfig::default(),
      Arc::new(NeverFetches),
    )
    .expect("init");
    cache.remove("https://ex/never-seen.png");
    cache.destroy();
  }
}
