//! Worker stage: disk I/O and callback dispatch.
//!
//! The worker is the only thread that writes blob files. On startup it loads
//! the ETag sidecar and runs eviction before starting the fetcher, so the
//! index is authoritative before any network activity consults it.

use crate::cache::{ImageData, Shared};
use std::sync::Arc;
use std::thread;
use std::time::SystemTime;
use tracing::{debug, warn};

/// A completed outcome handed to the worker: a fresh download to persist and
/// deliver, a failed request to answer from disk, or a request to deliver an
/// existing disk copy.
#[derive(Debug)]
pub(crate) struct WorkItem {
  pub(crate) url: String,
  pub(crate) bytes: Option<Vec<u8>>,
  pub(crate) request_failed: bool,
}

pub(crate) fn run(shared: Arc<Shared>) {
  {
    let mut index = shared.index.lock().unwrap();
    index.load_from_disk();
    shared.store.scan_and_evict(SystemTime::now(), &mut index);
  }

  // Start the fetcher only once the index reflects the disk state.
  let spawned = thread::Builder::new().name("imgcache-fetcher".into()).spawn({
    let shared = Arc::clone(&shared);
    move || crate::fetcher::run(&shared)
  });
  match spawned {
    Ok(handle) => *shared.fetcher_handle.lock().unwrap() = Some(handle),
    Err(err) => warn!(error = %err, "failed to start fetcher thread"),
  }

  while let Some(batch) = shared.work_queue.wait_batch() {
    for item in batch {
      dispatch(&shared, item);
    }
  }

  debug!("worker stopped");
}

fn dispatch(shared: &Shared, item: WorkItem) {
  let WorkItem {
    url,
    bytes,
    request_failed,
  } = item;

  match bytes {
    Some(bytes) => {
      // Deliver from memory even when persisting fails; the application is
      // not starved by a full disk.
      if let Err(err) = shared.store.write(&url, &bytes) {
        warn!(url = %url, error = %err, "failed to persist blob; delivering from memory");
      }
      deliver(shared, &url, &bytes);
    }
    None if request_failed => match shared.store.read(&url) {
      Some(bytes) => {
        debug!(url = %url, "request failed; delivering cached copy");
        deliver(shared, &url, &bytes);
      }
      None => {
        debug!(url = %url, "request failed and no cached copy");
        deliver(shared, &url, &[]);
      }
    },
    None => {
      // Disk-hit fast path and the not-modified outcome: hand out the
      // cached copy when one exists.
      if let Some(bytes) = shared.store.read(&url) {
        deliver(shared, &url, &bytes);
      }
    }
  }
}

fn deliver(shared: &Shared, url: &str, bytes: &[u8]) {
  (shared.callback)(ImageData { url, bytes });
}
