//! Fetch stage: multiplexes origin transfers and feeds the worker.
//!
//! A single long-lived thread admits URLs from the load queue, runs each
//! transfer on a short-lived thread (never more than `max_requests` at a
//! time), and turns completions into work items. The thread owns all index
//! updates driven by network results, including the post-batch sidecar
//! flush.

use crate::cache::Shared;
use crate::error::Result;
use crate::origin::{OriginFetcher, OriginResponse};
use crate::worker::WorkItem;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

// Upper bound on one progress wait, so the running flag and the load queue
// are re-checked at least once a second while transfers are in flight.
const COMPLETION_POLL: Duration = Duration::from_secs(1);

struct Completion {
  url: String,
  etag_sent: Option<String>,
  result: Result<OriginResponse>,
}

pub(crate) fn run(shared: &Arc<Shared>) {
  let (tx, rx) = mpsc::channel::<Completion>();
  let mut in_flight: HashSet<String> = HashSet::new();

  loop {
    let running = shared.fetcher_running.load(Ordering::Acquire);
    if !running && in_flight.is_empty() {
      break;
    }

    if running {
      admit(shared, &tx, &mut in_flight);
    }

    if in_flight.is_empty() {
      // Idle until a producer signals a new load or shutdown.
      shared.load_queue.wait_nonempty();
      continue;
    }

    let first = match rx.recv_timeout(COMPLETION_POLL) {
      Ok(completion) => completion,
      Err(RecvTimeoutError::Timeout) => continue,
      Err(RecvTimeoutError::Disconnected) => break,
    };

    let mut dirty = complete(shared, first, &mut in_flight);
    while let Ok(completion) = rx.try_recv() {
      dirty |= complete(shared, completion, &mut in_flight);
    }

    if dirty {
      if let Err(err) = shared.index.lock().unwrap().flush_to_disk() {
        warn!(error = %err, "failed to flush etag index");
      }
    }
  }

  debug!("fetcher stopped");
}

/// Starts transfers for queued loads while capacity allows. A URL already in
/// flight is dropped rather than fetched twice.
fn admit(shared: &Arc<Shared>, tx: &Sender<Completion>, in_flight: &mut HashSet<String>) {
  while in_flight.len() < shared.config.max_requests {
    let Some(url) = shared.load_queue.try_pop() else {
      break;
    };
    if in_flight.contains(&url) {
      debug!(url = %url, "load already in flight; dropping duplicate");
      continue;
    }

    let etag = if shared.store.exists(&url) {
      shared.index.lock().unwrap().etag_for(&url)
    } else {
      None
    };
    if etag.is_some() {
      debug!(url = %url, "revalidating with stored etag");
    }

    in_flight.insert(url.clone());
    let spawned = thread::Builder::new().name("imgcache-transfer".into()).spawn({
      let url = url.clone();
      let etag = etag.clone();
      let origin = Arc::clone(&shared.origin);
      let tx = tx.clone();
      move || {
        let result = origin.fetch(&url, etag.as_deref());
        let _ = tx.send(Completion {
          url,
          etag_sent: etag,
          result,
        });
      }
    });
    if spawned.is_err() {
      warn!(url = %url, "failed to spawn transfer thread");
      in_flight.remove(&url);
      shared.work_queue.push(WorkItem {
        url,
        bytes: None,
        request_failed: true,
      });
    }
  }
}

/// Turns one finished transfer into a work item and the matching index
/// update. Returns whether the index now differs from the sidecar.
fn complete(shared: &Arc<Shared>, completion: Completion, in_flight: &mut HashSet<String>) -> bool {
  let Completion {
    url,
    etag_sent,
    result,
  } = completion;
  in_flight.remove(&url);

  match result {
    Ok(response) => {
      let mut index = shared.index.lock().unwrap();
      if !index.contains(&url) {
        index.insert_or_update(&url, etag_sent);
      }

      if response.bytes.is_empty() {
        // Nothing newer on the origin; the disk copy stands.
        drop(index);
        debug!(url = %url, "origin had no newer copy");
        shared.work_queue.push(WorkItem {
          url,
          bytes: None,
          request_failed: false,
        });
        false
      } else {
        let previous = index.insert_or_update(&url, response.etag.clone());
        let dirty = previous.is_some() || response.etag.is_some();
        drop(index);
        debug!(url = %url, bytes = response.bytes.len(), "downloaded fresh copy");
        shared.work_queue.push(WorkItem {
          url,
          bytes: Some(response.bytes),
          request_failed: false,
        });
        dirty
      }
    }
    Err(err) => {
      warn!(url = %url, error = %err, "transfer failed");
      shared.work_queue.push(WorkItem {
        url,
        bytes: None,
        request_failed: true,
      });
      false
    }
  }
}
