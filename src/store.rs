//! On-disk blob storage for cached images.
//!
//! One flat directory, one file per cached URL, named by
//! [`filename_for`](crate::filename::filename_for). Only the worker thread
//! writes or removes blobs during normal operation; reads copy the mapped
//! file into a heap buffer so the mapping never outlives the call.

use crate::error::Result;
use crate::filename::{cache_hex_suffix, filename_for};
use crate::index::EtagIndex;
use memmap2::Mmap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub(crate) struct BlobStore {
  dir: PathBuf,
  max_files: usize,
  max_age: Duration,
}

fn tmp_path(path: &Path) -> PathBuf {
  let mut name = path.as_os_str().to_owned();
  name.push(".tmp");
  PathBuf::from(name)
}

impl BlobStore {
  pub(crate) fn new(dir: PathBuf, max_files: usize, max_age: Duration) -> Self {
    Self {
      dir,
      max_files,
      max_age,
    }
  }

  fn blob_path(&self, url: &str) -> PathBuf {
    self.dir.join(filename_for(url))
  }

  pub(crate) fn exists(&self, url: &str) -> bool {
    self.blob_path(url).exists()
  }

  /// Reads the cached blob for `url`, if present and non-empty.
  ///
  /// The file is memory-mapped and copied into a heap buffer; the mapping is
  /// dropped before the buffer is handed out.
  pub(crate) fn read(&self, url: &str) -> Option<Vec<u8>> {
    let path = self.blob_path(url);
    let file = File::open(&path).ok()?;
    let len = file.metadata().map(|meta| meta.len()).unwrap_or(0);
    if len == 0 {
      warn!(path = %path.display(), "cached blob is empty");
      return None;
    }
    match unsafe { Mmap::map(&file) } {
      Ok(mmap) => Some(mmap.to_vec()),
      Err(err) => {
        warn!(path = %path.display(), error = %err, "failed to map cached blob");
        None
      }
    }
  }

  /// Writes `bytes` for `url` atomically. A failed write removes the partial
  /// temp file; the destination is only ever replaced whole.
  pub(crate) fn write(&self, url: &str, bytes: &[u8]) -> Result<()> {
    let path = self.blob_path(url);
    let tmp = tmp_path(&path);
    if let Err(err) = fs::write(&tmp, bytes) {
      let _ = fs::remove_file(&tmp);
      return Err(err.into());
    }
    if let Err(err) = fs::rename(&tmp, &path) {
      let _ = fs::remove_file(&tmp);
      return Err(err.into());
    }
    debug!(url = %url, bytes = bytes.len(), "saved blob");
    Ok(())
  }

  /// Best-effort delete.
  pub(crate) fn remove(&self, url: &str) {
    let _ = fs::remove_file(self.blob_path(url));
  }

  /// Walks the cache directory and removes blobs past the capacity cap or
  /// the access-time TTL, in directory-iteration order. Each removal also
  /// drops the matching index entry; the sidecar is flushed once at the end
  /// if anything was removed.
  pub(crate) fn scan_and_evict(&self, now: SystemTime, index: &mut EtagIndex) {
    let read_dir = match fs::read_dir(&self.dir) {
      Ok(read_dir) => read_dir,
      Err(err) => {
        warn!(dir = %self.dir.display(), error = %err, "unable to open cache directory for eviction");
        return;
      }
    };

    let mut kept = 0usize;
    let mut removed_any = false;
    for entry in read_dir.flatten() {
      let file_name = entry.file_name();
      let Some(name) = file_name.to_str() else {
        continue;
      };
      let Some(hex) = cache_hex_suffix(name) else {
        continue;
      };
      let path = entry.path();

      if kept >= self.max_files {
        let _ = fs::remove_file(&path);
        index.delete_by_hash(hex);
        removed_any = true;
        debug!(path = %path.display(), "evicted blob (over capacity)");
        continue;
      }

      match blob_age(&entry, now) {
        Some(age) if age > self.max_age => {
          let _ = fs::remove_file(&path);
          index.delete_by_hash(hex);
          removed_any = true;
          debug!(path = %path.display(), age_secs = age.as_secs(), "evicted blob (expired)");
        }
        Some(_) => kept += 1,
        None => {}
      }
    }

    if removed_any {
      if let Err(err) = index.flush_to_disk() {
        warn!(error = %err, "failed to flush etag index after eviction");
      }
    }
  }
}

// Access time is the relevance signal; filesystems without it fall back to
// the modification time.
fn blob_age(entry: &fs::DirEntry, now: SystemTime) -> Option<Duration> {
  let meta = entry.metadata().ok()?;
  meta
    .accessed()
    .or_else(|_| meta.modified())
    .ok()
    .and_then(|touched| now.duration_since(touched).ok())
}
