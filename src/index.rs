//! URL → ETag index persisted to the `.etags` sidecar.
//!
//! The sidecar is line-oriented text, one `URL SP ETAG LF` record per entry.
//! URLs containing a space or newline are unsupported by the format and are
//! refused on insert. An in-memory entry may hold no validator at all: that
//! means the URL is known but the next fetch must be unconditional.

use crate::filename::{hash_url, hex_decode};
use memmap2::Mmap;
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub(crate) const SIDECAR_FILE: &str = ".etags";

#[derive(Debug)]
pub(crate) struct EtagIndex {
  path: PathBuf,
  entries: HashMap<String, Option<String>>,
}

impl EtagIndex {
  pub(crate) fn new(cache_dir: &Path) -> Self {
    Self {
      path: cache_dir.join(SIDECAR_FILE),
      entries: HashMap::new(),
    }
  }

  /// Loads the sidecar, tolerating truncation: parsing stops at the first
  /// malformed or incomplete record and keeps whatever was accumulated.
  pub(crate) fn load_from_disk(&mut self) {
    let file = match File::open(&self.path) {
      Ok(file) => file,
      Err(err) => {
        debug!(path = %self.path.display(), error = %err, "no etag sidecar to load");
        return;
      }
    };
    let len = file.metadata().map(|meta| meta.len()).unwrap_or(0);
    if len == 0 {
      return;
    }
    let mmap = match unsafe { Mmap::map(&file) } {
      Ok(mmap) => mmap,
      Err(err) => {
        warn!(path = %self.path.display(), error = %err, "failed to map etag sidecar");
        return;
      }
    };
    self.parse(&mmap);
    debug!(entries = self.entries.len(), "loaded etag sidecar");
  }

  fn parse(&mut self, data: &[u8]) {
    let mut rest = data;
    while !rest.is_empty() {
      let Some(sp) = rest.iter().position(|&b| b == b' ') else {
        break;
      };
      let Some(nl) = rest[sp + 1..].iter().position(|&b| b == b'\n') else {
        break;
      };
      let url_bytes = &rest[..sp];
      let etag_bytes = &rest[sp + 1..sp + 1 + nl];
      rest = &rest[sp + 1 + nl + 1..];

      if url_bytes.is_empty() || etag_bytes.is_empty() {
        continue;
      }
      let (Ok(url), Ok(etag)) = (
        std::str::from_utf8(url_bytes),
        std::str::from_utf8(etag_bytes),
      ) else {
        break;
      };
      self.entries.insert(url.to_string(), Some(etag.to_string()));
    }
  }

  pub(crate) fn contains(&self, url: &str) -> bool {
    self.entries.contains_key(url)
  }

  pub(crate) fn etag_for(&self, url: &str) -> Option<String> {
    self.entries.get(url).and_then(|etag| etag.clone())
  }

  /// Creates the entry if absent, replaces its validator otherwise. Returns
  /// the previous validator so callers can decide whether anything changed.
  pub(crate) fn insert_or_update(&mut self, url: &str, etag: Option<String>) -> Option<String> {
    if url.contains(' ') || url.contains('\n') {
      warn!(url = %url, "url not representable in the etag sidecar; not tracking");
      return None;
    }
    let etag = etag.filter(|etag| !etag.contains('\n'));
    match self.entries.get_mut(url) {
      Some(slot) => std::mem::replace(slot, etag),
      None => {
        self.entries.insert(url.to_string(), etag);
        None
      }
    }
  }

  /// Drops the validator but keeps the URL known, so the next fetch for it
  /// goes out unconditional.
  pub(crate) fn clear_etag(&mut self, url: &str) {
    if let Some(slot) = self.entries.get_mut(url) {
      *slot = None;
    }
  }

  /// Removes the entry whose URL hashes to the given filename hex suffix.
  ///
  /// Filenames cannot be reversed into URLs, so every URL in the index is
  /// trial-hashed until one matches. O(n) per deletion, acceptable at the
  /// small caps eviction runs with.
  pub(crate) fn delete_by_hash(&mut self, hex: &str) -> bool {
    let Some(target) = hex_decode(hex) else {
      warn!(hex = %hex, "malformed cache filename suffix");
      return false;
    };
    let Some(url) = self
      .entries
      .keys()
      .find(|url| hash_url(url) == target)
      .cloned()
    else {
      return false;
    };
    debug!(url = %url, "dropping index entry for evicted blob");
    self.entries.remove(&url);
    true
  }

  /// Atomically replaces the sidecar with the current in-memory state.
  /// Entries without a validator are omitted.
  pub(crate) fn flush_to_disk(&self) -> std::io::Result<()> {
    let mut out = String::new();
    for (url, etag) in &self.entries {
      let Some(etag) = etag else { continue };
      out.push_str(url);
      out.push(' ');
      out.push_str(etag);
      out.push('\n');
    }

    let tmp = self.path.with_extension("tmp");
    if let Err(err) = fs::write(&tmp, out.as_bytes()) {
      let _ = fs::remove_file(&tmp);
      return Err(err);
    }
    if let Err(err) = fs::rename(&tmp, &self.path) {
      let _ = fs::remove_file(&tmp);
      return Err(err);
    }
    Ok(())
  }

  pub(crate) fn clear(&mut self) {
    self.entries.clear();
  }

  #[cfg(test)]
  pub(crate) fn len(&self) -> usize {
    self.entries.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn index_in(dir: &Path) -> EtagIndex {
    EtagIndex::new(dir)
  }

  #[test]
  fn flush_and_load_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let mut index = index_in(tmp.path());
    index.insert_or_update("https://ex/a.png", Some("v1".to_string()));
    index.insert_or_update("https://ex/b.png", Some("v2".to_string()));
    index.insert_or_update("https://ex/c.png", None);
    index.flush_to_disk().expect("flush");

    let mut reloaded = index_in(tmp.path());
    reloaded.load_from_disk();
    assert_eq!(reloaded.etag_for("https://ex/a.png").as_deref(), Some("v1"));
    assert_eq!(reloaded.etag_for("https://ex/b.png").as_deref(), Some("v2"));
    // Entries without a validator are not persisted.
    assert!(!reloaded.contains("https://ex/c.png"));
    assert_eq!(reloaded.len(), 2);
  }

  #[test]
  fn parse_stops_at_truncated_trailing_record() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join(SIDECAR_FILE);
    fs::write(&path, b"https://ex/a.png v1\nhttps://ex/b.png v2").unwrap();

    let mut index = index_in(tmp.path());
    index.load_from_disk();
    assert_eq!(index.etag_for("https://ex/a.png").as_deref(), Some("v1"));
    assert!(!index.contains("https://ex/b.png"));
  }

  #[test]
  fn parse_skips_records_with_empty_fields() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join(SIDECAR_FILE);
    fs::write(&path, b" v0\nhttps://ex/a.png \nhttps://ex/b.png v2\n").unwrap();

    let mut index = index_in(tmp.path());
    index.load_from_disk();
    assert_eq!(index.etag_for("https://ex/b.png").as_deref(), Some("v2"));
    assert_eq!(index.len(), 1);
  }

  #[test]
  fn missing_sidecar_loads_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let mut index = index_in(tmp.path());
    index.load_from_disk();
    assert_eq!(index.len(), 0);
  }

  #[test]
  fn insert_or_update_reports_the_previous_validator() {
    let tmp = tempfile::tempdir().unwrap();
    let mut index = index_in(tmp.path());
    assert_eq!(index.insert_or_update("https://ex/a.png", Some("v1".into())), None);
    assert_eq!(
      index.insert_or_update("https://ex/a.png", Some("v2".into())),
      Some("v1".to_string())
    );
    assert_eq!(index.etag_for("https://ex/a.png").as_deref(), Some("v2"));
  }

  #[test]
  fn clear_etag_keeps_the_url_known() {
    let tmp = tempfile::tempdir().unwrap();
    let mut index = index_in(tmp.path());
    index.insert_or_update("https://ex/a.png", Some("v1".into()));
    index.clear_etag("https://ex/a.png");
    assert!(index.contains("https://ex/a.png"));
    assert_eq!(index.etag_for("https://ex/a.png"), None);
  }

  #[test]
  fn delete_by_hash_removes_the_matching_entry() {
    let tmp = tempfile::tempdir().unwrap();
    let mut index = index_in(tmp.path());
    index.insert_or_update("https://ex/a.png", Some("v1".into()));
    index.insert_or_update("https://ex/b.png", Some("v2".into()));

    let name = crate::filename::filename_for("https://ex/a.png");
    let hex = crate::filename::cache_hex_suffix(&name).unwrap();
    assert!(index.delete_by_hash(hex));
    assert!(!index.contains("https://ex/a.png"));
    assert!(index.contains("https://ex/b.png"));
    assert!(!index.delete_by_hash(hex), "second delete finds nothing");
  }

  #[test]
  fn urls_with_spaces_are_refused() {
    let tmp = tempfile::tempdir().unwrap();
    let mut index = index_in(tmp.path());
    index.insert_or_update("https://ex/a b.png", Some("v1".into()));
    assert!(!index.contains("https://ex/a b.png"));
  }

  #[test]
  fn flush_leaves_no_temp_file_behind() {
    let tmp = tempfile::tempdir().unwrap();
    let mut index = index_in(tmp.path());
    index.insert_or_update("https://ex/a.png", Some("v1".into()));
    index.flush_to_disk().expect("flush");
    let leftovers: Vec<_> = fs::read_dir(tmp.path())
      .unwrap()
      .flatten()
      .filter(|e| e.path().extension().map(|ext| ext == "tmp") == Some(true))
      .collect();
    assert!(leftovers.is_empty());
  }
}
