//! Cache filename derivation.
//!
//! Every cached URL maps to one blob file named `I$` followed by the hex form
//! of a 128-bit URL hash, for a fixed total length of 34 bytes. Eviction uses
//! the fixed prefix and length to tell cache blobs apart from unrelated
//! directory entries, and [`hex_decode`] to recover the raw hash so index
//! entries can be matched against on-disk filenames.

use sha2::{Digest, Sha256};

pub(crate) const FILENAME_PREFIX: &str = "I$";
pub(crate) const HASH_BYTES: usize = 16;
pub(crate) const FILENAME_LENGTH: usize = FILENAME_PREFIX.len() + HASH_BYTES * 2;

/// 128-bit URL hash backing cache filenames.
///
/// Collisions are negligible but not impossible; a collision shows up as
/// stale content for one URL, which the design accepts.
pub(crate) fn hash_url(url: &str) -> [u8; HASH_BYTES] {
  let digest = Sha256::digest(url.as_bytes());
  let mut hash = [0u8; HASH_BYTES];
  hash.copy_from_slice(&digest[..HASH_BYTES]);
  hash
}

/// Derives the fixed-length cache filename for a URL.
pub(crate) fn filename_for(url: &str) -> String {
  let hex: String = hash_url(url).iter().map(|b| format!("{:02x}", b)).collect();
  format!("{}{}", FILENAME_PREFIX, hex)
}

/// Decodes the hex portion of a cache filename back into the raw hash.
pub(crate) fn hex_decode(hex: &str) -> Option<[u8; HASH_BYTES]> {
  if hex.len() != HASH_BYTES * 2 {
    return None;
  }
  let bytes = hex.as_bytes();
  let mut hash = [0u8; HASH_BYTES];
  for (i, out) in hash.iter_mut().enumerate() {
    let hi = (bytes[i * 2] as char).to_digit(16)?;
    let lo = (bytes[i * 2 + 1] as char).to_digit(16)?;
    *out = ((hi << 4) | lo) as u8;
  }
  Some(hash)
}

/// Returns the hex suffix of `name` when it has the shape of a cache
/// filename, `None` for anything else (the sidecar, temp files, strays).
pub(crate) fn cache_hex_suffix(name: &str) -> Option<&str> {
  if name.len() == FILENAME_LENGTH && name.starts_with(FILENAME_PREFIX) {
    Some(&name[FILENAME_PREFIX.len()..])
  } else {
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn filenames_are_deterministic_and_fixed_length() {
    let a = filename_for("https://example.com/a.png");
    let b = filename_for("https://example.com/a.png");
    assert_eq!(a, b);
    assert_eq!(a.len(), FILENAME_LENGTH);
    assert!(a.starts_with(FILENAME_PREFIX));
  }

  #[test]
  fn distinct_urls_get_distinct_filenames() {
    assert_ne!(
      filename_for("https://example.com/a.png"),
      filename_for("https://example.com/b.png")
    );
  }

  #[test]
  fn hex_round_trips_through_the_decoder() {
    let url = "https://example.com/images/logo.webp";
    let name = filename_for(url);
    let hex = cache_hex_suffix(&name).expect("derived name should pass the gate");
    assert_eq!(hex_decode(hex), Some(hash_url(url)));
  }

  #[test]
  fn suffix_gate_rejects_non_cache_names() {
    assert!(cache_hex_suffix(".etags").is_none());
    assert!(cache_hex_suffix("I$short").is_none());
    let name = filename_for("https://example.com/a.png");
    assert!(cache_hex_suffix(&format!("{name}.tmp")).is_none());
    assert!(cache_hex_suffix(&name.replace("I$", "X$")).is_none());
  }

  #[test]
  fn hex_decode_rejects_bad_input() {
    assert!(hex_decode("zz").is_none());
    assert!(hex_decode(&"g".repeat(HASH_BYTES * 2)).is_none());
    assert!(hex_decode(&"a".repeat(HASH_BYTES * 2 - 1)).is_none());
  }
}
