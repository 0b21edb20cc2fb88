//! Content hashing for synthesised node names.
//!
//! Phony aggregate nodes are named after an FNV-1a/64 digest of the sorted
//! dependency list they stand in for, so the same set always maps to the same
//! aggregate across runs.
//!
//! # Examples
//!
//! ```
//! use blueprint::hasher::fnv64a_hex;
//!
//! assert_eq!(fnv64a_hex(b""), "cbf29ce484222325");
//! ```

use fnv::FnvHasher;
use std::hash::Hasher;

/// Hash `bytes` with FNV-1a/64 and render the digest as lowercase hex.
#[must_use]
pub fn fnv64a_hex(bytes: &[u8]) -> String {
    let mut hasher = FnvHasher::default();
    hasher.write(bytes);
    format!("{:x}", hasher.finish())
}
