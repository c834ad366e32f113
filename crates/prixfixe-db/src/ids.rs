//! Identifier generation.
//!
//! Every row id is a ULID string. Fresh rows get a random ULID; rows whose
//! identity must survive a re-run derive theirs from a natural key.

use sha2::{Digest, Sha256};
use ulid::Ulid;

/// A fresh, time-ordered identifier.
pub fn new_id() -> String {
    Ulid::new().to_string()
}

/// A stable identifier derived from the parts of a natural key.
///
/// Parts are joined with a unit separator before hashing so that
/// `("ab", "c")` and `("a", "bc")` produce different ids.
pub fn id_from_key(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Ulid::from_bytes(bytes).to_string()
}
