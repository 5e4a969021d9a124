// src/core/audit/hash_chain.rs

//! The HMAC hash-chain construction, kept as a pure function so it can be
//! unit-tested without touching the store, per the design notes.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Canonical, order-stable encoding of a record's fields prior to hashing.
/// Each field is length-prefixed so no field's content can be crafted to
/// straddle a delimiter and forge a collision with a different field split.
pub fn canonical_fields(fields: &[&[u8]]) -> Vec<u8> {
    let mut buf = Vec::new();
    for field in fields {
        buf.extend_from_slice(&(field.len() as u64).to_be_bytes());
        buf.extend_from_slice(field);
    }
    buf
}

/// Computes `row_hash = HMAC(key, prev_hash ‖ canonical(fields))`.
pub fn compute_row_hash(key: &[u8], prev_hash: &[u8], fields: &[&[u8]]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(prev_hash);
    mac.update(&canonical_fields(fields));
    mac.finalize().into_bytes().to_vec()
}

/// Verifies that `row_hash` is the correct HMAC for `prev_hash`/`fields`
/// under `key`, in constant time.
pub fn verify_row_hash(key: &[u8], prev_hash: &[u8], fields: &[&[u8]], row_hash: &[u8]) -> bool {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(prev_hash);
    mac.update(&canonical_fields(fields));
    mac.verify_slice(row_hash).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_is_deterministic() {
        let key = b"0123456789abcdef0123456789abcdef";
        let h1 = compute_row_hash(key, b"", &[b"alice", b"login"]);
        let h2 = compute_row_hash(key, b"", &[b"alice", b"login"]);
        assert_eq!(h1, h2);
    }

    #[test]
    fn different_prev_hash_changes_output() {
        let key = b"key-material-32-bytes-long-ok!!";
        let h1 = compute_row_hash(key, b"", &[b"alice"]);
        let h2 = compute_row_hash(key, &h1, &[b"alice"]);
        assert_ne!(h1, h2);
    }

    #[test]
    fn tampering_with_a_field_is_detected() {
        let key = b"key-material-32-bytes-long-ok!!";
        let original = compute_row_hash(key, b"", &[b"alice", b"delete_user"]);
        assert!(!verify_row_hash(
            key,
            b"",
            &[b"alice", b"create_user"],
            &original
        ));
    }

    #[test]
    fn field_boundary_is_not_confusable() {
        // "ab","c" and "a","bc" must not hash the same way.
        let key = b"key-material-32-bytes-long-ok!!";
        let h1 = compute_row_hash(key, b"", &[b"ab", b"c"]);
        let h2 = compute_row_hash(key, b"", &[b"a", b"bc"]);
        assert_ne!(h1, h2);
    }
}
