#![forbid(unsafe_code)]

//! Request fingerprinting.
//!
//! The fingerprint is the persisted dedup key for submitted jobs; it must be stable across builds
//! and restarts. Hashing is 64-bit FNV-1a and collisions are possible.

use crate::request::JobRequest;
use std::fmt::Write as _;

const FNV_OFFSET_BASIS: u64 = 14695981039346656037;
const FNV_PRIME: u64 = 1099511628211;
const MULTIPLIER: u64 = 31;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wraps a fingerprint previously rendered by [`fingerprint`] (for example one read back
    /// from the durable store).
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn hash_str(value: &str) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for b in value.as_bytes() {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn combine(value_hash: u64, key: &str) -> u64 {
    value_hash
        .wrapping_mul(MULTIPLIER)
        .wrapping_add(hash_str(key))
}

/// Computes the fingerprint of `request`.
///
/// Single-valued attributes are visited first, then vector attributes, each in key order. A
/// vector is folded left to right, so reordering its elements changes the fingerprint.
pub fn fingerprint(request: &JobRequest) -> Fingerprint {
    let mut out = String::new();
    for (key, value) in request.attributes() {
        let _ = write!(out, "{}", combine(hash_str(value), key));
    }
    for (key, values) in request.vector_attributes() {
        let folded = values.iter().fold(0u64, |acc, value| {
            acc.wrapping_mul(MULTIPLIER)
                .wrapping_add(hash_str(value))
        });
        let _ = write!(out, "{}", combine(folded, key));
    }
    Fingerprint(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(pairs: &[(&str, &str)], vectors: &[(&str, &[&str])]) -> JobRequest {
        let mut request = JobRequest::new();
        for (k, v) in pairs {
            request.set(*k, *v).expect("set");
        }
        for (k, vs) in vectors {
            request.set_vector(*k, vs.iter().copied()).expect("set_vector");
        }
        request
    }

    #[test]
    fn fnv1a_reference_values() {
        assert_eq!(hash_str(""), 0xcbf29ce484222325);
        assert_eq!(hash_str("a"), 0xaf63dc4c8601ec8c);
    }

    #[test]
    fn independent_of_insertion_order() {
        let a = request(
            &[("drmaa_remote_command", "/bin/echo"), ("drmaa_wd", "/tmp")],
            &[("drmaa_v_argv", &["hello", "world"]), ("drmaa_v_env", &["A=1"])],
        );
        let b = request(
            &[("drmaa_wd", "/tmp"), ("drmaa_remote_command", "/bin/echo")],
            &[("drmaa_v_env", &["A=1"]), ("drmaa_v_argv", &["hello", "world"])],
        );
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn vector_order_is_significant() {
        let a = request(&[], &[("drmaa_v_argv", &["hello", "world"])]);
        let b = request(&[], &[("drmaa_v_argv", &["world", "hello"])]);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn values_and_keys_both_matter() {
        let base = fingerprint(&request(&[("drmaa_remote_command", "/bin/true")], &[]));
        let other_value = fingerprint(&request(&[("drmaa_remote_command", "/bin/false")], &[]));
        let other_key = fingerprint(&request(&[("drmaa_job_name", "/bin/true")], &[]));
        assert_ne!(base, other_value);
        assert_ne!(base, other_key);
    }

    #[test]
    fn single_attribute_matches_formula() {
        let fp = fingerprint(&request(&[("k", "v")], &[]));
        let expected = hash_str("v")
            .wrapping_mul(31)
            .wrapping_add(hash_str("k"));
        assert_eq!(fp.as_str(), expected.to_string());
    }

    #[test]
    fn empty_request_has_empty_fingerprint() {
        assert_eq!(fingerprint(&JobRequest::new()).as_str(), "");
    }
}
