//! Canonical serialization for deterministic hashing.
//!
//! Used for configuration fingerprints, checkpoint manifests and the
//! colour-refinement signatures of the isomorphism filters.
//!
//! ## Determinism Guarantees
//!
//! - Stable field order: Struct fields serialize in declaration order
//! - Stable Vec order: Vectors serialize in index order
//! - No HashMap allowed: Use BTreeMap for maps in hashed data
//! - Blank labels never reach [`term_hash`]; callers substitute colours

use serde::Serialize;
use std::hash::Hasher;
use xxhash_rust::xxh64::{xxh64, Xxh64};

use crate::types::{Sample, Term};

/// Serialize a value to canonical JSON bytes for hashing.
///
/// This function produces deterministic output for the same input,
/// suitable for hash computation and replay verification.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).expect("Canonical serialization failed")
}

/// Compute canonical hash of a serializable value.
pub fn canonical_hash<T: Serialize>(value: &T) -> u64 {
    let bytes = to_canonical_bytes(value);
    xxh64(&bytes, 0)
}

/// Compute canonical hash and return as hex string.
pub fn canonical_hash_hex<T: Serialize>(value: &T) -> String {
    format!("{:016x}", canonical_hash(value))
}

/// Blank-insensitive fingerprint of a sample.
///
/// Blank terms contribute only their position and statements are combined
/// with a commutative sum, so isomorphic samples always share a fingerprint.
/// Equal fingerprints are a necessary, not sufficient, condition for
/// isomorphism.
pub fn shape_fingerprint(sample: &Sample) -> u64 {
    sample.iter().fold(0u64, |acc, statement| {
        let parts = statement.terms().map(term_hash);
        acc.wrapping_add(combine_hashes(&parts))
    })
}

/// Hash of a single term. Blank terms all hash to the same value.
pub fn term_hash(term: &Term) -> u64 {
    let mut hasher = Xxh64::new(0);
    match term {
        Term::Iri { value } => {
            hasher.write_u8(0);
            hasher.write(value.as_bytes());
        }
        Term::Blank { .. } => {
            hasher.write_u8(1);
        }
        Term::Literal {
            value,
            datatype,
            language,
        } => {
            hasher.write_u8(2);
            hasher.write(value.as_bytes());
            hasher.write_u8(0xff);
            if let Some(dt) = datatype {
                hasher.write(dt.as_bytes());
            }
            hasher.write_u8(0xff);
            if let Some(lang) = language {
                hasher.write(lang.as_bytes());
            }
        }
    }
    hasher.finish()
}

/// Combine a sequence of hashes into one, order-sensitive.
pub fn combine_hashes(parts: &[u64]) -> u64 {
    let mut hasher = Xxh64::new(0);
    for part in parts {
        hasher.write_u64(*part);
    }
    hasher.finish()
}
