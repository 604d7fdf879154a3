//! Canonical serialization for reproducibility fingerprints.
//!
//! Network membership, metrics and tiers feed funding decisions, so every
//! run must be checkable against a previous one. Outputs are serialized to
//! canonical JSON bytes and hashed with xxh64.
//!
//! ## Determinism Guarantees
//!
//! - Stable field order: Struct fields serialize in declaration order
//! - Stable Vec order: callers sort before hashing
//! - No HashMap allowed: Use BTreeMap for maps in hashed data
//! - Floats: callers quantize lengths with [`quantize`] before hashing

use serde::Serialize;
use xxhash_rust::xxh64::xxh64;

use crate::ENGINE_SCHEMA_VERSION;

/// Quantization factor for float normalization (1e-6 length units).
const FLOAT_QUANTIZATION_FACTOR: f64 = 1_000_000.0;

/// Serialize a value to canonical JSON bytes for hashing.
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

/// Fingerprint of a value tagged with the engine schema version.
///
/// Two fingerprints are only comparable when produced by the same schema.
pub fn fingerprint<T: Serialize>(kind: &str, value: &T) -> String {
    canonical_hash_hex(&(ENGINE_SCHEMA_VERSION, kind, value))
}

/// Quantize a float to an i64 so hashes do not depend on float formatting.
pub fn quantize(value: f64) -> i64 {
    (value * FLOAT_QUANTIZATION_FACTOR).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Span {
        segment: u64,
        length: i64,
    }

    #[test]
    fn test_determinism() {
        let s = Span { segment: 7, length: quantize(1.25) };

        let h1 = canonical_hash(&s);
        let h2 = canonical_hash(&s);
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_fingerprint_depends_on_kind() {
        let value = vec![1u64, 2, 3];
        assert_ne!(fingerprint("cut", &value), fingerprint("tiers", &value));
        assert_eq!(fingerprint("cut", &value), fingerprint("cut", &value));
    }

    #[test]
    fn test_quantize_absorbs_float_noise() {
        assert_eq!(quantize(0.1 + 0.2), quantize(0.3));
    }
}
