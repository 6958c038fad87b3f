//! Canonical cache keys for specification maps.
//!
//! Two semantically equal spec maps (same key/value pairs, any insertion
//! order, any key casing) must produce the identical fingerprint, and the
//! encoding must be stable across process restarts. Canonicalization
//! therefore sorts the normalized pairs instead of relying on map iteration
//! order, and the cache key is a sha256 digest of the canonical form.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

/// Specification map: field name → raw value.
pub type SpecMap = HashMap<String, String>;

/// Canonical, order-independent key derived from a specification map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    digest: String,
    canonical: String,
}

impl Fingerprint {
    /// Hex sha256 digest used as the cache key.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Human-readable canonical form, kept for diagnostics and logging.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// Fingerprint an arbitrary label (export keys: item code + syntax).
    /// Routed through the same canonicalization as spec maps.
    pub fn of_label(label: &str) -> Fingerprint {
        let mut map = SpecMap::new();
        map.insert("label".to_string(), label.to_string());
        encode(&map)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.digest)
    }
}

/// Encode a specification map into its fingerprint.
///
/// Total and pure: never fails, and an empty (or all-blank-key) map encodes
/// to the defined empty fingerprint. Keys are lowercased and trimmed, values
/// trimmed, pairs sorted by key then value, joined deterministically.
pub fn encode(spec: &SpecMap) -> Fingerprint {
    let mut pairs: Vec<(String, String)> = spec
        .iter()
        .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect();
    pairs.sort();

    let canonical = pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("|");

    let digest = format!("{:x}", Sha256::digest(canonical.as_bytes()));

    Fingerprint { digest, canonical }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(pairs: &[(&str, &str)]) -> SpecMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_encode_order_independent() {
        let m1 = spec(&[("series", "12"), ("bore", "050"), ("stroke", "0146")]);
        let m2 = spec(&[("stroke", "0146"), ("series", "12"), ("bore", "050")]);
        assert_eq!(encode(&m1), encode(&m2));
    }

    #[test]
    fn test_encode_key_case_independent() {
        let m1 = spec(&[("Series", "12"), ("BORE", "050")]);
        let m2 = spec(&[("series", "12"), ("bore", "050")]);
        assert_eq!(encode(&m1), encode(&m2));
    }

    #[test]
    fn test_encode_trims_values() {
        let m1 = spec(&[("series", "  12  ")]);
        let m2 = spec(&[("series", "12")]);
        assert_eq!(encode(&m1), encode(&m2));
    }

    #[test]
    fn test_value_case_is_significant() {
        // Only keys are case-normalized; values keep their casing.
        let m1 = spec(&[("type", "f")]);
        let m2 = spec(&[("type", "F")]);
        assert_ne!(encode(&m1), encode(&m2));
    }

    #[test]
    fn test_empty_map_defined() {
        let empty = encode(&SpecMap::new());
        assert_eq!(empty.canonical(), "");
        // sha256 of the empty string, fixed for all time
        assert_eq!(
            empty.digest(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_blank_keys_ignored() {
        let m = spec(&[("  ", "junk")]);
        assert_eq!(encode(&m), encode(&SpecMap::new()));
    }

    #[test]
    fn test_canonical_form_readable() {
        let m = spec(&[("Series", "12"), ("bore", "050")]);
        assert_eq!(encode(&m).canonical(), "bore=050|series=12");
    }

    #[test]
    fn test_distinct_specs_distinct_fingerprints() {
        let m1 = spec(&[("bore", "050")]);
        let m2 = spec(&[("bore", "063")]);
        assert_ne!(encode(&m1).digest(), encode(&m2).digest());
    }

    #[test]
    fn test_label_fingerprint_stable() {
        let a = Fingerprint::of_label("CYL-001/turtle/depth=0");
        let b = Fingerprint::of_label("CYL-001/turtle/depth=0");
        assert_eq!(a, b);
        assert_ne!(a, Fingerprint::of_label("CYL-001/rdfxml/depth=0"));
    }
}
