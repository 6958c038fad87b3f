//! Similarity scoring between a query specification and catalog entries.
//!
//! Discrete fields contribute their full weight on a normalized match and
//! nothing otherwise. Numeric fields decay with relative distance instead
//! of cutting off, so a candidate one bore size away still outranks an
//! unrelated item. The aggregate is the weighted sum normalized by the
//! weights of the fields the query actually carries, which keeps scores in
//! [0, 1] regardless of how sparse the query is.

use crate::config::{ScoringWeights, SearchConfig};
use crate::fingerprint::SpecMap;

/// Scoring parameters, lifted out of [`SearchConfig`] so the scorer can be
/// driven without a full config in tests.
#[derive(Debug, Clone)]
pub struct ScoringParams {
    pub weights: ScoringWeights,
    pub numeric_decay: f64,
}

impl From<&SearchConfig> for ScoringParams {
    fn from(config: &SearchConfig) -> Self {
        Self {
            weights: config.weights.clone(),
            numeric_decay: config.numeric_decay,
        }
    }
}

/// Specification fields the scorer understands. Unknown keys in a spec map
/// are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpecField {
    Series,
    CylinderType,
    Bore,
    Stroke,
    RodEndType,
    InstallationType,
}

impl SpecField {
    /// Map a raw key to a field. Key matching ignores case and `_`/`-`
    /// separators, so `rodEndType`, `rod_end_type` and `RODENDTYPE` are the
    /// same field.
    fn from_key(key: &str) -> Option<SpecField> {
        let normalized: String = key
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "series" => Some(SpecField::Series),
            "type" | "cylindertype" => Some(SpecField::CylinderType),
            "bore" => Some(SpecField::Bore),
            "stroke" => Some(SpecField::Stroke),
            "rodendtype" => Some(SpecField::RodEndType),
            "installationtype" => Some(SpecField::InstallationType),
            _ => None,
        }
    }

    fn weight(self, weights: &ScoringWeights) -> f64 {
        match self {
            SpecField::Series => weights.series,
            SpecField::CylinderType => weights.cylinder_type,
            SpecField::Bore => weights.bore,
            SpecField::Stroke => weights.stroke,
            SpecField::RodEndType => weights.rod_end_type,
            SpecField::InstallationType => weights.installation_type,
        }
    }

    fn is_numeric(self) -> bool {
        matches!(self, SpecField::Bore | SpecField::Stroke)
    }
}

fn lookup<'a>(spec: &'a SpecMap, field: SpecField) -> Option<&'a str> {
    spec.iter()
        .find(|(k, _)| SpecField::from_key(k) == Some(field))
        .map(|(_, v)| v.trim())
        .filter(|v| !v.is_empty())
}

fn discrete_similarity(a: &str, b: &str) -> f64 {
    if a.eq_ignore_ascii_case(b) {
        1.0
    } else {
        0.0
    }
}

/// Distance-decayed similarity for numeric values: exp(-rel_diff / decay)
/// where rel_diff is the difference relative to the larger magnitude.
/// Equal values score 1.0; the score approaches but never reaches 0.
fn numeric_similarity(a: f64, b: f64, decay: f64) -> f64 {
    let scale = a.abs().max(b.abs()).max(1.0);
    let rel_diff = (a - b).abs() / scale;
    (-rel_diff / decay).exp()
}

/// Score a candidate spec against the query spec, in [0, 1].
///
/// Fields present in the query define the denominator; a field missing from
/// the candidate contributes zero. A query with no recognized fields scores
/// zero against everything.
pub fn score(query: &SpecMap, candidate: &SpecMap, params: &ScoringParams) -> f64 {
    const FIELDS: [SpecField; 6] = [
        SpecField::Series,
        SpecField::CylinderType,
        SpecField::Bore,
        SpecField::Stroke,
        SpecField::RodEndType,
        SpecField::InstallationType,
    ];

    let mut weight_total = 0.0;
    let mut weighted_score = 0.0;

    for field in FIELDS {
        let weight = field.weight(&params.weights);
        if weight <= 0.0 {
            continue;
        }
        let Some(query_value) = lookup(query, field) else {
            continue;
        };
        weight_total += weight;

        let Some(candidate_value) = lookup(candidate, field) else {
            continue;
        };

        let similarity = if field.is_numeric() {
            match (query_value.parse::<f64>(), candidate_value.parse::<f64>()) {
                (Ok(a), Ok(b)) => numeric_similarity(a, b, params.numeric_decay),
                // Non-numeric sizes fall back to discrete comparison
                _ => discrete_similarity(query_value, candidate_value),
            }
        } else {
            discrete_similarity(query_value, candidate_value)
        };
        weighted_score += weight * similarity;
    }

    if weight_total <= 0.0 {
        0.0
    } else {
        (weighted_score / weight_total).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ScoringParams {
        ScoringParams {
            weights: ScoringWeights {
                series: 0.25,
                cylinder_type: 0.20,
                bore: 0.20,
                stroke: 0.15,
                rod_end_type: 0.10,
                installation_type: 0.10,
            },
            numeric_decay: 0.25,
        }
    }

    fn spec(pairs: &[(&str, &str)]) -> SpecMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn reference_query() -> SpecMap {
        spec(&[
            ("series", "12"),
            ("type", "F"),
            ("bore", "050"),
            ("stroke", "0146"),
            ("rodEndType", "Y"),
        ])
    }

    #[test]
    fn test_identical_spec_scores_one() {
        let query = reference_query();
        let candidate = query.clone();
        assert!((score(&query, &candidate, &params()) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_bore_off_by_one_size_partial_score() {
        let query = reference_query();
        let mut candidate = query.clone();
        candidate.insert("bore".to_string(), "063".to_string());

        let s = score(&query, &candidate, &params());
        // Strictly between a sane exclusion threshold and a perfect match
        assert!(s > 0.3, "score {} should beat the threshold", s);
        assert!(s < 1.0, "score {} must not be perfect", s);
    }

    #[test]
    fn test_closer_bore_ranks_higher() {
        let query = reference_query();
        let mut near = query.clone();
        near.insert("bore".to_string(), "063".to_string());
        let mut far = query.clone();
        far.insert("bore".to_string(), "125".to_string());

        let s_near = score(&query, &near, &params());
        let s_far = score(&query, &far, &params());
        assert!(s_near > s_far);
        // Distance decay, never a hard cutoff
        assert!(s_far > 0.0);
    }

    #[test]
    fn test_discrete_mismatch_drops_weight_entirely() {
        let query = reference_query();
        let mut candidate = query.clone();
        candidate.insert("series".to_string(), "16".to_string());

        let expected = 1.0 - 0.25 / 0.90; // series weight lost, denominator 0.90
        assert!((score(&query, &candidate, &params()) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_discrete_match_case_insensitive() {
        let query = spec(&[("type", "f")]);
        let candidate = spec(&[("type", "F")]);
        assert!((score(&query, &candidate, &params()) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_field_key_aliases() {
        let query = spec(&[("rod_end_type", "Y")]);
        let candidate = spec(&[("rodEndType", "Y")]);
        assert!((score(&query, &candidate, &params()) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_candidate_missing_field_scores_zero_for_it() {
        let query = spec(&[("series", "12"), ("bore", "050")]);
        let candidate = spec(&[("series", "12")]);
        let expected = 0.25 / 0.45;
        assert!((score(&query, &candidate, &params()) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let query = spec(&[("series", "12"), ("color", "red")]);
        let candidate = spec(&[("series", "12"), ("color", "blue")]);
        assert!((score(&query, &candidate, &params()) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_query_scores_zero() {
        let query = SpecMap::new();
        let candidate = reference_query();
        assert_eq!(score(&query, &candidate, &params()), 0.0);
    }

    #[test]
    fn test_numeric_similarity_monotone_in_distance() {
        assert!(numeric_similarity(50.0, 50.0, 0.25) > numeric_similarity(50.0, 63.0, 0.25));
        assert!(numeric_similarity(50.0, 63.0, 0.25) > numeric_similarity(50.0, 100.0, 0.25));
        assert!((numeric_similarity(50.0, 50.0, 0.25) - 1.0).abs() < 1e-12);
    }
}
