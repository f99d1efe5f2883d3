//! Fusion of independent source coordinates into one estimate.

use super::types::{CandidateCoordinate, QualityLevel, VerificationStatus};
use crate::config::ConsensusConfig;
use crate::geo::{haversine_distance, Coordinate};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConsensusError {
    /// Nothing to fuse. Callers fall back to the tier strategy instead of
    /// reporting a made-up coordinate.
    #[error("no candidate coordinates to fuse")]
    NoCandidates,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsensusResult {
    pub coordinate: Coordinate,
    pub candidates: Vec<CandidateCoordinate>,
    /// Largest pairwise distance between candidates, meters.
    pub spread_m: f64,
    pub average_confidence: f64,
    pub quality_score: f64,
    pub accuracy_m: f64,
    pub verification: VerificationStatus,
    pub quality_level: QualityLevel,
    pub reasoning: Vec<String>,
}

/// Confidence-weighted centroid; plain mean when every weight is zero.
fn weighted_centroid(candidates: &[CandidateCoordinate]) -> Coordinate {
    let total: f64 = candidates.iter().map(|c| c.confidence).sum();
    if total <= 0.0 {
        let n = candidates.len() as f64;
        return Coordinate {
            lat: candidates.iter().map(|c| c.coordinate.lat).sum::<f64>() / n,
            lng: candidates.iter().map(|c| c.coordinate.lng).sum::<f64>() / n,
        };
    }
    Coordinate {
        lat: candidates.iter().map(|c| c.coordinate.lat * c.confidence).sum::<f64>() / total,
        lng: candidates.iter().map(|c| c.coordinate.lng * c.confidence).sum::<f64>() / total,
    }
}

fn max_pairwise_distance(candidates: &[CandidateCoordinate]) -> f64 {
    let mut max = 0.0_f64;
    for (i, a) in candidates.iter().enumerate() {
        for b in &candidates[i + 1..] {
            max = max.max(haversine_distance(a.coordinate, b.coordinate));
        }
    }
    max
}

/// 1 within tolerance, 0 at or beyond the cutoff, linear in between.
fn agreement_factor(spread_m: f64, config: &ConsensusConfig) -> f64 {
    if spread_m <= config.agreement_tolerance_m {
        1.0
    } else if spread_m >= config.agreement_cutoff_m {
        0.0
    } else {
        1.0 - (spread_m - config.agreement_tolerance_m)
            / (config.agreement_cutoff_m - config.agreement_tolerance_m)
    }
}

pub fn classify_quality(quality: f64, accuracy_m: f64, config: &ConsensusConfig) -> QualityLevel {
    if quality > config.verified_threshold && accuracy_m <= config.agreement_tolerance_m {
        QualityLevel::Excellent
    } else if quality >= 0.5 && accuracy_m <= 50.0 {
        QualityLevel::Good
    } else if quality < 0.2 || accuracy_m > config.agreement_cutoff_m {
        QualityLevel::NeedsReview
    } else {
        QualityLevel::Estimated
    }
}

/// Fuse `candidates` (one per source) into a single coordinate.
pub fn build_consensus(
    candidates: &[CandidateCoordinate],
    config: &ConsensusConfig,
) -> Result<ConsensusResult, ConsensusError> {
    if candidates.is_empty() {
        return Err(ConsensusError::NoCandidates);
    }
    let n = candidates.len();
    let coordinate = weighted_centroid(candidates);
    let spread_m = max_pairwise_distance(candidates);
    let average_confidence = candidates.iter().map(|c| c.confidence).sum::<f64>() / n as f64;

    let coverage = (n as f64 / config.coverage_sources).min(1.0);
    let agreement = agreement_factor(spread_m, config);
    let quality_score = (coverage * average_confidence * agreement).clamp(0.0, 1.0);

    let accuracy_m = if n == 1 {
        candidates[0].accuracy_m.max(1.0)
    } else {
        spread_m.max(1.0)
    };
    let verification = if quality_score > config.verified_threshold {
        VerificationStatus::Verified
    } else {
        VerificationStatus::Estimated
    };
    let quality_level = classify_quality(quality_score, accuracy_m, config);

    let names: Vec<String> = candidates.iter().map(|c| c.source.to_string()).collect();
    let reasoning = vec![
        format!("{} source(s): {}", n, names.join(", ")),
        format!("sources agree within {:.1} m", spread_m),
        format!("quality {:.2} ({})", quality_score, verification),
    ];

    Ok(ConsensusResult {
        coordinate,
        candidates: candidates.to_vec(),
        spread_m,
        average_confidence,
        quality_score,
        accuracy_m,
        verification,
        quality_level,
        reasoning,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::offset_meters;
    use crate::location::types::SourceId;
    use approx::assert_relative_eq;

    const BASE: Coordinate = Coordinate { lat: 37.579617, lng: 126.977041 };

    fn cand(coord: Coordinate, source: SourceId, confidence: f64) -> CandidateCoordinate {
        CandidateCoordinate::new(coord, source, confidence, 8.0)
    }

    #[test]
    fn test_zero_candidates_fails() {
        let err = build_consensus(&[], &ConsensusConfig::default()).unwrap_err();
        assert_eq!(err, ConsensusError::NoCandidates);
    }

    #[test]
    fn test_three_agreeing_sources_verified() {
        let cands = [
            cand(BASE, SourceId::Gazetteer, 1.0),
            cand(offset_meters(BASE, 3.0, 0.0), SourceId::Google, 0.95),
            cand(offset_meters(BASE, 0.0, 4.0), SourceId::Nominatim, 0.9),
        ];
        let r = build_consensus(&cands, &ConsensusConfig::default()).unwrap();
        assert!(r.spread_m < 5.5);
        assert!(r.quality_score > 0.9, "quality {}", r.quality_score);
        assert_eq!(r.verification, VerificationStatus::Verified);
        assert_eq!(r.quality_level, QualityLevel::Excellent);
        assert!(r.accuracy_m >= 1.0);
    }

    #[test]
    fn test_three_disagreeing_sources_estimated() {
        let cands = [
            cand(BASE, SourceId::Gazetteer, 1.0),
            cand(offset_meters(BASE, 250.0, 0.0), SourceId::Google, 0.95),
            cand(offset_meters(BASE, 0.0, 120.0), SourceId::Nominatim, 0.9),
        ];
        let r = build_consensus(&cands, &ConsensusConfig::default()).unwrap();
        assert_eq!(r.verification, VerificationStatus::Estimated);
        assert!(r.spread_m > 200.0);
        assert_relative_eq!(r.accuracy_m, r.spread_m);
        assert_eq!(r.quality_level, QualityLevel::NeedsReview);
    }

    #[test]
    fn test_identical_points_floor_accuracy() {
        let cands = [cand(BASE, SourceId::Google, 0.9), cand(BASE, SourceId::Nominatim, 0.8)];
        let r = build_consensus(&cands, &ConsensusConfig::default()).unwrap();
        assert_eq!(r.spread_m, 0.0);
        assert_eq!(r.accuracy_m, 1.0);
    }

    #[test]
    fn test_single_source_uses_its_accuracy() {
        let r = build_consensus(&[cand(BASE, SourceId::Curated, 0.95)], &ConsensusConfig::default()).unwrap();
        assert_eq!(r.accuracy_m, 8.0);
        assert_relative_eq!(r.coordinate.lat, BASE.lat, epsilon = 1e-12);
        assert_relative_eq!(r.coordinate.lng, BASE.lng, epsilon = 1e-12);
        assert_eq!(r.verification, VerificationStatus::Estimated);
        assert!((0.0..=1.0).contains(&r.quality_score));
    }

    #[test]
    fn test_weighted_centroid() {
        let a = Coordinate { lat: 0.0, lng: 0.0 };
        let b = Coordinate { lat: 1.0, lng: 1.0 };
        let c = weighted_centroid(&[cand(a, SourceId::Google, 0.75), cand(b, SourceId::Nominatim, 0.25)]);
        assert_relative_eq!(c.lat, 0.25);
        assert_relative_eq!(c.lng, 0.25);

        let zero = weighted_centroid(&[cand(a, SourceId::Google, 0.0), cand(b, SourceId::Nominatim, 0.0)]);
        assert_relative_eq!(zero.lat, 0.5);
    }

    #[test]
    fn test_agreement_factor_is_linear() {
        let config = ConsensusConfig::default();
        assert_eq!(agreement_factor(5.0, &config), 1.0);
        assert_eq!(agreement_factor(500.0, &config), 0.0);
        assert_relative_eq!(agreement_factor(105.0, &config), 0.5);
    }

    #[test]
    fn test_confidence_stays_in_unit_range() {
        let cands: Vec<_> = (0..6)
            .map(|i| cand(offset_meters(BASE, i as f64, 0.0), SourceId::Google, 1.0))
            .collect();
        let r = build_consensus(&cands, &ConsensusConfig::default()).unwrap();
        assert!(r.quality_score <= 1.0);
        assert!(r.average_confidence <= 1.0);
    }
}
