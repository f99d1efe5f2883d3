//! Quality metrics, alert levels and recommendations for resolved locations,
//! with a short per-location history for trend detection.

use super::types::{ResolvedLocation, VerificationStatus};
use crate::config::QualityThresholds;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Relative change below which a metric counts as stable.
const STABLE_BAND: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Accuracy,
    Freshness,
    SourceReliability,
    ConsensusScore,
}

impl Metric {
    fn lower_is_better(self) -> bool {
        matches!(self, Self::Accuracy | Self::Freshness)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityMetrics {
    pub accuracy_m: f64,
    pub freshness_days: f64,
    /// Confidence-weighted mean of the contributing sources' base weights.
    pub source_reliability: f64,
    pub consensus_score: f64,
    pub source_count: usize,
    pub verification: VerificationStatus,
    pub alert_level: AlertLevel,
}

impl QualityMetrics {
    fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Accuracy => self.accuracy_m,
            Metric::Freshness => self.freshness_days,
            Metric::SourceReliability => self.source_reliability,
            Metric::ConsensusScore => self.consensus_score,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricTrend {
    pub metric: Metric,
    pub direction: Trend,
    pub change: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub location_id: String,
    pub metrics: QualityMetrics,
    /// Empty until two assessments exist for the location.
    pub trends: Vec<MetricTrend>,
    pub recommendations: Vec<String>,
}

/// Per-location snapshots plus assessment recency, most recent last.
#[derive(Default)]
struct History {
    snapshots: HashMap<String, VecDeque<QualityMetrics>>,
    recency: VecDeque<String>,
}

impl History {
    /// Append `metrics` for `location_id` and return the previous snapshot.
    /// Evicts the least recently assessed locations beyond `max_locations`.
    fn record(
        &mut self,
        location_id: &str,
        metrics: &QualityMetrics,
        per_location: usize,
        max_locations: usize,
    ) -> Option<QualityMetrics> {
        if let Some(pos) = self.recency.iter().position(|id| id == location_id) {
            self.recency.remove(pos);
        }
        self.recency.push_back(location_id.to_string());

        let entries = self.snapshots.entry(location_id.to_string()).or_default();
        let previous = entries.back().cloned();
        entries.push_back(metrics.clone());
        while entries.len() > per_location {
            entries.pop_front();
        }

        while self.recency.len() > max_locations.max(1) {
            if let Some(evicted) = self.recency.pop_front() {
                self.snapshots.remove(&evicted);
                tracing::debug!(location = %evicted, "quality history evicted");
            }
        }
        previous
    }
}

pub struct QualityManager {
    thresholds: QualityThresholds,
    history: Mutex<History>,
}

impl QualityManager {
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self { thresholds, history: Mutex::new(History::default()) }
    }

    pub fn metrics(&self, resolved: &ResolvedLocation, now: DateTime<Utc>) -> QualityMetrics {
        let freshness_days = ((now - resolved.validated_at).num_seconds().max(0) as f64) / 86_400.0;
        let weight: f64 = resolved.sources.iter().map(|s| s.confidence).sum();
        let source_reliability = if weight > 0.0 {
            resolved
                .sources
                .iter()
                .map(|s| s.confidence * s.source.base_weight())
                .sum::<f64>()
                / weight
        } else {
            0.0
        };
        QualityMetrics {
            accuracy_m: resolved.accuracy_m,
            freshness_days,
            source_reliability,
            consensus_score: resolved.quality_score,
            source_count: resolved.sources.len(),
            verification: resolved.verification,
            alert_level: self.alert_level(resolved.accuracy_m, freshness_days),
        }
    }

    pub fn alert_level(&self, accuracy_m: f64, freshness_days: f64) -> AlertLevel {
        let t = &self.thresholds;
        if accuracy_m > t.acceptable_m || freshness_days > t.stale_days {
            AlertLevel::High
        } else if accuracy_m >= t.precise_m {
            AlertLevel::Medium
        } else {
            AlertLevel::Low
        }
    }

    /// Compute metrics, record them in the location's history and derive
    /// trends and recommendations.
    pub fn assess(&self, resolved: &ResolvedLocation, now: DateTime<Utc>) -> QualityReport {
        let location_id = resolved.candidate.id.clone();
        let metrics = self.metrics(resolved, now);

        let trends = match self.history.lock() {
            Ok(mut history) => history
                .record(
                    &location_id,
                    &metrics,
                    self.thresholds.history_len.max(2),
                    self.thresholds.max_tracked_locations,
                )
                .map(|prev| trends_between(&prev, &metrics))
                .unwrap_or_default(),
            Err(_) => {
                tracing::warn!(location = %location_id, "quality history lock poisoned, skipping trends");
                Vec::new()
            }
        };

        let recommendations = recommendations(&metrics, &trends, &self.thresholds);
        if metrics.alert_level == AlertLevel::High {
            tracing::info!(
                location = %location_id,
                accuracy_m = metrics.accuracy_m,
                freshness_days = metrics.freshness_days,
                "quality alert"
            );
        }
        QualityReport { location_id, metrics, trends, recommendations }
    }

    /// Past assessments for one location, oldest first.
    pub fn history(&self, location_id: &str) -> Vec<QualityMetrics> {
        self.history
            .lock()
            .map(|h| h.snapshots.get(location_id).map(|e| e.iter().cloned().collect()).unwrap_or_default())
            .unwrap_or_default()
    }

    /// Number of locations with recorded history.
    pub fn tracked_locations(&self) -> usize {
        self.history.lock().map(|h| h.snapshots.len()).unwrap_or(0)
    }
}

fn trends_between(previous: &QualityMetrics, current: &QualityMetrics) -> Vec<MetricTrend> {
    [Metric::Accuracy, Metric::Freshness, Metric::SourceReliability, Metric::ConsensusScore]
        .into_iter()
        .map(|metric| {
            let (before, after) = (previous.value(metric), current.value(metric));
            let change = after - before;
            let relative = if before.abs() > f64::EPSILON {
                change.abs() / before.abs()
            } else if change.abs() > f64::EPSILON {
                1.0
            } else {
                0.0
            };
            let direction = if relative < STABLE_BAND {
                Trend::Stable
            } else if (change < 0.0) == metric.lower_is_better() {
                Trend::Improving
            } else {
                Trend::Declining
            };
            MetricTrend { metric, direction, change }
        })
        .collect()
}

/// Actionable follow-ups. Healthy metrics yield none.
pub fn recommendations(metrics: &QualityMetrics, trends: &[MetricTrend], t: &QualityThresholds) -> Vec<String> {
    let mut out = Vec::new();

    if metrics.accuracy_m > t.poor_m {
        out.push(format!(
            "Replace the coordinate: accuracy {:.0} m exceeds {:.0} m",
            metrics.accuracy_m, t.poor_m
        ));
    } else if metrics.accuracy_m > t.acceptable_m {
        out.push(format!(
            "Re-validate against an additional source: accuracy {:.0} m exceeds {:.0} m",
            metrics.accuracy_m, t.acceptable_m
        ));
    }

    if metrics.freshness_days > t.outdated_days {
        out.push("Coordinate has not been validated for over a year; resolve it again".to_string());
    } else if metrics.freshness_days > t.stale_days {
        out.push(format!("Coordinate is older than {:.0} days; schedule re-validation", t.stale_days));
    }

    if metrics.consensus_score < t.low_consensus {
        if metrics.source_count < 2 {
            out.push(format!(
                "Only {} source answered; add a curated or gazetteer record",
                metrics.source_count
            ));
        } else {
            out.push("Sources disagree; review the candidate coordinates manually".to_string());
        }
    }

    let declining = trends.iter().filter(|tr| tr.direction == Trend::Declining).count();
    if declining >= 2 {
        out.push("Multiple quality metrics are declining; review this location".to_string());
    }

    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coordinate;
    use crate::location::types::{
        CandidateCoordinate, LocationCandidate, QualityLevel, ResolutionMethod, SourceId,
    };
    use chrono::Duration;

    fn resolved(accuracy_m: f64, quality: f64, sources: Vec<CandidateCoordinate>, age_days: i64) -> ResolvedLocation {
        let coordinate = Coordinate { lat: 37.5796, lng: 126.977 };
        ResolvedLocation {
            query: "경복궁".into(),
            language: "ko".into(),
            candidate: LocationCandidate {
                id: "gyeongbokgung".into(),
                display_name: "경복궁".into(),
                region: String::new(),
                region_aliases: vec![],
                country: String::new(),
                country_code: Some("KR".into()),
                popularity: 1.0,
                aliases: vec![],
                description: String::new(),
                coordinate: None,
                keywords: vec![],
            },
            coordinate,
            accuracy_m,
            method: ResolutionMethod::Consensus,
            confidence: 0.9,
            reasoning: vec![],
            should_show_alternatives: false,
            alternatives: vec![],
            sources,
            quality_score: quality,
            verification: if quality > 0.8 { VerificationStatus::Verified } else { VerificationStatus::Estimated },
            quality_level: QualityLevel::Good,
            validated_at: Utc::now() - Duration::days(age_days),
            from_cache: false,
        }
    }

    fn three_sources() -> Vec<CandidateCoordinate> {
        let c = Coordinate { lat: 37.5796, lng: 126.977 };
        vec![
            CandidateCoordinate::new(c, SourceId::Gazetteer, 1.0, 1.0),
            CandidateCoordinate::new(c, SourceId::Google, 1.0, 5.0),
            CandidateCoordinate::new(c, SourceId::Nominatim, 1.0, 20.0),
        ]
    }

    #[test]
    fn test_alert_levels() {
        let qm = QualityManager::new(QualityThresholds::default());
        assert_eq!(qm.alert_level(5.0, 0.0), AlertLevel::Low);
        assert_eq!(qm.alert_level(10.0, 0.0), AlertLevel::Medium);
        assert_eq!(qm.alert_level(50.0, 0.0), AlertLevel::Medium);
        assert_eq!(qm.alert_level(50.5, 0.0), AlertLevel::High);
        assert_eq!(qm.alert_level(5.0, 31.0), AlertLevel::High);
    }

    #[test]
    fn test_healthy_result_has_no_recommendations() {
        let qm = QualityManager::new(QualityThresholds::default());
        let report = qm.assess(&resolved(4.0, 0.95, three_sources(), 0), Utc::now());
        assert_eq!(report.metrics.alert_level, AlertLevel::Low);
        assert!(report.recommendations.is_empty(), "{:?}", report.recommendations);
    }

    #[test]
    fn test_source_reliability_is_weighted() {
        let qm = QualityManager::new(QualityThresholds::default());
        let m = qm.metrics(&resolved(4.0, 0.95, three_sources(), 0), Utc::now());
        assert!((m.source_reliability - (1.0 + 0.95 + 0.9) / 3.0).abs() < 1e-9);
        let none = qm.metrics(&resolved(4.0, 0.0, vec![], 0), Utc::now());
        assert_eq!(none.source_reliability, 0.0);
    }

    #[test]
    fn test_poor_and_stale_recommendations() {
        let qm = QualityManager::new(QualityThresholds::default());
        let single = vec![three_sources().remove(1)];
        let report = qm.assess(&resolved(250.0, 0.3, single, 45), Utc::now());
        assert_eq!(report.metrics.alert_level, AlertLevel::High);
        let recs = report.recommendations.join("\n");
        assert!(recs.contains("Replace the coordinate"));
        assert!(recs.contains("older than 30 days"));
        assert!(recs.contains("Only 1 source"));
    }

    #[test]
    fn test_recommendations_are_deterministic() {
        let qm = QualityManager::new(QualityThresholds::default());
        let now = Utc::now();
        let r = resolved(75.0, 0.5, three_sources(), 2);
        let a = recommendations(&qm.metrics(&r, now), &[], &QualityThresholds::default());
        let b = recommendations(&qm.metrics(&r, now), &[], &QualityThresholds::default());
        assert_eq!(a, b);
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn test_trends_detect_decline() {
        let qm = QualityManager::new(QualityThresholds::default());
        let now = Utc::now();
        let first = qm.assess(&resolved(5.0, 0.95, three_sources(), 0), now);
        assert!(first.trends.is_empty());

        let second = qm.assess(&resolved(40.0, 0.5, three_sources(), 0), now);
        let dir = |m: Metric| second.trends.iter().find(|t| t.metric == m).unwrap().direction;
        assert_eq!(dir(Metric::Accuracy), Trend::Declining);
        assert_eq!(dir(Metric::ConsensusScore), Trend::Declining);
        assert_eq!(dir(Metric::SourceReliability), Trend::Stable);
        assert!(second.recommendations.iter().any(|r| r.contains("declining")));
        assert_eq!(qm.history("gyeongbokgung").len(), 2);
    }

    #[test]
    fn test_history_is_bounded() {
        let thresholds = QualityThresholds { history_len: 3, ..Default::default() };
        let qm = QualityManager::new(thresholds);
        for _ in 0..10 {
            qm.assess(&resolved(5.0, 0.95, three_sources(), 0), Utc::now());
        }
        assert_eq!(qm.history("gyeongbokgung").len(), 3);
    }

    #[test]
    fn test_tracked_locations_are_capped() {
        let thresholds = QualityThresholds { max_tracked_locations: 2, ..Default::default() };
        let qm = QualityManager::new(thresholds);
        let at = |id: &str| {
            let mut r = resolved(5.0, 0.95, three_sources(), 0);
            r.candidate.id = id.into();
            r
        };
        qm.assess(&at("a"), Utc::now());
        qm.assess(&at("b"), Utc::now());
        // Touch "a" so "b" becomes the least recently assessed.
        qm.assess(&at("a"), Utc::now());
        qm.assess(&at("c"), Utc::now());

        assert_eq!(qm.tracked_locations(), 2);
        assert_eq!(qm.history("a").len(), 2);
        assert!(qm.history("b").is_empty());
        assert_eq!(qm.history("c").len(), 1);
    }

    #[test]
    fn test_improving_accuracy() {
        let prev = QualityManager::new(QualityThresholds::default())
            .metrics(&resolved(40.0, 0.9, three_sources(), 0), Utc::now());
        let mut cur = prev.clone();
        cur.accuracy_m = 8.0;
        let trends = trends_between(&prev, &cur);
        assert_eq!(trends[0].direction, Trend::Improving);
    }
}
