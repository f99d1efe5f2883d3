//! Bundles a resolved site and its chapter coordinates for a map view.

use super::poi::SubLocationMatch;
use super::quality::QualityReport;
use super::tiers::{PrecisionTier, TierResult};
use super::types::{QualityLevel, ResolvedLocation, VerificationStatus};
use crate::geo::{centroid, Coordinate};
use serde::Serialize;

/// Zoom used when there is nothing to frame.
const DEFAULT_ZOOM: u8 = 15;

/// Where one chapter is and how that was decided.
#[derive(Debug, Clone, Serialize)]
pub struct ChapterCoordinate {
    pub coordinate: Coordinate,
    pub accuracy_m: f64,
    pub tier: TierResult,
    pub poi_match: SubLocationMatch,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackagedChapter {
    pub id: usize,
    pub title: String,
    pub coordinate_result: ChapterCoordinate,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityOverview {
    pub quality_score: f64,
    pub quality_level: QualityLevel,
    pub verification: VerificationStatus,
    pub confidence: f64,
    pub chapter_count: usize,
    pub matched_chapters: usize,
    pub degraded_chapters: usize,
    pub average_chapter_accuracy_m: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationPackage {
    pub location_name: String,
    pub map_center: Coordinate,
    pub recommended_zoom: u8,
    pub location: ResolvedLocation,
    pub chapters: Vec<PackagedChapter>,
    pub quality_overview: QualityOverview,
    pub recommendations: Vec<String>,
}

/// Map zoom that frames every point, from the larger of the lat/lng spans.
pub fn recommended_zoom(points: &[Coordinate]) -> u8 {
    if points.is_empty() {
        return DEFAULT_ZOOM;
    }
    let (mut min_lat, mut max_lat) = (f64::MAX, f64::MIN);
    let (mut min_lng, mut max_lng) = (f64::MAX, f64::MIN);
    for p in points {
        min_lat = min_lat.min(p.lat);
        max_lat = max_lat.max(p.lat);
        min_lng = min_lng.min(p.lng);
        max_lng = max_lng.max(p.lng);
    }
    let span = (max_lat - min_lat).max(max_lng - min_lng);
    match span {
        s if s > 0.1 => 11,
        s if s > 0.05 => 12,
        s if s > 0.02 => 13,
        s if s > 0.01 => 14,
        s if s > 0.005 => 15,
        s if s > 0.002 => 16,
        _ => 17,
    }
}

/// Assemble the package. Chapter ids follow input order.
pub fn package(
    resolved: &ResolvedLocation,
    report: Option<&QualityReport>,
    chapters: Vec<(String, ChapterCoordinate)>,
) -> LocationPackage {
    let chapters: Vec<PackagedChapter> = chapters
        .into_iter()
        .enumerate()
        .map(|(id, (title, coordinate_result))| PackagedChapter { id, title, coordinate_result })
        .collect();

    let points: Vec<Coordinate> = chapters.iter().map(|c| c.coordinate_result.coordinate).collect();
    let map_center = centroid(&points).unwrap_or(resolved.coordinate);
    let recommended_zoom = recommended_zoom(&points);

    let matched_chapters = chapters.iter().filter(|c| c.coordinate_result.poi_match.is_match()).count();
    let degraded_chapters = chapters.iter().filter(|c| c.coordinate_result.tier.degraded()).count();
    let average_chapter_accuracy_m = if chapters.is_empty() {
        0.0
    } else {
        chapters.iter().map(|c| c.coordinate_result.accuracy_m).sum::<f64>() / chapters.len() as f64
    };

    let quality_overview = QualityOverview {
        quality_score: resolved.quality_score,
        quality_level: resolved.quality_level,
        verification: resolved.verification,
        confidence: resolved.confidence,
        chapter_count: chapters.len(),
        matched_chapters,
        degraded_chapters,
        average_chapter_accuracy_m,
    };

    let mut recommendations = report.map(|r| r.recommendations.clone()).unwrap_or_default();
    recommendations.extend(chapter_recommendations(&chapters));
    if resolved.should_show_alternatives && !resolved.alternatives.is_empty() {
        recommendations.push(format!(
            "'{}' is ambiguous; confirm the place with the user",
            resolved.query
        ));
    }
    let mut seen = std::collections::HashSet::new();
    recommendations.retain(|r| seen.insert(r.clone()));

    LocationPackage {
        location_name: resolved.candidate.display_name.clone(),
        map_center,
        recommended_zoom,
        location: resolved.clone(),
        chapters,
        quality_overview,
        recommendations,
    }
}

fn chapter_recommendations(chapters: &[PackagedChapter]) -> Vec<String> {
    let mut out = Vec::new();
    let unmatched: Vec<&str> = chapters
        .iter()
        .filter(|c| !c.coordinate_result.poi_match.is_match())
        .map(|c| c.title.as_str())
        .collect();
    if !unmatched.is_empty() {
        out.push(format!(
            "Add POI keywords for {} unmatched chapter(s): {}",
            unmatched.len(),
            unmatched.join(", ")
        ));
    }
    let at_center = chapters
        .iter()
        .filter(|c| c.coordinate_result.tier.tier == PrecisionTier::Fallback)
        .count();
    if at_center > 0 {
        out.push(format!("{} chapter(s) are placed at the site center; curate their POIs", at_center));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::poi::{MatchMethod, Poi, PoiKind};
    use crate::location::tiers::Guidance;
    use crate::location::types::{LocationCandidate, ResolutionMethod};
    use chrono::Utc;

    fn resolved() -> ResolvedLocation {
        ResolvedLocation {
            query: "경복궁".into(),
            language: "ko".into(),
            candidate: LocationCandidate {
                id: "gyeongbokgung".into(),
                display_name: "경복궁".into(),
                region: "서울".into(),
                region_aliases: vec![],
                country: "대한민국".into(),
                country_code: Some("KR".into()),
                popularity: 1.0,
                aliases: vec![],
                description: String::new(),
                coordinate: None,
                keywords: vec![],
            },
            coordinate: Coordinate { lat: 37.5796, lng: 126.977 },
            accuracy_m: 4.0,
            method: ResolutionMethod::Consensus,
            confidence: 0.93,
            reasoning: vec![],
            should_show_alternatives: false,
            alternatives: vec![],
            sources: vec![],
            quality_score: 0.93,
            verification: VerificationStatus::Verified,
            quality_level: QualityLevel::Excellent,
            validated_at: Utc::now(),
            from_cache: false,
        }
    }

    fn chapter(title: &str, lat: f64, lng: f64, matched: bool, tier: PrecisionTier) -> (String, ChapterCoordinate) {
        let coordinate = Coordinate { lat, lng };
        let poi = matched.then(|| Poi {
            name: title.to_string(),
            coordinate,
            kind: PoiKind::Hall,
            parent_id: "gyeongbokgung".into(),
        });
        let poi_match = SubLocationMatch {
            title: title.to_string(),
            method: poi.as_ref().map(|_| MatchMethod::Direct),
            score: if matched { 1.0 } else { 0.0 },
            keyword: None,
            poi,
        };
        let guidance = Guidance { approach: String::new(), arrival: String::new(), fallback: String::new() };
        let tier = TierResult {
            requested: PrecisionTier::BuildingInterior,
            tier,
            coordinate,
            accuracy_m: 50.0,
            target: title.to_string(),
            guidance,
        };
        (title.to_string(), ChapterCoordinate { coordinate, accuracy_m: 50.0, tier, poi_match })
    }

    #[test]
    fn test_zoom_by_span() {
        assert_eq!(recommended_zoom(&[]), DEFAULT_ZOOM);
        let a = Coordinate { lat: 37.5796, lng: 126.977 };
        assert_eq!(recommended_zoom(&[a]), 17);
        assert_eq!(recommended_zoom(&[a, Coordinate { lat: 37.5866, lng: 126.977 }]), 15);
        assert_eq!(recommended_zoom(&[a, Coordinate { lat: 37.7, lng: 126.977 }]), 11);
    }

    #[test]
    fn test_package_centers_on_chapters() {
        let chapters = vec![
            chapter("근정전", 37.58, 126.976, true, PrecisionTier::BuildingInterior),
            chapter("경회루", 37.582, 126.978, true, PrecisionTier::BuildingInterior),
        ];
        let p = package(&resolved(), None, chapters);
        assert_eq!(p.location_name, "경복궁");
        assert!((p.map_center.lat - 37.581).abs() < 1e-9);
        assert!((p.map_center.lng - 126.977).abs() < 1e-9);
        assert_eq!(p.chapters[1].id, 1);
        assert_eq!(p.quality_overview.matched_chapters, 2);
        assert!(p.recommendations.is_empty(), "{:?}", p.recommendations);
    }

    #[test]
    fn test_package_without_chapters_uses_resolved_coordinate() {
        let r = resolved();
        let p = package(&r, None, vec![]);
        assert_eq!(p.map_center, r.coordinate);
        assert_eq!(p.recommended_zoom, DEFAULT_ZOOM);
        assert_eq!(p.quality_overview.average_chapter_accuracy_m, 0.0);
    }

    #[test]
    fn test_recommendations_are_deduplicated() {
        let chapters = vec![
            chapter("미지의 장소", 37.5796, 126.977, false, PrecisionTier::Fallback),
            chapter("또 다른 곳", 37.5796, 126.977, false, PrecisionTier::Fallback),
        ];
        let report = QualityReport {
            location_id: "gyeongbokgung".into(),
            metrics: crate::location::quality::QualityManager::new(Default::default())
                .metrics(&resolved(), Utc::now()),
            trends: vec![],
            recommendations: vec!["Sources disagree".into(), "Sources disagree".into()],
        };
        let p = package(&resolved(), Some(&report), chapters);
        assert_eq!(p.quality_overview.degraded_chapters, 2);
        assert_eq!(p.recommendations.len(), 3, "{:?}", p.recommendations);
        assert!(p.recommendations[1].contains("2 unmatched"));
        assert!(p.recommendations[2].starts_with("2 chapter(s)"));
    }
}
