//! Precision tiers for sub-locations.
//!
//! A chapter title is classified by ordered keyword rules, then located with
//! the strategy for its tier. A strategy that lacks data hands off to the next
//! coarser tier, ending at the site center.

use super::dataset::Site;
use super::poi::{Poi, PoiKind};
use crate::config::TierAccuracy;
use crate::geo::{centroid, haversine_distance, offset_meters, Coordinate};
use serde::{Deserialize, Serialize};

/// Share of the POI-to-center vector applied as the interior offset.
const INTERIOR_PULL: f64 = 0.1;
/// Cap on the interior offset toward the site center, meters.
const INTERIOR_PULL_MAX_M: f64 = 15.0;
/// Shift applied per directional keyword, meters.
const DIRECTION_NUDGE_M: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrecisionTier {
    EntranceGate,
    BuildingInterior,
    AreaGeneral,
    Fallback,
}

impl PrecisionTier {
    /// The next coarser tier, or `None` past the fallback.
    pub fn degrade(self) -> Option<Self> {
        match self {
            Self::EntranceGate => Some(Self::BuildingInterior),
            Self::BuildingInterior => Some(Self::AreaGeneral),
            Self::AreaGeneral => Some(Self::Fallback),
            Self::Fallback => None,
        }
    }
}

/// Patterns in one language that select one tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierRule {
    pub language: String,
    pub tier: PrecisionTier,
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guidance {
    pub approach: String,
    pub arrival: String,
    pub fallback: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierResult {
    /// Tier the title was classified into.
    pub requested: PrecisionTier,
    /// Tier whose strategy actually produced the coordinate.
    pub tier: PrecisionTier,
    pub coordinate: Coordinate,
    pub accuracy_m: f64,
    /// Name of the point the coordinate refers to.
    pub target: String,
    pub guidance: Guidance,
}

impl TierResult {
    pub fn degraded(&self) -> bool {
        self.requested != self.tier
    }
}

#[derive(Debug, Clone)]
pub struct TierRouter {
    rules: Vec<TierRule>,
    accuracy: TierAccuracy,
}

impl TierRouter {
    pub fn new(rules: Vec<TierRule>, accuracy: TierAccuracy) -> Self {
        Self { rules, accuracy }
    }

    pub fn accuracy_for(&self, tier: PrecisionTier) -> f64 {
        match tier {
            PrecisionTier::EntranceGate => self.accuracy.entrance_gate_m,
            PrecisionTier::BuildingInterior => self.accuracy.building_interior_m,
            PrecisionTier::AreaGeneral => self.accuracy.area_general_m,
            PrecisionTier::Fallback => self.accuracy.fallback_m,
        }
    }

    /// Classify a title. Rules in the request language are tried first, then
    /// the rest, each in table order. Default is `BuildingInterior`.
    pub fn classify(&self, title: &str, language: &str) -> PrecisionTier {
        let text = title.to_lowercase();
        let own = self.rules.iter().filter(|r| r.language == language);
        let others = self.rules.iter().filter(|r| r.language != language);
        own.chain(others)
            .find(|rule| rule.patterns.iter().any(|p| text.contains(&p.to_lowercase())))
            .map(|rule| rule.tier)
            .unwrap_or(PrecisionTier::BuildingInterior)
    }

    /// Run the strategy for `tier`, degrading one tier at a time until one
    /// has the data it needs. Never fails: the site center always exists.
    pub fn locate(
        &self,
        tier: PrecisionTier,
        site: &Site,
        poi: Option<&Poi>,
        title: &str,
        language: &str,
    ) -> TierResult {
        let mut current = tier;
        let (coordinate, target) = loop {
            if let Some(found) = self.try_strategy(current, site, poi, title) {
                break found;
            }
            match current.degrade() {
                Some(next) => current = next,
                None => break (site.center, site.display_name().to_string()),
            }
        };
        if current != tier {
            tracing::debug!(title, requested = ?tier, used = ?current, "tier degraded");
        }
        TierResult {
            requested: tier,
            tier: current,
            coordinate,
            accuracy_m: self.accuracy_for(current),
            guidance: guidance(current, &target, language),
            target,
        }
    }

    fn try_strategy(
        &self,
        tier: PrecisionTier,
        site: &Site,
        poi: Option<&Poi>,
        title: &str,
    ) -> Option<(Coordinate, String)> {
        match tier {
            // A matched non-gate POI has no entrance of its own; the site's
            // main entrance would place it at the wrong building.
            PrecisionTier::EntranceGate => match poi {
                Some(p) if p.kind == PoiKind::Gate => Some((p.coordinate, p.name.clone())),
                Some(_) => None,
                None => site.entrance.map(|e| (e, site.display_name().to_string())),
            },
            PrecisionTier::BuildingInterior => {
                let p = poi?;
                Some((interior_point(p.coordinate, site.center, title), p.name.clone()))
            }
            PrecisionTier::AreaGeneral => {
                let points: Vec<Coordinate> = match poi {
                    Some(p) => site
                        .pois
                        .iter()
                        .map(|q| q.coordinate)
                        .filter(|c| haversine_distance(*c, p.coordinate) <= self.accuracy.area_general_m)
                        .collect(),
                    None => site.pois.iter().map(|q| q.coordinate).collect(),
                };
                let target = poi.map_or_else(|| site.display_name().to_string(), |p| p.name.clone());
                centroid(&points).map(|c| (c, target))
            }
            PrecisionTier::Fallback => Some((site.center, site.display_name().to_string())),
        }
    }
}

/// Pull a building reference point slightly toward the site center, then
/// apply directional nudges named in the title.
fn interior_point(reference: Coordinate, center: Coordinate, title: &str) -> Coordinate {
    let distance = haversine_distance(reference, center);
    let (mut north, mut east) = (0.0, 0.0);
    if distance > 0.0 {
        let pull = (distance * INTERIOR_PULL).min(INTERIOR_PULL_MAX_M);
        let step = offset_meters(reference, 1.0, 0.0);
        let m_per_deg_lat = haversine_distance(reference, step) / (step.lat - reference.lat);
        let step = offset_meters(reference, 0.0, 1.0);
        let m_per_deg_lng = haversine_distance(reference, step) / (step.lng - reference.lng);
        let dn = (center.lat - reference.lat) * m_per_deg_lat;
        let de = (center.lng - reference.lng) * m_per_deg_lng;
        let norm = (dn * dn + de * de).sqrt();
        if norm > 0.0 {
            north += dn / norm * pull;
            east += de / norm * pull;
        }
    }
    let text = title.to_lowercase();
    for (words, dn, de) in DIRECTIONS {
        if words.iter().any(|w| text.contains(w)) {
            north += dn * DIRECTION_NUDGE_M;
            east += de * DIRECTION_NUDGE_M;
        }
    }
    offset_meters(reference, north, east)
}

const DIRECTIONS: [(&[&str], f64, f64); 4] = [
    (&["north", "북쪽", "북측", "北"], 1.0, 0.0),
    (&["south", "남쪽", "남측", "南"], -1.0, 0.0),
    (&["east", "동쪽", "동측", "東", "东"], 0.0, 1.0),
    (&["west", "서쪽", "서측", "西"], 0.0, -1.0),
];

fn guidance(tier: PrecisionTier, target: &str, language: &str) -> Guidance {
    let g = |a: String, b: String, c: String| Guidance { approach: a, arrival: b, fallback: c };
    if language == "ko" {
        match tier {
            PrecisionTier::EntranceGate => g(
                format!("{} 입구 방향으로 이동하세요.", target),
                "문 앞에 도착하면 안내가 시작됩니다.".into(),
                "입구가 닫혀 있으면 가까운 매표소나 안내소에 문의하세요.".into(),
            ),
            PrecisionTier::BuildingInterior => g(
                format!("{} 건물 쪽으로 걸어가세요.", target),
                "건물 정면이 보이면 도착한 것입니다.".into(),
                "건물을 찾기 어려우면 현장 안내판을 확인하세요.".into(),
            ),
            PrecisionTier::AreaGeneral => g(
                format!("{} 일대로 이동하세요.", target),
                "이 구역 어디에서나 안내를 들을 수 있습니다.".into(),
                "주변 안내도를 참고해 구역을 찾으세요.".into(),
            ),
            PrecisionTier::Fallback => g(
                format!("{} 중심부로 이동하세요.", target),
                "정확한 위치가 확인되지 않아 대략적인 위치입니다.".into(),
                "현장 직원에게 위치를 문의하세요.".into(),
            ),
        }
    } else {
        match tier {
            PrecisionTier::EntranceGate => g(
                format!("Head to the entrance of {}.", target),
                "You have arrived when you reach the gate.".into(),
                "If the entrance is closed, ask at the nearest ticket office or information desk.".into(),
            ),
            PrecisionTier::BuildingInterior => g(
                format!("Walk toward {}.", target),
                "You have arrived when the building front is in view.".into(),
                "If you cannot find the building, check the on-site signs.".into(),
            ),
            PrecisionTier::AreaGeneral => g(
                format!("Make your way to the {} area.", target),
                "Anywhere in this area is fine for this chapter.".into(),
                "Use the site map to find the area.".into(),
            ),
            PrecisionTier::Fallback => g(
                format!("Go to the center of {}.", target),
                "This is an approximate position; the exact spot is not known.".into(),
                "Ask site staff for directions.".into(),
            ),
        }
    }
}
