//! Chapter title to point-of-interest matching.
//!
//! Cascade: direct name containment, then the site's ordered keyword table,
//! then fuzzy similarity. First stage to produce a match wins.

use super::dataset::Site;
use crate::config::DEFAULT_SIMILARITY_THRESHOLD;
use crate::geo::{string_similarity, Coordinate};
use serde::{Deserialize, Serialize};

const DIRECT_SCORE: f64 = 1.0;
const KEYWORD_SCORE: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoiKind {
    Gate,
    Hall,
    Pavilion,
    Museum,
    Garden,
    #[serde(other)]
    Other,
}

/// A named point inside a site. Curated and immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poi {
    pub name: String,
    pub coordinate: Coordinate,
    #[serde(rename = "type")]
    pub kind: PoiKind,
    /// Filled from the owning site when the dataset loads.
    #[serde(default)]
    pub parent_id: String,
}

/// One row of a site's keyword table: any keyword in a title points at `poi`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoiKeywords {
    pub poi: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Direct,
    Keyword,
    Similarity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubLocationMatch {
    pub title: String,
    pub poi: Option<Poi>,
    pub method: Option<MatchMethod>,
    pub score: f64,
    /// The keyword that triggered a keyword match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
}

impl SubLocationMatch {
    fn none(title: &str) -> Self {
        Self { title: title.to_string(), poi: None, method: None, score: 0.0, keyword: None }
    }

    pub fn is_match(&self) -> bool {
        self.poi.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct PoiMatcher {
    threshold: f64,
}

impl Default for PoiMatcher {
    fn default() -> Self {
        Self { threshold: DEFAULT_SIMILARITY_THRESHOLD }
    }
}

impl PoiMatcher {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Match one chapter title against a site's POIs.
    pub fn match_title(&self, title: &str, site: &Site) -> SubLocationMatch {
        if let Some(m) = direct_match(title, &site.pois) {
            return m;
        }
        if let Some(m) = keyword_match(title, site) {
            return m;
        }
        if let Some(m) = self.similarity_match(title, &site.pois) {
            return m;
        }
        tracing::debug!(title, site = %site.id, "no POI match");
        SubLocationMatch::none(title)
    }

    fn similarity_match(&self, title: &str, pois: &[Poi]) -> Option<SubLocationMatch> {
        let title_key = title.trim().to_lowercase();
        let mut best: Option<(&Poi, f64)> = None;
        for poi in pois {
            let score = string_similarity(&title_key, &poi.name.to_lowercase());
            if score > self.threshold && best.map_or(true, |(_, s)| score > s) {
                best = Some((poi, score));
            }
        }
        best.map(|(poi, score)| SubLocationMatch {
            title: title.to_string(),
            poi: Some(poi.clone()),
            method: Some(MatchMethod::Similarity),
            score,
            keyword: None,
        })
    }
}

/// Counter words that turn a leading number into a chapter ordinal ("3장").
const ORDINAL_UNITS: [char; 4] = ['장', '章', '편', '부'];

/// Lowercase, drop a leading ordinal ("3.", "(2)", "4)", "1장:") and keep
/// only letters and digits.
fn compact(text: &str) -> String {
    let lowered = text.trim().to_lowercase();
    let body = lowered.trim_start_matches(|c: char| !c.is_alphanumeric());
    let after_digits = body.trim_start_matches(|c: char| c.is_ascii_digit());
    let rest = if after_digits.len() == body.len() {
        body
    } else if let Some(after_unit) = after_digits.strip_prefix(&ORDINAL_UNITS[..]) {
        if after_unit.starts_with(|c: char| c.is_alphanumeric()) { body } else { after_unit }
    } else if after_digits.starts_with(|c: char| !c.is_alphanumeric() && !c.is_whitespace()) {
        after_digits
    } else {
        body
    };
    rest.chars().filter(|c| c.is_alphanumeric()).collect()
}

fn direct_match(title: &str, pois: &[Poi]) -> Option<SubLocationMatch> {
    let t = compact(title);
    if t.is_empty() {
        return None;
    }
    pois.iter()
        .find(|poi| {
            let p = compact(&poi.name);
            !p.is_empty() && (t.contains(&p) || p.contains(&t))
        })
        .map(|poi| SubLocationMatch {
            title: title.to_string(),
            poi: Some(poi.clone()),
            method: Some(MatchMethod::Direct),
            score: DIRECT_SCORE,
            keyword: None,
        })
}

fn keyword_match(title: &str, site: &Site) -> Option<SubLocationMatch> {
    let t = title.to_lowercase();
    for row in &site.poi_keywords {
        let Some(keyword) = row.keywords.iter().find(|k| t.contains(&k.to_lowercase())) else {
            continue;
        };
        if let Some(poi) = site.pois.iter().find(|p| p.name.contains(&row.poi)) {
            return Some(SubLocationMatch {
                title: title.to_string(),
                poi: Some(poi.clone()),
                method: Some(MatchMethod::Keyword),
                score: KEYWORD_SCORE,
                keyword: Some(keyword.clone()),
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::dataset::Datasets;

    fn palace() -> Site {
        Datasets::embedded().unwrap().site("gyeongbokgung").unwrap().clone()
    }

    fn matched(title: &str) -> (Option<String>, Option<MatchMethod>) {
        let m = PoiMatcher::default().match_title(title, &palace());
        (m.poi.map(|p| p.name), m.method)
    }

    #[test]
    fn test_direct_match() {
        assert_eq!(matched("광화문 - 경복궁의 정문"), (Some("광화문".into()), Some(MatchMethod::Direct)));
        assert_eq!(matched("1. 광화문에서 시작하는 여행"), (Some("광화문".into()), Some(MatchMethod::Direct)));
        assert_eq!(matched("3장: 근정전에서 만나는 조선"), (Some("근정전".into()), Some(MatchMethod::Direct)));
    }

    #[test]
    fn test_keyword_match() {
        assert_eq!(matched("조선 왕조의 정문을 지나며"), (Some("광화문".into()), Some(MatchMethod::Keyword)));
        assert_eq!(matched("권력의 상징, 정전"), (Some("근정전".into()), Some(MatchMethod::Keyword)));
        assert_eq!(matched("왕의 편전에서 느끼는 일상"), (Some("사정전".into()), Some(MatchMethod::Keyword)));
        assert_eq!(matched("왕비의 침전을 둘러보며"), (Some("교태전".into()), Some(MatchMethod::Keyword)));
        assert_eq!(matched("물 위에 떠있는 누각"), (Some("경회루".into()), Some(MatchMethod::Keyword)));
        assert_eq!(matched("박물관에서 되돌아보는 역사"), (Some("국립고궁박물관".into()), Some(MatchMethod::Keyword)));
    }

    #[test]
    fn test_keyword_records_trigger() {
        let m = PoiMatcher::default().match_title("대비의 거처를 찾아서", &palace());
        assert_eq!(m.keyword.as_deref(), Some("대비"));
        assert_eq!(m.score, KEYWORD_SCORE);
    }

    #[test]
    fn test_similarity_match() {
        let m = PoiMatcher::default().match_title("경회로", &palace());
        assert_eq!(m.method, Some(MatchMethod::Similarity));
        assert_eq!(m.poi.unwrap().name, "경회루");
        assert!(m.score > 0.6);
    }

    #[test]
    fn test_unmatched_titles() {
        for title in ["조선 왕실의 하루", "궁궐 속 숨겨진 이야기", "시간을 넘나드는 여행"] {
            let m = PoiMatcher::default().match_title(title, &palace());
            assert!(!m.is_match(), "{} unexpectedly matched {:?}", title, m.poi);
            assert_eq!(m.score, 0.0);
        }
    }

    #[test]
    fn test_similarity_threshold_is_strict() {
        let site = Site {
            id: "t".into(),
            names: vec!["t".into()],
            center: Coordinate { lat: 0.0, lng: 0.0 },
            entrance: None,
            pois: vec![Poi {
                name: "abcde".into(),
                coordinate: Coordinate { lat: 0.0, lng: 0.0 },
                kind: PoiKind::Hall,
                parent_id: "t".into(),
            }],
            poi_keywords: vec![],
        };
        // Exactly 0.6 similar: not a match.
        assert!(!PoiMatcher::default().match_title("abcxy", &site).is_match());
        assert!(PoiMatcher::default().match_title("abcdx", &site).is_match());
    }

    #[test]
    fn test_matching_is_idempotent() {
        let matcher = PoiMatcher::default();
        let site = palace();
        let a = matcher.match_title("향원정 - 아름다운 정원", &site);
        let b = matcher.match_title("향원정 - 아름다운 정원", &site);
        assert_eq!(a, b);
    }

    #[test]
    fn test_compact_strips_ordinal() {
        assert_eq!(compact("12. Arena Floor"), "arenafloor");
        assert_eq!(compact("2024 tour"), "2024tour");
        assert_eq!(compact("4) Arena_Floor!"), "arenafloor");
        assert_eq!(compact("(2) 광화문"), "광화문");
        assert_eq!(compact("3장: 근정전"), "근정전");
        assert_eq!(compact("3장 근정전"), "근정전");
        assert_eq!(compact("3층 전시실"), "3층전시실");
    }

    #[test]
    fn test_direct_match_ignores_punctuation() {
        let site = Site {
            id: "arena".into(),
            names: vec!["arena".into()],
            center: Coordinate { lat: 0.0, lng: 0.0 },
            entrance: None,
            pois: vec![Poi {
                name: "Arena Floor".into(),
                coordinate: Coordinate { lat: 0.0, lng: 0.0 },
                kind: PoiKind::Other,
                parent_id: "arena".into(),
            }],
            poi_keywords: vec![],
        };
        let m = PoiMatcher::default().match_title("Arena_Floor!", &site);
        assert_eq!(m.method, Some(MatchMethod::Direct));
        assert_eq!(m.score, DIRECT_SCORE);
    }
}
