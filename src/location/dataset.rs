//! Curated reference data: places, the heritage gazetteer, the ambiguity
//! table, site POIs and the tier keyword rules.
//!
//! Loaded once at startup (embedded JSON or a file from config), validated,
//! then shared read-only behind an `Arc`.

use super::poi::{Poi, PoiKeywords};
use super::tiers::TierRule;
use super::types::{normalize_name, LocationCandidate};
use crate::geo::Coordinate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

const EMBEDDED: &str = include_str!("../../data/curated.json");

fn default_place_accuracy() -> f64 {
    10.0
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("cannot read dataset {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed dataset: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid dataset entry '{id}': {reason}")]
    Invalid { id: String, reason: String },
}

/// A hand-verified landmark coordinate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CuratedPlace {
    pub id: String,
    /// Canonical name first, then aliases in any language.
    pub names: Vec<String>,
    pub coordinate: Coordinate,
    pub country_code: String,
    #[serde(default = "default_place_accuracy")]
    pub accuracy_m: f64,
}

/// A record from an official heritage registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GazetteerEntry {
    pub id: String,
    pub names: Vec<String>,
    pub coordinate: Coordinate,
    pub country_code: String,
    pub authority: String,
    #[serde(default = "default_place_accuracy")]
    pub accuracy_m: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AmbiguityEntry {
    names: Vec<String>,
    candidates: Vec<LocationCandidate>,
}

/// A larger site with named sub-locations (palace grounds, a stadium).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: String,
    pub names: Vec<String>,
    pub center: Coordinate,
    #[serde(default)]
    pub entrance: Option<Coordinate>,
    #[serde(default)]
    pub pois: Vec<Poi>,
    /// Ordered keyword table; earlier rows win.
    #[serde(default)]
    pub poi_keywords: Vec<PoiKeywords>,
}

impl Site {
    pub fn display_name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or(&self.id)
    }
}

#[derive(Debug, Deserialize)]
struct RawDatasets {
    #[serde(default)]
    places: Vec<CuratedPlace>,
    #[serde(default)]
    gazetteer: Vec<GazetteerEntry>,
    #[serde(default)]
    ambiguity: Vec<AmbiguityEntry>,
    #[serde(default)]
    sites: Vec<Site>,
    #[serde(default)]
    tier_rules: Vec<TierRule>,
}

/// All curated tables, immutable after load.
#[derive(Debug, Clone, Default)]
pub struct Datasets {
    pub places: Vec<CuratedPlace>,
    pub gazetteer: Vec<GazetteerEntry>,
    pub sites: Vec<Site>,
    pub tier_rules: Vec<TierRule>,
    /// Normalized name -> index into `ambiguity_sets`.
    ambiguity_index: HashMap<String, usize>,
    ambiguity_sets: Vec<Vec<LocationCandidate>>,
}

impl Datasets {
    /// The dataset compiled into the binary.
    pub fn embedded() -> Result<Self, DatasetError> {
        Self::from_json(EMBEDDED)
    }

    /// Load from `path`, or fall back to the embedded dataset.
    pub fn load(path: Option<&Path>) -> Result<Self, DatasetError> {
        match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|source| DatasetError::Read {
                    path: p.to_path_buf(),
                    source,
                })?;
                tracing::info!(path = %p.display(), "loading curated dataset");
                Self::from_json(&text)
            }
            None => Self::embedded(),
        }
    }

    pub fn from_json(text: &str) -> Result<Self, DatasetError> {
        let raw: RawDatasets = serde_json::from_str(text)?;
        let mut sets = Self {
            places: raw.places,
            gazetteer: raw.gazetteer,
            sites: raw.sites,
            tier_rules: raw.tier_rules,
            ..Default::default()
        };
        for entry in raw.ambiguity {
            let idx = sets.ambiguity_sets.len();
            for name in &entry.names {
                sets.ambiguity_index.insert(normalize_name(name), idx);
            }
            sets.ambiguity_sets.push(entry.candidates);
        }
        for site in &mut sets.sites {
            for poi in &mut site.pois {
                poi.parent_id = site.id.clone();
            }
        }
        sets.validate()?;
        Ok(sets)
    }

    fn validate(&self) -> Result<(), DatasetError> {
        let invalid = |id: &str, reason: String| DatasetError::Invalid { id: id.to_string(), reason };
        let check_coord = |id: &str, c: &Coordinate| {
            if c.is_valid() {
                Ok(())
            } else {
                Err(invalid(id, format!("coordinate ({}, {}) out of range", c.lat, c.lng)))
            }
        };

        for p in &self.places {
            check_coord(&p.id, &p.coordinate)?;
            if p.names.is_empty() {
                return Err(invalid(&p.id, "place has no names".into()));
            }
        }
        for g in &self.gazetteer {
            check_coord(&g.id, &g.coordinate)?;
        }
        for set in &self.ambiguity_sets {
            if set.is_empty() {
                return Err(invalid("ambiguity", "empty candidate list".into()));
            }
            for c in set {
                if !(0.0..=1.0).contains(&c.popularity) {
                    return Err(invalid(&c.id, format!("popularity {} outside [0, 1]", c.popularity)));
                }
                if let Some(coord) = &c.coordinate {
                    check_coord(&c.id, coord)?;
                }
            }
        }
        for site in &self.sites {
            check_coord(&site.id, &site.center)?;
            if let Some(e) = &site.entrance {
                check_coord(&site.id, e)?;
            }
            for poi in &site.pois {
                check_coord(&poi.name, &poi.coordinate)?;
            }
        }
        for rule in &self.tier_rules {
            if rule.patterns.iter().any(|p| p.trim().is_empty()) {
                return Err(invalid(&rule.language, "empty tier pattern".into()));
            }
        }
        Ok(())
    }

    /// Candidates sharing this name, if the name is known to be ambiguous.
    pub fn ambiguity_candidates(&self, name: &str) -> Option<&[LocationCandidate]> {
        let idx = *self.ambiguity_index.get(&normalize_name(name))?;
        self.ambiguity_sets.get(idx).map(Vec::as_slice)
    }

    /// Find a site by id or any of its names.
    pub fn site(&self, name_or_id: &str) -> Option<&Site> {
        let key = normalize_name(name_or_id);
        self.sites
            .iter()
            .find(|s| s.id == key || s.names.iter().any(|n| normalize_name(n) == key))
    }

    /// Number of distinct ambiguous names.
    pub fn ambiguity_len(&self) -> usize {
        self.ambiguity_sets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_dataset_loads() {
        let data = Datasets::embedded().unwrap();
        assert!(!data.places.is_empty());
        assert!(!data.gazetteer.is_empty());
        assert!(!data.tier_rules.is_empty());
        assert!(data.ambiguity_len() >= 4);
    }

    #[test]
    fn test_ambiguity_lookup_is_normalized() {
        let data = Datasets::embedded().unwrap();
        let cands = data.ambiguity_candidates("  CAMBRIDGE ").unwrap();
        assert_eq!(cands.len(), 2);
        assert!(data.ambiguity_candidates("용궁사").is_some());
        assert!(data.ambiguity_candidates("Reykjavik").is_none());
    }

    #[test]
    fn test_site_lookup_and_parent_ids() {
        let data = Datasets::embedded().unwrap();
        let site = data.site("경복궁").unwrap();
        assert_eq!(site.id, "gyeongbokgung");
        assert!(site.pois.iter().all(|p| p.parent_id == "gyeongbokgung"));
        assert!(data.site("Gyeongbokgung Palace").is_some());
        assert!(data.site("nowhere").is_none());
    }

    #[test]
    fn test_rejects_out_of_range_coordinate() {
        let json = r#"{
            "places": [
                { "id": "bad", "names": ["bad"], "coordinate": { "lat": 95.0, "lng": 0.0 }, "country_code": "XX" }
            ]
        }"#;
        assert!(matches!(Datasets::from_json(json), Err(DatasetError::Invalid { .. })));
    }

    #[test]
    fn test_rejects_bad_popularity() {
        let json = r#"{
            "ambiguity": [
                { "names": ["x"], "candidates": [ { "id": "x1", "display_name": "X", "popularity": 1.4 } ] }
            ]
        }"#;
        assert!(Datasets::from_json(json).is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = Datasets::load(Some(Path::new("/definitely/not/here.json"))).unwrap_err();
        assert!(matches!(err, DatasetError::Read { .. }));
    }
}
