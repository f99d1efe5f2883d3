//! Runtime configuration.
//!
//! Resolution order, highest first:
//! 1. Command-line flags (applied by `main`)
//! 2. Environment variables (`GEOFUSE_*`)
//! 3. TOML file (explicit path, else `~/.config/geofuse/config.toml`)
//! 4. Compiled defaults
//!
//! Every empirically chosen threshold lives here as a named default so it can
//! be tuned without a rebuild.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Minimum normalized similarity for a fuzzy POI match (strictly greater).
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.6;
/// Top-two score gap below which a disambiguation choice is offered.
pub const DEFAULT_ALTERNATIVES_GAP: f64 = 0.15;
/// Resolution confidence below which alternatives are always offered.
pub const DEFAULT_LOW_CONFIDENCE: f64 = 0.6;

pub const DEFAULT_ENTRANCE_GATE_M: f64 = 10.0;
pub const DEFAULT_BUILDING_INTERIOR_M: f64 = 50.0;
pub const DEFAULT_AREA_GENERAL_M: f64 = 150.0;
pub const DEFAULT_FALLBACK_M: f64 = 500.0;

/// Upper bound for any single provider request.
pub const MAX_PROVIDER_TIMEOUT_MS: u64 = 300_000;
/// Upper bound for cache entry lifetime.
pub const MAX_CACHE_TTL_DAYS: i64 = 3_650;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub providers: ProviderConfig,
    pub resilience: ResilienceConfig,
    pub matching: MatchingConfig,
    pub consensus: ConsensusConfig,
    pub tiers: TierAccuracy,
    pub quality: QualityThresholds,
    pub cache: CacheConfig,
    /// Curated dataset JSON. The embedded dataset is used when unset.
    pub datasets_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Google Geocoding key. The adapter is disabled without one.
    pub google_api_key: Option<String>,
    pub google_base_url: String,
    pub nominatim_enabled: bool,
    pub nominatim_base_url: String,
    pub user_agent: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            google_api_key: None,
            google_base_url: "https://maps.googleapis.com/maps/api/geocode/json".into(),
            nominatim_enabled: true,
            nominatim_base_url: "https://nominatim.openstreetmap.org/search".into(),
            user_agent: concat!("geofuse/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub provider_timeout_ms: u64,
    pub overall_budget_ms: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub permutation_spacing_ms: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            provider_timeout_ms: 10_000,
            overall_budget_ms: 25_000,
            max_retries: 2,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
            permutation_spacing_ms: 500,
        }
    }
}

impl ResilienceConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn overall_budget(&self) -> Duration {
        Duration::from_millis(self.overall_budget_ms)
    }

    pub fn permutation_spacing(&self) -> Duration {
        Duration::from_millis(self.permutation_spacing_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub similarity_threshold: f64,
    pub alternatives_gap: f64,
    pub low_confidence: f64,
    pub popularity_weight: f64,
    pub context_weight: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            alternatives_gap: DEFAULT_ALTERNATIVES_GAP,
            low_confidence: DEFAULT_LOW_CONFIDENCE,
            popularity_weight: 0.6,
            context_weight: 0.4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Source count at which coverage stops limiting the quality score.
    pub coverage_sources: f64,
    /// Spread at or below which sources count as fully agreeing.
    pub agreement_tolerance_m: f64,
    /// Spread at which agreement reaches zero.
    pub agreement_cutoff_m: f64,
    /// Quality score a result must exceed to be reported as verified.
    pub verified_threshold: f64,
    /// Source answers farther than this from the selected candidate's curated
    /// coordinate are rejected.
    pub anchor_radius_m: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            coverage_sources: 3.0,
            agreement_tolerance_m: 10.0,
            agreement_cutoff_m: 200.0,
            verified_threshold: 0.8,
            anchor_radius_m: 50_000.0,
        }
    }
}

/// Expected accuracy per precision tier, in meters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierAccuracy {
    pub entrance_gate_m: f64,
    pub building_interior_m: f64,
    pub area_general_m: f64,
    pub fallback_m: f64,
}

impl Default for TierAccuracy {
    fn default() -> Self {
        Self {
            entrance_gate_m: DEFAULT_ENTRANCE_GATE_M,
            building_interior_m: DEFAULT_BUILDING_INTERIOR_M,
            area_general_m: DEFAULT_AREA_GENERAL_M,
            fallback_m: DEFAULT_FALLBACK_M,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    /// Below this the alert level is low.
    pub precise_m: f64,
    /// Above this the alert level is high.
    pub acceptable_m: f64,
    /// Above this a coordinate should be replaced.
    pub poor_m: f64,
    pub stale_days: f64,
    pub outdated_days: f64,
    pub low_consensus: f64,
    pub history_len: usize,
    /// Locations with history kept; the least recently assessed is dropped first.
    pub max_tracked_locations: usize,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            precise_m: 10.0,
            acceptable_m: 50.0,
            poor_m: 100.0,
            stale_days: 30.0,
            outdated_days: 365.0,
            low_consensus: 0.4,
            history_len: 16,
            max_tracked_locations: 1_024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub path: Option<PathBuf>,
    pub ttl_days: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true, path: None, ttl_days: 30 }
    }
}

impl Config {
    /// Load from `path`, or from the default location if it exists, then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::read_file(p)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(p) => Self::read_file(&p)?,
                None => Self::default(),
            },
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("geofuse").join("config.toml"))
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("GEOFUSE_GOOGLE_API_KEY") {
            if !key.trim().is_empty() {
                self.providers.google_api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("GEOFUSE_NOMINATIM_URL") {
            if !url.trim().is_empty() {
                self.providers.nominatim_base_url = url;
            }
        }
        if let Ok(path) = std::env::var("GEOFUSE_DATASETS") {
            if !path.trim().is_empty() {
                self.datasets_path = Some(PathBuf::from(path));
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = |field: &'static str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ConfigError::Invalid { field, reason: format!("{} is outside [0, 1]", v) })
            }
        };
        unit("matching.similarity_threshold", self.matching.similarity_threshold)?;
        unit("matching.alternatives_gap", self.matching.alternatives_gap)?;
        unit("matching.low_confidence", self.matching.low_confidence)?;
        unit("consensus.verified_threshold", self.consensus.verified_threshold)?;

        let weights = self.matching.popularity_weight + self.matching.context_weight;
        if (weights - 1.0).abs() > 1e-9 {
            return Err(ConfigError::Invalid {
                field: "matching.popularity_weight",
                reason: format!("popularity and context weights must sum to 1, got {}", weights),
            });
        }
        if self.consensus.coverage_sources < 1.0 {
            return Err(ConfigError::Invalid {
                field: "consensus.coverage_sources",
                reason: "must be at least 1".into(),
            });
        }
        if self.consensus.agreement_cutoff_m <= self.consensus.agreement_tolerance_m {
            return Err(ConfigError::Invalid {
                field: "consensus.agreement_cutoff_m",
                reason: "must exceed agreement_tolerance_m".into(),
            });
        }
        let r = &self.resilience;
        if !(1..=MAX_PROVIDER_TIMEOUT_MS).contains(&r.provider_timeout_ms) {
            return Err(ConfigError::Invalid {
                field: "resilience.provider_timeout_ms",
                reason: format!("{} is outside [1, {}]", r.provider_timeout_ms, MAX_PROVIDER_TIMEOUT_MS),
            });
        }
        if r.overall_budget_ms < r.provider_timeout_ms {
            return Err(ConfigError::Invalid {
                field: "resilience.overall_budget_ms",
                reason: "must be at least provider_timeout_ms".into(),
            });
        }
        if !(1..=MAX_CACHE_TTL_DAYS).contains(&self.cache.ttl_days) {
            return Err(ConfigError::Invalid {
                field: "cache.ttl_days",
                reason: format!("{} is outside [1, {}]", self.cache.ttl_days, MAX_CACHE_TTL_DAYS),
            });
        }
        if self.quality.max_tracked_locations == 0 {
            return Err(ConfigError::Invalid {
                field: "quality.max_tracked_locations",
                reason: "must be at least 1".into(),
            });
        }
        let t = &self.tiers;
        let ordered = 0.0 < t.entrance_gate_m
            && t.entrance_gate_m <= t.building_interior_m
            && t.building_interior_m <= t.area_general_m
            && t.area_general_m <= t.fallback_m;
        if !ordered {
            return Err(ConfigError::Invalid {
                field: "tiers",
                reason: "tier accuracies must be positive and non-decreasing".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.matching.similarity_threshold, 0.6);
        assert_eq!(config.tiers.fallback_m, 500.0);
        assert_eq!(config.resilience.max_retries, 2);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[matching]\nsimilarity_threshold = 0.7\n\n[tiers]\nfallback_m = 800.0\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.matching.similarity_threshold, 0.7);
        assert_eq!(config.matching.alternatives_gap, DEFAULT_ALTERNATIVES_GAP);
        assert_eq!(config.tiers.fallback_m, 800.0);
        assert_eq!(config.tiers.entrance_gate_m, DEFAULT_ENTRANCE_GATE_M);
    }

    #[test]
    fn test_rejects_unordered_tiers() {
        let mut config = Config::default();
        config.tiers.area_general_m = 5.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field: "tiers", .. })));
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let mut config = Config::default();
        config.matching.similarity_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_timeout_and_ttl() {
        let mut config = Config::default();
        config.resilience.provider_timeout_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "resilience.provider_timeout_ms", .. })
        ));

        let mut config = Config::default();
        config.cache.ttl_days = i64::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field: "cache.ttl_days", .. })));
        config.cache.ttl_days = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_huge_ttl_from_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[cache]\nttl_days = 9223372036854775807\n").unwrap();
        assert!(matches!(Config::load(Some(&path)), Err(ConfigError::Invalid { field: "cache.ttl_days", .. })));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(Config::load(Some(&path)), Err(ConfigError::Read { .. })));
    }
}
