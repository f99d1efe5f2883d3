//! Core types for the location subsystem.

use crate::geo::Coordinate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

const MAX_NAME_CHARS: usize = 200;

// ─── Query ───────────────────────────────────────────────────────

/// Optional caller-supplied context that narrows a query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryContext {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    /// ISO 3166-1 alpha-2 code (e.g. "KR").
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    /// Free text such as "the one by the sea".
    #[serde(default)]
    pub hint: Option<String>,
}

impl QueryContext {
    /// All free-text fields joined, lowercased. Empty when nothing was given.
    pub fn text(&self) -> String {
        [&self.region, &self.country, &self.category, &self.hint]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    pub fn is_empty(&self) -> bool {
        self.text().is_empty() && self.country_code.is_none()
    }
}

/// A validated request to resolve one place name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationQuery {
    pub name: String,
    pub language: String,
    #[serde(default)]
    pub context: QueryContext,
}

impl LocationQuery {
    /// Validate and build a query. Fails fast, before any network call.
    pub fn new(name: &str, language: &str) -> Result<Self, LocationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LocationError::InvalidInput("location name is empty".into()));
        }
        if name.chars().count() > MAX_NAME_CHARS {
            return Err(LocationError::InvalidInput(format!(
                "location name exceeds {} characters",
                MAX_NAME_CHARS
            )));
        }
        if name.chars().any(char::is_control) {
            return Err(LocationError::InvalidInput(
                "location name contains control characters".into(),
            ));
        }
        let language = language.trim().to_lowercase();
        let language = if language.is_empty() { "en".to_string() } else { language };
        Ok(Self { name: name.to_string(), language, context: QueryContext::default() })
    }

    pub fn with_context(mut self, context: QueryContext) -> Self {
        self.context = context;
        self
    }

    /// Lowercased, accent-folded, whitespace-collapsed name.
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }

    /// Cache key: (normalized name, language, context hash).
    pub fn cache_key(&self) -> String {
        let c = &self.context;
        let mut hasher = Sha256::new();
        for field in [&c.region, &c.country, &c.country_code, &c.category, &c.hint] {
            hasher.update(field.as_deref().unwrap_or("").trim().to_lowercase().as_bytes());
            hasher.update([0x1fu8]);
        }
        let digest = format!("{:x}", hasher.finalize());
        format!("{}|{}|{}", self.normalized_name(), self.language, &digest[..16])
    }
}

/// Lowercase, strip common Latin diacritics, collapse spaces.
pub fn normalize_name(q: &str) -> String {
    q.to_lowercase()
        .replace('ø', "o")
        .replace('å', "a")
        .replace('ä', "a")
        .replace('ö', "o")
        .replace('ü', "u")
        .replace('ß', "ss")
        .replace('é', "e")
        .replace('è', "e")
        .replace('ê', "e")
        .replace('î', "i")
        .replace('ñ', "n")
        .replace('ã', "a")
        .replace('õ', "o")
        .replace('ç', "c")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// ─── Sources ─────────────────────────────────────────────────────

/// Where a candidate coordinate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    Curated,
    Gazetteer,
    Google,
    Nominatim,
}

impl SourceId {
    /// Fixed provenance trust.
    pub fn base_weight(self) -> f64 {
        match self {
            Self::Curated | Self::Gazetteer => 1.0,
            Self::Google => 0.95,
            Self::Nominatim => 0.9,
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Curated => write!(f, "curated"),
            Self::Gazetteer => write!(f, "gazetteer"),
            Self::Google => write!(f, "google"),
            Self::Nominatim => write!(f, "nominatim"),
        }
    }
}

/// One source's normalized answer for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateCoordinate {
    pub coordinate: Coordinate,
    pub source: SourceId,
    /// Always within [0, 1].
    pub confidence: f64,
    /// Estimated accuracy in meters, always > 0.
    pub accuracy_m: f64,
    pub timestamp: DateTime<Utc>,
    /// Country code the provider reported for the match, if any.
    #[serde(default)]
    pub country_code: Option<String>,
}

impl CandidateCoordinate {
    /// Build a candidate, clamping confidence and flooring accuracy at 1 m.
    pub fn new(coordinate: Coordinate, source: SourceId, confidence: f64, accuracy_m: f64) -> Self {
        Self {
            coordinate,
            source,
            confidence: if confidence.is_finite() { confidence.clamp(0.0, 1.0) } else { 0.0 },
            accuracy_m: if accuracy_m.is_finite() { accuracy_m.max(1.0) } else { 1.0 },
            timestamp: Utc::now(),
            country_code: None,
        }
    }

    pub fn with_country(mut self, country_code: Option<String>) -> Self {
        self.country_code = country_code.map(|c| c.to_uppercase());
        self
    }
}

// ─── Ambiguity ───────────────────────────────────────────────────

/// One of several real places sharing a name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationCandidate {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub region: String,
    /// Other spellings of the region, e.g. in native script.
    #[serde(default)]
    pub region_aliases: Vec<String>,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub country_code: Option<String>,
    /// Within [0, 1].
    pub popularity: f64,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub description: String,
    /// Curated coordinate, used when no provider answers.
    #[serde(default)]
    pub coordinate: Option<Coordinate>,
    /// Pre-registered context keywords that point at this candidate.
    #[serde(default)]
    pub keywords: Vec<String>,
}

// ─── Resolution ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    /// A single curated or government record.
    Static,
    /// Two or more independent sources fused.
    Consensus,
    /// A single commercial provider answer.
    Heuristic,
    /// No provider answered; the ambiguity table's coordinate was used.
    Fallback,
}

impl fmt::Display for ResolutionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static => write!(f, "static"),
            Self::Consensus => write!(f, "consensus"),
            Self::Heuristic => write!(f, "heuristic"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Verified,
    Estimated,
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verified => write!(f, "verified"),
            Self::Estimated => write!(f, "estimated"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    Excellent,
    Good,
    Estimated,
    NeedsReview,
}

/// The cacheable outcome of resolving one query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub query: String,
    pub language: String,
    pub candidate: LocationCandidate,
    pub coordinate: Coordinate,
    pub accuracy_m: f64,
    pub method: ResolutionMethod,
    pub confidence: f64,
    pub reasoning: Vec<String>,
    pub should_show_alternatives: bool,
    /// Only populated when `should_show_alternatives` is set.
    #[serde(default)]
    pub alternatives: Vec<LocationCandidate>,
    pub sources: Vec<CandidateCoordinate>,
    pub quality_score: f64,
    pub verification: VerificationStatus,
    pub quality_level: QualityLevel,
    pub validated_at: DateTime<Utc>,
    #[serde(default)]
    pub from_cache: bool,
}

impl ResolvedLocation {
    pub fn display_line(&self) -> String {
        let region = [self.candidate.region.as_str(), self.candidate.country.as_str()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", ");
        let region = if region.is_empty() { String::new() } else { format!(" ({})", region) };
        format!(
            "{}{} at {} \u{00B1}{:.0} m [{}, {}, confidence {:.2}]",
            self.candidate.display_name,
            region,
            crate::geo::format_coords(self.coordinate.lat, self.coordinate.lng),
            self.accuracy_m,
            self.method,
            self.verification,
            self.confidence,
        )
    }
}

// ─── Errors ──────────────────────────────────────────────────────

/// Structural resolution failures, returned to the caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LocationError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// No ambiguity entry and no usable source. Callers should fall back to the
    /// tier strategy rather than invent a coordinate.
    #[error("no candidates found for '{query}' ({language})")]
    NoCandidatesFound { query: String, language: String },
}

/// Coarse class of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// The provider did not produce an answer.
    Unavailable,
    /// The provider answered, but the answer failed plausibility checks.
    Rejected,
}

/// Why one provider produced no candidate. Never surfaced to end users.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("rate limited")]
    RateLimited,
    #[error("server error (HTTP {0})")]
    Server(u16),
    #[error("network error: {0}")]
    Network(String),
    #[error("credentials rejected")]
    Credentials,
    #[error("malformed query: {0}")]
    MalformedQuery(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("no result")]
    NoResult,
    #[error("result is in {found}, expected {expected}")]
    WrongCountry { expected: String, found: String },
    #[error("coordinate out of range ({lat}, {lng})")]
    OutOfRange { lat: f64, lng: f64 },
    #[error("result is {distance_m:.0} m from the selected place")]
    TooFar { distance_m: f64 },
}

impl ProviderError {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::WrongCountry { .. } | Self::OutOfRange { .. } | Self::TooFar { .. } => {
                FailureClass::Rejected
            }
            _ => FailureClass::Unavailable,
        }
    }

    /// Worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::RateLimited | Self::Server(_) | Self::Network(_))
    }

    /// Further attempts against the same provider cannot succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Credentials)
    }

    pub fn from_status(code: u16) -> Self {
        match code {
            429 => Self::RateLimited,
            401 | 403 => Self::Credentials,
            500..=599 => Self::Server(code),
            400..=499 => Self::MalformedQuery(format!("HTTP {}", code)),
            other => Self::Network(format!("unexpected HTTP {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_rejects_empty() {
        assert!(matches!(LocationQuery::new("   ", "ko"), Err(LocationError::InvalidInput(_))));
        assert!(matches!(LocationQuery::new("a\u{0007}b", "ko"), Err(LocationError::InvalidInput(_))));
        let long = "x".repeat(MAX_NAME_CHARS + 1);
        assert!(LocationQuery::new(&long, "en").is_err());
    }

    #[test]
    fn test_query_trims_and_defaults_language() {
        let q = LocationQuery::new("  경복궁 ", " ").unwrap();
        assert_eq!(q.name, "경복궁");
        assert_eq!(q.language, "en");
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Tromsø"), "tromso");
        assert_eq!(normalize_name("São  Paulo"), "sao paulo");
        assert_eq!(normalize_name("  Multiple   Spaces  "), "multiple spaces");
    }

    #[test]
    fn test_cache_key_depends_on_context() {
        let plain = LocationQuery::new("Cambridge", "en").unwrap();
        let ctx = plain.clone().with_context(QueryContext {
            region: Some("Massachusetts".into()),
            ..Default::default()
        });
        assert_ne!(plain.cache_key(), ctx.cache_key());
        assert!(plain.cache_key().starts_with("cambridge|en|"));

        let same = LocationQuery::new("cambridge", "EN").unwrap();
        assert_eq!(plain.cache_key(), same.cache_key());
    }

    #[test]
    fn test_context_text() {
        let ctx = QueryContext {
            region: Some("Busan".into()),
            hint: Some("by the Sea".into()),
            ..Default::default()
        };
        assert_eq!(ctx.text(), "busan by the sea");
        assert!(QueryContext::default().is_empty());
    }

    #[test]
    fn test_candidate_invariants() {
        let c = CandidateCoordinate::new(
            Coordinate { lat: 1.0, lng: 1.0 },
            SourceId::Google,
            1.7,
            0.0,
        );
        assert_eq!(c.confidence, 1.0);
        assert_eq!(c.accuracy_m, 1.0);
    }

    #[test]
    fn test_provider_error_classes() {
        assert!(ProviderError::from_status(503).is_transient());
        assert!(ProviderError::from_status(429).is_transient());
        assert!(!ProviderError::from_status(400).is_transient());
        assert!(ProviderError::from_status(403).is_fatal());
        let wrong = ProviderError::WrongCountry { expected: "KR".into(), found: "JP".into() };
        assert_eq!(wrong.class(), FailureClass::Rejected);
        assert_eq!(ProviderError::NoResult.class(), FailureClass::Unavailable);
    }

    #[test]
    fn test_source_weights() {
        assert_eq!(SourceId::Gazetteer.base_weight(), 1.0);
        assert!(SourceId::Google.base_weight() > SourceId::Nominatim.base_weight());
    }
}
