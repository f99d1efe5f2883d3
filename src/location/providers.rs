//! Source adapters: curated places, the heritage gazetteer, Google Geocoding
//! and OpenStreetMap Nominatim, plus the fan-out that queries them together.
//!
//! Raw provider payloads never leave this module: the `normalize_*`
//! functions turn them into [`CandidateCoordinate`]s or a [`ProviderError`].

use super::dataset::{CuratedPlace, Datasets};
use super::resilient::{call_resilient, RetryPolicy};
use super::types::{
    normalize_name, CandidateCoordinate, FailureClass, LocationQuery, ProviderError, SourceId,
};
use crate::config::ProviderConfig;
use crate::geo::{haversine_distance, string_similarity, Coordinate};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// One source of candidate coordinates.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> SourceId;

    /// One attempt at answering `query`. The overall budget is applied by
    /// [`FanOut`], and so are retries unless [`Self::retries_internally`].
    async fn fetch(&self, query: &LocationQuery) -> Result<CandidateCoordinate, ProviderError>;

    /// True when `fetch` already applies the timeout and retry policy to each
    /// request it makes.
    fn retries_internally(&self) -> bool {
        false
    }
}

// ─── Curated places ─────────────────────────────────────────────

const EXACT_MATCH: f64 = 0.95;
const SUBSTRING_MATCH: f64 = 0.85;
const FUZZY_MATCH: f64 = 0.7;
const FUZZY_MIN_SIMILARITY: f64 = 0.8;

/// Hand-verified landmark table: exact, then substring, then fuzzy.
pub struct CuratedAdapter {
    data: Arc<Datasets>,
}

impl CuratedAdapter {
    pub fn new(data: Arc<Datasets>) -> Self {
        Self { data }
    }

    fn lookup(&self, query: &LocationQuery) -> Option<CandidateCoordinate> {
        let q = query.normalized_name();
        let country = expected_country(query);
        let places: Vec<_> = self
            .data
            .places
            .iter()
            .filter(|p| country.as_deref().map_or(true, |cc| p.country_code.eq_ignore_ascii_case(cc)))
            .collect();

        let found = places
            .iter()
            .find(|p| p.names.iter().any(|n| normalize_name(n) == q))
            .map(|p| (*p, EXACT_MATCH))
            .or_else(|| {
                if q.chars().count() < 2 {
                    return None;
                }
                places
                    .iter()
                    .find(|p| {
                        p.names.iter().map(|n| normalize_name(n)).any(|n| n.contains(&q) || q.contains(&n))
                    })
                    .map(|p| (*p, SUBSTRING_MATCH))
            })
            .or_else(|| {
                let mut best: Option<(&CuratedPlace, f64)> = None;
                for p in &places {
                    for n in &p.names {
                        let sim = string_similarity(&q, &normalize_name(n));
                        if sim >= FUZZY_MIN_SIMILARITY && best.map_or(true, |(_, s)| sim > s) {
                            best = Some((*p, sim));
                        }
                    }
                }
                best.map(|(p, _)| (p, FUZZY_MATCH))
            })?;

        let (place, quality) = found;
        Some(
            CandidateCoordinate::new(
                place.coordinate,
                SourceId::Curated,
                SourceId::Curated.base_weight() * quality,
                place.accuracy_m,
            )
            .with_country(Some(place.country_code.clone())),
        )
    }
}

#[async_trait]
impl SourceAdapter for CuratedAdapter {
    fn source(&self) -> SourceId {
        SourceId::Curated
    }

    async fn fetch(&self, query: &LocationQuery) -> Result<CandidateCoordinate, ProviderError> {
        self.lookup(query).ok_or(ProviderError::NoResult)
    }
}

// ─── Gazetteer ──────────────────────────────────────────────────

/// Official heritage registry. Exact name or alias only.
pub struct GazetteerAdapter {
    data: Arc<Datasets>,
}

impl GazetteerAdapter {
    pub fn new(data: Arc<Datasets>) -> Self {
        Self { data }
    }
}

#[async_trait]
impl SourceAdapter for GazetteerAdapter {
    fn source(&self) -> SourceId {
        SourceId::Gazetteer
    }

    async fn fetch(&self, query: &LocationQuery) -> Result<CandidateCoordinate, ProviderError> {
        let q = query.normalized_name();
        let country = expected_country(query);
        let entry = self
            .data
            .gazetteer
            .iter()
            .filter(|g| country.as_deref().map_or(true, |cc| g.country_code.eq_ignore_ascii_case(cc)))
            .find(|g| g.names.iter().any(|n| normalize_name(n) == q))
            .ok_or(ProviderError::NoResult)?;
        tracing::trace!(id = %entry.id, authority = %entry.authority, "gazetteer hit");
        Ok(CandidateCoordinate::new(
            entry.coordinate,
            SourceId::Gazetteer,
            SourceId::Gazetteer.base_weight(),
            entry.accuracy_m,
        )
        .with_country(Some(entry.country_code.clone())))
    }
}

// ─── Query permutations & plausibility ──────────────────────────

fn locale_suffixes(language: &str) -> &'static [&'static str] {
    match language {
        "ko" => &["입구", "매표소"],
        "ja" => &["入口", "チケット売り場"],
        "zh" => &["入口", "售票处"],
        _ => &["entrance", "ticket office"],
    }
}

/// Provider query strings in priority order: name with region/country, bare
/// name, then name with locale suffixes.
pub fn query_permutations(query: &LocationQuery) -> Vec<String> {
    let name = query.name.trim();
    let mut out: Vec<String> = Vec::new();
    let mut push = |s: String| {
        if !out.contains(&s) {
            out.push(s);
        }
    };

    let ctx: Vec<&str> = [&query.context.region, &query.context.country]
        .into_iter()
        .flatten()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    if !ctx.is_empty() {
        push(format!("{} {}", name, ctx.join(" ")));
    }
    push(name.to_string());
    for suffix in locale_suffixes(&query.language) {
        push(format!("{} {}", name, suffix));
    }
    out
}

/// Country the caller asked for, as an ISO alpha-2 code.
pub fn expected_country(query: &LocationQuery) -> Option<String> {
    let ctx = &query.context;
    ctx.country_code
        .as_deref()
        .map(str::trim)
        .filter(|c| c.len() == 2)
        .map(str::to_uppercase)
        .or_else(|| ctx.country.as_deref().and_then(country_name_to_code))
}

/// Reject answers outside valid bounds or in the wrong country.
pub fn check_plausible(candidate: &CandidateCoordinate, query: &LocationQuery) -> Result<(), ProviderError> {
    let c = candidate.coordinate;
    if !c.is_valid() {
        return Err(ProviderError::OutOfRange { lat: c.lat, lng: c.lng });
    }
    if let (Some(expected), Some(found)) = (expected_country(query), candidate.country_code.as_ref()) {
        if !found.eq_ignore_ascii_case(&expected) {
            return Err(ProviderError::WrongCountry { expected, found: found.clone() });
        }
    }
    Ok(())
}

/// Map a country name (English, native, or Korean) to its ISO code.
pub fn country_name_to_code(name: &str) -> Option<String> {
    let n = name.trim().to_lowercase();
    let code = match n.as_str() {
        "south korea" | "korea" | "republic of korea" | "korea, republic of" | "대한민국" | "한국" => "KR",
        "japan" | "日本" | "일본" => "JP",
        "china" | "people's republic of china" | "中国" | "중국" => "CN",
        "taiwan" | "台灣" | "대만" => "TW",
        "united states" | "united states of america" | "usa" | "us" | "미국" => "US",
        "united kingdom" | "uk" | "great britain" | "england" | "영국" => "GB",
        "france" | "프랑스" => "FR",
        "germany" | "deutschland" | "독일" => "DE",
        "italy" | "italia" | "이탈리아" => "IT",
        "spain" | "españa" | "스페인" => "ES",
        "egypt" | "مصر" | "이집트" => "EG",
        "turkey" | "türkiye" => "TR",
        "greece" | "ελλάδα" => "GR",
        "russia" | "russian federation" => "RU",
        "india" => "IN",
        "thailand" => "TH",
        "vietnam" | "viet nam" => "VN",
        "singapore" => "SG",
        "australia" => "AU",
        "canada" => "CA",
        "mexico" | "méxico" => "MX",
        "brazil" | "brasil" => "BR",
        "netherlands" | "nederland" => "NL",
        "switzerland" | "schweiz" | "suisse" => "CH",
        "austria" | "österreich" => "AT",
        "portugal" => "PT",
        "sweden" | "sverige" => "SE",
        "norway" | "norge" => "NO",
        _ => return None,
    };
    Some(code.to_string())
}

// ─── HTTP plumbing ──────────────────────────────────────────────

fn build_agent(config: &ProviderConfig, timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout(timeout)
        .user_agent(&config.user_agent)
        .build()
}

/// Blocking GET returning the response body. Runs on the blocking pool.
fn http_get(agent: &ureq::Agent, url: &str, params: &[(String, String)]) -> Result<String, ProviderError> {
    let mut request = agent.get(url);
    for (k, v) in params {
        request = request.query(k, v);
    }
    match request.call() {
        Ok(response) => response
            .into_string()
            .map_err(|e| ProviderError::MalformedResponse(e.to_string())),
        Err(ureq::Error::Status(code, _)) => Err(ProviderError::from_status(code)),
        Err(ureq::Error::Transport(t)) => Err(ProviderError::Network(t.to_string())),
    }
}

async fn http_get_async(
    agent: ureq::Agent,
    url: String,
    params: Vec<(String, String)>,
) -> Result<String, ProviderError> {
    tokio::task::spawn_blocking(move || http_get(&agent, &url, &params))
        .await
        .map_err(|e| ProviderError::Network(format!("request task failed: {}", e)))?
}

/// Walk the permutations in order, spaced by `spacing`, returning the first
/// plausible answer. Each permutation request runs under `policy` on its own.
/// Fatal failures and rate limits that outlast the retries end the walk; any
/// other failure moves on to the next permutation.
async fn first_plausible<F, Fut>(
    operation_name: &str,
    query: &LocationQuery,
    policy: &RetryPolicy,
    spacing: Duration,
    mut attempt: F,
) -> Result<CandidateCoordinate, ProviderError>
where
    F: FnMut(String) -> Fut,
    Fut: std::future::Future<Output = Result<CandidateCoordinate, ProviderError>>,
{
    let mut last = ProviderError::NoResult;
    for (i, text) in query_permutations(query).into_iter().enumerate() {
        if i > 0 && !spacing.is_zero() {
            tokio::time::sleep(spacing).await;
        }
        match call_resilient(operation_name, policy, || attempt(text.clone())).await {
            Ok(candidate) => match check_plausible(&candidate, query) {
                Ok(()) => return Ok(candidate),
                Err(rejected) => {
                    tracing::debug!(permutation = %text, error = %rejected, "implausible answer");
                    last = rejected;
                }
            },
            Err(e) if e.is_fatal() || e == ProviderError::RateLimited => return Err(e),
            Err(e) => {
                tracing::trace!(permutation = %text, error = %e, "no answer");
                if !matches!(last, ProviderError::WrongCountry { .. } | ProviderError::OutOfRange { .. }) {
                    last = e;
                }
            }
        }
    }
    Err(last)
}

// ─── Google Geocoding ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GoogleResponse {
    status: String,
    #[serde(default)]
    results: Vec<GoogleResult>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleResult {
    geometry: GoogleGeometry,
    #[serde(default)]
    address_components: Vec<GoogleAddressComponent>,
    #[serde(default)]
    partial_match: bool,
}

#[derive(Debug, Deserialize)]
struct GoogleGeometry {
    location: GoogleLatLng,
    #[serde(default)]
    location_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleLatLng {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
struct GoogleAddressComponent {
    short_name: String,
    #[serde(default)]
    types: Vec<String>,
}

fn google_accuracy(location_type: Option<&str>) -> f64 {
    match location_type {
        Some("ROOFTOP") => 5.0,
        Some("RANGE_INTERPOLATED") => 20.0,
        Some("GEOMETRIC_CENTER") => 50.0,
        _ => 200.0,
    }
}

/// Normalize a Google Geocoding JSON body.
pub fn normalize_google(body: &str) -> Result<CandidateCoordinate, ProviderError> {
    let response: GoogleResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
    match response.status.as_str() {
        "OK" => {}
        "ZERO_RESULTS" => return Err(ProviderError::NoResult),
        "OVER_QUERY_LIMIT" | "OVER_DAILY_LIMIT" => return Err(ProviderError::RateLimited),
        "REQUEST_DENIED" => return Err(ProviderError::Credentials),
        "INVALID_REQUEST" => {
            return Err(ProviderError::MalformedQuery(
                response.error_message.unwrap_or_else(|| "invalid request".into()),
            ))
        }
        "UNKNOWN_ERROR" => return Err(ProviderError::Server(500)),
        other => return Err(ProviderError::MalformedResponse(format!("unknown status {}", other))),
    }

    let first = response.results.into_iter().next().ok_or(ProviderError::NoResult)?;
    let GoogleLatLng { lat, lng } = first.geometry.location;
    let coordinate = Coordinate::checked(lat, lng).ok_or(ProviderError::OutOfRange { lat, lng })?;
    let country = first
        .address_components
        .iter()
        .find(|c| c.types.iter().any(|t| t == "country"))
        .map(|c| c.short_name.clone());
    let quality = if first.partial_match { 0.8 } else { 1.0 };

    Ok(CandidateCoordinate::new(
        coordinate,
        SourceId::Google,
        SourceId::Google.base_weight() * quality,
        google_accuracy(first.geometry.location_type.as_deref()),
    )
    .with_country(country))
}

/// Primary commercial geocoder. Disabled without an API key.
pub struct GoogleAdapter {
    agent: ureq::Agent,
    base_url: String,
    api_key: String,
    policy: RetryPolicy,
    spacing: Duration,
}

impl GoogleAdapter {
    /// `None` when no API key is configured.
    pub fn from_config(config: &ProviderConfig, policy: RetryPolicy, spacing: Duration) -> Option<Self> {
        let api_key = config.google_api_key.clone().filter(|k| !k.trim().is_empty())?;
        Some(Self {
            agent: build_agent(config, policy.attempt_timeout),
            base_url: config.google_base_url.clone(),
            api_key,
            policy,
            spacing,
        })
    }
}

#[async_trait]
impl SourceAdapter for GoogleAdapter {
    fn source(&self) -> SourceId {
        SourceId::Google
    }

    async fn fetch(&self, query: &LocationQuery) -> Result<CandidateCoordinate, ProviderError> {
        let region = expected_country(query).map(|c| c.to_lowercase());
        first_plausible("google", query, &self.policy, self.spacing, |text| {
            let mut params = vec![
                ("address".to_string(), text),
                ("key".to_string(), self.api_key.clone()),
                ("language".to_string(), query.language.clone()),
            ];
            if let Some(r) = &region {
                params.push(("region".to_string(), r.clone()));
            }
            let request = http_get_async(self.agent.clone(), self.base_url.clone(), params);
            async move { normalize_google(&request.await?) }
        })
        .await
    }

    fn retries_internally(&self) -> bool {
        true
    }
}

// ─── Nominatim ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct NominatimResult {
    lat: String,
    lon: String,
    #[serde(default)]
    importance: Option<f64>,
    #[serde(default)]
    boundingbox: Option<Vec<String>>,
    #[serde(default)]
    address: Option<NominatimAddress>,
}

#[derive(Debug, Deserialize)]
struct NominatimAddress {
    #[serde(default)]
    country_code: Option<String>,
}

/// Half the bounding-box diagonal, clamped to [5 m, 5 km].
fn bbox_accuracy(bbox: Option<&[String]>) -> f64 {
    let parsed: Option<Vec<f64>> = bbox.map(|b| b.iter().filter_map(|v| v.parse().ok()).collect());
    match parsed.as_deref() {
        Some([south, north, west, east]) => {
            let sw = Coordinate { lat: *south, lng: *west };
            let ne = Coordinate { lat: *north, lng: *east };
            (haversine_distance(sw, ne) / 2.0).clamp(5.0, 5_000.0)
        }
        _ => 100.0,
    }
}

/// Normalize a Nominatim `format=json` body.
pub fn normalize_nominatim(body: &str) -> Result<CandidateCoordinate, ProviderError> {
    let results: Vec<NominatimResult> =
        serde_json::from_str(body).map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
    let first = results.into_iter().next().ok_or(ProviderError::NoResult)?;

    let lat: f64 = first
        .lat
        .parse()
        .map_err(|_| ProviderError::MalformedResponse(format!("bad lat '{}'", first.lat)))?;
    let lng: f64 = first
        .lon
        .parse()
        .map_err(|_| ProviderError::MalformedResponse(format!("bad lon '{}'", first.lon)))?;
    let coordinate = Coordinate::checked(lat, lng).ok_or(ProviderError::OutOfRange { lat, lng })?;

    let importance = first.importance.unwrap_or(0.3).clamp(0.0, 1.0);
    let quality = 0.6 + 0.4 * importance;
    let country = first.address.and_then(|a| a.country_code);

    Ok(CandidateCoordinate::new(
        coordinate,
        SourceId::Nominatim,
        SourceId::Nominatim.base_weight() * quality,
        bbox_accuracy(first.boundingbox.as_deref()),
    )
    .with_country(country))
}

/// OpenStreetMap geocoder, the secondary commercial-grade source.
pub struct NominatimAdapter {
    agent: ureq::Agent,
    base_url: String,
    policy: RetryPolicy,
    spacing: Duration,
}

impl NominatimAdapter {
    pub fn from_config(config: &ProviderConfig, policy: RetryPolicy, spacing: Duration) -> Option<Self> {
        config.nominatim_enabled.then(|| Self {
            agent: build_agent(config, policy.attempt_timeout),
            base_url: config.nominatim_base_url.clone(),
            policy,
            spacing,
        })
    }
}

#[async_trait]
impl SourceAdapter for NominatimAdapter {
    fn source(&self) -> SourceId {
        SourceId::Nominatim
    }

    async fn fetch(&self, query: &LocationQuery) -> Result<CandidateCoordinate, ProviderError> {
        let country = expected_country(query).map(|c| c.to_lowercase());
        first_plausible("nominatim", query, &self.policy, self.spacing, |text| {
            let mut params = vec![
                ("q".to_string(), text),
                ("format".to_string(), "json".to_string()),
                ("limit".to_string(), "1".to_string()),
                ("addressdetails".to_string(), "1".to_string()),
                ("accept-language".to_string(), query.language.clone()),
            ];
            if let Some(cc) = &country {
                params.push(("countrycodes".to_string(), cc.clone()));
            }
            let request = http_get_async(self.agent.clone(), self.base_url.clone(), params);
            async move { normalize_nominatim(&request.await?) }
        })
        .await
    }

    fn retries_internally(&self) -> bool {
        true
    }
}

// ─── Fan-out ────────────────────────────────────────────────────

/// Queries every adapter concurrently under the retry policy and the overall
/// budget. Failures become missing sources; they never fail the request.
pub struct FanOut {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    policy: RetryPolicy,
    budget: Duration,
    anchor_radius_m: f64,
}

impl FanOut {
    pub fn new(
        adapters: Vec<Arc<dyn SourceAdapter>>,
        policy: RetryPolicy,
        budget: Duration,
        anchor_radius_m: f64,
    ) -> Self {
        Self { adapters, policy, budget, anchor_radius_m }
    }

    pub fn sources(&self) -> Vec<SourceId> {
        self.adapters.iter().map(|a| a.source()).collect()
    }

    /// One adapter's answer, or `None` after logging why there is none.
    ///
    /// With an `anchor` (the selected candidate's curated coordinate), answers
    /// farther than the anchor radius are rejected.
    pub async fn resolve_source(
        &self,
        adapter: &dyn SourceAdapter,
        query: &LocationQuery,
        anchor: Option<Coordinate>,
    ) -> Option<CandidateCoordinate> {
        let source = adapter.source();
        let name = source.to_string();
        let attempt = async {
            if adapter.retries_internally() {
                adapter.fetch(query).await
            } else {
                call_resilient(&name, &self.policy, || adapter.fetch(query)).await
            }
        };
        let result = match tokio::time::timeout(self.budget, attempt).await {
            Ok(r) => r,
            Err(_) => Err(ProviderError::Timeout(self.budget)),
        };
        let result = result.and_then(|candidate| {
            check_plausible(&candidate, query)?;
            if let Some(a) = anchor {
                let distance_m = haversine_distance(a, candidate.coordinate);
                if distance_m > self.anchor_radius_m {
                    return Err(ProviderError::TooFar { distance_m });
                }
            }
            Ok(candidate)
        });

        match result {
            Ok(candidate) => {
                tracing::debug!(
                    source = %source,
                    query = %query.name,
                    lat = candidate.coordinate.lat,
                    lng = candidate.coordinate.lng,
                    confidence = candidate.confidence,
                    "source answered"
                );
                Some(candidate)
            }
            Err(e) => {
                match e.class() {
                    FailureClass::Unavailable => tracing::warn!(
                        source = %source,
                        query = %query.name,
                        language = %query.language,
                        error = %e,
                        "source unavailable"
                    ),
                    FailureClass::Rejected => tracing::info!(
                        source = %source,
                        query = %query.name,
                        language = %query.language,
                        data_quality = true,
                        error = %e,
                        "source answer rejected"
                    ),
                }
                None
            }
        }
    }

    /// Query every adapter concurrently and keep the answers that came back.
    pub async fn gather(&self, query: &LocationQuery, anchor: Option<Coordinate>) -> Vec<CandidateCoordinate> {
        let tasks = self
            .adapters
            .iter()
            .map(|adapter| self.resolve_source(adapter.as_ref(), query, anchor));
        futures::future::join_all(tasks).await.into_iter().flatten().collect()
    }
}
