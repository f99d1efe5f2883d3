//! Location resolver: orchestrates the full pipeline.
//!
//! Place flow:    validate → cache → ambiguity → source fan-out → consensus → cache
//! Chapter flow:  resolve the site → POI match → tier strategy → package
//!
//! A failed or implausible source only removes one candidate. The request
//! fails only when nothing at all is known about the name.

use super::ambiguity::{AmbiguityOutcome, AmbiguityResolver};
use super::cache::ResolutionCache;
use super::consensus::{build_consensus, classify_quality, ConsensusResult};
use super::dataset::{DatasetError, Datasets, Site};
use super::package::{package, ChapterCoordinate, LocationPackage};
use super::poi::PoiMatcher;
use super::providers::{CuratedAdapter, FanOut, GazetteerAdapter, GoogleAdapter, NominatimAdapter, SourceAdapter};
use super::quality::{QualityManager, QualityReport};
use super::resilient::RetryPolicy;
use super::tiers::{PrecisionTier, TierRouter};
use super::types::{
    LocationError, LocationQuery, QueryContext, ResolutionMethod, ResolvedLocation, SourceId,
    VerificationStatus,
};
use crate::config::{Config, ConsensusConfig};
use chrono::Utc;
use std::sync::Arc;

/// Confidence discount applied when only the curated ambiguity coordinate is known.
const FALLBACK_CONFIDENCE: f64 = 0.5;

pub struct LocationResolver {
    data: Arc<Datasets>,
    ambiguity: AmbiguityResolver,
    fanout: FanOut,
    consensus: ConsensusConfig,
    router: TierRouter,
    matcher: PoiMatcher,
    quality: QualityManager,
    cache: ResolutionCache,
    /// Below this confidence the caller is told to confirm with the user.
    low_confidence: f64,
}

impl LocationResolver {
    /// Build the production resolver: datasets from config, every configured
    /// provider unless `offline`, file-backed cache.
    pub fn from_config(config: &Config, offline: bool) -> Result<Self, DatasetError> {
        let data = Arc::new(Datasets::load(config.datasets_path.as_deref())?);
        let mut adapters: Vec<Arc<dyn SourceAdapter>> = vec![
            Arc::new(CuratedAdapter::new(data.clone())),
            Arc::new(GazetteerAdapter::new(data.clone())),
        ];
        if !offline {
            let policy = RetryPolicy::from(&config.resilience);
            let spacing = config.resilience.permutation_spacing();
            if let Some(google) = GoogleAdapter::from_config(&config.providers, policy, spacing) {
                adapters.push(Arc::new(google));
            } else {
                tracing::info!("google geocoding disabled (no API key)");
            }
            if let Some(nominatim) = NominatimAdapter::from_config(&config.providers, policy, spacing) {
                adapters.push(Arc::new(nominatim));
            }
        }
        let cache = ResolutionCache::from_config(&config.cache);
        Ok(Self::with_parts(config, data, adapters, cache))
    }

    /// Curated and gazetteer sources only, in-memory cache.
    pub fn offline(config: &Config, data: Arc<Datasets>) -> Self {
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
            Arc::new(CuratedAdapter::new(data.clone())),
            Arc::new(GazetteerAdapter::new(data.clone())),
        ];
        Self::with_parts(config, data, adapters, ResolutionCache::in_memory(config.cache.ttl_days))
    }

    pub fn with_parts(
        config: &Config,
        data: Arc<Datasets>,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        cache: ResolutionCache,
    ) -> Self {
        let fanout = FanOut::new(
            adapters,
            RetryPolicy::from(&config.resilience),
            config.resilience.overall_budget(),
            config.consensus.anchor_radius_m,
        );
        Self {
            ambiguity: AmbiguityResolver::new(data.clone(), config.matching.clone()),
            router: TierRouter::new(data.tier_rules.clone(), config.tiers.clone()),
            matcher: PoiMatcher::new(config.matching.similarity_threshold),
            quality: QualityManager::new(config.quality.clone()),
            consensus: config.consensus.clone(),
            low_confidence: config.matching.low_confidence,
            cache,
            fanout,
            data,
        }
    }

    pub fn datasets(&self) -> &Datasets {
        &self.data
    }

    pub fn sources(&self) -> Vec<SourceId> {
        self.fanout.sources()
    }

    pub fn quality(&self) -> &QualityManager {
        &self.quality
    }

    /// Resolve one place name.
    pub async fn resolve(&self, query: &LocationQuery) -> Result<ResolvedLocation, LocationError> {
        let key = query.cache_key();
        if let Some(hit) = self.cache.get(&key) {
            tracing::debug!(query = %query.name, language = %query.language, "cache hit");
            return Ok(hit);
        }

        let outcome = self.ambiguity.resolve(query);
        let search = refined_query(query, &outcome);
        let anchor = outcome.selected.coordinate;
        let candidates = self.fanout.gather(&search, anchor).await;

        let resolved = match build_consensus(&candidates, &self.consensus) {
            Ok(consensus) => from_consensus(query, outcome, consensus, self.low_confidence),
            Err(_) => self.fallback(query, outcome)?,
        };
        tracing::info!(
            query = %query.name,
            language = %query.language,
            selected = %resolved.candidate.id,
            method = %resolved.method,
            sources = resolved.sources.len(),
            confidence = resolved.confidence,
            "location resolved"
        );
        self.cache.put_with_key(&key, &resolved).await;
        Ok(resolved)
    }

    /// Resolve and assess. Each call adds one entry to the quality history.
    pub async fn quality_report(
        &self,
        query: &LocationQuery,
    ) -> Result<(ResolvedLocation, QualityReport), LocationError> {
        let resolved = self.resolve(query).await?;
        let report = self.quality.assess(&resolved, Utc::now());
        Ok((resolved, report))
    }

    /// Resolve a site and locate each chapter title inside it.
    pub async fn resolve_package(
        &self,
        query: &LocationQuery,
        titles: &[String],
    ) -> Result<LocationPackage, LocationError> {
        let known_site = self.data.site(&query.name);
        let resolved = match self.resolve(query).await {
            Ok(r) => r,
            Err(LocationError::NoCandidatesFound { .. }) if known_site.is_some() => {
                let site = known_site.ok_or_else(|| no_candidates(query))?;
                self.site_fallback(query, site)
            }
            Err(e) => return Err(e),
        };
        let site = match known_site.or_else(|| self.data.site(&resolved.candidate.id)) {
            Some(s) => s.clone(),
            None => ad_hoc_site(&resolved),
        };

        let chapters = titles
            .iter()
            .map(|title| (title.clone(), self.locate_chapter(&site, title, &query.language)))
            .collect();
        let report = self.quality.assess(&resolved, Utc::now());
        Ok(package(&resolved, Some(&report), chapters))
    }

    /// Match a chapter title to a POI and locate it with its tier's strategy.
    pub fn locate_chapter(&self, site: &Site, title: &str, language: &str) -> ChapterCoordinate {
        let poi_match = self.matcher.match_title(title, site);
        let requested = self.router.classify(title, language);
        let tier = self.router.locate(requested, site, poi_match.poi.as_ref(), title, language);
        tracing::debug!(
            title,
            site = %site.id,
            matched = poi_match.is_match(),
            requested = ?requested,
            tier = ?tier.tier,
            "chapter located"
        );
        ChapterCoordinate { coordinate: tier.coordinate, accuracy_m: tier.accuracy_m, tier, poi_match }
    }

    /// No source answered: use the selected candidate's curated coordinate if
    /// there is one. Never invents a coordinate.
    fn fallback(&self, query: &LocationQuery, outcome: AmbiguityOutcome) -> Result<ResolvedLocation, LocationError> {
        let coordinate = outcome.selected.coordinate.ok_or_else(|| no_candidates(query))?;
        let accuracy_m = self.router.accuracy_for(PrecisionTier::Fallback);
        let mut reasoning = outcome.reasoning;
        reasoning.push(format!(
            "no source answered; using the curated coordinate of {}",
            outcome.selected.id
        ));
        tracing::warn!(query = %query.name, language = %query.language, "no source answered, using fallback");
        let confidence = (outcome.confidence * FALLBACK_CONFIDENCE).clamp(0.0, 1.0);
        Ok(ResolvedLocation {
            query: query.name.clone(),
            language: query.language.clone(),
            coordinate,
            accuracy_m,
            method: ResolutionMethod::Fallback,
            confidence,
            reasoning,
            should_show_alternatives: outcome.should_show_alternatives || confidence < self.low_confidence,
            alternatives: outcome.alternatives,
            sources: Vec::new(),
            quality_score: 0.0,
            verification: VerificationStatus::Estimated,
            quality_level: classify_quality(0.0, accuracy_m, &self.consensus),
            validated_at: Utc::now(),
            from_cache: false,
            candidate: outcome.selected,
        })
    }

    /// Resolution built from a curated site's center, for packages whose name
    /// no source recognised.
    fn site_fallback(&self, query: &LocationQuery, site: &Site) -> ResolvedLocation {
        let mut outcome = self.ambiguity.resolve(query);
        outcome.selected.coordinate = Some(site.center);
        outcome.selected.display_name = site.display_name().to_string();
        let accuracy_m = self.router.accuracy_for(PrecisionTier::Fallback);
        let confidence = (FALLBACK_CONFIDENCE * outcome.confidence).clamp(0.0, 1.0);
        ResolvedLocation {
            query: query.name.clone(),
            language: query.language.clone(),
            coordinate: site.center,
            accuracy_m,
            method: ResolutionMethod::Fallback,
            confidence,
            reasoning: vec![format!("no source answered; using the center of site {}", site.id)],
            should_show_alternatives: outcome.should_show_alternatives || confidence < self.low_confidence,
            alternatives: outcome.alternatives,
            sources: Vec::new(),
            quality_score: 0.0,
            verification: VerificationStatus::Estimated,
            quality_level: classify_quality(0.0, accuracy_m, &self.consensus),
            validated_at: Utc::now(),
            from_cache: false,
            candidate: outcome.selected,
        }
    }
}

fn no_candidates(query: &LocationQuery) -> LocationError {
    LocationError::NoCandidatesFound { query: query.name.clone(), language: query.language.clone() }
}

/// For an ambiguous name, point the sources at the selected candidate's
/// region and country. Caller-supplied category and hint are kept.
fn refined_query(query: &LocationQuery, outcome: &AmbiguityOutcome) -> LocationQuery {
    if !outcome.is_ambiguous() {
        return query.clone();
    }
    let c = &outcome.selected;
    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
    let context = QueryContext {
        region: non_empty(&c.region).or_else(|| query.context.region.clone()),
        country: non_empty(&c.country).or_else(|| query.context.country.clone()),
        country_code: c.country_code.clone().or_else(|| query.context.country_code.clone()),
        category: query.context.category.clone(),
        hint: query.context.hint.clone(),
    };
    query.clone().with_context(context)
}

fn method_for(consensus: &ConsensusResult) -> ResolutionMethod {
    match consensus.candidates.as_slice() {
        [only] if matches!(only.source, SourceId::Curated | SourceId::Gazetteer) => ResolutionMethod::Static,
        [_] => ResolutionMethod::Heuristic,
        _ => ResolutionMethod::Consensus,
    }
}

fn from_consensus(
    query: &LocationQuery,
    outcome: AmbiguityOutcome,
    consensus: ConsensusResult,
    low_confidence: f64,
) -> ResolvedLocation {
    let method = method_for(&consensus);
    let confidence = (outcome.confidence * consensus.average_confidence).clamp(0.0, 1.0);
    let mut reasoning = outcome.reasoning;
    reasoning.extend(consensus.reasoning);
    ResolvedLocation {
        query: query.name.clone(),
        language: query.language.clone(),
        candidate: outcome.selected,
        coordinate: consensus.coordinate,
        accuracy_m: consensus.accuracy_m,
        method,
        confidence,
        reasoning,
        should_show_alternatives: outcome.should_show_alternatives || confidence < low_confidence,
        alternatives: outcome.alternatives,
        sources: consensus.candidates,
        quality_score: consensus.quality_score,
        verification: consensus.verification,
        quality_level: consensus.quality_level,
        validated_at: Utc::now(),
        from_cache: false,
    }
}

/// A site with no curated POIs: every chapter lands on the resolved point.
fn ad_hoc_site(resolved: &ResolvedLocation) -> Site {
    Site {
        id: resolved.candidate.id.clone(),
        names: vec![resolved.candidate.display_name.clone()],
        center: resolved.coordinate,
        entrance: None,
        pois: Vec::new(),
        poi_keywords: Vec::new(),
    }
}
