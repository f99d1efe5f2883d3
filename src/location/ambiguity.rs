//! Selection among several real places that share one name.

use super::dataset::Datasets;
use super::providers::expected_country;
use super::types::{LocationCandidate, LocationQuery};
use crate::config::MatchingConfig;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

const REGION_BONUS: f64 = 0.6;
const ALIAS_BONUS: f64 = 0.2;
const KEYWORD_BONUS: f64 = 0.3;
const DESCRIPTION_BONUS: f64 = 0.1;
const MIN_TOKEN_CHARS: usize = 3;

const STOPWORDS: &[&str] = &["the", "and", "for", "with", "from", "near", "its", "own", "home", "city"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityState {
    Unresolved,
    CandidatesListed,
    ContextApplied,
    Resolved,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredCandidate {
    pub candidate: LocationCandidate,
    pub context_match: f64,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AmbiguityOutcome {
    pub selected: LocationCandidate,
    /// Score of the selected candidate, in [0, 1].
    pub confidence: f64,
    /// All candidates, best first.
    pub ranked: Vec<ScoredCandidate>,
    pub should_show_alternatives: bool,
    pub alternatives: Vec<LocationCandidate>,
    pub reasoning: Vec<String>,
    /// States visited, in order.
    pub states: Vec<AmbiguityState>,
}

impl AmbiguityOutcome {
    pub fn is_ambiguous(&self) -> bool {
        self.ranked.len() > 1
    }
}

pub struct AmbiguityResolver {
    data: Arc<Datasets>,
    config: MatchingConfig,
}

impl AmbiguityResolver {
    pub fn new(data: Arc<Datasets>, config: MatchingConfig) -> Self {
        Self { data, config }
    }

    /// Always selects something: a lone candidate built from the query when the
    /// name is not in the ambiguity table, else the best-scoring entry.
    pub fn resolve(&self, query: &LocationQuery) -> AmbiguityOutcome {
        let mut states = vec![AmbiguityState::Unresolved];

        let Some(candidates) = self.data.ambiguity_candidates(&query.name) else {
            let selected = single_candidate(query);
            states.push(AmbiguityState::Resolved);
            return AmbiguityOutcome {
                ranked: vec![ScoredCandidate { candidate: selected.clone(), context_match: 0.0, score: 1.0 }],
                selected,
                confidence: 1.0,
                should_show_alternatives: false,
                alternatives: Vec::new(),
                reasoning: vec![format!("'{}' is not a known ambiguous name", query.name)],
                states,
            };
        };
        states.push(AmbiguityState::CandidatesListed);
        let mut reasoning = vec![format!("'{}' matches {} known places", query.name, candidates.len())];

        let context = query.context.text();
        let expected = expected_country(query);
        let matches: Vec<f64> = candidates
            .iter()
            .map(|c| context_match(c, &context, expected.as_deref()))
            .collect();
        if !context.is_empty() || expected.is_some() {
            states.push(AmbiguityState::ContextApplied);
        }
        let any_context = matches.iter().any(|m| *m > 0.0);

        let mut ranked: Vec<ScoredCandidate> = candidates
            .iter()
            .zip(matches)
            .map(|(c, m)| {
                let score = if any_context {
                    self.config.popularity_weight * c.popularity + self.config.context_weight * m
                } else {
                    c.popularity
                };
                ScoredCandidate { candidate: c.clone(), context_match: m, score: score.clamp(0.0, 1.0) }
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.candidate.id.cmp(&b.candidate.id))
        });

        if any_context {
            for r in ranked.iter().filter(|r| r.context_match > 0.0) {
                reasoning.push(format!("context favours {} (match {:.2})", r.candidate.id, r.context_match));
            }
        } else {
            reasoning.push("no context match, ranking by popularity".to_string());
        }

        let top = &ranked[0];
        let gap = ranked.get(1).map_or(f64::INFINITY, |second| top.score - second.score);
        let should_show_alternatives = gap < self.config.alternatives_gap || top.score < self.config.low_confidence;
        reasoning.push(format!("selected {} with score {:.2}", top.candidate.id, top.score));
        if should_show_alternatives {
            reasoning.push(format!("offering alternatives (margin {:.2}, confidence {:.2})", gap, top.score));
        }

        let selected = top.candidate.clone();
        let confidence = top.score;
        let alternatives = if should_show_alternatives {
            ranked.iter().skip(1).map(|r| r.candidate.clone()).collect()
        } else {
            Vec::new()
        };
        states.push(AmbiguityState::Resolved);

        AmbiguityOutcome {
            selected,
            confidence,
            ranked,
            should_show_alternatives,
            alternatives,
            reasoning,
            states,
        }
    }
}

fn single_candidate(query: &LocationQuery) -> LocationCandidate {
    let ctx = &query.context;
    LocationCandidate {
        id: query.normalized_name(),
        display_name: query.name.clone(),
        region: ctx.region.clone().unwrap_or_default(),
        region_aliases: Vec::new(),
        country: ctx.country.clone().unwrap_or_default(),
        country_code: expected_country(query),
        popularity: 1.0,
        aliases: Vec::new(),
        description: String::new(),
        coordinate: None,
        keywords: Vec::new(),
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
}

/// How strongly free-text context points at `candidate`, in [0, 1].
///
/// `context` is expected lowercased (see `QueryContext::text`).
pub fn context_match(candidate: &LocationCandidate, context: &str, country_code: Option<&str>) -> f64 {
    let contains = |s: &str| {
        let s = s.trim().to_lowercase();
        !s.is_empty() && context.contains(&s)
    };

    let mut score = 0.0;
    let region_hit = contains(&candidate.region)
        || candidate.region_aliases.iter().any(|r| contains(r))
        || contains(&candidate.country)
        || matches!(
            (country_code, candidate.country_code.as_deref()),
            (Some(a), Some(b)) if a.eq_ignore_ascii_case(b)
        );
    if region_hit {
        score += REGION_BONUS;
    }
    score += ALIAS_BONUS * candidate.aliases.iter().filter(|a| contains(a)).count() as f64;
    score += KEYWORD_BONUS * candidate.keywords.iter().filter(|k| contains(k)).count() as f64;

    let context_tokens: HashSet<String> = tokens(context).collect();
    let description_tokens: HashSet<String> = tokens(&candidate.description).collect();
    score += DESCRIPTION_BONUS * description_tokens.intersection(&context_tokens).count() as f64;

    score.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::types::QueryContext;

    fn resolver() -> AmbiguityResolver {
        AmbiguityResolver::new(Arc::new(Datasets::embedded().unwrap()), MatchingConfig::default())
    }

    fn query(name: &str, lang: &str, ctx: QueryContext) -> LocationQuery {
        LocationQuery::new(name, lang).unwrap().with_context(ctx)
    }

    fn region(r: &str) -> QueryContext {
        QueryContext { region: Some(r.into()), ..Default::default() }
    }

    fn hint(h: &str) -> QueryContext {
        QueryContext { hint: Some(h.into()), ..Default::default() }
    }

    #[test]
    fn test_unknown_name_short_circuits() {
        let out = resolver().resolve(&query("Reykjavik", "en", QueryContext::default()));
        assert!(!out.is_ambiguous());
        assert_eq!(out.selected.display_name, "Reykjavik");
        assert_eq!(out.confidence, 1.0);
        assert!(!out.should_show_alternatives);
        assert_eq!(out.states, vec![AmbiguityState::Unresolved, AmbiguityState::Resolved]);
    }

    #[test]
    fn test_context_names_one_city() {
        let r = resolver();
        let incheon = r.resolve(&query("용궁사", "ko", region("Incheon")));
        assert_eq!(incheon.selected.id, "yonggungsa-incheon");
        let incheon_ko = r.resolve(&query("용궁사", "ko", region("인천")));
        assert_eq!(incheon_ko.selected.id, "yonggungsa-incheon");
        let busan = r.resolve(&query("용궁사", "ko", region("부산")));
        assert_eq!(busan.selected.id, "yonggungsa-busan");
    }

    #[test]
    fn test_coastal_keyword_biases_seaside_temple() {
        let out = resolver().resolve(&query("용궁사", "ko", hint("바다가 보이는 절")));
        assert_eq!(out.selected.id, "yonggungsa-busan");
        assert!(out.ranked[0].context_match >= KEYWORD_BONUS);
    }

    #[test]
    fn test_popularity_fallback_without_context() {
        let out = resolver().resolve(&query("Paris", "en", QueryContext::default()));
        assert_eq!(out.selected.id, "paris-france");
        assert_eq!(out.confidence, 1.0);
        assert!(!out.should_show_alternatives);
        assert!(out.alternatives.is_empty());
        assert!(!out.states.contains(&AmbiguityState::ContextApplied));
    }

    #[test]
    fn test_close_scores_show_alternatives() {
        // UK 0.9 vs US 0.8 on popularity alone.
        let out = resolver().resolve(&query("Cambridge", "en", QueryContext::default()));
        assert_eq!(out.selected.id, "cambridge-uk");
        assert!(out.should_show_alternatives);
        assert_eq!(out.alternatives.len(), 1);
        assert_eq!(out.alternatives[0].id, "cambridge-us");
    }

    #[test]
    fn test_clear_context_commits() {
        let out = resolver().resolve(&query("Cambridge", "en", region("Massachusetts")));
        assert_eq!(out.selected.id, "cambridge-us");
        assert!(!out.should_show_alternatives);
        assert_eq!(
            out.states,
            vec![
                AmbiguityState::Unresolved,
                AmbiguityState::CandidatesListed,
                AmbiguityState::ContextApplied,
                AmbiguityState::Resolved
            ]
        );
    }

    #[test]
    fn test_deterministic() {
        let r = resolver();
        let q = query("Alexandria", "en", hint("old town near washington, virginia"));
        let a = r.resolve(&q);
        let b = r.resolve(&q);
        assert_eq!(a.selected.id, b.selected.id);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.selected.id, "alexandria-virginia");
    }

    #[test]
    fn test_tie_break_is_lexicographic() {
        let json = r#"{
            "ambiguity": [{
                "names": ["springfield"],
                "candidates": [
                    { "id": "springfield-b", "display_name": "Springfield", "popularity": 0.5 },
                    { "id": "springfield-a", "display_name": "Springfield", "popularity": 0.5 }
                ]
            }]
        }"#;
        let data = Arc::new(Datasets::from_json(json).unwrap());
        let r = AmbiguityResolver::new(data, MatchingConfig::default());
        let out = r.resolve(&query("Springfield", "en", hint("zzz")));
        assert_eq!(out.selected.id, "springfield-a");
        assert!(out.should_show_alternatives);
    }

    #[test]
    fn test_context_match_is_capped() {
        let data = Datasets::embedded().unwrap();
        let busan = data
            .ambiguity_candidates("용궁사")
            .unwrap()
            .iter()
            .find(|c| c.id == "yonggungsa-busan")
            .unwrap()
            .clone();
        let m = context_match(&busan, "busan 바다 해안 해변 기장 sea coast ocean", None);
        assert_eq!(m, 1.0);
    }

    #[test]
    fn test_country_code_counts_as_region() {
        let data = Datasets::embedded().unwrap();
        let cands = data.ambiguity_candidates("paris").unwrap();
        let texas = cands.iter().find(|c| c.id == "paris-texas").unwrap();
        assert_eq!(context_match(texas, "", Some("us")), REGION_BONUS);
    }
}
