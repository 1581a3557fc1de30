// 🔎 Suggestion Ranker - Typeahead scoring for locations, specialties and organizations
//
// Score is decided by the first rule that matches, top-down:
//
//   exact 100 | prefix 90 | whole word 80 | substring 70
//   subsequence 50..70 | one deletion 40 | word stem 35 | nothing 0
//
// Query and candidate are lower-cased and diacritic-folded before scoring.

use crate::entities::provider::ProviderIndex;
use crate::normalizer::fold_diacritics;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const DEFAULT_SUGGESTION_LIMIT: usize = 8;
pub const MIN_QUERY_CHARS: usize = 2;

/// Typo rules only run from this query length
const TYPO_MIN_QUERY_CHARS: usize = 3;

// ============================================================================
// RULE CASCADE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchRule {
    Exact,
    Prefix,
    Word,
    Substring,
    Subsequence,
    SingleDeletion,
    WordStem,
}

struct RuleCheck {
    rule: MatchRule,
    eval: fn(&str, &str) -> Option<u8>,
}

const RULES: [RuleCheck; 7] = [
    RuleCheck { rule: MatchRule::Exact, eval: exact },
    RuleCheck { rule: MatchRule::Prefix, eval: prefix },
    RuleCheck { rule: MatchRule::Word, eval: whole_word },
    RuleCheck { rule: MatchRule::Substring, eval: substring },
    RuleCheck { rule: MatchRule::Subsequence, eval: subsequence },
    RuleCheck { rule: MatchRule::SingleDeletion, eval: single_deletion },
    RuleCheck { rule: MatchRule::WordStem, eval: word_stem },
];

fn exact(query: &str, candidate: &str) -> Option<u8> {
    (query == candidate).then_some(100)
}

fn prefix(query: &str, candidate: &str) -> Option<u8> {
    candidate.starts_with(query).then_some(90)
}

fn whole_word(query: &str, candidate: &str) -> Option<u8> {
    format!(" {} ", candidate)
        .contains(&format!(" {} ", query))
        .then_some(80)
}

fn substring(query: &str, candidate: &str) -> Option<u8> {
    candidate.contains(query).then_some(70)
}

/// 50 + (longest consecutive run / query length) * 20
///
/// Left to the deletion rule when one deleted character already makes the
/// query a substring: that is a typo, not a scattered abbreviation.
fn subsequence(query: &str, candidate: &str) -> Option<u8> {
    if deletion_hit(query, candidate) {
        return None;
    }

    let query_chars: Vec<char> = query.chars().collect();
    let mut next = 0;
    let mut last_pos: Option<usize> = None;
    let mut run = 0;
    let mut longest = 0;

    for (pos, c) in candidate.chars().enumerate() {
        if next == query_chars.len() {
            break;
        }
        if c != query_chars[next] {
            continue;
        }
        run = match last_pos {
            Some(last) if last + 1 == pos => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        last_pos = Some(pos);
        next += 1;
    }

    if next < query_chars.len() {
        return None;
    }
    let score = 50.0 + (longest as f64 / query_chars.len() as f64) * 20.0;
    Some(score.round() as u8)
}

fn single_deletion(query: &str, candidate: &str) -> Option<u8> {
    deletion_hit(query, candidate).then_some(40)
}

fn word_stem(query: &str, candidate: &str) -> Option<u8> {
    if query.chars().count() < TYPO_MIN_QUERY_CHARS {
        return None;
    }
    let stem: String = query.chars().take(TYPO_MIN_QUERY_CHARS).collect();
    candidate
        .split_whitespace()
        .any(|word| word.starts_with(&stem))
        .then_some(35)
}

/// Some single-character deletion of the query is a substring of the candidate
fn deletion_hit(query: &str, candidate: &str) -> bool {
    let chars: Vec<char> = query.chars().collect();
    if chars.len() < TYPO_MIN_QUERY_CHARS {
        return false;
    }
    (0..chars.len()).any(|skip| {
        let shortened: String = chars
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != skip)
            .map(|(_, c)| *c)
            .collect();
        candidate.contains(&shortened)
    })
}

fn prepare(text: &str) -> String {
    fold_diacritics(&text.trim().to_lowercase())
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Score a query against one display string with the rule that decided it
pub fn score_with_rule(query: &str, candidate: &str) -> Option<(MatchRule, u8)> {
    let query = prepare(query);
    let candidate = prepare(candidate);
    if query.is_empty() || candidate.is_empty() {
        return None;
    }

    RULES
        .iter()
        .find_map(|check| (check.eval)(&query, &candidate).map(|score| (check.rule, score)))
}

/// Score 0..=100, 0 when nothing matches
pub fn score(query: &str, candidate: &str) -> u8 {
    score_with_rule(query, candidate).map_or(0, |(_, score)| score)
}

// ============================================================================
// CANDIDATES & SUGGESTIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    Location,
    Specialty,
    Organization,
}

impl SuggestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionKind::Location => "location",
            SuggestionKind::Specialty => "specialty",
            SuggestionKind::Organization => "organization",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionCandidate {
    pub kind: SuggestionKind,
    pub id: String,
    pub name: String,

    /// Secondary text, also scored (city, category)
    pub subtitle: Option<String>,
}

impl SuggestionCandidate {
    pub fn new(kind: SuggestionKind, id: &str, name: &str) -> Self {
        SuggestionCandidate {
            kind,
            id: id.to_string(),
            name: name.to_string(),
            subtitle: None,
        }
    }

    /// Builder pattern: add subtitle
    pub fn with_subtitle(mut self, subtitle: &str) -> Self {
        if !subtitle.trim().is_empty() {
            self.subtitle = Some(subtitle.trim().to_string());
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub kind: SuggestionKind,
    pub id: String,
    pub name: String,
    pub subtitle: Option<String>,
    pub score: u8,
}

#[derive(Debug, Clone)]
pub struct SuggestionRanker {
    pub limit: usize,
    pub min_query_chars: usize,
}

impl SuggestionRanker {
    pub fn new(limit: usize, min_query_chars: usize) -> Self {
        SuggestionRanker {
            limit,
            min_query_chars,
        }
    }

    /// Ranked suggestions for a typeahead query
    ///
    /// Sorted by score, then alphabetically by folded name; duplicates of
    /// (kind, folded name) keep the best-ranked one.
    pub fn rank(&self, query: &str, candidates: &[SuggestionCandidate]) -> Vec<Suggestion> {
        if query.trim().chars().count() < self.min_query_chars {
            return Vec::new();
        }

        let mut scored: Vec<(String, Suggestion)> = candidates
            .iter()
            .filter_map(|candidate| {
                let name_score = score(query, &candidate.name);
                let subtitle_score = candidate
                    .subtitle
                    .as_deref()
                    .map_or(0, |subtitle| score(query, subtitle));
                let best = name_score.max(subtitle_score);
                if best == 0 {
                    return None;
                }
                Some((
                    prepare(&candidate.name),
                    Suggestion {
                        kind: candidate.kind,
                        id: candidate.id.clone(),
                        name: candidate.name.clone(),
                        subtitle: candidate.subtitle.clone(),
                        score: best,
                    },
                ))
            })
            .collect();

        scored.sort_by(|(a_key, a), (b_key, b)| b.score.cmp(&a.score).then_with(|| a_key.cmp(b_key)));

        let mut seen: HashSet<(SuggestionKind, String)> = HashSet::new();
        let suggestions: Vec<Suggestion> = scored
            .into_iter()
            .filter(|(key, s)| seen.insert((s.kind, key.clone())))
            .map(|(_, s)| s)
            .take(self.limit)
            .collect();

        tracing::debug!(query, results = suggestions.len(), "ranked suggestions");
        suggestions
    }
}

impl Default for SuggestionRanker {
    fn default() -> Self {
        Self::new(DEFAULT_SUGGESTION_LIMIT, MIN_QUERY_CHARS)
    }
}

/// Candidate pool from the provider index
///
/// Organizations carry their city, specialties their category, and every
/// distinct city becomes a location.
pub fn build_candidates(index: &ProviderIndex) -> Vec<SuggestionCandidate> {
    let mut candidates = Vec::new();

    for specialty in index.specialties().all_specialties() {
        candidates.push(
            SuggestionCandidate::new(SuggestionKind::Specialty, &specialty.id, &specialty.display_name)
                .with_subtitle(specialty.category.as_str()),
        );
    }

    let mut cities: HashSet<String> = HashSet::new();
    for provider in index.all_providers() {
        let mut candidate =
            SuggestionCandidate::new(SuggestionKind::Organization, &provider.id, &provider.display_name);
        if let Some(city) = &provider.city {
            candidate = candidate.with_subtitle(city);
            let key = prepare(city);
            if !key.is_empty() && cities.insert(key.clone()) {
                candidates.push(SuggestionCandidate::new(
                    SuggestionKind::Location,
                    &format!("city:{}", key),
                    city.trim(),
                ));
            }
        }
        candidates.push(candidate);
    }

    candidates
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deduplication::DeduplicationEngine;
    use crate::entities::provider::RawRecord;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_exact_rule() {
        assert_eq!(score_with_rule("pediatrie", "Pediatrie"), Some((MatchRule::Exact, 100)));
    }

    #[test]
    fn test_prefix_rule() {
        assert_eq!(score("otorin", "Otorinolaringologie"), 90);
        assert_eq!(score_with_rule("card", "Cardiologie").unwrap().0, MatchRule::Prefix);
    }

    #[test]
    fn test_word_rule() {
        assert_eq!(score_with_rule("pediatrica", "Cardiologie Pediatrică"), Some((MatchRule::Word, 80)));
    }

    #[test]
    fn test_substring_rule() {
        assert_eq!(score_with_rule("logie", "Cardiologie"), Some((MatchRule::Substring, 70)));
    }

    #[test]
    fn test_subsequence_rule_rewards_runs() {
        // "rd" is the longest run: 50 + 2/5 * 20
        assert_eq!(score_with_rule("crdlg", "Cardiologie"), Some((MatchRule::Subsequence, 58)));
        // "dermvn": "derm" runs 4 of 6
        assert_eq!(score_with_rule("dermvn", "Dermato-venerologie"), Some((MatchRule::Subsequence, 63)));
    }

    #[test]
    fn test_single_deletion_rule() {
        assert_eq!(score_with_rule("crdio", "Cardiologie"), Some((MatchRule::SingleDeletion, 40)));
        assert_eq!(score("cardxio", "Cardiologie"), 40);
    }

    #[test]
    fn test_word_stem_rule() {
        assert_eq!(score_with_rule("nefzz", "Clinica de nefrologie"), Some((MatchRule::WordStem, 35)));
    }

    #[test]
    fn test_no_match_scores_zero() {
        assert_eq!(score("xyz", "Cardiologie"), 0);
        assert_eq!(score("", "Cardiologie"), 0);
    }

    #[test]
    fn test_typo_rules_need_three_chars() {
        assert_eq!(score_with_rule("qa", "Cardiologie"), None);
    }

    #[test]
    fn test_diacritics_folded() {
        assert_eq!(score("pediatrica", "Pediatrică"), 100);
        assert_eq!(score("bucurești", "Bucuresti"), 100);
    }

    #[test]
    fn test_prefix_tie_broken_alphabetically() {
        let candidates = vec![
            SuggestionCandidate::new(SuggestionKind::Specialty, "s2", "Cardiologie Pediatrică"),
            SuggestionCandidate::new(SuggestionKind::Specialty, "s1", "Cardiologie"),
        ];

        let results = SuggestionRanker::default().rank("card", &candidates);

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].score, 90);
        assert_eq!(results[1].score, 90);
        assert_eq!(results[0].name, "Cardiologie");
        assert_eq!(results[1].name, "Cardiologie Pediatrică");
    }

    #[test]
    fn test_short_query_returns_nothing() {
        let candidates = vec![SuggestionCandidate::new(SuggestionKind::Location, "l1", "Cluj")];
        assert!(SuggestionRanker::default().rank("c", &candidates).is_empty());
        assert!(SuggestionRanker::default().rank("  ", &candidates).is_empty());
    }

    #[test]
    fn test_subtitle_scores_count() {
        let candidates = vec![
            SuggestionCandidate::new(SuggestionKind::Organization, "o1", "Clinica Sante").with_subtitle("Cluj-Napoca"),
        ];
        let results = SuggestionRanker::default().rank("cluj", &candidates);

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].score, 90);
    }

    #[test]
    fn test_zero_scores_dropped_and_duplicates_removed() {
        let candidates = vec![
            SuggestionCandidate::new(SuggestionKind::Location, "l1", "Iasi"),
            SuggestionCandidate::new(SuggestionKind::Location, "l2", "IASI"),
            SuggestionCandidate::new(SuggestionKind::Organization, "o1", "Iasi"),
            SuggestionCandidate::new(SuggestionKind::Location, "l3", "Brasov"),
        ];
        let results = SuggestionRanker::default().rank("iasi", &candidates);

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|s| s.score == 100));
        assert_eq!(results.iter().filter(|s| s.kind == SuggestionKind::Location).count(), 1);
    }

    #[test]
    fn test_duplicates_compared_without_diacritics() {
        let candidates = vec![
            SuggestionCandidate::new(SuggestionKind::Location, "l1", "Iași"),
            SuggestionCandidate::new(SuggestionKind::Location, "l2", "Iasi"),
            SuggestionCandidate::new(SuggestionKind::Location, "l3", " IAȘI "),
        ];
        let results = SuggestionRanker::default().rank("iasi", &candidates);

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].score, 100);
    }

    #[test]
    fn test_results_truncated_to_limit() {
        let candidates: Vec<SuggestionCandidate> = (0..20)
            .map(|i| SuggestionCandidate::new(SuggestionKind::Organization, &format!("o{}", i), &format!("Clinica {}", i)))
            .collect();

        assert_eq!(SuggestionRanker::default().rank("clinica", &candidates).len(), 8);
        assert_eq!(SuggestionRanker::new(3, 2).rank("clinica", &candidates).len(), 3);
    }

    #[test]
    fn test_build_candidates_from_index() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let records = vec![
            RawRecord::new("Clinica Sante SRL", "a.csv", 1, now)
                .with_city("Iași")
                .with_specialty("Cardiologie"),
            RawRecord::new("Laborator Nova", "a.csv", 2, now)
                .with_city("Iasi")
                .with_specialty("laborator"),
        ];
        let mut index = ProviderIndex::new();
        DeduplicationEngine::default().process_batch(&mut index, &records);

        let candidates = build_candidates(&index);

        let count = |kind| candidates.iter().filter(|c| c.kind == kind).count();
        assert_eq!(count(SuggestionKind::Organization), 2);
        assert_eq!(count(SuggestionKind::Specialty), index.specialties().count());
        assert_eq!(count(SuggestionKind::Location), 1);

        let results = SuggestionRanker::default().rank("iasi", &candidates);
        assert!(results.iter().all(|s| s.score == 100));
        assert!(results.iter().any(|s| s.kind == SuggestionKind::Location && s.name == "Iași"));
    }
}
