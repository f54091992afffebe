use strsim::normalized_levenshtein;

use crate::corpus::{CorpusScope, TmStore};
use crate::retrieval::{rank, MatchCandidate, MatchMethod};

/// Edit-distance similarity on a 0..=100 scale.
///
/// 100 is reserved for byte-identical text; everything else is capped at 99
/// so an exact-match lookup can trust `score == 100.0`.
pub fn fuzzy_score(query: &str, candidate: &str) -> f32 {
    if query == candidate {
        return 100.0;
    }
    let sim = normalized_levenshtein(query, candidate) as f32;
    (sim * 100.0).round().clamp(0.0, 99.0)
}

/// Scans the scope and returns units scoring at least `min_score`.
pub fn search_fuzzy(
    store: &TmStore,
    query: &str,
    scope: &CorpusScope,
    min_score: f32,
    limit: usize,
) -> Vec<MatchCandidate> {
    let mut candidates = Vec::new();
    store.for_each_in_scope(scope, |unit| {
        let score = fuzzy_score(query, &unit.source_text);
        if score >= min_score {
            candidates.push(MatchCandidate {
                id: unit.id,
                source_text: unit.source_text.clone(),
                target_text: unit.target_text.clone(),
                score,
                method: MatchMethod::Fuzzy,
            });
        }
    });
    rank(&mut candidates);
    candidates.truncate(limit);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_scores_hundred() {
        assert_eq!(fuzzy_score("Power on the device.", "Power on the device."), 100.0);
        assert_eq!(fuzzy_score("", ""), 100.0);
    }

    #[test]
    fn near_match_never_reaches_hundred() {
        let score = fuzzy_score("Power on the device.", "Power on the device");
        assert!(score >= 90.0 && score <= 99.0, "got {score}");
        // One edit over a longest length of 12: round(100 * (1 - 1/12)).
        assert_eq!(fuzzy_score("Hello world", "Hello world!"), 92.0);
        assert_eq!(fuzzy_score("abc", ""), 0.0);
    }

    #[test]
    fn unrelated_text_scores_low() {
        assert!(fuzzy_score("Power on the device.", "Квартальный отчёт") < 30.0);
    }

    #[test]
    fn search_filters_sorts_and_breaks_ties_by_recency() {
        let store = TmStore::new();
        let scope = CorpusScope::new("en-US", "de-DE");
        let old = store.insert("Press the button", "Knopf drücken", &scope, None);
        let new = store.insert("Press the button", "Taste drücken", &scope, None);
        store.insert("Completely different sentence", "Anders", &scope, None);

        let hits = search_fuzzy(&store, "Press the button", &scope, 60.0, 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, new);
        assert_eq!(hits[1].id, old);
        assert!(hits.iter().all(|h| h.method == MatchMethod::Fuzzy));

        let top_only = search_fuzzy(&store, "Press the button", &scope, 60.0, 1);
        assert_eq!(top_only.len(), 1);
        assert_eq!(top_only[0].id, new);
    }
}
