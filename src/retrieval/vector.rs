use crate::corpus::{CorpusScope, TmStore};
use crate::error::{PipelineError, Result};
use crate::retrieval::{rank, MatchCandidate, MatchMethod};

/// Cosine similarity of two equal-width vectors.
///
/// Width disagreement is a data defect (an index built with a different
/// embedding model) and is reported instead of being scored as 0; callers
/// decide whether to degrade or abort. Zero-norm vectors compare as 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(PipelineError::DimensionMismatch {
            expected: a.len(),
            got: b.len(),
        });
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Scans embedded units in scope and returns those at or above
/// `min_similarity`, scored as similarity * 100. Units without an embedding
/// are skipped; one with a wrong-width embedding fails the whole search.
pub fn search_vector(
    store: &TmStore,
    query_embedding: &[f32],
    scope: &CorpusScope,
    min_similarity: f32,
    limit: usize,
) -> Result<Vec<MatchCandidate>> {
    let mut candidates = Vec::new();
    let mut failure: Option<PipelineError> = None;
    store.for_each_in_scope(scope, |unit| {
        if failure.is_some() {
            return;
        }
        let Some(embedding) = &unit.embedding else {
            return;
        };
        match cosine_similarity(query_embedding, embedding) {
            Ok(similarity) => {
                if similarity >= min_similarity {
                    candidates.push(MatchCandidate {
                        id: unit.id,
                        source_text: unit.source_text.clone(),
                        target_text: unit.target_text.clone(),
                        score: (similarity * 100.0).clamp(0.0, 100.0),
                        method: MatchMethod::Vector,
                    });
                }
            }
            Err(e) => failure = Some(e),
        }
    });
    if let Some(e) = failure {
        return Err(e);
    }
    rank(&mut candidates);
    candidates.truncate(limit);
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]).unwrap() - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap()).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]).unwrap(), 0.0);
    }

    #[test]
    fn cosine_rejects_width_mismatch() {
        let err = cosine_similarity(&[1.0, 0.0], &[1.0]).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DimensionMismatch {
                expected: 2,
                got: 1
            }
        ));
    }

    #[test]
    fn search_skips_unembedded_units() {
        let store = TmStore::new();
        let scope = CorpusScope::new("en-US", "de-DE");
        store.insert("no vector yet", "...", &scope, None);
        let id = store.insert_with_embedding("aligned", "passt", &scope, vec![1.0, 0.0]);
        store.insert_with_embedding("orthogonal", "quer", &scope, vec![0.0, 1.0]);

        let hits = search_vector(&store, &[1.0, 0.0], &scope, 0.75, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, id);
        assert_eq!(hits[0].method, MatchMethod::Vector);
        assert!((hits[0].score - 100.0).abs() < 0.01);
    }

    #[test]
    fn search_surfaces_width_defects() {
        let store = TmStore::new();
        let scope = CorpusScope::new("en-US", "de-DE");
        store.insert_with_embedding("stale index entry", "...", &scope, vec![1.0, 0.0, 0.0]);

        let err = search_vector(&store, &[1.0, 0.0], &scope, 0.5, 10).unwrap_err();
        assert!(matches!(err, PipelineError::DimensionMismatch { .. }));
    }
}
