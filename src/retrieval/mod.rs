//! TM lookup: fuzzy string matching, vector similarity, and the hybrid
//! ranker that merges both.

pub mod fuzzy;
pub mod hybrid;
pub mod vector;

pub use fuzzy::{fuzzy_score, search_fuzzy};
pub use hybrid::HybridRanker;
pub use vector::{cosine_similarity, search_vector};

use std::cmp::Ordering;

use serde::Serialize;

use crate::corpus::CorpusScope;

/// Which index produced a candidate. Hybrid means both agreed on the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Fuzzy,
    Vector,
    Hybrid,
}

/// One ranked TM hit. Scores live on a 0..=100 scale where 100 means the
/// source text is byte-identical.
#[derive(Debug, Clone, Serialize)]
pub struct MatchCandidate {
    pub id: u64,
    pub source_text: String,
    pub target_text: String,
    pub score: f32,
    pub method: MatchMethod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Fuzzy only, for exact hits and score floors.
    Basic,
    /// Fuzzy plus vector recall, for RAG example gathering.
    Extended,
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub scope: CorpusScope,
    pub limit: usize,
    pub min_score: f32,
    /// Cosine floor for the vector side, 0..=1.
    pub vector_similarity: f32,
    pub mode: SearchMode,
    pub use_vector_search: bool,
}

impl SearchOptions {
    /// Only a byte-identical unit qualifies.
    pub fn exact(scope: CorpusScope) -> Self {
        Self {
            scope,
            limit: 1,
            min_score: 100.0,
            vector_similarity: 1.0,
            mode: SearchMode::Basic,
            use_vector_search: false,
        }
    }

    pub fn suggestions(scope: CorpusScope, limit: usize, min_score: f32) -> Self {
        Self {
            scope,
            limit,
            min_score,
            vector_similarity: 1.0,
            mode: SearchMode::Basic,
            use_vector_search: false,
        }
    }

    pub fn extended(
        scope: CorpusScope,
        limit: usize,
        min_score: f32,
        vector_similarity: f32,
    ) -> Self {
        Self {
            scope,
            limit,
            min_score,
            vector_similarity,
            mode: SearchMode::Extended,
            use_vector_search: true,
        }
    }
}

/// Best score first; equal scores prefer the larger (more recent) id.
pub(crate) fn rank(candidates: &mut [MatchCandidate]) {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.id.cmp(&a.id))
    });
}
