use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::corpus::TmStore;
use crate::embedding::EmbeddingGenerator;
use crate::error::Result;
use crate::retrieval::{rank, search_fuzzy, search_vector, MatchCandidate, MatchMethod, SearchOptions};

/// Merges fuzzy and vector recall over the same corpus.
///
/// The fuzzy side always runs. The vector side runs only for extended
/// searches with an embedder wired in, and quietly drops out when the query
/// embedding cannot be produced; a failed model endpoint must never take
/// plain TM matching down with it.
pub struct HybridRanker {
    tm: Arc<TmStore>,
    embedder: Option<Arc<dyn EmbeddingGenerator>>,
}

impl HybridRanker {
    pub fn new(tm: Arc<TmStore>, embedder: Option<Arc<dyn EmbeddingGenerator>>) -> Self {
        Self { tm, embedder }
    }

    pub fn corpus(&self) -> &Arc<TmStore> {
        &self.tm
    }

    pub async fn search(&self, query: &str, opts: &SearchOptions) -> Result<Vec<MatchCandidate>> {
        let fuzzy = search_fuzzy(&self.tm, query, &opts.scope, opts.min_score, opts.limit);

        let mut merged: HashMap<u64, MatchCandidate> =
            fuzzy.into_iter().map(|c| (c.id, c)).collect();

        if opts.use_vector_search {
            if let Some(query_embedding) = self.query_embedding(query).await {
                let vector = search_vector(
                    &self.tm,
                    &query_embedding,
                    &opts.scope,
                    opts.vector_similarity,
                    opts.limit,
                )?;
                for candidate in vector {
                    match merged.entry(candidate.id) {
                        Entry::Occupied(mut slot) => {
                            let both = slot.get_mut();
                            both.score = both.score.max(candidate.score);
                            both.method = MatchMethod::Hybrid;
                        }
                        Entry::Vacant(slot) => {
                            slot.insert(candidate);
                        }
                    }
                }
            }
        }

        let mut out: Vec<MatchCandidate> = merged.into_values().collect();
        rank(&mut out);
        out.truncate(opts.limit);
        Ok(out)
    }

    async fn query_embedding(&self, query: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embedder.embed(query, true).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                warn!(error = %e, "embedding unavailable; falling back to fuzzy-only search");
                None
            }
        }
    }
}
