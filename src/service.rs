//! Job-level facade over the pipeline: spawns runs, exposes progress and
//! cancellation, and hosts the review-side writes (confirmations, glossary
//! decisions, embedding backfill).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::corpus::{CorpusScope, TmStore};
use crate::document::{SegmentStatus, SegmentStore, SegmentWrite};
use crate::embedding::EmbeddingGenerator;
use crate::error::{PipelineError, Result};
use crate::glossary::GlossaryStore;
use crate::jobs::{JobRegistry, PretranslationJob};
use crate::pipeline::{PretranslateOptions, PretranslationPipeline};

pub struct PretranslationService {
    pipeline: Arc<PretranslationPipeline>,
    registry: Arc<JobRegistry>,
    tm: Arc<TmStore>,
    glossary: Arc<GlossaryStore>,
    embedder: Option<Arc<dyn EmbeddingGenerator>>,
    store: Arc<dyn SegmentStore>,
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl PretranslationService {
    pub fn new(
        pipeline: Arc<PretranslationPipeline>,
        registry: Arc<JobRegistry>,
        tm: Arc<TmStore>,
        glossary: Arc<GlossaryStore>,
        embedder: Option<Arc<dyn EmbeddingGenerator>>,
        store: Arc<dyn SegmentStore>,
    ) -> Self {
        Self {
            pipeline,
            registry,
            tm,
            glossary,
            embedder,
            store,
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Spawns a pretranslation run in the background. The document must be
    /// loadable up front; a run already in flight for it is replaced.
    pub fn start(&self, document_id: &str, options: PretranslateOptions) -> Result<()> {
        self.store.load(document_id)?;

        let mut handles = self.handles.lock();
        if let Some(stale) = handles.remove(document_id) {
            if !stale.is_finished() {
                warn!(document = document_id, "replacing a job still in flight");
                stale.abort();
            }
        }

        let pipeline = Arc::clone(&self.pipeline);
        let doc_id = document_id.to_string();
        let handle = tokio::spawn(async move {
            if let Err(e) = pipeline.pretranslate(&doc_id, &options).await {
                error!(document = %doc_id, error = %e, "pretranslation failed");
            }
        });
        handles.insert(document_id.to_string(), handle);
        Ok(())
    }

    pub fn progress(&self, document_id: &str) -> Option<PretranslationJob> {
        self.registry.get(document_id)
    }

    /// Requests cooperative cancellation. Returns false when no run is
    /// active for the document.
    pub fn cancel(&self, document_id: &str) -> bool {
        self.registry.cancel(document_id)
    }

    /// Waits for the spawned run to finish and returns the final snapshot.
    pub async fn await_job(&self, document_id: &str) -> Option<PretranslationJob> {
        let handle = self.handles.lock().remove(document_id);
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(document = document_id, error = %e, "job task failed");
                }
            }
        }
        self.registry.get(document_id)
    }

    /// Marks a segment as reviewed and feeds the pair back into the TM so
    /// the next run scores it as an exact match.
    pub fn confirm_segment(
        &self,
        document_id: &str,
        segment_index: usize,
        target_text: &str,
    ) -> Result<()> {
        let text = target_text.trim();
        if text.is_empty() {
            return Err(PipelineError::Validation(
                "confirmed target text must not be empty".to_string(),
            ));
        }
        let document = self.store.load(document_id)?;
        let segment = document.segments.get(segment_index).ok_or_else(|| {
            PipelineError::Validation(format!(
                "document {document_id}: no segment with index {segment_index}"
            ))
        })?;

        self.store.commit(
            document_id,
            &[SegmentWrite {
                index: segment_index,
                target_mt: text.to_string(),
                target_final: Some(text.to_string()),
                status: SegmentStatus::Confirmed,
                fuzzy_score: segment.fuzzy_score,
                best_match_ref: segment.best_match_ref,
            }],
        )?;

        let unit_id = self
            .tm
            .upsert(&segment.source_text, text, &document.scope(), Some(100));
        self.tm.save()?;
        info!(
            document = document_id,
            segment = segment_index,
            unit = unit_id,
            "segment confirmed into TM"
        );
        Ok(())
    }

    /// Records a reviewer's terminology decision in the glossary.
    pub fn resolve_term(
        &self,
        source_term: &str,
        target_term: &str,
        scope: &CorpusScope,
        forbidden: bool,
        notes: Option<String>,
    ) -> Result<u64> {
        if source_term.trim().is_empty() {
            return Err(PipelineError::Validation(
                "glossary source term must not be empty".to_string(),
            ));
        }
        let id = self
            .glossary
            .upsert(source_term.trim(), target_term.trim(), scope, forbidden, notes);
        self.glossary.save()?;
        Ok(id)
    }

    pub async fn backfill_embeddings(&self, batch_size: usize) -> Result<usize> {
        let Some(embedder) = self.embedder.as_ref() else {
            return Err(PipelineError::EmbeddingUnavailable(
                "no embedding generator configured".to_string(),
            ));
        };
        backfill_embeddings(&self.tm, &self.glossary, embedder.as_ref(), batch_size).await
    }
}

/// Embeds every TM unit and glossary term that does not carry a vector yet
/// and persists both stores. Returns how many embeddings were written.
pub async fn backfill_embeddings(
    tm: &TmStore,
    glossary: &GlossaryStore,
    embedder: &dyn EmbeddingGenerator,
    batch_size: usize,
) -> Result<usize> {
    let batch_size = batch_size.max(1);

    let tm_count = backfill(
        embedder,
        batch_size,
        |n| tm.missing_embeddings(n),
        |id, vector| tm.set_embedding(id, vector),
    )
    .await?;
    tm.save()?;

    let glossary_count = backfill(
        embedder,
        batch_size,
        |n| glossary.missing_embeddings(n),
        |id, vector| glossary.set_embedding(id, vector),
    )
    .await?;
    glossary.save()?;

    info!(
        tm = tm_count,
        glossary = glossary_count,
        "embedding backfill finished"
    );
    Ok(tm_count + glossary_count)
}

async fn backfill<M, S>(
    embedder: &dyn EmbeddingGenerator,
    batch_size: usize,
    missing: M,
    set: S,
) -> Result<usize>
where
    M: Fn(usize) -> Vec<(u64, String)>,
    S: Fn(u64, Vec<f32>) -> Result<()>,
{
    let mut total = 0usize;
    loop {
        let pending = missing(batch_size);
        if pending.is_empty() {
            return Ok(total);
        }
        let texts: Vec<String> = pending.iter().map(|(_, text)| text.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;
        if vectors.len() != pending.len() {
            return Err(PipelineError::EmbeddingUnavailable(format!(
                "embedding batch returned {} vectors for {} texts",
                vectors.len(),
                pending.len()
            )));
        }
        for ((id, _), vector) in pending.into_iter().zip(vectors) {
            set(id, vector)?;
            total += 1;
        }
    }
}
