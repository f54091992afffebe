mod batch;
mod critic;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::document::{apply_writes, Document, SegmentStatus, SegmentStore, SegmentWrite};
use crate::error::{PipelineError, Result};
use crate::glossary::GlossaryFilter;
use crate::jobs::{JobRegistry, JobUpdate, OutcomeKind, PretranslationJob, SegmentOutcome};
use crate::progress::ConsoleProgress;
use crate::provider::TranslationProvider;
use crate::retrieval::{HybridRanker, MatchCandidate, SearchOptions};

use super::config::{GenerationMode, PipelineConfig};

/// Which scanned segments are handed to the model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AiScope {
    /// Everything without an exact TM match.
    #[default]
    Both,
    /// Only segments that at least have a fuzzy suggestion.
    LowScoreMatches,
    /// Only segments with no usable suggestion at all.
    NoMatchOnly,
}

impl AiScope {
    pub fn parse(s: Option<&str>) -> Self {
        match s.unwrap_or("both").trim().to_ascii_lowercase().as_str() {
            "low" | "low_score" | "low_score_matches" => Self::LowScoreMatches,
            "none" | "no_match" | "no_match_only" => Self::NoMatchOnly,
            _ => Self::Both,
        }
    }
}

/// Per-run knobs. Defaults translate untouched segments only.
#[derive(Clone, Copy, Debug, Default)]
pub struct PretranslateOptions {
    /// Re-translate segments a reviewer already confirmed.
    pub rewrite_confirmed: bool,
    /// Re-translate segments holding an unreviewed draft.
    pub rewrite_non_confirmed: bool,
    pub ai_scope: AiScope,
    pub mode: GenerationMode,
}

/// One pending segment write paired with the outcome that will be reported
/// once the write is durable.
struct BufferedWrite {
    write: SegmentWrite,
    outcome: SegmentOutcome,
}

/// Mutable bookkeeping for a single run, shared by the scan and AI stages.
struct RunState {
    document_id: String,
    buffer: Vec<BufferedWrite>,
    tm_committed: usize,
    ai_committed: usize,
    /// Segment indexes waiting for the AI stage, in document order.
    queued: Vec<usize>,
    /// Best non-exact suggestion per queued segment: (score, unit id).
    best_by_index: HashMap<usize, (f32, u64)>,
}

impl RunState {
    fn new(document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            buffer: Vec::new(),
            tm_committed: 0,
            ai_committed: 0,
            queued: Vec::new(),
            best_by_index: HashMap::new(),
        }
    }
}

/// Drives a document through scan, AI generation and finalize. Writes are
/// buffered and committed in checkpoints; the job registry only ever reflects
/// what storage already holds.
pub struct PretranslationPipeline {
    cfg: PipelineConfig,
    ranker: Arc<HybridRanker>,
    glossary: Arc<GlossaryFilter>,
    provider: Arc<dyn TranslationProvider>,
    store: Arc<dyn SegmentStore>,
    registry: Arc<JobRegistry>,
    progress: ConsoleProgress,
}

impl PretranslationPipeline {
    pub fn new(
        cfg: PipelineConfig,
        ranker: Arc<HybridRanker>,
        glossary: Arc<GlossaryFilter>,
        provider: Arc<dyn TranslationProvider>,
        store: Arc<dyn SegmentStore>,
        registry: Arc<JobRegistry>,
        progress: ConsoleProgress,
    ) -> Self {
        Self {
            cfg,
            ranker,
            glossary,
            provider,
            store,
            registry,
            progress,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    /// Runs the full pipeline for one document and returns the final job
    /// snapshot. Cancellation ends the run early but is not an error; the
    /// returned job then carries the `Cancelled` status.
    pub async fn pretranslate(
        &self,
        document_id: &str,
        options: &PretranslateOptions,
    ) -> Result<PretranslationJob> {
        let mut document = self.store.load(document_id)?;

        let eligible: Vec<usize> = document
            .segments
            .iter()
            .filter(|seg| {
                if seg.source_text.trim().is_empty() {
                    return false;
                }
                if !seg.has_target() {
                    return true;
                }
                match seg.status {
                    SegmentStatus::Confirmed => options.rewrite_confirmed,
                    _ => options.rewrite_non_confirmed,
                }
            })
            .map(|seg| seg.index)
            .collect();

        self.registry.create(document_id, eligible.len());
        self.progress.stage("INIT");
        info!(
            document = document_id,
            eligible = eligible.len(),
            total = document.segments.len(),
            mode = ?options.mode,
            "pretranslation started"
        );

        if eligible.is_empty() {
            self.registry.complete(document_id);
            self.progress.info("no eligible segments, nothing to do");
            return self.snapshot(document_id);
        }

        let mut state = RunState::new(document_id);
        let run = self.run_stages(&mut document, &eligible, options, &mut state).await;

        self.progress.stage("FINALIZING");
        match run {
            Ok(()) => {
                self.commit(&mut document, &mut state)?;
                self.registry.complete(document_id);
                let job = self.snapshot(document_id)?;
                self.progress.summary(
                    "COMPLETED",
                    job.tm_applied,
                    job.ai_applied,
                    job.total_segments,
                );
                Ok(job)
            }
            // The cancel check already flushed the buffer.
            Err(PipelineError::Cancelled) => {
                self.registry.complete(document_id);
                let job = self.snapshot(document_id)?;
                self.progress.summary(
                    "CANCELLED",
                    job.tm_applied,
                    job.ai_applied,
                    job.total_segments,
                );
                Ok(job)
            }
            Err(e) => {
                if let Err(flush) = self.commit(&mut document, &mut state) {
                    warn!(error = %flush, "could not flush buffered writes after failure");
                }
                self.registry.set_error(document_id, e.to_string());
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        document: &mut Document,
        eligible: &[usize],
        options: &PretranslateOptions,
        state: &mut RunState,
    ) -> Result<()> {
        self.scan(document, eligible, options, state).await?;

        if state.queued.is_empty() {
            return Ok(());
        }
        self.registry.update(
            &state.document_id,
            JobUpdate {
                message: Some(format!("AI_QUEUED: {} segments", state.queued.len())),
                ..JobUpdate::default()
            },
        );
        self.progress.stage("AI_QUEUED");
        info!(queued = state.queued.len(), "segments queued for AI translation");

        self.progress.stage("AI_PROCESSING");
        match options.mode {
            GenerationMode::Batch => self.run_batch_mode(document, state).await,
            GenerationMode::Critic => self.run_critic_mode(document, state).await,
        }
    }

    /// Stage one: exact TM hits become writes, everything else collects a
    /// best-suggestion score and queues for AI per the requested scope.
    async fn scan(
        &self,
        document: &mut Document,
        eligible: &[usize],
        options: &PretranslateOptions,
        state: &mut RunState,
    ) -> Result<()> {
        self.progress.stage("SCANNING");
        self.registry.update(
            &state.document_id,
            JobUpdate {
                message: Some("SCANNING".to_string()),
                ..JobUpdate::default()
            },
        );

        for (pos, &index) in eligible.iter().enumerate() {
            self.check_cancel(document, state)?;

            if pos % self.cfg.progress_update_every == 0 {
                self.registry.update(
                    &state.document_id,
                    JobUpdate {
                        current_segment: Some(pos),
                        message: Some(format!("SCANNING segment {}/{}", pos + 1, eligible.len())),
                        ..JobUpdate::default()
                    },
                );
                self.progress.progress("scanning", pos + 1, eligible.len());
            }

            let source = document.segments[index].source_text.clone();
            let scope = document.scope();

            let exact = self
                .ranker
                .search(&source, &SearchOptions::exact(scope.clone()))
                .await?;
            if let Some(hit) = exact.into_iter().next() {
                state.buffer.push(tm_write(index, hit));
            } else {
                let suggestions = self
                    .ranker
                    .search(
                        &source,
                        &SearchOptions::suggestions(scope, 1, self.cfg.search.min_suggestion_score),
                    )
                    .await?;
                if let Some(best) = suggestions.first() {
                    state.best_by_index.insert(index, (best.score, best.id));
                }

                let wanted = match options.ai_scope {
                    AiScope::Both => true,
                    AiScope::LowScoreMatches => state.best_by_index.contains_key(&index),
                    AiScope::NoMatchOnly => !state.best_by_index.contains_key(&index),
                };
                if wanted {
                    state.queued.push(index);
                }
            }

            if state.buffer.len() >= self.cfg.checkpoint_every {
                self.commit(document, state)?;
                self.check_cancel(document, state)?;
            }
        }

        self.commit(document, state)
    }

    /// Flushes the buffer through the store, then mirrors outcomes and
    /// counters into the registry. Storage always leads the registry.
    fn commit(&self, document: &mut Document, state: &mut RunState) -> Result<()> {
        if state.buffer.is_empty() {
            return Ok(());
        }
        let writes: Vec<SegmentWrite> = state.buffer.iter().map(|b| b.write.clone()).collect();
        self.store.commit(&state.document_id, &writes)?;
        apply_writes(document, &writes)?;

        for buffered in state.buffer.drain(..) {
            match buffered.outcome.kind {
                OutcomeKind::TmExact => state.tm_committed += 1,
                OutcomeKind::Ai | OutcomeKind::Fallback => state.ai_committed += 1,
            }
            self.registry.append_result(&state.document_id, buffered.outcome);
        }
        self.registry.update(
            &state.document_id,
            JobUpdate {
                tm_applied: Some(state.tm_committed),
                ai_applied: Some(state.ai_committed),
                ..JobUpdate::default()
            },
        );
        Ok(())
    }

    /// Flush-then-stop: pending writes land before the cancel is honored, so
    /// a cancelled job never loses finished work.
    fn check_cancel(&self, document: &mut Document, state: &mut RunState) -> Result<()> {
        if self.registry.is_cancelled(&state.document_id) {
            self.commit(document, state)?;
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    fn snapshot(&self, document_id: &str) -> Result<PretranslationJob> {
        self.registry.get(document_id).ok_or_else(|| {
            PipelineError::Validation(format!("no job registered for document {document_id}"))
        })
    }
}

fn tm_write(index: usize, hit: MatchCandidate) -> BufferedWrite {
    BufferedWrite {
        write: SegmentWrite {
            index,
            target_mt: hit.target_text.clone(),
            target_final: Some(hit.target_text.clone()),
            status: SegmentStatus::Mt,
            fuzzy_score: Some(hit.score),
            best_match_ref: Some(hit.id),
        },
        outcome: SegmentOutcome {
            segment_index: index,
            kind: OutcomeKind::TmExact,
            target_text: hit.target_text,
            score: Some(hit.score),
        },
    }
}

fn ai_write(index: usize, text: String, best: Option<(f32, u64)>) -> BufferedWrite {
    BufferedWrite {
        write: SegmentWrite {
            index,
            target_mt: text.clone(),
            target_final: None,
            status: SegmentStatus::Mt,
            fuzzy_score: best.map(|(score, _)| score),
            best_match_ref: best.map(|(_, id)| id),
        },
        outcome: SegmentOutcome {
            segment_index: index,
            kind: OutcomeKind::Ai,
            target_text: text,
            score: best.map(|(score, _)| score),
        },
    }
}

/// Source text copied through so the document leaves the run fully
/// populated. Reported as a fallback, never as a translation.
fn fallback_write(index: usize, source_text: &str) -> BufferedWrite {
    BufferedWrite {
        write: SegmentWrite {
            index,
            target_mt: source_text.to_string(),
            target_final: None,
            status: SegmentStatus::Mt,
            fuzzy_score: None,
            best_match_ref: None,
        },
        outcome: SegmentOutcome {
            segment_index: index,
            kind: OutcomeKind::Fallback,
            target_text: source_text.to_string(),
            score: None,
        },
    }
}
