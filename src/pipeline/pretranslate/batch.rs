use tracing::warn;

use crate::document::Document;
use crate::error::{PipelineError, Result};
use crate::jobs::JobUpdate;
use crate::pipeline::context::assemble_batch_context;
use crate::pipeline::prompts::render_template;
use crate::provider::TranslationRequest;
use crate::retry::run_with_retry;
use crate::sentinels::{parse_segmented_output, wrap_segment};

use super::{ai_write, fallback_write, PretranslationPipeline, RunState};

impl PretranslationPipeline {
    /// Batch mode: queued segments go to the model in marker-wrapped chunks
    /// sharing one retrieved context. A batch that cannot be translated falls
    /// back to source text instead of failing the job; only credential and
    /// rate-limit errors are fatal.
    pub(super) async fn run_batch_mode(
        &self,
        document: &mut Document,
        state: &mut RunState,
    ) -> Result<()> {
        let queued = std::mem::take(&mut state.queued);
        if queued.is_empty() {
            return Ok(());
        }
        let total_batches = queued.len().div_ceil(self.cfg.ai_batch_size);

        for (batch_no, batch) in queued.chunks(self.cfg.ai_batch_size).enumerate() {
            self.check_cancel(document, state)?;
            self.registry.update(
                &state.document_id,
                JobUpdate {
                    current_segment: Some(batch[0]),
                    message: Some(format!(
                        "AI_PROCESSING (batch {}/{})",
                        batch_no + 1,
                        total_batches
                    )),
                    ..JobUpdate::default()
                },
            );
            self.progress.progress("ai batches", batch_no + 1, total_batches);

            let context = assemble_batch_context(
                &self.ranker,
                &self.glossary,
                document,
                batch,
                &self.cfg.search,
                self.cfg.neighbor_window,
            )
            .await?;

            let segment_block = batch
                .iter()
                .map(|&idx| wrap_segment(idx, &document.segments[idx].source_text))
                .collect::<Vec<_>>()
                .join("\n");
            let prompt = render_template(
                &self.cfg.prompts.batch_translate,
                &[
                    ("source_lang", document.source_locale.as_str()),
                    ("target_lang", document.target_locale.as_str()),
                    ("context_block", &context.render()),
                    ("segment_block", &segment_block),
                ],
            );
            let request = TranslationRequest::new(prompt);

            let response = match run_with_retry(self.cfg.provider.retry, "batch translate", || {
                self.provider.translate(&request)
            })
            .await
            {
                Ok(response) => response,
                Err(e @ (PipelineError::InvalidCredentials(_) | PipelineError::RateLimited(_))) => {
                    self.commit(document, state)?;
                    return Err(e);
                }
                Err(e) => {
                    warn!(batch = batch_no + 1, error = %e, "batch translation failed; copying source text");
                    for &idx in batch {
                        state
                            .buffer
                            .push(fallback_write(idx, &document.segments[idx].source_text));
                    }
                    self.commit(document, state)?;
                    self.check_cancel(document, state)?;
                    continue;
                }
            };

            if response.usage.degraded {
                for &idx in batch {
                    state
                        .buffer
                        .push(fallback_write(idx, &document.segments[idx].source_text));
                }
            } else {
                let parsed = parse_segmented_output(&response.text, batch);
                for &idx in batch {
                    match parsed.get(&idx) {
                        Some(text) if !text.trim().is_empty() => {
                            let best = state.best_by_index.get(&idx).copied();
                            state.buffer.push(ai_write(idx, text.clone(), best));
                        }
                        _ => {
                            warn!(segment = idx, "segment missing from model output; copying source text");
                            state
                                .buffer
                                .push(fallback_write(idx, &document.segments[idx].source_text));
                        }
                    }
                }
            }

            self.commit(document, state)?;
            self.check_cancel(document, state)?;
        }
        Ok(())
    }
}
