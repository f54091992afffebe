use tracing::warn;

use crate::document::Document;
use crate::error::{PipelineError, Result};
use crate::jobs::JobUpdate;
use crate::pipeline::context::{assemble_batch_context, RagContext};
use crate::pipeline::prompts::render_template;
use crate::provider::TranslationRequest;
use crate::quality::review_draft;
use crate::retry::run_with_retry;
use crate::sentinels::{parse_segmented_output, wrap_segment};

use super::{ai_write, fallback_write, PretranslationPipeline, RunState};

impl PretranslationPipeline {
    /// Critic mode: each segment gets its own draft, a critique pass and,
    /// unless the critique says OK and no hard heuristic fired, a fix pass.
    /// Slower and chattier than batch mode, commits after every segment.
    pub(super) async fn run_critic_mode(
        &self,
        document: &mut Document,
        state: &mut RunState,
    ) -> Result<()> {
        let queued = std::mem::take(&mut state.queued);
        let total = queued.len();
        let source_locale = document.source_locale.clone();
        let target_locale = document.target_locale.clone();

        for (pos, &index) in queued.iter().enumerate() {
            self.check_cancel(document, state)?;
            self.registry.update(
                &state.document_id,
                JobUpdate {
                    current_segment: Some(index),
                    message: Some(format!("AI_PROCESSING (segment {}/{})", pos + 1, total)),
                    ..JobUpdate::default()
                },
            );
            self.progress.progress("critic", pos + 1, total);

            let source = document.segments[index].source_text.clone();
            let context = assemble_batch_context(
                &self.ranker,
                &self.glossary,
                document,
                &[index],
                &self.cfg.search,
                self.cfg.neighbor_window,
            )
            .await?;

            // Drafting reuses the batch prompt with a single wrapped segment.
            let segment_block = wrap_segment(index, &source);
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

            let response = match run_with_retry(self.cfg.provider.retry, "critic draft", || {
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
                    warn!(segment = index, error = %e, "draft failed; copying source text");
                    state.buffer.push(fallback_write(index, &source));
                    self.commit(document, state)?;
                    self.check_cancel(document, state)?;
                    continue;
                }
            };

            let draft = if response.usage.degraded {
                None
            } else {
                parse_segmented_output(&response.text, &[index])
                    .remove(&index)
                    .filter(|t| !t.trim().is_empty())
            };
            let Some(draft) = draft else {
                state.buffer.push(fallback_write(index, &source));
                self.commit(document, state)?;
                self.check_cancel(document, state)?;
                continue;
            };

            let final_text = self
                .review_and_fix(&source_locale, &target_locale, &source, draft, &context)
                .await?;
            let best = state.best_by_index.get(&index).copied();
            state.buffer.push(ai_write(index, final_text, best));
            self.commit(document, state)?;
            self.check_cancel(document, state)?;
        }
        Ok(())
    }

    /// Review loop for one draft. Only credential and rate-limit errors
    /// escape; anything else keeps the draft rather than losing the segment.
    async fn review_and_fix(
        &self,
        source_locale: &str,
        target_locale: &str,
        source: &str,
        draft: String,
        context: &RagContext,
    ) -> Result<String> {
        let checks = review_draft(source, &draft);
        let glossary_block = context.glossary_block();
        let heuristics = checks.render_block();

        let review_prompt = render_template(
            &self.cfg.prompts.critic_review,
            &[
                ("source_lang", source_locale),
                ("target_lang", target_locale),
                ("source", source),
                ("draft", &draft),
                ("glossary_block", &glossary_block),
                ("heuristics", &heuristics),
            ],
        );
        let review_request = TranslationRequest::new(review_prompt);
        let critique = match run_with_retry(self.cfg.provider.retry, "critic review", || {
            self.provider.translate(&review_request)
        })
        .await
        {
            Ok(response) if !response.usage.degraded => response.text,
            Ok(_) => return Ok(draft),
            Err(e @ (PipelineError::InvalidCredentials(_) | PipelineError::RateLimited(_))) => {
                return Err(e)
            }
            Err(e) => {
                warn!(error = %e, "critique failed; keeping draft");
                return Ok(draft);
            }
        };

        if critique.trim() == "OK" && !checks.needs_fix() {
            return Ok(draft);
        }

        let fix_prompt = render_template(
            &self.cfg.prompts.critic_fix,
            &[
                ("source_lang", source_locale),
                ("target_lang", target_locale),
                ("source", source),
                ("draft", &draft),
                ("critique", critique.trim()),
                ("glossary_block", &glossary_block),
                ("heuristics", &heuristics),
            ],
        );
        let fix_request = TranslationRequest::new(fix_prompt);
        match run_with_retry(self.cfg.provider.retry, "critic fix", || {
            self.provider.translate(&fix_request)
        })
        .await
        {
            Ok(response) if !response.usage.degraded && !response.text.trim().is_empty() => {
                Ok(response.text.trim().to_string())
            }
            Ok(_) => Ok(draft),
            Err(e @ (PipelineError::InvalidCredentials(_) | PipelineError::RateLimited(_))) => {
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "fix failed; keeping draft");
                Ok(draft)
            }
        }
    }
}
