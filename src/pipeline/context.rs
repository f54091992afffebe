use std::collections::hash_map::Entry;
use std::collections::HashMap;

use futures::future::join_all;

use crate::document::Document;
use crate::error::Result;
use crate::glossary::{render_for_prompt, GlossaryFilter, RelevantTerm};
use crate::pipeline::config::SearchSettings;
use crate::retrieval::{HybridRanker, MatchCandidate, SearchOptions};

/// Everything retrieved for one prompt: document metadata, neighboring
/// segments, similar TM pairs and confirmed glossary terms.
#[derive(Debug, Default)]
pub struct RagContext {
    pub metadata: String,
    pub before: Vec<String>,
    pub after: Vec<String>,
    pub tm_examples: Vec<MatchCandidate>,
    pub glossary: Vec<RelevantTerm>,
}

impl RagContext {
    pub fn glossary_block(&self) -> String {
        render_for_prompt(&self.glossary)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.metadata.is_empty() {
            out.push_str(&format!("DOCUMENT: {}\n\n", self.metadata));
        }
        if !self.before.is_empty() {
            out.push_str("CONTEXT_BEFORE:\n");
            for line in &self.before {
                out.push_str(&format!("> {line}\n"));
            }
            out.push('\n');
        }
        if !self.after.is_empty() {
            out.push_str("CONTEXT_AFTER:\n");
            for line in &self.after {
                out.push_str(&format!("> {line}\n"));
            }
            out.push('\n');
        }
        if !self.tm_examples.is_empty() {
            out.push_str("TM EXAMPLES (previously approved translations):\n");
            for example in &self.tm_examples {
                out.push_str(&format!(
                    "- \"{}\" => \"{}\" (score {:.0})\n",
                    example.source_text, example.target_text, example.score
                ));
            }
            out.push('\n');
        }
        let glossary = self.glossary_block();
        if !glossary.is_empty() {
            out.push_str(&glossary);
        }
        out.trim_end().to_string()
    }
}

fn document_metadata(document: &Document) -> String {
    let mut parts = vec![
        document.id.clone(),
        format!("{} -> {}", document.source_locale, document.target_locale),
    ];
    if let Some(domain) = &document.domain {
        parts.push(format!("domain: {domain}"));
    }
    if let Some(client) = &document.client {
        parts.push(format!("client: {client}"));
    }
    if let Some(document_type) = &document.document_type {
        parts.push(format!("type: {document_type}"));
    }
    parts.join("; ")
}

fn neighbor_line(document: &Document, position: usize) -> Option<String> {
    let segment = document.segments.get(position)?;
    if segment.source_text.trim().is_empty() {
        return None;
    }
    let target = segment
        .target_final
        .as_deref()
        .or(segment.target_mt.as_deref());
    Some(match target {
        Some(t) if !t.trim().is_empty() => format!("{} => {t}", segment.source_text),
        _ => segment.source_text.clone(),
    })
}

/// Gathers the RAG context for one batch of segments. TM lookups for the
/// batch run concurrently; the glossary is filtered once over the combined
/// batch text.
pub async fn assemble_batch_context(
    ranker: &HybridRanker,
    filter: &GlossaryFilter,
    document: &Document,
    batch: &[usize],
    search: &SearchSettings,
    neighbor_window: usize,
) -> Result<RagContext> {
    let mut context = RagContext {
        metadata: document_metadata(document),
        ..RagContext::default()
    };
    let Some((&first, rest)) = batch.split_first() else {
        return Ok(context);
    };
    let last = rest.last().copied().unwrap_or(first);

    let scope = document.scope();
    let doc_ctx = document.context();

    let lookups = batch.iter().filter_map(|&idx| {
        let segment = document.segments.get(idx)?;
        if segment.source_text.trim().is_empty() {
            return None;
        }
        let mut opts = SearchOptions::extended(
            scope.clone(),
            search.rag_examples,
            search.extended_min_score,
            search.vector_min_similarity,
        );
        opts.use_vector_search = search.use_vector_search;
        Some(async move { ranker.search(&segment.source_text, &opts).await })
    });
    let mut merged: HashMap<u64, MatchCandidate> = HashMap::new();
    for result in join_all(lookups).await {
        for candidate in result? {
            match merged.entry(candidate.id) {
                Entry::Occupied(mut slot) => {
                    if candidate.score > slot.get().score {
                        slot.insert(candidate);
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(candidate);
                }
            }
        }
    }
    let mut examples: Vec<MatchCandidate> = merged.into_values().collect();
    examples.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.id.cmp(&a.id))
    });
    examples.truncate(search.rag_examples);
    context.tm_examples = examples;

    let batch_text = batch
        .iter()
        .filter_map(|&idx| document.segments.get(idx))
        .map(|s| s.source_text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    context.glossary = filter
        .find_relevant_terms(&batch_text, &scope, &doc_ctx)
        .await;

    for position in first.saturating_sub(neighbor_window)..first {
        if let Some(line) = neighbor_line(document, position) {
            context.before.push(line);
        }
    }
    for position in (last + 1)..=(last + neighbor_window).min(document.segments.len().saturating_sub(1)) {
        if let Some(line) = neighbor_line(document, position) {
            context.after.push(line);
        }
    }

    Ok(context)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::corpus::{CorpusScope, TmStore};
    use crate::document::Segment;
    use crate::glossary::{GlossaryFilterConfig, GlossaryStore, GlossaryTerm};

    fn make_document() -> Document {
        Document {
            id: "doc-ctx".to_string(),
            project_id: None,
            source_locale: "en-US".to_string(),
            target_locale: "de-DE".to_string(),
            domain: Some("energy".to_string()),
            client: None,
            document_type: Some("manual".to_string()),
            tags: Vec::new(),
            segments: vec![
                {
                    let mut s = Segment::new(0, "Safety instructions");
                    s.target_final = Some("Sicherheitshinweise".to_string());
                    s
                },
                Segment::new(1, "Connect the power cable"),
                Segment::new(2, "Press the start button"),
                Segment::new(3, "Close the cabinet door"),
            ],
        }
    }

    fn settings() -> SearchSettings {
        SearchSettings {
            max_results: 10,
            min_suggestion_score: 60.0,
            extended_min_score: 50.0,
            vector_min_similarity: 0.75,
            use_vector_search: false,
            rag_examples: 2,
        }
    }

    #[tokio::test]
    async fn assembles_examples_neighbors_and_glossary() {
        let tm = Arc::new(TmStore::new());
        let scope = CorpusScope::new("en-US", "de-DE");
        tm.insert("Connect the power cable", "Netzkabel anschließen", &scope, Some(100));
        tm.insert("Press the start button", "Starttaste drücken", &scope, Some(100));
        tm.insert("Press the stop button", "Stopptaste drücken", &scope, None);

        let glossary_store = Arc::new(GlossaryStore::new());
        glossary_store.insert(GlossaryTerm::new("power cable", "Netzkabel", "en-US", "de-DE"));
        glossary_store.insert(GlossaryTerm::new("substation", "Unterwerk", "en-US", "de-DE"));

        let ranker = HybridRanker::new(Arc::clone(&tm), None);
        let filter = GlossaryFilter::new(glossary_store, None, GlossaryFilterConfig::default());
        let document = make_document();

        let context =
            assemble_batch_context(&ranker, &filter, &document, &[1, 2], &settings(), 2)
                .await
                .unwrap();

        assert_eq!(context.tm_examples.len(), 2);
        assert!(context.tm_examples.iter().all(|e| e.score >= 50.0));
        assert_eq!(context.glossary.len(), 1);
        assert_eq!(context.glossary[0].term, "power cable");
        assert_eq!(context.before, vec!["Safety instructions => Sicherheitshinweise"]);
        assert_eq!(context.after, vec!["Close the cabinet door"]);

        let rendered = context.render();
        assert!(rendered.contains("DOCUMENT: doc-ctx; en-US -> de-DE; domain: energy; type: manual"));
        assert!(rendered.contains("CONTEXT_BEFORE:"));
        assert!(rendered.contains("TM EXAMPLES"));
        assert!(rendered.contains("GLOSSARY"));
    }

    #[tokio::test]
    async fn empty_batch_renders_metadata_only() {
        let ranker = HybridRanker::new(Arc::new(TmStore::new()), None);
        let filter = GlossaryFilter::new(
            Arc::new(GlossaryStore::new()),
            None,
            GlossaryFilterConfig::default(),
        );
        let document = make_document();
        let context = assemble_batch_context(&ranker, &filter, &document, &[], &settings(), 2)
            .await
            .unwrap();
        assert!(context.tm_examples.is_empty());
        assert!(context.render().starts_with("DOCUMENT:"));
    }
}
