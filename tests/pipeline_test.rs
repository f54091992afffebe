//! End-to-end pipeline tests: scan, TM application, batched AI generation,
//! checkpoints and cancellation, all against in-memory stores and a mock
//! provider. No network, no embedding endpoint.

use std::sync::Arc;
use std::time::Duration;

use pretranslator::config::{ResolvedEmbedding, ResolvedProvider};
use pretranslator::corpus::{CorpusScope, TmStore};
use pretranslator::document::{
    Document, MemorySegmentStore, Segment, SegmentStatus, SegmentStore,
};
use pretranslator::embedding::CacheConfig;
use pretranslator::error::PipelineError;
use pretranslator::glossary::{GlossaryFilter, GlossaryFilterConfig, GlossaryStore, GlossaryTerm};
use pretranslator::jobs::{JobRegistry, JobStatus, OutcomeKind};
use pretranslator::pipeline::{
    AiScope, GenerationMode, PipelineConfig, PretranslateOptions, PretranslationPipeline,
    PromptSet, SearchSettings,
};
use pretranslator::progress::ConsoleProgress;
use pretranslator::provider::{MockProvider, TranslationProvider};
use pretranslator::retrieval::HybridRanker;
use pretranslator::retry::RetryPolicy;
use pretranslator::sentinels::wrap_segment;

fn test_config() -> PipelineConfig {
    PipelineConfig {
        config_path: None,
        search: SearchSettings {
            max_results: 10,
            min_suggestion_score: 60.0,
            extended_min_score: 50.0,
            vector_min_similarity: 0.75,
            use_vector_search: false,
            rag_examples: 5,
        },
        glossary: GlossaryFilterConfig::default(),
        provider: ResolvedProvider {
            base_url: "http://localhost:1".to_string(),
            model: "test-model".to_string(),
            api_key: None,
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::no_retry(),
        },
        embedding: ResolvedEmbedding {
            enabled: false,
            base_url: "http://localhost:1".to_string(),
            model: "test-embed".to_string(),
            api_key: None,
            dimension: 8,
            timeout: Duration::from_secs(5),
            cache: CacheConfig::default(),
            max_batch: 16,
        },
        tm_path: None,
        glossary_path: None,
        mode: GenerationMode::Batch,
        checkpoint_every: 5,
        progress_update_every: 5,
        ai_batch_size: 10,
        neighbor_window: 2,
        prompts: PromptSet::builtin(),
    }
}

fn make_document(id: &str, sources: &[&str]) -> Document {
    Document {
        id: id.to_string(),
        project_id: None,
        source_locale: "en-US".to_string(),
        target_locale: "de-DE".to_string(),
        domain: Some("manuals".to_string()),
        client: None,
        document_type: None,
        tags: Vec::new(),
        segments: sources
            .iter()
            .enumerate()
            .map(|(i, s)| Segment::new(i, *s))
            .collect(),
    }
}

struct Harness {
    pipeline: PretranslationPipeline,
    store: Arc<MemorySegmentStore>,
    provider: Arc<MockProvider>,
    registry: Arc<JobRegistry>,
}

fn harness(
    document: Document,
    tm_pairs: &[(&str, &str)],
    glossary_terms: Vec<GlossaryTerm>,
    cfg: PipelineConfig,
) -> Harness {
    let scope = CorpusScope::new("en-US", "de-DE");
    let tm = Arc::new(TmStore::new());
    for (src, tgt) in tm_pairs {
        tm.insert(*src, *tgt, &scope, None);
    }
    let glossary = Arc::new(GlossaryStore::new());
    for term in glossary_terms {
        glossary.insert(term);
    }

    let store = Arc::new(MemorySegmentStore::new());
    store.put(document);
    let provider = Arc::new(MockProvider::new());
    let registry = Arc::new(JobRegistry::new());

    let ranker = Arc::new(HybridRanker::new(Arc::clone(&tm), None));
    let filter = Arc::new(GlossaryFilter::new(
        glossary,
        None,
        GlossaryFilterConfig::default(),
    ));
    let dyn_store: Arc<dyn SegmentStore> = store.clone();
    let dyn_provider: Arc<dyn TranslationProvider> = provider.clone();

    let pipeline = PretranslationPipeline::new(
        cfg,
        ranker,
        filter,
        dyn_provider,
        dyn_store,
        Arc::clone(&registry),
        ConsoleProgress::disabled(),
    );

    Harness {
        pipeline,
        store,
        provider,
        registry,
    }
}

#[tokio::test]
async fn full_run_mixes_tm_exact_and_ai_batches() {
    let sources: Vec<String> = (0..10).map(|i| format!("Instruction line {i}")).collect();
    let source_refs: Vec<&str> = sources.iter().map(String::as_str).collect();
    let document = make_document("doc-mixed", &source_refs);

    // Exact TM matches for segments 0, 4 and 7.
    let tm_pairs = [
        ("Instruction line 0", "Anweisung Zeile 0"),
        ("Instruction line 4", "Anweisung Zeile 4"),
        ("Instruction line 7", "Anweisung Zeile 7"),
    ];
    let h = harness(document, &tm_pairs, Vec::new(), test_config());

    let queued = [1usize, 2, 3, 5, 6, 8, 9];
    let body: Vec<String> = queued
        .iter()
        .map(|&i| wrap_segment(i, &format!("Übersetzung {i}")))
        .collect();
    h.provider.add_response(body.join("\n"));

    let job = h
        .pipeline
        .pretranslate("doc-mixed", &PretranslateOptions::default())
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.total_segments, 10);
    assert_eq!(job.tm_applied, 3);
    assert_eq!(job.ai_applied, 7);
    assert_eq!(job.total_processed, 10);
    assert_eq!(job.progress_percentage, 100.0);
    assert_eq!(job.results.len(), 10);
    assert!(job.results[..3]
        .iter()
        .all(|r| r.kind == OutcomeKind::TmExact));
    assert_eq!(
        job.results
            .iter()
            .filter(|r| r.kind == OutcomeKind::Ai)
            .count(),
        7
    );
    assert_eq!(h.provider.calls(), 1);

    let doc = h.store.document("doc-mixed").unwrap();
    for &i in &[0usize, 4, 7] {
        assert_eq!(doc.segments[i].status, SegmentStatus::Mt);
        assert_eq!(doc.segments[i].fuzzy_score, Some(100.0));
        assert_eq!(
            doc.segments[i].target_final.as_deref(),
            Some(format!("Anweisung Zeile {i}").as_str())
        );
        assert!(doc.segments[i].best_match_ref.is_some());
    }
    for &i in &queued {
        assert_eq!(doc.segments[i].status, SegmentStatus::Mt);
        assert_eq!(
            doc.segments[i].target_mt.as_deref(),
            Some(format!("Übersetzung {i}").as_str())
        );
        assert!(doc.segments[i].target_final.is_none());
    }
}

#[tokio::test]
async fn cancellation_keeps_committed_checkpoints_only() {
    let sources: Vec<String> = (0..10).map(|i| format!("Sicherheitshinweis {i}")).collect();
    let source_refs: Vec<&str> = sources.iter().map(String::as_str).collect();
    let document = make_document("doc-cancel", &source_refs);

    // Every segment resolves from TM so the scan commits in checkpoints of 5.
    let tm_pairs: Vec<(String, String)> = (0..10)
        .map(|i| (format!("Sicherheitshinweis {i}"), format!("Safety note {i}")))
        .collect();
    let tm_refs: Vec<(&str, &str)> = tm_pairs
        .iter()
        .map(|(a, b)| (a.as_str(), b.as_str()))
        .collect();
    let h = harness(document, &tm_refs, Vec::new(), test_config());

    let registry = Arc::clone(&h.registry);
    h.store.set_commit_hook(move |n| {
        if n == 1 {
            registry.cancel("doc-cancel");
        }
    });

    let job = h
        .pipeline
        .pretranslate("doc-cancel", &PretranslateOptions::default())
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.tm_applied, 5);
    assert_eq!(job.ai_applied, 0);
    assert_eq!(job.total_processed, 5);
    assert_eq!(h.store.commit_count(), 1);

    let doc = h.store.document("doc-cancel").unwrap();
    for i in 0..5 {
        assert!(doc.segments[i].has_target());
    }
    for i in 5..10 {
        assert_eq!(doc.segments[i].status, SegmentStatus::New);
        assert!(!doc.segments[i].has_target());
    }
}

#[tokio::test]
async fn persistence_failure_marks_job_error_and_keeps_checkpoints() {
    let sources: Vec<String> = (0..10).map(|i| format!("Wartungsschritt {i}")).collect();
    let source_refs: Vec<&str> = sources.iter().map(String::as_str).collect();
    let document = make_document("doc-persist", &source_refs);

    let tm_pairs: Vec<(String, String)> = (0..10)
        .map(|i| (format!("Wartungsschritt {i}"), format!("Maintenance step {i}")))
        .collect();
    let tm_refs: Vec<(&str, &str)> = tm_pairs
        .iter()
        .map(|(a, b)| (a.as_str(), b.as_str()))
        .collect();
    let h = harness(document, &tm_refs, Vec::new(), test_config());
    h.store.fail_at_commit(2);

    let result = h
        .pipeline
        .pretranslate("doc-persist", &PretranslateOptions::default())
        .await;
    assert!(matches!(result, Err(PipelineError::Persistence(_))));

    let job = h.registry.get("doc-persist").unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.tm_applied, 5);
    assert_eq!(h.store.commit_count(), 1);

    let doc = h.store.document("doc-persist").unwrap();
    assert!(doc.segments[..5].iter().all(|s| s.has_target()));
    assert!(doc.segments[5..].iter().all(|s| !s.has_target()));
}

#[tokio::test]
async fn rerun_skips_segments_that_already_have_targets() {
    let document = make_document("doc-rerun", &["Close the cover.", "Open the cover."]);
    let h = harness(
        document,
        &[("Close the cover.", "Deckel schließen.")],
        Vec::new(),
        test_config(),
    );
    h.provider
        .add_response(wrap_segment(1, "Deckel öffnen."));

    let first = h
        .pipeline
        .pretranslate("doc-rerun", &PretranslateOptions::default())
        .await
        .unwrap();
    assert_eq!(first.total_processed, 2);
    let before = serde_json::to_value(h.store.document("doc-rerun").unwrap()).unwrap();

    // Default options leave populated segments alone: nothing eligible.
    let second = h
        .pipeline
        .pretranslate("doc-rerun", &PretranslateOptions::default())
        .await
        .unwrap();
    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!(second.total_segments, 0);
    assert_eq!(second.total_processed, 0);
    assert_eq!(h.provider.calls(), 1);

    let after = serde_json::to_value(h.store.document("doc-rerun").unwrap()).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn degraded_provider_falls_back_to_source_text() {
    let sources = [
        "Remove the four screws.",
        "Disconnect the power cable.",
        "Lift the side panel.",
    ];
    let document = make_document("doc-degraded", &sources);
    let h = harness(document, &[], Vec::new(), test_config());
    h.provider.set_degraded(true);

    let job = h
        .pipeline
        .pretranslate("doc-degraded", &PretranslateOptions::default())
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.tm_applied, 0);
    assert_eq!(job.ai_applied, 3);
    assert!(job
        .results
        .iter()
        .all(|r| r.kind == OutcomeKind::Fallback));

    let doc = h.store.document("doc-degraded").unwrap();
    for (i, source) in sources.iter().enumerate() {
        assert_eq!(doc.segments[i].target_mt.as_deref(), Some(*source));
        assert!(doc.segments[i].target_final.is_none());
    }
}

#[tokio::test]
async fn invalid_credentials_abort_the_job() {
    let document = make_document("doc-auth", &["First line.", "Second line.", "Third line."]);
    let h = harness(document, &[], Vec::new(), test_config());
    h.provider.push_error(PipelineError::InvalidCredentials(
        "api key rejected".to_string(),
    ));

    let result = h
        .pipeline
        .pretranslate("doc-auth", &PretranslateOptions::default())
        .await;
    assert!(matches!(result, Err(PipelineError::InvalidCredentials(_))));

    let job = h.registry.get("doc-auth").unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.current_message.contains("api key"));
}

#[tokio::test]
async fn ai_scope_no_match_only_skips_segments_with_suggestions() {
    let document = make_document(
        "doc-scope",
        &[
            "Close the cover.",
            "Open the main valve slowly",
            "Quarterly report summary",
        ],
    );
    let tm_pairs = [
        ("Close the cover.", "Deckel schließen."),
        ("Open the main valve", "Hauptventil öffnen"),
    ];
    let h = harness(document, &tm_pairs, Vec::new(), test_config());
    h.provider
        .add_response(wrap_segment(2, "Zusammenfassung des Quartalsberichts"));

    let options = PretranslateOptions {
        ai_scope: AiScope::NoMatchOnly,
        ..PretranslateOptions::default()
    };
    let job = h.pipeline.pretranslate("doc-scope", &options).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.tm_applied, 1);
    assert_eq!(job.ai_applied, 1);
    assert_eq!(h.provider.calls(), 1);

    let doc = h.store.document("doc-scope").unwrap();
    // The fuzzy-suggestion segment stays untouched under this scope.
    assert_eq!(doc.segments[1].status, SegmentStatus::New);
    assert!(!doc.segments[1].has_target());
    assert!(doc.segments[2].has_target());
}

#[tokio::test]
async fn batch_prompt_carries_context_and_glossary() {
    let document = make_document(
        "doc-context",
        &["Close the valve.", "Check the valve seal."],
    );
    let tm_pairs = [("Close the main valve.", "Hauptventil schließen.")];
    let glossary_terms = vec![GlossaryTerm::new("valve", "Ventil", "en-US", "de-DE")];
    let h = harness(document, &tm_pairs, glossary_terms, test_config());
    h.provider.add_response(format!(
        "{}\n{}",
        wrap_segment(0, "Ventil schließen."),
        wrap_segment(1, "Ventildichtung prüfen.")
    ));

    let job = h
        .pipeline
        .pretranslate("doc-context", &PretranslateOptions::default())
        .await
        .unwrap();
    assert_eq!(job.ai_applied, 2);

    let prompt = h.provider.last_prompt().unwrap();
    assert!(prompt.contains("DOCUMENT:"));
    assert!(prompt.contains("Hauptventil schließen."));
    assert!(prompt.contains("- valve => Ventil"));
    assert!(prompt.contains("<<PT_SEG:000000>>"));
    assert!(prompt.contains("<<PT_END:000001>>"));
}

#[tokio::test]
async fn critic_mode_accepts_clean_draft_without_fixing() {
    let document = make_document("doc-critic", &["Press the red button."]);
    let h = harness(document, &[], Vec::new(), test_config());
    h.provider
        .add_response(wrap_segment(0, "Drücken Sie den roten Knopf."));
    h.provider.add_response("OK");

    let options = PretranslateOptions {
        mode: GenerationMode::Critic,
        ..PretranslateOptions::default()
    };
    let job = h.pipeline.pretranslate("doc-critic", &options).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.ai_applied, 1);
    // Draft plus critique, no fix call.
    assert_eq!(h.provider.calls(), 2);

    let doc = h.store.document("doc-critic").unwrap();
    assert_eq!(
        doc.segments[0].target_mt.as_deref(),
        Some("Drücken Sie den roten Knopf.")
    );
}

#[tokio::test]
async fn critic_mode_applies_fix_when_critique_objects() {
    let document = make_document("doc-critic-fix", &["Tighten bolt 3 to 25 Nm."]);
    let h = harness(document, &[], Vec::new(), test_config());
    h.provider
        .add_response(wrap_segment(0, "Ziehen Sie Schraube 3 mit 25 Nm an."));
    h.provider.add_response("The torque unit should keep its spacing.");
    h.provider.add_response("Schraube 3 mit 25 Nm anziehen.");

    let options = PretranslateOptions {
        mode: GenerationMode::Critic,
        ..PretranslateOptions::default()
    };
    let job = h
        .pipeline
        .pretranslate("doc-critic-fix", &options)
        .await
        .unwrap();

    assert_eq!(job.ai_applied, 1);
    assert_eq!(h.provider.calls(), 3);

    let doc = h.store.document("doc-critic-fix").unwrap();
    assert_eq!(
        doc.segments[0].target_mt.as_deref(),
        Some("Schraube 3 mit 25 Nm anziehen.")
    );
}
