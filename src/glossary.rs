use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::corpus::CorpusScope;
use crate::embedding::EmbeddingGenerator;
use crate::error::{PipelineError, Result};
use crate::retrieval::cosine_similarity;
use crate::textutil::{term_occurs, tokens_lower};

/// Conditions restricting where a term applies. Empty lists do not restrict.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextRules {
    /// Allowed domains or clients; the document must match one.
    #[serde(default)]
    pub use_only_in: Vec<String>,
    /// Domains, clients or document types the term must never be used in.
    #[serde(default)]
    pub exclude_from: Vec<String>,
    /// Allowed document types; the document must match one.
    #[serde(default)]
    pub document_types: Vec<String>,
    /// Tags that must ALL be present on the document.
    #[serde(default)]
    pub requires: Vec<String>,
}

/// Metadata of the document being translated, matched against term rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentContext {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub client: Option<String>,
    #[serde(default)]
    pub document_type: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlossaryTerm {
    pub id: u64,
    pub source_term: String,
    pub target_term: String,
    pub source_locale: String,
    pub target_locale: String,
    /// Forbidden terms must be kept verbatim, never translated.
    #[serde(default)]
    pub forbidden: bool,
    #[serde(default)]
    pub context_rules: Option<ContextRules>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl GlossaryTerm {
    pub fn new(
        source_term: impl Into<String>,
        target_term: impl Into<String>,
        source_locale: impl Into<String>,
        target_locale: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            source_term: source_term.into(),
            target_term: target_term.into(),
            source_locale: source_locale.into(),
            target_locale: target_locale.into(),
            forbidden: false,
            context_rules: None,
            project_id: None,
            embedding: None,
            notes: None,
        }
    }

    pub fn forbidden(mut self) -> Self {
        self.forbidden = true;
        self
    }

    pub fn with_rules(mut self, rules: ContextRules) -> Self {
        self.context_rules = Some(rules);
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// How a term's locale pair relates to the lookup scope. A reversed term
/// applies with source and target swapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermDirection {
    Direct,
    Reversed,
}

/// Terminology store, same shape and persistence model as the TM corpus.
pub struct GlossaryStore {
    terms: RwLock<Vec<GlossaryTerm>>,
    next_id: AtomicU64,
    persist_path: Option<PathBuf>,
}

impl Default for GlossaryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GlossaryStore {
    pub fn new() -> Self {
        Self {
            terms: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            persist_path: None,
        }
    }

    pub fn with_persistence(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut store = Self::new();
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let terms: Vec<GlossaryTerm> = serde_json::from_str(&raw).map_err(|e| {
                PipelineError::Persistence(format!("glossary file {}: {e}", path.display()))
            })?;
            let max_id = terms.iter().map(|t| t.id).max().unwrap_or(0);
            store.next_id = AtomicU64::new(max_id + 1);
            store.terms = RwLock::new(terms);
        }
        store.persist_path = Some(path);
        Ok(store)
    }

    pub fn insert(&self, mut term: GlossaryTerm) -> u64 {
        let id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
        term.id = id;
        self.terms.write().push(term);
        id
    }

    /// Updates the translation of an existing direct term under the same
    /// scope, or records a new one.
    pub fn upsert(
        &self,
        source_term: &str,
        target_term: &str,
        scope: &CorpusScope,
        forbidden: bool,
        notes: Option<String>,
    ) -> u64 {
        {
            let mut terms = self.terms.write();
            if let Some(term) = terms.iter_mut().find(|t| {
                t.source_term.eq_ignore_ascii_case(source_term)
                    && t.source_locale == scope.source_locale
                    && t.target_locale == scope.target_locale
                    && t.project_id == scope.project_id
            }) {
                term.target_term = target_term.to_string();
                term.forbidden = forbidden;
                if notes.is_some() {
                    term.notes = notes;
                }
                return term.id;
            }
        }
        let mut term = GlossaryTerm::new(
            source_term,
            target_term,
            scope.source_locale.clone(),
            scope.target_locale.clone(),
        );
        term.project_id = scope.project_id.clone();
        term.forbidden = forbidden;
        term.notes = notes;
        self.insert(term)
    }

    /// Visits terms whose locale pair matches the scope directly or
    /// reversed. Project terms stay inside their project, like TM units.
    pub fn for_each_in_pair(
        &self,
        scope: &CorpusScope,
        mut f: impl FnMut(&GlossaryTerm, TermDirection),
    ) {
        for term in self.terms.read().iter() {
            if term.project_id.is_some() && term.project_id != scope.project_id {
                continue;
            }
            if term.source_locale == scope.source_locale
                && term.target_locale == scope.target_locale
            {
                f(term, TermDirection::Direct);
            } else if term.source_locale == scope.target_locale
                && term.target_locale == scope.source_locale
            {
                f(term, TermDirection::Reversed);
            }
        }
    }

    /// Most recently added terms for the scope, newest first.
    pub fn recent_for_scope(
        &self,
        scope: &CorpusScope,
        limit: usize,
    ) -> Vec<(GlossaryTerm, TermDirection)> {
        let mut out = Vec::new();
        self.for_each_in_pair(scope, |term, direction| {
            out.push((term.clone(), direction));
        });
        out.sort_by(|a, b| b.0.id.cmp(&a.0.id));
        out.truncate(limit);
        out
    }

    pub fn get(&self, id: u64) -> Option<GlossaryTerm> {
        self.terms.read().iter().find(|t| t.id == id).cloned()
    }

    pub fn missing_embeddings(&self, limit: usize) -> Vec<(u64, String)> {
        self.terms
            .read()
            .iter()
            .filter(|t| t.embedding.is_none())
            .take(limit)
            .map(|t| (t.id, t.source_term.clone()))
            .collect()
    }

    pub fn set_embedding(&self, id: u64, embedding: Vec<f32>) -> Result<()> {
        let mut terms = self.terms.write();
        match terms.iter_mut().find(|t| t.id == id) {
            Some(term) => {
                term.embedding = Some(embedding);
                Ok(())
            }
            None => Err(PipelineError::Validation(format!(
                "no glossary term with id {id}"
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.terms.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        let terms = self.terms.read();
        let json = serde_json::to_string_pretty(&*terms)
            .map_err(|e| PipelineError::Persistence(format!("serialize glossary: {e}")))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlossaryFilterConfig {
    /// Candidates kept from vector recall before the literal filter.
    pub recall_limit: usize,
    /// Cosine floor for recall, 0..=1.
    pub min_similarity: f32,
    /// Recent terms considered when vector recall is unavailable.
    pub fallback_recent: usize,
    /// Inflection suffix length tolerated by the occurrence check.
    pub max_suffix_len: usize,
}

impl Default for GlossaryFilterConfig {
    fn default() -> Self {
        Self {
            recall_limit: 50,
            min_similarity: 0.6,
            fallback_recent: 200,
            max_suffix_len: 3,
        }
    }
}

/// A term confirmed to occur in the text at hand, oriented for the scope.
#[derive(Debug, Clone, Serialize)]
pub struct RelevantTerm {
    pub term: String,
    pub translation: String,
    pub forbidden: bool,
    pub notes: Option<String>,
}

/// Two-stage glossary lookup: broad vector recall, then a literal occurrence
/// and context-rule filter. Never fails; a broken embedding path only widens
/// stage one to the most recent terms.
pub struct GlossaryFilter {
    store: Arc<GlossaryStore>,
    embedder: Option<Arc<dyn EmbeddingGenerator>>,
    cfg: GlossaryFilterConfig,
}

impl GlossaryFilter {
    pub fn new(
        store: Arc<GlossaryStore>,
        embedder: Option<Arc<dyn EmbeddingGenerator>>,
        cfg: GlossaryFilterConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            cfg,
        }
    }

    pub fn store(&self) -> &Arc<GlossaryStore> {
        &self.store
    }

    pub async fn find_relevant_terms(
        &self,
        source_text: &str,
        scope: &CorpusScope,
        doc: &DocumentContext,
    ) -> Vec<RelevantTerm> {
        if source_text.trim().is_empty() {
            return Vec::new();
        }
        let candidates = self.recall(source_text, scope).await;
        let text_lower = source_text.to_lowercase();
        let text_tokens = tokens_lower(source_text);

        let mut matched: Vec<(GlossaryTerm, String, String)> = Vec::new();
        for (term, direction) in candidates {
            let (src, dst) = match direction {
                TermDirection::Direct => (term.source_term.clone(), term.target_term.clone()),
                TermDirection::Reversed => (term.target_term.clone(), term.source_term.clone()),
            };
            if src.trim().is_empty() {
                continue;
            }
            if !self.occurs(&text_lower, &text_tokens, &src) {
                continue;
            }
            if !rules_allow(term.context_rules.as_ref(), doc) {
                continue;
            }
            matched.push((term, src, dst));
        }

        // Longest terms first so multiword entries outrank their fragments.
        matched.sort_by(|a, b| {
            b.1.chars()
                .count()
                .cmp(&a.1.chars().count())
                .then_with(|| b.0.id.cmp(&a.0.id))
        });
        let mut seen: HashSet<String> = HashSet::new();
        matched.retain(|(_, src, _)| seen.insert(src.to_lowercase()));

        matched
            .into_iter()
            .map(|(term, src, dst)| RelevantTerm {
                term: src,
                translation: dst,
                forbidden: term.forbidden,
                notes: term.notes,
            })
            .collect()
    }

    async fn recall(
        &self,
        source_text: &str,
        scope: &CorpusScope,
    ) -> Vec<(GlossaryTerm, TermDirection)> {
        if let Some(embedder) = &self.embedder {
            match embedder.embed(source_text, true).await {
                Ok(query) => {
                    let mut defect = false;
                    let mut scored: Vec<(GlossaryTerm, TermDirection, f32)> = Vec::new();
                    self.store.for_each_in_pair(scope, |term, direction| {
                        if defect {
                            return;
                        }
                        let Some(embedding) = &term.embedding else {
                            return;
                        };
                        match cosine_similarity(&query, embedding) {
                            Ok(similarity) => {
                                if similarity >= self.cfg.min_similarity {
                                    scored.push((term.clone(), direction, similarity));
                                }
                            }
                            Err(e) => {
                                warn!(
                                    error = %e,
                                    term_id = term.id,
                                    "glossary embedding width defect; using recent terms"
                                );
                                defect = true;
                            }
                        }
                    });
                    if !defect && !scored.is_empty() {
                        scored.sort_by(|a, b| {
                            b.2.partial_cmp(&a.2)
                                .unwrap_or(Ordering::Equal)
                                .then_with(|| b.0.id.cmp(&a.0.id))
                        });
                        scored.truncate(self.cfg.recall_limit);
                        return scored.into_iter().map(|(t, d, _)| (t, d)).collect();
                    }
                }
                Err(e) => {
                    warn!(error = %e, "glossary recall embedding failed; using recent terms");
                }
            }
        }
        self.store.recent_for_scope(scope, self.cfg.fallback_recent)
    }

    fn occurs(&self, text_lower: &str, text_tokens: &[String], term: &str) -> bool {
        let term_lower = term.to_lowercase();
        if text_lower.contains(&term_lower) {
            return true;
        }
        let term_tokens = tokens_lower(term);
        term_occurs(text_tokens, &term_tokens, self.cfg.max_suffix_len)
    }
}

fn list_has(list: &[String], value: &Option<String>) -> bool {
    match value {
        Some(v) => {
            let v = v.to_lowercase();
            list.iter().any(|x| x.to_lowercase() == v)
        }
        None => false,
    }
}

fn rules_allow(rules: Option<&ContextRules>, doc: &DocumentContext) -> bool {
    let Some(rules) = rules else {
        return true;
    };
    if list_has(&rules.exclude_from, &doc.domain)
        || list_has(&rules.exclude_from, &doc.client)
        || list_has(&rules.exclude_from, &doc.document_type)
    {
        return false;
    }
    if !rules.use_only_in.is_empty()
        && !(list_has(&rules.use_only_in, &doc.domain) || list_has(&rules.use_only_in, &doc.client))
    {
        return false;
    }
    if !rules.document_types.is_empty() && !list_has(&rules.document_types, &doc.document_type) {
        return false;
    }
    if !rules.requires.is_empty() {
        let tags: Vec<String> = doc.tags.iter().map(|t| t.to_lowercase()).collect();
        if !rules
            .requires
            .iter()
            .all(|r| tags.contains(&r.to_lowercase()))
        {
            return false;
        }
    }
    true
}

/// Prompt block listing confirmed terms. Empty input renders nothing.
pub fn render_for_prompt(terms: &[RelevantTerm]) -> String {
    if terms.is_empty() {
        return String::new();
    }
    let mut out = String::from("GLOSSARY (use these translations when the term appears):\n");
    for t in terms {
        if t.forbidden {
            out.push_str(&format!("- {} => DO NOT TRANSLATE (keep verbatim)", t.term));
        } else {
            out.push_str(&format!("- {} => {}", t.term, t.translation));
        }
        if let Some(notes) = &t.notes {
            out.push_str(&format!(" ({notes})"));
        }
        out.push('\n');
    }
    out
}
