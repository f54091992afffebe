use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::corpus::CorpusScope;
use crate::error::{PipelineError, Result};
use crate::glossary::DocumentContext;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SegmentStatus {
    #[default]
    New,
    Mt,
    Confirmed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub index: usize,
    pub source_text: String,
    /// Machine or TM output, pending review.
    #[serde(default)]
    pub target_mt: Option<String>,
    /// Reviewed translation. Set directly only for exact TM matches.
    #[serde(default)]
    pub target_final: Option<String>,
    #[serde(default)]
    pub status: SegmentStatus,
    #[serde(default)]
    pub fuzzy_score: Option<f32>,
    /// Id of the TM unit the score refers to.
    #[serde(default)]
    pub best_match_ref: Option<u64>,
}

impl Segment {
    pub fn new(index: usize, source_text: impl Into<String>) -> Self {
        Self {
            index,
            source_text: source_text.into(),
            target_mt: None,
            target_final: None,
            status: SegmentStatus::New,
            fuzzy_score: None,
            best_match_ref: None,
        }
    }

    /// Whether any translation text is present, reviewed or not.
    pub fn has_target(&self) -> bool {
        let filled = |t: &Option<String>| t.as_deref().is_some_and(|s| !s.trim().is_empty());
        filled(&self.target_final) || filled(&self.target_mt)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    pub source_locale: String,
    pub target_locale: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub client: Option<String>,
    #[serde(default)]
    pub document_type: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub segments: Vec<Segment>,
}

impl Document {
    pub fn from_json(raw: &str) -> Result<Self> {
        let doc: Document = serde_json::from_str(raw)
            .map_err(|e| PipelineError::Validation(format!("malformed document: {e}")))?;
        doc.validate()?;
        Ok(doc)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw).map_err(|e| match e {
            PipelineError::Validation(msg) => {
                PipelineError::Validation(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(PipelineError::Validation("document id is empty".to_string()));
        }
        if self.source_locale.trim().is_empty() || self.target_locale.trim().is_empty() {
            return Err(PipelineError::Validation(format!(
                "document {} is missing a locale pair",
                self.id
            )));
        }
        for (pos, segment) in self.segments.iter().enumerate() {
            if segment.index != pos {
                return Err(PipelineError::Validation(format!(
                    "document {}: segment at position {pos} carries index {}",
                    self.id, segment.index
                )));
            }
        }
        Ok(())
    }

    pub fn scope(&self) -> CorpusScope {
        CorpusScope {
            source_locale: self.source_locale.clone(),
            target_locale: self.target_locale.clone(),
            project_id: self.project_id.clone(),
        }
    }

    pub fn context(&self) -> DocumentContext {
        DocumentContext {
            domain: self.domain.clone(),
            client: self.client.clone(),
            document_type: self.document_type.clone(),
            tags: self.tags.clone(),
        }
    }
}

/// One pending segment mutation. The pipeline buffers these and commits them
/// in batches so an interrupted run leaves only whole checkpoints behind.
#[derive(Debug, Clone)]
pub struct SegmentWrite {
    pub index: usize,
    pub target_mt: String,
    pub target_final: Option<String>,
    pub status: SegmentStatus,
    pub fuzzy_score: Option<f32>,
    pub best_match_ref: Option<u64>,
}

/// Durable segment storage. Commit must be atomic per call: either every
/// write in the slice lands or none does.
pub trait SegmentStore: Send + Sync {
    fn load(&self, document_id: &str) -> Result<Document>;
    fn commit(&self, document_id: &str, writes: &[SegmentWrite]) -> Result<()>;
}

pub(crate) fn apply_writes(doc: &mut Document, writes: &[SegmentWrite]) -> Result<()> {
    for write in writes {
        let segment = doc.segments.get_mut(write.index).ok_or_else(|| {
            PipelineError::Validation(format!(
                "document {}: no segment with index {}",
                doc.id, write.index
            ))
        })?;
        segment.target_mt = Some(write.target_mt.clone());
        segment.target_final = write.target_final.clone();
        segment.status = write.status;
        segment.fuzzy_score = write.fuzzy_score;
        segment.best_match_ref = write.best_match_ref;
    }
    Ok(())
}

/// Single-document store backed by a JSON file. Every commit rewrites the
/// file, so the on-disk state always reflects the last full checkpoint.
pub struct JsonDocumentStore {
    path: PathBuf,
    doc: Mutex<Document>,
}

impl JsonDocumentStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let doc = Document::load(&path)?;
        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    /// Seeds the file with `document` and opens a store over it.
    pub fn create(path: impl Into<PathBuf>, document: Document) -> Result<Self> {
        let path = path.into();
        let store = Self {
            path,
            doc: Mutex::new(document),
        };
        store.flush()?;
        Ok(store)
    }

    fn flush(&self) -> Result<()> {
        let doc = self.doc.lock();
        let json = serde_json::to_string_pretty(&*doc)
            .map_err(|e| PipelineError::Persistence(format!("serialize document: {e}")))?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

impl SegmentStore for JsonDocumentStore {
    fn load(&self, document_id: &str) -> Result<Document> {
        let doc = self.doc.lock();
        if doc.id != document_id {
            return Err(PipelineError::Validation(format!(
                "unknown document {document_id}; this store holds {}",
                doc.id
            )));
        }
        Ok(doc.clone())
    }

    fn commit(&self, document_id: &str, writes: &[SegmentWrite]) -> Result<()> {
        {
            let mut doc = self.doc.lock();
            if doc.id != document_id {
                return Err(PipelineError::Validation(format!(
                    "unknown document {document_id}; this store holds {}",
                    doc.id
                )));
            }
            apply_writes(&mut doc, writes)?;
        }
        self.flush()
    }
}

/// In-memory store for tests and embedded use. Supports failure injection
/// and a post-commit hook for exercising interruption behavior.
#[derive(Default)]
pub struct MemorySegmentStore {
    docs: Mutex<HashMap<String, Document>>,
    commits: AtomicUsize,
    fail_at: AtomicI64,
    hook: Mutex<Option<Box<dyn Fn(usize) + Send + Sync>>>,
}

impl MemorySegmentStore {
    pub fn new() -> Self {
        Self {
            docs: Mutex::new(HashMap::new()),
            commits: AtomicUsize::new(0),
            fail_at: AtomicI64::new(-1),
            hook: Mutex::new(None),
        }
    }

    pub fn put(&self, document: Document) {
        self.docs.lock().insert(document.id.clone(), document);
    }

    pub fn document(&self, document_id: &str) -> Option<Document> {
        self.docs.lock().get(document_id).cloned()
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Makes the n-th commit (1-based) fail with a persistence error.
    pub fn fail_at_commit(&self, n: i64) {
        self.fail_at.store(n, Ordering::SeqCst);
    }

    /// Runs after each successful commit with its 1-based ordinal.
    pub fn set_commit_hook(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        *self.hook.lock() = Some(Box::new(hook));
    }
}

impl SegmentStore for MemorySegmentStore {
    fn load(&self, document_id: &str) -> Result<Document> {
        self.docs
            .lock()
            .get(document_id)
            .cloned()
            .ok_or_else(|| PipelineError::Validation(format!("unknown document {document_id}")))
    }

    fn commit(&self, document_id: &str, writes: &[SegmentWrite]) -> Result<()> {
        let ordinal = self.commits.load(Ordering::SeqCst) + 1;
        let fail_at = self.fail_at.load(Ordering::SeqCst);
        if fail_at >= 0 && ordinal as i64 >= fail_at {
            return Err(PipelineError::Persistence(format!(
                "injected failure at commit {ordinal}"
            )));
        }
        {
            let mut docs = self.docs.lock();
            let doc = docs.get_mut(document_id).ok_or_else(|| {
                PipelineError::Validation(format!("unknown document {document_id}"))
            })?;
            apply_writes(doc, writes)?;
        }
        self.commits.store(ordinal, Ordering::SeqCst);
        if let Some(hook) = self.hook.lock().as_ref() {
            hook(ordinal);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_json() -> String {
        serde_json::json!({
            "id": "doc-1",
            "source_locale": "en-US",
            "target_locale": "de-DE",
            "segments": [
                { "index": 0, "source_text": "Hello" },
                { "index": 1, "source_text": "World" }
            ]
        })
        .to_string()
    }

    #[test]
    fn parses_minimal_document() {
        let doc = Document::from_json(&doc_json()).unwrap();
        assert_eq!(doc.segments.len(), 2);
        assert_eq!(doc.segments[1].status, SegmentStatus::New);
        assert!(!doc.segments[0].has_target());
    }

    #[test]
    fn rejects_misnumbered_segments() {
        let raw = serde_json::json!({
            "id": "doc-1",
            "source_locale": "en-US",
            "target_locale": "de-DE",
            "segments": [ { "index": 3, "source_text": "Hello" } ]
        })
        .to_string();
        let err = Document::from_json(&raw).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn commit_applies_and_persists() {
        let mut path = std::env::temp_dir();
        path.push(format!("pretranslator-doc-{}.json", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let doc = Document::from_json(&doc_json()).unwrap();
        let store = JsonDocumentStore::create(&path, doc).unwrap();
        store
            .commit(
                "doc-1",
                &[SegmentWrite {
                    index: 0,
                    target_mt: "Hallo".to_string(),
                    target_final: Some("Hallo".to_string()),
                    status: SegmentStatus::Mt,
                    fuzzy_score: Some(100.0),
                    best_match_ref: Some(7),
                }],
            )
            .unwrap();

        let reopened = JsonDocumentStore::open(&path).unwrap();
        let doc = reopened.load("doc-1").unwrap();
        assert_eq!(doc.segments[0].target_mt.as_deref(), Some("Hallo"));
        assert_eq!(doc.segments[0].status, SegmentStatus::Mt);
        assert!(doc.segments[0].has_target());
        assert!(reopened.load("doc-2").is_err());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn memory_store_failure_injection() {
        let store = MemorySegmentStore::new();
        store.put(Document::from_json(&doc_json()).unwrap());
        store.fail_at_commit(2);

        let write = SegmentWrite {
            index: 0,
            target_mt: "Hallo".to_string(),
            target_final: None,
            status: SegmentStatus::Mt,
            fuzzy_score: None,
            best_match_ref: None,
        };
        assert!(store.commit("doc-1", std::slice::from_ref(&write)).is_ok());
        assert!(store.commit("doc-1", std::slice::from_ref(&write)).is_err());
        assert_eq!(store.commit_count(), 1);
    }
}
