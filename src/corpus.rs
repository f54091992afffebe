use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// One approved source/target pair in the translation memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationUnit {
    pub id: u64,
    pub source_text: String,
    pub target_text: String,
    pub source_locale: String,
    pub target_locale: String,
    /// None means the unit is global and visible to every project.
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Match rate recorded when the unit was written back, 0..=100.
    #[serde(default)]
    pub match_rate: Option<u8>,
}

/// Locale pair plus optional project a lookup runs under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusScope {
    pub source_locale: String,
    pub target_locale: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

impl CorpusScope {
    pub fn new(source_locale: impl Into<String>, target_locale: impl Into<String>) -> Self {
        Self {
            source_locale: source_locale.into(),
            target_locale: target_locale.into(),
            project_id: None,
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }
}

impl TranslationUnit {
    /// Global units are visible everywhere with matching locales; project
    /// units only inside their own project.
    pub fn visible_in(&self, scope: &CorpusScope) -> bool {
        self.source_locale == scope.source_locale
            && self.target_locale == scope.target_locale
            && (self.project_id.is_none() || self.project_id == scope.project_id)
    }
}

/// In-memory translation memory with optional JSON persistence.
///
/// Ids are store-assigned and only grow, so a larger id always names a more
/// recent unit; ranking uses that for recency tie-breaks.
pub struct TmStore {
    units: RwLock<Vec<TranslationUnit>>,
    next_id: AtomicU64,
    persist_path: Option<PathBuf>,
}

impl Default for TmStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TmStore {
    pub fn new() -> Self {
        Self {
            units: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            persist_path: None,
        }
    }

    /// Opens a store backed by a JSON file, loading it when it exists.
    pub fn with_persistence(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut store = Self::new();
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let units: Vec<TranslationUnit> = serde_json::from_str(&raw).map_err(|e| {
                PipelineError::Persistence(format!("corpus file {}: {e}", path.display()))
            })?;
            let max_id = units.iter().map(|u| u.id).max().unwrap_or(0);
            store.next_id = AtomicU64::new(max_id + 1);
            store.units = RwLock::new(units);
        }
        store.persist_path = Some(path);
        Ok(store)
    }

    fn push(&self, mut unit: TranslationUnit) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        unit.id = id;
        self.units.write().push(unit);
        id
    }

    pub fn insert(
        &self,
        source_text: impl Into<String>,
        target_text: impl Into<String>,
        scope: &CorpusScope,
        match_rate: Option<u8>,
    ) -> u64 {
        self.push(TranslationUnit {
            id: 0,
            source_text: source_text.into(),
            target_text: target_text.into(),
            source_locale: scope.source_locale.clone(),
            target_locale: scope.target_locale.clone(),
            project_id: scope.project_id.clone(),
            embedding: None,
            match_rate,
        })
    }

    pub fn insert_with_embedding(
        &self,
        source_text: impl Into<String>,
        target_text: impl Into<String>,
        scope: &CorpusScope,
        embedding: Vec<f32>,
    ) -> u64 {
        self.push(TranslationUnit {
            id: 0,
            source_text: source_text.into(),
            target_text: target_text.into(),
            source_locale: scope.source_locale.clone(),
            target_locale: scope.target_locale.clone(),
            project_id: scope.project_id.clone(),
            embedding: Some(embedding),
            match_rate: None,
        })
    }

    /// Updates the target of an existing unit with the same source under the
    /// same scope, or inserts a new one. The source embedding is kept on
    /// update since the source text did not change.
    pub fn upsert(
        &self,
        source_text: &str,
        target_text: &str,
        scope: &CorpusScope,
        match_rate: Option<u8>,
    ) -> u64 {
        {
            let mut units = self.units.write();
            if let Some(unit) = units.iter_mut().find(|u| {
                u.source_text == source_text
                    && u.source_locale == scope.source_locale
                    && u.target_locale == scope.target_locale
                    && u.project_id == scope.project_id
            }) {
                unit.target_text = target_text.to_string();
                unit.match_rate = match_rate;
                return unit.id;
            }
        }
        self.insert(source_text, target_text, scope, match_rate)
    }

    pub fn for_each_in_scope(&self, scope: &CorpusScope, mut f: impl FnMut(&TranslationUnit)) {
        for unit in self.units.read().iter() {
            if unit.visible_in(scope) {
                f(unit);
            }
        }
    }

    pub fn get(&self, id: u64) -> Option<TranslationUnit> {
        self.units.read().iter().find(|u| u.id == id).cloned()
    }

    /// Units still waiting for a source embedding, oldest first.
    pub fn missing_embeddings(&self, limit: usize) -> Vec<(u64, String)> {
        self.units
            .read()
            .iter()
            .filter(|u| u.embedding.is_none())
            .take(limit)
            .map(|u| (u.id, u.source_text.clone()))
            .collect()
    }

    pub fn set_embedding(&self, id: u64, embedding: Vec<f32>) -> Result<()> {
        let mut units = self.units.write();
        match units.iter_mut().find(|u| u.id == id) {
            Some(unit) => {
                unit.embedding = Some(embedding);
                Ok(())
            }
            None => Err(PipelineError::Validation(format!(
                "no translation unit with id {id}"
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.units.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        let units = self.units.read();
        let json = serde_json::to_string_pretty(&*units)
            .map_err(|e| PipelineError::Persistence(format!("serialize corpus: {e}")))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> CorpusScope {
        CorpusScope::new("en-US", "de-DE")
    }

    #[test]
    fn scope_visibility_rules() {
        let store = TmStore::new();
        store.insert("global", "Global", &scope(), None);
        store.insert("scoped", "Projekt", &scope().with_project("acme"), None);
        store.insert("other pair", "?", &CorpusScope::new("en-US", "fr-FR"), None);

        let mut seen = Vec::new();
        store.for_each_in_scope(&scope(), |u| seen.push(u.source_text.clone()));
        assert_eq!(seen, vec!["global"]);

        seen.clear();
        store.for_each_in_scope(&scope().with_project("acme"), |u| {
            seen.push(u.source_text.clone())
        });
        assert_eq!(seen, vec!["global", "scoped"]);

        seen.clear();
        store.for_each_in_scope(&scope().with_project("unrelated"), |u| {
            seen.push(u.source_text.clone())
        });
        assert_eq!(seen, vec!["global"]);
    }

    #[test]
    fn upsert_updates_in_place() {
        let store = TmStore::new();
        let id = store.insert("Hello", "Hallo", &scope(), Some(100));
        store.set_embedding(id, vec![1.0, 0.0]).unwrap();

        let same = store.upsert("Hello", "Hallo zusammen", &scope(), Some(100));
        assert_eq!(same, id);
        assert_eq!(store.len(), 1);
        let unit = store.get(id).unwrap();
        assert_eq!(unit.target_text, "Hallo zusammen");
        assert!(unit.embedding.is_some());

        let fresh = store.upsert("Hello", "Servus", &scope().with_project("acme"), None);
        assert_ne!(fresh, id);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn embedding_backfill_bookkeeping() {
        let store = TmStore::new();
        let a = store.insert("one", "eins", &scope(), None);
        store.insert_with_embedding("two", "zwei", &scope(), vec![0.5]);
        let c = store.insert("three", "drei", &scope(), None);

        let missing = store.missing_embeddings(10);
        assert_eq!(
            missing.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
            vec![a, c]
        );

        store.set_embedding(a, vec![1.0]).unwrap();
        assert_eq!(store.missing_embeddings(10).len(), 1);
        assert!(store.set_embedding(999, vec![1.0]).is_err());
    }

    #[test]
    fn ids_grow_monotonically() {
        let store = TmStore::new();
        let a = store.insert("a", "a", &scope(), None);
        let b = store.insert("b", "b", &scope(), None);
        assert!(b > a);
    }

    #[test]
    fn persistence_round_trip() {
        let mut path = std::env::temp_dir();
        path.push(format!("pretranslator-tm-{}.json", std::process::id()));
        let _ = std::fs::remove_file(&path);

        {
            let store = TmStore::with_persistence(&path).unwrap();
            store.insert("Hello", "Hallo", &scope(), Some(100));
            store.insert("Bye", "Tschüss", &scope().with_project("acme"), None);
            store.save().unwrap();
        }

        let reopened = TmStore::with_persistence(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        let next = reopened.insert("New", "Neu", &scope(), None);
        assert_eq!(next, 3);

        let _ = std::fs::remove_file(&path);
    }
}
