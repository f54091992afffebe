use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::embedding::CacheConfig;
use crate::retry::RetryPolicy;

pub const DEFAULT_CONFIG_FILENAME: &str = "pretranslator.toml";
pub const ENV_CONFIG_PATH: &str = "PRETRANSLATOR_CONFIG";
pub const ENV_API_KEY: &str = "PRETRANSLATOR_API_KEY";
pub const ENV_EMBEDDING_API_KEY: &str = "PRETRANSLATOR_EMBEDDING_API_KEY";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub retrieval: RetrievalSection,
    #[serde(default)]
    pub glossary: GlossarySection,
    #[serde(default)]
    pub provider: ProviderSection,
    #[serde(default)]
    pub embedding: EmbeddingSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub prompts: PromptsSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct RetrievalSection {
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(default)]
    pub min_suggestion_score: Option<f32>,
    #[serde(default)]
    pub extended_min_score: Option<f32>,
    #[serde(default)]
    pub vector_min_similarity: Option<f32>,
    #[serde(default)]
    pub use_vector_search: Option<bool>,
    /// TM pairs quoted as examples in AI prompts.
    #[serde(default)]
    pub rag_examples: Option<usize>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct GlossarySection {
    #[serde(default)]
    pub recall_limit: Option<usize>,
    #[serde(default)]
    pub min_similarity: Option<f32>,
    #[serde(default)]
    pub fallback_recent: Option<usize>,
    #[serde(default)]
    pub max_suffix_len: Option<usize>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ProviderSection {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Prefer the env var; the file works for local setups.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_backoff_ms: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct EmbeddingSection {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub dimension: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub cache_entries: Option<usize>,
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
    #[serde(default)]
    pub max_batch: Option<usize>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PipelineSection {
    /// Generation mode: "batch" or "critic".
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub checkpoint_every: Option<usize>,
    #[serde(default)]
    pub progress_update_every: Option<usize>,
    #[serde(default)]
    pub ai_batch_size: Option<usize>,
    #[serde(default)]
    pub neighbor_window: Option<usize>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct StorageSection {
    /// TM corpus JSON, relative paths resolve next to the config file.
    #[serde(default)]
    pub tm: Option<String>,
    #[serde(default)]
    pub glossary: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PromptsSection {
    #[serde(default)]
    pub batch_translate: Option<String>,
    #[serde(default)]
    pub critic_review: Option<String>,
    #[serde(default)]
    pub critic_fix: Option<String>,
}

/// Connection settings for the chat-completion endpoint.
#[derive(Clone, Debug)]
pub struct ResolvedProvider {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

/// Connection settings for the embeddings endpoint.
#[derive(Clone, Debug)]
pub struct ResolvedEmbedding {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub dimension: usize,
    pub timeout: Duration,
    pub cache: CacheConfig,
    pub max_batch: usize,
}

pub fn find_file_upwards(start: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = Some(start.to_path_buf());
    for _ in 0..=max_levels {
        let d = dir?;
        let cand = d.join(filename);
        if cand.exists() {
            return Some(cand);
        }
        dir = d.parent().map(|p| p.to_path_buf());
    }
    None
}

pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, filename, 8) {
        return Some(p);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 10) {
                return Some(p);
            }
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text).context("parse config toml")?;
    Ok(cfg)
}

fn env_or(file_value: Option<&str>, env_key: &str) -> Option<String> {
    std::env::var(env_key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| file_value.map(|s| s.to_string()))
}

pub fn resolve_provider(cfg: &AppConfig) -> ResolvedProvider {
    let section = &cfg.provider;
    let max_retries = section.max_retries.unwrap_or(2);
    let backoff = Duration::from_millis(section.retry_backoff_ms.unwrap_or(500));
    ResolvedProvider {
        base_url: section
            .base_url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434/v1".to_string()),
        model: section
            .model
            .clone()
            .unwrap_or_else(|| "qwen2.5:14b-instruct".to_string()),
        api_key: env_or(section.api_key.as_deref(), ENV_API_KEY),
        timeout: Duration::from_secs(section.timeout_secs.unwrap_or(90)),
        retry: RetryPolicy::new(max_retries + 1, backoff),
    }
}

pub fn resolve_embedding(cfg: &AppConfig) -> ResolvedEmbedding {
    let section = &cfg.embedding;
    ResolvedEmbedding {
        enabled: section.enabled.unwrap_or(true),
        base_url: section
            .base_url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434/v1".to_string()),
        model: section
            .model
            .clone()
            .unwrap_or_else(|| "nomic-embed-text".to_string()),
        api_key: env_or(section.api_key.as_deref(), ENV_EMBEDDING_API_KEY),
        dimension: section.dimension.unwrap_or(768),
        timeout: Duration::from_secs(section.timeout_secs.unwrap_or(30)),
        cache: CacheConfig {
            max_entries: section.cache_entries.unwrap_or(2048),
            ttl: Duration::from_secs(section.cache_ttl_secs.unwrap_or(3600)),
        },
        max_batch: section.max_batch.unwrap_or(64).max(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_resolves_to_defaults() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        let provider = resolve_provider(&cfg);
        assert_eq!(provider.base_url, "http://localhost:11434/v1");
        assert_eq!(provider.retry.max_attempts, 3);
        assert_eq!(provider.timeout, Duration::from_secs(90));

        let embedding = resolve_embedding(&cfg);
        assert!(embedding.enabled);
        assert_eq!(embedding.dimension, 768);
        assert_eq!(embedding.cache.max_entries, 2048);
    }

    #[test]
    fn sections_override_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
[provider]
base_url = "https://api.example.com/v1"
model = "custom-model"
timeout_secs = 30
max_retries = 0

[embedding]
enabled = false
dimension = 1024

[pipeline]
mode = "critic"
checkpoint_every = 3
"#,
        )
        .unwrap();
        let provider = resolve_provider(&cfg);
        assert_eq!(provider.base_url, "https://api.example.com/v1");
        assert_eq!(provider.model, "custom-model");
        assert_eq!(provider.retry.max_attempts, 1);

        let embedding = resolve_embedding(&cfg);
        assert!(!embedding.enabled);
        assert_eq!(embedding.dimension, 1024);

        assert_eq!(cfg.pipeline.mode.as_deref(), Some("critic"));
        assert_eq!(cfg.pipeline.checkpoint_every, Some(3));
    }
}
