use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::config::{
    find_default_config, load_config, resolve_embedding, resolve_provider, AppConfig,
    ResolvedEmbedding, ResolvedProvider, DEFAULT_CONFIG_FILENAME, ENV_CONFIG_PATH,
};
use crate::glossary::GlossaryFilterConfig;
use crate::pipeline::prompts::{default_prompt_files, PromptSet, DEFAULT_PROMPTS_DIR};

/// How AI segments are generated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GenerationMode {
    /// Many segments per call, marker-delimited output.
    #[default]
    Batch,
    /// One segment per call with a draft/review/fix loop.
    Critic,
}

impl GenerationMode {
    pub fn parse(s: Option<&str>) -> Self {
        match s.unwrap_or("batch").trim().to_ascii_lowercase().as_str() {
            "critic" => Self::Critic,
            _ => Self::Batch,
        }
    }
}

/// TM lookup thresholds shared by the scan and the RAG context assembly.
#[derive(Clone, Debug)]
pub struct SearchSettings {
    pub max_results: usize,
    /// Floor for suggestion queries that decide AI eligibility.
    pub min_suggestion_score: f32,
    /// Floor for the fuzzy side of extended (RAG) searches.
    pub extended_min_score: f32,
    pub vector_min_similarity: f32,
    pub use_vector_search: bool,
    pub rag_examples: usize,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub config_path: Option<PathBuf>,

    pub search: SearchSettings,
    pub glossary: GlossaryFilterConfig,
    pub provider: ResolvedProvider,
    pub embedding: ResolvedEmbedding,

    /// Paths from [storage], resolved relative to the config file.
    pub tm_path: Option<PathBuf>,
    pub glossary_path: Option<PathBuf>,

    pub mode: GenerationMode,
    pub checkpoint_every: usize,
    pub progress_update_every: usize,
    pub ai_batch_size: usize,
    pub neighbor_window: usize,

    pub prompts: PromptSet,
}

impl PipelineConfig {
    pub fn from_config_and_args(
        workdir: &Path,
        config_path: Option<PathBuf>,
        mode_arg: Option<&str>,
        tm_arg: Option<PathBuf>,
        glossary_arg: Option<PathBuf>,
        no_vector: bool,
    ) -> anyhow::Result<Self> {
        let cfg_file = config_path
            .or_else(|| std::env::var(ENV_CONFIG_PATH).ok().map(PathBuf::from))
            .or_else(|| find_default_config(workdir, DEFAULT_CONFIG_FILENAME));

        let mut file_cfg = AppConfig::default();
        if let Some(p) = cfg_file.as_ref() {
            if p.exists() {
                file_cfg = load_config(p)?;
            }
        }
        let config_dir = cfg_file
            .as_ref()
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| workdir.to_path_buf());

        let retrieval = &file_cfg.retrieval;
        let search = SearchSettings {
            max_results: retrieval.max_results.unwrap_or(10).max(1),
            min_suggestion_score: retrieval.min_suggestion_score.unwrap_or(60.0),
            extended_min_score: retrieval.extended_min_score.unwrap_or(50.0),
            vector_min_similarity: retrieval.vector_min_similarity.unwrap_or(0.75),
            use_vector_search: retrieval.use_vector_search.unwrap_or(true) && !no_vector,
            rag_examples: retrieval.rag_examples.unwrap_or(5).max(1),
        };

        let glossary_section = &file_cfg.glossary;
        let defaults = GlossaryFilterConfig::default();
        let glossary = GlossaryFilterConfig {
            recall_limit: glossary_section.recall_limit.unwrap_or(defaults.recall_limit),
            min_similarity: glossary_section.min_similarity.unwrap_or(defaults.min_similarity),
            fallback_recent: glossary_section
                .fallback_recent
                .unwrap_or(defaults.fallback_recent),
            max_suffix_len: glossary_section
                .max_suffix_len
                .unwrap_or(defaults.max_suffix_len),
        };

        let resolve_storage = |configured: &Option<String>, arg: Option<PathBuf>| {
            arg.or_else(|| {
                configured.as_deref().map(|rel| {
                    let p = PathBuf::from(rel);
                    if p.is_relative() {
                        config_dir.join(p)
                    } else {
                        p
                    }
                })
            })
        };
        let tm_path = resolve_storage(&file_cfg.storage.tm, tm_arg);
        let glossary_path = resolve_storage(&file_cfg.storage.glossary, glossary_arg);

        let mode = GenerationMode::parse(mode_arg.or(file_cfg.pipeline.mode.as_deref()));
        let checkpoint_every = file_cfg.pipeline.checkpoint_every.unwrap_or(5).max(1);
        let progress_update_every = file_cfg.pipeline.progress_update_every.unwrap_or(5).max(1);
        let ai_batch_size = file_cfg.pipeline.ai_batch_size.unwrap_or(10).max(1);
        let neighbor_window = file_cfg.pipeline.neighbor_window.unwrap_or(2);

        let prompts = PromptSet::load(cfg_file.as_deref(), &file_cfg).context("load prompts")?;

        Ok(Self {
            config_path: cfg_file,
            search,
            glossary,
            provider: resolve_provider(&file_cfg),
            embedding: resolve_embedding(&file_cfg),
            tm_path,
            glossary_path,
            mode,
            checkpoint_every,
            progress_update_every,
            ai_batch_size,
            neighbor_window,
            prompts,
        })
    }
}

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(DEFAULT_CONFIG_FILENAME);

    let prompts_dir = dir.join(DEFAULT_PROMPTS_DIR);
    std::fs::create_dir_all(&prompts_dir)
        .with_context(|| format!("create prompts dir: {}", prompts_dir.display()))?;

    for (fname, body) in default_prompt_files() {
        let p = prompts_dir.join(fname);
        if p.exists() && !force {
            continue;
        }
        std::fs::write(&p, body).with_context(|| format!("write prompt: {}", p.display()))?;
    }

    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }

    let cfg_text = r#"[retrieval]
max_results = 10
min_suggestion_score = 60.0
extended_min_score = 50.0
vector_min_similarity = 0.75
use_vector_search = true
rag_examples = 5

[glossary]
recall_limit = 50
min_similarity = 0.6
fallback_recent = 200
max_suffix_len = 3

[provider]
base_url = "http://localhost:11434/v1"
model = "qwen2.5:14b-instruct"
# api_key = "sk-..."          # or set PRETRANSLATOR_API_KEY
timeout_secs = 90
max_retries = 2
retry_backoff_ms = 500

[embedding]
enabled = true
base_url = "http://localhost:11434/v1"
model = "nomic-embed-text"
# api_key = "..."             # or set PRETRANSLATOR_EMBEDDING_API_KEY
dimension = 768
timeout_secs = 30
cache_entries = 2048
cache_ttl_secs = 3600
max_batch = 64

[pipeline]
mode = "batch"                # "batch" or "critic"
checkpoint_every = 5
progress_update_every = 5
ai_batch_size = 10
neighbor_window = 2

[storage]
# tm = "tm.json"
# glossary = "glossary.json"

[prompts]
batch_translate = "prompts/batch_translate.txt"
critic_review = "prompts/critic_review.txt"
critic_fix = "prompts/critic_fix.txt"
"#;

    std::fs::write(&cfg_path, cfg_text)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}
