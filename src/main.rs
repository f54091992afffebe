use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use pretranslator::corpus::TmStore;
use pretranslator::document::{Document, JsonDocumentStore, SegmentStore};
use pretranslator::embedding::{EmbeddingGenerator, HttpEmbeddingClient};
use pretranslator::glossary::{GlossaryFilter, GlossaryStore};
use pretranslator::jobs::{JobRegistry, JobStatus};
use pretranslator::pipeline::{
    init_default_config, AiScope, PipelineConfig, PretranslateOptions, PretranslationPipeline,
};
use pretranslator::progress::ConsoleProgress;
use pretranslator::provider::HttpTranslationProvider;
use pretranslator::retrieval::HybridRanker;
use pretranslator::service::{backfill_embeddings, PretranslationService};

#[derive(Parser, Debug)]
#[command(name = "pretranslator")]
#[command(about = "Document pretranslation (TM retrieval + glossary RAG + LLM batches)", long_about = None)]
struct Args {
    /// Generate default config + prompt files, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write config/prompt files (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite existing config/prompt files when used with --init-config
    #[arg(long)]
    force: bool,

    /// Input document JSON (segments with source text)
    #[arg(value_name = "DOCUMENT_JSON")]
    input: Option<PathBuf>,

    /// Output document JSON (default: <input_stem>_pretranslated.json)
    #[arg(short, long, value_name = "JSON")]
    output: Option<PathBuf>,

    /// Config file path (default: search for pretranslator.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Translation memory JSON path (created when missing)
    #[arg(long, value_name = "JSON")]
    tm: Option<PathBuf>,

    /// Glossary JSON path (created when missing)
    #[arg(long, value_name = "JSON")]
    glossary: Option<PathBuf>,

    /// Override the document's project id
    #[arg(long)]
    project: Option<String>,

    /// Generation mode: batch or critic
    #[arg(long)]
    mode: Option<String>,

    /// Which segments go to the model: both, low_score_matches, no_match_only
    #[arg(long)]
    ai_scope: Option<String>,

    /// Re-translate segments a reviewer already confirmed
    #[arg(long)]
    rewrite_confirmed: bool,

    /// Re-translate segments holding an unreviewed draft
    #[arg(long)]
    rewrite_non_confirmed: bool,

    /// Disable vector retrieval for this run
    #[arg(long)]
    no_vector: bool,

    /// Embed TM units and glossary terms missing vectors, then exit
    #[arg(long)]
    backfill_embeddings: bool,

    /// Suppress progress output on stderr
    #[arg(long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let progress = ConsoleProgress::new(!args.quiet);

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    let workdir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let cfg = PipelineConfig::from_config_and_args(
        &workdir,
        args.config,
        args.mode.as_deref(),
        args.tm,
        args.glossary,
        args.no_vector,
    )
    .context("build config")?;

    let tm = Arc::new(match cfg.tm_path.as_ref() {
        Some(path) => TmStore::with_persistence(path).context("open translation memory")?,
        None => TmStore::new(),
    });
    let glossary_store = Arc::new(match cfg.glossary_path.as_ref() {
        Some(path) => GlossaryStore::with_persistence(path).context("open glossary")?,
        None => GlossaryStore::new(),
    });
    let embedder: Option<Arc<dyn EmbeddingGenerator>> = if cfg.embedding.enabled {
        Some(Arc::new(
            HttpEmbeddingClient::new(&cfg.embedding).context("build embedding client")?,
        ))
    } else {
        None
    };

    if args.backfill_embeddings {
        let Some(embedder) = embedder.as_ref() else {
            anyhow::bail!("embedding backfill requires [embedding] enabled in the config");
        };
        let count = backfill_embeddings(&tm, &glossary_store, embedder.as_ref(), cfg.embedding.max_batch)
            .await
            .context("backfill embeddings")?;
        eprintln!("Backfilled {count} embeddings");
        return Ok(());
    }

    let Some(input) = args.input else {
        let mut cmd = Args::command();
        cmd.print_help().context("print help")?;
        eprintln!(
            "\n\nUSAGE:\n  pretranslator <document.json>\n\nTIPS:\n  - Default config search: pretranslator.toml (upwards), or set PRETRANSLATOR_CONFIG.\n  - Run `pretranslator --init-config` to scaffold config and prompt files.\n"
        );
        return Ok(());
    };

    let mut document = Document::load(&input).context("load document")?;
    if let Some(project) = args.project {
        document.project_id = Some(project);
    }
    let document_id = document.id.clone();

    let output = args.output.unwrap_or_else(|| {
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document")
            .to_string();
        input.with_file_name(format!("{stem}_pretranslated.json"))
    });

    let store: Arc<dyn SegmentStore> = Arc::new(
        JsonDocumentStore::create(&output, document).context("write output document")?,
    );

    let options = PretranslateOptions {
        rewrite_confirmed: args.rewrite_confirmed,
        rewrite_non_confirmed: args.rewrite_non_confirmed,
        ai_scope: AiScope::parse(args.ai_scope.as_deref()),
        mode: cfg.mode,
    };

    let registry = Arc::new(JobRegistry::new());
    let ranker = Arc::new(HybridRanker::new(Arc::clone(&tm), embedder.clone()));
    let filter = Arc::new(GlossaryFilter::new(
        Arc::clone(&glossary_store),
        embedder.clone(),
        cfg.glossary.clone(),
    ));
    let provider =
        Arc::new(HttpTranslationProvider::new(&cfg.provider).context("build provider")?);

    let pipeline = Arc::new(PretranslationPipeline::new(
        cfg,
        ranker,
        filter,
        provider,
        Arc::clone(&store),
        Arc::clone(&registry),
        progress,
    ));
    let service = PretranslationService::new(
        pipeline,
        Arc::clone(&registry),
        tm,
        glossary_store,
        embedder,
        store,
    );

    let watch_registry = Arc::clone(&registry);
    let watch_id = document_id.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling job");
            watch_registry.cancel(&watch_id);
        }
    });

    service.start(&document_id, options).context("start job")?;
    let job = service
        .await_job(&document_id)
        .await
        .context("job vanished before completion")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&job).context("serialize job summary")?
    );
    eprintln!("Output written: {}", output.display());

    if job.status == JobStatus::Error {
        anyhow::bail!("pretranslation failed: {}", job.current_message);
    }
    Ok(())
}
