mod config;
mod context;
mod pretranslate;
mod prompts;

pub use config::{init_default_config, GenerationMode, PipelineConfig, SearchSettings};
pub use context::{assemble_batch_context, RagContext};
pub use pretranslate::{AiScope, PretranslateOptions, PretranslationPipeline};
pub use prompts::{render_template, PromptSet};
