use std::path::Path;

use anyhow::Context;

use crate::config::AppConfig;

pub const DEFAULT_PROMPTS_DIR: &str = "prompts";

pub const BATCH_TRANSLATE_FILE: &str = "batch_translate.txt";
pub const CRITIC_REVIEW_FILE: &str = "critic_review.txt";
pub const CRITIC_FIX_FILE: &str = "critic_fix.txt";

pub const DEFAULT_BATCH_TRANSLATE_TEXT: &str = r#"You are a professional translator. Translate each segment below from {{source_lang}} to {{target_lang}}.

{{context_block}}

Rules:
- Translate segment by segment; never merge or split segments.
- For each segment id, output EXACTLY:
  <<PT_SEG:000123>>
  translated text
  <<PT_END:000123>>
  (replace 000123 with the segment id, keep the 6-digit format)
- Keep numbers, product names and inline formatting intact.
- Follow the GLOSSARY block whenever a listed term appears.
- Output nothing else: no commentary, no notes.

Segments:
{{segment_block}}
"#;

pub const DEFAULT_CRITIC_REVIEW_TEXT: &str = r#"You are a strict reviewer of {{source_lang}} to {{target_lang}} translations.

SOURCE:
{{source}}

DRAFT:
{{draft}}

{{glossary_block}}

{{heuristics}}

Check the draft for mistranslations, omissions, additions, terminology violations and number errors.
If the draft is acceptable, output exactly: OK
Otherwise list the concrete problems, one per line. Output nothing else.
"#;

pub const DEFAULT_CRITIC_FIX_TEXT: &str = r#"You are a professional translator revising a draft from {{source_lang}} to {{target_lang}}.

SOURCE:
{{source}}

DRAFT:
{{draft}}

REVIEW:
{{critique}}

{{glossary_block}}

Rewrite the draft so every problem in the review is resolved. Keep numbers and names intact.
Return ONLY the corrected translation, with no commentary.
"#;

/// The three prompt templates a run needs.
///
/// With a config file, templates resolve next to it (explicitly configured
/// paths must exist; the conventional prompts/ files are picked up when
/// present). Without one, the builtin texts apply.
#[derive(Clone, Debug)]
pub struct PromptSet {
    pub batch_translate: String,
    pub critic_review: String,
    pub critic_fix: String,
}

impl PromptSet {
    pub fn builtin() -> Self {
        Self {
            batch_translate: DEFAULT_BATCH_TRANSLATE_TEXT.to_string(),
            critic_review: DEFAULT_CRITIC_REVIEW_TEXT.to_string(),
            critic_fix: DEFAULT_CRITIC_FIX_TEXT.to_string(),
        }
    }

    pub fn load(config_path: Option<&Path>, cfg: &AppConfig) -> anyhow::Result<Self> {
        let Some(config_path) = config_path else {
            return Ok(Self::builtin());
        };
        let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
        Ok(Self {
            batch_translate: read_prompt(
                config_dir,
                cfg.prompts.batch_translate.as_deref(),
                BATCH_TRANSLATE_FILE,
                DEFAULT_BATCH_TRANSLATE_TEXT,
                "batch_translate",
            )?,
            critic_review: read_prompt(
                config_dir,
                cfg.prompts.critic_review.as_deref(),
                CRITIC_REVIEW_FILE,
                DEFAULT_CRITIC_REVIEW_TEXT,
                "critic_review",
            )?,
            critic_fix: read_prompt(
                config_dir,
                cfg.prompts.critic_fix.as_deref(),
                CRITIC_FIX_FILE,
                DEFAULT_CRITIC_FIX_TEXT,
                "critic_fix",
            )?,
        })
    }
}

fn read_prompt(
    config_dir: &Path,
    configured: Option<&str>,
    default_filename: &str,
    builtin: &str,
    key: &str,
) -> anyhow::Result<String> {
    if let Some(rel) = configured {
        let mut path = std::path::PathBuf::from(rel);
        if path.is_relative() {
            path = config_dir.join(path);
        }
        return std::fs::read_to_string(&path).with_context(|| {
            format!(
                "prompt file not found for {key}: {} (run: pretranslator --init-config)",
                path.display()
            )
        });
    }
    let fallback = config_dir.join(DEFAULT_PROMPTS_DIR).join(default_filename);
    if fallback.exists() {
        return std::fs::read_to_string(&fallback)
            .with_context(|| format!("failed to read prompt file {}", fallback.display()));
    }
    Ok(builtin.to_string())
}

/// File name / content pairs scaffolded by --init-config.
pub fn default_prompt_files() -> Vec<(&'static str, &'static str)> {
    vec![
        (BATCH_TRANSLATE_FILE, DEFAULT_BATCH_TRANSLATE_TEXT),
        (CRITIC_REVIEW_FILE, DEFAULT_CRITIC_REVIEW_TEXT),
        (CRITIC_FIX_FILE, DEFAULT_CRITIC_FIX_TEXT),
    ]
}

pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (k, v) in vars {
        out = out.replace(&format!("{{{{{k}}}}}"), v);
    }
    out
}
