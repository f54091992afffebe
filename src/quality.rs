use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::sentinels::contains_marker;

static DIGIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("digit regex"));

/// Mechanical review of one AI draft against its source. Hard flags force a
/// fix round even when the critique says the draft reads fine; soft flags
/// are only surfaced to the critic.
#[derive(Clone, Debug, Default)]
pub struct DraftChecks {
    pub hard_flags: Vec<String>,
    pub soft_flags: Vec<String>,
    pub src_chars: usize,
    pub tgt_chars: usize,
    pub len_ratio: f32,
}

impl DraftChecks {
    #[must_use]
    pub fn needs_fix(&self) -> bool {
        !self.hard_flags.is_empty()
    }

    #[must_use]
    pub fn render_block(&self) -> String {
        let mut out = String::new();
        out.push_str("QUALITY_HEURISTICS:\n");
        out.push_str(&format!(
            "- len: src_chars={} tgt_chars={} ratio={:.2}\n",
            self.src_chars, self.tgt_chars, self.len_ratio
        ));
        if !self.hard_flags.is_empty() {
            out.push_str("- hard_flags: ");
            out.push_str(&self.hard_flags.join(" | "));
            out.push('\n');
        }
        if !self.soft_flags.is_empty() {
            out.push_str("- soft_flags: ");
            out.push_str(&self.soft_flags.join(" | "));
            out.push('\n');
        }
        out.trim().to_string()
    }
}

#[must_use]
pub fn review_draft(source: &str, draft: &str) -> DraftChecks {
    let mut hard_flags: Vec<String> = Vec::new();
    let mut soft_flags: Vec<String> = Vec::new();

    let src_chars = non_ws_chars(source);
    let tgt_chars = non_ws_chars(draft);
    let len_ratio = if src_chars == 0 {
        0.0
    } else {
        tgt_chars as f32 / src_chars as f32
    };

    if draft.trim().is_empty() {
        hard_flags.push("empty_output".to_string());
        return DraftChecks {
            hard_flags,
            soft_flags,
            src_chars,
            tgt_chars,
            len_ratio,
        };
    }

    if contains_marker(draft) {
        hard_flags.push("leftover_seg_marker".to_string());
    }

    if digit_counter(source) != digit_counter(draft) {
        hard_flags.push("digits_mismatch".to_string());
    }

    let src_norm = normalize_for_similarity(source);
    let tgt_norm = normalize_for_similarity(draft);
    if !src_norm.is_empty() && src_norm == tgt_norm && src_norm.len() >= 24 {
        hard_flags.push("output_identical_to_source".to_string());
    }

    // Ratio checks only say something for texts long enough to average out.
    if src_chars >= 40 {
        if len_ratio > 0.0 && len_ratio < 0.25 {
            hard_flags.push("len_ratio_too_short_extreme".to_string());
        } else if len_ratio > 4.0 {
            hard_flags.push("len_ratio_too_long_extreme".to_string());
        } else if len_ratio > 0.0 && len_ratio < 0.35 {
            soft_flags.push("len_ratio_too_short".to_string());
        } else if len_ratio > 2.8 {
            soft_flags.push("len_ratio_too_long".to_string());
        }
    }

    if bracket_counts(source) != bracket_counts(draft) {
        soft_flags.push("bracket_count_mismatch".to_string());
    }

    DraftChecks {
        hard_flags,
        soft_flags,
        src_chars,
        tgt_chars,
        len_ratio,
    }
}

fn non_ws_chars(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

fn digit_counter(text: &str) -> HashMap<String, usize> {
    let mut out: HashMap<String, usize> = HashMap::new();
    for m in DIGIT_RE.find_iter(text) {
        *out.entry(m.as_str().to_string()).or_insert(0) += 1;
    }
    out
}

fn normalize_for_similarity(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch.is_whitespace() {
            continue;
        }
        for lc in ch.to_lowercase() {
            out.push(lc);
        }
    }
    out
}

fn bracket_counts(text: &str) -> HashMap<char, usize> {
    let mut out: HashMap<char, usize> = HashMap::new();
    for ch in text.chars() {
        if matches!(ch, '(' | ')' | '[' | ']' | '{' | '}') {
            *out.entry(ch).or_insert(0) += 1;
        }
    }
    out
}
