use once_cell::sync::Lazy;
use regex::Regex;

static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws"));
static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("token"));

/// Shortest shared stem accepted by the suffix-tolerant token match.
const MIN_STEM_CHARS: usize = 4;

pub fn compact_ws(text: &str) -> String {
    WS_RE.replace_all(text.trim(), " ").into_owned()
}

/// Lowercase word tokens (letters and digits), in document order.
#[must_use]
pub fn tokens_lower(text: &str) -> Vec<String> {
    TOKEN_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Whether two lowercase tokens name the same word, tolerating short
/// inflection suffixes (case endings, plurals) on either side. `max_suffix`
/// of 0 demands exact equality.
#[must_use]
pub fn token_matches(a: &str, b: &str, max_suffix: usize) -> bool {
    if a == b {
        return true;
    }
    if max_suffix == 0 {
        return false;
    }
    let mut common = 0usize;
    let mut ia = a.chars();
    let mut ib = b.chars();
    loop {
        match (ia.next(), ib.next()) {
            (Some(ca), Some(cb)) if ca == cb => common += 1,
            _ => break,
        }
    }
    if common < MIN_STEM_CHARS {
        return false;
    }
    let rest_a = a.chars().count() - common;
    let rest_b = b.chars().count() - common;
    rest_a <= max_suffix && rest_b <= max_suffix
}

/// Whether `term_tokens` occurs as a consecutive run inside `text_tokens`,
/// comparing token-by-token with [`token_matches`].
#[must_use]
pub fn term_occurs(text_tokens: &[String], term_tokens: &[String], max_suffix: usize) -> bool {
    if term_tokens.is_empty() || text_tokens.len() < term_tokens.len() {
        return false;
    }
    'outer: for start in 0..=(text_tokens.len() - term_tokens.len()) {
        for (offset, term_tok) in term_tokens.iter().enumerate() {
            if !token_matches(&text_tokens[start + offset], term_tok, max_suffix) {
                continue 'outer;
            }
        }
        return true;
    }
    false
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_ws_collapses_runs() {
        assert_eq!(compact_ws("  a \t b\n\nc  "), "a b c");
    }

    #[test]
    fn tokens_are_lowercased_words() {
        assert_eq!(
            tokens_lower("Reconstruction of the 110kV Substation."),
            vec!["reconstruction", "of", "the", "110kv", "substation"]
        );
    }

    #[test]
    fn token_match_exact_and_suffix() {
        assert!(token_matches("substation", "substation", 0));
        assert!(token_matches("substations", "substation", 3));
        assert!(token_matches("кабеля", "кабель", 3));
        assert!(token_matches("реконструкции", "реконструкция", 3));

        // Short words never stem-match: the shared prefix is too small.
        assert!(!token_matches("car", "cat", 3));
        assert!(!token_matches("кабель", "substation", 3));
    }

    #[test]
    fn multiword_terms_match_consecutively() {
        let text = tokens_lower("Plans for the power substation upgrades were approved");
        assert!(term_occurs(&text, &tokens_lower("power substation"), 3));
        assert!(term_occurs(&text, &tokens_lower("substation upgrade"), 3));
        assert!(!term_occurs(&text, &tokens_lower("power upgrades"), 3));
        assert!(!term_occurs(&text, &tokens_lower("cable"), 3));
    }
}
