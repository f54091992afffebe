use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

pub const SEG_ID_WIDTH: usize = 6;

/// Any marker of our batch protocol, well-formed or truncated id.
pub static SEG_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<<PT_(?:SEG|END):\d{1,6}>>").expect("seg marker regex"));

pub fn seg_start(seg_id: usize) -> String {
    format!("<<PT_SEG:{seg_id:0SEG_ID_WIDTH$}>>")
}

pub fn seg_end(seg_id: usize) -> String {
    format!("<<PT_END:{seg_id:0SEG_ID_WIDTH$}>>")
}

/// Renders one segment block for the batch prompt.
pub fn wrap_segment(seg_id: usize, text: &str) -> String {
    format!("{}\n{}\n{}", seg_start(seg_id), text, seg_end(seg_id))
}

pub fn contains_marker(text: &str) -> bool {
    SEG_MARKER_RE.is_match(text)
}

pub fn strip_markers(text: &str) -> String {
    SEG_MARKER_RE.replace_all(text, "").trim().to_string()
}

/// Extracts per-segment translations from a batch completion.
///
/// Walks the expected ids in order with a single forward cursor. Ids the
/// model dropped or mangled are simply absent from the result; the caller
/// substitutes a fallback for those. Models also like to echo prose around
/// the markers, so anything outside a start/end pair is ignored.
pub fn parse_segmented_output(text: &str, expected_ids: &[usize]) -> HashMap<usize, String> {
    let mut segments: HashMap<usize, String> = HashMap::new();
    let mut cursor = 0usize;
    for &seg_id in expected_ids {
        let start_marker = seg_start(seg_id);
        let end_marker = seg_end(seg_id);

        let Some(start_idx) = text[cursor..].find(&start_marker).map(|i| cursor + i) else {
            continue;
        };
        let start_end = start_idx + start_marker.len();

        let Some(end_idx) = text[start_end..].find(&end_marker).map(|i| start_end + i) else {
            cursor = start_end;
            continue;
        };

        segments.insert(seg_id, text[start_end..end_idx].trim().to_string());
        cursor = end_idx + end_marker.len();
    }
    segments
}
