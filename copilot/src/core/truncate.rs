//! Output capping with an explicit truncation marker.

/// Appended whenever captured text was cut. Never truncate silently.
pub const TRUNCATION_MARKER: &str = "\n[truncated]";

/// Cut `text` to at most `limit` bytes (on a char boundary) and append the marker.
///
/// Text already within the limit is returned unchanged.
pub fn truncate_with_marker(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut out = text[..floor_char_boundary(text, limit)].to_string();
    out.push_str(TRUNCATION_MARKER);
    out
}

/// Decode captured bytes; `dropped > 0` means the reader already discarded output.
///
/// The result is at most `limit + TRUNCATION_MARKER.len()` bytes.
pub fn capped_text(bytes: &[u8], dropped: usize, limit: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    if dropped == 0 && text.len() <= limit {
        return text.into_owned();
    }
    let mut out = text[..floor_char_boundary(&text, limit)].to_string();
    out.push_str(TRUNCATION_MARKER);
    out
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut idx = index;
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
