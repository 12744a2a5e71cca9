//! Character-safe text helpers shared by the extractors and the budgeter.

/// Marker inserted where content was removed.
pub const TRUNCATION_MARKER: &str = "\n\n[... content truncated ...]\n\n";

/// Approximate token count (chars / 4, rounded up). Not a tokenizer.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    chars.div_ceil(4) as u32
}

/// Substring by char offsets, clamped to the text.
pub fn char_slice(text: &str, start: usize, end: usize) -> &str {
    let mut indices = text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len()));
    let start_byte = indices.clone().nth(start).unwrap_or(text.len());
    let end_byte = if end <= start {
        start_byte
    } else {
        indices.nth(end).unwrap_or(text.len())
    };
    &text[start_byte..end_byte]
}

/// First `n` chars.
pub fn head(text: &str, n: usize) -> &str {
    char_slice(text, 0, n)
}

/// Last `n` chars.
pub fn tail(text: &str, n: usize) -> &str {
    let total = text.chars().count();
    char_slice(text, total.saturating_sub(n), total)
}

/// `n` chars centered on the middle of the text.
pub fn middle(text: &str, n: usize) -> &str {
    let total = text.chars().count();
    let start = (total / 2).saturating_sub(n / 2);
    char_slice(text, start, start + n)
}

/// Fit `text` into `cap` chars keeping head, middle and tail joined by
/// truncation markers. Returns the text unchanged when it already fits.
pub fn truncate_head_mid_tail(text: &str, cap: usize) -> (String, bool) {
    let total = text.chars().count();
    if total <= cap {
        return (text.to_string(), false);
    }
    let marker_len = TRUNCATION_MARKER.chars().count();
    if cap <= marker_len * 2 + 3 {
        return (head(text, cap).to_string(), true);
    }
    let budget = cap - marker_len * 2;
    let head_len = budget * 2 / 5;
    let tail_len = budget / 5;
    let mid_len = budget - head_len - tail_len;

    let mut out = String::with_capacity(cap * 4);
    out.push_str(head(text, head_len));
    out.push_str(TRUNCATION_MARKER);
    out.push_str(middle(text, mid_len));
    out.push_str(TRUNCATION_MARKER);
    out.push_str(tail(text, tail_len));
    (out, true)
}

/// Collapse runs of whitespace and blank lines.
pub fn normalize_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens("abcdefghi"), 3);
    }

    #[test]
    fn slices_respect_char_boundaries() {
        let text = "héllo wörld";
        assert_eq!(head(text, 2), "hé");
        assert_eq!(tail(text, 3), "rld");
        assert_eq!(char_slice(text, 6, 100), "wörld");
    }

    #[test]
    fn short_text_passes_through() {
        let (out, truncated) = truncate_head_mid_tail("short", 100);
        assert_eq!(out, "short");
        assert!(!truncated);
    }

    #[test]
    fn long_text_keeps_head_middle_tail() {
        let text = format!("{}{}{}", "A".repeat(1000), "M".repeat(1000), "Z".repeat(1000));
        let (out, truncated) = truncate_head_mid_tail(&text, 500);
        assert!(truncated);
        assert!(out.chars().count() <= 500);
        assert!(out.starts_with('A'));
        assert!(out.ends_with('Z'));
        assert!(out.contains("MMM"));
        assert_eq!(out.matches("content truncated").count(), 2);
    }

    #[test]
    fn whitespace_is_collapsed() {
        assert_eq!(normalize_whitespace("  a   b \n\n\n c  "), "a b\nc");
    }
}
