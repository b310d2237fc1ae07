//! Text helpers shared by the lexical index, the hash embedder, and the
//! lexical re-ranker.

/// Split text into lowercase alphanumeric terms.
///
/// Any non-alphanumeric character is a separator. Unicode letters and
/// digits are kept, so `"Café-au-lait"` yields `["café", "au", "lait"]`.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Truncate to at most `max_chars` characters, appending `...` when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    let collapsed: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut out: String = collapsed.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_lowercases_and_splits() {
        assert_eq!(
            tokenize("Rust's borrow-checker, v2!"),
            vec!["rust", "s", "borrow", "checker", "v2"]
        );
    }

    #[test]
    fn test_tokenize_unicode() {
        assert_eq!(tokenize("Café-au-lait"), vec!["café", "au", "lait"]);
        assert!(tokenize("  ...  ").is_empty());
    }

    #[test]
    fn test_preview_truncates_on_chars() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("ééééé", 3), "ééé...");
        assert_eq!(preview("a\n\nb   c", 10), "a b c");
    }
}
