use unicode_segmentation::UnicodeSegmentation;

/// Collapses whitespace and cuts `text` to at most `limit` grapheme clusters,
/// adding "..." if anything was dropped. For log lines, not for prompts.
pub fn preview(text: &str, limit: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut graphemes = flat.graphemes(true);
    let head = graphemes.by_ref().take(limit).collect::<String>();
    if graphemes.next().is_some() {
        head + "..."
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_short() {
        assert_eq!(preview("", 10), "");
        assert_eq!(preview("hello", 10), "hello");
        assert_eq!(preview("hello", 5), "hello");
    }

    #[test]
    fn test_preview_long() {
        assert_eq!(preview("hello world", 5), "hello...");
        assert_eq!(preview("one\n   two\tthree", 100), "one two three");
    }

    #[test]
    fn test_preview_graphemes() {
        // "é" written as e + combining acute is one cluster.
        assert_eq!(preview("e\u{301}e\u{301}e\u{301}", 2), "e\u{301}e\u{301}...");
    }
}
