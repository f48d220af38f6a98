/// First `max_chars` characters of `text`, with an ellipsis when anything was
/// cut. Counts characters, not bytes.
pub fn preview(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", text[..cut].trim_end()),
        None => text.to_owned(),
    }
}

pub fn contains_keyword(text: &str, keyword: &str) -> bool {
    text.to_lowercase().contains(&keyword.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_cuts_on_char_boundaries() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("exactly10!", 10), "exactly10!");
        assert_eq!(preview("café au lait", 4), "café...");
        assert_eq!(preview("two words", 4), "two...");
    }

    #[test]
    fn keywords_ignore_case() {
        assert!(contains_keyword("URGENT: contract", "urgent"));
        assert!(contains_keyword("Weekly Meeting notes", "meeting"));
        assert!(!contains_keyword("tasks", "urgent"));
    }
}
