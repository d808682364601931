//! Canonical dedupe key

/// Characters of the text that take part in the key
pub const KEY_TEXT_CHARS: usize = 200;

/// Deterministic identity of a logical comment.
///
/// BLAKE3 hex digest of `date|brand|author|channel|text`, where only the
/// first [`KEY_TEXT_CHARS`] characters of the text are used.
pub fn dedupe_key(date: &str, brand_label: &str, author: &str, channel: &str, text: &str) -> String {
    let text_prefix: String = text.chars().take(KEY_TEXT_CHARS).collect();
    let material = format!(
        "{}|{}|{}|{}|{}",
        date, brand_label, author, channel, text_prefix
    );
    blake3::hash(material.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_stable_and_field_sensitive() {
        let key = dedupe_key("2024-05-01", "acme", "alice", "weibo", "hello");
        assert_eq!(key.len(), 64);
        assert_eq!(key, dedupe_key("2024-05-01", "acme", "alice", "weibo", "hello"));
        assert_ne!(key, dedupe_key("2024-05-02", "acme", "alice", "weibo", "hello"));
        assert_ne!(key, dedupe_key("2024-05-01", "acme", "bob", "weibo", "hello"));
    }

    #[test]
    fn test_key_ignores_text_beyond_prefix() {
        let base: String = "差".repeat(KEY_TEXT_CHARS);
        let a = format!("{}first tail", base);
        let b = format!("{}second tail", base);
        assert_eq!(
            dedupe_key("2024-05-01", "", "a", "c", &a),
            dedupe_key("2024-05-01", "", "a", "c", &b)
        );

        let shorter: String = "差".repeat(KEY_TEXT_CHARS - 1);
        assert_ne!(
            dedupe_key("2024-05-01", "", "a", "c", &base),
            dedupe_key("2024-05-01", "", "a", "c", &shorter)
        );
    }
}
