#![forbid(unsafe_code)]

/// Keep at most `max_bytes` from the end of `text`, respecting UTF-8
/// boundaries. The tail is the useful slice of subprocess output for
/// debugging.
pub(in crate::store) fn tail_utf8(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut start = text.len() - max_bytes;
    while start < text.len() && !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(tail_utf8("hello", 8), "hello");
        assert_eq!(tail_utf8("", 8), "");
    }

    #[test]
    fn long_text_keeps_the_tail() {
        let text = "a".repeat(100);
        assert_eq!(tail_utf8(&text, 10).len(), 10);
        let mixed = format!("{}END", "x".repeat(100));
        assert!(tail_utf8(&mixed, 10).ends_with("END"));
    }

    #[test]
    fn multibyte_boundaries_are_respected() {
        let text = "é".repeat(50); // 2 bytes each
        let tail = tail_utf8(&text, 7);
        assert!(tail.len() <= 7);
        assert!(tail.chars().all(|c| c == 'é'));
    }
}
