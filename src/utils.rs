//! Small shared helpers.

/// Truncate a string to at most `max_bytes` bytes, ensuring the cut lands on
/// a valid UTF-8 char boundary. Returns the longest prefix that fits.
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_on_char_boundary() {
        assert_eq!(truncate_str("hello world", 5), "hello");
        assert_eq!(truncate_str("hello", 10), "hello");
        // 🦀 is 4 bytes; a cut inside it backs up to the boundary.
        let s = "hi🦀bye";
        assert_eq!(truncate_str(s, 3), "hi");
        assert_eq!(truncate_str(s, 6), "hi🦀");
        assert_eq!(truncate_str("", 5), "");
        assert_eq!(truncate_str("abc", 0), "");
    }
}
