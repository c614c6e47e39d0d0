const BEFORE: usize = 50;
const AFTER: usize = 100;

/// Context window of chars `[offset - 50, offset + 100)` around a match,
/// clamped to the text and trimmed.
pub fn snippet(text: &str, offset: usize) -> String {
    let start = offset.saturating_sub(BEFORE);
    let len = (offset + AFTER).saturating_sub(start);
    let window: String = text.chars().skip(start).take(len).collect();
    window.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_around_offset() {
        let text: String = ('a'..='z').cycle().take(400).collect();
        let s = snippet(&text, 200);
        assert_eq!(s.chars().count(), 150);
        assert_eq!(s, text[150..300]);
    }

    #[test]
    fn clamps_at_start() {
        let text = "between 2020 and 2030 the market grows";
        assert_eq!(snippet(text, 0), text);
        assert_eq!(snippet(text, 10), text);
    }

    #[test]
    fn clamps_at_end() {
        let text: String = "x".repeat(120) + " by 2040";
        let s = snippet(&text, 121);
        assert!(s.ends_with("by 2040"));
        assert_eq!(s.chars().count(), 128 - 71);
    }

    #[test]
    fn offset_past_end() {
        assert_eq!(snippet("short", 500), "");
    }

    #[test]
    fn trims_whitespace() {
        let text = format!("{}  in 2020 and by 2030  ", " ".repeat(10));
        assert_eq!(snippet(&text, 12), "in 2020 and by 2030");
    }

    #[test]
    fn never_splits_multibyte_chars() {
        let text = "é".repeat(300);
        let s = snippet(&text, 100);
        assert_eq!(s.chars().count(), 150);
    }
}
