//! Reply sanitiser: model output is written for reading, not speaking.
//! Strip markup and symbols a TTS voice would stumble over, keep plain
//! sentences and basic punctuation.

use once_cell::sync::Lazy;
use regex::Regex;

static LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("link regex"));
static INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`]*)`").expect("code regex"));
static LINE_MARKERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s{0,3}(?:#{1,6}\s+|[-*+]\s+|>\s+|\d+\.\s+)").expect("marker regex"));

/// Characters allowed through after markup removal.
fn keep(c: char) -> bool {
    c.is_alphanumeric()
        || c.is_whitespace()
        || matches!(
            c,
            '.' | ',' | '!' | '?' | ';' | ':' | '\'' | '"' | '-' | '/' | '(' | ')'
        )
}

/// Clean a chat reply for speech synthesis: link syntax reduces to its
/// anchor text, markdown markers and emoji disappear, whitespace collapses.
pub fn clean_for_speech(text: &str) -> String {
    let text = LINK.replace_all(text, "$1");
    let text = INLINE_CODE.replace_all(&text, "$1");
    let text = LINE_MARKERS.replace_all(&text, "");
    let text: String = text.chars().filter(|&c| keep(c)).collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(
            clean_for_speech("It's 22 degrees outside, with light rain."),
            "It's 22 degrees outside, with light rain."
        );
    }

    #[test]
    fn test_strips_markdown_markers() {
        let input = "## Weather\n* **Sunny** today\n* _Rainy_ tomorrow";
        assert_eq!(clean_for_speech(input), "Weather Sunny today Rainy tomorrow");
    }

    #[test]
    fn test_link_keeps_anchor_text() {
        assert_eq!(
            clean_for_speech("See [the forecast](https://example.com/w?q=1) for details."),
            "See the forecast for details."
        );
    }

    #[test]
    fn test_inline_code_keeps_content() {
        assert_eq!(clean_for_speech("Run `ls -la` now"), "Run ls -la now");
    }

    #[test]
    fn test_removes_emoji() {
        assert_eq!(clean_for_speech("Sounds good 😀🎉!"), "Sounds good !");
    }

    #[test]
    fn test_keeps_basic_punctuation() {
        let input = "Yes; really: it's \"fine\" (mostly) - 50/50, ok?!";
        assert_eq!(clean_for_speech(input), input);
    }

    #[test]
    fn test_collapses_whitespace() {
        assert_eq!(clean_for_speech("a\n\n  b\t c"), "a b c");
    }

    #[test]
    fn test_numbered_list_markers_removed() {
        assert_eq!(clean_for_speech("1. First\n2. Second"), "First Second");
    }

    #[test]
    fn test_all_markup_reply_cleans_to_empty() {
        assert_eq!(clean_for_speech("✨🎉✨"), "");
    }
}
