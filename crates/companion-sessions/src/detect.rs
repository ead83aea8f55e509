//! Important-context detection — phrases the user clearly wants remembered
//! are pinned automatically so they survive history trimming.

use regex::Regex;
use std::sync::OnceLock;

/// Return the phrase worth pinning from a user message, or `None`.
pub fn detect_important_context(text: &str) -> Option<String> {
    for re in hint_patterns() {
        if let Some(caps) = re.captures(text) {
            let phrase = caps
                .get(1)
                .map(|m| m.as_str())
                .unwrap_or_else(|| caps.get(0).map(|m| m.as_str()).unwrap_or(""))
                .trim();
            if !phrase.is_empty() {
                return Some(phrase.to_string());
            }
        }
    }
    None
}

fn hint_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // "remember: I work night shifts" / "remember that my dog is Max"
            r"(?i)\bremember(?::| that| this:?)\s+(.{2,200})",
            // "내 이름은 지우야" — self-introductions
            r"내 이름은\s*(.{1,80})",
            r"(?i)\bmy name is\s+(.{1,80})",
            // "제 생일은 3월 4일" — personal dates
            r"[내제] 생일은\s*(.{1,80})",
            // "잊지 마: 수요일마다 요가" — "don't forget"
            r"잊지\s*마(?:세요)?[:,]?\s*(.{2,200})",
            r"(?i)\bdon'?t forget[:,]?\s+(.{2,200})",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("hint pattern compiles"))
        .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remember_prefix_captures_phrase() {
        let got = detect_important_context("remember: I work night shifts").unwrap();
        assert_eq!(got, "I work night shifts");
    }

    #[test]
    fn korean_name_introduction() {
        let got = detect_important_context("안녕! 내 이름은 지우야").unwrap();
        assert!(got.starts_with("지우"));
    }

    #[test]
    fn english_name_introduction() {
        let got = detect_important_context("hey, my name is Dana").unwrap();
        assert_eq!(got, "Dana");
    }

    #[test]
    fn dont_forget_variants() {
        assert!(detect_important_context("don't forget: yoga on Wednesdays").is_some());
        assert!(detect_important_context("잊지 마: 수요일마다 요가").is_some());
    }

    #[test]
    fn ordinary_chatter_is_not_pinned() {
        assert!(detect_important_context("what's the weather like?").is_none());
        assert!(detect_important_context("오늘 날씨 어때?").is_none());
    }
}
