//! Approximate token counting for local budget control.
//!
//! Korean (and other CJK-dense) text tokenizes at roughly 2 characters per
//! token; Latin text at roughly 4. The estimate is only used to decide when
//! to trim or summarize — never for billing.

use crate::types::ChatMessage;

/// Fixed per-message overhead (role framing, separators).
const PER_MESSAGE_OVERHEAD: usize = 4;

/// Estimate the token count of a text body.
pub fn estimate(text: &str) -> usize {
    let mut hangul = 0usize;
    let mut other = 0usize;
    for ch in text.chars() {
        if is_hangul(ch) {
            hangul += 1;
        } else {
            other += 1;
        }
    }
    // ceil(hangul/2) + ceil(other/4)
    hangul.div_ceil(2) + other.div_ceil(4)
}

/// Estimate the token count of a message array, including per-message overhead.
pub fn estimate_messages(messages: &[ChatMessage]) -> usize {
    messages
        .iter()
        .map(|m| estimate(&m.content) + PER_MESSAGE_OVERHEAD)
        .sum()
}

/// Hangul syllables plus the Jamo blocks.
fn is_hangul(ch: char) -> bool {
    matches!(ch,
        '\u{AC00}'..='\u{D7A3}'   // syllables
        | '\u{1100}'..='\u{11FF}' // Jamo
        | '\u{3130}'..='\u{318F}' // compatibility Jamo
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    #[test]
    fn empty_text_is_zero() {
        assert_eq!(estimate(""), 0);
    }

    #[test]
    fn latin_text_quarters() {
        // 8 ASCII chars → 2 tokens
        assert_eq!(estimate("abcdefgh"), 2);
    }

    #[test]
    fn latin_rounds_up() {
        // 9 chars → ceil(9/4) = 3
        assert_eq!(estimate("abcdefghi"), 3);
    }

    #[test]
    fn hangul_halves() {
        // 4 Hangul syllables → 2 tokens
        assert_eq!(estimate("안녕하세"), 2);
    }

    #[test]
    fn mixed_text_sums_both_classes() {
        // "hi 안녕" = 3 other chars (h, i, space) + 2 hangul
        // ceil(2/2) + ceil(3/4) = 1 + 1 = 2
        assert_eq!(estimate("hi 안녕"), 2);
    }

    #[test]
    fn messages_add_overhead() {
        let msgs = vec![
            ChatMessage::new(Role::User, "abcd"),
            ChatMessage::new(Role::Assistant, "efgh"),
        ];
        // each: 1 token + 4 overhead
        assert_eq!(estimate_messages(&msgs), 10);
    }
}
