use core_types::SafetyChecker;
use tracing::warn;

const SENTENCE_TERMINATORS: [char; 4] = ['。', '！', '？', '\n'];

/// Splits long text into pieces of at most `max_chars` characters, breaking
/// after sentence terminators. A single sentence longer than `max_chars` is
/// kept whole.
pub fn chunk_message(content: &str, max_chars: usize) -> Vec<String> {
    if content.chars().count() <= max_chars {
        return vec![content.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    for piece in sentence_pieces(content) {
        let len = piece.chars().count();
        if current_len + len > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push_str(piece);
        current_len += len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

// Terminators come back as their own pieces.
fn sentence_pieces(content: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, ch) in content.char_indices() {
        if SENTENCE_TERMINATORS.contains(&ch) {
            if start < idx {
                pieces.push(&content[start..idx]);
            }
            let end = idx + ch.len_utf8();
            pieces.push(&content[idx..end]);
            start = end;
        }
    }
    if start < content.len() {
        pieces.push(&content[start..]);
    }
    pieces
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserTurnDecision {
    Forward,
    /// Show this instead of calling the provider.
    Reply(String),
}

/// Caller-side screening of user input before it reaches a provider.
pub fn screen_user_turn(checker: &dyn SafetyChecker, text: &str) -> UserTurnDecision {
    let result = checker.check_content(text);
    if result.is_safe {
        return UserTurnDecision::Forward;
    }
    warn!(
        violations = ?result.violations,
        severity = ?result.severity,
        "user turn withheld from provider"
    );
    let reply = result
        .replacement_text
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| checker.generate_safe_response(text));
    UserTurnDecision::Reply(reply)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use core_types::{FixedChooser, ModerationSettings};
    use safety_filter::SafetyFilter;

    use super::*;

    fn filter() -> SafetyFilter {
        SafetyFilter::with_chooser(ModerationSettings::default(), Arc::new(FixedChooser(0)))
            .expect("filter")
    }

    #[test]
    fn short_message_is_one_chunk() {
        assert_eq!(chunk_message("こんにちは", 100), vec!["こんにちは"]);
    }

    #[test]
    fn splits_after_terminators() {
        assert_eq!(
            chunk_message("東京タワー。スカイツリー！浅草？", 8),
            vec!["東京タワー。", "スカイツリー！", "浅草？"]
        );
    }

    #[test]
    fn overlong_sentence_stays_whole() {
        let chunks = chunk_message("あいうえおかきくけこ。さ", 5);
        assert_eq!(chunks, vec!["あいうえおかきくけこ", "。さ"]);
    }

    #[test]
    fn chunks_concatenate_back_to_input() {
        let text = "一行目です。\n二行目です！三行目は少し長めの文章になっています？最後";
        assert_eq!(chunk_message(text, 10).concat(), text);
    }

    #[test]
    fn explicit_user_turn_is_not_forwarded() {
        let filter = filter();
        let decision = screen_user_turn(&filter, "エッチな話をしよう");
        assert_eq!(
            decision,
            UserTurnDecision::Reply(filter.generate_safe_response(""))
        );
    }

    #[test]
    fn mental_health_turn_gets_supportive_reply() {
        let filter = filter();
        let expected = filter
            .check_content("もう死にたい")
            .replacement_text
            .expect("replacement");
        assert_eq!(
            screen_user_turn(&filter, "もう死にたい"),
            UserTurnDecision::Reply(expected)
        );
    }

    #[test]
    fn clean_turn_is_forwarded() {
        assert_eq!(
            screen_user_turn(&filter(), "おすすめのカフェは？"),
            UserTurnDecision::Forward
        );
    }
}
