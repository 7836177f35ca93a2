const STRIPPED_PUNCTUATION: &[char] = &['!', '！', '?', '？', '.', '。', '、', ',', '，'];

/// Folds text into the form keyword lists are matched against: katakana to
/// hiragana, full-width ASCII digits and letters to half-width, lowercase,
/// with whitespace and common punctuation removed.
pub fn normalize_text(text: &str) -> String {
    text.chars()
        .map(fold_char)
        .filter(|ch| !ch.is_whitespace() && !STRIPPED_PUNCTUATION.contains(ch))
        .flat_map(char::to_lowercase)
        .collect()
}

fn fold_char(ch: char) -> char {
    let shifted = match ch {
        'ァ'..='ヶ' => u32::from(ch) - 0x60,
        '０'..='９' | 'Ａ'..='Ｚ' | 'ａ'..='ｚ' => u32::from(ch) - 0xFEE0,
        _ => return ch,
    };
    char::from_u32(shifted).unwrap_or(ch)
}
