use std::collections::BTreeMap;

use core_types::UiLanguage;

#[derive(Debug, Clone)]
pub struct I18n {
    lang: UiLanguage,
    ja: BTreeMap<&'static str, &'static str>,
    en: BTreeMap<&'static str, &'static str>,
}

impl I18n {
    pub fn new(lang: UiLanguage) -> Self {
        Self {
            lang,
            ja: ja_map(),
            en: en_map(),
        }
    }

    pub fn set_language(&mut self, lang: UiLanguage) {
        self.lang = lang;
    }

    pub fn language(&self) -> UiLanguage {
        self.lang
    }

    pub fn t<'a>(&'a self, key: &'a str) -> &'a str {
        let (primary, secondary) = match self.lang {
            UiLanguage::Ja => (&self.ja, &self.en),
            UiLanguage::En => (&self.en, &self.ja),
        };
        primary
            .get(key)
            .or_else(|| secondary.get(key))
            .copied()
            .unwrap_or(key)
    }

    /// User-facing text for an error string carried by a stream chunk.
    /// Unknown errors get a generic message.
    pub fn translate_error(&self, error: &str) -> &'static str {
        let table = match self.lang {
            UiLanguage::Ja => JA_ERRORS,
            UiLanguage::En => EN_ERRORS,
        };
        table
            .iter()
            .find(|(known, _)| *known == error)
            .map(|(_, text)| *text)
            .unwrap_or(match self.lang {
                UiLanguage::Ja => "エラーが発生しました。もう一度お試しください。",
                UiLanguage::En => "Something went wrong. Please try again.",
            })
    }
}

const JA_ERRORS: &[(&str, &str)] = &[
    ("Network request failed", "ネットワーク接続に失敗しました"),
    ("API request failed", "APIリクエストに失敗しました"),
    ("Streaming interrupted", "ストリーミングが中断されました"),
    (
        "Rate limit exceeded",
        "リクエスト制限に達しました。しばらく待ってから再試行してください",
    ),
    ("Invalid API key", "APIキーが無効です"),
    ("Service unavailable", "サービスが一時的に利用できません"),
];

const EN_ERRORS: &[(&str, &str)] = &[
    ("Network request failed", "Network connection failed"),
    ("API request failed", "The API request failed"),
    ("Streaming interrupted", "The stream was interrupted"),
    (
        "Rate limit exceeded",
        "Rate limit reached. Please wait a moment and try again",
    ),
    ("Invalid API key", "The API key is invalid"),
    ("Service unavailable", "The service is temporarily unavailable"),
];

fn ja_map() -> BTreeMap<&'static str, &'static str> {
    BTreeMap::from([
        ("app.title", "みさきと東京さんぽ"),
        (
            "chat.greeting",
            "こんにちは！東京案内のみさきです。行きたい場所や食べたいもの、なんでも聞いてね！",
        ),
        ("chat.prompt", "あなた"),
        ("chat.typing", "入力中..."),
        ("chat.cancelled", "(応答をキャンセルしました)"),
        (
            "chat.unsafe_warning",
            "ごめんね、その話題はちょっと控えさせてね。東京のおすすめスポットの話をしない？",
        ),
        ("chat.session_reset", "セッションをリセットしました"),
        ("chat.image_failed", "画像を読み込めませんでした"),
        (
            "chat.help",
            "/image <パス> 画像を分析 / /reset-session セッションをリセット / /quit 終了",
        ),
        ("chat.bye", "またね！"),
    ])
}

fn en_map() -> BTreeMap<&'static str, &'static str> {
    BTreeMap::from([
        ("app.title", "Tokyo walks with Misaki"),
        (
            "chat.greeting",
            "Hi! I'm Misaki, your Tokyo guide. Ask me about places to visit or things to eat!",
        ),
        ("chat.prompt", "you"),
        ("chat.typing", "typing..."),
        ("chat.cancelled", "(reply cancelled)"),
        (
            "chat.unsafe_warning",
            "Let's talk about something else! Maybe a favourite spot in Tokyo?",
        ),
        ("chat.session_reset", "Session reset"),
        ("chat.image_failed", "Could not read the image"),
        (
            "chat.help",
            "/image <path> analyze an image / /reset-session reset the session / /quit exit",
        ),
        ("chat.bye", "See you!"),
    ])
}
