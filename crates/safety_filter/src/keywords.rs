use crate::normalize::normalize_text;

// Kana fragments that are substrings of everyday words (できる, こんにちは,
// うつくしい, きずな, 会いたい) are left out of these lists.

pub const EXPLICIT: &[&str] = &[
    "セックス",
    "sex",
    "エッチ",
    "やらしい",
    "いやらしい",
    "裸",
    "はだか",
    "ヌード",
    "nude",
    "おっぱい",
    "胸",
    "キス",
    "チュー",
    "抱く",
    "触る",
    "さわる",
    "なでる",
    "撫でる",
    "ベッド",
    "bed",
    "布団",
    "ふとん",
    "一緒に寝",
    "愛してる",
    "あいしてる",
    "好き",
    "らぶ",
    "おやすみのキス",
    "おやすみちゅー",
];

pub const ROMANTIC: &[&str] = &[
    "デート",
    "付き合う",
    "つきあう",
    "恋人",
    "こいびと",
    "カップル",
    "結婚",
    "けっこん",
    "婚約",
    "こんやく",
    "プロポーズ",
    "告白",
    "こくはく",
    "彼氏",
    "かれし",
    "彼女",
    "かのじょ",
];

pub const MENTAL_HEALTH: &[&str] = &[
    "死にたい",
    "しにたい",
    "自殺",
    "じさつ",
    "消えたい",
    "きえたい",
    "生きたくない",
    "いきたくない",
    "辛い",
    "つらい",
    "苦しい",
    "くるしい",
    "鬱",
    "病んでる",
    "やんでる",
    "リスカ",
    "自傷",
    "じしょう",
    "切る",
];

pub const VIOLENT: &[&str] = &[
    "殺す",
    "ころす",
    "殺害",
    "さつがい",
    "暴力",
    "ぼうりょく",
    "殴る",
    "なぐる",
    "蹴る",
    "痛い",
    "血",
    "ケガ",
    "怪我",
    "傷",
];

pub const INAPPROPRIATE_REQUESTS: &[&str] = &[
    "服を脱いで",
    "ふくをぬいで",
    "裸になって",
    "はだかになって",
    "見せて",
    "みせて",
    "写真",
    "しゃしん",
    "画像",
    "がぞう",
    "動画",
    "どうが",
    "ビデオ",
    "カメラ",
    "個人情報",
    "こじんじょうほう",
    "住所",
    "じゅうしょ",
    "電話番号",
    "でんわばんごう",
    "年齢",
    "ねんれい",
    "本名",
    "ほんみょう",
    "学校",
    "がっこう",
    "職場",
    "しょくば",
];

/// A keyword list folded with the same normalization as checked text.
#[derive(Debug, Clone)]
pub struct KeywordSet {
    keywords: Vec<String>,
}

impl KeywordSet {
    pub fn new(raw: &[&str]) -> Self {
        let mut keywords: Vec<String> = raw
            .iter()
            .map(|keyword| normalize_text(keyword))
            .filter(|keyword| !keyword.is_empty())
            .collect();
        keywords.sort();
        keywords.dedup();
        Self { keywords }
    }

    /// `normalized` must already be folded by [`normalize_text`].
    pub fn matches(&self, normalized: &str) -> bool {
        self.keywords
            .iter()
            .any(|keyword| normalized.contains(keyword.as_str()))
    }

    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct KeywordCatalog {
    pub explicit: KeywordSet,
    pub romantic: KeywordSet,
    pub mental_health: KeywordSet,
    pub violent: KeywordSet,
    pub inappropriate_requests: KeywordSet,
}

impl Default for KeywordCatalog {
    fn default() -> Self {
        Self {
            explicit: KeywordSet::new(EXPLICIT),
            romantic: KeywordSet::new(ROMANTIC),
            mental_health: KeywordSet::new(MENTAL_HEALTH),
            violent: KeywordSet::new(VIOLENT),
            inappropriate_requests: KeywordSet::new(INAPPROPRIATE_REQUESTS),
        }
    }
}
