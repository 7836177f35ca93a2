use anyhow::Result;
use regex::Regex;

const TOPIC_WORDS: &[(&str, &str)] = &[
    ("浅草", "浅草"),
    ("渋谷", "渋谷"),
    ("新宿", "新宿"),
    ("銀座", "銀座"),
    ("原宿", "原宿"),
    ("秋葉原", "秋葉原"),
    ("上野", "上野"),
    ("スカイツリー", "スカイツリー"),
    ("ラーメン", "グルメ"),
    ("寿司", "グルメ"),
    ("ランチ", "グルメ"),
    ("ごはん", "グルメ"),
    ("カフェ", "カフェ"),
    ("買い物", "ショッピング"),
    ("ショッピング", "ショッピング"),
    ("神社", "神社仏閣"),
    ("お寺", "神社仏閣"),
    ("祭り", "イベント"),
    ("イベント", "イベント"),
    ("仕事", "仕事"),
];

const EMOTION_WORDS: &[(&str, &str)] = &[
    ("嬉しい", "うれしい"),
    ("うれしい", "うれしい"),
    ("楽しい", "たのしい"),
    ("たのしい", "たのしい"),
    ("ワクワク", "わくわく"),
    ("わくわく", "わくわく"),
    ("疲れ", "つかれ"),
    ("つかれ", "つかれ"),
    ("悲しい", "かなしい"),
    ("かなしい", "かなしい"),
    ("寂しい", "さみしい"),
    ("さみしい", "さみしい"),
    ("不安", "不安"),
];

/// Facts pulled out of one user message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Learned {
    pub topics: Vec<String>,
    pub emotions: Vec<String>,
    pub keywords: Vec<String>,
    pub likes: Vec<String>,
    pub dislikes: Vec<String>,
    pub nickname: Option<String>,
    pub concerns: Vec<String>,
}

pub(crate) struct Extractor {
    keyword: Regex,
    like: Regex,
    dislike: Regex,
    nickname: Regex,
    concern: Regex,
}

impl Extractor {
    pub(crate) fn new() -> Result<Self> {
        Ok(Self {
            keyword: Regex::new(r"[ァ-ヴー]{3,}|[一-龯々]{2,}")?,
            like: Regex::new(r"([^、。！？!?\s]{1,20}?)が(?:大)?好き")?,
            dislike: Regex::new(r"([^、。！？!?\s]{1,20}?)が(?:苦手|嫌い)")?,
            nickname: Regex::new(
                r"(?:(?:私|僕|俺|わたし|ぼく)の名前は([^、。！？!?\s]{1,12}?)(?:です|だよ|[、。！!]|$)|([^、。！？!?\s]{1,12}?)って呼んで)",
            )?,
            concern: Regex::new(r"([^、。！？!?\s]{1,20}?)(?:が心配|で悩んで)")?,
        })
    }

    pub(crate) fn extract(&self, text: &str) -> Learned {
        let mut learned = Learned::default();

        for (needle, topic) in TOPIC_WORDS {
            if text.contains(needle) && !learned.topics.iter().any(|t| t == topic) {
                learned.topics.push(topic.to_string());
            }
        }
        for (needle, emotion) in EMOTION_WORDS {
            if text.contains(needle) && !learned.emotions.iter().any(|e| e == emotion) {
                learned.emotions.push(emotion.to_string());
            }
        }
        for found in self.keyword.find_iter(text) {
            let word = found.as_str().to_string();
            if !learned.keywords.contains(&word) {
                learned.keywords.push(word);
            }
        }

        learned.likes = captures(&self.like, text);
        learned.dislikes = captures(&self.dislike, text);
        learned.concerns = captures(&self.concern, text);
        learned.nickname = self.nickname.captures(text).and_then(|caps| {
            caps.get(1)
                .or_else(|| caps.get(2))
                .map(|name| name.as_str().to_string())
        });

        learned
    }
}

fn captures(re: &Regex, text: &str) -> Vec<String> {
    re.captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|found| found.as_str().trim().to_string())
        .filter(|found| !found.is_empty())
        .collect()
}
