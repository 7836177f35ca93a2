use core_types::{Chooser, pick_from};

struct TopicGroup {
    triggers: &'static [&'static str],
    replies: &'static [&'static str],
}

// Checked in this order; the first group with a matching trigger wins.
const TOPIC_GROUPS: &[TopicGroup] = &[
    TopicGroup {
        triggers: &["こんにちは", "はじめまして", "おはよう", "こんばんは", "hello"],
        replies: &[
            "こんにちは！今日はどこを観光する予定ですか？",
            "はじめまして！東京観光のことなら何でも聞いてくださいね。",
            "おはようございます！朝の浅草は空いていておすすめですよ。",
            "こんにちは！東京で行ってみたい場所はありますか？",
            "こんにちは！お腹は空いていますか？おいしいお店も案内できますよ。",
        ],
    },
    TopicGroup {
        triggers: &["観光", "浅草", "渋谷", "新宿", "銀座", "上野", "お台場", "神社", "お寺"],
        replies: &[
            "浅草なら雷門から仲見世通りを歩くのが定番です。朝早めが空いていますよ。",
            "渋谷はスクランブル交差点と展望スポットがおすすめです。夕方の景色がきれいですよ。",
            "上野は公園と美術館めぐりが楽しいですよ。アメ横で食べ歩きもできます。",
            "神社めぐりなら明治神宮がおすすめです。原宿駅からすぐですよ。",
            "お台場は海沿いの散歩が気持ちいいですよ。夜景も見どころです。",
        ],
    },
    TopicGroup {
        triggers: &["ラーメン", "寿司", "グルメ", "ごはん", "食べ", "美味しい", "おいしい", "カフェ"],
        replies: &[
            "ラーメンなら新宿や池袋に人気店が集まっています。どんな味がお好みですか？",
            "お寿司なら築地の場外市場で食べ歩きもできますよ。",
            "カフェめぐりなら表参道や清澄白河がおすすめです。",
            "予算はどのくらいですか？それに合わせてお店を選びますね。",
            "甘いものがお好みなら、銀座のデパ地下スイーツもおすすめです。",
        ],
    },
    TopicGroup {
        triggers: &["疲れた", "お疲れ", "大変", "歩き疲れ"],
        replies: &[
            "お疲れさまです！少しカフェで休憩しませんか？",
            "たくさん歩きましたね。足湯や公園のベンチでひと休みもいいですよ。",
            "無理せずゆっくり回りましょう。ホテルの近くで楽しめる場所も探せますよ。",
            "大変でしたね。甘いものでエネルギー補給はいかがですか？",
        ],
    },
    TopicGroup {
        triggers: &["嬉しい", "楽しい", "楽しみ", "やった", "ワクワク"],
        replies: &[
            "楽しんでもらえて嬉しいです！次はどこに行きましょうか？",
            "その調子です！東京にはまだまだ見どころがありますよ。",
            "ワクワクしますね！天気が良ければ屋外スポットもおすすめです。",
            "いい思い出ができましたね。次の予定も一緒に考えましょう！",
        ],
    },
    TopicGroup {
        triggers: &["？", "?", "おすすめ", "どこ", "教えて"],
        replies: &[
            "んー、どんな雰囲気の場所がお好みですか？",
            "東京には何日くらい滞在する予定ですか？",
            "ちょっと詳しく教えてもらえますか？",
            "いいですね！具体的にはどんな感じで回りたいですか？",
            "それなら、こんなプランはどうでしょう？",
        ],
    },
];

const REACTIONS: &[&str] = &[
    "そうですね〜",
    "なるほど！",
    "いいですね！",
    "へー、そうなんですね",
    "あ、それなら",
    "わかります！",
    "そうそう！",
];

const FOLLOW_UPS: &[&str] = &[
    "今日はどこを観光しましたか？",
    "行ってみたいエリアはありますか？",
    "食べてみたい東京グルメはありますか？",
    "滞在中の予算はどのくらいですか？",
    "気になっているイベントはありますか？",
    "一緒に素敵な旅のプランを考えましょう！",
];

/// Candidate replies for the offline path, chosen from the last user
/// utterance. When no topic matches, a reaction and follow-up are combined.
pub fn contextual_candidates(user_message: &str, chooser: &dyn Chooser) -> Vec<String> {
    let message = user_message.to_lowercase();

    if let Some(group) = TOPIC_GROUPS.iter().find(|group| {
        group
            .triggers
            .iter()
            .any(|trigger| message.contains(trigger))
    }) {
        return group.replies.iter().map(|reply| reply.to_string()).collect();
    }

    let reaction = pick_from(chooser, REACTIONS).copied().unwrap_or_default();
    let follow_up = pick_from(chooser, FOLLOW_UPS).copied().unwrap_or_default();
    vec![
        format!("{reaction} {follow_up}"),
        follow_up.to_string(),
        reaction.to_string(),
    ]
}

#[cfg(test)]
pub(crate) fn all_canned_replies() -> Vec<String> {
    let mut replies: Vec<String> = TOPIC_GROUPS
        .iter()
        .flat_map(|group| group.replies.iter().map(|reply| reply.to_string()))
        .collect();
    for reaction in REACTIONS {
        for follow_up in FOLLOW_UPS {
            replies.push(format!("{reaction} {follow_up}"));
        }
    }
    replies.extend(REACTIONS.iter().map(|reaction| reaction.to_string()));
    replies.extend(FOLLOW_UPS.iter().map(|follow_up| follow_up.to_string()));
    replies
}

#[cfg(test)]
mod tests {
    use core_types::{FixedChooser, ModerationSettings};
    use safety_filter::SafetyFilter;

    use super::*;

    #[test]
    fn greeting_wins_over_question() {
        let candidates = contextual_candidates("こんにちは、おすすめは？", &FixedChooser(0));
        assert_eq!(candidates[0], "こんにちは！今日はどこを観光する予定ですか？");
    }

    #[test]
    fn sightseeing_topic_is_detected() {
        let candidates = contextual_candidates("明日は浅草に行きます", &FixedChooser(0));
        assert!(candidates[0].starts_with("浅草なら"));
    }

    #[test]
    fn question_marker_is_detected() {
        let candidates = contextual_candidates("どこがいい?", &FixedChooser(0));
        assert_eq!(candidates.len(), 5);
        assert_eq!(candidates[0], "んー、どんな雰囲気の場所がお好みですか？");
    }

    #[test]
    fn english_trigger_is_case_insensitive() {
        let candidates = contextual_candidates("HELLO", &FixedChooser(0));
        assert_eq!(candidates[0], "こんにちは！今日はどこを観光する予定ですか？");
    }

    #[test]
    fn falls_back_to_reaction_and_follow_up() {
        let candidates = contextual_candidates("ふむ", &FixedChooser(1));
        assert_eq!(
            candidates,
            vec![
                "なるほど！ 行ってみたいエリアはありますか？".to_string(),
                "行ってみたいエリアはありますか？".to_string(),
                "なるほど！".to_string(),
            ]
        );
    }

    #[test]
    fn canned_replies_pass_ai_response_check() -> anyhow::Result<()> {
        let filter = SafetyFilter::new(ModerationSettings::default())?;
        for reply in all_canned_replies() {
            let result = filter.check_ai_response(&reply);
            assert!(result.is_safe, "{reply}: {:?}", result.violations);
        }
        Ok(())
    }
}
