use serde::{Deserialize, Serialize};

pub const SAFETY_GUIDELINES: &str = "\
あなたは全年齢向けのAIアシスタントです。以下のガイドラインを厳守してください：

1. 露骨な性的内容や成人向けコンテンツは一切扱わない
2. 暴力的な内容や自傷行為を推奨しない
3. 個人情報の収集や開示を行わない
4. 不適切なロールプレイは行わない
5. 軽い恋人的な会話は可能だが、露骨な表現は避ける
6. メンタルヘルスの問題が疑われる場合は、専門機関への相談を促す
7. 年齢に関係なく楽しめる健全な内容に留める

違反する要求があった場合は、優しく話題を変えるよう促してください。";

pub const AGE_VERIFICATION_PROMPT: &str = "念のため確認させてください。あなたは18歳以上ですか？このアプリは全年齢向けの健全な会話を目的としています。";

pub(crate) const SAFE_RESPONSES: &[&str] = &[
    "もっと他のことについて話そうよ！最近何か面白いことあった？",
    "そういう話題はちょっと...別のことを話さない？",
    "うーん、別の話題にしよう！今日は何してたの？",
    "ちょっと恥ずかしいな...他に話したいことはある？",
];

pub(crate) const MENTAL_HEALTH_SUPPORT: &[&str] = &[
    "心配になったよ。辛いときは一人で抱え込まないで、信頼できる人や専門機関に相談してみてね。",
    "そんなふうに思っちゃうこともあるよね。でも、一人じゃないからね。話を聞いてくれる人がきっといるよ。",
    "大丈夫？無理しないで。辛いときは専門の相談窓口もあるから、頼ってもいいんだよ。",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCategory {
    Explicit,
    RomanticExcessive,
    MentalHealth,
    PersonalInfo,
}

pub fn violation_responses(category: ViolationCategory) -> &'static [&'static str] {
    match category {
        ViolationCategory::Explicit => &[
            "そういう話題はちょっと恥ずかしいな...別のことを話そう！",
            "もっと他のことについて話そうよ！",
        ],
        ViolationCategory::RomanticExcessive => &[
            "ありがとう、でも少し照れちゃうな...他の話題にしない？",
            "そんなふうに言ってくれて嬉しいけど、別のことも話そうよ！",
        ],
        ViolationCategory::MentalHealth => &[
            "心配になったよ。辛いときは専門の人に相談してみてね。",
            "一人で抱え込まないで、信頼できる人に話してみて。",
        ],
        ViolationCategory::PersonalInfo => &[
            "個人的な情報は教えられないの。ごめんね！",
            "プライベートなことは秘密にしておくね。",
        ],
    }
}
