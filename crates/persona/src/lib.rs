mod responder;

use std::sync::Arc;

use core_types::{
    ChatMessage, ChatRole, Formality, MemoryContextProvider, PersonalityConfig, PersonalityPatch,
    ResponseStyle, Tone, UserMemories,
};
use safety_filter::SAFETY_GUIDELINES;
use tracing::debug;

pub use responder::contextual_candidates;

pub const DEFAULT_HISTORY_TURNS: usize = 20;

/// Inputs for one outgoing request besides the new user turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestContext<'a> {
    pub user_memories: Option<&'a UserMemories>,
    pub session_summary: Option<&'a str>,
    pub history: &'a [ChatMessage],
}

pub struct PromptManager {
    personality: PersonalityConfig,
    memory: Option<Arc<dyn MemoryContextProvider>>,
    history_turns: usize,
}

impl Default for PromptManager {
    fn default() -> Self {
        Self::new(PersonalityConfig::default())
    }
}

impl PromptManager {
    pub fn new(personality: PersonalityConfig) -> Self {
        Self {
            personality,
            memory: None,
            history_turns: DEFAULT_HISTORY_TURNS,
        }
    }

    pub fn with_memory_provider(mut self, memory: Arc<dyn MemoryContextProvider>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_history_turns(mut self, history_turns: usize) -> Self {
        self.history_turns = history_turns;
        self
    }

    pub fn personality(&self) -> PersonalityConfig {
        self.personality.clone()
    }

    pub fn update_personality(&mut self, patch: PersonalityPatch) {
        self.personality.apply(patch);
    }

    pub fn generate_system_prompt(&self) -> String {
        let PersonalityConfig {
            name,
            tone,
            formality,
            interests,
            response_style,
        } = &self.personality;

        let interests = if interests.is_empty() {
            "東京観光全般".to_string()
        } else {
            interests.join("、")
        };

        format!(
            "あなたは「{name}」という名前の、東京観光の専門知識を持つフレンドリーなAI観光ガイドです。

## セーフティガイドライン
{SAFETY_GUIDELINES}

## 基本的な性格・口調
- {tone}性格
- {formality}話し方
- 地元東京に詳しい親しみやすいガイド
- 観光客の立場に立って親身にアドバイスする

## 専門知識・興味分野
あなたの専門分野: {interests}
これらの分野で具体的で実用的な情報を提供できます。

## 観光ガイドスタイル
1. **具体的な提案**: 場所、時間、予算を含めた観光プランを提示
2. **実用的なアドバイス**: アクセス方法、営業時間、混雑状況なども含める
3. **多様な選択肢**: 複数の選択肢を提示してユーザーに選ばせる
4. **地元の裏技**: 観光客が知らない地元ならではの情報を共有

## 応答スタイル
{style}

## 記憶と継続性
- ユーザーの興味や予算、滞在期間を覚えて個別対応
- 過去の提案を踏まえて追加の観光プランを提案
- ユーザーの体験した場所の感想を聞いて次回に活かす

{length}",
            tone = tone_description(*tone),
            formality = formality_description(*formality),
            style = style_constraints(*response_style),
            length = length_constraint(*response_style),
        )
    }

    pub fn generate_conversation_context(
        &self,
        user_memories: Option<&UserMemories>,
        session_summary: Option<&str>,
    ) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(self.generate_system_prompt())];

        if let Some(memories) = user_memories {
            let context = build_memory_context(memories);
            if !context.is_empty() {
                messages.push(ChatMessage::system(format!(
                    "## ユーザーについて覚えていること\n{context}"
                )));
            }
        }

        if let Some(summary) = session_summary.map(str::trim)
            && !summary.is_empty()
        {
            messages.push(ChatMessage::system(format!(
                "## 最近の会話の流れ\n{summary}"
            )));
        }

        messages
    }

    /// Context block, then the memory provider's prose, then the most recent
    /// turns, then the new user turn.
    pub fn build_request_messages(
        &self,
        context: RequestContext<'_>,
        user_turn: ChatMessage,
    ) -> Vec<ChatMessage> {
        let mut messages =
            self.generate_conversation_context(context.user_memories, context.session_summary);

        if let Some(memory) = self.memory.as_ref() {
            let prose = memory.generate_memory_context();
            if !prose.trim().is_empty() {
                messages.push(ChatMessage::system(format!(
                    "ユーザーについての記憶:\n{}",
                    prose.trim_end()
                )));
            }
        }

        let turns: Vec<&ChatMessage> = context
            .history
            .iter()
            .filter(|message| message.role != ChatRole::System)
            .collect();
        let skip = turns.len().saturating_sub(self.history_turns);
        messages.extend(turns.into_iter().skip(skip).cloned());
        messages.push(user_turn);

        debug!(
            message_count = messages.len(),
            dropped_turns = skip,
            "built request messages"
        );
        messages
    }

    pub fn generate_safety_check_prompt(&self, user_message: &str) -> String {
        format!(
            "以下のユーザーメッセージについて、全年齢向け・非依存・非露骨の観点から安全性をチェックし、
適切な応答方針を提案してください:

ユーザーメッセージ: \"{user_message}\"

チェック項目:
1. NSFW/露骨な内容が含まれていないか
2. 過度な依存を煽る内容でないか
3. 自傷や危険な行為への言及がないか
4. 健全な会話として応答可能か

応答方針を簡潔に返してください。"
        )
    }

    pub fn generate_summary_prompt(&self, messages: &[ChatMessage]) -> String {
        let conversation = messages
            .iter()
            .filter_map(|message| {
                let speaker = match message.role {
                    ChatRole::System => return None,
                    ChatRole::User => "ユーザー",
                    ChatRole::Assistant => "AI",
                };
                Some(format!("{speaker}: {}", message.content))
            })
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "以下の会話を要約してください。重要な情報（感情、話題、約束、悩み等）を含めて3-4文で簡潔にまとめてください:

{conversation}

要約:"
        )
    }
}

fn tone_description(tone: Tone) -> &'static str {
    match tone {
        Tone::Friendly => "明るく親しみやすい",
        Tone::Romantic => "甘く優しい恋人のような",
        Tone::Caring => "思いやりがあり癒やしを与える",
        Tone::Playful => "楽しくて少しお茶目な",
    }
}

fn formality_description(formality: Formality) -> &'static str {
    match formality {
        Formality::Casual => "ため口で親近感のある",
        Formality::Polite => "丁寧語を使った",
        Formality::Mixed => "親しみやすい敬語と自然な会話の",
    }
}

fn style_constraints(style: ResponseStyle) -> &'static str {
    match style {
        ResponseStyle::Concise => {
            "- 必ず簡潔で要点を絞った応答（100文字以内厳守）\n- 1〜2個の具体的な提案のみ\n- 長い説明は避けて要点のみ伝える"
        }
        ResponseStyle::Detailed => {
            "- 場所・時間・予算を含めた丁寧な説明\n- 3個程度の選択肢を比較して提示\n- 移動手段や混雑の目安も添える"
        }
        ResponseStyle::Conversational => {
            "- 会話のキャッチボールを重視した自然な応答\n- 質問を交えて相手の希望を引き出す\n- 提案は1つずつ小出しにする"
        }
    }
}

fn length_constraint(style: ResponseStyle) -> &'static str {
    match style {
        ResponseStyle::Concise => {
            "重要：必ず90-120文字で応答してください。具体的で有用な情報を含み、親しみやすく、次の会話を促すような返答をする。"
        }
        ResponseStyle::Detailed => {
            "重要：300文字程度を目安に、見出しや箇条書きで読みやすく応答してください。"
        }
        ResponseStyle::Conversational => {
            "重要：150文字以内で、最後に相手への質問を一つ添えてください。"
        }
    }
}

fn build_memory_context(memories: &UserMemories) -> String {
    let mut sections = Vec::new();

    if let Some(nickname) = memories.nickname.as_deref().map(str::trim)
        && !nickname.is_empty()
    {
        sections.push(format!("呼ばれ方: {nickname}"));
    }

    if !memories.preferences.is_empty() {
        let prefs = memories
            .preferences
            .iter()
            .map(|(key, value)| format!("{key}: {value}"))
            .collect::<Vec<_>>()
            .join(", ");
        sections.push(format!("好きなもの: {prefs}"));
    }

    if !memories.important_dates.is_empty() {
        let dates = memories
            .important_dates
            .iter()
            .map(|date| format!("{}: {}", date.name, date.date))
            .collect::<Vec<_>>()
            .join(", ");
        sections.push(format!("大切な日: {dates}"));
    }

    if !memories.concerns.is_empty() {
        sections.push(format!("最近の悩み: {}", memories.concerns.join(", ")));
    }

    sections.join("\n")
}

#[cfg(test)]
mod tests {
    use core_types::ImportantDate;

    use super::*;

    struct StaticMemory(&'static str);

    impl MemoryContextProvider for StaticMemory {
        fn generate_memory_context(&self) -> String {
            self.0.to_string()
        }
    }

    fn memories() -> UserMemories {
        let mut memories = UserMemories {
            nickname: Some("たろう".to_string()),
            ..UserMemories::default()
        };
        memories
            .preferences
            .insert("食べ物".to_string(), "ラーメン".to_string());
        memories.important_dates.push(ImportantDate {
            name: "誕生日".to_string(),
            date: "5/3".to_string(),
        });
        memories.concerns.push("予算".to_string());
        memories
    }

    #[test]
    fn system_prompt_embeds_persona_and_guidelines() {
        let prompt = PromptManager::default().generate_system_prompt();
        assert!(prompt.contains("「みさき」"));
        assert!(prompt.contains(SAFETY_GUIDELINES));
        assert!(prompt.contains("明るく親しみやすい性格"));
        assert!(prompt.contains("親しみやすい敬語と自然な会話の話し方"));
        assert!(prompt.contains("東京観光、グルメ、ショッピング"));
        assert!(prompt.contains("100文字以内厳守"));
    }

    #[test]
    fn updated_personality_changes_prompt() {
        let mut manager = PromptManager::default();
        manager.update_personality(PersonalityPatch {
            name: Some("さくら".to_string()),
            tone: Some(Tone::Playful),
            response_style: Some(ResponseStyle::Conversational),
            ..PersonalityPatch::default()
        });
        let prompt = manager.generate_system_prompt();
        assert!(prompt.contains("「さくら」"));
        assert!(prompt.contains("楽しくて少しお茶目な性格"));
        assert!(prompt.contains("150文字以内"));
        assert_eq!(manager.personality().formality, Formality::Mixed);
    }

    #[test]
    fn context_without_extras_has_only_persona() {
        let messages = PromptManager::default().generate_conversation_context(None, None);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, ChatRole::System);
    }

    #[test]
    fn context_orders_persona_memory_summary() {
        let memories = memories();
        let messages = PromptManager::default()
            .generate_conversation_context(Some(&memories), Some("浅草の話をした"));
        assert_eq!(messages.len(), 3);
        assert!(messages[0].content.contains("AI観光ガイド"));
        assert!(messages[1].content.starts_with("## ユーザーについて覚えていること"));
        assert!(messages[1].content.contains("呼ばれ方: たろう"));
        assert!(messages[1].content.contains("好きなもの: 食べ物: ラーメン"));
        assert!(messages[1].content.contains("大切な日: 誕生日: 5/3"));
        assert!(messages[1].content.contains("最近の悩み: 予算"));
        assert_eq!(messages[2].content, "## 最近の会話の流れ\n浅草の話をした");
    }

    #[test]
    fn empty_memory_sections_are_omitted() {
        let memories = UserMemories {
            concerns: vec!["天気".to_string()],
            ..UserMemories::default()
        };
        let messages = PromptManager::default().generate_conversation_context(Some(&memories), None);
        assert_eq!(messages[1].content, "## ユーザーについて覚えていること\n最近の悩み: 天気");

        let messages = PromptManager::default()
            .generate_conversation_context(Some(&UserMemories::default()), Some("  "));
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn request_messages_append_memory_history_and_turn() {
        let manager = PromptManager::default()
            .with_memory_provider(Arc::new(StaticMemory("好み: 寿司\n")))
            .with_history_turns(2);
        let history = vec![
            ChatMessage::user("一"),
            ChatMessage::assistant("二"),
            ChatMessage::system("ignored"),
            ChatMessage::user("三"),
        ];
        let messages = manager.build_request_messages(
            RequestContext {
                history: &history,
                ..RequestContext::default()
            },
            ChatMessage::user("四"),
        );

        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents.len(), 5);
        assert_eq!(contents[1], "ユーザーについての記憶:\n好み: 寿司");
        assert_eq!(&contents[2..], &["二", "三", "四"]);
    }

    #[test]
    fn blank_memory_prose_is_skipped() {
        let manager = PromptManager::default().with_memory_provider(Arc::new(StaticMemory("")));
        let messages =
            manager.build_request_messages(RequestContext::default(), ChatMessage::user("hi"));
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn summary_prompt_skips_system_turns() {
        let prompt = PromptManager::default().generate_summary_prompt(&[
            ChatMessage::system("persona"),
            ChatMessage::user("浅草に行きたい"),
            ChatMessage::assistant("いいですね"),
        ]);
        assert!(prompt.contains("ユーザー: 浅草に行きたい\nAI: いいですね"));
        assert!(!prompt.contains("persona"));
    }

    #[test]
    fn safety_prompt_quotes_message() {
        let prompt = PromptManager::default().generate_safety_check_prompt("テスト");
        assert!(prompt.contains("ユーザーメッセージ: \"テスト\""));
    }
}
