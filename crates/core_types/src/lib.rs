use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send + 'static>>;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 500;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UiLanguage {
    Ja,
    En,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Local,
    OpenAi,
    Anthropic,
    Gemini,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::OpenAi => "open_ai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One chronological turn handed to a provider. Built once and never edited.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Base64 image payload without a data-URL prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: None,
            image_data: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    pub fn with_image(mut self, base64_image: impl Into<String>) -> Self {
        self.image_data = Some(base64_image.into());
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletionOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
}

impl ChatCompletionOptions {
    pub fn streaming() -> Self {
        Self {
            stream: true,
            ..Self::default()
        }
    }

    // Zero counts as unset, same as an absent value.
    pub fn temperature(&self) -> f32 {
        self.temperature
            .filter(|value| *value > 0.0)
            .unwrap_or(DEFAULT_TEMPERATURE)
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_MAX_TOKENS)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamChunk {
    pub content: String,
    pub finished: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finished: false,
            error: None,
        }
    }

    pub fn finished() -> Self {
        Self {
            content: String::new(),
            finished: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            content: String::new(),
            finished: true,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        options: &ChatCompletionOptions,
    ) -> Result<String>;

    /// Lazy chunk producer. Not restartable; dropping the stream stops it.
    fn stream_chat_completion(
        &self,
        messages: Vec<ChatMessage>,
        options: ChatCompletionOptions,
    ) -> ChunkStream;

    async fn analyze_image(&self, base64_image: &str, user_message: Option<&str>)
    -> Result<String>;
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Violation {
    ExplicitContent,
    InappropriateRequest,
    ViolentContent,
    MentalHealthTrigger,
    RomanticContent,
    PersonalInfo,
    Roleplay,
}

impl Violation {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ExplicitContent => "露骨な内容が含まれています",
            Self::InappropriateRequest => "不適切なリクエストが含まれています",
            Self::ViolentContent => "暴力的な内容が含まれています",
            Self::MentalHealthTrigger => "メンタルヘルスに関する注意喚起",
            Self::RomanticContent => "ロマンチックな内容が含まれています",
            Self::PersonalInfo => "個人情報が含まれている可能性があります",
            Self::Roleplay => "不適切なロールプレイ要素が含まれています",
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SafetyCheckResult {
    pub is_safe: bool,
    pub violations: Vec<Violation>,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement_text: Option<String>,
}

impl Default for SafetyCheckResult {
    fn default() -> Self {
        Self::safe()
    }
}

impl SafetyCheckResult {
    pub fn safe() -> Self {
        Self {
            is_safe: true,
            violations: Vec::new(),
            severity: Severity::Low,
            replacement_text: None,
        }
    }

    /// Severity only ever rises to the highest triggered rule.
    pub fn record(&mut self, violation: Violation, severity: Severity) {
        self.violations.push(violation);
        self.severity = self.severity.max(severity);
        self.is_safe = false;
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModerationSettings {
    pub strict_mode: bool,
    pub block_explicit_content: bool,
    pub block_romantic_content: bool,
    pub block_mental_health_triggers: bool,
    pub allow_mild_suggestions: bool,
}

impl Default for ModerationSettings {
    fn default() -> Self {
        Self {
            strict_mode: true,
            block_explicit_content: true,
            block_romantic_content: false,
            block_mental_health_triggers: true,
            allow_mild_suggestions: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModerationSettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict_mode: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_explicit_content: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_romantic_content: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_mental_health_triggers: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_mild_suggestions: Option<bool>,
}

impl ModerationSettings {
    pub fn apply(&mut self, patch: ModerationSettingsPatch) {
        if let Some(value) = patch.strict_mode {
            self.strict_mode = value;
        }
        if let Some(value) = patch.block_explicit_content {
            self.block_explicit_content = value;
        }
        if let Some(value) = patch.block_romantic_content {
            self.block_romantic_content = value;
        }
        if let Some(value) = patch.block_mental_health_triggers {
            self.block_mental_health_triggers = value;
        }
        if let Some(value) = patch.allow_mild_suggestions {
            self.allow_mild_suggestions = value;
        }
    }
}

pub trait SafetyChecker: Send + Sync {
    fn check_content(&self, text: &str) -> SafetyCheckResult;
    fn check_ai_response(&self, text: &str) -> SafetyCheckResult;
    fn generate_safe_response(&self, original_intent: &str) -> String;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Friendly,
    Romantic,
    Caring,
    Playful,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Formality {
    Casual,
    Polite,
    Mixed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStyle {
    Concise,
    Detailed,
    Conversational,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PersonalityConfig {
    pub name: String,
    pub tone: Tone,
    pub formality: Formality,
    pub interests: Vec<String>,
    pub response_style: ResponseStyle,
}

impl Default for PersonalityConfig {
    fn default() -> Self {
        Self {
            name: "みさき".to_string(),
            tone: Tone::Friendly,
            formality: Formality::Mixed,
            interests: ["東京観光", "グルメ", "ショッピング", "カフェ", "神社仏閣", "イベント"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            response_style: ResponseStyle::Concise,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersonalityPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<Tone>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formality: Option<Formality>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interests: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_style: Option<ResponseStyle>,
}

impl PersonalityConfig {
    pub fn apply(&mut self, patch: PersonalityPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(tone) = patch.tone {
            self.tone = tone;
        }
        if let Some(formality) = patch.formality {
            self.formality = formality;
        }
        if let Some(interests) = patch.interests {
            self.interests = interests;
        }
        if let Some(style) = patch.response_style {
            self.response_style = style;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportantDate {
    pub name: String,
    pub date: String,
}

/// Structured facts remembered about the user, rendered by the context builder.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserMemories {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default)]
    pub preferences: BTreeMap<String, String>,
    #[serde(default)]
    pub important_dates: Vec<ImportantDate>,
    #[serde(default)]
    pub concerns: Vec<String>,
}

impl UserMemories {
    pub fn is_empty(&self) -> bool {
        self.nickname.as_deref().is_none_or(|name| name.trim().is_empty())
            && self.preferences.is_empty()
            && self.important_dates.is_empty()
            && self.concerns.is_empty()
    }
}

pub trait MemoryContextProvider: Send + Sync {
    /// Opaque prose block; empty when nothing is remembered.
    fn generate_memory_context(&self) -> String;
}

pub trait Chooser: Send + Sync {
    /// Returns an index in `0..len`. Never called with `len == 0`.
    fn pick(&self, len: usize) -> usize;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomChooser;

impl Chooser for RandomChooser {
    fn pick(&self, len: usize) -> usize {
        rand::thread_rng().gen_range(0..len)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FixedChooser(pub usize);

impl Chooser for FixedChooser {
    fn pick(&self, len: usize) -> usize {
        self.0 % len
    }
}

pub fn pick_from<'a, T>(chooser: &dyn Chooser, items: &'a [T]) -> Option<&'a T> {
    if items.is_empty() {
        return None;
    }
    items.get(chooser.pick(items.len()).min(items.len() - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_low_to_high() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert_eq!(Severity::High.max(Severity::Medium), Severity::High);
    }

    #[test]
    fn record_keeps_highest_severity() {
        let mut result = SafetyCheckResult::safe();
        result.record(Violation::ExplicitContent, Severity::High);
        result.record(Violation::ViolentContent, Severity::Medium);
        assert!(!result.is_safe);
        assert_eq!(result.severity, Severity::High);
        assert_eq!(
            result.violations,
            vec![Violation::ExplicitContent, Violation::ViolentContent]
        );
    }

    #[test]
    fn zero_options_fall_back_to_defaults() {
        let options = ChatCompletionOptions {
            temperature: Some(0.0),
            max_tokens: Some(0),
            stream: false,
        };
        assert_eq!(options.temperature(), DEFAULT_TEMPERATURE);
        assert_eq!(options.max_tokens(), DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn moderation_patch_merges_only_given_fields() {
        let mut settings = ModerationSettings::default();
        settings.apply(ModerationSettingsPatch {
            block_romantic_content: Some(true),
            ..ModerationSettingsPatch::default()
        });
        assert!(settings.block_romantic_content);
        assert!(settings.strict_mode);
        assert!(settings.block_explicit_content);
    }

    #[test]
    fn fixed_chooser_wraps_index() {
        let items = ["a", "b", "c"];
        assert_eq!(pick_from(&FixedChooser(4), &items), Some(&"b"));
        assert_eq!(pick_from::<&str>(&FixedChooser(0), &[]), None);
    }

    #[test]
    fn chat_message_serializes_role_in_snake_case() {
        let message = ChatMessage::user("こんにちは").with_timestamp("10:00");
        let json = serde_json::to_value(&message).expect("serialize");
        assert_eq!(json["role"], "user");
        assert_eq!(json["timestamp"], "10:00");
        assert!(json.get("image_data").is_none());
    }
}
