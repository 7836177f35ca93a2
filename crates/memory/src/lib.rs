mod learn;
mod model;

use anyhow::{Context, Result};
use chrono::Utc;
use core_types::{ImportantDate, MemoryContextProvider, UserMemories};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

pub use learn::Learned;
pub use model::{
    Anniversary, DEFAULT_AI_NAME, DEFAULT_USER_NAME, LongTermMemory, MAX_EMOTIONS, MAX_KEYWORDS,
    MAX_TOPICS, MemoryCategory, MemoryItem, MemorySnapshot, Nicknames, SessionMemory,
};

use learn::Extractor;

const PREFERENCE_WEIGHT: f32 = 0.8;
const LIKE: &str = "好き";
const DISLIKE: &str = "苦手";

/// Session and long-term memory about the user.
///
/// Internally synchronized; share it behind an `Arc`.
pub struct MemoryManager {
    state: RwLock<MemorySnapshot>,
    extractor: Extractor,
}

impl MemoryManager {
    pub fn new() -> Result<Self> {
        Self::from_snapshot(MemorySnapshot::default())
    }

    pub fn from_snapshot(snapshot: MemorySnapshot) -> Result<Self> {
        Ok(Self {
            state: RwLock::new(snapshot),
            extractor: Extractor::new()?,
        })
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        self.state.read().clone()
    }

    pub fn session(&self) -> SessionMemory {
        self.state.read().session.clone()
    }

    pub fn long_term(&self) -> LongTermMemory {
        self.state.read().long_term.clone()
    }

    pub fn add_topic(&self, topic: &str) {
        let mut state = self.state.write();
        let session = &mut state.session;
        if !session.topics.iter().any(|existing| existing == topic) {
            push_bounded(&mut session.topics, topic.to_string(), MAX_TOPICS);
        }
        session.last_message_at = Utc::now();
    }

    pub fn add_emotion(&self, emotion: &str) {
        let mut state = self.state.write();
        push_bounded(&mut state.session.emotions, emotion.to_string(), MAX_EMOTIONS);
        state.session.last_message_at = Utc::now();
    }

    pub fn add_keyword(&self, keyword: &str) {
        let mut state = self.state.write();
        let session = &mut state.session;
        if !session.keywords.iter().any(|existing| existing == keyword) {
            push_bounded(&mut session.keywords, keyword.to_string(), MAX_KEYWORDS);
        }
    }

    pub fn add_todo(&self, todo: &str) {
        self.state.write().session.todos.push(todo.to_string());
    }

    pub fn update_context(&self, context: &str) {
        self.state.write().session.context = context.to_string();
    }

    pub fn add_preference(&self, key: &str, value: &str) {
        let mut state = self.state.write();
        state
            .long_term
            .preferences
            .insert(key.to_string(), value.to_string());
        let item = MemoryItem::new(
            MemoryCategory::Preference,
            key,
            Value::String(value.to_string()),
            PREFERENCE_WEIGHT,
        );
        state.items.retain(|existing| {
            existing.category != MemoryCategory::Preference || existing.key != key
        });
        state.items.push(item);
    }

    /// `None` keeps the current name.
    pub fn set_nicknames(&self, user_to_ai: Option<&str>, ai_to_user: Option<&str>) {
        let mut state = self.state.write();
        let nicknames = &mut state.long_term.nicknames;
        if let Some(name) = user_to_ai.filter(|name| !name.trim().is_empty()) {
            nicknames.user_to_ai = name.to_string();
        }
        if let Some(name) = ai_to_user.filter(|name| !name.trim().is_empty()) {
            nicknames.ai_to_user = name.to_string();
        }
    }

    pub fn add_anniversary(&self, date: &str, description: &str, recurring: bool) {
        self.state.write().long_term.anniversaries.push(Anniversary {
            date: date.to_string(),
            description: description.to_string(),
            recurring,
        });
    }

    pub fn add_trait(&self, key: &str, value: &str) {
        self.state
            .write()
            .long_term
            .traits
            .insert(key.to_string(), value.to_string());
    }

    pub fn add_relationship(&self, person: &str, relation: &str) {
        self.state
            .write()
            .long_term
            .relationships
            .insert(person.to_string(), relation.to_string());
    }

    pub fn add_concern(&self, concern: &str) {
        let mut state = self.state.write();
        if !state.long_term.concerns.iter().any(|c| c == concern) {
            state.long_term.concerns.push(concern.to_string());
        }
    }

    pub fn add_memory_item(&self, item: MemoryItem) {
        let mut state = self.state.write();
        state.items.retain(|existing| existing.id != item.id);
        state.items.push(item);
    }

    pub fn remove_memory_item(&self, id: Uuid) -> bool {
        let mut state = self.state.write();
        let before = state.items.len();
        state.items.retain(|item| item.id != id);
        state.items.len() != before
    }

    /// Unexpired items of one category, heaviest first.
    pub fn memory_items_by_category(&self, category: MemoryCategory) -> Vec<MemoryItem> {
        let now = Utc::now();
        let mut items: Vec<MemoryItem> = self
            .state
            .read()
            .items
            .iter()
            .filter(|item| item.category == category && !item.is_expired(now))
            .cloned()
            .collect();
        sort_by_weight(&mut items);
        items
    }

    pub fn top_memory_items(&self, limit: usize) -> Vec<MemoryItem> {
        let now = Utc::now();
        let mut items: Vec<MemoryItem> = self
            .state
            .read()
            .items
            .iter()
            .filter(|item| !item.is_expired(now))
            .cloned()
            .collect();
        sort_by_weight(&mut items);
        items.truncate(limit);
        items
    }

    /// Pulls topics, emotions, keywords and simple preferences out of a user
    /// message and records them.
    pub fn learn_from_message(&self, text: &str) -> Learned {
        let learned = self.extractor.extract(text);
        for topic in &learned.topics {
            self.add_topic(topic);
        }
        for emotion in &learned.emotions {
            self.add_emotion(emotion);
        }
        for keyword in &learned.keywords {
            self.add_keyword(keyword);
        }
        for like in &learned.likes {
            self.add_preference(like, LIKE);
        }
        for dislike in &learned.dislikes {
            self.add_preference(dislike, DISLIKE);
        }
        for concern in &learned.concerns {
            self.add_concern(concern);
        }
        if let Some(nickname) = learned.nickname.as_deref() {
            self.set_nicknames(None, Some(nickname));
        }
        self.state.write().session.last_message_at = Utc::now();
        debug!(
            topics = learned.topics.len(),
            keywords = learned.keywords.len(),
            preferences = learned.likes.len() + learned.dislikes.len(),
            "learned from message"
        );
        learned
    }

    /// Structured view rendered by the prompt builder.
    pub fn user_memories(&self) -> UserMemories {
        let state = self.state.read();
        let long_term = &state.long_term;
        let nickname = Some(long_term.nicknames.ai_to_user.clone())
            .filter(|name| name != DEFAULT_USER_NAME && !name.trim().is_empty());
        UserMemories {
            nickname,
            preferences: long_term.preferences.clone(),
            important_dates: long_term
                .anniversaries
                .iter()
                .map(|anniversary| ImportantDate {
                    name: anniversary.description.clone(),
                    date: anniversary.date.clone(),
                })
                .collect(),
            concerns: long_term.concerns.clone(),
        }
    }

    pub fn reset_session(&self) {
        self.state.write().session = SessionMemory::default();
    }

    pub fn clear_all(&self) {
        *self.state.write() = MemorySnapshot::default();
    }

    pub fn export_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&*self.state.read()).context("failed to serialize memory")
    }

    /// Replaces all memory with the snapshot in `json`. On a parse error the
    /// current memory is left untouched.
    pub fn import_json(&self, json: &str) -> Result<()> {
        let snapshot: MemorySnapshot =
            serde_json::from_str(json).context("failed to parse memory snapshot")?;
        *self.state.write() = snapshot;
        Ok(())
    }
}

impl MemoryContextProvider for MemoryManager {
    fn generate_memory_context(&self) -> String {
        let state = self.state.read();
        let long_term = &state.long_term;
        let session = &state.session;
        let mut context = String::new();

        if long_term.nicknames.ai_to_user != DEFAULT_USER_NAME {
            context.push_str(&format!(
                "ユーザーの呼び名: {}\n",
                long_term.nicknames.ai_to_user
            ));
        }
        if !long_term.preferences.is_empty() {
            context.push_str(&format!("好み: {}\n", join_pairs(&long_term.preferences)));
        }
        if !long_term.traits.is_empty() {
            context.push_str(&format!("特徴: {}\n", join_pairs(&long_term.traits)));
        }
        if !session.topics.is_empty() {
            let recent: Vec<&str> = tail(&session.topics, 5);
            context.push_str(&format!("最近の話題: {}\n", recent.join(", ")));
        }
        if !session.emotions.is_empty() {
            let recent: Vec<&str> = tail(&session.emotions, 3);
            context.push_str(&format!("感情の流れ: {}\n", recent.join(" → ")));
        }
        if !session.todos.is_empty() {
            context.push_str(&format!("約束事項: {}\n", session.todos.join(", ")));
        }
        context
    }
}

fn push_bounded(values: &mut std::collections::VecDeque<String>, value: String, max: usize) {
    values.push_back(value);
    while values.len() > max {
        values.pop_front();
    }
}

fn tail(values: &std::collections::VecDeque<String>, count: usize) -> Vec<&str> {
    values
        .iter()
        .skip(values.len().saturating_sub(count))
        .map(String::as_str)
        .collect()
}

fn join_pairs(map: &std::collections::BTreeMap<String, String>) -> String {
    map.iter()
        .map(|(key, value)| format!("{key}: {value}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn sort_by_weight(items: &mut [MemoryItem]) {
    items.sort_by(|a, b| b.weight.total_cmp(&a.weight));
}
