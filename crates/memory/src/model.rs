use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_TOPICS: usize = 10;
pub const MAX_EMOTIONS: usize = 20;
pub const MAX_KEYWORDS: usize = 30;

pub const DEFAULT_AI_NAME: &str = "みさき";
pub const DEFAULT_USER_NAME: &str = "あなた";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    Preference,
    Nickname,
    Anniversary,
    Summary,
    Trait,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryItem {
    pub id: Uuid,
    pub category: MemoryCategory,
    pub key: String,
    pub value: serde_json::Value,
    /// Importance in `0.0..=1.0`.
    pub weight: f32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl MemoryItem {
    pub fn new(
        category: MemoryCategory,
        key: impl Into<String>,
        value: serde_json::Value,
        weight: f32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            category,
            key: key.into(),
            value,
            weight: weight.clamp(0.0, 1.0),
            created_at: now,
            updated_at: now,
            expires_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionMemory {
    pub topics: VecDeque<String>,
    pub emotions: VecDeque<String>,
    pub keywords: VecDeque<String>,
    pub todos: Vec<String>,
    pub context: String,
    pub last_message_at: DateTime<Utc>,
}

impl Default for SessionMemory {
    fn default() -> Self {
        Self {
            topics: VecDeque::new(),
            emotions: VecDeque::new(),
            keywords: VecDeque::new(),
            todos: Vec::new(),
            context: String::new(),
            last_message_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Nicknames {
    pub user_to_ai: String,
    pub ai_to_user: String,
}

impl Default for Nicknames {
    fn default() -> Self {
        Self {
            user_to_ai: DEFAULT_AI_NAME.to_string(),
            ai_to_user: DEFAULT_USER_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Anniversary {
    pub date: String,
    pub description: String,
    #[serde(default)]
    pub recurring: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LongTermMemory {
    #[serde(default)]
    pub preferences: BTreeMap<String, String>,
    #[serde(default)]
    pub nicknames: Nicknames,
    #[serde(default)]
    pub anniversaries: Vec<Anniversary>,
    #[serde(default)]
    pub traits: BTreeMap<String, String>,
    #[serde(default)]
    pub relationships: BTreeMap<String, String>,
    #[serde(default)]
    pub concerns: Vec<String>,
}

/// Everything the manager holds, in its export/import shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MemorySnapshot {
    #[serde(default)]
    pub session: SessionMemory,
    #[serde(default)]
    pub long_term: LongTermMemory,
    #[serde(default)]
    pub items: Vec<MemoryItem>,
}
