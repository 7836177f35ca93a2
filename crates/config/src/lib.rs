use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use core_types::{
    ChatCompletionOptions, ModerationSettings, PersonalityConfig, ProviderKind, UiLanguage,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const CURRENT_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key. Keys never live in this file.
    pub api_key_env: String,
    #[serde(default)]
    pub extra_headers: Vec<(String, String)>,
}

impl ProviderSettings {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LatencyRange {
    pub min: u64,
    pub max: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamingConfig {
    pub local_char_delay_ms: u64,
    pub remote_char_delay_ms: u64,
    pub temperature: f32,
    pub max_tokens: u32,
    pub history_turns: usize,
    pub local_latency_ms: LatencyRange,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            local_char_delay_ms: 50,
            remote_char_delay_ms: 20,
            temperature: core_types::DEFAULT_TEMPERATURE,
            max_tokens: core_types::DEFAULT_MAX_TOKENS,
            history_turns: 20,
            local_latency_ms: LatencyRange {
                min: 1000,
                max: 2000,
            },
        }
    }
}

impl StreamingConfig {
    pub fn local_char_delay(&self) -> Duration {
        Duration::from_millis(self.local_char_delay_ms)
    }

    pub fn remote_char_delay(&self) -> Duration {
        Duration::from_millis(self.remote_char_delay_ms)
    }

    pub fn completion_options(&self) -> ChatCompletionOptions {
        ChatCompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            stream: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub schema_version: u32,
    pub language: UiLanguage,
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderSettings>,
    #[serde(default)]
    pub moderation: ModerationSettings,
    #[serde(default)]
    pub personality: PersonalityConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
}

fn default_providers() -> Vec<ProviderSettings> {
    vec![
        ProviderSettings {
            kind: ProviderKind::OpenAi,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            extra_headers: Vec::new(),
        },
        ProviderSettings {
            kind: ProviderKind::Anthropic,
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-3-haiku-20240307".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            extra_headers: Vec::new(),
        },
        ProviderSettings {
            kind: ProviderKind::Gemini,
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-1.5-pro".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            extra_headers: Vec::new(),
        },
    ]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            language: UiLanguage::Ja,
            provider: ProviderKind::Local,
            providers: default_providers(),
            moderation: ModerationSettings::default(),
            personality: PersonalityConfig::default(),
            streaming: StreamingConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn provider_settings(&self, kind: ProviderKind) -> Option<&ProviderSettings> {
        self.providers.iter().find(|provider| provider.kind == kind)
    }

    pub fn validate(&self) -> Result<()> {
        let latency = self.streaming.local_latency_ms;
        if latency.min > latency.max {
            bail!(
                "streaming.local_latency_ms min {} exceeds max {}",
                latency.min,
                latency.max
            );
        }
        if self.provider != ProviderKind::Local && self.provider_settings(self.provider).is_none() {
            bail!("no provider settings for selected provider {}", self.provider);
        }
        Ok(())
    }
}

pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: dir.into().join("config.json"),
        }
    }

    pub fn from_default_location() -> Result<Self> {
        let mut dir = dirs::config_dir().context("failed to resolve config_dir")?;
        dir.push("misaki");
        Ok(Self::from_dir(dir))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        if !self.path.exists() {
            let config = AppConfig::default();
            self.save(&config)?;
            return Ok(config);
        }

        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let mut config: AppConfig =
            serde_json::from_str(&raw).context("failed to parse app config json")?;
        self.migrate(&mut config);
        config.validate()?;
        self.save(&config)?;
        Ok(config)
    }

    pub fn save(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let text = serde_json::to_string_pretty(config).context("failed to serialize config")?;
        fs::write(&self.path, text)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }

    fn migrate(&self, config: &mut AppConfig) {
        if config.schema_version >= CURRENT_SCHEMA_VERSION {
            return;
        }

        warn!(
            from = config.schema_version,
            to = CURRENT_SCHEMA_VERSION,
            "migrating app config schema"
        );

        // v1 had no provider list; every backend gets its default entry.
        for default in default_providers() {
            if config.provider_settings(default.kind).is_none() {
                config.providers.push(default);
            }
        }
        config.schema_version = CURRENT_SCHEMA_VERSION;
    }
}
