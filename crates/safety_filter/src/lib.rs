mod guidelines;
mod keywords;
mod normalize;

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use core_types::{
    Chooser, ModerationSettings, ModerationSettingsPatch, RandomChooser, SafetyCheckResult,
    SafetyChecker, Severity, Violation, pick_from,
};
use parking_lot::RwLock;
use regex::Regex;
use tracing::warn;

pub use guidelines::{
    AGE_VERIFICATION_PROMPT, SAFETY_GUIDELINES, ViolationCategory, violation_responses,
};
pub use keywords::{KeywordCatalog, KeywordSet};
pub use normalize::normalize_text;

use guidelines::{MENTAL_HEALTH_SUPPORT, SAFE_RESPONSES};

const REPORT_TEXT_CHARS: usize = 50;
const REPORT_USER_ID_CHARS: usize = 8;

/// Keyword and pattern based content filter.
///
/// Settings are read fresh on every check, so `update_settings` from another
/// thread takes effect on the next call.
pub struct SafetyFilter {
    settings: RwLock<ModerationSettings>,
    catalog: KeywordCatalog,
    personal_info: Vec<Regex>,
    roleplay: Vec<Regex>,
    chooser: Arc<dyn Chooser>,
}

impl SafetyFilter {
    pub fn new(settings: ModerationSettings) -> Result<Self> {
        Self::with_chooser(settings, Arc::new(RandomChooser))
    }

    pub fn with_chooser(settings: ModerationSettings, chooser: Arc<dyn Chooser>) -> Result<Self> {
        Ok(Self {
            settings: RwLock::new(settings),
            catalog: KeywordCatalog::default(),
            personal_info: vec![
                Regex::new(r"[0-9]{2,4}-[0-9]{2,4}-[0-9]{4}")?,
                Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}")?,
                Regex::new(r"[0-9]+[丁目番地号]")?,
            ],
            roleplay: vec![
                Regex::new(r"\*[^*]+\*")?,
                Regex::new(r"（[^）]+）")?,
                Regex::new(r"~[^~]+~")?,
            ],
            chooser,
        })
    }

    pub fn settings(&self) -> ModerationSettings {
        *self.settings.read()
    }

    pub fn update_settings(&self, patch: ModerationSettingsPatch) {
        self.settings.write().apply(patch);
    }

    pub fn check_content(&self, text: &str) -> SafetyCheckResult {
        let settings = self.settings();
        let normalized = normalize_text(text);
        let mut result = SafetyCheckResult::safe();

        if settings.block_explicit_content && self.catalog.explicit.matches(&normalized) {
            result.record(Violation::ExplicitContent, Severity::High);
        }

        if self.catalog.inappropriate_requests.matches(&normalized) {
            result.record(Violation::InappropriateRequest, Severity::High);
        }

        if self.catalog.violent.matches(&normalized) {
            result.record(Violation::ViolentContent, Severity::Medium);
        }

        if settings.block_mental_health_triggers && self.catalog.mental_health.matches(&normalized)
        {
            result.record(Violation::MentalHealthTrigger, Severity::Medium);
            result.replacement_text = pick_from(self.chooser.as_ref(), MENTAL_HEALTH_SUPPORT)
                .map(|text| text.to_string());
        }

        if settings.block_romantic_content
            && settings.strict_mode
            && self.catalog.romantic.matches(&normalized)
        {
            result.record(Violation::RomanticContent, Severity::Low);
        }

        result
    }

    pub fn check_ai_response(&self, response: &str) -> SafetyCheckResult {
        let mut result = self.check_content(response);

        if self.personal_info.iter().any(|re| re.is_match(response)) {
            result.record(Violation::PersonalInfo, Severity::Medium);
        }

        if self.roleplay.iter().any(|re| re.is_match(response)) {
            result.record(Violation::Roleplay, Severity::High);
        }

        result
    }

    /// `original_intent` is accepted for call-site symmetry but does not
    /// influence the pick.
    pub fn generate_safe_response(&self, _original_intent: &str) -> String {
        pick_from(self.chooser.as_ref(), SAFE_RESPONSES)
            .copied()
            .unwrap_or_default()
            .to_string()
    }

    pub fn generate_age_verification_prompt(&self) -> String {
        AGE_VERIFICATION_PROMPT.to_string()
    }

    pub fn report_violation(&self, text: &str, user_id: &str, severity: Severity) {
        let excerpt: String = text.chars().take(REPORT_TEXT_CHARS).collect();
        let user: String = user_id.chars().take(REPORT_USER_ID_CHARS).collect();
        warn!(
            text = %format!("{excerpt}..."),
            user_id = %format!("{user}***"),
            severity = ?severity,
            timestamp = %Utc::now().to_rfc3339(),
            "content violation reported"
        );
    }
}

impl SafetyChecker for SafetyFilter {
    fn check_content(&self, text: &str) -> SafetyCheckResult {
        SafetyFilter::check_content(self, text)
    }

    fn check_ai_response(&self, text: &str) -> SafetyCheckResult {
        SafetyFilter::check_ai_response(self, text)
    }

    fn generate_safe_response(&self, original_intent: &str) -> String {
        SafetyFilter::generate_safe_response(self, original_intent)
    }
}
