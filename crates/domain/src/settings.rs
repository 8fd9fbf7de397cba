//! Per-user analysis settings and the project-level overlay.
//!
//! `UserSettings` is the complete default set for a user. `ProjectSettings`
//! carries the same fields, all optional; a `None` means "inherit from the
//! user". `EffectiveSettings::resolve` performs the left-overlay.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Truncation strategy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncateStrategy {
    Head,
    Tail,
    Smart,
}

impl TruncateStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Head => "head",
            Self::Tail => "tail",
            Self::Smart => "smart",
        }
    }

    /// Parse a stored strategy string. An unknown value behaves as `tail`.
    pub fn parse_or_tail(s: &str) -> Self {
        match s {
            "head" => Self::Head,
            "smart" => Self::Smart,
            _ => Self::Tail,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// User settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSettings {
    pub user_id: Uuid,
    pub ai_enabled: bool,
    pub ai_base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_api_key: Option<String>,
    pub ai_model: String,
    pub ai_max_tokens: u32,
    pub ai_auto_analyze: bool,
    pub ai_max_log_lines: usize,
    pub ai_truncate_strategy: TruncateStrategy,
    pub ai_system_prompt: String,
    /// Analyzer admission limit for this user. Clamped to `1..=10`.
    pub ai_max_concurrent: u8,
}

impl UserSettings {
    /// Defaults seeded for a freshly created user.
    pub fn defaults_for(user_id: Uuid) -> Self {
        Self {
            user_id,
            ai_enabled: false,
            ai_base_url: "https://api.openai.com/v1".into(),
            ai_api_key: None,
            ai_model: "gpt-4o-mini".into(),
            ai_max_tokens: 1024,
            ai_auto_analyze: false,
            ai_max_log_lines: 500,
            ai_truncate_strategy: TruncateStrategy::Tail,
            ai_system_prompt: "You are an expert at analyzing script execution logs. \
                               Be concise and specific."
                .into(),
            ai_max_concurrent: 3,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Project settings (overlay)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Project-level overrides. Every field is optional; `None` inherits the
/// user value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSettings {
    pub project_id: Uuid,
    pub ai_enabled: Option<bool>,
    pub ai_base_url: Option<String>,
    pub ai_api_key: Option<String>,
    pub ai_model: Option<String>,
    pub ai_max_tokens: Option<u32>,
    pub ai_auto_analyze: Option<bool>,
    pub ai_max_log_lines: Option<usize>,
    pub ai_truncate_strategy: Option<TruncateStrategy>,
    pub ai_system_prompt: Option<String>,
    pub ai_max_concurrent: Option<u8>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Effective settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where the effective settings came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingsSource {
    /// No project override applied.
    User,
    /// At least one project field overlaid the user defaults.
    Merged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveSettings {
    pub ai_enabled: bool,
    pub ai_base_url: String,
    /// First non-empty of project key then user key; empty string when
    /// neither is configured.
    pub ai_api_key: String,
    pub ai_model: String,
    pub ai_max_tokens: u32,
    pub ai_auto_analyze: bool,
    pub ai_max_log_lines: usize,
    pub ai_truncate_strategy: TruncateStrategy,
    pub ai_system_prompt: String,
    pub ai_max_concurrent: u8,
    pub source: SettingsSource,
}

impl EffectiveSettings {
    /// Left-overlay each non-null project field onto the user defaults.
    pub fn resolve(user: &UserSettings, project: Option<&ProjectSettings>) -> Self {
        let mut merged = false;
        // Tracks whether any overlay fired; `overlay!` keeps the per-field
        // logic in one place.
        macro_rules! overlay {
            ($field:ident) => {
                match project.and_then(|p| p.$field.clone()) {
                    Some(v) => {
                        merged = true;
                        v
                    }
                    None => user.$field.clone(),
                }
            };
        }

        let ai_enabled = overlay!(ai_enabled);
        let ai_base_url = overlay!(ai_base_url);
        let ai_model = overlay!(ai_model);
        let ai_max_tokens = overlay!(ai_max_tokens);
        let ai_auto_analyze = overlay!(ai_auto_analyze);
        let ai_max_log_lines = overlay!(ai_max_log_lines);
        let ai_truncate_strategy = overlay!(ai_truncate_strategy);
        let ai_system_prompt = overlay!(ai_system_prompt);
        let ai_max_concurrent = overlay!(ai_max_concurrent);

        // The API key resolves separately: first non-empty of project
        // then user, never counted as "merged" on its own absence.
        let project_key = project
            .and_then(|p| p.ai_api_key.clone())
            .filter(|k| !k.is_empty());
        if project_key.is_some() {
            merged = true;
        }
        let ai_api_key = project_key
            .or_else(|| user.ai_api_key.clone().filter(|k| !k.is_empty()))
            .unwrap_or_default();

        Self {
            ai_enabled,
            ai_base_url,
            ai_api_key,
            ai_model,
            ai_max_tokens,
            ai_auto_analyze,
            ai_max_log_lines,
            ai_truncate_strategy,
            ai_system_prompt,
            ai_max_concurrent: ai_max_concurrent.clamp(1, 10),
            source: if merged {
                SettingsSource::Merged
            } else {
                SettingsSource::User
            },
        }
    }
}
