//! Run lifecycle entities.
//!
//! A run is one execution of a wrapped command, created when an ingestion
//! stream opens and driven to exactly one terminal state when it closes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    /// Transport failure before a clean completion: end_time is set,
    /// exit_code stays NULL.
    Aborted,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Terminal status implied by a completion frame's exit code.
    pub fn from_exit_code(exit_code: i32) -> Self {
        if exit_code == 0 {
            Self::Completed
        } else {
            Self::Failed
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "aborted" => Some(Self::Aborted),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AI analysis status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiStatus {
    None,
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AiStatus {
    /// Whether a transition to `next` respects the monotonic lifecycle:
    /// `{none, pending} → processing → {completed, failed}`, with
    /// `completed`/`failed` re-entering `processing` on an explicit
    /// re-analyze request. `failed` is additionally reachable straight
    /// from the initial states: a task can be rejected (missing settings,
    /// disabled AI) before a worker ever marks it `processing`.
    pub fn can_transition_to(self, next: AiStatus) -> bool {
        match next {
            AiStatus::Processing => !matches!(self, AiStatus::Processing),
            AiStatus::Completed => matches!(self, AiStatus::Processing),
            AiStatus::Failed => matches!(
                self,
                AiStatus::None | AiStatus::Pending | AiStatus::Processing
            ),
            // `none` and `pending` are initial states, never re-entered.
            AiStatus::None | AiStatus::Pending => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub group_id: Uuid,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub ai_status: AiStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_report: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A run joined with its ownership chain (group → project → user).
/// Used by fan-out authorization and by the analyzer, which needs the
/// project id for settings resolution without a second round trip.
#[derive(Debug, Clone)]
pub struct RunDetail {
    pub run: Run,
    pub group_name: String,
    pub project_id: Uuid,
    pub project_name: String,
    pub user_id: Uuid,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Aggregate statistics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Counts of runs by status and by AI status (dashboard contract).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusStatistics {
    pub total: u64,
    pub by_status: HashMap<String, u64>,
    pub by_ai_status: HashMap<String, u64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Users, credentials, projects, groups
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

/// An API token record. The raw token value is never persisted; only its
/// hex SHA-256 digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_terminal() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Aborted.is_terminal());
    }

    #[test]
    fn status_from_exit_code() {
        assert_eq!(RunStatus::from_exit_code(0), RunStatus::Completed);
        assert_eq!(RunStatus::from_exit_code(2), RunStatus::Failed);
        assert_eq!(RunStatus::from_exit_code(-1), RunStatus::Failed);
    }

    #[test]
    fn ai_status_monotonic_forward() {
        assert!(AiStatus::None.can_transition_to(AiStatus::Processing));
        assert!(AiStatus::Pending.can_transition_to(AiStatus::Processing));
        assert!(AiStatus::Processing.can_transition_to(AiStatus::Completed));
        assert!(AiStatus::Processing.can_transition_to(AiStatus::Failed));
    }

    #[test]
    fn ai_status_reanalyze_reenters_processing() {
        assert!(AiStatus::Completed.can_transition_to(AiStatus::Processing));
        assert!(AiStatus::Failed.can_transition_to(AiStatus::Processing));
    }

    #[test]
    fn ai_status_early_rejection_fails_from_initial_states() {
        assert!(AiStatus::Pending.can_transition_to(AiStatus::Failed));
        assert!(AiStatus::None.can_transition_to(AiStatus::Failed));
    }

    #[test]
    fn ai_status_rejects_backward() {
        assert!(!AiStatus::Processing.can_transition_to(AiStatus::Pending));
        assert!(!AiStatus::Completed.can_transition_to(AiStatus::None));
        assert!(!AiStatus::Pending.can_transition_to(AiStatus::Completed));
        assert!(!AiStatus::Completed.can_transition_to(AiStatus::Failed));
        assert!(!AiStatus::Processing.can_transition_to(AiStatus::Processing));
    }

    #[test]
    fn status_serde_is_snake_case() {
        assert_eq!(
            serde_json::to_string(&RunStatus::Aborted).unwrap(),
            "\"aborted\""
        );
        assert_eq!(
            serde_json::to_string(&AiStatus::None).unwrap(),
            "\"none\""
        );
    }

    #[test]
    fn parse_roundtrip() {
        for s in [
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Aborted,
        ] {
            assert_eq!(RunStatus::parse(s.as_str()), Some(s));
        }
        for s in [
            AiStatus::None,
            AiStatus::Pending,
            AiStatus::Processing,
            AiStatus::Completed,
            AiStatus::Failed,
        ] {
            assert_eq!(AiStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(RunStatus::parse("bogus"), None);
    }
}
