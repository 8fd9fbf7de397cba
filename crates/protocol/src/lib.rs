//! Wire types shared by the ingestion endpoint, the fan-out endpoint, the
//! event bus, and the client SDK.
//!
//! Three discriminated unions drive the system: the inbound ingestion
//! [`ClientFrame`], the outbound ingestion [`ServerFrame`], and the
//! [`BusEvent`] that both the live bus and fan-out subscribers carry.
//! All are JSON with a `type` tag.

use chrono::{DateTime, Utc};
use rt_domain::run::{AiStatus, RunStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Log lines
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Stdout,
    Stderr,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stdout" => Some(Self::Stdout),
            "stderr" => Some(Self::Stderr),
            _ => None,
        }
    }
}

/// One captured output line. Timestamps are authoritative client-supplied
/// wall-clock values; the server never rewrites them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub content: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ingestion frames (client → server)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Inbound ingestion frame. Exactly one `metadata` frame opens the
/// stream; `line` frames follow; at most one `completion` closes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "metadata")]
    Metadata {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        project_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_name: Option<String>,
    },

    #[serde(rename = "line")]
    Line {
        timestamp: DateTime<Utc>,
        level: LogLevel,
        content: String,
    },

    #[serde(rename = "completion")]
    Completion { exit_code: i32 },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ingestion replies (server → client)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// The run was materialized; first server frame on every stream.
    #[serde(rename = "started")]
    Started { run_id: Uuid },

    /// Protocol or authorization failure; the stream closes after this.
    #[serde(rename = "error")]
    Error { message: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bus / fan-out events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Live event published on the bus and forwarded verbatim to fan-out
/// subscribers. Fire-and-forget: late subscribers miss past events and
/// recover via the LogStore snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BusEvent {
    #[serde(rename = "log")]
    Log {
        run_id: Uuid,
        timestamp: DateTime<Utc>,
        level: LogLevel,
        content: String,
    },

    #[serde(rename = "run_update")]
    RunUpdate {
        run_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<RunStatus>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ai_status: Option<AiStatus>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ai_report: Option<String>,
    },
}

impl BusEvent {
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::Log { run_id, .. } | Self::RunUpdate { run_id, .. } => *run_id,
        }
    }

    /// A `log` event for one captured line.
    pub fn line(run_id: Uuid, record: &LineRecord) -> Self {
        Self::Log {
            run_id,
            timestamp: record.timestamp,
            level: record.level,
            content: record.content.clone(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Analysis queue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A queued analysis job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisTask {
    pub run_id: Uuid,
    pub user_id: Uuid,
    pub enqueued_at: DateTime<Utc>,
}

/// Terminal notification published when a worker finishes (or fails) a
/// task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub run_id: Uuid,
    pub status: AiStatus,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn client_frames_discriminate_on_type() {
        let m: ClientFrame =
            serde_json::from_str(r#"{"type":"metadata","project_name":"myapp"}"#).unwrap();
        assert!(matches!(
            m,
            ClientFrame::Metadata { project_name: Some(ref p), group_name: None } if p == "myapp"
        ));

        let l: ClientFrame = serde_json::from_str(
            r#"{"type":"line","timestamp":"2026-03-01T12:00:00Z","level":"stderr","content":"b"}"#,
        )
        .unwrap();
        assert!(matches!(l, ClientFrame::Line { level: LogLevel::Stderr, .. }));

        let c: ClientFrame =
            serde_json::from_str(r#"{"type":"completion","exit_code":2}"#).unwrap();
        assert!(matches!(c, ClientFrame::Completion { exit_code: 2 }));
    }

    #[test]
    fn unknown_frame_type_is_an_error() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"hello"}"#).is_err());
    }

    #[test]
    fn metadata_names_are_optional() {
        let m: ClientFrame = serde_json::from_str(r#"{"type":"metadata"}"#).unwrap();
        assert!(matches!(
            m,
            ClientFrame::Metadata { project_name: None, group_name: None }
        ));
    }

    #[test]
    fn log_event_wire_shape() {
        let run_id = Uuid::nil();
        let ev = BusEvent::Log {
            run_id,
            timestamp: ts(),
            level: LogLevel::Stdout,
            content: "a".into(),
        };
        let json: serde_json::Value = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "log");
        assert_eq!(json["level"], "stdout");
        assert_eq!(json["content"], "a");
        assert_eq!(json["run_id"], "00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn run_update_omits_absent_fields() {
        let ev = BusEvent::RunUpdate {
            run_id: Uuid::nil(),
            status: Some(RunStatus::Completed),
            exit_code: Some(0),
            ai_status: None,
            ai_report: None,
        };
        let json: serde_json::Value = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "run_update");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["exit_code"], 0);
        assert!(json.get("ai_status").is_none());
        assert!(json.get("ai_report").is_none());
    }

    #[test]
    fn started_reply_roundtrip() {
        let run_id = Uuid::new_v4();
        let json = serde_json::to_string(&ServerFrame::Started { run_id }).unwrap();
        let back: ServerFrame = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, ServerFrame::Started { run_id: r } if r == run_id));
    }

    #[test]
    fn bus_event_run_id_accessor() {
        let id = Uuid::new_v4();
        let rec = LineRecord {
            timestamp: ts(),
            level: LogLevel::Stdout,
            content: "x".into(),
        };
        assert_eq!(BusEvent::line(id, &rec).run_id(), id);
    }
}
