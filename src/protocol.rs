//! Wire protocol: the exact command/event type strings from spec.md §6.
//!
//! One `Command` struct carries `{boxId, type, ...payload, sessionId,
//! boxVersion}` over both transports (HTTP POST body and WebSocket text
//! frames), per spec.md §9 "two legacy timer transports ... must be
//! preserved as equivalent entry points funneling into the same
//! dispatcher". `sessionId`/`boxVersion` default to empty/0 so control
//! frames (`REQUEST_STATE`, `PING`, `PONG`) that do not need them still
//! deserialize.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub box_id: u32,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub box_version: u64,
    #[serde(flatten)]
    pub kind: CommandKind,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum CommandKind {
    #[serde(rename = "INIT_ROUTE")]
    InitRoute {
        route_index: u32,
        holds_count: u32,
        competitors: Vec<CompetitorInput>,
        timer_preset_sec: u32,
    },
    #[serde(rename = "START_TIMER")]
    StartTimer,
    #[serde(rename = "STOP_TIMER")]
    StopTimer,
    #[serde(rename = "RESUME_TIMER")]
    ResumeTimer,
    #[serde(rename = "PROGRESS_UPDATE")]
    ProgressUpdate {
        #[serde(default)]
        delta: Option<ProgressDelta>,
        #[serde(default)]
        hold_count: Option<f64>,
    },
    #[serde(rename = "SUBMIT_SCORE")]
    SubmitScore {
        competitor: String,
        score: f64,
        #[serde(default)]
        registered_time: Option<f64>,
    },
    #[serde(rename = "REGISTER_TIME")]
    RegisterTime { sec: f64 },
    #[serde(rename = "ACTIVE_CLIMBER")]
    ActiveClimber { name: String },
    #[serde(rename = "SET_TIME_CRITERION")]
    SetTimeCriterion { enabled: bool },
    #[serde(rename = "RESET_BOX")]
    ResetBox,
    #[serde(rename = "TIMER_SYNC")]
    TimerSync { remaining_sec: i64 },
    #[serde(rename = "REQUEST_STATE")]
    RequestState,
    #[serde(rename = "PING")]
    Ping,
    #[serde(rename = "PONG")]
    Pong,
}

impl CommandKind {
    /// Whether this command mutates box state and therefore needs a fresh
    /// `(sessionId, boxVersion)` pair (spec.md §4.D). `REQUEST_STATE`/`PING`/
    /// `PONG` are control frames and skip the staleness check entirely.
    pub fn requires_session_check(&self) -> bool {
        !matches!(self, CommandKind::RequestState | CommandKind::Ping | CommandKind::Pong)
    }

    /// §4.C rate limit bucket: progress updates get their own generous
    /// quota, everything else shares the stricter one.
    pub fn rate_limit_bucket(&self) -> RateLimitBucket {
        match self {
            CommandKind::ProgressUpdate { .. } => RateLimitBucket::Progress,
            _ => RateLimitBucket::Other,
        }
    }

    pub fn wire_name(&self) -> &'static str {
        match self {
            CommandKind::InitRoute { .. } => "INIT_ROUTE",
            CommandKind::StartTimer => "START_TIMER",
            CommandKind::StopTimer => "STOP_TIMER",
            CommandKind::ResumeTimer => "RESUME_TIMER",
            CommandKind::ProgressUpdate { .. } => "PROGRESS_UPDATE",
            CommandKind::SubmitScore { .. } => "SUBMIT_SCORE",
            CommandKind::RegisterTime { .. } => "REGISTER_TIME",
            CommandKind::ActiveClimber { .. } => "ACTIVE_CLIMBER",
            CommandKind::SetTimeCriterion { .. } => "SET_TIME_CRITERION",
            CommandKind::ResetBox => "RESET_BOX",
            CommandKind::TimerSync { .. } => "TIMER_SYNC",
            CommandKind::RequestState => "REQUEST_STATE",
            CommandKind::Ping => "PING",
            CommandKind::Pong => "PONG",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitBucket {
    Progress,
    Other,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ProgressDelta {
    /// `+1` full hold.
    Full,
    /// `+0.1`, at most one per climber per route.
    Half,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompetitorInput {
    pub name: String,
    #[serde(default)]
    pub club: Option<String>,
}

/// `{status: ok | ignored | error}` response contract (spec.md §4.C, §7).
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum CommandResponse {
    Ok {
        box_version: u64,
        session_id: String,
    },
    Ignored {
        reason: String,
    },
    Error {
        retry_after_ms: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_init_route() {
        let json = r#"{
            "boxId": 0, "type": "INIT_ROUTE", "sessionId": "s", "boxVersion": 1,
            "routeIndex": 1, "holdsCount": 25,
            "competitors": [{"name": "A"}, {"name": "B", "club": "X"}],
            "timerPresetSec": 300
        }"#;
        let cmd: Command = serde_json::from_str(json).unwrap();
        assert_eq!(cmd.box_id, 0);
        assert!(matches!(cmd.kind, CommandKind::InitRoute { route_index: 1, holds_count: 25, .. }));
    }

    #[test]
    fn control_frame_without_session_fields() {
        let json = r#"{"boxId": 3, "type": "REQUEST_STATE"}"#;
        let cmd: Command = serde_json::from_str(json).unwrap();
        assert_eq!(cmd.session_id, "");
        assert_eq!(cmd.box_version, 0);
        assert!(!cmd.kind.requires_session_check());
    }

    #[test]
    fn progress_update_absolute_vs_delta() {
        let json = r#"{"boxId":0,"type":"PROGRESS_UPDATE","sessionId":"s","boxVersion":1,"holdCount":12.5}"#;
        let cmd: Command = serde_json::from_str(json).unwrap();
        assert!(matches!(cmd.kind, CommandKind::ProgressUpdate { hold_count: Some(_), delta: None }));
    }
}
