//! Outbound event types (spec.md §3 "Event", §6 "Event type set").
//!
//! `Event` is what a successful command emits before the dispatcher appends
//! a fresh `STATE_SNAPSHOT` (spec.md §4.B step 5); `AggregateEvent` is what
//! the public aggregate channel (§4.H) additionally produces.

use serde::Serialize;

use crate::snapshot::{AuthoritativeSnapshot, PublicSnapshot};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum Event {
    #[serde(rename = "STATE_SNAPSHOT")]
    StateSnapshot {
        #[serde(flatten)]
        snapshot: Box<AuthoritativeSnapshot>,
        /// Set only on the terminal snapshot a box emits while quiescing for
        /// server shutdown (spec.md §5); absent on every ordinary snapshot.
        #[serde(skip_serializing_if = "Option::is_none")]
        shutdown_reason: Option<&'static str>,
    },
    #[serde(rename = "INIT_ROUTE")]
    InitRoute {
        route_index: u32,
        holds_count: u32,
        timer_preset_sec: u32,
    },
    #[serde(rename = "START_TIMER")]
    StartTimer { remaining_sec: i64 },
    #[serde(rename = "STOP_TIMER")]
    StopTimer { remaining_sec: i64 },
    #[serde(rename = "RESUME_TIMER")]
    ResumeTimer { remaining_sec: i64 },
    #[serde(rename = "PROGRESS_UPDATE")]
    ProgressUpdate { hold_count: f64 },
    #[serde(rename = "SUBMIT_SCORE")]
    SubmitScore { competitor: String, score: f64 },
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
}

/// Events that only ever travel on the public aggregate channel (spec.md
/// §6 "On aggregate: server pushes PUBLIC_STATE_SNAPSHOT and per-box
/// BOX_STATUS_UPDATE, BOX_FLOW_UPDATE, BOX_RANKING_UPDATE").
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum AggregateEvent {
    #[serde(rename = "PUBLIC_STATE_SNAPSHOT")]
    PublicStateSnapshot { boxes: Vec<PublicSnapshot> },
    #[serde(rename = "BOX_STATUS_UPDATE")]
    BoxStatusUpdate(PublicSnapshot),
    #[serde(rename = "BOX_FLOW_UPDATE")]
    BoxFlowUpdate(PublicSnapshot),
    #[serde(rename = "BOX_RANKING_UPDATE")]
    BoxRankingUpdate(PublicSnapshot),
}
