//! 4.F Snapshot Builder.
//!
//! Produces the authoritative (admin/judge) and public (spectator) shapes
//! from a [`BoxState`] on demand. Both are pure functions of `BoxState` plus
//! the clock, so the hub can call them after every command without holding
//! the box lock (spec.md §5: "no I/O is performed" inside the critical
//! section — building the snapshot is CPU-only and can happen right after
//! release).

use serde::Serialize;

use crate::box_state::BoxState;
use crate::clock::{self, MonotonicClock};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompetitorView {
    pub name: String,
    pub club: Option<String>,
    pub marked: bool,
}

/// Full state for admin/judge clients — every field in spec.md §3.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthoritativeSnapshot {
    pub box_id: u32,
    pub session_id: String,
    pub box_version: u64,
    pub initiated: bool,
    pub route_index: u32,
    pub routes_count: u32,
    pub holds_counts: Vec<u32>,
    pub holds_count: u32,
    pub timer_preset_sec: u32,
    pub timer_state: &'static str,
    pub remaining_sec: i64,
    pub hold_count: f64,
    pub used_half_hold: bool,
    pub competitors: Vec<CompetitorView>,
    pub current_climber: Option<String>,
    pub registered_time: Option<f64>,
    pub scores_by_name: std::collections::HashMap<String, Vec<Option<f64>>>,
    pub times_by_name: std::collections::HashMap<String, Vec<Option<f64>>>,
    pub time_criterion_enabled: bool,
}

/// Spectator-only shape — no session/version, no roster PII beyond display
/// names (spec.md §4.F).
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicSnapshot {
    pub box_id: u32,
    pub categorie: String,
    pub initiated: bool,
    pub route_index: u32,
    pub routes_count: u32,
    pub holds_counts: Vec<u32>,
    pub holds_count: u32,
    pub current_climber: Option<String>,
    pub preparing_climber: Option<String>,
    pub timer_state: &'static str,
    pub remaining_sec: i64,
    pub time_criterion_enabled: bool,
    pub scores_by_name: std::collections::HashMap<String, Vec<Option<f64>>>,
    pub times_by_name: std::collections::HashMap<String, Vec<Option<f64>>>,
}

pub fn build_authoritative(
    state: &BoxState,
    clock: &dyn MonotonicClock,
    allow_negative: bool,
) -> AuthoritativeSnapshot {
    AuthoritativeSnapshot {
        box_id: state.box_id,
        session_id: state.session.session_id.clone(),
        box_version: state.session.box_version,
        initiated: state.initiated,
        route_index: state.route_index,
        routes_count: state.routes_count,
        holds_counts: state.holds_counts.clone(),
        holds_count: state.holds_count(),
        timer_preset_sec: state.timer_preset_sec,
        timer_state: state.timer.state_name(),
        remaining_sec: clock::remaining_sec(clock, state.timer, allow_negative),
        hold_count: state.hold_units.as_f64(),
        used_half_hold: state.used_half_hold,
        competitors: state
            .competitors
            .iter()
            .map(|c| CompetitorView {
                name: c.name.clone(),
                club: c.club.clone(),
                marked: c.marked,
            })
            .collect(),
        current_climber: state.current_climber().map(str::to_string),
        registered_time: state.registered_time,
        scores_by_name: state.scores_by_name.clone(),
        times_by_name: state.times_by_name.clone(),
        time_criterion_enabled: state.time_criterion_enabled,
    }
}

pub fn build_public(
    state: &BoxState,
    clock: &dyn MonotonicClock,
    allow_negative: bool,
    categorie: &str,
) -> PublicSnapshot {
    let mut unmarked = state.competitors.iter().filter(|c| !c.marked);
    let current = unmarked.next().map(|c| c.name.clone());
    let preparing = unmarked.next().map(|c| c.name.clone());

    PublicSnapshot {
        box_id: state.box_id,
        categorie: categorie.to_string(),
        initiated: state.initiated,
        route_index: state.route_index,
        routes_count: state.routes_count,
        holds_counts: state.holds_counts.clone(),
        holds_count: state.holds_count(),
        current_climber: current,
        preparing_climber: preparing,
        timer_state: state.timer.state_name(),
        remaining_sec: clock::remaining_sec(clock, state.timer, allow_negative),
        time_criterion_enabled: state.time_criterion_enabled,
        scores_by_name: state.scores_by_name.clone(),
        times_by_name: state.times_by_name.clone(),
    }
}

/// Redact an already-built [`AuthoritativeSnapshot`] into its [`PublicSnapshot`]
/// counterpart, for callers (the dispatcher) that already hold one and would
/// otherwise have to re-lock the box just to rebuild it.
pub fn public_from_authoritative(snapshot: &AuthoritativeSnapshot, categorie: &str) -> PublicSnapshot {
    let mut unmarked = snapshot.competitors.iter().filter(|c| !c.marked);
    let current = unmarked.next().map(|c| c.name.clone());
    let preparing = unmarked.next().map(|c| c.name.clone());

    PublicSnapshot {
        box_id: snapshot.box_id,
        categorie: categorie.to_string(),
        initiated: snapshot.initiated,
        route_index: snapshot.route_index,
        routes_count: snapshot.routes_count,
        holds_counts: snapshot.holds_counts.clone(),
        holds_count: snapshot.holds_count,
        current_climber: current,
        preparing_climber: preparing,
        timer_state: snapshot.timer_state,
        remaining_sec: snapshot.remaining_sec,
        time_criterion_enabled: snapshot.time_criterion_enabled,
        scores_by_name: snapshot.scores_by_name.clone(),
        times_by_name: snapshot.times_by_name.clone(),
    }
}
