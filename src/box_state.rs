//! 4.B Box State Machine — the single authoritative object per box.
//!
//! Every mutator takes `(sessionId, boxVersion)`, mirrors spec.md §4.B's
//! ordering policy (acquire lock -> check staleness -> validate precondition
//! -> mutate -> emit), and returns an [`Outcome`] rather than throwing —
//! grounded on the teacher's flat `WorkflowError` enum (`error.rs`) but
//! specialized into an explicit ok/ignored split because spec.md treats
//! "ignored" as a first-class, side-effect-free result, not an error.

use std::collections::HashMap;

use crate::clock::{self, MonotonicClock, TimerPhase};
use crate::protocol::{CommandKind, CompetitorInput, ProgressDelta};
use crate::session::Session;

#[derive(Debug, Clone, PartialEq)]
pub struct Competitor {
    pub name: String,
    pub club: Option<String>,
    pub marked: bool,
}

/// Hold count stored in tenths to avoid float drift from repeated `+0.1`
/// half-hold additions (spec.md §3: "integers for full holds, +0.1 for one
/// single half-hold per climber").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HoldTenths(pub u32);

impl HoldTenths {
    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 10.0
    }

    pub fn from_f64(v: f64) -> Self {
        Self((v * 10.0).round().max(0.0) as u32)
    }
}

/// The outcome of applying one command to a box. `Applied` carries the
/// events to broadcast; `Ignored` is the cheap, side-effect-free result
/// spec.md §9 insists on for the optimistic-UI retry contract.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Applied(Vec<crate::events::Event>),
    Ignored { reason: &'static str },
}

#[derive(Debug, Clone)]
pub struct BoxState {
    pub box_id: u32,
    pub session: Session,
    pub initiated: bool,
    pub route_index: u32,
    pub routes_count: u32,
    pub holds_counts: Vec<u32>,
    pub timer_preset_sec: u32,
    pub timer: TimerPhase,
    pub hold_units: HoldTenths,
    pub used_half_hold: bool,
    pub competitors: Vec<Competitor>,
    pub registered_time: Option<f64>,
    /// routeIndex-1 -> score, per competitor name.
    pub scores_by_name: HashMap<String, Vec<Option<f64>>>,
    pub times_by_name: HashMap<String, Vec<Option<f64>>>,
    pub time_criterion_enabled: bool,
}

impl BoxState {
    pub fn new(box_id: u32, routes_count: u32, default_time_criterion: bool) -> Self {
        Self {
            box_id,
            session: Session::fresh(0),
            initiated: false,
            route_index: 0,
            routes_count,
            holds_counts: vec![0; routes_count as usize],
            timer_preset_sec: 0,
            timer: TimerPhase::Idle { remaining_sec: 0 },
            hold_units: HoldTenths(0),
            used_half_hold: false,
            competitors: Vec::new(),
            registered_time: None,
            scores_by_name: HashMap::new(),
            times_by_name: HashMap::new(),
            time_criterion_enabled: default_time_criterion,
        }
    }

    pub fn holds_count(&self) -> u32 {
        if self.route_index == 0 || self.route_index as usize > self.holds_counts.len() {
            return 0;
        }
        self.holds_counts[self.route_index as usize - 1]
    }

    /// spec.md §3 invariant 3: always the first unmarked competitor.
    pub fn current_climber(&self) -> Option<&str> {
        self.competitors.iter().find(|c| !c.marked).map(|c| c.name.as_str())
    }

    fn preparing_climber(&self) -> Option<&str> {
        let mut unmarked = self.competitors.iter().filter(|c| !c.marked);
        unmarked.next();
        unmarked.next().map(|c| c.name.as_str())
    }

    fn ensure_name_rows(&mut self, name: &str) {
        let routes = self.routes_count as usize;
        self.scores_by_name.entry(name.to_string()).or_insert_with(|| vec![None; routes]);
        self.times_by_name.entry(name.to_string()).or_insert_with(|| vec![None; routes]);
    }

    /// Single entry point mirroring spec.md §4.B's numbered ordering policy.
    /// Staleness (step 2) is checked here for every command except the
    /// control frames that never carry a valid pair.
    pub fn apply(
        &mut self,
        clock: &dyn MonotonicClock,
        allow_negative: bool,
        kind: &CommandKind,
        session_id: &str,
        box_version: u64,
    ) -> Outcome {
        if kind.requires_session_check() && !self.session.matches(session_id, box_version) {
            return Outcome::Ignored { reason: "stale" };
        }

        match kind {
            CommandKind::InitRoute {
                route_index,
                holds_count,
                competitors,
                timer_preset_sec,
            } => self.init_route(*route_index, *holds_count, competitors, *timer_preset_sec),
            CommandKind::StartTimer => self.start_timer(clock),
            CommandKind::StopTimer => self.stop_timer(clock),
            CommandKind::ResumeTimer => self.resume_timer(clock),
            CommandKind::ProgressUpdate { delta, hold_count } => {
                self.progress_update(*delta, *hold_count)
            }
            CommandKind::SubmitScore {
                competitor,
                score,
                registered_time,
            } => self.submit_score(competitor, *score, *registered_time),
            CommandKind::RegisterTime { sec } => self.register_time(*sec),
            CommandKind::ActiveClimber { name } => self.active_climber(name),
            CommandKind::SetTimeCriterion { enabled } => self.set_time_criterion(*enabled),
            CommandKind::ResetBox => self.reset_box(),
            CommandKind::TimerSync { remaining_sec } => {
                self.timer_sync(clock, allow_negative, *remaining_sec)
            }
            CommandKind::RequestState | CommandKind::Ping | CommandKind::Pong => {
                Outcome::Ignored { reason: "not_a_mutation" }
            }
        }
    }

    fn init_route(
        &mut self,
        route_index: u32,
        holds_count: u32,
        competitors: &[CompetitorInput],
        timer_preset_sec: u32,
    ) -> Outcome {
        if route_index == 0 || route_index > self.routes_count {
            return Outcome::Ignored { reason: "route_index_out_of_range" };
        }
        if route_index > self.route_index && !self.competitors.iter().all(|c| c.marked) {
            return Outcome::Ignored { reason: "current_route_not_finished" };
        }
        self.session.rotate();
        self.initiated = true;
        self.route_index = route_index;
        if (route_index as usize) <= self.holds_counts.len() {
            self.holds_counts[route_index as usize - 1] = holds_count;
        }
        self.timer_preset_sec = timer_preset_sec;
        self.hold_units = HoldTenths(0);
        self.used_half_hold = false;
        self.timer = TimerPhase::Idle { remaining_sec: timer_preset_sec };
        self.registered_time = None;
        self.competitors = competitors
            .iter()
            .map(|c| Competitor {
                name: c.name.clone(),
                club: c.club.clone(),
                marked: false,
            })
            .collect();
        for c in &self.competitors {
            self.scores_by_name.entry(c.name.clone()).or_insert_with(|| vec![None; self.routes_count as usize]);
            self.times_by_name.entry(c.name.clone()).or_insert_with(|| vec![None; self.routes_count as usize]);
        }

        Outcome::Applied(vec![crate::events::Event::InitRoute {
            route_index,
            holds_count,
            timer_preset_sec,
        }])
    }

    /// `idle -> running`. Idempotent: a retried START while already running
    /// just reports the current remaining without touching the deadline.
    fn start_timer(&mut self, clock: &dyn MonotonicClock) -> Outcome {
        if !self.initiated || self.current_climber().is_none() {
            return Outcome::Ignored { reason: "not_ready" };
        }
        match self.timer {
            TimerPhase::Running { .. } => {}
            TimerPhase::Idle { .. } => {
                self.timer = clock::start_fresh(clock, self.timer_preset_sec);
            }
            TimerPhase::Paused { .. } => return Outcome::Ignored { reason: "invalid_transition" },
        }
        Outcome::Applied(vec![crate::events::Event::StartTimer {
            remaining_sec: clock::remaining_sec(clock, self.timer, true),
        }])
    }

    /// `running -> paused`. Idempotent: a retried STOP while already paused
    /// reports the same stored remaining rather than re-deriving it.
    fn stop_timer(&mut self, clock: &dyn MonotonicClock) -> Outcome {
        if !self.initiated || self.current_climber().is_none() {
            return Outcome::Ignored { reason: "not_ready" };
        }
        match self.timer {
            TimerPhase::Running { .. } => self.timer = clock::pause(clock, self.timer),
            TimerPhase::Paused { .. } => {}
            TimerPhase::Idle { .. } => return Outcome::Ignored { reason: "invalid_transition" },
        }
        Outcome::Applied(vec![crate::events::Event::StopTimer {
            remaining_sec: clock::remaining_sec(clock, self.timer, true),
        }])
    }

    /// `paused -> running`. Idempotent the same way START is.
    fn resume_timer(&mut self, clock: &dyn MonotonicClock) -> Outcome {
        if !self.initiated || self.current_climber().is_none() {
            return Outcome::Ignored { reason: "not_ready" };
        }
        match self.timer {
            TimerPhase::Paused { .. } => self.timer = clock::resume(clock, self.timer),
            TimerPhase::Running { .. } => {}
            TimerPhase::Idle { .. } => return Outcome::Ignored { reason: "invalid_transition" },
        }
        Outcome::Applied(vec![crate::events::Event::ResumeTimer {
            remaining_sec: clock::remaining_sec(clock, self.timer, true),
        }])
    }

    fn progress_update(&mut self, delta: Option<ProgressDelta>, hold_count: Option<f64>) -> Outcome {
        if !self.initiated || self.current_climber().is_none() {
            return Outcome::Ignored { reason: "not_ready" };
        }
        let max_units = HoldTenths(self.holds_count() * 10);

        // Absolute value takes priority over delta when both are present —
        // spec.md §4.B: "preferred over delta when provided, for reconciliation."
        if let Some(value) = hold_count {
            self.hold_units = clamp(HoldTenths::from_f64(value), max_units);
            return Outcome::Applied(vec![crate::events::Event::ProgressUpdate {
                hold_count: self.hold_units.as_f64(),
            }]);
        }

        match delta {
            Some(ProgressDelta::Full) => {
                self.hold_units = clamp(HoldTenths(self.hold_units.0 + 10), max_units);
                Outcome::Applied(vec![crate::events::Event::ProgressUpdate {
                    hold_count: self.hold_units.as_f64(),
                }])
            }
            Some(ProgressDelta::Half) => {
                if self.used_half_hold {
                    return Outcome::Ignored { reason: "half_hold_used" };
                }
                self.used_half_hold = true;
                self.hold_units = clamp(HoldTenths(self.hold_units.0 + 1), max_units);
                Outcome::Applied(vec![crate::events::Event::ProgressUpdate {
                    hold_count: self.hold_units.as_f64(),
                }])
            }
            None => Outcome::Ignored { reason: "missing_payload" },
        }
    }

    fn submit_score(&mut self, competitor: &str, score: f64, registered_time: Option<f64>) -> Outcome {
        if !self.initiated {
            return Outcome::Ignored { reason: "not_ready" };
        }
        let Some(idx) = self
            .competitors
            .iter()
            .position(|c| c.name == competitor && !c.marked)
        else {
            return Outcome::Ignored { reason: "unknown_or_marked_competitor" };
        };

        self.ensure_name_rows(competitor);
        let route_idx = (self.route_index as usize).saturating_sub(1);
        if let Some(row) = self.scores_by_name.get_mut(competitor) {
            if route_idx < row.len() {
                row[route_idx] = Some(score);
            }
        }
        if let Some(time) = registered_time.or(self.registered_time) {
            if let Some(row) = self.times_by_name.get_mut(competitor) {
                if route_idx < row.len() {
                    row[route_idx] = Some(time);
                }
            }
        }

        self.competitors[idx].marked = true;
        self.hold_units = HoldTenths(0);
        self.used_half_hold = false;
        self.timer = TimerPhase::Idle { remaining_sec: self.timer_preset_sec };
        self.registered_time = None;

        Outcome::Applied(vec![crate::events::Event::SubmitScore {
            competitor: competitor.to_string(),
            score,
        }])
    }

    fn register_time(&mut self, sec: f64) -> Outcome {
        if !self.timer_criterion_ready() {
            return Outcome::Ignored { reason: "not_ready" };
        }
        self.registered_time = Some(sec);
        Outcome::Applied(vec![crate::events::Event::RegisterTime { sec }])
    }

    fn timer_criterion_ready(&self) -> bool {
        self.timer.is_paused() && self.time_criterion_enabled
    }

    fn active_climber(&mut self, name: &str) -> Outcome {
        if self.current_climber() == Some(name) {
            return Outcome::Ignored { reason: "already_current" };
        }
        let Some(target_idx) = self.competitors.iter().position(|c| c.name == name && !c.marked) else {
            return Outcome::Ignored { reason: "not_unmarked" };
        };
        let Some(first_unmarked_idx) = self.competitors.iter().position(|c| !c.marked) else {
            return Outcome::Ignored { reason: "all_marked" };
        };
        self.competitors.swap(first_unmarked_idx, target_idx);
        Outcome::Applied(vec![crate::events::Event::ActiveClimber { name: name.to_string() }])
    }

    fn set_time_criterion(&mut self, enabled: bool) -> Outcome {
        self.time_criterion_enabled = enabled;
        Outcome::Applied(vec![crate::events::Event::SetTimeCriterion { enabled }])
    }

    fn reset_box(&mut self) -> Outcome {
        self.session.rotate();
        self.initiated = false;
        self.route_index = 0;
        self.hold_units = HoldTenths(0);
        self.used_half_hold = false;
        self.timer = TimerPhase::Idle { remaining_sec: 0 };
        self.registered_time = None;
        self.competitors.clear();
        Outcome::Applied(vec![crate::events::Event::ResetBox])
    }

    /// `TIMER_SYNC` is advisory only (spec.md §9 Open Questions: the
    /// authoritative server does not let a display client write the engine).
    /// Accepted only within +/-2s of the true remaining, purely for
    /// observability — it never mutates `self.timer`.
    fn timer_sync(&mut self, clock: &dyn MonotonicClock, allow_negative: bool, claimed: i64) -> Outcome {
        if !self.timer.is_running() {
            return Outcome::Ignored { reason: "not_running" };
        }
        let actual = clock::remaining_sec(clock, self.timer, allow_negative);
        if (actual - claimed).abs() > 2 {
            return Outcome::Ignored { reason: "out_of_tolerance" };
        }
        Outcome::Applied(vec![crate::events::Event::TimerSync { remaining_sec: actual }])
    }
}

fn clamp(value: HoldTenths, max: HoldTenths) -> HoldTenths {
    HoldTenths(value.0.min(max.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::protocol::CommandKind;

    fn init_cmd(holds: u32) -> CommandKind {
        CommandKind::InitRoute {
            route_index: 1,
            holds_count: holds,
            competitors: vec![
                CompetitorInput { name: "A".into(), club: None },
                CompetitorInput { name: "B".into(), club: None },
                CompetitorInput { name: "C".into(), club: None },
            ],
            timer_preset_sec: 300,
        }
    }

    #[test]
    fn init_route_sets_session_and_current_climber() {
        let clock = ManualClock::new();
        let mut b = BoxState::new(0, 2, false);
        let before_version = b.session.box_version;
        let outcome = b.apply(&clock, true, &init_cmd(25), "", 0);
        assert!(matches!(outcome, Outcome::Applied(_)));
        assert_eq!(b.session.box_version, before_version + 1);
        assert!(b.initiated);
        assert_eq!(b.current_climber(), Some("A"));
        assert_eq!(clock::remaining_sec(&clock, b.timer, true), 300);
    }

    #[test]
    fn hold_count_clamped_to_range() {
        let clock = ManualClock::new();
        let mut b = BoxState::new(0, 1, false);
        b.apply(&clock, true, &init_cmd(5), "", 0);
        let (sid, ver) = (b.session.session_id.clone(), b.session.box_version);
        for _ in 0..10 {
            b.apply(
                &clock,
                true,
                &CommandKind::ProgressUpdate { delta: Some(ProgressDelta::Full), hold_count: None },
                &sid,
                ver,
            );
        }
        assert_eq!(b.hold_units.as_f64(), 5.0);
    }

    #[test]
    fn half_hold_only_once() {
        let clock = ManualClock::new();
        let mut b = BoxState::new(0, 1, false);
        b.apply(&clock, true, &init_cmd(25), "", 0);
        let (sid, ver) = (b.session.session_id.clone(), b.session.box_version);
        let first = b.apply(
            &clock,
            true,
            &CommandKind::ProgressUpdate { delta: Some(ProgressDelta::Half), hold_count: None },
            &sid,
            ver,
        );
        assert!(matches!(first, Outcome::Applied(_)));
        assert_eq!(b.hold_units.as_f64(), 0.1);
        let second = b.apply(
            &clock,
            true,
            &CommandKind::ProgressUpdate { delta: Some(ProgressDelta::Half), hold_count: None },
            &sid,
            ver,
        );
        assert_eq!(second, Outcome::Ignored { reason: "half_hold_used" });
        assert_eq!(b.hold_units.as_f64(), 0.1);
    }

    #[test]
    fn stale_write_is_ignored_without_mutation() {
        let clock = ManualClock::new();
        let mut b = BoxState::new(0, 1, false);
        b.apply(&clock, true, &init_cmd(25), "", 0);
        let stale_sid = b.session.session_id.clone();
        let stale_ver = b.session.box_version;
        b.apply(&clock, true, &CommandKind::ResetBox, &stale_sid, stale_ver);

        let before = b.timer;
        let outcome = b.apply(&clock, true, &CommandKind::StartTimer, &stale_sid, stale_ver);
        assert_eq!(outcome, Outcome::Ignored { reason: "stale" });
        assert_eq!(b.timer, before);
    }

    #[test]
    fn submit_score_marks_and_advances_current_climber() {
        let clock = ManualClock::new();
        let mut b = BoxState::new(0, 1, false);
        b.apply(&clock, true, &init_cmd(25), "", 0);
        let (sid, ver) = (b.session.session_id.clone(), b.session.box_version);
        b.apply(
            &clock,
            true,
            &CommandKind::ProgressUpdate { delta: None, hold_count: Some(20.0) },
            &sid,
            ver,
        );
        let outcome = b.apply(
            &clock,
            true,
            &CommandKind::SubmitScore { competitor: "A".into(), score: 20.0, registered_time: None },
            &sid,
            ver,
        );
        assert!(matches!(outcome, Outcome::Applied(_)));
        assert_eq!(b.scores_by_name["A"][0], Some(20.0));
        assert_eq!(b.current_climber(), Some("B"));
        assert_eq!(b.hold_units.as_f64(), 0.0);
        assert!(!b.used_half_hold);
        assert!(matches!(b.timer, TimerPhase::Idle { .. }));
    }

    #[test]
    fn advancing_route_with_unmarked_competitors_is_ignored() {
        let clock = ManualClock::new();
        let mut b = BoxState::new(0, 2, false);
        b.apply(&clock, true, &init_cmd(25), "", 0);
        let (sid, ver) = (b.session.session_id.clone(), b.session.box_version);
        let advance = CommandKind::InitRoute {
            route_index: 2,
            holds_count: 25,
            competitors: vec![CompetitorInput { name: "A".into(), club: None }],
            timer_preset_sec: 300,
        };
        let outcome = b.apply(&clock, true, &advance, &sid, ver);
        assert_eq!(outcome, Outcome::Ignored { reason: "current_route_not_finished" });
        assert_eq!(b.route_index, 1);
    }

    #[test]
    fn advancing_route_after_all_marked_is_applied() {
        let clock = ManualClock::new();
        let mut b = BoxState::new(0, 2, false);
        b.apply(&clock, true, &init_cmd(25), "", 0);
        for name in ["A", "B", "C"] {
            let (sid, ver) = (b.session.session_id.clone(), b.session.box_version);
            b.apply(
                &clock,
                true,
                &CommandKind::SubmitScore { competitor: name.into(), score: 10.0, registered_time: None },
                &sid,
                ver,
            );
        }
        let (sid, ver) = (b.session.session_id.clone(), b.session.box_version);
        let advance = CommandKind::InitRoute {
            route_index: 2,
            holds_count: 25,
            competitors: vec![CompetitorInput { name: "A".into(), club: None }],
            timer_preset_sec: 300,
        };
        let outcome = b.apply(&clock, true, &advance, &sid, ver);
        assert!(matches!(outcome, Outcome::Applied(_)));
        assert_eq!(b.route_index, 2);
    }

    #[test]
    fn active_climber_reorders_into_first_unmarked_slot() {
        let clock = ManualClock::new();
        let mut b = BoxState::new(0, 1, false);
        b.apply(&clock, true, &init_cmd(25), "", 0);
        let (sid, ver) = (b.session.session_id.clone(), b.session.box_version);
        assert_eq!(b.current_climber(), Some("A"));
        let outcome = b.apply(&clock, true, &CommandKind::ActiveClimber { name: "C".into() }, &sid, ver);
        assert!(matches!(outcome, Outcome::Applied(_)));
        assert_eq!(b.current_climber(), Some("C"));

        let noop = b.apply(&clock, true, &CommandKind::ActiveClimber { name: "C".into() }, &sid, ver);
        assert_eq!(noop, Outcome::Ignored { reason: "already_current" });
    }

    #[test]
    fn reset_box_returns_to_uninitiated() {
        let clock = ManualClock::new();
        let mut b = BoxState::new(0, 1, false);
        b.apply(&clock, true, &init_cmd(25), "", 0);
        let (sid, ver) = (b.session.session_id.clone(), b.session.box_version);
        let outcome = b.apply(&clock, true, &CommandKind::ResetBox, &sid, ver);
        assert!(matches!(outcome, Outcome::Applied(_)));
        assert!(!b.initiated);
        assert_eq!(b.current_climber(), None);
        assert_eq!(b.route_index, 0);
    }

    #[test]
    fn competitor_advance_property() {
        // Property 7: after SUBMIT_SCORE, current_climber is the first
        // still-unmarked competitor, or empty once all are marked.
        let clock = ManualClock::new();
        let mut b = BoxState::new(0, 1, false);
        b.apply(&clock, true, &init_cmd(25), "", 0);
        for name in ["A", "B", "C"] {
            let (sid, ver) = (b.session.session_id.clone(), b.session.box_version);
            b.apply(
                &clock,
                true,
                &CommandKind::SubmitScore { competitor: name.into(), score: 10.0, registered_time: None },
                &sid,
                ver,
            );
        }
        assert_eq!(b.current_climber(), None);
    }
}
