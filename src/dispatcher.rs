//! 4.C Command Dispatcher — the single entry point both the HTTP and
//! WebSocket transports funnel into (spec.md §9).
//!
//! Ordering mirrors spec.md §4.B: authenticate/authorize -> rate limit ->
//! acquire the box lock -> `BoxState::apply` (stale check + mutation, no
//! I/O) -> release the lock -> build snapshots -> broadcast. Grounded on the
//! fixed middleware ordering in `knhk-workflow-engine/src/api/middleware.rs`'s
//! `Fortune5Middleware` (auth, then rate limiting, then the circuit breaker,
//! each a distinct stage before the request reaches the handler).

use std::sync::Arc;

use tracing::{info, warn};

use crate::auth::{OperatorClaims, Role};
use crate::box_state::Outcome;
use crate::clock::MonotonicClock;
use crate::error::{CoreError, CoreResult};
use crate::events::{AggregateEvent, Event};
use crate::hub::Frame;
use crate::protocol::{Command, CommandResponse};
use crate::rate_limit::CommandRateLimiter;
use crate::registry::{BoxEntry, BoxRegistry};
use crate::snapshot::{self, AuthoritativeSnapshot, PublicSnapshot};

/// Which of the three aggregate-channel update kinds a committed command's
/// events touch (spec.md §6: the aggregate channel pushes `BOX_STATUS_UPDATE`,
/// `BOX_FLOW_UPDATE`, and `BOX_RANKING_UPDATE` as distinct events, not one
/// catch-all). A single command can touch more than one — e.g. `SUBMIT_SCORE`
/// both records a ranking and advances the current climber.
#[derive(Default)]
struct AggregateKinds {
    status: bool,
    flow: bool,
    ranking: bool,
}

impl AggregateKinds {
    fn into_updates(self, public: PublicSnapshot) -> Vec<AggregateEvent> {
        let mut updates = Vec::with_capacity(3);
        if self.status {
            updates.push(AggregateEvent::BoxStatusUpdate(public.clone()));
        }
        if self.flow {
            updates.push(AggregateEvent::BoxFlowUpdate(public.clone()));
        }
        if self.ranking {
            updates.push(AggregateEvent::BoxRankingUpdate(public));
        }
        updates
    }
}

fn aggregate_kinds(events: &[Event]) -> AggregateKinds {
    let mut kinds = AggregateKinds::default();
    for event in events {
        match event {
            Event::SubmitScore { .. } => {
                kinds.ranking = true;
                kinds.flow = true;
            }
            Event::InitRoute { .. } | Event::ActiveClimber { .. } | Event::ResetBox => {
                kinds.flow = true;
            }
            Event::StartTimer { .. }
            | Event::StopTimer { .. }
            | Event::ResumeTimer { .. }
            | Event::ProgressUpdate { .. }
            | Event::RegisterTime { .. }
            | Event::SetTimeCriterion { .. }
            | Event::TimerSync { .. } => {
                kinds.status = true;
            }
            Event::StateSnapshot { .. } => {}
        }
    }
    kinds
}

pub struct Dispatcher {
    pub registry: Arc<BoxRegistry>,
    pub rate_limiter: Arc<CommandRateLimiter>,
    pub clock: Arc<dyn MonotonicClock>,
    pub allow_negative_timer: bool,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<BoxRegistry>,
        rate_limiter: Arc<CommandRateLimiter>,
        clock: Arc<dyn MonotonicClock>,
        allow_negative_timer: bool,
    ) -> Self {
        Self {
            registry,
            rate_limiter,
            clock,
            allow_negative_timer,
        }
    }

    /// Authorize `claims` against `command.box_id`, then dispatch. Used by
    /// the operator transports (`POST /api/cmd`, `/api/ws/{boxId}`), which
    /// always carry a bearer token.
    pub fn dispatch_authorized(
        &self,
        claims: &OperatorClaims,
        command: &Command,
    ) -> CoreResult<CommandResponse> {
        if self.registry.get(command.box_id).is_none() {
            return Err(CoreError::BoxNotFound(command.box_id));
        }
        if !claims.allows(command.box_id) {
            return Err(CoreError::Forbidden);
        }
        Ok(self.dispatch(command))
    }

    /// Dispatch without an authorization check, for transports that have
    /// already established the caller may act on this box (or for the
    /// read-only `REQUEST_STATE`/`PING`/`PONG` control frames spectators may
    /// also send on the public channel).
    pub fn dispatch(&self, command: &Command) -> CommandResponse {
        let Some(entry) = self.registry.get(command.box_id) else {
            return CommandResponse::Error { retry_after_ms: 0 };
        };

        if !self.rate_limiter.check(command.box_id, command.kind.rate_limit_bucket()) {
            return CommandResponse::Error { retry_after_ms: 1_000 };
        }

        let (outcome, snapshot) = {
            let mut state = entry.state.lock();
            let outcome = state.apply(
                self.clock.as_ref(),
                self.allow_negative_timer,
                &command.kind,
                &command.session_id,
                command.box_version,
            );
            let snapshot = snapshot::build_authoritative(&state, self.clock.as_ref(), self.allow_negative_timer);
            (outcome, snapshot)
        };

        match outcome {
            Outcome::Ignored { reason } => CommandResponse::Ignored { reason: reason.to_string() },
            Outcome::Applied(events) => {
                self.broadcast_committed(&entry, command.box_id, events, snapshot.clone());
                CommandResponse::Ok {
                    box_version: snapshot.box_version,
                    session_id: snapshot.session_id,
                }
            }
        }
    }

    /// Step 5 of spec.md §4.B: broadcast the emitted events, then a fresh
    /// `STATE_SNAPSHOT`, to every subscriber of this box. Runs after the lock
    /// is released — serialization and the channel sends are not protected
    /// by it.
    fn broadcast_committed(
        &self,
        entry: &Arc<BoxEntry>,
        box_id: u32,
        events: Vec<Event>,
        snapshot: AuthoritativeSnapshot,
    ) {
        let kinds = aggregate_kinds(&events);

        for event in events {
            self.publish_frame(&entry.hub, &event, "box hub");
        }
        let terminal = Event::StateSnapshot { snapshot: Box::new(snapshot.clone()), shutdown_reason: None };
        self.publish_frame(&entry.hub, &terminal, "box hub");

        let categorie = entry.categorie.lock().clone();
        let public = snapshot::public_from_authoritative(&snapshot, &categorie);
        for update in kinds.into_updates(public) {
            self.publish_frame(&entry.public_hub, &update, "public hub");
            self.publish_frame(&self.registry.aggregate_hub, &update, "aggregate hub");
        }

        info!(box_id, "command committed and broadcast");
    }

    fn publish_frame<T: serde::Serialize>(&self, hub: &crate::hub::BoxHub, event: &T, hub_name: &'static str) {
        let payload = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(err) => {
                warn!(%err, "failed to serialize event, dropping broadcast");
                return;
            }
        };
        let frame: Frame = Arc::from(payload);
        let dropped = hub.broadcast(frame);
        if !dropped.is_empty() {
            warn!(count = dropped.len(), hub = hub_name, "slow consumers dropped");
        }
    }

    /// Subscribe a freshly-connected client and push its initial snapshot
    /// (spec.md §4.E: "a new subscriber must receive a snapshot within 2s").
    pub fn subscribe_with_snapshot(&self, entry: &Arc<BoxEntry>, role: Role) -> (u64, tokio::sync::mpsc::Receiver<Frame>) {
        let (id, rx) = entry.hub.subscribe(role);
        let snapshot = {
            let state = entry.state.lock();
            snapshot::build_authoritative(&state, self.clock.as_ref(), self.allow_negative_timer)
        };
        let frame = Event::StateSnapshot { snapshot: Box::new(snapshot), shutdown_reason: None };
        if let Ok(json) = serde_json::to_string(&frame) {
            entry.hub.send_to(id, Arc::from(json));
        }
        (id, rx)
    }

    /// `GET /api/state/{boxId}` and `REQUEST_STATE` on the operator
    /// WebSocket: a pull snapshot for one caller, never broadcast.
    pub fn current_snapshot(&self, box_id: u32) -> Option<AuthoritativeSnapshot> {
        let entry = self.registry.get(box_id)?;
        let state = entry.state.lock();
        Some(snapshot::build_authoritative(&state, self.clock.as_ref(), self.allow_negative_timer))
    }

    /// spec.md §5 graceful shutdown: take each box's lock in turn, emit a
    /// terminal `STATE_SNAPSHOT` carrying a shutdown reason, then remove the
    /// box so its subscribers' channels close — `run_connection` checks
    /// `registry.is_shutting_down()` to send a normal close code here rather
    /// than the `4409 box_removed` an admin-initiated single delete uses.
    pub fn quiesce_all(&self, reason: &'static str) {
        self.registry.begin_shutdown();
        for box_id in self.registry.box_ids() {
            let Some(entry) = self.registry.get(box_id) else { continue };
            let snapshot = {
                let state = entry.state.lock();
                snapshot::build_authoritative(&state, self.clock.as_ref(), self.allow_negative_timer)
            };
            let terminal = Event::StateSnapshot { snapshot: Box::new(snapshot), shutdown_reason: Some(reason) };
            self.publish_frame(&entry.hub, &terminal, "box hub");
            self.registry.remove(box_id);
        }
    }

    /// `GET /api/public/boxes` and `REQUEST_STATE` on the public channel.
    pub fn current_public_snapshot(&self, box_id: u32) -> Option<PublicSnapshot> {
        let entry = self.registry.get(box_id)?;
        let state = entry.state.lock();
        let categorie = entry.categorie.lock().clone();
        Some(snapshot::build_public(&state, self.clock.as_ref(), self.allow_negative_timer, &categorie))
    }

    /// All *initiated* boxes' public snapshots (spec.md §4.H's
    /// `PUBLIC_STATE_SNAPSHOT` push, and the `GET /api/public/boxes` and
    /// `GET /api/public/rankings` aggregates) — an uninitiated box has no
    /// climber, timer, or score data a spectator display would show.
    pub fn all_public_snapshots(&self) -> Vec<PublicSnapshot> {
        self.registry
            .all()
            .into_iter()
            .filter_map(|(box_id, _)| self.current_public_snapshot(box_id))
            .filter(|snapshot| snapshot.initiated)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::protocol::{CommandKind, CompetitorInput};

    fn dispatcher() -> (Dispatcher, Arc<BoxRegistry>) {
        let registry = Arc::new(BoxRegistry::new(8));
        registry.create_box(1, 1, false, "Women Final");
        let dispatcher = Dispatcher::new(
            registry.clone(),
            Arc::new(CommandRateLimiter::new(120, 60)),
            Arc::new(ManualClock::new()),
            true,
        );
        (dispatcher, registry)
    }

    fn init_command(box_id: u32) -> Command {
        Command {
            box_id,
            session_id: String::new(),
            box_version: 0,
            kind: CommandKind::InitRoute {
                route_index: 1,
                holds_count: 20,
                competitors: vec![CompetitorInput { name: "A".into(), club: None }],
                timer_preset_sec: 300,
            },
        }
    }

    #[test]
    fn unknown_box_returns_error_response() {
        let (dispatcher, _registry) = dispatcher();
        let cmd = init_command(999);
        assert!(matches!(dispatcher.dispatch(&cmd), CommandResponse::Error { .. }));
    }

    #[test]
    fn first_init_commits_and_returns_ok_with_fresh_pair() {
        let (dispatcher, _registry) = dispatcher();
        let response = dispatcher.dispatch(&init_command(1));
        match response {
            CommandResponse::Ok { box_version, session_id } => {
                assert_eq!(box_version, 1);
                assert!(!session_id.is_empty());
            }
            other => panic!("expected Ok, got {other:?}"),
        }
    }

    #[test]
    fn stale_session_is_ignored_not_errored() {
        let (dispatcher, _registry) = dispatcher();
        dispatcher.dispatch(&init_command(1));
        let stale = Command {
            box_id: 1,
            session_id: "wrong".into(),
            box_version: 1,
            kind: CommandKind::StartTimer,
        };
        assert!(matches!(dispatcher.dispatch(&stale), CommandResponse::Ignored { .. }));
    }

    #[test]
    fn subscriber_receives_snapshot_immediately_on_connect() {
        let (dispatcher, registry) = dispatcher();
        dispatcher.dispatch(&init_command(1));
        let entry = registry.get(1).unwrap();
        let (_id, mut rx) = dispatcher.subscribe_with_snapshot(&entry, Role::Judge);
        let frame = rx.try_recv().expect("snapshot should be queued immediately");
        assert!(frame.contains("STATE_SNAPSHOT"));
    }

    #[test]
    fn rate_limit_exhaustion_returns_error_response() {
        let registry = Arc::new(BoxRegistry::new(8));
        registry.create_box(1, 1, false, "Women Final");
        let dispatcher = Dispatcher::new(
            registry,
            Arc::new(CommandRateLimiter::new(1, 1)),
            Arc::new(ManualClock::new()),
            true,
        );
        assert!(matches!(dispatcher.dispatch(&init_command(1)), CommandResponse::Ok { .. }));
        let second = Command { box_id: 1, session_id: "x".into(), box_version: 9, kind: CommandKind::StartTimer };
        assert!(matches!(dispatcher.dispatch(&second), CommandResponse::Error { .. }));
    }

    #[test]
    fn quiesce_all_sends_terminal_snapshot_with_shutdown_reason_then_removes_box() {
        let (dispatcher, registry) = dispatcher();
        dispatcher.dispatch(&init_command(1));
        let entry = registry.get(1).unwrap();
        let (_id, mut rx) = dispatcher.subscribe_with_snapshot(&entry, Role::Judge);
        rx.try_recv().expect("initial snapshot on subscribe");

        dispatcher.quiesce_all("server_shutdown");

        let frame = rx.try_recv().expect("terminal snapshot should be queued");
        assert!(frame.contains("\"shutdownReason\":\"server_shutdown\""));
        assert!(registry.get(1).is_none());
        assert!(registry.is_shutting_down());
    }

    #[test]
    fn submit_score_reaches_public_hub_as_ranking_and_flow_updates() {
        let (dispatcher, registry) = dispatcher();
        let init_response = dispatcher.dispatch(&init_command(1));
        let (session_id, box_version) = match init_response {
            CommandResponse::Ok { session_id, box_version } => (session_id, box_version),
            other => panic!("expected Ok, got {other:?}"),
        };
        let entry = registry.get(1).unwrap();
        let (_id, mut rx) = entry.public_hub.subscribe(Role::Judge);

        let score = Command {
            box_id: 1,
            session_id,
            box_version,
            kind: CommandKind::SubmitScore { competitor: "A".into(), score: 42.0 },
        };
        assert!(matches!(dispatcher.dispatch(&score), CommandResponse::Ok { .. }));

        let first = rx.try_recv().expect("first public update");
        let second = rx.try_recv().expect("second public update");
        let kinds: Vec<&str> = [&first, &second]
            .iter()
            .map(|frame| if frame.contains("BOX_RANKING_UPDATE") {
                "ranking"
            } else if frame.contains("BOX_FLOW_UPDATE") {
                "flow"
            } else {
                "other"
            })
            .collect();
        assert!(kinds.contains(&"ranking"));
        assert!(kinds.contains(&"flow"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn start_timer_reaches_public_hub_as_status_update_only() {
        let (dispatcher, registry) = dispatcher();
        let init_response = dispatcher.dispatch(&init_command(1));
        let (session_id, box_version) = match init_response {
            CommandResponse::Ok { session_id, box_version } => (session_id, box_version),
            other => panic!("expected Ok, got {other:?}"),
        };
        let entry = registry.get(1).unwrap();
        let (_id, mut rx) = entry.public_hub.subscribe(Role::Judge);

        let start = Command { box_id: 1, session_id, box_version, kind: CommandKind::StartTimer };
        assert!(matches!(dispatcher.dispatch(&start), CommandResponse::Ok { .. }));

        let frame = rx.try_recv().expect("status update");
        assert!(frame.contains("BOX_STATUS_UPDATE"));
        assert!(rx.try_recv().is_err());
    }
}
