//! End-to-end tests across registry + dispatcher + hub, the seams that
//! in-module unit tests don't exercise (spec.md §8's cross-module
//! properties).

use std::sync::Arc;

use climb_hub::clock::ManualClock;
use climb_hub::dispatcher::Dispatcher;
use climb_hub::protocol::{Command, CommandKind, CommandResponse, CompetitorInput};
use climb_hub::rate_limit::CommandRateLimiter;
use climb_hub::registry::BoxRegistry;

fn setup() -> (Dispatcher, Arc<BoxRegistry>) {
    let registry = Arc::new(BoxRegistry::new(16));
    registry.create_box(1, 2, true, "Women Final");
    let dispatcher = Dispatcher::new(
        registry.clone(),
        Arc::new(CommandRateLimiter::new(120, 60)),
        Arc::new(ManualClock::new()),
        true,
    );
    (dispatcher, registry)
}

fn init_route(box_id: u32, competitors: &[&str]) -> Command {
    Command {
        box_id,
        session_id: String::new(),
        box_version: 0,
        kind: CommandKind::InitRoute {
            route_index: 1,
            holds_count: 30,
            competitors: competitors
                .iter()
                .map(|name| CompetitorInput { name: name.to_string(), club: None })
                .collect(),
            timer_preset_sec: 300,
        },
    }
}

#[tokio::test]
async fn fresh_subscriber_gets_snapshot_matching_committed_state() {
    let (dispatcher, registry) = setup();
    dispatcher.dispatch(&init_route(1, &["Alex", "Bo"]));

    let entry = registry.get(1).unwrap();
    let (_id, mut rx) = dispatcher.subscribe_with_snapshot(&entry, climb_hub::auth::Role::Judge);
    let frame = rx.recv().await.expect("snapshot queued on subscribe");

    let expected = dispatcher.current_snapshot(1).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(parsed["type"], "STATE_SNAPSHOT");
    assert_eq!(parsed["boxVersion"], expected.box_version);
}

#[tokio::test]
async fn stale_command_never_mutates_and_never_broadcasts() {
    let (dispatcher, registry) = setup();
    dispatcher.dispatch(&init_route(1, &["Alex"]));
    let before = dispatcher.current_snapshot(1).unwrap();

    let entry = registry.get(1).unwrap();
    let (_id, mut rx) = entry.hub.subscribe(climb_hub::auth::Role::Judge);

    let stale = Command { box_id: 1, session_id: "not-the-real-one".into(), box_version: 1, kind: CommandKind::StartTimer };
    let response = dispatcher.dispatch(&stale);
    assert!(matches!(response, CommandResponse::Ignored { .. }));

    let after = dispatcher.current_snapshot(1).unwrap();
    assert_eq!(before, after);
    assert!(rx.try_recv().is_err(), "no broadcast should follow an ignored command");
}

#[tokio::test]
async fn repeated_start_timer_is_idempotent_at_same_session() {
    let (dispatcher, _registry) = setup();
    dispatcher.dispatch(&init_route(1, &["Alex"]));
    let after_init = dispatcher.current_snapshot(1).unwrap();

    let start = Command {
        box_id: 1,
        session_id: after_init.session_id.clone(),
        box_version: after_init.box_version,
        kind: CommandKind::StartTimer,
    };
    let first = dispatcher.dispatch(&start);
    let second = dispatcher.dispatch(&start);
    assert!(matches!(first, CommandResponse::Ok { .. }));
    assert!(matches!(second, CommandResponse::Ok { .. }));

    let snapshot = dispatcher.current_snapshot(1).unwrap();
    assert_eq!(snapshot.timer_state, "running");
}

#[tokio::test]
async fn box_removal_closes_hub_subscribers() {
    let (dispatcher, registry) = setup();
    dispatcher.dispatch(&init_route(1, &["Alex"]));
    let entry = registry.get(1).unwrap();
    let (_id, mut rx) = entry.hub.subscribe(climb_hub::auth::Role::Judge);

    registry.remove(1);
    drop(entry);

    assert!(rx.recv().await.is_none(), "subscriber channel should close once the box is removed");
}

#[tokio::test]
async fn competitor_advance_marks_then_moves_to_next() {
    let (dispatcher, _registry) = setup();
    dispatcher.dispatch(&init_route(1, &["Alex", "Bo", "Cleo"]));
    let pair = dispatcher.current_snapshot(1).unwrap();

    let submit = Command {
        box_id: 1,
        session_id: pair.session_id.clone(),
        box_version: pair.box_version,
        kind: CommandKind::SubmitScore { competitor: "Alex".into(), score: 25.0, registered_time: None },
    };
    assert!(matches!(dispatcher.dispatch(&submit), CommandResponse::Ok { .. }));

    let snapshot = dispatcher.current_snapshot(1).unwrap();
    assert_eq!(snapshot.current_climber.as_deref(), Some("Bo"));
}
