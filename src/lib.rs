//! Realtime coordination backbone for live climbing-competition boxes.
//!
//! See `SPEC_FULL.md` for the full behavioral contract. Module layout
//! mirrors the spec's components: [`clock`]/[`session`] (4.A/4.D),
//! [`box_state`] (4.B), [`dispatcher`]/[`rate_limit`] (4.C), [`hub`] (4.E),
//! [`snapshot`] (4.F), [`auth`] (4.G), [`api::ws_public`] (4.H).

pub mod api;
pub mod auth;
pub mod box_state;
pub mod clock;
pub mod collaborators;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod hub;
pub mod protocol;
pub mod rate_limit;
pub mod registry;
pub mod session;
pub mod snapshot;

use std::sync::Arc;
use std::time::Duration;

use climb_config::ClimbConfig;

use crate::auth::AuthGate;
use crate::clock::{MonotonicClock, SystemClock};
use crate::collaborators::{NullCollaborators, RankingExporter, RosterSource};
use crate::dispatcher::Dispatcher;
use crate::rate_limit::CommandRateLimiter;
use crate::registry::BoxRegistry;

/// Heartbeat timing handed to each connection task (spec.md §4.E).
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

/// Everything the axum handlers need, wired up once at startup and cloned
/// (cheaply — everything inside is an `Arc`) into every request.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub registry: Arc<BoxRegistry>,
    pub auth: Arc<AuthGate>,
    pub roster_source: Arc<dyn RosterSource>,
    pub ranking_exporter: Arc<dyn RankingExporter>,
    pub rankings_cache: Arc<dashmap::DashMap<String, Vec<crate::collaborators::RankedCompetitor>>>,
    pub heartbeat: HeartbeatConfig,
}

impl AppState {
    pub fn from_config(config: &ClimbConfig) -> Self {
        let registry = Arc::new(BoxRegistry::new(config.hub.subscriber_queue_depth));
        let rate_limiter = Arc::new(CommandRateLimiter::new(
            config.rate_limit.progress_per_min,
            config.rate_limit.other_per_min,
        ));
        let clock: Arc<dyn MonotonicClock> = Arc::new(SystemClock);
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            rate_limiter,
            clock,
            config.timer.allow_negative,
        ));
        let auth = Arc::new(AuthGate::new(Duration::from_secs(config.spectator_token.ttl_sec)));

        Self {
            dispatcher,
            registry,
            auth,
            roster_source: Arc::new(NullCollaborators),
            ranking_exporter: Arc::new(NullCollaborators),
            rankings_cache: Arc::new(dashmap::DashMap::new()),
            heartbeat: HeartbeatConfig {
                ping_interval: Duration::from_secs(config.heartbeat.ping_interval_sec),
                pong_timeout: Duration::from_secs(config.heartbeat.pong_timeout_sec),
            },
        }
    }
}
