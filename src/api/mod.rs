//! Axum transport layer: HTTP (spec.md §6 endpoint table), operator
//! WebSocket (§4.E), and the public/spectator surface (§4.F, §4.H).
//!
//! Grounded on the teacher's `axum::Router` assembly
//! (`knhk-workflow-engine/src/api/rest/server.rs`) for middleware layering
//! (`TraceLayer`, `CorsLayer`) though every route here is real, unlike that
//! file's stubbed-out `Router::new()`.

pub mod http;
pub mod ws;
pub mod ws_public;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(http::routes())
        .merge(ws::routes())
        .merge(ws_public::routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
