//! HTTP surface: spec.md §6's endpoint table.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::OperatorClaims;
use crate::collaborators::RankedCompetitor;
use crate::error::CoreError;
use crate::protocol::{Command, CommandResponse};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/cmd", post(post_cmd))
        .route("/api/state/:box_id", get(get_state))
        .route("/api/admin/upload", post(post_upload))
        .route("/api/admin/save_ranking", post(post_save_ranking))
        .route("/api/admin/box/:box_id", delete(delete_box))
        .route("/api/public/token", post(post_public_token))
        .route("/api/public/boxes", get(get_public_boxes))
        .route("/api/public/rankings", get(get_public_rankings))
}

/// Thin wrapper so `CoreError` can be returned directly from handlers.
struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoreError::Unauthenticated => StatusCode::UNAUTHORIZED,
            CoreError::Forbidden => StatusCode::FORBIDDEN,
            CoreError::BoxNotFound(_) => StatusCode::NOT_FOUND,
            CoreError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            CoreError::Stale | CoreError::Precondition(_) => StatusCode::CONFLICT,
            CoreError::SlowConsumer => StatusCode::REQUEST_TIMEOUT,
            CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Pull a bearer token out of `Authorization` the way the teacher's own
/// `auth_middleware` does it: a raw header lookup and a `starts_with`
/// check, not a typed extractor.
fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let raw = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or(ApiError(CoreError::Unauthenticated))?;
    raw.strip_prefix("Bearer ").ok_or(ApiError(CoreError::Unauthenticated))
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<OperatorClaims, ApiError> {
    let token = bearer_token(headers)?;
    state.auth.validate_operator(token).map_err(ApiError::from)
}

async fn post_cmd(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(command): Json<Command>,
) -> Result<Json<CommandResponse>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    let response = state.dispatcher.dispatch_authorized(&claims, &command)?;
    Ok(Json(response))
}

async fn get_state(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(box_id): Path<u32>,
) -> Result<Response, ApiError> {
    let claims = authenticate(&state, &headers)?;
    if !claims.allows(box_id) {
        return Err(ApiError(CoreError::Forbidden));
    }
    match state.dispatcher.current_snapshot(box_id) {
        Some(snapshot) => Ok(Json(snapshot).into_response()),
        None => Err(ApiError(CoreError::BoxNotFound(box_id))),
    }
}

async fn post_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    if claims.role != crate::auth::Role::Admin {
        return Err(ApiError(CoreError::Forbidden));
    }

    let mut box_ids = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(|err| CoreError::Internal(err.to_string()))? {
        let bytes = field.bytes().await.map_err(|err| CoreError::Internal(err.to_string()))?;
        let rosters = state.roster_source.parse_upload(&bytes).await?;
        for roster in rosters {
            state.registry.create_box(
                roster.box_id,
                roster.routes_count,
                true,
                roster.categorie,
            );
            box_ids.push(roster.box_id);
        }
    }
    Ok(Json(UploadResponse { box_ids }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    box_ids: Vec<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveRankingRequest {
    categorie: String,
    ranked: Vec<RankedCompetitorWire>,
}

#[derive(Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
struct RankedCompetitorWire {
    name: String,
    rank: u32,
    score: f64,
}

async fn post_save_ranking(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SaveRankingRequest>,
) -> Result<StatusCode, ApiError> {
    let claims = authenticate(&state, &headers)?;
    if claims.role != crate::auth::Role::Admin {
        return Err(ApiError(CoreError::Forbidden));
    }

    let ranked: Vec<RankedCompetitor> = request
        .ranked
        .iter()
        .map(|r| RankedCompetitor { name: r.name.clone(), rank: r.rank, score: r.score })
        .collect();
    state.ranking_exporter.save_ranking(&request.categorie, ranked.clone()).await?;
    state.rankings_cache.insert(request.categorie, ranked);
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_box(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(box_id): Path<u32>,
) -> Result<StatusCode, ApiError> {
    let claims = authenticate(&state, &headers)?;
    if claims.role != crate::auth::Role::Admin {
        return Err(ApiError(CoreError::Forbidden));
    }
    match state.registry.remove(box_id) {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(ApiError(CoreError::BoxNotFound(box_id))),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PublicTokenResponse {
    token: String,
    ttl_sec: u64,
}

async fn post_public_token(State(state): State<AppState>) -> Json<PublicTokenResponse> {
    let (token, ttl_sec) = state.auth.issue_spectator_token();
    Json(PublicTokenResponse { token, ttl_sec })
}

#[derive(Deserialize)]
struct TokenQuery {
    token: String,
}

/// The lighter shape `GET /api/public/boxes` documents: enough to list the
/// live boxes on a scoreboard without the full redacted-but-still-heavy
/// `PublicSnapshot` (route/holds/score detail).
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BoxSummary {
    box_id: u32,
    label: String,
    initiated: bool,
    timer_state: &'static str,
    current_climber: Option<String>,
    categorie: String,
}

async fn get_public_boxes(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<Response, ApiError> {
    if !state.auth.validate_spectator(&query.token) {
        return Err(ApiError(CoreError::Unauthenticated));
    }
    let summaries: Vec<BoxSummary> = state
        .dispatcher
        .all_public_snapshots()
        .into_iter()
        .map(|snapshot| BoxSummary {
            box_id: snapshot.box_id,
            label: format!("Box {}", snapshot.box_id),
            initiated: snapshot.initiated,
            timer_state: snapshot.timer_state,
            current_climber: snapshot.current_climber,
            categorie: snapshot.categorie,
        })
        .collect();
    Ok(Json(summaries).into_response())
}

/// `{type: "PUBLIC_STATE_SNAPSHOT", boxes: [...]}` — the same aggregate
/// concept as the `/api/public/ws` channel's initial push (spec.md §4.H),
/// reachable over plain HTTP for the rankings page.
async fn get_public_rankings(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<Response, ApiError> {
    if !state.auth.validate_spectator(&query.token) {
        return Err(ApiError(CoreError::Unauthenticated));
    }
    let boxes = state.dispatcher.all_public_snapshots();
    Ok(Json(crate::events::AggregateEvent::PublicStateSnapshot { boxes }).into_response())
}
