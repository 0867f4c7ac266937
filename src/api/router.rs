//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::HeaderMap,
    middleware,
    routing::get,
};
use serde_json::{Value, json};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::debug;

use super::metrics;
use crate::auth::{Authorizer, roles};
use crate::model::{Bot, BotCode, BotSummary, BotWithPlayer, NewBot, NewPlayer, Player};
use crate::store::PlayerStore;
use crate::{Error, Result};

/// Shared application state
pub struct AppState {
    /// Player and bot storage
    pub store: Arc<dyn PlayerStore>,
    /// Token checks for every `/api` route
    pub authorizer: Arc<Authorizer>,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let router = Router::new()
        .route("/info", get(info_handler))
        .route("/api/players", get(list_players).post(add_player))
        .route("/api/players/my/info", get(my_info))
        .route("/api/players/{id}", get(get_player).delete(delete_player))
        .route("/api/players/{id}/bot", get(list_bots).post(add_bot))
        .route("/api/players/{id}/bot/{bot}", get(get_bot).delete(delete_bot))
        .route("/api/players/{id}/bot/{bot}/code", get(get_bot_code));

    #[cfg(feature = "metrics")]
    let router = router.merge(
        Router::new()
            .route("/metrics", get(metrics::render))
            .with_state::<Arc<AppState>>(metrics::prometheus_handle()),
    );

    router
        .route_layer(middleware::from_fn(metrics::track_requests))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Refuse the request unless the caller holds `role`.
async fn require_role(state: &AppState, headers: &HeaderMap, role: &str) -> Result<()> {
    if state.authorizer.authorize(headers, role).await {
        Ok(())
    } else {
        debug!(role, "Request refused");
        Err(Error::Unauthorized)
    }
}

/// Liveness probe (GET /info)
async fn info_handler() -> Json<Value> {
    Json(json!({"status": "UP"}))
}

async fn list_players(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Player>>> {
    require_role(&state, &headers, roles::PLAYER_VIEW).await?;
    Ok(Json(state.store.players().await?))
}

async fn add_player(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<NewPlayer>,
) -> Result<Json<Player>> {
    require_role(&state, &headers, roles::PLAYER_EDIT).await?;
    Ok(Json(state.store.add_player(&body.name).await?))
}

/// The caller's own player record, registered on first visit
async fn my_info(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Player>> {
    let username = state.authorizer.username(&headers).await;
    if username.is_empty() {
        return Err(Error::Unauthorized);
    }
    Ok(Json(state.store.player_by_name_or_create(&username).await?))
}

async fn get_player(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Player>> {
    require_role(&state, &headers, roles::PLAYER_VIEW).await?;
    Ok(Json(state.store.player(id).await?))
}

async fn delete_player(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Player>> {
    require_role(&state, &headers, roles::PLAYER_ADMIN).await?;
    Ok(Json(state.store.delete_player(id).await?))
}

async fn list_bots(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Bot>>> {
    require_role(&state, &headers, roles::PLAYER_VIEW).await?;
    Ok(Json(state.store.player_bots(id).await?))
}

async fn add_bot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<NewBot>,
) -> Result<Json<BotSummary>> {
    require_role(&state, &headers, roles::PLAYER_EDIT).await?;
    Ok(Json(state.store.add_bot(id, body).await?))
}

async fn get_bot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((id, bot)): Path<(i64, i64)>,
) -> Result<Json<BotWithPlayer>> {
    require_role(&state, &headers, roles::PLAYER_VIEW).await?;
    Ok(Json(state.store.bot(id, bot).await?))
}

async fn get_bot_code(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((id, bot)): Path<(i64, i64)>,
) -> Result<Json<BotCode>> {
    require_role(&state, &headers, roles::PLAYER_VIEW).await?;
    Ok(Json(state.store.bot_code(id, bot).await?))
}

async fn delete_bot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((id, bot)): Path<(i64, i64)>,
) -> Result<Json<BotSummary>> {
    require_role(&state, &headers, roles::PLAYER_EDIT).await?;
    Ok(Json(state.store.delete_player_bot(id, bot).await?))
}
