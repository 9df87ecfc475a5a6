//! Route handlers.

use {
    axum::{
        Router,
        extract::{Path, Query, State},
        http::StatusCode,
        response::Json,
        routing::{get, post},
    },
    serde::Deserialize,
};

use stint_protocol::{
    api::{
        ActorBody, BindAccountBody, CreateRequestBody, RequestFilters, RequestPage,
        SetApproversBody,
    },
    binding::ChannelBinding,
    request::AccessRequest,
};

use crate::{AppState, error::ApiError};

/// All signed routes.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/requests", post(create_request).get(list_requests))
        .route("/requests/{id}", get(get_request))
        .route("/requests/{id}/approve", post(approve_request))
        .route("/requests/{id}/deny", post(deny_request))
        .route("/requests/{id}/revoke", post(revoke_request))
        .route("/config/bind", post(bind_account))
        .route("/config/approvers", post(set_approvers))
        .route("/config/accounts", get(list_accounts))
}

/// Unsigned liveness probe.
pub async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// ── Requests ─────────────────────────────────────────────────────────────────

async fn create_request(
    State(state): State<AppState>,
    Json(body): Json<CreateRequestBody>,
) -> Result<(StatusCode, Json<AccessRequest>), ApiError> {
    let request = state.service.create_request(body).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AccessRequest>, ApiError> {
    Ok(Json(state.service.get_request(&id).await?))
}

async fn list_requests(
    State(state): State<AppState>,
    Query(filters): Query<RequestFilters>,
) -> Result<Json<RequestPage>, ApiError> {
    Ok(Json(state.service.list_requests(filters).await?))
}

async fn approve_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(actor): Json<ActorBody>,
) -> Result<Json<AccessRequest>, ApiError> {
    Ok(Json(state.service.approve(&id, actor).await?))
}

async fn deny_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(actor): Json<ActorBody>,
) -> Result<Json<AccessRequest>, ApiError> {
    Ok(Json(state.service.deny(&id, actor).await?))
}

async fn revoke_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(actor): Json<ActorBody>,
) -> Result<Json<AccessRequest>, ApiError> {
    Ok(Json(state.service.revoke(&id, actor).await?))
}

// ── Channel configuration ────────────────────────────────────────────────────

async fn bind_account(
    State(state): State<AppState>,
    Json(body): Json<BindAccountBody>,
) -> Result<Json<ChannelBinding>, ApiError> {
    Ok(Json(state.service.bind_account(body).await?))
}

async fn set_approvers(
    State(state): State<AppState>,
    Json(body): Json<SetApproversBody>,
) -> Result<Json<Vec<ChannelBinding>>, ApiError> {
    Ok(Json(state.service.set_approvers(body).await?))
}

#[derive(Debug, Deserialize)]
struct AccountsQuery {
    #[serde(rename = "channelId", alias = "channel_id", default)]
    channel_id: String,
}

async fn list_accounts(
    State(state): State<AppState>,
    Query(query): Query<AccountsQuery>,
) -> Result<Json<Vec<ChannelBinding>>, ApiError> {
    Ok(Json(state.service.list_accounts(&query.channel_id).await?))
}
