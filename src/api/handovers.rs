//! Handover queue endpoints

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;

use super::ApiState;
use crate::db::{HandoverReason, HandoverStats, HandoverStatus, HandoverTicket, NewHandover};
use crate::handover::priority_for;
use crate::Result;

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    #[serde(rename = "conversationId")]
    pub conversation_id: String,
    pub reason: HandoverReason,
    #[serde(rename = "customerName")]
    pub customer_name: Option<String>,
    #[serde(rename = "customerEmail")]
    pub customer_email: Option<String>,
    #[serde(rename = "customerPhone")]
    pub customer_phone: Option<String>,
    pub intent: Option<String>,
    #[serde(default)]
    pub last_messages: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<HandoverStatus>,
    pub priority: Option<i64>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub resolution_notes: Option<String>,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", post(create).get(list))
        .route("/{id}", get(get_one).delete(cancel))
        .route("/{id}/accept", put(accept))
        .route("/{id}/in-progress", put(in_progress))
        .route("/{id}/resolve", put(resolve))
        .route("/stats/summary", get(stats))
        .with_state(state)
}

async fn create(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(body): Json<CreateRequest>,
) -> Result<(StatusCode, Json<HandoverTicket>)> {
    state.authenticate(&headers)?;

    let priority = priority_for(body.reason, &std::collections::BTreeMap::new());
    let ticket = state.handovers.create(
        NewHandover {
            conversation_id: body.conversation_id,
            customer_name: body.customer_name,
            customer_email: body.customer_email,
            customer_phone: body.customer_phone,
            intent: body.intent,
            entities: serde_json::Value::Object(serde_json::Map::new()),
            last_messages: body.last_messages,
            tags: Vec::new(),
        },
        body.reason,
        priority,
    )?;

    Ok((StatusCode::CREATED, Json(ticket)))
}

async fn list(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<HandoverTicket>>> {
    state.authenticate(&headers)?;
    Ok(Json(state.handovers.list(
        query.status,
        query.priority,
        query.limit,
    )?))
}

async fn get_one(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<HandoverTicket>> {
    state.authenticate(&headers)?;
    state
        .handovers
        .get(&id)?
        .map(Json)
        .ok_or_else(|| crate::Error::NotFound("handover ticket".to_string()))
}

async fn accept(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<HandoverTicket>> {
    let operator = state.authenticate(&headers)?;
    Ok(Json(state.handovers.accept(&id, &operator.id)?))
}

async fn in_progress(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<HandoverTicket>> {
    state.authenticate(&headers)?;
    Ok(Json(state.handovers.mark_in_progress(&id)?))
}

async fn resolve(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<ResolveRequest>,
) -> Result<Json<HandoverTicket>> {
    state.authenticate(&headers)?;
    Ok(Json(
        state
            .handovers
            .resolve(&id, body.resolution_notes.as_deref())?,
    ))
}

async fn cancel(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.authenticate(&headers)?;
    state.handovers.cancel(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stats(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Json<HandoverStats>> {
    state.authenticate(&headers)?;
    Ok(Json(state.handovers.stats()?))
}
