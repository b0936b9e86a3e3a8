//! Contact list and per-conversation history

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::db::conversation_key;
use crate::realtime::MessagePayload;
use crate::Result;

#[derive(Debug, Serialize)]
pub struct ContactEntry {
    pub id: String,
    pub name: String,
    pub unread: i64,
    #[serde(rename = "lastMessage")]
    pub last_message: MessagePayload,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub before: Option<String>,
}

fn default_limit() -> usize {
    50
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(list_contacts))
        .route("/{id}/messages", get(history))
        .route("/{id}/read", put(mark_read))
        .with_state(state)
}

async fn list_contacts(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ContactEntry>>> {
    let user = state.authenticate(&headers)?;

    let summaries = state.messages.recent_per_peer(&user.id)?;
    let contacts = summaries
        .into_iter()
        .map(|summary| ContactEntry {
            last_message: MessagePayload::from_stored(&summary.last_message, &summary.peer_name),
            id: summary.peer_id,
            name: summary.peer_name,
            unread: summary.unread,
        })
        .collect();

    Ok(Json(contacts))
}

async fn history(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(contact_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MessagePayload>>> {
    let user = state.authenticate(&headers)?;
    let conversation_id = conversation_key(&user.id, &contact_id);

    // Reverse-chronological page; the client reverses to ascending
    let page = state
        .messages
        .page(&conversation_id, query.before.as_deref(), query.limit)?;

    let mut payloads = Vec::with_capacity(page.len());
    for msg in &page {
        let name = state
            .users
            .find_by_id(&msg.author_id)?
            .map_or_else(|| msg.author_id.clone(), |author| author.name);
        let mut payload = MessagePayload::from_stored(msg, &name);
        if let Some(att) = &msg.attachment {
            payload.url = Some(state.broker.read_url(&att.key));
        }
        payloads.push(payload);
    }

    Ok(Json(payloads))
}

async fn mark_read(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(contact_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let user = state.authenticate(&headers)?;
    let conversation_id = conversation_key(&user.id, &contact_id);

    let advanced = state.router.mark_read(&conversation_id, &user.id).await?;
    Ok(Json(serde_json::json!({ "updated": advanced })))
}
