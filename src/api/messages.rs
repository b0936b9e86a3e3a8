//! Global recent feed (debug/admin)

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use super::ApiState;
use crate::realtime::MessagePayload;
use crate::Result;

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/messages", get(recent_feed))
        .with_state(state)
}

async fn recent_feed(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(query): Query<FeedQuery>,
) -> Result<Json<Vec<MessagePayload>>> {
    state.authenticate(&headers)?;

    let messages = state.messages.recent(query.limit)?;

    // Resolve author display names once per author
    let mut names: HashMap<String, String> = HashMap::new();
    let mut payloads = Vec::with_capacity(messages.len());
    for msg in &messages {
        let name = match names.get(&msg.author_id) {
            Some(name) => name.clone(),
            None => {
                let name = state
                    .users
                    .find_by_id(&msg.author_id)?
                    .map_or_else(|| msg.author_id.clone(), |user| user.name);
                names.insert(msg.author_id.clone(), name.clone());
                name
            }
        };

        let mut payload = MessagePayload::from_stored(msg, &name);
        if let Some(att) = &msg.attachment {
            payload.url = Some(state.broker.read_url(&att.key));
        }
        payloads.push(payload);
    }

    Ok(Json(payloads))
}
