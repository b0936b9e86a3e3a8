//! Agent listing, panel history, and custom agent CRUD

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::agents::AgentInfo;
use crate::db::agent_panel_key;
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
pub struct PanelHistoryQuery {
    #[serde(rename = "contactId")]
    pub contact_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
pub struct PanelMessage {
    pub id: String,
    pub author: String,
    pub text: String,
    pub timestamp: i64,
    #[serde(rename = "contactId", skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateBotRequest {
    pub name: String,
    #[serde(default)]
    pub emoji: String,
    pub system_prompt: String,
    pub api_key: String,
    pub provider_account: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BotInfo {
    pub key: String,
    pub name: String,
    pub emoji: String,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/agents", get(list_agents))
        .route("/agents/{key}/messages", get(panel_history))
        .route("/custom-bots", post(create_bot).get(list_bots))
        .route("/custom-bots/{key}", delete(delete_bot))
        .with_state(state)
}

async fn list_agents(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<AgentInfo>>> {
    let user = state.authenticate(&headers)?;
    Ok(Json(state.agents.list(&user.id)?))
}

async fn panel_history(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(agent_key): Path<String>,
    Query(query): Query<PanelHistoryQuery>,
) -> Result<Json<Vec<PanelMessage>>> {
    let user = state.authenticate(&headers)?;

    if state.agents.resolve(&agent_key)?.is_none() {
        return Err(Error::NotFound(format!("agent '{agent_key}'")));
    }

    let conversation_id = agent_panel_key(&user.id, &agent_key);
    let mut page = state.messages.page(&conversation_id, None, query.limit)?;
    page.reverse();

    let messages = page
        .into_iter()
        .filter(|msg| {
            query.contact_id.is_none() || msg.contact_id == query.contact_id
        })
        .map(|msg| {
            let author = if msg.author_id == user.id {
                user.name.clone()
            } else {
                state
                    .users
                    .find_by_id(&msg.author_id)
                    .ok()
                    .flatten()
                    .map_or_else(|| msg.author_id.clone(), |author| author.name)
            };
            PanelMessage {
                id: msg.id,
                author,
                text: msg.text,
                timestamp: msg.created_at.timestamp_millis(),
                contact_id: msg.contact_id,
            }
        })
        .collect();

    Ok(Json(messages))
}

async fn create_bot(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(body): Json<CreateBotRequest>,
) -> Result<(StatusCode, Json<BotInfo>)> {
    let user = state.authenticate(&headers)?;

    if body.system_prompt.trim().is_empty() {
        return Err(Error::Invalid("system_prompt is required".to_string()));
    }
    if body.api_key.trim().is_empty() {
        return Err(Error::Invalid("api_key is required".to_string()));
    }

    let def = state.custom_agents.create(
        &body.name,
        &body.emoji,
        &body.system_prompt,
        &body.api_key,
        body.provider_account.as_deref(),
        &user.id,
    )?;

    Ok((
        StatusCode::CREATED,
        Json(BotInfo {
            key: def.key,
            name: def.name,
            emoji: def.emoji,
        }),
    ))
}

async fn list_bots(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<BotInfo>>> {
    let user = state.authenticate(&headers)?;

    let bots = state
        .custom_agents
        .list(&user.id)?
        .into_iter()
        .map(|def| BotInfo {
            key: def.key,
            name: def.name,
            emoji: def.emoji,
        })
        .collect();

    Ok(Json(bots))
}

async fn delete_bot(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<StatusCode> {
    let user = state.authenticate(&headers)?;
    state.custom_agents.delete(&key, &user.id)?;
    Ok(StatusCode::NO_CONTENT)
}
