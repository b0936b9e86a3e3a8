//! Omnichannel surface: unified outbound send, inbound webhooks, and the
//! device-session WhatsApp variant

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use super::ApiState;
use crate::channels::{InboundChannelMessage, WhatsAppChannel, WhatsAppWebhook};
use crate::db::NewMessage;
use crate::nlu::Speaker;
use crate::realtime::{MessagePayload, RoomKey, WsOutgoing};
use crate::router::{ChannelOrigin, Inbound};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub channel: String,
    pub recipient: String,
    pub text: String,
    pub session: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SessionRequest {
    pub session: String,
}

#[derive(Debug, Deserialize)]
pub struct QrQuery {
    #[serde(default = "default_session")]
    pub session: String,
}

fn default_session() -> String {
    "default".to_string()
}

/// Webhook verification challenge (Meta platforms)
#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/send", post(send))
        .route("/webhooks/whatsapp", post(whatsapp_webhook).get(verify))
        .route("/webhooks/meta", post(meta_webhook).get(verify))
        .route("/wpp/start", post(wpp_start))
        .route("/wpp/qr", get(wpp_qr))
        .with_state(state)
}

async fn send(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(body): Json<SendRequest>,
) -> Result<Json<serde_json::Value>> {
    let user = state.authenticate(&headers)?;

    if body.channel == "wppconnect" && body.session.is_none() {
        return Err(Error::Invalid("session is required for wppconnect".to_string()));
    }

    let provider_id = state
        .channels
        .send(&body.channel, &body.recipient, &body.text)
        .await?;

    // Mirror the outbound message onto the channel conversation so every
    // subscriber sees what the bot said
    let author = state
        .users
        .find_or_create_agent(&body.channel, &format!("Bot({})", body.channel))?;
    let conversation_id = channel_conversation(&body.channel, &body.recipient);

    let mut mirror = NewMessage::text(
        &conversation_id,
        &author.id,
        &format!("→ {}: {}", body.recipient, body.text),
    );
    mirror.agent_key = Some(body.channel.clone());
    let stored = state.messages.append(mirror)?;

    let payload = MessagePayload::from_stored(&stored, &author.name);
    let rooms = [
        RoomKey::Conversation(conversation_id),
        RoomKey::User(user.id),
    ];
    state
        .registry
        .emit(&rooms, &WsOutgoing::NewMessage(payload))
        .await;

    Ok(Json(serde_json::json!({ "ok": true, "result": provider_id })))
}

async fn verify(Query(query): Query<VerifyQuery>) -> String {
    query.challenge.unwrap_or_default()
}

/// Inbound WhatsApp Cloud API webhook
async fn whatsapp_webhook(
    State(state): State<Arc<ApiState>>,
    Json(payload): Json<WhatsAppWebhook>,
) -> Result<Json<serde_json::Value>> {
    let inbound = WhatsAppChannel::normalize_webhook(&payload);
    let accepted = ingest(&state, inbound).await;
    Ok(Json(serde_json::json!({ "accepted": accepted })))
}

/// Minimal Messenger/Instagram webhook shape
#[derive(Debug, Deserialize)]
pub struct MetaWebhook {
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub entry: Vec<MetaEntry>,
}

#[derive(Debug, Deserialize)]
pub struct MetaEntry {
    #[serde(default)]
    pub messaging: Vec<MetaMessaging>,
}

#[derive(Debug, Deserialize)]
pub struct MetaMessaging {
    pub sender: MetaSender,
    pub message: Option<MetaMessage>,
}

#[derive(Debug, Deserialize)]
pub struct MetaSender {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct MetaMessage {
    pub mid: String,
    #[serde(default)]
    pub text: String,
}

async fn meta_webhook(
    State(state): State<Arc<ApiState>>,
    Json(payload): Json<MetaWebhook>,
) -> Result<Json<serde_json::Value>> {
    let channel = if payload.object == "instagram" {
        "instagram"
    } else {
        "facebook"
    };

    let mut inbound = Vec::new();
    for entry in &payload.entry {
        for messaging in &entry.messaging {
            let Some(message) = &messaging.message else {
                continue;
            };
            if message.text.is_empty() {
                continue;
            }
            inbound.push(InboundChannelMessage {
                channel: channel.to_string(),
                sender_id: messaging.sender.id.clone(),
                sender_name: messaging.sender.id.clone(),
                provider_msg_id: message.mid.clone(),
                text: message.text.clone(),
            });
        }
    }

    let accepted = ingest(&state, inbound).await;
    Ok(Json(serde_json::json!({ "accepted": accepted })))
}

/// Normalize-and-dispatch shared by every inbound webhook
async fn ingest(state: &Arc<ApiState>, messages: Vec<InboundChannelMessage>) -> usize {
    let mut accepted = 0;
    for msg in messages {
        if state.inbound_dedup.is_duplicate(&msg.provider_msg_id) {
            tracing::debug!(provider_msg_id = %msg.provider_msg_id, "dropping redelivery");
            continue;
        }

        let contact = match state.users.find_or_create_external(
            &msg.channel,
            &msg.sender_id,
            &msg.sender_name,
        ) {
            Ok(contact) => contact,
            Err(e) => {
                tracing::error!(error = %e, "contact materialization failed");
                continue;
            }
        };

        let inbound = Inbound {
            conversation_id: channel_conversation(&msg.channel, &msg.sender_id),
            author_id: contact.id,
            author_name: contact.name,
            text: msg.text,
            speaker: Speaker::Customer,
            temp_id: None,
            provider_msg_id: Some(msg.provider_msg_id),
            agent_panel: None,
            contact_id: None,
            origin: Some(ChannelOrigin {
                channel: msg.channel,
                recipient: msg.sender_id,
            }),
        };

        if let Err(e) = state.router.dispatch(inbound).await {
            tracing::error!(error = %e, "webhook dispatch failed");
        } else {
            accepted += 1;
        }
    }
    accepted
}

fn channel_conversation(channel: &str, native_id: &str) -> String {
    format!("{channel}:{native_id}")
}

async fn wpp_start(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<SessionRequest>,
) -> Result<Json<serde_json::Value>> {
    let keeper = state
        .device_session
        .as_ref()
        .ok_or_else(|| Error::Unavailable("device session service not configured".to_string()))?;

    let status = keeper.status(&body.session).await?;
    if status.connected {
        return Ok(Json(serde_json::json!({
            "status": "connected",
            "message": "WhatsApp já está conectado",
        })));
    }

    Ok(Json(serde_json::json!({
        "status": "initializing",
        "message": "Aguarde o QR Code ser gerado...",
    })))
}

async fn wpp_qr(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<QrQuery>,
) -> Result<Json<serde_json::Value>> {
    let keeper = state
        .device_session
        .as_ref()
        .ok_or_else(|| Error::Unavailable("device session service not configured".to_string()))?;

    let qr = keeper.qr(&query.session).await?;
    Ok(Json(serde_json::json!({
        "qr": qr.qr_code,
        "status": qr.status,
        "last_update": qr.last_update,
        "description": qr.description,
        "connected": qr.status == "LOGGEDIN",
    })))
}
