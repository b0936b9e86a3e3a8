//! Upload grant and confirm endpoints
//!
//! The confirm materializes the attachment as a first-class message and,
//! for audio, schedules a best-effort transcription whose failure is
//! silent.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::db::{agent_panel_key, conversation_key, DeliveryStatus, MessageKind, NewMessage};
use crate::realtime::{MessagePayload, RoomKey, WsOutgoing};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub filename: String,
    pub mimetype: String,
    pub size: u64,
}

#[derive(Debug, Serialize)]
pub struct GrantResponse {
    pub key: String,
    #[serde(rename = "putUrl")]
    pub put_url: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub key: String,
    pub filename: String,
    pub mimetype: String,
    #[serde(rename = "contactId")]
    pub contact_id: Option<String>,
    #[serde(rename = "agentKey")]
    pub agent_key: Option<String>,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/grant", post(grant))
        .route("/confirm", post(confirm))
        .with_state(state)
}

async fn grant(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(body): Json<GrantRequest>,
) -> Result<Json<GrantResponse>> {
    let user = state.authenticate(&headers)?;

    let granted = state
        .broker
        .grant(&user.id, &body.filename, &body.mimetype, body.size)?;

    Ok(Json(GrantResponse {
        key: granted.key,
        put_url: granted.put_url,
    }))
}

async fn confirm(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(body): Json<ConfirmRequest>,
) -> Result<(StatusCode, Json<MessagePayload>)> {
    let user = state.authenticate(&headers)?;

    let conversation_id = match (&body.agent_key, &body.contact_id) {
        (Some(agent_key), _) => agent_panel_key(&user.id, agent_key),
        (None, Some(contact_id)) => conversation_key(&user.id, contact_id),
        (None, None) => {
            return Err(Error::Invalid("contactId or agentKey required".to_string()));
        }
    };

    // Commit point: CAS on the pending upload, then one message
    let confirmed = state
        .broker
        .confirm(&user.id, &body.key, &body.filename, &body.mimetype)?;

    let mut message = NewMessage {
        conversation_id: conversation_id.clone(),
        author_id: user.id.clone(),
        kind: confirmed.kind,
        text: String::new(),
        attachment: Some(confirmed.attachment.clone()),
        status: DeliveryStatus::Sent,
        agent_key: body.agent_key.clone(),
        contact_id: body.contact_id.clone(),
        client_temp_id: None,
        transcript_of: None,
        provider_msg_id: None,
    };
    // Attachment messages carry the filename as display text
    message.text = body.filename.clone();
    let stored = state.messages.append(message)?;

    let mut payload = MessagePayload::from_stored(&stored, &user.name);
    payload.url = Some(confirmed.get_url.clone());

    let rooms = [
        RoomKey::Conversation(conversation_id.clone()),
        RoomKey::User(user.id.clone()),
    ];
    state
        .registry
        .emit(&rooms, &WsOutgoing::NewMessage(payload.clone()))
        .await;

    if confirmed.kind == MessageKind::Audio && state.transcriber.enabled() {
        spawn_transcription(state.clone(), stored.id.clone(), conversation_id, user, confirmed);
    }

    Ok((StatusCode::CREATED, Json(payload)))
}

/// Best-effort transcription; the customer never hears about failures
fn spawn_transcription(
    state: Arc<ApiState>,
    audio_message_id: String,
    conversation_id: String,
    user: crate::db::User,
    confirmed: crate::uploads::ConfirmedUpload,
) {
    tokio::spawn(async move {
        let transcript = match state
            .transcriber
            .transcribe_url(&confirmed.get_url, &confirmed.attachment.filename)
            .await
        {
            Ok(transcript) => transcript,
            Err(e) => {
                tracing::warn!(error = %e, "transcription failed");
                return;
            }
        };

        let mut message = NewMessage::text(&conversation_id, &user.id, &transcript);
        message.transcript_of = Some(audio_message_id);

        match state.messages.append(message) {
            Ok(stored) => {
                let payload = MessagePayload::from_stored(&stored, &user.name);
                let rooms = [
                    RoomKey::Conversation(conversation_id),
                    RoomKey::User(user.id),
                ];
                state
                    .registry
                    .emit(&rooms, &WsOutgoing::NewMessage(payload))
                    .await;
            }
            Err(e) => tracing::warn!(error = %e, "transcript append failed"),
        }
    });
}
