//! WebSocket handler for the realtime surface
//!
//! The credential travels as a query parameter on the upgrade; a rejected
//! credential closes the socket before any room is joined. One writer task
//! drains an mpsc queue into the socket while the read loop feeds the
//! router.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router as AxumRouter,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::events::{WsIncoming, WsOutgoing};
use super::registry::RoomKey;
use crate::api::ApiState;
use crate::db::{agent_panel_key, conversation_key};
use crate::nlu::Speaker;
use crate::router::Inbound;

/// Queue depth per connection
const OUTBOX: usize = 32;

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// Build the websocket router
pub fn router(state: Arc<ApiState>) -> AxumRouter {
    AxumRouter::new()
        .route("/", get(ws_upgrade))
        .with_state(state)
}

async fn ws_upgrade(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.token))
}

async fn handle_socket(socket: WebSocket, state: Arc<ApiState>, token: Option<String>) {
    let (mut sender, mut receiver) = socket.split();

    // Verify before joining anything
    let user = token
        .as_deref()
        .and_then(|token| state.signer.verify(token).ok())
        .and_then(|user_id| state.users.find_by_id(&user_id).ok().flatten());

    let Some(user) = user else {
        let event = WsOutgoing::Error {
            code: "auth_required".to_string(),
            message: "authentication required".to_string(),
        };
        if let Ok(text) = serde_json::to_string(&event) {
            let _ = sender.send(Message::Text(text.into())).await;
        }
        return;
    };

    let conn_id = Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::channel::<WsOutgoing>(OUTBOX);

    state.registry.attach(&conn_id, &user.id, tx.clone()).await;
    tracing::info!(conn_id = %conn_id, user_id = %user.id, "websocket connected");

    let connected = WsOutgoing::Connected {
        user_id: user.id.clone(),
    };
    let _ = tx.send(connected).await;

    state
        .registry
        .emit(
            &[RoomKey::User(user.id.clone())],
            &WsOutgoing::Presence {
                user_id: user.id.clone(),
                state: "online".to_string(),
            },
        )
        .await;

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Ok(text) = serde_json::to_string(&event) {
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    let recv_state = state.clone();
    let recv_conn = conn_id.clone();
    let recv_user = user.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => {
                    handle_event(&text, &recv_state, &recv_conn, &recv_user, &tx).await;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.registry.detach(&conn_id).await;
    state
        .registry
        .emit(
            &[RoomKey::User(user.id.clone())],
            &WsOutgoing::Presence {
                user_id: user.id.clone(),
                state: "offline".to_string(),
            },
        )
        .await;
    tracing::info!(conn_id = %conn_id, "websocket disconnected");
}

async fn handle_event(
    raw: &str,
    state: &Arc<ApiState>,
    conn_id: &str,
    user: &crate::db::User,
    tx: &mpsc::Sender<WsOutgoing>,
) {
    let incoming: WsIncoming = match serde_json::from_str(raw) {
        Ok(incoming) => incoming,
        Err(e) => {
            tracing::debug!(error = %e, "unparseable realtime event");
            let _ = tx
                .send(WsOutgoing::Error {
                    code: "invalid".to_string(),
                    message: "unrecognized event".to_string(),
                })
                .await;
            return;
        }
    };

    match incoming {
        WsIncoming::ChatSend {
            text,
            temp_id,
            contact_id,
            agent_key,
        } => {
            let (conversation_id, speaker) = match (&agent_key, &contact_id) {
                (Some(key), _) => (agent_panel_key(&user.id, key), Speaker::Agent),
                (None, Some(contact)) => (conversation_key(&user.id, contact), Speaker::Customer),
                (None, None) => {
                    let _ = tx
                        .send(WsOutgoing::Error {
                            code: "invalid".to_string(),
                            message: "contactId or agentKey required".to_string(),
                        })
                        .await;
                    return;
                }
            };

            // The sender sees the echo through the rooms it joins here
            state
                .registry
                .join(conn_id, RoomKey::Conversation(conversation_id.clone()))
                .await;

            let inbound = Inbound {
                conversation_id,
                author_id: user.id.clone(),
                author_name: user.name.clone(),
                text,
                speaker,
                temp_id,
                provider_msg_id: None,
                agent_panel: agent_key,
                contact_id,
                origin: None,
            };

            if let Err(e) = state.router.dispatch(inbound).await {
                tracing::error!(error = %e, "dispatch failed");
                let _ = tx
                    .send(WsOutgoing::Error {
                        code: "internal".to_string(),
                        message: "internal error".to_string(),
                    })
                    .await;
            }
        }

        WsIncoming::MarkRead { contact_id } => {
            let conversation_id = conversation_key(&user.id, &contact_id);
            state
                .registry
                .join(conn_id, RoomKey::Conversation(conversation_id.clone()))
                .await;
            if let Err(e) = state.router.mark_read(&conversation_id, &user.id).await {
                tracing::warn!(error = %e, "mark-read failed");
            }
        }

        WsIncoming::Typing {
            contact_id,
            is_typing,
        } => {
            // Transient: fan out, never persist
            let conversation_id = conversation_key(&user.id, &contact_id);
            let event = WsOutgoing::Typing {
                user_id: user.id.clone(),
                conversation_id: conversation_id.clone(),
                is_typing,
            };
            state
                .registry
                .emit(
                    &[
                        RoomKey::Conversation(conversation_id),
                        RoomKey::User(contact_id),
                    ],
                    &event,
                )
                .await;
        }

        WsIncoming::AgentOpen { agent_key, .. } => {
            state
                .registry
                .join(
                    conn_id,
                    RoomKey::AgentPanel {
                        user_id: user.id.clone(),
                        agent_key,
                    },
                )
                .await;
        }

        WsIncoming::AgentClose { agent_key } => {
            state
                .registry
                .leave(
                    conn_id,
                    &RoomKey::AgentPanel {
                        user_id: user.id.clone(),
                        agent_key,
                    },
                )
                .await;
        }
    }
}
