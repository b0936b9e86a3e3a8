//! Calendar endpoints: commitments, availability, and the slot-picker
//! callback

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;

use super::ApiState;
use crate::db::{CalendarCommitment, CommitmentStatus};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    #[serde(rename = "conversationId")]
    pub conversation_id: Option<String>,
    #[serde(rename = "customerEmail")]
    pub customer_email: String,
    pub title: String,
    #[serde(rename = "startTime")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "endTime")]
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "conversationId")]
    pub conversation_id: Option<String>,
    pub status: Option<CommitmentStatus>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Deserialize)]
pub struct UpdateEventRequest {
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub date: NaiveDate,
    #[serde(default = "default_duration")]
    pub duration_minutes: u32,
}

fn default_duration() -> u32 {
    60
}

#[derive(Debug, Deserialize)]
pub struct SlotCallbackRequest {
    #[serde(rename = "contactId")]
    pub contact_id: Option<String>,
    #[serde(rename = "conversationId")]
    pub conversation_id: Option<String>,
    #[serde(rename = "agentKey", default = "default_agent")]
    pub agent_key: String,
    pub date: NaiveDate,
    pub time: String,
    pub email: String,
}

fn default_agent() -> String {
    "sdr".to_string()
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/auth-status", get(auth_status))
        .route("/events", post(create_event).get(list_events))
        .route(
            "/events/{id}",
            get(get_event).put(update_event).delete(cancel_event),
        )
        .route("/availability", get(availability))
        .route("/available-slots", get(available_slots))
        .route("/slot-callback", post(slot_callback))
        .with_state(state)
}

async fn auth_status(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    // Reachability probe doubles as the auth check
    let today = Utc::now().date_naive();
    let authenticated = state.scheduler.available_slots(today, 60).await.is_ok();

    Json(serde_json::json!({
        "authenticated": authenticated,
        "message": if authenticated {
            "calendar provider connected"
        } else {
            "calendar provider unreachable"
        },
    }))
}

async fn create_event(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(body): Json<CreateEventRequest>,
) -> Result<(StatusCode, Json<CalendarCommitment>)> {
    let operator = state.authenticate(&headers)?;

    if body.end_time <= body.start_time {
        return Err(Error::Invalid("end must be after start".to_string()));
    }

    let conversation_id = body
        .conversation_id
        .unwrap_or_else(|| format!("operator:{}", operator.id));

    let commitment = state
        .scheduler
        .manual_event(
            &conversation_id,
            "sdr",
            &body.customer_email,
            &body.title,
            body.start_time,
            body.end_time,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(commitment)))
}

async fn list_events(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<CalendarCommitment>>> {
    state.authenticate(&headers)?;
    Ok(Json(state.calendar.list(
        query.conversation_id.as_deref(),
        query.status,
        query.limit,
    )?))
}

async fn get_event(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<CalendarCommitment>> {
    state.authenticate(&headers)?;
    state
        .calendar
        .get(&id)?
        .map(Json)
        .ok_or_else(|| Error::NotFound("calendar event".to_string()))
}

async fn update_event(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<UpdateEventRequest>,
) -> Result<Json<CalendarCommitment>> {
    state.authenticate(&headers)?;

    if let Some(notes) = &body.notes {
        state.calendar.set_notes(&id, notes)?;
    }

    state
        .calendar
        .get(&id)?
        .map(Json)
        .ok_or_else(|| Error::NotFound("calendar event".to_string()))
}

async fn cancel_event(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state.authenticate(&headers)?;
    state.scheduler.cancel_event(&id).await?;
    Ok(Json(serde_json::json!({ "status": "cancelled" })))
}

async fn availability(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<serde_json::Value>> {
    state.authenticate(&headers)?;

    let start = parse_time(&query.start_time)?;
    let end = parse_time(&query.end_time)?;
    let available = state.scheduler.window_free(query.date, start, end).await?;

    Ok(Json(serde_json::json!({
        "date": query.date,
        "start_time": query.start_time,
        "end_time": query.end_time,
        "available": available,
    })))
}

async fn available_slots(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<serde_json::Value>> {
    let slots = state
        .scheduler
        .available_slots(query.date, query.duration_minutes)
        .await?;

    Ok(Json(serde_json::json!({
        "date": query.date,
        "duration_minutes": query.duration_minutes,
        "count": slots.len(),
        "available_slots": slots,
    })))
}

/// The UI calls back here after the customer picks a slot
async fn slot_callback(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(body): Json<SlotCallbackRequest>,
) -> Result<Json<serde_json::Value>> {
    let user = state.authenticate(&headers)?;

    let conversation_id = match (body.conversation_id, body.contact_id) {
        (Some(conversation_id), _) => conversation_id,
        (None, Some(contact_id)) => crate::db::conversation_key(&user.id, &contact_id),
        (None, None) => {
            return Err(Error::Invalid(
                "conversationId or contactId required".to_string(),
            ))
        }
    };

    let time = parse_time(&body.time)?;
    let effects = state
        .scheduler
        .slot_callback(&conversation_id, &body.agent_key, body.date, time, &body.email)
        .await?;

    state
        .router
        .apply_scheduling_effects(&conversation_id, &body.agent_key, &user.id, None, effects)
        .await;

    Ok(Json(serde_json::json!({ "ok": true })))
}

fn parse_time(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| Error::Invalid(format!("'{value}' is not an HH:MM time")))
}
