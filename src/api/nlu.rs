//! NLU analysis endpoints

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;

use super::ApiState;
use crate::nlu::{extract_entities, intents, Speaker};
use crate::Result;

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub text: String,
    #[serde(default)]
    pub speaker: Option<Speaker>,
}

#[derive(Debug, Deserialize)]
pub struct IntentsQuery {
    #[serde(default)]
    pub speaker: Option<Speaker>,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/analyze", post(analyze))
        .route("/intents", get(list_intents))
        .route("/extract-entities", post(entities_only))
        .with_state(state)
}

async fn analyze(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(body): Json<AnalyzeRequest>,
) -> Result<Json<serde_json::Value>> {
    state.authenticate(&headers)?;

    let speaker = body.speaker.unwrap_or(Speaker::Customer);
    let analysis = state.classifier.analyze(&body.text, speaker).await;
    let requires_handover = crate::handover::evaluate(&analysis, 0, false).is_some();

    Ok(Json(serde_json::json!({
        "intent": analysis.intent.as_str(),
        "confidence": analysis.confidence,
        "method": analysis.method,
        "entities": analysis.entities,
        "requires_handover": requires_handover,
    })))
}

async fn list_intents(Query(query): Query<IntentsQuery>) -> Json<serde_json::Value> {
    let speaker = query.speaker.unwrap_or(Speaker::Customer);
    let table = match speaker {
        Speaker::Customer => intents::CUSTOMER_INTENTS,
        Speaker::Agent => intents::AGENT_INTENTS,
    };

    let listing: Vec<serde_json::Value> = table
        .iter()
        .map(|pattern| {
            serde_json::json!({
                "name": pattern.intent.as_str(),
                "keywords": pattern.keywords,
            })
        })
        .collect();

    Json(serde_json::json!({
        "speaker": speaker,
        "intents": listing,
    }))
}

async fn entities_only(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(body): Json<AnalyzeRequest>,
) -> Result<Json<serde_json::Value>> {
    state.authenticate(&headers)?;

    let entities = extract_entities(&body.text, Utc::now());
    Ok(Json(serde_json::json!({
        "count": entities.len(),
        "entities": entities,
    })))
}
