//! Registration and login

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::auth::{hash_password, verify_password};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserInfo,
}

#[derive(Debug, Serialize)]
pub struct UserInfo {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .with_state(state)
}

async fn register(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>)> {
    if body.name.trim().is_empty() || body.email.trim().is_empty() {
        return Err(Error::Invalid("name and email are required".to_string()));
    }
    if body.password.len() < 6 {
        return Err(Error::Invalid(
            "password must have at least 6 characters".to_string(),
        ));
    }

    let hash = hash_password(&body.password)?;
    let user = state.users.create(body.name.trim(), &body.email, &hash)?;
    let token = state.signer.issue(&user.id);

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: UserInfo {
                id: user.id,
                name: user.name,
                email: user.email,
            },
        }),
    ))
}

async fn login(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<AuthResponse>> {
    let user = state
        .users
        .find_by_email(&body.email)?
        .ok_or_else(|| Error::AuthInvalid("unknown email or password".to_string()))?;

    let valid = user
        .password_hash
        .as_deref()
        .is_some_and(|hash| verify_password(&body.password, hash));
    if !valid {
        return Err(Error::AuthInvalid("unknown email or password".to_string()));
    }

    let token = state.signer.issue(&user.id);
    Ok(Json(AuthResponse {
        token,
        user: UserInfo {
            id: user.id,
            name: user.name,
            email: user.email,
        },
    }))
}
