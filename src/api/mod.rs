//! HTTP API server
//!
//! One `ApiState` constructed at startup carries every shared handle; no
//! component reaches for a global. The routing table below is the entire
//! HTTP surface.

pub mod agents;
pub mod auth;
pub mod calendar;
pub mod contacts;
pub mod handovers;
pub mod messages;
pub mod nlu;
pub mod omni;
pub mod uploads;

use std::sync::Arc;

use axum::{
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router as AxumRouter,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::agents::{AgentRegistry, HttpLlmClient};
use crate::auth::TokenSigner;
use crate::channels::{ChannelSet, DeviceSessionChannel, InboundDedup};
use crate::config::Config;
use crate::db::{
    self, CalendarRepo, CustomAgentRepo, DbPool, HandoverRepo, MessageRepo, UserRepo,
};
use crate::nlu::Classifier;
use crate::realtime::{socket, Registry};
use crate::router::Router;
use crate::scheduling::{HttpCalendarProvider, Scheduler};
use crate::transcription::Transcriber;
use crate::uploads::UploadBroker;
use crate::{Error, Result};

/// Shared state for every handler
pub struct ApiState {
    pub config: Config,
    pub db: DbPool,
    pub users: UserRepo,
    pub messages: MessageRepo,
    pub handovers: HandoverRepo,
    pub calendar: CalendarRepo,
    pub custom_agents: CustomAgentRepo,
    pub signer: TokenSigner,
    pub registry: Arc<Registry>,
    pub router: Router,
    pub agents: Arc<AgentRegistry>,
    pub scheduler: Arc<Scheduler>,
    pub channels: Arc<ChannelSet>,
    pub classifier: Classifier,
    pub broker: UploadBroker,
    pub transcriber: Arc<Transcriber>,
    pub device_session: Option<Arc<DeviceSessionChannel>>,
    pub inbound_dedup: InboundDedup,
}

impl ApiState {
    /// Wire the whole application context from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened
    pub fn build(config: Config) -> Result<Arc<Self>> {
        std::fs::create_dir_all(&config.data_dir)?;
        let pool = db::init(config.db_path())?;
        Self::build_with_pool(config, pool)
    }

    /// Same wiring over an existing pool (tests use `init_memory`)
    ///
    /// # Errors
    ///
    /// Returns error if a component fails to initialize
    pub fn build_with_pool(config: Config, pool: DbPool) -> Result<Arc<Self>> {
        let users = UserRepo::new(pool.clone());
        let messages = MessageRepo::new(pool.clone());
        let handovers = HandoverRepo::new(pool.clone());
        let calendar = CalendarRepo::new(pool.clone());
        let custom_agents = CustomAgentRepo::new(pool.clone());

        let signer = TokenSigner::new(&config.secret, config.token_ttl);
        let registry = Arc::new(Registry::new());

        let llm = Arc::new(HttpLlmClient::new(&config.llm));
        let agents = Arc::new(AgentRegistry::new(
            custom_agents.clone(),
            llm,
            config.llm.max_tokens,
        ));

        let provider = Arc::new(HttpCalendarProvider::new(&config.scheduling));
        let scheduler = Arc::new(Scheduler::new(
            provider,
            calendar.clone(),
            config.scheduling.clone(),
        ));

        let channels = Arc::new(ChannelSet::from_config(&config.channels));
        let device_session = config
            .channels
            .device_session_url
            .as_ref()
            .map(|url| Arc::new(DeviceSessionChannel::new(url.clone())));

        let router = Router::new(
            registry.clone(),
            users.clone(),
            messages.clone(),
            handovers.clone(),
            agents.clone(),
            scheduler.clone(),
            Classifier::from_config(&config.llm),
            channels.clone(),
            config.handover.clone(),
        );

        let broker = UploadBroker::new(config.uploads.clone(), signer.clone());
        let transcriber = Arc::new(Transcriber::new(&config.llm));
        let classifier = Classifier::from_config(&config.llm);

        Ok(Arc::new(Self {
            config,
            db: pool,
            users,
            messages,
            handovers,
            calendar,
            custom_agents,
            signer,
            registry,
            router,
            agents,
            scheduler,
            channels,
            classifier,
            broker,
            transcriber,
            device_session,
            inbound_dedup: InboundDedup::new(),
        }))
    }

    /// Resolve the bearer credential into a user
    ///
    /// # Errors
    ///
    /// `AuthRequired` with no header, `AuthInvalid` otherwise
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<crate::db::User> {
        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or(Error::AuthRequired)?;

        let user_id = self.signer.verify(token)?;
        self.users
            .find_by_id(&user_id)?
            .ok_or_else(|| Error::AuthInvalid("unknown user".to_string()))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match self.code() {
            "auth_required" | "auth_invalid" => StatusCode::UNAUTHORIZED,
            "forbidden" => StatusCode::FORBIDDEN,
            "not_found" => StatusCode::NOT_FOUND,
            "invalid" => StatusCode::BAD_REQUEST,
            "conflict" => StatusCode::CONFLICT,
            "rate_limited" => StatusCode::TOO_MANY_REQUESTS,
            "unavailable" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }

        let body = Json(serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.public_message(),
            }
        }));

        (status, body).into_response()
    }
}

/// Build the full routing table
#[must_use]
pub fn router(state: Arc<ApiState>) -> AxumRouter {
    let api = AxumRouter::new()
        .merge(auth::router(state.clone()))
        .merge(messages::router(state.clone()))
        .nest("/contacts", contacts::router(state.clone()))
        .nest("/uploads", uploads::router(state.clone()))
        .merge(agents::router(state.clone()))
        .nest("/nlu", nlu::router(state.clone()))
        .nest("/handovers", handovers::router(state.clone()))
        .nest("/calendar", calendar::router(state.clone()))
        .nest("/omni", omni::router(state.clone()))
        .nest("/ws", socket::router(state))
        .route("/", get(health));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    api.layer(cors).layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Serve the API until the process is stopped
///
/// # Errors
///
/// Returns error if the listener cannot bind
pub async fn serve(state: Arc<ApiState>) -> Result<()> {
    let addr = format!("0.0.0.0:{}", state.config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Config(format!("failed to bind {addr}: {e}")))?;

    tracing::info!(port = state.config.port, "concourse listening");

    let app = router(state);
    axum::serve(listener, app)
        .await
        .map_err(|e| Error::Config(format!("server error: {e}")))?;

    Ok(())
}
