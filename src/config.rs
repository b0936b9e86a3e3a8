//! Configuration management for the concourse core
//!
//! Configuration is environment-first with an optional TOML file override
//! (`CONCOURSE_CONFIG` or `./concourse.toml`). Every external coupling —
//! LLM provider, object store, calendar provider, Meta Graph channels,
//! device-session keeper — is named here and nowhere else.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

/// Concourse configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to data directory (database lives here)
    pub data_dir: PathBuf,

    /// HTTP/realtime server port
    pub port: u16,

    /// Secret used to sign bearer credentials and presigned upload URLs
    pub secret: String,

    /// Bearer credential lifetime
    pub token_ttl: Duration,

    /// LLM provider settings (agents, model-backed NLU, transcription)
    pub llm: LlmConfig,

    /// Upload broker settings
    pub uploads: UploadConfig,

    /// Scheduling sub-protocol settings
    pub scheduling: SchedulingConfig,

    /// Handover queue settings
    pub handover: HandoverConfig,

    /// Outbound channel credentials
    pub channels: ChannelsConfig,
}

/// LLM provider settings
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Chat-completions base URL
    pub base_url: String,

    /// Default API key (built-in agents; custom agents carry their own)
    pub api_key: Option<String>,

    /// Model for agent replies
    pub model: String,

    /// Cheaper model for NLU classification
    pub nlu_model: String,

    /// Prefer the model-backed NLU strategy when reachable
    pub use_model_nlu: bool,

    /// Per-call wall-clock deadline
    pub deadline: Duration,

    /// Max output tokens per agent reply
    pub max_tokens: u32,
}

/// Upload broker settings
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Object store bucket
    pub bucket: String,

    /// Public base URL of the object store (presigned URLs point here)
    pub public_base_url: String,

    /// Maximum accepted upload size in bytes
    pub max_size_bytes: u64,

    /// Write credential lifetime (capped at 10 minutes)
    pub put_expiry: Duration,

    /// Read credential lifetime
    pub get_expiry: Duration,
}

/// Scheduling sub-protocol settings
#[derive(Debug, Clone)]
pub struct SchedulingConfig {
    /// Calendar provider base URL
    pub calendar_base_url: String,

    /// Calendar provider credential
    pub calendar_token: Option<String>,

    /// Working-hours window start, 24h clock
    pub working_hours_start: u32,

    /// Working-hours window end, 24h clock
    pub working_hours_end: u32,

    /// Slot duration in minutes
    pub slot_minutes: u32,

    /// How many working days ahead the slot picker offers
    pub days_ahead: u32,

    /// Commit without operator confirmation (per tenant+agent)
    pub auto_commit: bool,

    /// Per-call wall-clock deadline for calendar operations
    pub deadline: Duration,
}

/// Handover queue settings
#[derive(Debug, Clone)]
pub struct HandoverConfig {
    /// Classifications below this confidence count as low-confidence
    pub low_confidence_threshold: f64,

    /// Hour (local) before which bot-only service is refused, if set
    pub office_hours_start: Option<u32>,

    /// Hour (local) after which bot-only service is refused, if set
    pub office_hours_end: Option<u32>,
}

/// Outbound channel credentials
#[derive(Debug, Clone, Default)]
pub struct ChannelsConfig {
    /// WhatsApp Cloud API access token
    pub whatsapp_token: Option<String>,

    /// WhatsApp Cloud API phone number id
    pub whatsapp_phone_id: Option<String>,

    /// Meta Graph page token (Instagram + Messenger)
    pub meta_page_token: Option<String>,

    /// Device-session keeper base URL (QR-login WhatsApp variant)
    pub device_session_url: Option<String>,

    /// Per-call wall-clock deadline for channel sends
    pub send_deadline: Duration,
}

/// Optional TOML override file, sparse on purpose: only the keys an
/// operator actually wants to pin
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    port: Option<u16>,
    secret: Option<String>,
    llm_base_url: Option<String>,
    llm_model: Option<String>,
    nlu_model: Option<String>,
    use_model_nlu: Option<bool>,
    upload_bucket: Option<String>,
    upload_public_base_url: Option<String>,
    max_upload_mb: Option<u64>,
    calendar_base_url: Option<String>,
    working_hours_start: Option<u32>,
    working_hours_end: Option<u32>,
    slot_minutes: Option<u32>,
    auto_commit: Option<bool>,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_bool(name: &str, default: bool) -> bool {
    env_var(name).map_or(default, |v| v == "1" || v.eq_ignore_ascii_case("true"))
}

impl Config {
    /// Load configuration from environment plus optional TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the override file is unreadable or malformed, or if
    /// a numeric variable fails to parse.
    pub fn load() -> Result<Self> {
        let file = Self::load_file()?;

        let data_dir = file
            .data_dir
            .or_else(|| env_var("CONCOURSE_DATA_DIR").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("./data"));

        let port = match file.port.or_else(|| {
            env_var("CONCOURSE_PORT").map(|v| v.parse().unwrap_or(0))
        }) {
            Some(0) => return Err(Error::Config("invalid CONCOURSE_PORT".to_string())),
            Some(p) => p,
            None => 8000,
        };

        let secret = file
            .secret
            .or_else(|| env_var("CONCOURSE_SECRET"))
            .unwrap_or_else(|| "dev-secret-change-me".to_string());

        let max_upload_mb = file
            .max_upload_mb
            .or_else(|| env_var("CONCOURSE_MAX_UPLOAD_MB").and_then(|v| v.parse().ok()))
            .unwrap_or(15);

        Ok(Self {
            data_dir,
            port,
            secret,
            token_ttl: Duration::from_secs(60 * 60 * 24),
            llm: LlmConfig {
                base_url: file
                    .llm_base_url
                    .or_else(|| env_var("CONCOURSE_LLM_BASE_URL"))
                    .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
                api_key: env_var("OPENAI_API_KEY"),
                model: file
                    .llm_model
                    .or_else(|| env_var("CONCOURSE_LLM_MODEL"))
                    .unwrap_or_else(|| "gpt-4o-mini".to_string()),
                nlu_model: file
                    .nlu_model
                    .or_else(|| env_var("CONCOURSE_NLU_MODEL"))
                    .unwrap_or_else(|| "gpt-4o-mini".to_string()),
                use_model_nlu: file
                    .use_model_nlu
                    .unwrap_or_else(|| env_bool("CONCOURSE_USE_MODEL_NLU", false)),
                deadline: Duration::from_secs(30),
                max_tokens: 600,
            },
            uploads: UploadConfig {
                bucket: file
                    .upload_bucket
                    .or_else(|| env_var("CONCOURSE_UPLOAD_BUCKET"))
                    .unwrap_or_else(|| "chat-uploads".to_string()),
                public_base_url: file
                    .upload_public_base_url
                    .or_else(|| env_var("CONCOURSE_UPLOAD_BASE_URL"))
                    .unwrap_or_else(|| "http://localhost:9000".to_string()),
                max_size_bytes: max_upload_mb * 1024 * 1024,
                put_expiry: Duration::from_secs(300),
                get_expiry: Duration::from_secs(3600),
            },
            scheduling: SchedulingConfig {
                calendar_base_url: file
                    .calendar_base_url
                    .or_else(|| env_var("CONCOURSE_CALENDAR_BASE_URL"))
                    .unwrap_or_else(|| "http://localhost:7000".to_string()),
                calendar_token: env_var("CONCOURSE_CALENDAR_TOKEN"),
                working_hours_start: file.working_hours_start.unwrap_or(9),
                working_hours_end: file.working_hours_end.unwrap_or(18),
                slot_minutes: file.slot_minutes.unwrap_or(60),
                days_ahead: 5,
                auto_commit: file
                    .auto_commit
                    .unwrap_or_else(|| env_bool("CONCOURSE_AUTO_COMMIT", true)),
                deadline: Duration::from_secs(15),
            },
            handover: HandoverConfig {
                low_confidence_threshold: 0.5,
                office_hours_start: None,
                office_hours_end: None,
            },
            channels: ChannelsConfig {
                whatsapp_token: env_var("WHATSAPP_TOKEN"),
                whatsapp_phone_id: env_var("WHATSAPP_PHONE_ID"),
                meta_page_token: env_var("META_PAGE_TOKEN"),
                device_session_url: env_var("CONCOURSE_DEVICE_SESSION_URL"),
                send_deadline: Duration::from_secs(15),
            },
        })
    }

    fn load_file() -> Result<FileConfig> {
        let path = env_var("CONCOURSE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("concourse.toml"));

        if !path.exists() {
            return Ok(FileConfig::default());
        }

        let raw = std::fs::read_to_string(&path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Database file path inside the data directory
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("concourse.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_config_parses_sparse_toml() {
        let raw = r#"
            port = 9100
            slot_minutes = 30
            auto_commit = false
        "#;
        let file: FileConfig = toml::from_str(raw).unwrap();
        assert_eq!(file.port, Some(9100));
        assert_eq!(file.slot_minutes, Some(30));
        assert_eq!(file.auto_commit, Some(false));
        assert!(file.secret.is_none());
    }
}
