//! Best-effort audio transcription
//!
//! After an audio upload is confirmed, the broker schedules one
//! transcription attempt. The result, if any, is appended as an extra text
//! message by the same author, linked to the audio message. Failures are
//! silent toward the customer and logged for operators.

use std::time::Duration;

use crate::config::LlmConfig;
use crate::{Error, Result};

/// Remote transcription client
pub struct Transcriber {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    deadline: Duration,
}

impl Transcriber {
    #[must_use]
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            deadline: Duration::from_secs(60),
        }
    }

    /// Whether transcription is configured at all
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Download the audio from its read URL and transcribe it
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on deadline or provider failure; the caller
    /// drops the error silently.
    pub async fn transcribe_url(&self, audio_url: &str, filename: &str) -> Result<String> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| Error::Unavailable("transcription not configured".to_string()))?;

        let work = async {
            let audio = self.http.get(audio_url).send().await?;
            if !audio.status().is_success() {
                return Err(Error::Unavailable(format!(
                    "audio fetch returned {}",
                    audio.status()
                )));
            }
            let bytes = audio.bytes().await?;

            let part = reqwest::multipart::Part::bytes(bytes.to_vec())
                .file_name(filename.to_string())
                .mime_str("audio/webm")
                .map_err(|e| Error::Unavailable(e.to_string()))?;
            let form = reqwest::multipart::Form::new()
                .part("file", part)
                .text("model", "whisper-1")
                .text("language", "pt")
                .text("response_format", "text");

            let response = self
                .http
                .post(format!("{}/audio/transcriptions", self.base_url))
                .bearer_auth(api_key)
                .multipart(form)
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(Error::Unavailable(format!(
                    "transcription returned {}",
                    response.status()
                )));
            }

            Ok(response.text().await?.trim().to_string())
        };

        let transcript = tokio::time::timeout(self.deadline, work)
            .await
            .map_err(|_| Error::Unavailable("transcription deadline exceeded".to_string()))??;

        if transcript.is_empty() {
            return Err(Error::Unavailable("empty transcription".to_string()));
        }

        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(api_key: Option<&str>) -> LlmConfig {
        LlmConfig {
            base_url: "http://localhost:1".to_string(),
            api_key: api_key.map(String::from),
            model: "m".to_string(),
            nlu_model: "m".to_string(),
            use_model_nlu: false,
            deadline: Duration::from_secs(1),
            max_tokens: 100,
        }
    }

    #[test]
    fn test_enabled_tracks_credential() {
        assert!(Transcriber::new(&config(Some("sk-1"))).enabled());
        assert!(!Transcriber::new(&config(None)).enabled());
    }

    #[tokio::test]
    async fn test_unconfigured_transcription_is_unavailable() {
        let transcriber = Transcriber::new(&config(None));
        let err = transcriber
            .transcribe_url("http://localhost:1/a.ogg", "a.ogg")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
    }
}
