//! Instagram and Facebook Messenger adapters
//!
//! Both speak the same Graph `me/messages` contract with a page token;
//! recipients are PSIDs.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::ChannelAdapter;
use crate::{Error, Result};

/// Messaging surface behind the Graph API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Surface {
    Instagram,
    Facebook,
}

/// Graph messaging adapter for Instagram or Messenger
pub struct MetaChannel {
    surface: Surface,
    page_token: String,
    client: Client,
}

impl MetaChannel {
    #[must_use]
    pub fn instagram(page_token: String) -> Self {
        Self {
            surface: Surface::Instagram,
            page_token,
            client: Client::new(),
        }
    }

    #[must_use]
    pub fn facebook(page_token: String) -> Self {
        Self {
            surface: Surface::Facebook,
            page_token,
            client: Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    message_id: Option<String>,
}

#[async_trait]
impl ChannelAdapter for MetaChannel {
    fn name(&self) -> &'static str {
        match self.surface {
            Surface::Instagram => "instagram",
            Surface::Facebook => "facebook",
        }
    }

    async fn send(&self, recipient: &str, text: &str) -> Result<String> {
        let body = serde_json::json!({
            "recipient": {"id": recipient},
            "message": {"text": text},
            "messaging_type": "RESPONSE",
        });

        let response = self
            .client
            .post("https://graph.facebook.com/v18.0/me/messages")
            .query(&[("access_token", &self.page_token)])
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Graph API error: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Channel(format!("Graph API error: {status} - {body}")));
        }

        let payload: SendResponse = response
            .json()
            .await
            .map_err(|e| Error::Channel(format!("Graph API error: {e}")))?;

        Ok(payload.message_id.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_names() {
        assert_eq!(MetaChannel::instagram("t".to_string()).name(), "instagram");
        assert_eq!(MetaChannel::facebook("t".to_string()).name(), "facebook");
    }
}
