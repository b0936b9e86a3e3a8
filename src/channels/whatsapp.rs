//! `WhatsApp` Cloud API adapter
//!
//! Outbound messages go through the Graph messages endpoint; inbound
//! messages arrive on the webhook and are normalized for the router.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{ChannelAdapter, InboundChannelMessage};
use crate::{Error, Result};

/// `WhatsApp` Cloud API adapter
pub struct WhatsAppChannel {
    access_token: String,
    phone_number_id: String,
    client: Client,
}

impl WhatsAppChannel {
    #[must_use]
    pub fn new(access_token: String, phone_number_id: String) -> Self {
        Self {
            access_token,
            phone_number_id,
            client: Client::new(),
        }
    }

    /// Normalize a webhook payload into router-ready messages
    #[must_use]
    pub fn normalize_webhook(payload: &WhatsAppWebhook) -> Vec<InboundChannelMessage> {
        let mut inbound = Vec::new();

        for entry in &payload.entry {
            for change in &entry.changes {
                let profile_name = change
                    .value
                    .contacts
                    .as_ref()
                    .and_then(|contacts| contacts.first())
                    .and_then(|contact| contact.profile.as_ref())
                    .map(|profile| profile.name.clone());

                let Some(messages) = &change.value.messages else {
                    continue;
                };
                for msg in messages {
                    let Some(text) = &msg.text else { continue };
                    if text.body.is_empty() {
                        continue;
                    }

                    inbound.push(InboundChannelMessage {
                        channel: "whatsapp".to_string(),
                        sender_id: msg.from.clone(),
                        sender_name: profile_name.clone().unwrap_or_else(|| msg.from.clone()),
                        provider_msg_id: msg.id.clone(),
                        text: text.body.clone(),
                    });
                }
            }
        }

        inbound
    }
}

#[async_trait]
impl ChannelAdapter for WhatsAppChannel {
    fn name(&self) -> &'static str {
        "whatsapp"
    }

    async fn send(&self, recipient: &str, text: &str) -> Result<String> {
        let url = format!(
            "https://graph.facebook.com/v18.0/{}/messages",
            self.phone_number_id
        );

        let has_code = text.contains("```");
        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "to": recipient,
            "type": "text",
            "text": {
                "body": text,
                "preview_url": !has_code
            }
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Channel(format!("WhatsApp API error: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Channel(format!(
                "WhatsApp API error: {status} - {body}"
            )));
        }

        let payload: SendResponse = response
            .json()
            .await
            .map_err(|e| Error::Channel(format!("WhatsApp API error: {e}")))?;
        let id = payload
            .messages
            .into_iter()
            .next()
            .map(|m| m.id)
            .unwrap_or_default();

        tracing::debug!(to = recipient, id = %id, "WhatsApp message sent");
        Ok(id)
    }
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessageId>,
}

#[derive(Debug, Deserialize)]
struct SentMessageId {
    id: String,
}

/// Webhook payload from the Cloud API
#[derive(Debug, Deserialize)]
pub struct WhatsAppWebhook {
    pub entry: Vec<WhatsAppWebhookEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppWebhookEntry {
    pub changes: Vec<WhatsAppWebhookChange>,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppWebhookChange {
    pub value: WhatsAppWebhookValue,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppWebhookValue {
    pub messages: Option<Vec<WhatsAppMessage>>,
    pub contacts: Option<Vec<WhatsAppContact>>,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppContact {
    pub profile: Option<WhatsAppProfile>,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppProfile {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppMessage {
    pub from: String,
    pub id: String,
    pub timestamp: Option<String>,
    #[serde(rename = "type")]
    pub message_type: Option<String>,
    pub text: Option<WhatsAppTextContent>,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppTextContent {
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_webhook() {
        let payload: WhatsAppWebhook = serde_json::from_str(
            r#"{
                "entry": [{
                    "changes": [{
                        "value": {
                            "contacts": [{"profile": {"name": "João"}}],
                            "messages": [{
                                "from": "5511999990000",
                                "id": "wamid.abc",
                                "timestamp": "1700000000",
                                "type": "text",
                                "text": {"body": "oi, quero agendar"}
                            }]
                        }
                    }]
                }]
            }"#,
        )
        .unwrap();

        let inbound = WhatsAppChannel::normalize_webhook(&payload);
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].channel, "whatsapp");
        assert_eq!(inbound[0].sender_id, "5511999990000");
        assert_eq!(inbound[0].sender_name, "João");
        assert_eq!(inbound[0].provider_msg_id, "wamid.abc");
        assert_eq!(inbound[0].text, "oi, quero agendar");
    }

    #[test]
    fn test_status_only_webhook_yields_nothing() {
        let payload: WhatsAppWebhook =
            serde_json::from_str(r#"{"entry":[{"changes":[{"value":{}}]}]}"#).unwrap();
        assert!(WhatsAppChannel::normalize_webhook(&payload).is_empty());
    }
}
