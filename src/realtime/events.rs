//! Realtime wire events
//!
//! Every event is a named record; validation happens here at the boundary
//! and the core speaks only in validated shapes. Event names and field
//! casing are the contract the web client already speaks.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::db::{AttachmentRef, StoredMessage};
use crate::nlu::{Intent, Method};

/// Client → server events
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum WsIncoming {
    /// Submit a new message
    #[serde(rename = "chat:send")]
    ChatSend {
        #[serde(default)]
        text: String,
        /// Idempotency token for the echo
        #[serde(rename = "tempId")]
        temp_id: Option<String>,
        /// Peer the message is for
        #[serde(rename = "contactId")]
        contact_id: Option<String>,
        /// Set when sent from within an open agent panel
        #[serde(rename = "agentKey")]
        agent_key: Option<String>,
    },

    /// Bulk advance of the read cursor
    #[serde(rename = "chat:mark-read")]
    MarkRead {
        #[serde(rename = "contactId")]
        contact_id: String,
    },

    /// Transient typing indicator; never persisted
    #[serde(rename = "user:typing")]
    Typing {
        #[serde(rename = "contactId")]
        contact_id: String,
        #[serde(rename = "isTyping")]
        is_typing: bool,
    },

    /// Open an agent panel (joins its private room)
    #[serde(rename = "agent:open")]
    AgentOpen {
        #[serde(rename = "agentKey")]
        agent_key: String,
        #[serde(rename = "contactId")]
        contact_id: Option<String>,
    },

    /// Close an agent panel
    #[serde(rename = "agent:close")]
    AgentClose {
        #[serde(rename = "agentKey")]
        agent_key: String,
    },
}

/// Attachment on the wire
#[derive(Debug, Clone, Serialize)]
pub struct AttachmentPayload {
    pub bucket: String,
    pub key: String,
    pub filename: String,
    pub mimetype: String,
}

impl From<&AttachmentRef> for AttachmentPayload {
    fn from(att: &AttachmentRef) -> Self {
        Self {
            bucket: att.bucket.clone(),
            key: att.key.clone(),
            filename: att.filename.clone(),
            mimetype: att.mime.clone(),
        }
    }
}

/// A message on the wire
#[derive(Debug, Clone, Serialize)]
pub struct MessagePayload {
    pub id: String,
    pub author: String,
    #[serde(rename = "conversationId")]
    pub conversation_id: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub status: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<AttachmentPayload>,
    /// Signed read URL for the attachment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "agentKey", skip_serializing_if = "Option::is_none")]
    pub agent_key: Option<String>,
    #[serde(rename = "tempId", skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

impl MessagePayload {
    /// Wire form of a stored message, with the author display name
    #[must_use]
    pub fn from_stored(msg: &StoredMessage, author_name: &str) -> Self {
        Self {
            id: msg.id.clone(),
            author: author_name.to_string(),
            conversation_id: msg.conversation_id.clone(),
            timestamp: msg.created_at.timestamp_millis(),
            status: msg.status.as_str().to_string(),
            kind: msg.kind.as_str().to_string(),
            text: msg.text.clone(),
            attachment: msg.attachment.as_ref().map(AttachmentPayload::from),
            url: None,
            agent_key: msg.agent_key.clone(),
            temp_id: msg.client_temp_id.clone(),
            intent: None,
            confidence: None,
            method: None,
        }
    }

    /// Attach the classification decision for text echoes
    #[must_use]
    pub fn with_analysis(mut self, intent: Intent, confidence: f64, method: Method) -> Self {
        self.intent = Some(intent.as_str().to_string());
        self.confidence = Some(confidence);
        self.method = Some(match method {
            Method::Rule => "rule".to_string(),
            Method::Model => "model".to_string(),
        });
        self
    }
}

/// Server → client events
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum WsOutgoing {
    /// Connection established and authenticated
    #[serde(rename = "connected")]
    Connected {
        #[serde(rename = "userId")]
        user_id: String,
    },

    /// A message landed on the timeline
    #[serde(rename = "chat:new-message")]
    NewMessage(MessagePayload),

    /// Delivery status advanced
    #[serde(rename = "chat:delivery")]
    Delivery {
        #[serde(rename = "messageId")]
        message_id: String,
        status: String,
    },

    /// Agent-panel traffic; delivered only into the matching panel room
    #[serde(rename = "agent:message")]
    AgentMessage {
        #[serde(rename = "agentKey")]
        agent_key: String,
        #[serde(rename = "contactId", skip_serializing_if = "Option::is_none")]
        contact_id: Option<String>,
        id: String,
        author: String,
        text: String,
        timestamp: i64,
    },

    /// Open the slot picker in the customer's UI
    #[serde(rename = "agent:show-slot-picker")]
    ShowSlotPicker {
        #[serde(rename = "agentKey")]
        agent_key: String,
        #[serde(rename = "customerEmail", skip_serializing_if = "Option::is_none")]
        customer_email: Option<String>,
        #[serde(rename = "customerPhone", skip_serializing_if = "Option::is_none")]
        customer_phone: Option<String>,
        #[serde(rename = "workingDays")]
        working_days: Vec<NaiveDate>,
        #[serde(rename = "workingHours")]
        working_hours: (u32, u32),
        #[serde(rename = "defaultDurationMinutes")]
        default_duration_minutes: u32,
    },

    /// Transient typing indicator
    #[serde(rename = "user:typing")]
    Typing {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "conversationId")]
        conversation_id: String,
        #[serde(rename = "isTyping")]
        is_typing: bool,
    },

    /// Presence change
    #[serde(rename = "user:presence")]
    Presence {
        #[serde(rename = "userId")]
        user_id: String,
        state: String,
    },

    /// Stable error shape; never carries internals
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_send_deserializes_wire_names() {
        let raw = r#"{"type":"chat:send","text":"oi","tempId":"t1","contactId":"bob"}"#;
        let incoming: WsIncoming = serde_json::from_str(raw).unwrap();
        match incoming {
            WsIncoming::ChatSend {
                text,
                temp_id,
                contact_id,
                agent_key,
            } => {
                assert_eq!(text, "oi");
                assert_eq!(temp_id.as_deref(), Some("t1"));
                assert_eq!(contact_id.as_deref(), Some("bob"));
                assert!(agent_key.is_none());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_new_message_serializes_wire_names() {
        let payload = MessagePayload {
            id: "m1".to_string(),
            author: "Alice".to_string(),
            conversation_id: "a:b".to_string(),
            timestamp: 1_700_000_000_000,
            status: "sent".to_string(),
            kind: "text".to_string(),
            text: "hi".to_string(),
            attachment: None,
            url: None,
            agent_key: None,
            temp_id: Some("t1".to_string()),
            intent: None,
            confidence: None,
            method: None,
        };
        let json = serde_json::to_string(&WsOutgoing::NewMessage(payload)).unwrap();
        assert!(json.contains("\"type\":\"chat:new-message\""));
        assert!(json.contains("\"tempId\":\"t1\""));
        assert!(json.contains("\"conversationId\":\"a:b\""));
        assert!(!json.contains("agentKey"));
    }

    #[test]
    fn test_slot_picker_event_shape() {
        let event = WsOutgoing::ShowSlotPicker {
            agent_key: "sdr".to_string(),
            customer_email: Some("x@y.com".to_string()),
            customer_phone: None,
            working_days: vec![NaiveDate::from_ymd_opt(2025, 12, 2).unwrap()],
            working_hours: (9, 18),
            default_duration_minutes: 60,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"agent:show-slot-picker\""));
        assert!(json.contains("\"defaultDurationMinutes\":60"));
        assert!(json.contains("\"customerEmail\":\"x@y.com\""));
    }
}
