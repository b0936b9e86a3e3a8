//! Message store: durable timeline, delivery-state transitions, read cursors
//!
//! Append order within a conversation equals timestamp order; delivery
//! status is monotone (pending < sent < delivered < read) and only ever
//! advances. Appends are idempotent on the client temp id and on the
//! provider-native message id.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::user::parse_datetime;
use super::DbPool;
use crate::{Error, Result};

/// Hard cap on page sizes, regardless of what the caller asks for
const MAX_PAGE: usize = 100;

/// Canonical conversation key for a pair of user ids
#[must_use]
pub fn conversation_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}:{b}")
    } else {
        format!("{b}:{a}")
    }
}

/// Conversation key for one user's private panel with one agent
///
/// Panel traffic lives in its own conversation so it never pollutes the
/// main timeline.
#[must_use]
pub fn agent_panel_key(user_id: &str, agent_key: &str) -> String {
    format!("{user_id}:agent:{agent_key}")
}

/// Whether a conversation key is an agent-panel key
#[must_use]
pub fn is_agent_panel_key(conversation_id: &str) -> bool {
    conversation_id.contains(":agent:")
}

/// Message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Audio,
    File,
}

impl MessageKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::File => "file",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "image" => Self::Image,
            "audio" => Self::Audio,
            "file" => Self::File,
            _ => Self::Text,
        }
    }

    /// Classify a kind from a MIME type (attachments only)
    #[must_use]
    pub fn from_mime(mime: &str) -> Self {
        let lower = mime.to_lowercase();
        if lower.starts_with("image/") {
            Self::Image
        } else if lower.starts_with("audio/") {
            Self::Audio
        } else {
            Self::File
        }
    }
}

/// Delivery status, ordered: pending < sent < delivered < read
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "sent" => Self::Sent,
            "delivered" => Self::Delivered,
            "read" => Self::Read,
            _ => Self::Pending,
        }
    }
}

/// Reference to an uploaded object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub bucket: String,
    pub key: String,
    pub filename: String,
    pub mime: String,
}

/// A message to append
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: String,
    pub author_id: String,
    pub kind: MessageKind,
    pub text: String,
    pub attachment: Option<AttachmentRef>,
    pub status: DeliveryStatus,
    pub agent_key: Option<String>,
    pub contact_id: Option<String>,
    pub client_temp_id: Option<String>,
    pub transcript_of: Option<String>,
    pub provider_msg_id: Option<String>,
}

impl NewMessage {
    /// A plain text message, the common case
    #[must_use]
    pub fn text(conversation_id: &str, author_id: &str, text: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            author_id: author_id.to_string(),
            kind: MessageKind::Text,
            text: text.to_string(),
            attachment: None,
            status: DeliveryStatus::Sent,
            agent_key: None,
            contact_id: None,
            client_temp_id: None,
            transcript_of: None,
            provider_msg_id: None,
        }
    }
}

/// A persisted message in canonical form
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub author_id: String,
    pub kind: MessageKind,
    pub text: String,
    pub attachment: Option<AttachmentRef>,
    pub status: DeliveryStatus,
    pub agent_key: Option<String>,
    pub contact_id: Option<String>,
    pub client_temp_id: Option<String>,
    pub transcript_of: Option<String>,
    pub provider_msg_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-peer summary for the contact list view
#[derive(Debug, Clone)]
pub struct PeerSummary {
    pub peer_id: String,
    pub peer_name: String,
    pub last_message: StoredMessage,
    pub unread: i64,
}

/// Message repository
#[derive(Clone)]
pub struct MessageRepo {
    pool: DbPool,
}

impl MessageRepo {
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Append a message, assigning id and timestamp
    ///
    /// Idempotent on `(author_id, client_temp_id)` and on
    /// `provider_msg_id`: a retry returns the previously stored row.
    /// Timestamps within a conversation never go backwards.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` when a text message has empty text or a non-text
    /// message has no attachment.
    pub fn append(&self, msg: NewMessage) -> Result<StoredMessage> {
        match msg.kind {
            MessageKind::Text if msg.text.trim().is_empty() => {
                return Err(Error::Invalid("text message requires text".to_string()));
            }
            MessageKind::Image | MessageKind::Audio | MessageKind::File
                if msg.attachment.is_none() =>
            {
                return Err(Error::Invalid(format!(
                    "{} message requires an attachment",
                    msg.kind.as_str()
                )));
            }
            _ => {}
        }

        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        if let Some(temp_id) = &msg.client_temp_id {
            let existing = conn
                .query_row(
                    &format!("{SELECT_MESSAGE} WHERE author_id = ?1 AND client_temp_id = ?2"),
                    [&msg.author_id, temp_id],
                    row_to_message,
                )
                .ok();
            if let Some(stored) = existing {
                return Ok(stored);
            }
        }

        if let Some(provider_id) = &msg.provider_msg_id {
            let existing = conn
                .query_row(
                    &format!("{SELECT_MESSAGE} WHERE provider_msg_id = ?1"),
                    [provider_id],
                    row_to_message,
                )
                .ok();
            if let Some(stored) = existing {
                return Ok(stored);
            }
        }

        // Clamp to the conversation's newest timestamp so append order
        // equals timestamp order even across clock hiccups.
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let newest: Option<String> = conn
            .query_row(
                "SELECT MAX(created_at) FROM messages WHERE conversation_id = ?1",
                [&msg.conversation_id],
                |row| row.get(0),
            )
            .unwrap_or(None);
        let created_at = match newest {
            Some(ts) if ts > now => ts,
            _ => now,
        };

        let id = Uuid::new_v4().to_string();
        let (bucket, key, filename, mime) = match &msg.attachment {
            Some(att) => (
                Some(att.bucket.clone()),
                Some(att.key.clone()),
                Some(att.filename.clone()),
                Some(att.mime.clone()),
            ),
            None => (None, None, None, None),
        };

        conn.execute(
            "INSERT INTO messages
                (id, conversation_id, author_id, kind, text,
                 attachment_bucket, attachment_key, attachment_filename, attachment_mime,
                 status, agent_key, contact_id, client_temp_id, transcript_of,
                 provider_msg_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            rusqlite::params![
                &id,
                &msg.conversation_id,
                &msg.author_id,
                msg.kind.as_str(),
                &msg.text,
                bucket,
                key,
                filename,
                mime,
                msg.status.as_str(),
                msg.agent_key,
                msg.contact_id,
                msg.client_temp_id,
                msg.transcript_of,
                msg.provider_msg_id,
                &created_at,
            ],
        )?;

        Ok(StoredMessage {
            id,
            conversation_id: msg.conversation_id,
            author_id: msg.author_id,
            kind: msg.kind,
            text: msg.text,
            attachment: msg.attachment,
            status: msg.status,
            agent_key: msg.agent_key,
            contact_id: msg.contact_id,
            client_temp_id: msg.client_temp_id,
            transcript_of: msg.transcript_of,
            provider_msg_id: msg.provider_msg_id,
            created_at: parse_datetime(&created_at),
        })
    }

    /// Fetch one message by id
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn find_by_id(&self, id: &str) -> Result<Option<StoredMessage>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(conn
            .query_row(
                &format!("{SELECT_MESSAGE} WHERE id = ?1"),
                [id],
                row_to_message,
            )
            .ok())
    }

    /// Reverse-chronological page of a conversation
    ///
    /// Restartable by re-issuing with `before = oldest.id` of the previous
    /// page. `limit` is capped server-side.
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn page(
        &self,
        conversation_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredMessage>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let limit = limit.clamp(1, MAX_PAGE) as i64;

        let messages = if let Some(before_id) = before {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_MESSAGE}
                 WHERE conversation_id = ?1
                   AND rowid < (SELECT rowid FROM messages WHERE id = ?2)
                 ORDER BY rowid DESC LIMIT ?3"
            ))?;
            let result = stmt
                .query_map(rusqlite::params![conversation_id, before_id, limit], row_to_message)?
                .filter_map(std::result::Result::ok)
                .collect();
            result
        } else {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_MESSAGE}
                 WHERE conversation_id = ?1
                 ORDER BY rowid DESC LIMIT ?2"
            ))?;
            let result = stmt
                .query_map(rusqlite::params![conversation_id, limit], row_to_message)?
                .filter_map(std::result::Result::ok)
                .collect();
            result
        };

        Ok(messages)
    }

    /// Chronological tail of a conversation, for agent context windows
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn tail(&self, conversation_id: &str, limit: usize) -> Result<Vec<StoredMessage>> {
        let mut page = self.page(conversation_id, None, limit)?;
        page.reverse();
        Ok(page)
    }

    /// Global recent feed (debug/admin)
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn recent(&self, limit: usize) -> Result<Vec<StoredMessage>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let limit = limit.clamp(1, MAX_PAGE) as i64;
        let mut stmt =
            conn.prepare(&format!("{SELECT_MESSAGE} ORDER BY rowid DESC LIMIT ?1"))?;
        let mut rows: Vec<StoredMessage> = stmt
            .query_map([limit], row_to_message)?
            .filter_map(std::result::Result::ok)
            .collect();
        rows.reverse();
        Ok(rows)
    }

    /// Advance a message's delivery status
    ///
    /// Downgrades are a no-op, not an error. A missing message is logged
    /// and ignored. Returns the new status when the row actually advanced.
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn transition(
        &self,
        message_id: &str,
        new_status: DeliveryStatus,
    ) -> Result<Option<DeliveryStatus>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let current: Option<String> = conn
            .query_row(
                "SELECT status FROM messages WHERE id = ?1",
                [message_id],
                |row| row.get(0),
            )
            .ok();

        let Some(current) = current else {
            tracing::warn!(message_id, "status transition on missing message");
            return Ok(None);
        };

        if DeliveryStatus::parse(&current) >= new_status {
            return Ok(None);
        }

        conn.execute(
            "UPDATE messages SET status = ?1 WHERE id = ?2",
            rusqlite::params![new_status.as_str(), message_id],
        )?;

        Ok(Some(new_status))
    }

    /// Bulk-advance the read cursor for one reader
    ///
    /// Every message authored by the peer and not yet read, up to `as_of`,
    /// moves to `read`. Returns the ids that advanced so the caller can
    /// emit one delivery event per message. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn mark_conversation_read(
        &self,
        conversation_id: &str,
        reader_id: &str,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Vec<String>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let cutoff = as_of
            .unwrap_or_else(Utc::now)
            .to_rfc3339_opts(SecondsFormat::Micros, true);

        let ids: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT id FROM messages
                 WHERE conversation_id = ?1 AND author_id != ?2
                   AND status != 'read' AND created_at <= ?3
                 ORDER BY rowid",
            )?;
            let result = stmt
                .query_map(
                    rusqlite::params![conversation_id, reader_id, &cutoff],
                    |row| row.get(0),
                )?
                .filter_map(std::result::Result::ok)
                .collect();
            result
        };

        // Per-message updates keep status monotone per row even when the
        // bulk advance is interrupted partway.
        for id in &ids {
            conn.execute(
                "UPDATE messages SET status = 'read' WHERE id = ?1 AND status != 'read'",
                [id],
            )?;
        }

        Ok(ids)
    }

    /// Most recent message per peer plus unread counts, for the contact
    /// list view
    ///
    /// Synthetic agent authors are excluded; agent-panel traffic lives in
    /// its own rooms.
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn recent_per_peer(&self, user_id: &str) -> Result<Vec<PeerSummary>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let conversations: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT conversation_id FROM messages
                 WHERE conversation_id GLOB ?1 OR conversation_id GLOB ?2",
            )?;
            let result = stmt
                .query_map(
                    rusqlite::params![format!("{user_id}:*"), format!("*:{user_id}")],
                    |row| row.get(0),
                )?
                .filter_map(std::result::Result::ok)
                .collect();
            result
        };

        let mut summaries = Vec::new();
        for conversation_id in conversations {
            if is_agent_panel_key(&conversation_id) {
                continue;
            }
            let peer_id = match conversation_id
                .split_once(':')
                .map(|(a, b)| if a == user_id { b } else { a })
            {
                Some(peer) => peer.to_string(),
                None => continue,
            };

            let peer: Option<(String, Option<String>)> = conn
                .query_row(
                    "SELECT name, channel FROM users WHERE id = ?1",
                    [&peer_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .ok();
            let Some((peer_name, peer_channel)) = peer else {
                continue;
            };
            if peer_channel.as_deref() == Some("agent") {
                continue;
            }

            let last = conn
                .query_row(
                    &format!(
                        "{SELECT_MESSAGE} WHERE conversation_id = ?1
                         ORDER BY rowid DESC LIMIT 1"
                    ),
                    [&conversation_id],
                    row_to_message,
                )
                .ok();
            let Some(last_message) = last else { continue };

            let unread: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE conversation_id = ?1 AND author_id = ?2 AND status != 'read'",
                rusqlite::params![&conversation_id, &peer_id],
                |row| row.get(0),
            )?;

            summaries.push(PeerSummary {
                peer_id,
                peer_name,
                last_message,
                unread,
            });
        }

        summaries.sort_by(|a, b| b.last_message.created_at.cmp(&a.last_message.created_at));
        Ok(summaries)
    }
}

const SELECT_MESSAGE: &str = "SELECT id, conversation_id, author_id, kind, text,
        attachment_bucket, attachment_key, attachment_filename, attachment_mime,
        status, agent_key, contact_id, client_temp_id, transcript_of,
        provider_msg_id, created_at
     FROM messages";

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let bucket: Option<String> = row.get(5)?;
    let attachment = match bucket {
        Some(bucket) => Some(AttachmentRef {
            bucket,
            key: row.get(6)?,
            filename: row.get(7)?,
            mime: row.get(8)?,
        }),
        None => None,
    };

    Ok(StoredMessage {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        author_id: row.get(2)?,
        kind: MessageKind::parse(&row.get::<_, String>(3)?),
        text: row.get(4)?,
        attachment,
        status: DeliveryStatus::parse(&row.get::<_, String>(9)?),
        agent_key: row.get(10)?,
        contact_id: row.get(11)?,
        client_temp_id: row.get(12)?,
        transcript_of: row.get(13)?,
        provider_msg_id: row.get(14)?,
        created_at: parse_datetime(&row.get::<_, String>(15)?),
    })
}
