//! Upload broker: safe, time-bounded, size- and type-checked attachment
//! ingestion
//!
//! The client gets a short-lived presigned write URL, uploads straight to
//! the object store (the core never proxies bytes), then confirms. The
//! confirm is the commit point: a compare-and-set on the pending upload's
//! consumed flag guarantees exactly one materialized message per key.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use rand::RngCore;

use crate::auth::TokenSigner;
use crate::config::UploadConfig;
use crate::db::{AttachmentRef, MessageKind};
use crate::{Error, Result};

/// MIME types the broker accepts
const ALLOWED_MIME: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/webp",
    "application/pdf",
    "text/plain",
    "application/zip",
    "application/octet-stream",
    "audio/webm",
    "audio/ogg",
    "audio/mpeg",
    "audio/mp4",
    "audio/wav",
];

/// Write credentials can live at most this long
const MAX_PUT_EXPIRY: Duration = Duration::from_secs(600);

/// A granted-but-unconfirmed upload
#[derive(Debug, Clone)]
struct PendingUpload {
    mime: String,
    issuer_user_id: String,
    expires_at: DateTime<Utc>,
    consumed: bool,
}

/// Result of a grant
#[derive(Debug, Clone)]
pub struct UploadGrant {
    pub key: String,
    pub put_url: String,
}

/// Result of a confirm
#[derive(Debug, Clone)]
pub struct ConfirmedUpload {
    pub attachment: AttachmentRef,
    pub kind: MessageKind,
    pub get_url: String,
}

/// The broker
pub struct UploadBroker {
    config: UploadConfig,
    signer: TokenSigner,
    pending: Mutex<HashMap<String, PendingUpload>>,
}

impl UploadBroker {
    #[must_use]
    pub fn new(config: UploadConfig, signer: TokenSigner) -> Self {
        Self {
            config,
            signer,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Validate and issue a short-lived write credential
    ///
    /// # Errors
    ///
    /// Returns `Invalid` for a disallowed MIME type or an oversized
    /// declaration.
    pub fn grant(
        &self,
        issuer_user_id: &str,
        filename: &str,
        mime: &str,
        declared_size: u64,
    ) -> Result<UploadGrant> {
        if declared_size > self.config.max_size_bytes {
            return Err(Error::Invalid("file exceeds the size limit".to_string()));
        }
        if !ALLOWED_MIME.contains(&mime) {
            return Err(Error::Invalid(format!("file type '{mime}' not allowed")));
        }

        let key = object_key(filename);
        let put_expiry = self.config.put_expiry.min(MAX_PUT_EXPIRY);
        let expires_at = Utc::now()
            + chrono::Duration::from_std(put_expiry).unwrap_or(chrono::Duration::seconds(600));

        let put_url = self.presign("PUT", &key, Some(mime), expires_at);

        self.pending.lock().expect("broker lock").insert(
            key.clone(),
            PendingUpload {
                mime: mime.to_string(),
                issuer_user_id: issuer_user_id.to_string(),
                expires_at,
                consumed: false,
            },
        );

        Ok(UploadGrant { key, put_url })
    }

    /// Confirm an upload: the commit point
    ///
    /// Marks the pending upload consumed (compare-and-set), classifies the
    /// message kind, and returns the attachment plus a read credential.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown or expired key, `Conflict` for an already
    /// consumed one, `Forbidden` when someone else granted the key.
    pub fn confirm(
        &self,
        user_id: &str,
        key: &str,
        filename: &str,
        mime: &str,
    ) -> Result<ConfirmedUpload> {
        let now = Utc::now();
        let mut pending = self.pending.lock().expect("broker lock");

        let entry = pending
            .get_mut(key)
            .ok_or_else(|| Error::NotFound("pending upload".to_string()))?;

        if entry.expires_at < now {
            pending.remove(key);
            return Err(Error::NotFound("pending upload".to_string()));
        }
        if entry.issuer_user_id != user_id {
            return Err(Error::Forbidden("upload belongs to another user".to_string()));
        }
        if entry.consumed {
            return Err(Error::Conflict("upload already confirmed".to_string()));
        }
        entry.consumed = true;

        let mime = if mime.is_empty() { &entry.mime } else { mime };
        let kind = MessageKind::from_mime(mime);
        let get_expiry = chrono::Duration::from_std(self.config.get_expiry)
            .unwrap_or(chrono::Duration::seconds(3600));
        let get_url = self.presign("GET", key, None, now + get_expiry);

        Ok(ConfirmedUpload {
            attachment: AttachmentRef {
                bucket: self.config.bucket.clone(),
                key: key.to_string(),
                filename: filename.to_string(),
                mime: mime.to_string(),
            },
            kind,
            get_url,
        })
    }

    /// Read credential for an existing attachment (history display)
    #[must_use]
    pub fn read_url(&self, key: &str) -> String {
        let get_expiry = chrono::Duration::from_std(self.config.get_expiry)
            .unwrap_or(chrono::Duration::seconds(3600));
        self.presign("GET", key, None, Utc::now() + get_expiry)
    }

    fn presign(
        &self,
        method: &str,
        key: &str,
        mime: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> String {
        let expiry = expires_at.timestamp();
        let payload = format!("{method}\n{key}\n{}\n{expiry}", mime.unwrap_or(""));
        let signature = self.signer.sign(payload.as_bytes());
        let mut url = format!(
            "{}/{}/{key}?expires={expiry}&signature={signature}",
            self.config.public_base_url, self.config.bucket
        );
        if let Some(mime) = mime {
            url.push_str(&format!("&content-type={}", urlencode(mime)));
        }
        url
    }
}

/// Object key: `messages/<yyyy>/<mm>/<dd>/<random>.<ext>`
fn object_key(filename: &str) -> String {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8)
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();

    let mut random = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut random);

    let now = Utc::now();
    format!(
        "messages/{:04}/{:02}/{:02}/{}{ext}",
        now.year(),
        now.month(),
        now.day(),
        hex::encode(random)
    )
}

fn urlencode(value: &str) -> String {
    value.replace('/', "%2F").replace('+', "%2B")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker() -> UploadBroker {
        let config = UploadConfig {
            bucket: "chat-uploads".to_string(),
            public_base_url: "http://localhost:9000".to_string(),
            max_size_bytes: 15 * 1024 * 1024,
            put_expiry: Duration::from_secs(300),
            get_expiry: Duration::from_secs(3600),
        };
        UploadBroker::new(config, TokenSigner::new("secret", Duration::from_secs(60)))
    }

    #[test]
    fn test_grant_shapes_object_key() {
        let broker = broker();
        let grant = broker
            .grant("alice", "Foto de Perfil.PNG", "image/png", 1024)
            .unwrap();
        assert!(grant.key.starts_with("messages/"));
        assert!(grant.key.ends_with(".png"));
        assert!(grant.put_url.contains(&grant.key));
        assert!(grant.put_url.contains("signature="));
    }

    #[test]
    fn test_size_boundary() {
        let broker = broker();
        let max = 15 * 1024 * 1024;

        assert!(broker.grant("alice", "x.png", "image/png", max).is_ok());
        let err = broker
            .grant("alice", "x.png", "image/png", max + 1)
            .unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[test]
    fn test_disallowed_mime_rejected() {
        let broker = broker();
        let err = broker
            .grant("alice", "x.exe", "application/x-msdownload", 10)
            .unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[test]
    fn test_confirm_classifies_kind() {
        let broker = broker();
        let grant = broker.grant("alice", "x.png", "image/png", 10).unwrap();

        let confirmed = broker
            .confirm("alice", &grant.key, "x.png", "image/png")
            .unwrap();
        assert_eq!(confirmed.kind, MessageKind::Image);
        assert_eq!(confirmed.attachment.bucket, "chat-uploads");

        let grant = broker.grant("alice", "v.ogg", "audio/ogg", 10).unwrap();
        let confirmed = broker
            .confirm("alice", &grant.key, "v.ogg", "audio/ogg")
            .unwrap();
        assert_eq!(confirmed.kind, MessageKind::Audio);
    }

    #[test]
    fn test_double_confirm_conflicts() {
        let broker = broker();
        let grant = broker.grant("alice", "x.png", "image/png", 10).unwrap();

        broker
            .confirm("alice", &grant.key, "x.png", "image/png")
            .unwrap();
        let err = broker
            .confirm("alice", &grant.key, "x.png", "image/png")
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_unknown_key_not_found() {
        let broker = broker();
        let err = broker
            .confirm("alice", "messages/2025/01/01/nope.png", "x.png", "image/png")
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_foreign_confirm_forbidden() {
        let broker = broker();
        let grant = broker.grant("alice", "x.png", "image/png", 10).unwrap();

        let err = broker
            .confirm("mallory", &grant.key, "x.png", "image/png")
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }
}
