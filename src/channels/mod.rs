//! Outbound channel adapters and inbound normalization
//!
//! Each adapter exposes `send(recipient, text) → provider message id`; the
//! inbound side normalizes webhook payloads into one shape the router
//! consumes. Redelivery of the same provider-native id is deduped both
//! here (cheap cache) and in the message store (durable unique index).

mod device_session;
mod meta;
mod whatsapp;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::config::ChannelsConfig;
use crate::{Error, Result};

pub use device_session::DeviceSessionChannel;
pub use meta::MetaChannel;
pub use whatsapp::{WhatsAppChannel, WhatsAppWebhook};

/// Default dedup TTL (5 minutes)
const DEDUP_TTL_SECS: u64 = 300;

/// Maximum dedup cache entries
const DEDUP_MAX_ENTRIES: usize = 2000;

/// A message arriving from an external channel, normalized
#[derive(Debug, Clone)]
pub struct InboundChannelMessage {
    pub channel: String,
    pub sender_id: String,
    pub sender_name: String,
    pub provider_msg_id: String,
    pub text: String,
}

/// Outbound contract every adapter implements
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Send a text; returns the provider-native message id
    async fn send(&self, recipient: &str, text: &str) -> Result<String>;
}

/// The set of configured adapters, with deadline-bounded dispatch
pub struct ChannelSet {
    adapters: HashMap<&'static str, Arc<dyn ChannelAdapter>>,
    deadline: Duration,
}

impl ChannelSet {
    #[must_use]
    pub fn from_config(config: &ChannelsConfig) -> Self {
        let mut adapters: HashMap<&'static str, Arc<dyn ChannelAdapter>> = HashMap::new();

        if let (Some(token), Some(phone_id)) =
            (&config.whatsapp_token, &config.whatsapp_phone_id)
        {
            let adapter = Arc::new(WhatsAppChannel::new(token.clone(), phone_id.clone()));
            adapters.insert(adapter.name(), adapter);
        }
        if let Some(token) = &config.meta_page_token {
            let instagram = Arc::new(MetaChannel::instagram(token.clone()));
            adapters.insert(instagram.name(), instagram);
            let facebook = Arc::new(MetaChannel::facebook(token.clone()));
            adapters.insert(facebook.name(), facebook);
        }
        if let Some(base_url) = &config.device_session_url {
            let adapter = Arc::new(DeviceSessionChannel::new(base_url.clone()));
            adapters.insert(adapter.name(), adapter);
        }

        Self {
            adapters,
            deadline: config.send_deadline,
        }
    }

    /// Empty set, for tests and channel-less deployments
    #[must_use]
    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
            deadline: Duration::from_secs(15),
        }
    }

    /// Register an adapter explicitly (tests)
    pub fn register(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        self.adapters.insert(adapter.name(), adapter);
    }

    #[must_use]
    pub fn has(&self, channel: &str) -> bool {
        self.adapters.contains_key(channel)
    }

    /// Deadline-bounded send
    ///
    /// # Errors
    ///
    /// `NotFound` for an unconfigured channel; `Unavailable` on deadline;
    /// adapter errors pass through as `Channel`.
    pub async fn send(&self, channel: &str, recipient: &str, text: &str) -> Result<String> {
        let adapter = self
            .adapters
            .get(channel)
            .ok_or_else(|| Error::NotFound(format!("channel '{channel}'")))?;

        tokio::time::timeout(self.deadline, adapter.send(recipient, text))
            .await
            .map_err(|_| Error::Unavailable(format!("channel '{channel}' deadline exceeded")))?
    }
}

/// Inbound redelivery cache
///
/// Prevents processing the same webhook delivery twice. TTL-based eviction
/// with a hard cap on entries.
#[derive(Debug)]
pub struct InboundDedup {
    cache: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
    max_entries: usize,
}

impl Default for InboundDedup {
    fn default() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            ttl: Duration::from_secs(DEDUP_TTL_SECS),
            max_entries: DEDUP_MAX_ENTRIES,
        }
    }
}

impl InboundDedup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the key was already seen within the TTL; records
    /// it on first sight
    pub fn is_duplicate(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut cache = self.cache.lock().expect("dedup lock");

        if cache.len() >= self.max_entries {
            cache.retain(|_, seen| now.duration_since(*seen) < self.ttl);
        }
        if cache.len() >= self.max_entries {
            if let Some(oldest) = cache
                .iter()
                .min_by_key(|(_, seen)| **seen)
                .map(|(k, _)| k.clone())
            {
                cache.remove(&oldest);
            }
        }

        if let Some(seen) = cache.get(key) {
            if now.duration_since(*seen) < self.ttl {
                return true;
            }
        }

        cache.insert(key.to_string(), now);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_first_sight_then_duplicate() {
        let dedup = InboundDedup::new();
        assert!(!dedup.is_duplicate("wamid.1"));
        assert!(dedup.is_duplicate("wamid.1"));
        assert!(!dedup.is_duplicate("wamid.2"));
    }

    #[tokio::test]
    async fn test_unconfigured_channel_is_not_found() {
        let set = ChannelSet::empty();
        let err = set.send("whatsapp", "+5511", "oi").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    struct SlowAdapter;

    #[async_trait]
    impl ChannelAdapter for SlowAdapter {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn send(&self, _recipient: &str, _text: &str) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("never".to_string())
        }
    }

    #[tokio::test]
    async fn test_send_deadline_enforced() {
        let mut set = ChannelSet::empty();
        set.deadline = Duration::from_millis(20);
        set.register(Arc::new(SlowAdapter));

        let err = set.send("slow", "x", "oi").await.unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
    }
}
