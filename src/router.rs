//! Router / Orchestrator: the central decision function
//!
//! Every inbound message flows through here. Each conversation is a
//! serialization domain: one worker task per conversation id consumes an
//! mpsc queue in arrival order, while different conversations run fully
//! parallel. External calls happen inside the worker, bounded by their own
//! deadlines.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Timelike, Utc};
use tokio::sync::{mpsc, Mutex};

use crate::agents::{AgentRegistry, AgentReply};
use crate::channels::ChannelSet;
use crate::config::HandoverConfig;
use crate::db::{
    DeliveryStatus, HandoverRepo, MessageRepo, NewHandover, NewMessage, StoredMessage, UserRepo,
};
use crate::handover::{self, LowConfidenceTracker};
use crate::nlu::{Analysis, Classifier, Speaker};
use crate::realtime::{MessagePayload, Registry, RoomKey, WsOutgoing};
use crate::scheduling::{Effect, Scheduler};
use crate::Result;

/// Queue depth per conversation worker
const WORKER_QUEUE: usize = 64;

/// Messages snapshotted into a handover ticket
const TICKET_SNAPSHOT: usize = 5;

/// Where a message came from, when it came from an external channel
#[derive(Debug, Clone)]
pub struct ChannelOrigin {
    pub channel: String,
    pub recipient: String,
}

/// A normalized inbound message, from any transport
#[derive(Debug, Clone)]
pub struct Inbound {
    pub conversation_id: String,
    pub author_id: String,
    pub author_name: String,
    pub text: String,
    pub speaker: Speaker,
    pub temp_id: Option<String>,
    pub provider_msg_id: Option<String>,
    /// Set when the client emitted this from an open agent panel
    pub agent_panel: Option<String>,
    pub contact_id: Option<String>,
    pub origin: Option<ChannelOrigin>,
}

struct RouterInner {
    registry: Arc<Registry>,
    users: UserRepo,
    messages: MessageRepo,
    handovers: HandoverRepo,
    agents: Arc<AgentRegistry>,
    scheduler: Arc<Scheduler>,
    classifier: Classifier,
    channels: Arc<ChannelSet>,
    handover_config: HandoverConfig,
    low_confidence: LowConfidenceTracker,
    workers: Mutex<HashMap<String, mpsc::Sender<Inbound>>>,
}

/// The orchestrator
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        users: UserRepo,
        messages: MessageRepo,
        handovers: HandoverRepo,
        agents: Arc<AgentRegistry>,
        scheduler: Arc<Scheduler>,
        classifier: Classifier,
        channels: Arc<ChannelSet>,
        handover_config: HandoverConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                registry,
                users,
                messages,
                handovers,
                agents,
                scheduler,
                classifier,
                channels,
                handover_config,
                low_confidence: LowConfidenceTracker::new(),
                workers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Enqueue a message onto its conversation's serialization domain
    ///
    /// # Errors
    ///
    /// Returns error when the worker queue is gone, which only happens at
    /// shutdown.
    pub async fn dispatch(&self, inbound: Inbound) -> Result<()> {
        let sender = {
            let mut workers = self.inner.workers.lock().await;
            match workers.get(&inbound.conversation_id) {
                Some(sender) if !sender.is_closed() => sender.clone(),
                _ => {
                    let (tx, rx) = mpsc::channel(WORKER_QUEUE);
                    workers.insert(inbound.conversation_id.clone(), tx.clone());
                    let router = self.clone();
                    tokio::spawn(router.run_worker(rx));
                    tx
                }
            }
        };

        sender
            .send(inbound)
            .await
            .map_err(|_| crate::Error::Config("conversation worker gone".to_string()))
    }

    /// Process one message synchronously, bypassing the queue
    ///
    /// Tests drive this directly; production traffic goes through
    /// `dispatch`.
    pub async fn handle(&self, inbound: Inbound) {
        self.inner.handle(inbound).await;
    }

    async fn run_worker(self, mut rx: mpsc::Receiver<Inbound>) {
        while let Some(inbound) = rx.recv().await {
            self.inner.handle(inbound).await;
        }
    }

    /// Bulk read-cursor advance plus delivery fan-out
    ///
    /// # Errors
    ///
    /// Returns error if the store operation fails
    pub async fn mark_read(&self, conversation_id: &str, reader_id: &str) -> Result<usize> {
        let advanced = self
            .inner
            .messages
            .mark_conversation_read(conversation_id, reader_id, None)?;

        let rooms = [RoomKey::Conversation(conversation_id.to_string())];
        for message_id in &advanced {
            self.inner
                .registry
                .emit(
                    &rooms,
                    &WsOutgoing::Delivery {
                        message_id: message_id.clone(),
                        status: DeliveryStatus::Read.as_str().to_string(),
                    },
                )
                .await;
        }

        Ok(advanced.len())
    }

    /// Apply scheduling effects produced outside the normal flow
    /// (slot-picker callback, operator confirmation)
    pub async fn apply_scheduling_effects(
        &self,
        conversation_id: &str,
        agent_key: &str,
        customer_id: &str,
        origin: Option<&ChannelOrigin>,
        effects: Vec<Effect>,
    ) {
        self.inner
            .apply_effects(conversation_id, agent_key, customer_id, None, origin, effects)
            .await;
    }

    #[must_use]
    pub fn registry(&self) -> Arc<Registry> {
        self.inner.registry.clone()
    }

    #[must_use]
    pub fn scheduler(&self) -> Arc<Scheduler> {
        self.inner.scheduler.clone()
    }
}

impl RouterInner {
    async fn handle(&self, inbound: Inbound) {
        // 1. Persist (pending → sent happens at append; retries with the
        //    same tempId land on the stored row)
        let mut new_message = NewMessage::text(
            &inbound.conversation_id,
            &inbound.author_id,
            &inbound.text,
        );
        new_message.status = DeliveryStatus::Sent;
        new_message.client_temp_id = inbound.temp_id.clone();
        new_message.provider_msg_id = inbound.provider_msg_id.clone();
        new_message.agent_key = inbound.agent_panel.clone();
        new_message.contact_id = inbound.contact_id.clone();

        let stored = match self.messages.append(new_message) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::error!(error = %e, "append failed");
                self.registry
                    .emit(
                        &[RoomKey::User(inbound.author_id.clone())],
                        &WsOutgoing::Error {
                            code: "internal".to_string(),
                            message: "internal error".to_string(),
                        },
                    )
                    .await;
                return;
            }
        };

        // 2. Decide whether the bot pipeline applies, then classify while
        //    the echo is still cheap to assemble
        let has_open_ticket = self
            .handovers
            .has_open(&inbound.conversation_id)
            .unwrap_or(false);

        let mention = if inbound.agent_panel.is_none() {
            self.agents.detect_mention(&inbound.text).unwrap_or(None)
        } else {
            None
        };

        let should_classify = !has_open_ticket
            && inbound.speaker == Speaker::Customer
            && mention.is_none()
            && inbound.agent_panel.is_none();
        let analysis = if should_classify {
            Some(self.classifier.analyze(&inbound.text, Speaker::Customer).await)
        } else {
            None
        };

        // 3. Fan out the echo to every subscriber
        self.broadcast_inbound(&inbound, &stored, analysis.as_ref())
            .await;

        // 4. An open ticket suppresses every bot path
        if has_open_ticket {
            return;
        }

        // Channel-originated customers get the full bot pipeline; web
        // users chatting with each other only reach agents through
        // mentions and panels
        let auto_routed = inbound.origin.is_some() && inbound.speaker == Speaker::Customer;

        // 5. An active scheduling attempt consumes follow-ups first
        if auto_routed {
            if let Some(analysis) = &analysis {
                if let Some(effects) = self
                    .scheduler
                    .handle_followup(&inbound.conversation_id, "sdr", &analysis.entities)
                    .await
                {
                    self.apply_effects(
                        &inbound.conversation_id,
                        "sdr",
                        &inbound.author_id,
                        inbound.contact_id.as_deref(),
                        inbound.origin.as_ref(),
                        effects,
                    )
                    .await;
                    return;
                }
            }
        }

        // 6. Handover triggers, evaluated only for auto-routed traffic
        if auto_routed {
            if let Some(analysis) = &analysis {
                let streak = self.low_confidence.observe(
                    &inbound.conversation_id,
                    analysis.confidence,
                    self.handover_config.low_confidence_threshold,
                );
                if let Some(trigger) = handover::evaluate(analysis, streak, self.out_of_hours()) {
                    self.open_ticket(&inbound, analysis, trigger).await;
                    return;
                }
            }
        }

        // 7. Resolve the addressee
        let (agent, text) = if let Some((agent, cleaned)) = mention {
            (agent, cleaned)
        } else if let Some(panel_key) = &inbound.agent_panel {
            match self.agents.resolve(panel_key) {
                Ok(Some(agent)) => (agent, inbound.text.clone()),
                _ => {
                    tracing::warn!(agent_key = %panel_key, "panel message for unknown agent");
                    return;
                }
            }
        } else if auto_routed {
            let Some(analysis) = &analysis else { return };
            let key = analysis
                .intent
                .suggested_agent()
                .unwrap_or(AgentRegistry::default_agent().key());
            match self.agents.resolve(key) {
                Ok(Some(agent)) => (agent, inbound.text.clone()),
                _ => return,
            }
        } else {
            // Human-to-human timeline message with no mention: plain chat
            return;
        };

        // 8. Invoke the agent with bounded history and entities
        let history = self
            .messages
            .tail(&inbound.conversation_id, 20)
            .unwrap_or_default();
        let entities = analysis
            .as_ref()
            .map(|a| a.entities.clone())
            .unwrap_or_default();

        let reply = self
            .agents
            .respond(&agent, &history, &inbound.author_name, &text, &entities)
            .await;

        match reply {
            AgentReply::Text(reply_text) => {
                self.apply_effects(
                    &inbound.conversation_id,
                    agent.key(),
                    &inbound.author_id,
                    inbound.contact_id.as_deref(),
                    inbound.origin.as_ref(),
                    vec![Effect::Reply(reply_text)],
                )
                .await;

                // A confirmation from the operator side releases a held
                // proposal; the attempt lives under the customer
                // conversation the panel points at
                if inbound.speaker == Speaker::Agent
                    && text.to_lowercase().contains("confirmar")
                {
                    let target = inbound
                        .contact_id
                        .clone()
                        .unwrap_or_else(|| inbound.conversation_id.clone());
                    let effects = self.scheduler.confirm_pending(&target, agent.key()).await;
                    self.apply_effects(
                        &target,
                        agent.key(),
                        &inbound.author_id,
                        None,
                        inbound.origin.as_ref(),
                        effects,
                    )
                    .await;
                }
            }
            AgentReply::ToolCall { name, arguments } => {
                let effects = self
                    .scheduler
                    .handle_tool_call(&inbound.conversation_id, agent.key(), &name, &arguments)
                    .await;
                self.apply_effects(
                    &inbound.conversation_id,
                    agent.key(),
                    &inbound.author_id,
                    inbound.contact_id.as_deref(),
                    inbound.origin.as_ref(),
                    effects,
                )
                .await;
            }
        }
    }

    fn out_of_hours(&self) -> bool {
        let (Some(start), Some(end)) = (
            self.handover_config.office_hours_start,
            self.handover_config.office_hours_end,
        ) else {
            return false;
        };
        let hour = Utc::now().hour();
        hour < start || hour >= end
    }

    async fn broadcast_inbound(
        &self,
        inbound: &Inbound,
        stored: &StoredMessage,
        analysis: Option<&Analysis>,
    ) {
        if let Some(agent_key) = &inbound.agent_panel {
            let event = WsOutgoing::AgentMessage {
                agent_key: agent_key.clone(),
                contact_id: inbound.contact_id.clone(),
                id: stored.id.clone(),
                author: inbound.author_name.clone(),
                text: stored.text.clone(),
                timestamp: stored.created_at.timestamp_millis(),
            };
            let rooms = [
                RoomKey::AgentPanel {
                    user_id: inbound.author_id.clone(),
                    agent_key: agent_key.clone(),
                },
                RoomKey::User(inbound.author_id.clone()),
            ];
            self.registry.emit(&rooms, &event).await;
            return;
        }

        let mut payload = MessagePayload::from_stored(stored, &inbound.author_name);
        if let Some(analysis) = analysis {
            payload = payload.with_analysis(analysis.intent, analysis.confidence, analysis.method);
        }

        let rooms = [
            RoomKey::Conversation(inbound.conversation_id.clone()),
            RoomKey::User(inbound.author_id.clone()),
        ];
        self.registry
            .emit(&rooms, &WsOutgoing::NewMessage(payload))
            .await;
    }

    async fn open_ticket(
        &self,
        inbound: &Inbound,
        analysis: &Analysis,
        trigger: handover::Trigger,
    ) {
        let customer = self.users.find_by_id(&inbound.author_id).ok().flatten();
        let snapshot: Vec<String> = self
            .messages
            .tail(&inbound.conversation_id, TICKET_SNAPSHOT)
            .unwrap_or_default()
            .iter()
            .map(|msg| format!("{}: {}", msg.author_id, msg.text))
            .collect();

        let new_ticket = NewHandover {
            conversation_id: inbound.conversation_id.clone(),
            customer_name: Some(inbound.author_name.clone()),
            customer_email: customer
                .as_ref()
                .and_then(|user| user.email.clone())
                .or_else(|| {
                    analysis
                        .entities
                        .get("email")
                        .and_then(|entity| entity.normalized.clone())
                }),
            customer_phone: analysis
                .entities
                .get("phone")
                .and_then(|entity| entity.normalized.clone()),
            intent: Some(analysis.intent.as_str().to_string()),
            entities: serde_json::to_value(&analysis.entities).unwrap_or_default(),
            last_messages: snapshot,
            tags: Vec::new(),
        };

        match self
            .handovers
            .create(new_ticket, trigger.reason, trigger.priority)
        {
            Ok(ticket) => {
                tracing::info!(
                    ticket_id = %ticket.id,
                    reason = trigger.reason.as_str(),
                    priority = trigger.priority,
                    "conversation escalated to a human"
                );
                self.low_confidence.reset(&inbound.conversation_id);

                // One final customer-facing acknowledgement
                let ack = handover::customer_message_for(trigger.reason);
                self.apply_effects(
                    &inbound.conversation_id,
                    AgentRegistry::default_agent().key(),
                    &inbound.author_id,
                    inbound.contact_id.as_deref(),
                    inbound.origin.as_ref(),
                    vec![Effect::Reply(ack.to_string())],
                )
                .await;
            }
            Err(e) => tracing::error!(error = %e, "handover ticket creation failed"),
        }
    }

    /// Persist, broadcast, and externally dispatch a batch of effects
    async fn apply_effects(
        &self,
        conversation_id: &str,
        agent_key: &str,
        customer_id: &str,
        contact_id: Option<&str>,
        origin: Option<&ChannelOrigin>,
        effects: Vec<Effect>,
    ) {
        let display_name = self
            .agents
            .resolve(agent_key)
            .ok()
            .flatten()
            .map_or_else(|| agent_key.to_string(), |agent| agent.display_name().to_string());

        for effect in effects {
            match effect {
                Effect::Reply(text) => {
                    self.send_agent_reply(
                        conversation_id,
                        agent_key,
                        &display_name,
                        customer_id,
                        contact_id,
                        origin,
                        &text,
                    )
                    .await;
                }
                Effect::ShowSlotPicker {
                    customer_email,
                    customer_phone,
                    working_days,
                    working_hours,
                    default_duration_minutes,
                } => {
                    let event = WsOutgoing::ShowSlotPicker {
                        agent_key: agent_key.to_string(),
                        customer_email,
                        customer_phone,
                        working_days,
                        working_hours,
                        default_duration_minutes,
                    };
                    self.registry
                        .emit(&[RoomKey::User(customer_id.to_string())], &event)
                        .await;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_agent_reply(
        &self,
        conversation_id: &str,
        agent_key: &str,
        display_name: &str,
        customer_id: &str,
        contact_id: Option<&str>,
        origin: Option<&ChannelOrigin>,
        text: &str,
    ) {
        let author = match self.users.find_or_create_agent(agent_key, display_name) {
            Ok(author) => author,
            Err(e) => {
                tracing::error!(error = %e, "agent author lookup failed");
                return;
            }
        };

        let mut reply = NewMessage::text(conversation_id, &author.id, text);
        reply.agent_key = Some(agent_key.to_string());
        reply.contact_id = contact_id.map(String::from);

        let stored = match self.messages.append(reply) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::error!(error = %e, "agent reply append failed");
                return;
            }
        };

        // Panel replies stay in the panel room; timeline replies go to the
        // conversation plus the customer's devices
        if crate::db::message::is_agent_panel_key(conversation_id) {
            let event = WsOutgoing::AgentMessage {
                agent_key: agent_key.to_string(),
                contact_id: contact_id.map(String::from),
                id: stored.id.clone(),
                author: display_name.to_string(),
                text: stored.text.clone(),
                timestamp: stored.created_at.timestamp_millis(),
            };
            let rooms = [
                RoomKey::AgentPanel {
                    user_id: customer_id.to_string(),
                    agent_key: agent_key.to_string(),
                },
                RoomKey::Conversation(conversation_id.to_string()),
            ];
            self.registry.emit(&rooms, &event).await;
        } else {
            let payload = MessagePayload::from_stored(&stored, display_name);
            let rooms = [
                RoomKey::Conversation(conversation_id.to_string()),
                RoomKey::User(customer_id.to_string()),
            ];
            self.registry
                .emit(&rooms, &WsOutgoing::NewMessage(payload))
                .await;
        }

        // 9. Channel-originated conversations also get the reply on their
        //    originating channel; failure stalls delivery at `sent`
        if let Some(origin) = origin {
            match self
                .channels
                .send(&origin.channel, &origin.recipient, text)
                .await
            {
                Ok(provider_id) => {
                    tracing::debug!(channel = %origin.channel, provider_id = %provider_id, "reply relayed");
                    if let Ok(Some(status)) =
                        self.messages.transition(&stored.id, DeliveryStatus::Delivered)
                    {
                        self.registry
                            .emit(
                                &[RoomKey::Conversation(conversation_id.to_string())],
                                &WsOutgoing::Delivery {
                                    message_id: stored.id.clone(),
                                    status: status.as_str().to_string(),
                                },
                            )
                            .await;
                    }
                }
                Err(e) => {
                    tracing::warn!(channel = %origin.channel, error = %e, "channel relay failed");
                }
            }
        }
    }
}

