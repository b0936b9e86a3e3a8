//! Shared test utilities: in-memory wiring with scripted externals
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use concourse::agents::{AgentRegistry, LlmClient, LlmOutcome, LlmRequest};
use concourse::channels::{ChannelAdapter, ChannelSet};
use concourse::config::{HandoverConfig, SchedulingConfig};
use concourse::db::{
    self, CalendarRepo, CustomAgentRepo, DbPool, HandoverRepo, MessageRepo, UserRepo,
};
use concourse::nlu::{Classifier, Intent, IntentModel, Speaker};
use concourse::realtime::Registry;
use concourse::scheduling::{
    BusyInterval, CalendarProvider, CreatedEvent, EventRequest, Scheduler,
};
use concourse::{Error, Result, Router};

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// Calendar double that counts provider-side inserts
pub struct RecordingCalendar {
    pub creates: AtomicUsize,
    pub fail: bool,
    known_keys: Mutex<Vec<String>>,
}

impl RecordingCalendar {
    #[must_use]
    pub fn new(fail: bool) -> Self {
        Self {
            creates: AtomicUsize::new(0),
            fail,
            known_keys: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CalendarProvider for RecordingCalendar {
    async fn create_event(&self, request: &EventRequest) -> Result<CreatedEvent> {
        if self.fail {
            return Err(Error::Unavailable("provider down".to_string()));
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.known_keys
            .lock()
            .unwrap()
            .push(request.dedup_key.clone());
        Ok(CreatedEvent {
            id: format!("evt-{}", self.creates.load(Ordering::SeqCst)),
            meeting_url: Some("https://meet.example/demo".to_string()),
            calendar_url: Some("https://cal.example/demo".to_string()),
        })
    }

    async fn busy_intervals(&self, _date: NaiveDate) -> Result<Vec<BusyInterval>> {
        Ok(Vec::new())
    }

    async fn find_by_dedup_key(&self, dedup_key: &str) -> Result<Option<CreatedEvent>> {
        let known = self.known_keys.lock().unwrap();
        Ok(known.iter().any(|key| key == dedup_key).then(|| CreatedEvent {
            id: "evt-recovered".to_string(),
            meeting_url: Some("https://meet.example/demo".to_string()),
            calendar_url: Some("https://cal.example/demo".to_string()),
        }))
    }

    async fn cancel_event(&self, _event_id: &str) -> Result<()> {
        Ok(())
    }
}

/// LLM double that replays a scripted outcome and counts invocations
pub struct ScriptedLlm {
    outcome: Mutex<LlmOutcome>,
    pub calls: AtomicUsize,
}

impl ScriptedLlm {
    #[must_use]
    pub fn text(reply: &str) -> Self {
        Self {
            outcome: Mutex::new(LlmOutcome::Text(reply.to_string())),
            calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn tool_call(name: &str, arguments: serde_json::Value) -> Self {
        Self {
            outcome: Mutex::new(LlmOutcome::ToolCall {
                name: name.to_string(),
                arguments,
            }),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_outcome(&self, outcome: LlmOutcome) {
        *self.outcome.lock().unwrap() = outcome;
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn respond(&self, _request: LlmRequest<'_>) -> Result<LlmOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.outcome.lock().unwrap().clone())
    }
}

/// Intent-model double with a fixed verdict
pub struct ScriptedIntent(pub Intent, pub f64);

#[async_trait]
impl IntentModel for ScriptedIntent {
    async fn classify(&self, _text: &str, _speaker: Speaker) -> Result<(Intent, f64)> {
        Ok((self.0, self.1))
    }
}

/// Intent-model double that always fails (endpoint 500)
pub struct BrokenIntent;

#[async_trait]
impl IntentModel for BrokenIntent {
    async fn classify(&self, _text: &str, _speaker: Speaker) -> Result<(Intent, f64)> {
        Err(Error::Unavailable("endpoint returned 500".to_string()))
    }
}

/// Channel double recording outbound relays
pub struct RecordingChannel {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingChannel {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ChannelAdapter for RecordingChannel {
    fn name(&self) -> &'static str {
        "whatsapp"
    }

    async fn send(&self, recipient: &str, text: &str) -> Result<String> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((recipient.to_string(), text.to_string()));
        Ok(format!("wamid.out.{}", sent.len()))
    }
}

pub fn scheduling_config() -> SchedulingConfig {
    SchedulingConfig {
        calendar_base_url: String::new(),
        calendar_token: None,
        working_hours_start: 9,
        working_hours_end: 18,
        slot_minutes: 60,
        days_ahead: 5,
        auto_commit: true,
        deadline: Duration::from_secs(5),
    }
}

/// Fully wired router over in-memory storage and scripted externals
pub struct Harness {
    pub pool: DbPool,
    pub router: Router,
    pub registry: Arc<Registry>,
    pub users: UserRepo,
    pub messages: MessageRepo,
    pub handovers: HandoverRepo,
    pub commitments: CalendarRepo,
    pub provider: Arc<RecordingCalendar>,
    pub llm: Arc<ScriptedLlm>,
    pub channel: Arc<RecordingChannel>,
}

#[must_use]
pub fn harness(llm: Arc<ScriptedLlm>, model: Option<Arc<dyn IntentModel>>) -> Harness {
    let pool = setup_test_db();
    let users = UserRepo::new(pool.clone());
    let messages = MessageRepo::new(pool.clone());
    let handovers = HandoverRepo::new(pool.clone());
    let commitments = CalendarRepo::new(pool.clone());

    let registry = Arc::new(Registry::new());
    let provider = Arc::new(RecordingCalendar::new(false));
    let scheduler = Arc::new(Scheduler::new(
        provider.clone(),
        commitments.clone(),
        scheduling_config(),
    ));

    let agents = Arc::new(AgentRegistry::new(
        CustomAgentRepo::new(pool.clone()),
        llm.clone(),
        600,
    ));

    let classifier = match model {
        Some(model) => Classifier::with_model(model),
        None => Classifier::rule_based(),
    };

    let channel = Arc::new(RecordingChannel::new());
    let mut channels = ChannelSet::empty();
    channels.register(channel.clone());

    let router = Router::new(
        registry.clone(),
        users.clone(),
        messages.clone(),
        handovers.clone(),
        agents,
        scheduler,
        classifier,
        Arc::new(channels),
        HandoverConfig {
            low_confidence_threshold: 0.5,
            office_hours_start: None,
            office_hours_end: None,
        },
    );

    Harness {
        pool,
        router,
        registry,
        users,
        messages,
        handovers,
        commitments,
        provider,
        llm,
        channel,
    }
}
