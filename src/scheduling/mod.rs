//! Scheduling sub-protocol: from intent to calendar commitment
//!
//! A per-conversation state machine owned by the scheduling agent. The
//! commit step is the only external side effect in the core that must be
//! exactly-once: a dedup key derived from (conversation, start, email) is
//! recorded as a `proposed` commitment BEFORE the provider call, and
//! recovery after a crash queries the provider for that key before ever
//! retrying the insert.

pub mod calendar;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use sha2::{Digest, Sha256};

use crate::config::SchedulingConfig;
use crate::db::CalendarRepo;
use crate::nlu::Entity;
use crate::{Error, Result};

pub use calendar::{
    free_slots, next_working_days, BusyInterval, CalendarProvider, CreatedEvent, EventRequest,
    HttpCalendarProvider, Slot,
};

/// Apology when the provider fails; the customer never sees the cause
const COMMIT_FAILED_TEXT: &str =
    "Não consegui concluir o agendamento agora. 😕 Pode tentar novamente em alguns minutos?";

/// Per-conversation protocol state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    Idle,
    /// Scheduling intent detected, customer email not yet known
    AwaitingIdentity,
    /// Identity sufficient; slot picker emitted, waiting for the callback
    AwaitingSlot { email: Option<String> },
    /// Slot candidate held for operator confirmation
    Confirming { proposal: Proposal },
}

/// A slot candidate ready to commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub email: String,
    pub start: DateTime<Utc>,
}

/// What the state machine wants the router to do
#[derive(Debug, Clone)]
pub enum Effect {
    /// Persist and broadcast as a message authored by the agent
    Reply(String),
    /// Emit the slot-picker signal to the customer's UI
    ShowSlotPicker {
        customer_email: Option<String>,
        customer_phone: Option<String>,
        working_days: Vec<NaiveDate>,
        working_hours: (u32, u32),
        default_duration_minutes: u32,
    },
}

/// Dedup key for a commit attempt
#[must_use]
pub fn dedup_key(conversation_id: &str, start: DateTime<Utc>, email: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(conversation_id.as_bytes());
    hasher.update(b"|");
    hasher.update(start.to_rfc3339().as_bytes());
    hasher.update(b"|");
    hasher.update(email.to_lowercase().as_bytes());
    hex::encode(hasher.finalize())
}

/// The scheduler
pub struct Scheduler {
    provider: Arc<dyn CalendarProvider>,
    repo: CalendarRepo,
    config: SchedulingConfig,
    states: Mutex<HashMap<String, State>>,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        provider: Arc<dyn CalendarProvider>,
        repo: CalendarRepo,
        config: SchedulingConfig,
    ) -> Self {
        Self {
            provider,
            repo,
            config,
            states: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn state(&self, conversation_id: &str) -> State {
        self.states
            .lock()
            .expect("scheduler lock")
            .get(conversation_id)
            .cloned()
            .unwrap_or(State::Idle)
    }

    fn set_state(&self, conversation_id: &str, state: State) {
        let mut states = self.states.lock().expect("scheduler lock");
        if state == State::Idle {
            states.remove(conversation_id);
        } else {
            states.insert(conversation_id.to_string(), state);
        }
    }

    /// Drive the machine from a classified scheduling intent
    ///
    /// Entities may already carry email/date/time; when all three are
    /// present and `auto_commit` is on, this goes straight to the commit.
    pub async fn handle_intent(
        &self,
        conversation_id: &str,
        agent_key: &str,
        entities: &BTreeMap<String, Entity>,
    ) -> Vec<Effect> {
        let email = entities
            .get("email")
            .and_then(|entity| entity.normalized.clone());
        let date = entities
            .get("date")
            .and_then(|entity| entity.normalized.as_deref())
            .and_then(|value| NaiveDate::parse_from_str(value, "%Y-%m-%d").ok());
        let time = entities
            .get("time")
            .and_then(|entity| entity.normalized.as_deref())
            .and_then(|value| NaiveTime::parse_from_str(value, "%H:%M").ok());
        let phone = entities
            .get("phone")
            .and_then(|entity| entity.normalized.clone());

        match (email, date, time) {
            (Some(email), Some(date), Some(time)) => {
                let start = Utc.from_utc_datetime(&date.and_time(time));
                self.commit_or_confirm(conversation_id, agent_key, &email, start)
                    .await
            }
            (email, _, _) => {
                if email.is_none() {
                    self.set_state(conversation_id, State::AwaitingIdentity);
                } else {
                    self.set_state(
                        conversation_id,
                        State::AwaitingSlot {
                            email: email.clone(),
                        },
                    );
                }

                let mut effects = Vec::new();
                if email.is_none() {
                    effects.push(Effect::Reply(
                        "Claro! Para agendar, me passa seu email? Aí te mostro os \
                         horários livres. 📅"
                            .to_string(),
                    ));
                }
                effects.push(self.slot_picker(email, phone));
                effects
            }
        }
    }

    /// A later message in an active attempt may complete the identity
    pub async fn handle_followup(
        &self,
        conversation_id: &str,
        agent_key: &str,
        entities: &BTreeMap<String, Entity>,
    ) -> Option<Vec<Effect>> {
        match self.state(conversation_id) {
            State::AwaitingIdentity => {
                let email = entities.get("email").and_then(|e| e.normalized.clone())?;
                self.set_state(
                    conversation_id,
                    State::AwaitingSlot {
                        email: Some(email.clone()),
                    },
                );
                Some(self.handle_intent(conversation_id, agent_key, entities).await)
            }
            _ => None,
        }
    }

    /// The slot-picker callback: (date, time, email) chosen in the UI
    ///
    /// # Errors
    ///
    /// Returns `Invalid` for a slot in the past or outside working hours.
    pub async fn slot_callback(
        &self,
        conversation_id: &str,
        agent_key: &str,
        date: NaiveDate,
        time: NaiveTime,
        email: &str,
    ) -> Result<Vec<Effect>> {
        let start = Utc.from_utc_datetime(&date.and_time(time));
        if start <= Utc::now() {
            return Err(Error::Invalid("slot is in the past".to_string()));
        }
        let hour = chrono::Timelike::hour(&time);
        if hour < self.config.working_hours_start || hour >= self.config.working_hours_end {
            return Err(Error::Invalid("slot is outside working hours".to_string()));
        }

        Ok(self
            .commit_or_confirm(conversation_id, agent_key, email, start)
            .await)
    }

    /// Tool-call entry point from the agent registry
    pub async fn handle_tool_call(
        &self,
        conversation_id: &str,
        agent_key: &str,
        name: &str,
        arguments: &serde_json::Value,
    ) -> Vec<Effect> {
        match name {
            "schedule_meeting" => {
                let email = arguments["email"].as_str().unwrap_or_default().to_string();
                let date = arguments["date"]
                    .as_str()
                    .and_then(|value| NaiveDate::parse_from_str(value, "%Y-%m-%d").ok());
                let time = arguments["time"]
                    .as_str()
                    .and_then(|value| NaiveTime::parse_from_str(value, "%H:%M").ok());

                match (email.is_empty(), date, time) {
                    (false, Some(date), Some(time)) => {
                        let start = Utc.from_utc_datetime(&date.and_time(time));
                        self.commit_or_confirm(conversation_id, agent_key, &email, start)
                            .await
                    }
                    _ => {
                        self.set_state(conversation_id, State::AwaitingSlot { email: None });
                        vec![self.slot_picker(None, None)]
                    }
                }
            }
            "fetch_availability" => {
                let date = arguments["date"]
                    .as_str()
                    .and_then(|value| NaiveDate::parse_from_str(value, "%Y-%m-%d").ok())
                    .unwrap_or_else(|| (Utc::now() + Duration::days(1)).date_naive());
                vec![self.availability_reply(date).await]
            }
            other => {
                tracing::warn!(tool = other, "agent requested unknown tool");
                Vec::new()
            }
        }
    }

    /// Operator confirmation for a held proposal (`require_operator_ok`)
    pub async fn confirm_pending(&self, conversation_id: &str, agent_key: &str) -> Vec<Effect> {
        let State::Confirming { proposal } = self.state(conversation_id) else {
            return Vec::new();
        };
        self.commit(conversation_id, agent_key, &proposal.email, proposal.start)
            .await
    }

    /// Operator-created event, same exactly-once discipline as the agent
    /// path
    ///
    /// # Errors
    ///
    /// Returns `Conflict` when the same slot is already committed for this
    /// customer, `Unavailable` when the provider fails.
    #[allow(clippy::too_many_arguments)]
    pub async fn manual_event(
        &self,
        conversation_id: &str,
        agent_key: &str,
        email: &str,
        title: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<crate::db::CalendarCommitment> {
        let key = dedup_key(conversation_id, start, email);
        if let Some(existing) = self.repo.find_by_dedup_key(&key)? {
            if existing.status == crate::db::CommitmentStatus::Confirmed {
                return Err(Error::Conflict("slot already committed".to_string()));
            }
        }

        let row = match self.repo.propose(
            conversation_id,
            agent_key,
            email,
            title,
            start,
            end,
            &[email.to_string()],
            &key,
        ) {
            Ok(row) => row,
            Err(Error::Conflict(_)) => self
                .repo
                .find_by_dedup_key(&key)?
                .ok_or_else(|| Error::NotFound("commitment".to_string()))?,
            Err(e) => return Err(e),
        };

        let request = EventRequest {
            title: title.to_string(),
            description: String::new(),
            start,
            end,
            attendees: vec![email.to_string()],
            dedup_key: key,
        };

        let event = tokio::time::timeout(self.config.deadline, self.provider.create_event(&request))
            .await
            .map_err(|_| Error::Unavailable("calendar deadline exceeded".to_string()))??;

        self.repo.confirm(
            &row.id,
            &event.id,
            event.meeting_url.as_deref(),
            event.calendar_url.as_deref(),
        )?;

        self.repo
            .get(&row.id)?
            .ok_or_else(|| Error::NotFound("commitment".to_string()))
    }

    /// Cancel a commitment on the provider and locally
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown commitment, `Unavailable` when the
    /// provider fails.
    pub async fn cancel_event(&self, commitment_id: &str) -> Result<()> {
        let commitment = self
            .repo
            .get(commitment_id)?
            .ok_or_else(|| Error::NotFound("commitment".to_string()))?;

        if let Some(event_id) = &commitment.provider_event_id {
            tokio::time::timeout(self.config.deadline, self.provider.cancel_event(event_id))
                .await
                .map_err(|_| Error::Unavailable("calendar deadline exceeded".to_string()))??;
        }

        self.repo.cancel(commitment_id)
    }

    /// Whether one window on a date is entirely free
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` when the provider cannot be reached in time.
    pub async fn window_free(
        &self,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<bool> {
        let busy = tokio::time::timeout(self.config.deadline, self.provider.busy_intervals(date))
            .await
            .map_err(|_| Error::Unavailable("calendar deadline exceeded".to_string()))??;

        let window_start = Utc.from_utc_datetime(&date.and_time(start));
        let window_end = Utc.from_utc_datetime(&date.and_time(end));
        Ok(!busy
            .iter()
            .any(|interval| window_start < interval.end && window_end > interval.start))
    }

    /// Free slots for a date, as data (HTTP surface)
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` when the provider cannot be reached in time.
    pub async fn available_slots(&self, date: NaiveDate, duration_minutes: u32) -> Result<Vec<Slot>> {
        let busy = tokio::time::timeout(self.config.deadline, self.provider.busy_intervals(date))
            .await
            .map_err(|_| Error::Unavailable("calendar deadline exceeded".to_string()))??;

        let mut config = self.config.clone();
        config.slot_minutes = duration_minutes.clamp(15, 240);
        Ok(free_slots(date, &busy, &config, Utc::now()))
    }

    async fn availability_reply(&self, date: NaiveDate) -> Effect {
        match self.available_slots(date, self.config.slot_minutes).await {
            Ok(slots) if slots.is_empty() => Effect::Reply(format!(
                "Não encontrei horários livres em {}. Quer tentar outro dia?",
                date.format("%d/%m/%Y")
            )),
            Ok(slots) => {
                let listing: Vec<String> = slots
                    .iter()
                    .take(6)
                    .map(|slot| format!("• {} às {}", slot.start, slot.end))
                    .collect();
                Effect::Reply(format!(
                    "Horários livres em {}:\n{}",
                    date.format("%d/%m/%Y"),
                    listing.join("\n")
                ))
            }
            Err(e) => {
                tracing::warn!(error = %e, "availability query failed");
                Effect::Reply(COMMIT_FAILED_TEXT.to_string())
            }
        }
    }

    async fn commit_or_confirm(
        &self,
        conversation_id: &str,
        agent_key: &str,
        email: &str,
        start: DateTime<Utc>,
    ) -> Vec<Effect> {
        if self.config.auto_commit {
            self.commit(conversation_id, agent_key, email, start).await
        } else {
            self.set_state(
                conversation_id,
                State::Confirming {
                    proposal: Proposal {
                        email: email.to_string(),
                        start,
                    },
                },
            );
            vec![Effect::Reply(format!(
                "Anotei {} para {}. Um atendente vai confirmar o horário em instantes! ⏳",
                start.format("%d/%m/%Y %H:%M"),
                email
            ))]
        }
    }

    /// The Committing step: exactly one provider-side event per dedup key
    async fn commit(
        &self,
        conversation_id: &str,
        agent_key: &str,
        email: &str,
        start: DateTime<Utc>,
    ) -> Vec<Effect> {
        let end = start + Duration::minutes(i64::from(self.config.slot_minutes));
        let key = dedup_key(conversation_id, start, email);

        // A confirmed commitment for this key means a retry: answer with
        // the existing event, never insert a second one.
        let existing = match self.repo.find_by_dedup_key(&key) {
            Ok(existing) => existing,
            Err(e) => {
                tracing::error!(error = %e, "commitment lookup failed");
                self.set_state(conversation_id, State::Idle);
                return vec![Effect::Reply(COMMIT_FAILED_TEXT.to_string())];
            }
        };

        let row = if let Some(row) = existing {
            if row.status == crate::db::CommitmentStatus::Confirmed {
                self.set_state(conversation_id, State::Idle);
                return vec![Effect::Reply(confirmation_text(
                    start,
                    row.meeting_url.as_deref(),
                    row.calendar_url.as_deref(),
                ))];
            }

            // Proposed row without confirmation: we may have crashed after
            // the provider accepted. Ask it before retrying.
            if let Ok(Some(event)) = self.provider.find_by_dedup_key(&key).await {
                let _ = self.repo.confirm(
                    &row.id,
                    &event.id,
                    event.meeting_url.as_deref(),
                    event.calendar_url.as_deref(),
                );
                self.set_state(conversation_id, State::Idle);
                return vec![Effect::Reply(confirmation_text(
                    start,
                    event.meeting_url.as_deref(),
                    event.calendar_url.as_deref(),
                ))];
            }
            row
        } else {
            match self.repo.propose(
                conversation_id,
                agent_key,
                email,
                "Reunião agendada via chat",
                start,
                end,
                &[email.to_string()],
                &key,
            ) {
                Ok(row) => row,
                Err(e) => {
                    tracing::error!(error = %e, "commitment propose failed");
                    self.set_state(conversation_id, State::Idle);
                    return vec![Effect::Reply(COMMIT_FAILED_TEXT.to_string())];
                }
            }
        };

        let request = EventRequest {
            title: "Reunião agendada via chat".to_string(),
            description: format!("Agendado pelo agente {agent_key}"),
            start,
            end,
            attendees: vec![email.to_string()],
            dedup_key: key,
        };

        let created = tokio::time::timeout(
            self.config.deadline,
            self.provider.create_event(&request),
        )
        .await
        .map_err(|_| Error::Unavailable("calendar deadline exceeded".to_string()))
        .and_then(|inner| inner);

        self.set_state(conversation_id, State::Idle);

        match created {
            Ok(event) => {
                if let Err(e) = self.repo.confirm(
                    &row.id,
                    &event.id,
                    event.meeting_url.as_deref(),
                    event.calendar_url.as_deref(),
                ) {
                    tracing::error!(error = %e, "commitment confirm failed");
                }
                vec![Effect::Reply(confirmation_text(
                    start,
                    event.meeting_url.as_deref(),
                    event.calendar_url.as_deref(),
                ))]
            }
            Err(e) => {
                // The row stays proposed: recovery on the next attempt asks
                // the provider before retrying, and nothing is ever
                // recorded confirmed without a provider event.
                tracing::warn!(error = %e, "calendar commit failed");
                vec![Effect::Reply(COMMIT_FAILED_TEXT.to_string())]
            }
        }
    }

    fn slot_picker(&self, email: Option<String>, phone: Option<String>) -> Effect {
        Effect::ShowSlotPicker {
            customer_email: email,
            customer_phone: phone,
            working_days: next_working_days(Utc::now().date_naive(), self.config.days_ahead),
            working_hours: (self.config.working_hours_start, self.config.working_hours_end),
            default_duration_minutes: self.config.slot_minutes,
        }
    }
}

fn confirmation_text(
    start: DateTime<Utc>,
    meeting_url: Option<&str>,
    calendar_url: Option<&str>,
) -> String {
    let mut text = format!(
        "Prontinho! Reunião confirmada para {}. ✅",
        start.format("%d/%m/%Y às %H:%M")
    );
    if let Some(url) = meeting_url {
        text.push_str(&format!("\n📹 Link da reunião: {url}"));
    }
    if let Some(url) = calendar_url {
        text.push_str(&format!("\n📅 Evento no calendário: {url}"));
    }
    text.push_str("\nO convite também foi enviado por email.");
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider double that counts inserts and can be told to fail
    struct MockProvider {
        creates: AtomicUsize,
        fail: bool,
        known_keys: Mutex<Vec<String>>,
    }

    impl MockProvider {
        fn new(fail: bool) -> Self {
            Self {
                creates: AtomicUsize::new(0),
                fail,
                known_keys: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CalendarProvider for MockProvider {
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
                meeting_url: Some("https://meet.example/x".to_string()),
                calendar_url: Some("https://cal.example/x".to_string()),
            })
        }

        async fn busy_intervals(&self, _date: NaiveDate) -> Result<Vec<BusyInterval>> {
            Ok(Vec::new())
        }

        async fn find_by_dedup_key(&self, dedup_key: &str) -> Result<Option<CreatedEvent>> {
            let known = self.known_keys.lock().unwrap();
            Ok(known.iter().any(|key| key == dedup_key).then(|| CreatedEvent {
                id: "evt-recovered".to_string(),
                meeting_url: Some("https://meet.example/x".to_string()),
                calendar_url: Some("https://cal.example/x".to_string()),
            }))
        }

        async fn cancel_event(&self, _event_id: &str) -> Result<()> {
            Ok(())
        }
    }

    fn config(auto_commit: bool) -> SchedulingConfig {
        SchedulingConfig {
            calendar_base_url: String::new(),
            calendar_token: None,
            working_hours_start: 9,
            working_hours_end: 18,
            slot_minutes: 60,
            days_ahead: 5,
            auto_commit,
            deadline: std::time::Duration::from_secs(5),
        }
    }

    fn scheduler(provider: Arc<MockProvider>, auto_commit: bool) -> Scheduler {
        Scheduler::new(
            provider,
            CalendarRepo::new(init_memory().unwrap()),
            config(auto_commit),
        )
    }

    fn entities_with(email: bool, date: bool, time: bool) -> BTreeMap<String, Entity> {
        let mut entities = BTreeMap::new();
        if email {
            entities.insert(
                "email".to_string(),
                Entity {
                    value: "x@y.com".to_string(),
                    normalized: Some("x@y.com".to_string()),
                    valid: true,
                },
            );
        }
        if date {
            let tomorrow = next_working_days(Utc::now().date_naive() + Duration::days(1), 1)[0];
            entities.insert(
                "date".to_string(),
                Entity {
                    value: String::new(),
                    normalized: Some(tomorrow.format("%Y-%m-%d").to_string()),
                    valid: true,
                },
            );
        }
        if time {
            entities.insert(
                "time".to_string(),
                Entity {
                    value: String::new(),
                    normalized: Some("14:00".to_string()),
                    valid: true,
                },
            );
        }
        entities
    }

    #[tokio::test]
    async fn test_full_entities_auto_commit() {
        let provider = Arc::new(MockProvider::new(false));
        let scheduler = scheduler(provider.clone(), true);

        let effects = scheduler
            .handle_intent("c1", "sdr", &entities_with(true, true, true))
            .await;
        assert_eq!(provider.creates.load(Ordering::SeqCst), 1);
        match &effects[0] {
            Effect::Reply(text) => {
                assert!(text.contains("https://meet.example/x"));
                assert!(text.contains("https://cal.example/x"));
            }
            Effect::ShowSlotPicker { .. } => panic!("expected reply"),
        }
        assert_eq!(scheduler.state("c1"), State::Idle);
    }

    #[tokio::test]
    async fn test_identical_retry_creates_one_event() {
        let provider = Arc::new(MockProvider::new(false));
        let scheduler = scheduler(provider.clone(), true);
        let entities = entities_with(true, true, true);

        scheduler.handle_intent("c1", "sdr", &entities).await;
        scheduler.handle_intent("c1", "sdr", &entities).await;
        assert_eq!(provider.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_email_awaits_identity() {
        let provider = Arc::new(MockProvider::new(false));
        let scheduler = scheduler(provider.clone(), true);

        let effects = scheduler
            .handle_intent("c1", "sdr", &entities_with(false, false, false))
            .await;
        assert_eq!(scheduler.state("c1"), State::AwaitingIdentity);
        assert!(matches!(effects[0], Effect::Reply(_)));
        assert!(matches!(effects[1], Effect::ShowSlotPicker { .. }));
        assert_eq!(provider.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_followup_email_advances_identity() {
        let provider = Arc::new(MockProvider::new(false));
        let scheduler = scheduler(provider.clone(), true);

        scheduler
            .handle_intent("c1", "sdr", &entities_with(false, false, false))
            .await;
        let effects = scheduler
            .handle_followup("c1", "sdr", &entities_with(true, false, false))
            .await;
        assert!(effects.is_some());
        assert_eq!(
            scheduler.state("c1"),
            State::AwaitingSlot {
                email: Some("x@y.com".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_slot_callback_past_is_invalid() {
        let provider = Arc::new(MockProvider::new(false));
        let scheduler = scheduler(provider, true);

        let err = scheduler
            .slot_callback(
                "c1",
                "sdr",
                NaiveDate::from_ymd_opt(2020, 1, 6).unwrap(),
                NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
                "x@y.com",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[tokio::test]
    async fn test_provider_failure_apologizes_and_returns_to_idle() {
        let provider = Arc::new(MockProvider::new(true));
        let scheduler = scheduler(provider, true);

        let effects = scheduler
            .handle_intent("c1", "sdr", &entities_with(true, true, true))
            .await;
        match &effects[0] {
            Effect::Reply(text) => assert_eq!(text, COMMIT_FAILED_TEXT),
            Effect::ShowSlotPicker { .. } => panic!("expected apology"),
        }
        assert_eq!(scheduler.state("c1"), State::Idle);
    }

    #[tokio::test]
    async fn test_crash_recovery_consults_provider_before_retry() {
        let provider = Arc::new(MockProvider::new(false));
        let pool = init_memory().unwrap();
        let repo = CalendarRepo::new(pool.clone());
        let scheduler = Scheduler::new(provider.clone(), repo.clone(), config(true));

        let entities = entities_with(true, true, true);
        scheduler.handle_intent("c1", "sdr", &entities).await;

        // Simulate a crash after the provider accepted but before our
        // confirm landed: force the row back to proposed.
        let row = repo.list(Some("c1"), None, 10).unwrap().remove(0);
        pool.get()
            .unwrap()
            .execute(
                "UPDATE calendar_commitments SET status = 'proposed',
                 provider_event_id = NULL WHERE id = ?1",
                [&row.id],
            )
            .unwrap();

        scheduler.handle_intent("c1", "sdr", &entities).await;
        // Recovery found the provider event instead of inserting again
        assert_eq!(provider.creates.load(Ordering::SeqCst), 1);

        let recovered = repo.get(&row.id).unwrap().unwrap();
        assert_eq!(recovered.status, crate::db::CommitmentStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_require_operator_ok_holds_in_confirming() {
        let provider = Arc::new(MockProvider::new(false));
        let scheduler = scheduler(provider.clone(), false);

        scheduler
            .handle_intent("c1", "sdr", &entities_with(true, true, true))
            .await;
        assert!(matches!(scheduler.state("c1"), State::Confirming { .. }));
        assert_eq!(provider.creates.load(Ordering::SeqCst), 0);

        scheduler.confirm_pending("c1", "sdr").await;
        assert_eq!(provider.creates.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state("c1"), State::Idle);
    }

    #[tokio::test]
    async fn test_tool_call_without_slot_shows_picker() {
        let provider = Arc::new(MockProvider::new(false));
        let scheduler = scheduler(provider, true);

        let effects = scheduler
            .handle_tool_call("c1", "sdr", "schedule_meeting", &serde_json::json!({}))
            .await;
        assert!(matches!(effects[0], Effect::ShowSlotPicker { .. }));
    }

    #[test]
    fn test_dedup_key_is_stable_and_case_insensitive() {
        let start = Utc.with_ymd_and_hms(2025, 12, 2, 14, 0, 0).unwrap();
        assert_eq!(
            dedup_key("c1", start, "X@Y.com"),
            dedup_key("c1", start, "x@y.com")
        );
        assert_ne!(
            dedup_key("c1", start, "x@y.com"),
            dedup_key("c2", start, "x@y.com")
        );
    }
}
