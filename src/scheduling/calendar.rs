//! Calendar provider contract and availability math
//!
//! The provider is an external collaborator reached over HTTP; everything
//! here is deadline-bounded by the scheduler. Slot computation is a pure
//! function so it can be tested without a provider.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::config::SchedulingConfig;
use crate::{Error, Result};

/// A busy interval on the provider's calendar
#[derive(Debug, Clone, Deserialize)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// An event accepted by the provider
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedEvent {
    pub id: String,
    pub meeting_url: Option<String>,
    pub calendar_url: Option<String>,
}

/// What the scheduler asks the provider to create
#[derive(Debug, Clone, Serialize)]
pub struct EventRequest {
    pub title: String,
    pub description: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub attendees: Vec<String>,
    /// Passed through when the provider supports idempotent inserts
    pub dedup_key: String,
}

/// External calendar contract
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    async fn create_event(&self, request: &EventRequest) -> Result<CreatedEvent>;

    async fn busy_intervals(&self, date: NaiveDate) -> Result<Vec<BusyInterval>>;

    /// Look up an event by the dedup key, for crash recovery between
    /// "about to commit" and "confirmed"
    async fn find_by_dedup_key(&self, dedup_key: &str) -> Result<Option<CreatedEvent>>;

    async fn cancel_event(&self, event_id: &str) -> Result<()>;
}

/// A free slot offered to the customer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Slot {
    pub start: String,
    pub end: String,
}

/// Free slots for a date: the working-hours window partitioned into
/// fixed-duration slots, minus busy intervals, weekends, and the past
#[must_use]
pub fn free_slots(
    date: NaiveDate,
    busy: &[BusyInterval],
    config: &SchedulingConfig,
    now: DateTime<Utc>,
) -> Vec<Slot> {
    if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
        return Vec::new();
    }

    let open = NaiveTime::from_hms_opt(config.working_hours_start, 0, 0);
    let close = NaiveTime::from_hms_opt(config.working_hours_end, 0, 0);
    let (Some(open), Some(close)) = (open, close) else {
        return Vec::new();
    };

    let day_start = Utc.from_utc_datetime(&date.and_time(open));
    let day_end = Utc.from_utc_datetime(&date.and_time(close));
    let step = Duration::minutes(i64::from(config.slot_minutes));

    let mut slots = Vec::new();
    let mut cursor = day_start;
    while cursor + step <= day_end {
        let slot_end = cursor + step;

        let past = cursor < now;
        let occupied = busy
            .iter()
            .any(|interval| cursor < interval.end && slot_end > interval.start);

        if !past && !occupied {
            slots.push(Slot {
                start: cursor.format("%H:%M").to_string(),
                end: slot_end.format("%H:%M").to_string(),
            });
        }

        cursor = slot_end;
    }

    slots
}

/// The next N working days from a date, for the slot-picker signal
#[must_use]
pub fn next_working_days(from: NaiveDate, count: u32) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut cursor = from;
    while days.len() < count as usize {
        if !matches!(cursor.weekday(), Weekday::Sat | Weekday::Sun) {
            days.push(cursor);
        }
        cursor += Duration::days(1);
    }
    days
}

/// Production provider over a REST calendar service
pub struct HttpCalendarProvider {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpCalendarProvider {
    #[must_use]
    pub fn new(config: &SchedulingConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.calendar_base_url.clone(),
            token: config.calendar_token.clone(),
        }
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl CalendarProvider for HttpCalendarProvider {
    async fn create_event(&self, request: &EventRequest) -> Result<CreatedEvent> {
        let response = self
            .request(self.http.post(format!("{}/events", self.base_url)))
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Unavailable(format!(
                "calendar provider returned {}",
                response.status()
            )));
        }

        Ok(response.json().await?)
    }

    async fn busy_intervals(&self, date: NaiveDate) -> Result<Vec<BusyInterval>> {
        let response = self
            .request(self.http.get(format!("{}/busy", self.base_url)))
            .query(&[("date", date.format("%Y-%m-%d").to_string())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Unavailable(format!(
                "calendar provider returned {}",
                response.status()
            )));
        }

        Ok(response.json().await?)
    }

    async fn find_by_dedup_key(&self, dedup_key: &str) -> Result<Option<CreatedEvent>> {
        let response = self
            .request(self.http.get(format!("{}/events/lookup", self.base_url)))
            .query(&[("dedup_key", dedup_key)])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::Unavailable(format!(
                "calendar provider returned {}",
                response.status()
            )));
        }

        Ok(Some(response.json().await?))
    }

    async fn cancel_event(&self, event_id: &str) -> Result<()> {
        let response = self
            .request(
                self.http
                    .delete(format!("{}/events/{event_id}", self.base_url)),
            )
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Unavailable(format!(
                "calendar provider returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SchedulingConfig {
        SchedulingConfig {
            calendar_base_url: String::new(),
            calendar_token: None,
            working_hours_start: 9,
            working_hours_end: 18,
            slot_minutes: 60,
            days_ahead: 5,
            auto_commit: true,
            deadline: std::time::Duration::from_secs(5),
        }
    }

    fn past() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_empty_day_yields_full_window() {
        // 2025-12-02 is a Tuesday
        let date = NaiveDate::from_ymd_opt(2025, 12, 2).unwrap();
        let slots = free_slots(date, &[], &config(), past());
        assert_eq!(slots.len(), 9);
        assert_eq!(slots[0].start, "09:00");
        assert_eq!(slots.last().unwrap().end, "18:00");
    }

    #[test]
    fn test_busy_interval_subtracted() {
        let date = NaiveDate::from_ymd_opt(2025, 12, 2).unwrap();
        let busy = vec![BusyInterval {
            start: Utc.with_ymd_and_hms(2025, 12, 2, 14, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2025, 12, 2, 15, 0, 0).unwrap(),
        }];
        let slots = free_slots(date, &busy, &config(), past());
        assert_eq!(slots.len(), 8);
        assert!(!slots.iter().any(|slot| slot.start == "14:00"));
    }

    #[test]
    fn test_partial_overlap_blocks_slot() {
        let date = NaiveDate::from_ymd_opt(2025, 12, 2).unwrap();
        let busy = vec![BusyInterval {
            start: Utc.with_ymd_and_hms(2025, 12, 2, 14, 30, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2025, 12, 2, 15, 30, 0).unwrap(),
        }];
        let slots = free_slots(date, &busy, &config(), past());
        assert!(!slots.iter().any(|slot| slot.start == "14:00"));
        assert!(!slots.iter().any(|slot| slot.start == "15:00"));
    }

    #[test]
    fn test_weekend_is_pruned() {
        // 2025-12-06 is a Saturday
        let date = NaiveDate::from_ymd_opt(2025, 12, 6).unwrap();
        assert!(free_slots(date, &[], &config(), past()).is_empty());
    }

    #[test]
    fn test_past_slots_pruned() {
        let date = NaiveDate::from_ymd_opt(2025, 12, 2).unwrap();
        let midday = Utc.with_ymd_and_hms(2025, 12, 2, 12, 30, 0).unwrap();
        let slots = free_slots(date, &[], &config(), midday);
        assert_eq!(slots[0].start, "13:00");
    }

    #[test]
    fn test_next_working_days_skips_weekend() {
        // Friday 2025-12-05
        let from = NaiveDate::from_ymd_opt(2025, 12, 5).unwrap();
        let days = next_working_days(from, 3);
        assert_eq!(days[0], from);
        assert_eq!(days[1], NaiveDate::from_ymd_opt(2025, 12, 8).unwrap());
        assert_eq!(days[2], NaiveDate::from_ymd_opt(2025, 12, 9).unwrap());
    }
}
