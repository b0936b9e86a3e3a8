//! Calendar commitment repository
//!
//! A commitment row is written with status `proposed` before the external
//! calendar call and promoted to `confirmed` afterwards; the unique
//! `dedup_key` is what makes the commit at-most-once under retries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::user::parse_datetime;
use super::DbPool;
use crate::{Error, Result};

/// Commitment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitmentStatus {
    Proposed,
    Confirmed,
    Cancelled,
}

impl CommitmentStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "confirmed" => Self::Confirmed,
            "cancelled" => Self::Cancelled,
            _ => Self::Proposed,
        }
    }
}

/// A calendar commitment produced by the scheduling sub-protocol
#[derive(Debug, Clone, Serialize)]
pub struct CalendarCommitment {
    pub id: String,
    pub provider_event_id: Option<String>,
    pub conversation_id: String,
    pub agent_key: String,
    pub customer_email: String,
    pub title: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub meeting_url: Option<String>,
    pub calendar_url: Option<String>,
    pub status: CommitmentStatus,
    pub attendees: Vec<String>,
    pub notes: Option<String>,
    pub dedup_key: String,
    pub created_at: DateTime<Utc>,
}

/// Calendar commitment repository
#[derive(Clone)]
pub struct CalendarRepo {
    pool: DbPool,
}

impl CalendarRepo {
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Record the intent to commit, before the external call
    ///
    /// # Errors
    ///
    /// Returns `Conflict` when the dedup key is already recorded.
    #[allow(clippy::too_many_arguments)]
    pub fn propose(
        &self,
        conversation_id: &str,
        agent_key: &str,
        customer_email: &str,
        title: &str,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        attendees: &[String],
        dedup_key: &str,
    ) -> Result<CalendarCommitment> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO calendar_commitments
                (id, conversation_id, agent_key, customer_email, title,
                 start_at, end_at, status, attendees, dedup_key, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'proposed', ?8, ?9, ?10)",
            rusqlite::params![
                &id,
                conversation_id,
                agent_key,
                customer_email,
                title,
                start_at.to_rfc3339(),
                end_at.to_rfc3339(),
                serde_json::to_string(attendees)?,
                dedup_key,
                now.to_rfc3339(),
            ],
        )?;

        if inserted == 0 {
            return Err(Error::Conflict("commitment already recorded".to_string()));
        }

        self.get(&id)?
            .ok_or_else(|| Error::Database("commitment vanished after insert".to_string()))
    }

    /// Promote a proposed commitment after the provider confirmed
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn confirm(
        &self,
        id: &str,
        provider_event_id: &str,
        meeting_url: Option<&str>,
        calendar_url: Option<&str>,
    ) -> Result<()> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        conn.execute(
            "UPDATE calendar_commitments
             SET status = 'confirmed', provider_event_id = ?1,
                 meeting_url = ?2, calendar_url = ?3, updated_at = ?4
             WHERE id = ?5",
            rusqlite::params![
                provider_event_id,
                meeting_url,
                calendar_url,
                Utc::now().to_rfc3339(),
                id
            ],
        )?;

        Ok(())
    }

    /// Mark a commitment cancelled (failed external call, or operator
    /// cancellation)
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn cancel(&self, id: &str) -> Result<()> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        conn.execute(
            "UPDATE calendar_commitments
             SET status = 'cancelled', updated_at = ?1 WHERE id = ?2",
            rusqlite::params![Utc::now().to_rfc3339(), id],
        )?;

        Ok(())
    }

    /// Replace the free-form notes
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown commitment
    pub fn set_notes(&self, id: &str, notes: &str) -> Result<()> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let updated = conn.execute(
            "UPDATE calendar_commitments SET notes = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![notes, Utc::now().to_rfc3339(), id],
        )?;

        if updated == 0 {
            return Err(Error::NotFound("commitment".to_string()));
        }

        Ok(())
    }

    /// Fetch one commitment
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn get(&self, id: &str) -> Result<Option<CalendarCommitment>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(conn
            .query_row(
                &format!("{SELECT_COMMITMENT} WHERE id = ?1"),
                [id],
                row_to_commitment,
            )
            .ok())
    }

    /// Look a commitment up by its dedup key
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn find_by_dedup_key(&self, dedup_key: &str) -> Result<Option<CalendarCommitment>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(conn
            .query_row(
                &format!("{SELECT_COMMITMENT} WHERE dedup_key = ?1"),
                [dedup_key],
                row_to_commitment,
            )
            .ok())
    }

    /// List commitments with optional filters, soonest first
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn list(
        &self,
        conversation_id: Option<&str>,
        status: Option<CommitmentStatus>,
        limit: usize,
    ) -> Result<Vec<CalendarCommitment>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut sql = format!("{SELECT_COMMITMENT} WHERE 1=1");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(conversation_id) = conversation_id {
            sql.push_str(" AND conversation_id = ?");
            params.push(Box::new(conversation_id.to_string()));
        }
        if let Some(status) = status {
            sql.push_str(" AND status = ?");
            params.push(Box::new(status.as_str().to_string()));
        }
        sql.push_str(" ORDER BY start_at ASC LIMIT ?");
        params.push(Box::new(limit.clamp(1, 100) as i64));

        let mut stmt = conn.prepare(&sql)?;
        let refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(AsRef::as_ref).collect();
        let commitments = stmt
            .query_map(refs.as_slice(), row_to_commitment)?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(commitments)
    }
}

const SELECT_COMMITMENT: &str = "SELECT id, provider_event_id, conversation_id, agent_key,
        customer_email, title, start_at, end_at, meeting_url, calendar_url,
        status, attendees, notes, dedup_key, created_at
     FROM calendar_commitments";

fn row_to_commitment(row: &rusqlite::Row<'_>) -> rusqlite::Result<CalendarCommitment> {
    let attendees: String = row.get(11)?;

    Ok(CalendarCommitment {
        id: row.get(0)?,
        provider_event_id: row.get(1)?,
        conversation_id: row.get(2)?,
        agent_key: row.get(3)?,
        customer_email: row.get(4)?,
        title: row.get(5)?,
        start_at: parse_datetime(&row.get::<_, String>(6)?),
        end_at: parse_datetime(&row.get::<_, String>(7)?),
        meeting_url: row.get(8)?,
        calendar_url: row.get(9)?,
        status: CommitmentStatus::parse(&row.get::<_, String>(10)?),
        attendees: serde_json::from_str(&attendees).unwrap_or_default(),
        notes: row.get(12)?,
        dedup_key: row.get(13)?,
        created_at: parse_datetime(&row.get::<_, String>(14)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;
    use chrono::Duration;

    fn setup() -> CalendarRepo {
        CalendarRepo::new(init_memory().unwrap())
    }

    #[test]
    fn test_propose_confirm_roundtrip() {
        let repo = setup();
        let start = Utc::now() + Duration::days(1);

        let proposed = repo
            .propose(
                "c1",
                "sdr",
                "x@y.com",
                "Demo",
                start,
                start + Duration::hours(1),
                &["x@y.com".to_string()],
                "dedup-1",
            )
            .unwrap();
        assert_eq!(proposed.status, CommitmentStatus::Proposed);

        repo.confirm(&proposed.id, "evt-42", Some("https://meet/x"), Some("https://cal/x"))
            .unwrap();
        let confirmed = repo.get(&proposed.id).unwrap().unwrap();
        assert_eq!(confirmed.status, CommitmentStatus::Confirmed);
        assert_eq!(confirmed.provider_event_id.as_deref(), Some("evt-42"));
    }

    #[test]
    fn test_dedup_key_is_unique() {
        let repo = setup();
        let start = Utc::now() + Duration::days(1);

        repo.propose("c1", "sdr", "x@y.com", "Demo", start, start, &[], "dedup-1")
            .unwrap();
        let err = repo
            .propose("c1", "sdr", "x@y.com", "Demo", start, start, &[], "dedup-1")
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let found = repo.find_by_dedup_key("dedup-1").unwrap();
        assert!(found.is_some());
    }
}
