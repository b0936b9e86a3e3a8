//! Handover ticket repository
//!
//! Lifecycle: pending → accepted → in_progress → resolved; cancelled is
//! reachable from pending only. Accept is a compare-and-swap so exactly
//! one operator wins the race.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::user::parse_datetime;
use super::DbPool;
use crate::{Error, Result};

/// Why a conversation left bot control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoverReason {
    ExplicitRequest,
    LowConfidence,
    Complaint,
    ComplexQuery,
    Escalation,
    TechnicalProblem,
    OutOfHours,
}

impl HandoverReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExplicitRequest => "explicit_request",
            Self::LowConfidence => "low_confidence",
            Self::Complaint => "complaint",
            Self::ComplexQuery => "complex_query",
            Self::Escalation => "escalation",
            Self::TechnicalProblem => "technical_problem",
            Self::OutOfHours => "out_of_hours",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "explicit_request" => Self::ExplicitRequest,
            "complaint" => Self::Complaint,
            "complex_query" => Self::ComplexQuery,
            "escalation" => Self::Escalation,
            "technical_problem" => Self::TechnicalProblem,
            "out_of_hours" => Self::OutOfHours,
            _ => Self::LowConfidence,
        }
    }
}

/// Ticket lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoverStatus {
    Pending,
    Accepted,
    InProgress,
    Resolved,
    Cancelled,
}

impl HandoverStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Cancelled => "cancelled",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "accepted" => Self::Accepted,
            "in_progress" => Self::InProgress,
            "resolved" => Self::Resolved,
            "cancelled" => Self::Cancelled,
            _ => Self::Pending,
        }
    }
}

/// A handover ticket with its context snapshot
#[derive(Debug, Clone, Serialize)]
pub struct HandoverTicket {
    pub id: String,
    pub conversation_id: String,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub reason: HandoverReason,
    pub priority: i64,
    pub status: HandoverStatus,
    pub intent: Option<String>,
    pub entities: serde_json::Value,
    pub last_messages: Vec<String>,
    pub assigned_agent: Option<String>,
    pub resolution_notes: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Fields for a new ticket
#[derive(Debug, Clone, Default)]
pub struct NewHandover {
    pub conversation_id: String,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub intent: Option<String>,
    pub entities: serde_json::Value,
    pub last_messages: Vec<String>,
    pub tags: Vec<String>,
}

/// SLA counters for the stats summary
#[derive(Debug, Clone, Serialize)]
pub struct HandoverStats {
    pub by_status: serde_json::Map<String, serde_json::Value>,
    pub by_priority: serde_json::Map<String, serde_json::Value>,
    pub avg_response_time_seconds: f64,
}

/// Handover repository
#[derive(Clone)]
pub struct HandoverRepo {
    pool: DbPool,
}

impl HandoverRepo {
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a ticket
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn create(
        &self,
        new: NewHandover,
        reason: HandoverReason,
        priority: i64,
    ) -> Result<HandoverTicket> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO handovers
                (id, conversation_id, customer_name, customer_email, customer_phone,
                 reason, priority, status, intent, entities, last_messages, tags, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                &id,
                &new.conversation_id,
                new.customer_name,
                new.customer_email,
                new.customer_phone,
                reason.as_str(),
                priority,
                new.intent,
                new.entities.to_string(),
                serde_json::to_string(&new.last_messages)?,
                serde_json::to_string(&new.tags)?,
                now.to_rfc3339(),
            ],
        )?;

        self.get(&id)?
            .ok_or_else(|| Error::Database("ticket vanished after insert".to_string()))
    }

    /// Fetch one ticket
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn get(&self, id: &str) -> Result<Option<HandoverTicket>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(conn
            .query_row(
                &format!("{SELECT_TICKET} WHERE id = ?1"),
                [id],
                row_to_ticket,
            )
            .ok())
    }

    /// Whether the conversation has an open (pending or accepted or
    /// in-progress) ticket
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn has_open(&self, conversation_id: &str) -> Result<bool> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM handovers
             WHERE conversation_id = ?1
               AND status IN ('pending', 'accepted', 'in_progress')",
            [conversation_id],
            |row| row.get(0),
        )?;

        Ok(count > 0)
    }

    /// List tickets, priority-ordered, with optional filters
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn list(
        &self,
        status: Option<HandoverStatus>,
        priority: Option<i64>,
        limit: usize,
    ) -> Result<Vec<HandoverTicket>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut sql = format!("{SELECT_TICKET} WHERE 1=1");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(status) = status {
            sql.push_str(" AND status = ?");
            params.push(Box::new(status.as_str().to_string()));
        }
        if let Some(priority) = priority {
            sql.push_str(" AND priority = ?");
            params.push(Box::new(priority));
        }
        sql.push_str(" ORDER BY priority DESC, created_at ASC LIMIT ?");
        params.push(Box::new(limit.clamp(1, 100) as i64));

        let mut stmt = conn.prepare(&sql)?;
        let refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(AsRef::as_ref).collect();
        let tickets = stmt
            .query_map(refs.as_slice(), row_to_ticket)?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(tickets)
    }

    /// Accept a ticket: pending → accepted, compare-and-swap
    ///
    /// # Errors
    ///
    /// Returns `Conflict` when the ticket is no longer pending, `NotFound`
    /// when it does not exist.
    pub fn accept(&self, id: &str, operator_id: &str) -> Result<HandoverTicket> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let updated = conn.execute(
            "UPDATE handovers
             SET status = 'accepted', assigned_agent = ?1, accepted_at = ?2
             WHERE id = ?3 AND status = 'pending'",
            rusqlite::params![operator_id, Utc::now().to_rfc3339(), id],
        )?;

        if updated == 0 {
            return match self.get(id)? {
                Some(_) => Err(Error::Conflict("ticket already taken".to_string())),
                None => Err(Error::NotFound("handover ticket".to_string())),
            };
        }

        self.get(id)?
            .ok_or_else(|| Error::NotFound("handover ticket".to_string()))
    }

    /// Mark accepted ticket as in progress
    ///
    /// # Errors
    ///
    /// Returns `Conflict` on an illegal transition, `NotFound` when missing
    pub fn mark_in_progress(&self, id: &str) -> Result<HandoverTicket> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let updated = conn.execute(
            "UPDATE handovers SET status = 'in_progress'
             WHERE id = ?1 AND status = 'accepted'",
            [id],
        )?;

        if updated == 0 {
            return match self.get(id)? {
                Some(_) => Err(Error::Conflict("ticket is not accepted".to_string())),
                None => Err(Error::NotFound("handover ticket".to_string())),
            };
        }

        self.get(id)?
            .ok_or_else(|| Error::NotFound("handover ticket".to_string()))
    }

    /// Resolve a ticket with optional notes
    ///
    /// # Errors
    ///
    /// Returns `Conflict` on an illegal transition, `NotFound` when missing
    pub fn resolve(&self, id: &str, notes: Option<&str>) -> Result<HandoverTicket> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let updated = conn.execute(
            "UPDATE handovers
             SET status = 'resolved', resolution_notes = ?1, resolved_at = ?2
             WHERE id = ?3 AND status IN ('accepted', 'in_progress')",
            rusqlite::params![notes, Utc::now().to_rfc3339(), id],
        )?;

        if updated == 0 {
            return match self.get(id)? {
                Some(_) => Err(Error::Conflict("ticket is not in a resolvable state".to_string())),
                None => Err(Error::NotFound("handover ticket".to_string())),
            };
        }

        self.get(id)?
            .ok_or_else(|| Error::NotFound("handover ticket".to_string()))
    }

    /// Cancel a ticket; reachable from pending only
    ///
    /// # Errors
    ///
    /// Returns `Conflict` on an illegal transition, `NotFound` when missing
    pub fn cancel(&self, id: &str) -> Result<()> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let updated = conn.execute(
            "UPDATE handovers SET status = 'cancelled'
             WHERE id = ?1 AND status = 'pending'",
            [id],
        )?;

        if updated == 0 {
            return match self.get(id)? {
                Some(_) => Err(Error::Conflict("only pending tickets can be cancelled".to_string())),
                None => Err(Error::NotFound("handover ticket".to_string())),
            };
        }

        Ok(())
    }

    /// Counters by status and priority plus mean pending→accepted seconds
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn stats(&self) -> Result<HandoverStats> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut by_status = serde_json::Map::new();
        {
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM handovers GROUP BY status")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows.filter_map(std::result::Result::ok) {
                by_status.insert(row.0, row.1.into());
            }
        }

        let mut by_priority = serde_json::Map::new();
        {
            let mut stmt =
                conn.prepare("SELECT priority, COUNT(*) FROM handovers GROUP BY priority")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows.filter_map(std::result::Result::ok) {
                by_priority.insert(row.0.to_string(), row.1.into());
            }
        }

        let avg_response_time_seconds: f64 = conn
            .query_row(
                "SELECT AVG(unixepoch(accepted_at) - unixepoch(created_at))
                 FROM handovers WHERE accepted_at IS NOT NULL",
                [],
                |row| row.get::<_, Option<f64>>(0),
            )?
            .unwrap_or(0.0);

        Ok(HandoverStats {
            by_status,
            by_priority,
            avg_response_time_seconds,
        })
    }
}

const SELECT_TICKET: &str = "SELECT id, conversation_id, customer_name, customer_email,
        customer_phone, reason, priority, status, intent, entities, last_messages,
        assigned_agent, resolution_notes, tags, created_at, accepted_at, resolved_at
     FROM handovers";

fn row_to_ticket(row: &rusqlite::Row<'_>) -> rusqlite::Result<HandoverTicket> {
    let entities: String = row.get(9)?;
    let last_messages: String = row.get(10)?;
    let tags: String = row.get(13)?;

    Ok(HandoverTicket {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        customer_name: row.get(2)?,
        customer_email: row.get(3)?,
        customer_phone: row.get(4)?,
        reason: HandoverReason::parse(&row.get::<_, String>(5)?),
        priority: row.get(6)?,
        status: HandoverStatus::parse(&row.get::<_, String>(7)?),
        intent: row.get(8)?,
        entities: serde_json::from_str(&entities).unwrap_or_default(),
        last_messages: serde_json::from_str(&last_messages).unwrap_or_default(),
        assigned_agent: row.get(11)?,
        resolution_notes: row.get(12)?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        created_at: parse_datetime(&row.get::<_, String>(14)?),
        accepted_at: row.get::<_, Option<String>>(15)?.map(|s| parse_datetime(&s)),
        resolved_at: row.get::<_, Option<String>>(16)?.map(|s| parse_datetime(&s)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;

    fn setup() -> HandoverRepo {
        HandoverRepo::new(init_memory().unwrap())
    }

    fn new_ticket(conversation: &str) -> NewHandover {
        NewHandover {
            conversation_id: conversation.to_string(),
            customer_name: Some("João".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_accept_is_compare_and_swap() {
        let repo = setup();
        let ticket = repo
            .create(new_ticket("c1"), HandoverReason::Complaint, 4)
            .unwrap();

        let accepted = repo.accept(&ticket.id, "operator-a").unwrap();
        assert_eq!(accepted.status, HandoverStatus::Accepted);
        assert_eq!(accepted.assigned_agent.as_deref(), Some("operator-a"));

        let err = repo.accept(&ticket.id, "operator-b").unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_accept_missing_is_not_found() {
        let repo = setup();
        let err = repo.accept("ghost", "op").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_lifecycle() {
        let repo = setup();
        let ticket = repo
            .create(new_ticket("c1"), HandoverReason::ExplicitRequest, 3)
            .unwrap();
        assert!(repo.has_open("c1").unwrap());

        repo.accept(&ticket.id, "op").unwrap();
        repo.mark_in_progress(&ticket.id).unwrap();
        let resolved = repo.resolve(&ticket.id, Some("sorted out")).unwrap();
        assert_eq!(resolved.status, HandoverStatus::Resolved);
        assert!(resolved.resolved_at.is_some());
        assert!(!repo.has_open("c1").unwrap());
    }

    #[test]
    fn test_cancel_only_from_pending() {
        let repo = setup();
        let ticket = repo
            .create(new_ticket("c1"), HandoverReason::LowConfidence, 2)
            .unwrap();
        repo.accept(&ticket.id, "op").unwrap();

        let err = repo.cancel(&ticket.id).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_list_orders_by_priority() {
        let repo = setup();
        repo.create(new_ticket("c1"), HandoverReason::LowConfidence, 2)
            .unwrap();
        repo.create(new_ticket("c2"), HandoverReason::Complaint, 4)
            .unwrap();

        let tickets = repo.list(None, None, 10).unwrap();
        assert_eq!(tickets[0].priority, 4);

        let pending = repo
            .list(Some(HandoverStatus::Pending), Some(4), 10)
            .unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_stats_counts() {
        let repo = setup();
        let t = repo
            .create(new_ticket("c1"), HandoverReason::Complaint, 4)
            .unwrap();
        repo.accept(&t.id, "op").unwrap();
        repo.create(new_ticket("c2"), HandoverReason::LowConfidence, 2)
            .unwrap();

        let stats = repo.stats().unwrap();
        assert_eq!(stats.by_status.get("accepted").unwrap(), 1);
        assert_eq!(stats.by_status.get("pending").unwrap(), 1);
        assert!(stats.avg_response_time_seconds >= 0.0);
    }
}
