//! User repository: staff accounts, external contacts, agent authors

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::DbPool;
use crate::{Error, Result};

/// A user: a staff account, a synthetic external contact, or a synthetic
/// agent author
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub channel: Option<String>,
    pub channel_native_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// User repository
#[derive(Clone)]
pub struct UserRepo {
    pool: DbPool,
}

impl UserRepo {
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Register a staff account
    ///
    /// Emails are unique and lower-cased.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` when the email is already registered.
    pub fn create(&self, name: &str, email: &str, password_hash: &str) -> Result<User> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let email = email.trim().to_lowercase();
        let now = Utc::now();

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO users (id, name, email, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![&id, name, &email, password_hash, now.to_rfc3339()],
        )?;

        if inserted == 0 {
            return Err(Error::Conflict("email already registered".to_string()));
        }

        Ok(User {
            id,
            name: name.to_string(),
            email: Some(email),
            password_hash: Some(password_hash.to_string()),
            channel: None,
            channel_native_id: None,
            created_at: now,
        })
    }

    /// Look up a staff account by email
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let user = conn
            .query_row(
                "SELECT id, name, email, password_hash, channel, channel_native_id, created_at
                 FROM users WHERE email = ?1",
                [&email.trim().to_lowercase()],
                row_to_user,
            )
            .ok();

        Ok(user)
    }

    /// Look up a user by id
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let user = conn
            .query_row(
                "SELECT id, name, email, password_hash, channel, channel_native_id, created_at
                 FROM users WHERE id = ?1",
                [id],
                row_to_user,
            )
            .ok();

        Ok(user)
    }

    /// Materialize an external contact on first inbound from a channel
    ///
    /// Keyed by `(channel, channel_native_id)`; idempotent.
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn find_or_create_external(
        &self,
        channel: &str,
        channel_native_id: &str,
        display_name: &str,
    ) -> Result<User> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let existing = conn
            .query_row(
                "SELECT id, name, email, password_hash, channel, channel_native_id, created_at
                 FROM users WHERE channel = ?1 AND channel_native_id = ?2",
                [channel, channel_native_id],
                row_to_user,
            )
            .ok();

        if let Some(user) = existing {
            return Ok(user);
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO users (id, name, channel, channel_native_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![&id, display_name, channel, channel_native_id, now.to_rfc3339()],
        )?;

        Ok(User {
            id,
            name: display_name.to_string(),
            email: None,
            password_hash: None,
            channel: Some(channel.to_string()),
            channel_native_id: Some(channel_native_id.to_string()),
            created_at: now,
        })
    }

    /// Synthetic author for an agent, so every message has a real user id
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn find_or_create_agent(&self, agent_key: &str, display_name: &str) -> Result<User> {
        self.find_or_create_external("agent", agent_key, display_name)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        channel: row.get(4)?,
        channel_native_id: row.get(5)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
