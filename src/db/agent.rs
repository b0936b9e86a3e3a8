//! Custom agent definitions
//!
//! Tenant-defined agents carry their own LLM credential; the registry loads
//! the row at call time and only the LLM adapter ever reads the key.

use chrono::{DateTime, Utc};

use super::user::parse_datetime;
use super::DbPool;
use crate::{Error, Result};

/// A tenant-defined agent
#[derive(Debug, Clone)]
pub struct CustomAgentDef {
    pub key: String,
    pub name: String,
    pub emoji: String,
    pub system_prompt: String,
    pub api_key: String,
    pub provider_account: Option<String>,
    pub owner_user_id: String,
    pub created_at: DateTime<Utc>,
}

/// Custom agent repository
#[derive(Clone)]
pub struct CustomAgentRepo {
    pool: DbPool,
}

impl CustomAgentRepo {
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a custom agent
    ///
    /// The key is derived from the name: lower-cased, spaces removed.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` when the key is taken, `Invalid` on an unusable
    /// name.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &self,
        name: &str,
        emoji: &str,
        system_prompt: &str,
        api_key: &str,
        provider_account: Option<&str>,
        owner_user_id: &str,
    ) -> Result<CustomAgentDef> {
        let key: String = name
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        if key.is_empty() {
            return Err(Error::Invalid("agent name must contain letters or digits".to_string()));
        }

        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let now = Utc::now();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO custom_agents
                (key, name, emoji, system_prompt, api_key, provider_account,
                 owner_user_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                &key,
                name,
                emoji,
                system_prompt,
                api_key,
                provider_account,
                owner_user_id,
                now.to_rfc3339(),
            ],
        )?;

        if inserted == 0 {
            return Err(Error::Conflict(format!("agent key '{key}' already exists")));
        }

        Ok(CustomAgentDef {
            key,
            name: name.to_string(),
            emoji: emoji.to_string(),
            system_prompt: system_prompt.to_string(),
            api_key: api_key.to_string(),
            provider_account: provider_account.map(String::from),
            owner_user_id: owner_user_id.to_string(),
            created_at: now,
        })
    }

    /// Load a custom agent by key
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn find(&self, key: &str) -> Result<Option<CustomAgentDef>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(conn
            .query_row(
                "SELECT key, name, emoji, system_prompt, api_key, provider_account,
                        owner_user_id, created_at
                 FROM custom_agents WHERE key = ?1",
                [key],
                row_to_agent,
            )
            .ok())
    }

    /// List an owner's custom agents
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn list(&self, owner_user_id: &str) -> Result<Vec<CustomAgentDef>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn.prepare(
            "SELECT key, name, emoji, system_prompt, api_key, provider_account,
                    owner_user_id, created_at
             FROM custom_agents WHERE owner_user_id = ?1 ORDER BY created_at",
        )?;

        let agents = stmt
            .query_map([owner_user_id], row_to_agent)?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(agents)
    }

    /// Delete a custom agent
    ///
    /// Historical messages keep their `agent_key` label; removal never
    /// rewrites the timeline.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the key does not exist or belongs to another
    /// owner.
    pub fn delete(&self, key: &str, owner_user_id: &str) -> Result<()> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let deleted = conn.execute(
            "DELETE FROM custom_agents WHERE key = ?1 AND owner_user_id = ?2",
            rusqlite::params![key, owner_user_id],
        )?;

        if deleted == 0 {
            return Err(Error::NotFound(format!("custom agent '{key}'")));
        }

        Ok(())
    }
}

fn row_to_agent(row: &rusqlite::Row<'_>) -> rusqlite::Result<CustomAgentDef> {
    Ok(CustomAgentDef {
        key: row.get(0)?,
        name: row.get(1)?,
        emoji: row.get(2)?,
        system_prompt: row.get(3)?,
        api_key: row.get(4)?,
        provider_account: row.get(5)?,
        owner_user_id: row.get(6)?,
        created_at: parse_datetime(&row.get::<_, String>(7)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;

    fn setup() -> CustomAgentRepo {
        CustomAgentRepo::new(init_memory().unwrap())
    }

    #[test]
    fn test_create_derives_key() {
        let repo = setup();
        let agent = repo
            .create("Meu Bot", "🤖", "prompt", "sk-1", None, "owner")
            .unwrap();
        assert_eq!(agent.key, "meubot");
    }

    #[test]
    fn test_duplicate_key_conflicts() {
        let repo = setup();
        repo.create("Bot", "🤖", "p", "sk-1", None, "owner").unwrap();
        let err = repo.create("bot", "🤖", "p", "sk-2", None, "owner").unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_delete_scoped_to_owner() {
        let repo = setup();
        repo.create("Bot", "🤖", "p", "sk-1", None, "owner").unwrap();

        let err = repo.delete("bot", "intruder").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        repo.delete("bot", "owner").unwrap();
        assert!(repo.find("bot").unwrap().is_none());
    }
}
