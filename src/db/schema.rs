//! Database schema and migrations

use rusqlite::Connection;

use crate::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 4;

/// Initialize the database schema
///
/// # Errors
///
/// Returns error if migration fails
pub fn init(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }
    if version < 3 {
        migrate_v3(conn)?;
    }
    if version < 4 {
        migrate_v4(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Users table: staff accounts and synthetic external contacts.
        -- External contacts carry (channel, channel_native_id) and no
        -- password; agent authors carry channel = 'agent'.
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT UNIQUE,
            password_hash TEXT,
            channel TEXT,
            channel_native_id TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_users_channel_native
            ON users(channel, channel_native_id)
            WHERE channel_native_id IS NOT NULL;

        -- Messages table: the canonical timeline. conversation_id is the
        -- canonicalized pair key. Status only ever advances.
        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            author_id TEXT NOT NULL,
            kind TEXT NOT NULL CHECK(kind IN ('text', 'image', 'audio', 'file')),
            text TEXT NOT NULL DEFAULT '',
            attachment_bucket TEXT,
            attachment_key TEXT,
            attachment_filename TEXT,
            attachment_mime TEXT,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK(status IN ('pending', 'sent', 'delivered', 'read')),
            agent_key TEXT,
            contact_id TEXT,
            client_temp_id TEXT,
            transcript_of TEXT,
            provider_msg_id TEXT,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_temp
            ON messages(author_id, client_temp_id)
            WHERE client_temp_id IS NOT NULL;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_provider
            ON messages(provider_msg_id)
            WHERE provider_msg_id IS NOT NULL;

        PRAGMA user_version = 1;
        ",
    )?;

    tracing::info!("migrated to schema v1");
    Ok(())
}

fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Handover tickets: escalation of a conversation to a human.
        CREATE TABLE IF NOT EXISTS handovers (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            customer_name TEXT,
            customer_email TEXT,
            customer_phone TEXT,
            reason TEXT NOT NULL,
            priority INTEGER NOT NULL CHECK(priority BETWEEN 1 AND 4),
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK(status IN ('pending', 'accepted', 'in_progress', 'resolved', 'cancelled')),
            intent TEXT,
            entities TEXT NOT NULL DEFAULT '{}',
            last_messages TEXT NOT NULL DEFAULT '[]',
            assigned_agent TEXT,
            resolution_notes TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            accepted_at TEXT,
            resolved_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_handovers_conversation
            ON handovers(conversation_id, status);
        CREATE INDEX IF NOT EXISTS idx_handovers_status
            ON handovers(status, priority);

        PRAGMA user_version = 2;
        ",
    )?;

    tracing::info!("migrated to schema v2 (handovers)");
    Ok(())
}

fn migrate_v3(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Calendar commitments: the durable half of the scheduling
        -- protocol. A row is written with status 'proposed' BEFORE the
        -- external call; dedup_key makes the commit at-most-once.
        CREATE TABLE IF NOT EXISTS calendar_commitments (
            id TEXT PRIMARY KEY,
            provider_event_id TEXT,
            conversation_id TEXT NOT NULL,
            agent_key TEXT NOT NULL,
            customer_email TEXT NOT NULL,
            title TEXT NOT NULL,
            start_at TEXT NOT NULL,
            end_at TEXT NOT NULL,
            meeting_url TEXT,
            calendar_url TEXT,
            status TEXT NOT NULL DEFAULT 'proposed'
                CHECK(status IN ('proposed', 'confirmed', 'cancelled')),
            attendees TEXT NOT NULL DEFAULT '[]',
            notes TEXT,
            dedup_key TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL,
            updated_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_commitments_conversation
            ON calendar_commitments(conversation_id);
        CREATE INDEX IF NOT EXISTS idx_commitments_start
            ON calendar_commitments(start_at);

        PRAGMA user_version = 3;
        ",
    )?;

    tracing::info!("migrated to schema v3 (calendar commitments)");
    Ok(())
}

fn migrate_v4(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Tenant-defined custom agents. The api_key column is the opaque
        -- credential handle; only the LLM adapter reads it.
        CREATE TABLE IF NOT EXISTS custom_agents (
            key TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            emoji TEXT NOT NULL DEFAULT '',
            system_prompt TEXT NOT NULL,
            api_key TEXT NOT NULL,
            provider_account TEXT,
            owner_user_id TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_custom_agents_owner
            ON custom_agents(owner_user_id);

        PRAGMA user_version = 4;
        ",
    )?;

    tracing::info!("migrated to schema v4 (custom agents)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_init() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();

        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='messages'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();
        init(&conn).unwrap();
    }
}
