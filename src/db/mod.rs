//! Database module: persisted record kinds and their repositories
//!
//! Five record kinds: users, messages, handovers, calendar commitments,
//! custom agent definitions. Each gets one repository struct over a shared
//! connection pool.

pub mod agent;
pub mod calendar;
pub mod handover;
pub mod message;
mod schema;
pub mod user;

use std::path::Path;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

use crate::{Error, Result};

pub use agent::{CustomAgentDef, CustomAgentRepo};
pub use calendar::{CalendarCommitment, CalendarRepo, CommitmentStatus};
pub use handover::{
    HandoverReason, HandoverRepo, HandoverStats, HandoverStatus, HandoverTicket, NewHandover,
};
pub use message::{
    agent_panel_key, conversation_key, is_agent_panel_key, AttachmentRef, DeliveryStatus,
    MessageKind, MessageRepo, NewMessage, PeerSummary, StoredMessage,
};
pub use schema::SCHEMA_VERSION;
pub use user::{User, UserRepo};

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Pooled database connection
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Initialize the database
///
/// # Errors
///
/// Returns error if database cannot be opened or migrated
pub fn init<P: AsRef<Path>>(path: P) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(path);
    let pool = Pool::builder()
        .max_size(4)
        .build(manager)
        .map_err(|e| Error::Database(e.to_string()))?;

    let conn = pool.get().map_err(|e| Error::Database(e.to_string()))?;
    schema::init(&conn)?;

    tracing::info!(version = SCHEMA_VERSION, "database initialized");
    Ok(pool)
}

/// Initialize an in-memory database (for testing)
///
/// # Errors
///
/// Returns error if database cannot be initialized
pub fn init_memory() -> Result<DbPool> {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder()
        .max_size(1)
        .build(manager)
        .map_err(|e| Error::Database(e.to_string()))?;

    let conn = pool.get().map_err(|e| Error::Database(e.to_string()))?;
    schema::init(&conn)?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_memory() {
        let pool = init_memory().unwrap();
        let _conn = pool.get().unwrap();
    }
}
