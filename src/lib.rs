//! Concourse - omnichannel conversation routing and agent orchestration
//!
//! This library is the core of the platform:
//! - Message store with delivery semantics (sent → delivered → read)
//! - Presence & subscription registry for realtime fan-out
//! - NLU classification with model→rule fallback and entity extraction
//! - Agent registry (built-in specialists + tenant-defined agents)
//! - Handover queue escalating conversations to human operators
//! - Scheduling sub-protocol with exactly-once calendar commits
//! - Channel adapters for WhatsApp, Instagram, and Messenger
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    Transports                         │
//! │   Web socket │ WhatsApp │ Instagram │ Messenger      │
//! └────────────────────┬─────────────────────────────────┘
//!                      │
//! ┌────────────────────▼─────────────────────────────────┐
//! │                 Router / Orchestrator                 │
//! │   per-conversation serialization │ addressee policy  │
//! └──────┬──────────┬──────────┬──────────┬──────────────┘
//!        │          │          │          │
//!   ┌────▼───┐ ┌────▼───┐ ┌────▼────┐ ┌──▼────────┐
//!   │  NLU   │ │ Agents │ │Handover │ │Scheduling │
//!   └────────┘ └────────┘ └─────────┘ └───────────┘
//! ```

pub mod agents;
pub mod api;
pub mod auth;
pub mod channels;
pub mod config;
pub mod db;
pub mod error;
pub mod handover;
pub mod nlu;
pub mod realtime;
pub mod router;
pub mod scheduling;
pub mod transcription;
pub mod uploads;

pub use config::Config;
pub use db::{DbConn, DbPool};
pub use error::{Error, Result};
pub use router::{ChannelOrigin, Inbound, Router};
