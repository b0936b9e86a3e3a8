//! Realtime surface: event contracts, room registry, websocket handler

pub mod events;
pub mod registry;
pub mod socket;

pub use events::{AttachmentPayload, MessagePayload, WsIncoming, WsOutgoing};
pub use registry::{ConnId, Registry, RoomKey};
