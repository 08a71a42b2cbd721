//! Realtime synchronization engine: room membership, per-room message
//! feeds, typing presence, notification suppression and outbound intents.
//!
//! Every store here is plain single-owner state. [`engine::SyncEngine`]
//! owns all of them on one task and is the only place that touches I/O.

pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod notify;
pub mod presence;
pub mod remote;
pub mod rooms;
pub mod timers;

pub use commands::CommandGateway;
pub use config::EngineConfig;
pub use engine::{EngineHandle, EngineUpdate, FeedSnapshot, SyncEngine};
pub use error::SyncError;
pub use feed::{FeedStore, LoadKind, LoadTicket, RoomFeed};
pub use notify::{Alert, NotificationDispatcher};
pub use presence::{PresenceTracker, compose_indicator_text};
pub use remote::{PageSource, SideChannel};
pub use rooms::{Room, RoomGraph, RoomSwitch, ThreadInfo};
