pub mod api;
pub mod events;
pub mod models;
pub mod room;

pub use models::{Attachment, Identity, Message, MessageId, ReactionMap, Session};
pub use room::{RoomKey, RoomKeyError, dm_key};
