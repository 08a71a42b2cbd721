use thiserror::Error;

use parley_types::RoomKey;
use parley_types::events::OutboundCommand;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The stream is not in the `Connected` state. Commands are never queued.
    #[error("not connected")]
    NotConnected,
}

/// Destination for outbound intents.
pub trait CommandSink: Clone + Send + Sync + 'static {
    /// Emit `command` now, or fail with `NotConnected`.
    fn send(&self, command: OutboundCommand) -> Result<(), SendError>;

    fn is_connected(&self) -> bool;

    /// Record the room the server should re-attach after a reconnect.
    fn track_active_room(&self, _room: Option<&RoomKey>) {}
}
