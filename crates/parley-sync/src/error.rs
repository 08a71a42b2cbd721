use thiserror::Error;

use parley_gateway::SendError;
use parley_types::RoomKey;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Transient: wait for the reconnect or retry. Never queued.
    #[error("not connected")]
    NotConnected,

    #[error("room {0} is read-only")]
    RoomReadOnly(RoomKey),

    #[error("message has neither text nor attachment")]
    EmptyPayload,

    /// A page load resolved after its room was switched away from or
    /// refreshed. Discarded silently; never reaches a caller.
    #[error("stale page load")]
    StaleLoad,

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("page fetch failed: {0}")]
    PageFetchFailed(String),

    #[error("attachment rejected: {0}")]
    AttachmentRejected(String),

    #[error("invalid poll: {0}")]
    InvalidPoll(String),

    #[error("poll creation failed: {0}")]
    PollFailed(String),

    #[error("{0} is not a guild channel")]
    NotAChannel(RoomKey),

    #[error("sync engine stopped")]
    EngineStopped,
}

impl From<SendError> for SyncError {
    fn from(e: SendError) -> Self {
        match e {
            SendError::NotConnected => Self::NotConnected,
        }
    }
}
