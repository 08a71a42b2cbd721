use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Attachment, Message, MessageId, ReactionMap};
use crate::room::RoomKey;

/// Events received FROM the server over the realtime stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum InboundEvent {
    /// Server confirms successful authentication
    #[serde(rename = "ready")]
    Ready { user_id: String, username: String },

    #[serde(rename = "message:new")]
    MessageNew { room: RoomKey, message: Message },

    #[serde(rename = "message:edited")]
    MessageEdited {
        room: RoomKey,
        message_id: MessageId,
        content: String,
        edited_at: DateTime<Utc>,
    },

    #[serde(rename = "message:deleted")]
    MessageDeleted { room: RoomKey, message_id: MessageId },

    /// Full authoritative reaction map for one message, never a delta.
    #[serde(rename = "message:reactions")]
    MessageReactions {
        room: RoomKey,
        message_id: MessageId,
        reactions: ReactionMap,
    },

    #[serde(rename = "pin:changed")]
    PinChanged {
        room: RoomKey,
        message_id: MessageId,
        pinned: bool,
    },

    #[serde(rename = "typing:start")]
    TypingStart {
        room: RoomKey,
        user_id: String,
        username: String,
    },

    #[serde(rename = "typing:stop")]
    TypingStop {
        room: RoomKey,
        user_id: String,
        username: String,
    },

    /// Someone (possibly us) joined a room. `read_only` reflects the room's
    /// send permission for the recipient.
    #[serde(rename = "room:joined")]
    RoomJoined {
        room: RoomKey,
        user_id: String,
        username: String,
        #[serde(default)]
        read_only: bool,
    },

    #[serde(rename = "room:left")]
    RoomLeft {
        room: RoomKey,
        user_id: String,
        username: String,
    },

    #[serde(rename = "thread:created")]
    ThreadCreated {
        channel: RoomKey,
        thread_id: String,
        title: String,
        parent_message_id: Option<MessageId>,
    },

    /// The server refused an intent, e.g. a send into a read-only room.
    #[serde(rename = "permission:error")]
    PermissionError { room: RoomKey, reason: String },

    /// Opaque signaling payload relayed on the media stream.
    #[serde(rename = "signal")]
    Signal {
        from_user_id: String,
        payload: serde_json::Value,
    },
}

impl InboundEvent {
    /// Returns the room this event is scoped to, if any.
    pub fn room(&self) -> Option<&RoomKey> {
        match self {
            Self::MessageNew { room, .. }
            | Self::MessageEdited { room, .. }
            | Self::MessageDeleted { room, .. }
            | Self::MessageReactions { room, .. }
            | Self::PinChanged { room, .. }
            | Self::TypingStart { room, .. }
            | Self::TypingStop { room, .. }
            | Self::RoomJoined { room, .. }
            | Self::RoomLeft { room, .. }
            | Self::PermissionError { room, .. } => Some(room),
            Self::ThreadCreated { channel, .. } => Some(channel),
            Self::Ready { .. } | Self::Signal { .. } => None,
        }
    }
}

/// Commands sent FROM client TO server over the realtime stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OutboundCommand {
    /// Authenticate the stream
    #[serde(rename = "identify")]
    Identify { token: String },

    #[serde(rename = "room:join")]
    RoomJoin { room: RoomKey },

    #[serde(rename = "room:leave")]
    RoomLeave { room: RoomKey },

    /// `file` is a reference returned by the upload service, never raw bytes.
    #[serde(rename = "message:send")]
    MessageSend {
        room: RoomKey,
        content: String,
        file: Option<Attachment>,
    },

    #[serde(rename = "message:edit")]
    MessageEdit {
        room: RoomKey,
        message_id: MessageId,
        content: String,
    },

    #[serde(rename = "message:delete")]
    MessageDelete { room: RoomKey, message_id: MessageId },

    #[serde(rename = "reaction:add")]
    ReactionAdd {
        room: RoomKey,
        message_id: MessageId,
        emoji: String,
    },

    #[serde(rename = "reaction:remove")]
    ReactionRemove {
        room: RoomKey,
        message_id: MessageId,
        emoji: String,
    },

    #[serde(rename = "pin:set")]
    PinSet {
        room: RoomKey,
        message_id: MessageId,
        pinned: bool,
    },

    #[serde(rename = "thread:create")]
    ThreadCreate {
        channel: RoomKey,
        parent_message_id: MessageId,
        title: String,
    },

    #[serde(rename = "typing:start")]
    TypingStart { room: RoomKey },

    #[serde(rename = "typing:stop")]
    TypingStop { room: RoomKey },

    /// Signaling payload for a peer on the media stream
    #[serde(rename = "signal")]
    Signal {
        target_user_id: String,
        payload: serde_json::Value,
    },
}

impl OutboundCommand {
    /// Wire name of the intent, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Identify { .. } => "identify",
            Self::RoomJoin { .. } => "room:join",
            Self::RoomLeave { .. } => "room:leave",
            Self::MessageSend { .. } => "message:send",
            Self::MessageEdit { .. } => "message:edit",
            Self::MessageDelete { .. } => "message:delete",
            Self::ReactionAdd { .. } => "reaction:add",
            Self::ReactionRemove { .. } => "reaction:remove",
            Self::PinSet { .. } => "pin:set",
            Self::ThreadCreate { .. } => "thread:create",
            Self::TypingStart { .. } => "typing:start",
            Self::TypingStop { .. } => "typing:stop",
            Self::Signal { .. } => "signal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_uses_tagged_wire_names() {
        let raw = r#"{"type":"pin:changed","data":{"room":"g:1:c:5","message_id":12,"pinned":true}}"#;
        let event: InboundEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(
            event,
            InboundEvent::PinChanged {
                room: RoomKey::channel("1", "5"),
                message_id: MessageId(12),
                pinned: true,
            }
        );
        assert_eq!(event.room(), Some(&RoomKey::channel("1", "5")));
    }

    #[test]
    fn outbound_serializes_room_as_string() {
        let cmd = OutboundCommand::RoomJoin {
            room: crate::room::dm_key("bob", "alice"),
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "room:join");
        assert_eq!(json["data"]["room"], "dm:alice:bob");
        assert_eq!(cmd.name(), "room:join");
    }
}
