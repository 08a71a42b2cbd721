use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use parley_gateway::CommandSink;
use parley_types::api::{FileUpload, PollDraft};
use parley_types::events::OutboundCommand;
use parley_types::{Attachment, MessageId, RoomKey};

use crate::config::EngineConfig;
use crate::error::SyncError;
use crate::feed::FeedStore;
use crate::rooms::RoomGraph;
use crate::timers::TimerEvent;

pub const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "pdf", "doc", "docx", "txt"];
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const MIN_POLL_OPTIONS: usize = 2;
pub const MAX_POLL_OPTIONS: usize = 10;

pub fn validate_attachment(file: &FileUpload) -> Result<(), SyncError> {
    let allowed = file
        .extension()
        .is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()));
    if !allowed {
        return Err(SyncError::AttachmentRejected(format!(
            "{}: file type not allowed",
            file.name
        )));
    }
    if file.bytes.len() > MAX_UPLOAD_BYTES {
        return Err(SyncError::AttachmentRejected(format!(
            "{}: larger than 10 MiB",
            file.name
        )));
    }
    Ok(())
}

pub fn validate_poll(poll: &PollDraft) -> Result<(), SyncError> {
    if poll.question.trim().is_empty() {
        return Err(SyncError::InvalidPoll("question is empty".into()));
    }
    let options = poll.options.iter().filter(|o| !o.trim().is_empty()).count();
    if options != poll.options.len() {
        return Err(SyncError::InvalidPoll("options must not be empty".into()));
    }
    if !(MIN_POLL_OPTIONS..=MAX_POLL_OPTIONS).contains(&options) {
        return Err(SyncError::InvalidPoll(format!(
            "needs {}-{} options, got {}",
            MIN_POLL_OPTIONS, MAX_POLL_OPTIONS, options
        )));
    }
    Ok(())
}

/// Text sent alongside an uploaded file when the user typed nothing.
fn attachment_content(text: &str, attachment: &Attachment) -> String {
    if text.trim().is_empty() && !attachment.is_image() {
        format!("📎 {}", attachment.name)
    } else {
        text.to_string()
    }
}

struct OutboundTyping {
    started_at: Instant,
    generation: u64,
    timer: AbortHandle,
}

/// Validates intents and emits them through a [`CommandSink`].
///
/// Nothing here mutates a feed: the authoritative state for every intent
/// comes back through the inbound stream.
pub struct CommandGateway {
    self_id: String,
    typing_stop_delay: Duration,
    typing_refresh: Duration,
    typing: HashMap<RoomKey, OutboundTyping>,
    next_generation: u64,
    timers: mpsc::UnboundedSender<TimerEvent>,
}

impl CommandGateway {
    pub fn new(
        self_id: impl Into<String>,
        config: &EngineConfig,
        timers: mpsc::UnboundedSender<TimerEvent>,
    ) -> Self {
        Self {
            self_id: self_id.into(),
            typing_stop_delay: config.typing_stop_delay,
            typing_refresh: config.typing_refresh,
            typing: HashMap::new(),
            next_generation: 0,
            timers,
        }
    }

    /// Read-only is checked before connectivity: it is the permanent condition.
    fn gate<S: CommandSink>(&self, sink: &S, rooms: &RoomGraph, room: &RoomKey) -> Result<(), SyncError> {
        if rooms.is_read_only(room) {
            return Err(SyncError::RoomReadOnly(room.clone()));
        }
        if !sink.is_connected() {
            return Err(SyncError::NotConnected);
        }
        Ok(())
    }

    pub fn send_message<S: CommandSink>(
        &mut self,
        sink: &S,
        rooms: &RoomGraph,
        room: &RoomKey,
        text: &str,
        attachment: Option<Attachment>,
    ) -> Result<(), SyncError> {
        if text.trim().is_empty() && attachment.is_none() {
            return Err(SyncError::EmptyPayload);
        }
        self.gate(sink, rooms, room)?;

        let content = match &attachment {
            Some(file) => attachment_content(text, file),
            None => text.to_string(),
        };
        self.cancel_typing(sink, room);
        sink.send(OutboundCommand::MessageSend {
            room: room.clone(),
            content,
            file: attachment,
        })?;
        Ok(())
    }

    /// First phase of a file-bearing send: everything that can be rejected
    /// before bytes leave the client.
    pub fn check_upload<S: CommandSink>(
        &self,
        sink: &S,
        rooms: &RoomGraph,
        room: &RoomKey,
        file: &FileUpload,
    ) -> Result<(), SyncError> {
        validate_attachment(file)?;
        self.gate(sink, rooms, room)
    }

    pub fn edit_message<S: CommandSink>(
        &self,
        sink: &S,
        rooms: &RoomGraph,
        room: &RoomKey,
        message_id: MessageId,
        text: &str,
    ) -> Result<(), SyncError> {
        if text.trim().is_empty() {
            return Err(SyncError::EmptyPayload);
        }
        self.gate(sink, rooms, room)?;
        sink.send(OutboundCommand::MessageEdit {
            room: room.clone(),
            message_id,
            content: text.to_string(),
        })?;
        Ok(())
    }

    pub fn delete_message<S: CommandSink>(
        &self,
        sink: &S,
        rooms: &RoomGraph,
        room: &RoomKey,
        message_id: MessageId,
    ) -> Result<(), SyncError> {
        self.gate(sink, rooms, room)?;
        sink.send(OutboundCommand::MessageDelete {
            room: room.clone(),
            message_id,
        })?;
        Ok(())
    }

    pub fn react<S: CommandSink>(
        &self,
        sink: &S,
        rooms: &RoomGraph,
        room: &RoomKey,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<(), SyncError> {
        if emoji.is_empty() {
            return Err(SyncError::EmptyPayload);
        }
        self.gate(sink, rooms, room)?;
        sink.send(OutboundCommand::ReactionAdd {
            room: room.clone(),
            message_id,
            emoji: emoji.to_string(),
        })?;
        Ok(())
    }

    pub fn unreact<S: CommandSink>(
        &self,
        sink: &S,
        rooms: &RoomGraph,
        room: &RoomKey,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<(), SyncError> {
        if emoji.is_empty() {
            return Err(SyncError::EmptyPayload);
        }
        self.gate(sink, rooms, room)?;
        sink.send(OutboundCommand::ReactionRemove {
            room: room.clone(),
            message_id,
            emoji: emoji.to_string(),
        })?;
        Ok(())
    }

    /// Add `emoji` unless the last authoritative reaction map says we already
    /// reacted with it, in which case remove it. Returns true for an add.
    pub fn toggle_reaction<S: CommandSink>(
        &self,
        sink: &S,
        rooms: &RoomGraph,
        feeds: &FeedStore,
        room: &RoomKey,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<bool, SyncError> {
        let reacted = feeds
            .feed(room)
            .and_then(|f| f.get(message_id))
            .is_some_and(|m| m.reactions.has_reacted(emoji, &self.self_id));
        if reacted {
            self.unreact(sink, rooms, room, message_id, emoji)?;
        } else {
            self.react(sink, rooms, room, message_id, emoji)?;
        }
        Ok(!reacted)
    }

    pub fn set_pinned<S: CommandSink>(
        &self,
        sink: &S,
        rooms: &RoomGraph,
        room: &RoomKey,
        message_id: MessageId,
        pinned: bool,
    ) -> Result<(), SyncError> {
        self.gate(sink, rooms, room)?;
        sink.send(OutboundCommand::PinSet {
            room: room.clone(),
            message_id,
            pinned,
        })?;
        Ok(())
    }

    pub fn create_thread<S: CommandSink>(
        &self,
        sink: &S,
        rooms: &RoomGraph,
        channel: &RoomKey,
        parent_message_id: MessageId,
        title: &str,
    ) -> Result<(), SyncError> {
        if !channel.is_channel() {
            return Err(SyncError::NotAChannel(channel.clone()));
        }
        if title.trim().is_empty() {
            return Err(SyncError::EmptyPayload);
        }
        self.gate(sink, rooms, channel)?;
        sink.send(OutboundCommand::ThreadCreate {
            channel: channel.clone(),
            parent_message_id,
            title: title.trim().to_string(),
        })?;
        info!("Requested thread '{}' on {} in {}", title.trim(), parent_message_id, channel);
        Ok(())
    }

    /// Polls travel over HTTP, so only the read-only flag gates them.
    pub fn check_poll(&self, rooms: &RoomGraph, room: &RoomKey, poll: &PollDraft) -> Result<(), SyncError> {
        validate_poll(poll)?;
        if rooms.is_read_only(room) {
            return Err(SyncError::RoomReadOnly(room.clone()));
        }
        Ok(())
    }

    /// A keystroke in `room`. Emits `typing:start` at the start of a burst
    /// and again every refresh interval while it continues; (re)arms the
    /// idle timer that emits `typing:stop`. Best-effort: never fails.
    pub fn notify_typing<S: CommandSink>(&mut self, sink: &S, rooms: &RoomGraph, room: &RoomKey) {
        if self.gate(sink, rooms, room).is_err() {
            return;
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let timer = self.arm(room, generation);
        let now = Instant::now();

        let emit = match self.typing.get_mut(room) {
            Some(state) => {
                state.timer.abort();
                state.timer = timer;
                state.generation = generation;
                if now.duration_since(state.started_at) >= self.typing_refresh {
                    state.started_at = now;
                    true
                } else {
                    false
                }
            }
            None => {
                self.typing.insert(
                    room.clone(),
                    OutboundTyping {
                        started_at: now,
                        generation,
                        timer,
                    },
                );
                true
            }
        };

        if emit {
            if let Err(e) = sink.send(OutboundCommand::TypingStart { room: room.clone() }) {
                debug!("typing:start for {} not sent: {}", room, e);
            }
        }
    }

    fn arm(&self, room: &RoomKey, generation: u64) -> AbortHandle {
        let timers = self.timers.clone();
        let delay = self.typing_stop_delay;
        let event = TimerEvent::TypingIdle {
            room: room.clone(),
            generation,
        };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = timers.send(event);
        })
        .abort_handle()
    }

    /// The idle timer fired. Ignored if a later keystroke re-armed it.
    pub fn on_typing_idle<S: CommandSink>(&mut self, sink: &S, room: &RoomKey, generation: u64) {
        if self.typing.get(room).is_some_and(|s| s.generation == generation) {
            self.typing.remove(room);
            send_typing_stop(sink, room);
        }
    }

    /// End any typing burst in `room` now, e.g. on send or room switch.
    pub fn cancel_typing<S: CommandSink>(&mut self, sink: &S, room: &RoomKey) {
        if let Some(state) = self.typing.remove(room) {
            state.timer.abort();
            send_typing_stop(sink, room);
        }
    }

    pub fn is_typing(&self, room: &RoomKey) -> bool {
        self.typing.contains_key(room)
    }
}

fn send_typing_stop<S: CommandSink>(sink: &S, room: &RoomKey) {
    if let Err(e) = sink.send(OutboundCommand::TypingStop { room: room.clone() }) {
        warn!("typing:stop for {} not sent: {}", room, e);
    }
}

impl Drop for CommandGateway {
    fn drop(&mut self) {
        for state in self.typing.values() {
            state.timer.abort();
        }
    }
}
