use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use parley_gateway::{CommandSink, Inbound, StreamClass};
use parley_types::api::{FileUpload, Page, PollDraft, UploadReceipt};
use parley_types::events::InboundEvent;
use parley_types::{Attachment, Identity, Message, MessageId, RoomKey};

use crate::commands::CommandGateway;
use crate::config::EngineConfig;
use crate::error::SyncError;
use crate::feed::{FeedStore, LoadKind, LoadTicket};
use crate::notify::{Alert, NotificationDispatcher};
use crate::presence::PresenceTracker;
use crate::remote::{PageSource, SideChannel};
use crate::rooms::{RoomGraph, RoomSwitch, ThreadInfo};
use crate::timers::TimerEvent;

const READ_ONLY_REASON: &str = "read_only";

/// State changes for the presentation layer to re-render from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineUpdate {
    FeedChanged { room: RoomKey },
    ActiveRoomChanged { room: RoomKey, left: Vec<RoomKey> },
    TypingChanged { room: RoomKey, text: String },
    Alert(Alert),
    AlertCleared { room: RoomKey },
    ReadOnlyChanged { room: RoomKey, read_only: bool },
    ThreadCreated { channel: RoomKey, thread: ThreadInfo },
    LoadFailed { room: RoomKey, error: SyncError },
}

/// Point-in-time copy of one room for rendering.
#[derive(Debug, Clone, Default)]
pub struct FeedSnapshot {
    pub messages: Vec<Message>,
    pub has_more: bool,
    pub loading: bool,
    pub typing_text: String,
    pub read_only: bool,
}

type Reply<T> = oneshot::Sender<Result<T, SyncError>>;

enum Request {
    Join { room: RoomKey, reply: Reply<()> },
    Leave { room: RoomKey, reply: Reply<()> },
    SwitchActive { room: RoomKey, reply: Reply<Option<RoomSwitch>> },
    OpenDm { peer: String, reply: Reply<Option<RoomSwitch>> },
    LoadOlder { room: RoomKey, reply: Reply<usize> },
    Send { room: RoomKey, text: String, file: Option<FileUpload>, reply: Reply<()> },
    Edit { room: RoomKey, message_id: MessageId, text: String, reply: Reply<()> },
    Delete { room: RoomKey, message_id: MessageId, reply: Reply<()> },
    React { room: RoomKey, message_id: MessageId, emoji: String, add: bool, reply: Reply<()> },
    ToggleReaction { room: RoomKey, message_id: MessageId, emoji: String, reply: Reply<bool> },
    Pin { room: RoomKey, message_id: MessageId, pinned: bool, reply: Reply<()> },
    CreateThread { channel: RoomKey, parent: MessageId, title: String, reply: Reply<()> },
    CreatePoll { room: RoomKey, message_id: MessageId, poll: PollDraft, reply: Reply<String> },
    Typing { room: RoomKey },
    SetVisible { visible: bool },
    ActivateAlert { room: RoomKey, reply: Reply<Option<RoomSwitch>> },
    DismissAlert { room: RoomKey },
    Snapshot { room: RoomKey, reply: Reply<FeedSnapshot> },
    ActiveRoom { reply: Reply<Option<RoomKey>> },
    Threads { channel: RoomKey, reply: Reply<Vec<ThreadInfo>> },
    Shutdown,
}

/// Results of I/O the engine spawned, posted back into its loop.
enum Completion {
    PageLoaded {
        ticket: LoadTicket,
        result: Result<Page, SyncError>,
    },
    Uploaded {
        room: RoomKey,
        text: String,
        name: String,
        result: Result<UploadReceipt, SyncError>,
        reply: Reply<()>,
    },
}

/// Owns every store on a single task. Inbound events, caller requests, I/O
/// completions and timer firings are handled one at a time.
pub struct SyncEngine<S, P, U> {
    identity: Identity,
    config: EngineConfig,
    sink: S,
    pages: Arc<P>,
    side: Arc<U>,
    rooms: RoomGraph,
    feeds: FeedStore,
    presence: PresenceTracker,
    alerts: NotificationDispatcher,
    commands: CommandGateway,
    requests: mpsc::UnboundedReceiver<Request>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    timers: mpsc::UnboundedReceiver<TimerEvent>,
    updates: mpsc::UnboundedSender<EngineUpdate>,
    /// Callers waiting on the in-flight load for (room, generation).
    load_waiters: HashMap<(RoomKey, u64), Vec<Reply<usize>>>,
}

impl<S, P, U> SyncEngine<S, P, U>
where
    S: CommandSink,
    P: PageSource,
    U: SideChannel,
{
    pub fn new(
        identity: Identity,
        sink: S,
        pages: P,
        side: U,
        config: EngineConfig,
    ) -> (Self, EngineHandle, mpsc::UnboundedReceiver<EngineUpdate>) {
        let (requests_tx, requests) = mpsc::unbounded_channel();
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let (timers_tx, timers) = mpsc::unbounded_channel();
        let (updates, updates_rx) = mpsc::unbounded_channel();

        let engine = Self {
            rooms: RoomGraph::new(&identity),
            feeds: FeedStore::new(config.page_size),
            presence: PresenceTracker::new(config.typing_quiet, timers_tx.clone()),
            alerts: NotificationDispatcher::new(identity.user_id.clone()),
            commands: CommandGateway::new(identity.user_id.clone(), &config, timers_tx),
            identity,
            config,
            sink,
            pages: Arc::new(pages),
            side: Arc::new(side),
            requests,
            completions_tx,
            completions,
            timers,
            updates,
            load_waiters: HashMap::new(),
        };
        let handle = EngineHandle {
            requests: requests_tx,
        };
        (engine, handle, updates_rx)
    }

    /// Drive the engine until shutdown, every handle is dropped, or the
    /// inbound stream closes.
    pub async fn run(mut self, mut inbound: mpsc::UnboundedReceiver<Inbound>) {
        info!(
            "Sync engine running as {} ({})",
            self.identity.username, self.identity.user_id
        );
        loop {
            tokio::select! {
                event = inbound.recv() => match event {
                    Some(inbound) => self.on_inbound(inbound),
                    None => {
                        info!("Inbound stream closed");
                        break;
                    }
                },
                request = self.requests.recv() => match request {
                    Some(Request::Shutdown) | None => break,
                    Some(request) => self.on_request(request),
                },
                Some(completion) = self.completions.recv() => self.on_completion(completion),
                Some(timer) = self.timers.recv() => self.on_timer(timer),
            }
        }
        info!("Sync engine stopped");
    }

    fn emit(&self, update: EngineUpdate) {
        // No observer is fine; the stores stay authoritative.
        let _ = self.updates.send(update);
    }

    fn emit_typing(&self, room: &RoomKey) {
        self.emit(EngineUpdate::TypingChanged {
            room: room.clone(),
            text: self.presence.indicator_text(room),
        });
    }

    // -- Inbound --

    fn on_inbound(&mut self, inbound: Inbound) {
        if inbound.stream == StreamClass::Media {
            debug!("Media event {:?} left to media subscribers", inbound.event);
            return;
        }

        match inbound.event {
            InboundEvent::Ready { .. } => self.resync_active(),
            InboundEvent::MessageNew { room, message } => self.on_message(room, message),
            InboundEvent::MessageEdited {
                room,
                message_id,
                content,
                edited_at,
            } => {
                if self.feeds.apply_edit(&room, message_id, &content, edited_at) {
                    self.emit(EngineUpdate::FeedChanged { room });
                }
            }
            InboundEvent::MessageDeleted { room, message_id } => {
                if self.feeds.apply_delete(&room, message_id) {
                    self.emit(EngineUpdate::FeedChanged { room });
                }
            }
            InboundEvent::MessageReactions {
                room,
                message_id,
                reactions,
            } => {
                if self.feeds.apply_reaction_update(&room, message_id, reactions) {
                    self.emit(EngineUpdate::FeedChanged { room });
                }
            }
            InboundEvent::PinChanged {
                room,
                message_id,
                pinned,
            } => {
                if self.feeds.apply_pin(&room, message_id, pinned) {
                    self.emit(EngineUpdate::FeedChanged { room });
                }
            }
            InboundEvent::TypingStart {
                room,
                user_id,
                username,
            } => {
                if user_id != self.identity.user_id
                    && self.presence.mark_typing(&room, &user_id, &username)
                {
                    self.emit_typing(&room);
                }
            }
            InboundEvent::TypingStop { room, user_id, .. } => {
                if self.presence.mark_stopped(&room, &user_id) {
                    self.emit_typing(&room);
                }
            }
            InboundEvent::RoomJoined {
                room,
                user_id,
                username,
                read_only,
            } => {
                if self
                    .rooms
                    .apply_member_joined(&room, &user_id, &username, read_only)
                {
                    self.emit(EngineUpdate::ReadOnlyChanged { room, read_only });
                }
            }
            InboundEvent::RoomLeft { room, user_id, .. } => {
                self.rooms.apply_member_left(&room, &user_id);
                if self.presence.mark_stopped(&room, &user_id) {
                    self.emit_typing(&room);
                }
            }
            InboundEvent::ThreadCreated {
                channel,
                thread_id,
                title,
                parent_message_id,
            } => self.on_thread_created(channel, &thread_id, &title, parent_message_id),
            InboundEvent::PermissionError { room, reason } => {
                if reason == READ_ONLY_REASON {
                    if self.rooms.set_read_only(&room, true) {
                        warn!("{} is read-only, sending disabled", room);
                        self.emit(EngineUpdate::ReadOnlyChanged {
                            room,
                            read_only: true,
                        });
                    }
                } else {
                    warn!("Permission error in {}: {}", room, reason);
                }
            }
            InboundEvent::Signal { from_user_id, .. } => {
                debug!("Signal from {} on chat stream ignored", from_user_id);
            }
        }
    }

    fn on_message(&mut self, room: RoomKey, message: Message) {
        if !self.feeds.append_live(&room, message.clone()) {
            // Redelivery: already stored, already alerted.
            return;
        }
        self.emit(EngineUpdate::FeedChanged { room: room.clone() });

        if self.presence.mark_stopped(&room, &message.author.user_id) {
            self.emit_typing(&room);
        }
        if let Some(alert) = self
            .alerts
            .on_inbound_message(&message, &room, self.rooms.active_room_key())
        {
            self.emit(EngineUpdate::Alert(alert));
        }
    }

    fn on_thread_created(
        &mut self,
        channel: RoomKey,
        thread_id: &str,
        title: &str,
        parent_message_id: Option<MessageId>,
    ) {
        let Some(key) = self
            .rooms
            .register_thread(&channel, thread_id, title, parent_message_id)
        else {
            warn!("thread:created under non-channel {} ignored", channel);
            return;
        };
        let stamped = parent_message_id
            .is_some_and(|parent| self.feeds.apply_thread(&channel, parent, thread_id));
        if stamped {
            self.emit(EngineUpdate::FeedChanged {
                room: channel.clone(),
            });
        }
        info!("Thread '{}' created as {}", title, key);
        self.emit(EngineUpdate::ThreadCreated {
            channel,
            thread: ThreadInfo {
                key,
                title: title.to_string(),
                parent_message_id,
            },
        });
    }

    /// A (re)connect handshake completed: refresh the active room so the
    /// feed reflects anything missed while the stream was down.
    fn resync_active(&mut self) {
        let Some(active) = self.rooms.active_room_key().cloned() else {
            return;
        };
        info!("Resyncing {} after handshake", active);
        let ticket = self.feeds.begin_resync(&active);
        self.spawn_load(ticket);
    }

    // -- Requests --

    fn on_request(&mut self, request: Request) {
        match request {
            Request::Join { room, reply } => {
                let _ = reply.send(self.rooms.join_room(&room, &self.sink));
            }
            Request::Leave { room, reply } => {
                let result = self.rooms.leave_room(&room, &self.sink);
                if result.is_ok() {
                    self.forget_room(&room);
                }
                let _ = reply.send(result);
            }
            Request::SwitchActive { room, reply } => {
                let _ = reply.send(Ok(self.switch_active(room)));
            }
            Request::OpenDm { peer, reply } => {
                let room = self.rooms.dm_with(&peer);
                let _ = reply.send(Ok(self.switch_active(room)));
            }
            Request::LoadOlder { room, reply } => self.load_older(room, reply),
            Request::Send {
                room,
                text,
                file,
                reply,
            } => match file {
                None => {
                    let result =
                        self.commands
                            .send_message(&self.sink, &self.rooms, &room, &text, None);
                    let _ = reply.send(result);
                }
                Some(file) => self.upload_then_send(room, text, file, reply),
            },
            Request::Edit {
                room,
                message_id,
                text,
                reply,
            } => {
                let _ = reply.send(self.commands.edit_message(
                    &self.sink,
                    &self.rooms,
                    &room,
                    message_id,
                    &text,
                ));
            }
            Request::Delete {
                room,
                message_id,
                reply,
            } => {
                let _ = reply.send(self.commands.delete_message(
                    &self.sink,
                    &self.rooms,
                    &room,
                    message_id,
                ));
            }
            Request::React {
                room,
                message_id,
                emoji,
                add,
                reply,
            } => {
                let result = if add {
                    self.commands
                        .react(&self.sink, &self.rooms, &room, message_id, &emoji)
                } else {
                    self.commands
                        .unreact(&self.sink, &self.rooms, &room, message_id, &emoji)
                };
                let _ = reply.send(result);
            }
            Request::ToggleReaction {
                room,
                message_id,
                emoji,
                reply,
            } => {
                let _ = reply.send(self.commands.toggle_reaction(
                    &self.sink,
                    &self.rooms,
                    &self.feeds,
                    &room,
                    message_id,
                    &emoji,
                ));
            }
            Request::Pin {
                room,
                message_id,
                pinned,
                reply,
            } => {
                let _ = reply.send(self.commands.set_pinned(
                    &self.sink,
                    &self.rooms,
                    &room,
                    message_id,
                    pinned,
                ));
            }
            Request::CreateThread {
                channel,
                parent,
                title,
                reply,
            } => {
                let _ = reply.send(self.commands.create_thread(
                    &self.sink,
                    &self.rooms,
                    &channel,
                    parent,
                    &title,
                ));
            }
            Request::CreatePoll {
                room,
                message_id,
                poll,
                reply,
            } => self.create_poll(room, message_id, poll, reply),
            Request::Typing { room } => {
                self.commands.notify_typing(&self.sink, &self.rooms, &room);
            }
            Request::SetVisible { visible } => {
                let cleared = self
                    .alerts
                    .set_visible(visible, self.rooms.active_room_key());
                for room in cleared {
                    self.emit(EngineUpdate::AlertCleared { room });
                }
            }
            Request::ActivateAlert { room, reply } => {
                if self.alerts.dismiss(&room).is_some() {
                    self.emit(EngineUpdate::AlertCleared { room: room.clone() });
                }
                let _ = reply.send(Ok(self.switch_active(room)));
            }
            Request::DismissAlert { room } => {
                if self.alerts.dismiss(&room).is_some() {
                    self.emit(EngineUpdate::AlertCleared { room });
                }
            }
            Request::Snapshot { room, reply } => {
                let _ = reply.send(Ok(self.snapshot(&room)));
            }
            Request::ActiveRoom { reply } => {
                let _ = reply.send(Ok(self.rooms.active_room_key().cloned()));
            }
            Request::Threads { channel, reply } => {
                let _ = reply.send(Ok(self.rooms.threads(&channel).to_vec()));
            }
            // Handled by the run loop.
            Request::Shutdown => {}
        }
    }

    fn switch_active(&mut self, room: RoomKey) -> Option<RoomSwitch> {
        let previous = self.rooms.active_room_key().cloned();
        let switch = self.rooms.switch_active(room, &self.sink)?;

        if let Some(previous) = &previous {
            self.commands.cancel_typing(&self.sink, previous);
        }
        for left in &switch.left {
            self.forget_room(left);
        }

        let entered = switch.entered.clone();
        self.presence.reset(&entered);
        let ticket = self.feeds.begin_fresh(&entered);
        self.spawn_load(ticket);

        if self.alerts.on_active_changed(&entered).is_some() {
            self.emit(EngineUpdate::AlertCleared {
                room: entered.clone(),
            });
        }
        self.emit(EngineUpdate::ActiveRoomChanged {
            room: entered,
            left: switch.left.clone(),
        });
        Some(switch)
    }

    /// Drop per-room transient state for a room we no longer receive events for.
    fn forget_room(&mut self, room: &RoomKey) {
        self.feeds.invalidate(room);
        self.presence.reset(room);
        self.commands.cancel_typing(&self.sink, room);
    }

    fn load_older(&mut self, room: RoomKey, reply: Reply<usize>) {
        let in_flight = self
            .feeds
            .feed(&room)
            .filter(|f| f.is_loading())
            .map(|f| f.generation());
        if let Some(generation) = in_flight {
            debug!("Joining in-flight load for {}", room);
            self.load_waiters
                .entry((room, generation))
                .or_default()
                .push(reply);
            return;
        }

        match self.feeds.begin_older(&room) {
            Some(ticket) => {
                self.load_waiters
                    .entry((room, ticket.generation))
                    .or_default()
                    .push(reply);
                self.spawn_load(ticket);
            }
            None => {
                debug!("No older history for {}", room);
                let _ = reply.send(Ok(0));
            }
        }
    }

    fn spawn_load(&self, ticket: LoadTicket) {
        let pages = self.pages.clone();
        let completions = self.completions_tx.clone();
        let limit = self.config.page_size;
        tokio::spawn(async move {
            let result = pages
                .fetch_page(&ticket.room, ticket.cursor.clone(), limit)
                .await
                .map_err(|e| SyncError::PageFetchFailed(format!("{:#}", e)));
            let _ = completions.send(Completion::PageLoaded { ticket, result });
        });
    }

    fn upload_then_send(&mut self, room: RoomKey, text: String, file: FileUpload, reply: Reply<()>) {
        if let Err(e) = self
            .commands
            .check_upload(&self.sink, &self.rooms, &room, &file)
        {
            let _ = reply.send(Err(e));
            return;
        }

        info!("Uploading {} ({} bytes) for {}", file.name, file.bytes.len(), room);
        let side = self.side.clone();
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let name = file.name.clone();
            let result = side
                .upload(&room, file)
                .await
                .map_err(|e| SyncError::UploadFailed(format!("{:#}", e)));
            let _ = completions.send(Completion::Uploaded {
                room,
                text,
                name,
                result,
                reply,
            });
        });
    }

    fn create_poll(&mut self, room: RoomKey, message_id: MessageId, poll: PollDraft, reply: Reply<String>) {
        if let Err(e) = self.commands.check_poll(&self.rooms, &room, &poll) {
            let _ = reply.send(Err(e));
            return;
        }
        let side = self.side.clone();
        tokio::spawn(async move {
            let result = side
                .create_poll(message_id, poll)
                .await
                .map_err(|e| SyncError::PollFailed(format!("{:#}", e)));
            if let Err(e) = &result {
                warn!("Poll on {} in {} failed: {}", message_id, room, e);
            }
            let _ = reply.send(result);
        });
    }

    fn snapshot(&self, room: &RoomKey) -> FeedSnapshot {
        let feed = self.feeds.feed(room);
        FeedSnapshot {
            messages: feed.map(|f| f.messages().to_vec()).unwrap_or_default(),
            has_more: feed.is_some_and(|f| f.has_more()),
            loading: feed.is_some_and(|f| f.is_loading()),
            typing_text: self.presence.indicator_text(room),
            read_only: self.rooms.is_read_only(room),
        }
    }

    // -- Completions --

    fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::PageLoaded { ticket, result } => self.on_page_loaded(ticket, result),
            Completion::Uploaded {
                room,
                text,
                name,
                result,
                reply,
            } => {
                let result = result.and_then(|receipt| {
                    let attachment = Attachment {
                        name,
                        url: receipt.url,
                        size: receipt.size,
                        mime: receipt.mime,
                    };
                    self.commands
                        .send_message(&self.sink, &self.rooms, &room, &text, Some(attachment))
                });
                if let Err(e) = &result {
                    warn!("File send to {} failed: {}", room, e);
                }
                let _ = reply.send(result);
            }
        }
    }

    fn on_page_loaded(&mut self, ticket: LoadTicket, result: Result<Page, SyncError>) {
        let outcome = self.feeds.complete(&ticket, result);
        let waiters = self
            .load_waiters
            .remove(&(ticket.room.clone(), ticket.generation))
            .unwrap_or_default();

        let reply = match &outcome {
            Ok(count) => {
                debug!("{:?} page for {}: {} message(s)", ticket.kind, ticket.room, count);
                self.emit(EngineUpdate::FeedChanged {
                    room: ticket.room.clone(),
                });
                Ok(*count)
            }
            // Superseded by a switch or refresh; callers see an empty load.
            Err(SyncError::StaleLoad) => {
                debug!("Discarding stale {:?} page for {}", ticket.kind, ticket.room);
                Ok(0)
            }
            Err(e) => {
                warn!("{:?} page for {} failed: {}", ticket.kind, ticket.room, e);
                if ticket.kind == LoadKind::Fresh {
                    self.emit(EngineUpdate::LoadFailed {
                        room: ticket.room.clone(),
                        error: e.clone(),
                    });
                }
                Err(e.clone())
            }
        };

        for waiter in waiters {
            let _ = waiter.send(reply.clone());
        }
    }

    fn on_timer(&mut self, timer: TimerEvent) {
        match timer {
            TimerEvent::PresenceExpired {
                room,
                user_id,
                generation,
            } => {
                if self.presence.on_expired(&room, &user_id, generation) {
                    self.emit_typing(&room);
                }
            }
            TimerEvent::TypingIdle { room, generation } => {
                self.commands.on_typing_idle(&self.sink, &room, generation);
            }
        }
    }
}

/// Cloneable front door to a running [`SyncEngine`].
#[derive(Clone)]
pub struct EngineHandle {
    requests: mpsc::UnboundedSender<Request>,
}

impl EngineHandle {
    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Request) -> Result<T, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(make(reply))
            .map_err(|_| SyncError::EngineStopped)?;
        rx.await.map_err(|_| SyncError::EngineStopped)?
    }

    fn post(&self, request: Request) -> Result<(), SyncError> {
        self.requests
            .send(request)
            .map_err(|_| SyncError::EngineStopped)
    }

    pub async fn join_room(&self, room: RoomKey) -> Result<(), SyncError> {
        self.call(|reply| Request::Join { room, reply }).await
    }

    pub async fn leave_room(&self, room: RoomKey) -> Result<(), SyncError> {
        self.call(|reply| Request::Leave { room, reply }).await
    }

    /// Make `room` active and start loading its newest page. `None` if it
    /// already was active.
    pub async fn switch_active(&self, room: RoomKey) -> Result<Option<RoomSwitch>, SyncError> {
        self.call(|reply| Request::SwitchActive { room, reply }).await
    }

    pub async fn open_dm(&self, peer: impl Into<String>) -> Result<Option<RoomSwitch>, SyncError> {
        let peer = peer.into();
        self.call(|reply| Request::OpenDm { peer, reply }).await
    }

    /// Load the page before the room's cursor. Resolves with the number of
    /// messages added; concurrent callers share one request.
    pub async fn load_older_page(&self, room: RoomKey) -> Result<usize, SyncError> {
        self.call(|reply| Request::LoadOlder { room, reply }).await
    }

    pub async fn send_message(
        &self,
        room: RoomKey,
        text: impl Into<String>,
        file: Option<FileUpload>,
    ) -> Result<(), SyncError> {
        let text = text.into();
        self.call(|reply| Request::Send {
            room,
            text,
            file,
            reply,
        })
        .await
    }

    pub async fn edit_message(
        &self,
        room: RoomKey,
        message_id: MessageId,
        text: impl Into<String>,
    ) -> Result<(), SyncError> {
        let text = text.into();
        self.call(|reply| Request::Edit {
            room,
            message_id,
            text,
            reply,
        })
        .await
    }

    pub async fn delete_message(&self, room: RoomKey, message_id: MessageId) -> Result<(), SyncError> {
        self.call(|reply| Request::Delete {
            room,
            message_id,
            reply,
        })
        .await
    }

    pub async fn react(&self, room: RoomKey, message_id: MessageId, emoji: impl Into<String>) -> Result<(), SyncError> {
        let emoji = emoji.into();
        self.call(|reply| Request::React {
            room,
            message_id,
            emoji,
            add: true,
            reply,
        })
        .await
    }

    pub async fn unreact(&self, room: RoomKey, message_id: MessageId, emoji: impl Into<String>) -> Result<(), SyncError> {
        let emoji = emoji.into();
        self.call(|reply| Request::React {
            room,
            message_id,
            emoji,
            add: false,
            reply,
        })
        .await
    }

    /// Returns true if a reaction add was emitted, false for a removal.
    pub async fn toggle_reaction(
        &self,
        room: RoomKey,
        message_id: MessageId,
        emoji: impl Into<String>,
    ) -> Result<bool, SyncError> {
        let emoji = emoji.into();
        self.call(|reply| Request::ToggleReaction {
            room,
            message_id,
            emoji,
            reply,
        })
        .await
    }

    pub async fn pin(&self, room: RoomKey, message_id: MessageId) -> Result<(), SyncError> {
        self.call(|reply| Request::Pin {
            room,
            message_id,
            pinned: true,
            reply,
        })
        .await
    }

    pub async fn unpin(&self, room: RoomKey, message_id: MessageId) -> Result<(), SyncError> {
        self.call(|reply| Request::Pin {
            room,
            message_id,
            pinned: false,
            reply,
        })
        .await
    }

    pub async fn create_thread(
        &self,
        channel: RoomKey,
        parent: MessageId,
        title: impl Into<String>,
    ) -> Result<(), SyncError> {
        let title = title.into();
        self.call(|reply| Request::CreateThread {
            channel,
            parent,
            title,
            reply,
        })
        .await
    }

    /// Attach a poll to an existing message. Resolves with the poll id.
    pub async fn create_poll(
        &self,
        room: RoomKey,
        message_id: MessageId,
        poll: PollDraft,
    ) -> Result<String, SyncError> {
        self.call(|reply| Request::CreatePoll {
            room,
            message_id,
            poll,
            reply,
        })
        .await
    }

    pub fn notify_typing(&self, room: RoomKey) -> Result<(), SyncError> {
        self.post(Request::Typing { room })
    }

    pub fn set_visible(&self, visible: bool) -> Result<(), SyncError> {
        self.post(Request::SetVisible { visible })
    }

    /// Follow an alert: dismiss it and switch to its room.
    pub async fn activate_alert(&self, room: RoomKey) -> Result<Option<RoomSwitch>, SyncError> {
        self.call(|reply| Request::ActivateAlert { room, reply }).await
    }

    pub fn dismiss_alert(&self, room: RoomKey) -> Result<(), SyncError> {
        self.post(Request::DismissAlert { room })
    }

    pub async fn snapshot(&self, room: RoomKey) -> Result<FeedSnapshot, SyncError> {
        self.call(|reply| Request::Snapshot { room, reply }).await
    }

    pub async fn active_room(&self) -> Result<Option<RoomKey>, SyncError> {
        self.call(|reply| Request::ActiveRoom { reply }).await
    }

    pub async fn threads(&self, channel: RoomKey) -> Result<Vec<ThreadInfo>, SyncError> {
        self.call(|reply| Request::Threads { channel, reply }).await
    }

    pub fn shutdown(&self) -> Result<(), SyncError> {
        self.post(Request::Shutdown)
    }
}
