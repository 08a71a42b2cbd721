use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info, warn};

use parley_gateway::CommandSink;
use parley_types::events::OutboundCommand;
use parley_types::{Identity, MessageId, RoomKey, dm_key};

use crate::error::SyncError;

#[derive(Debug, Clone)]
pub struct Room {
    pub key: RoomKey,
    pub joined: bool,
    pub read_only: bool,
    /// Other users seen joining: user_id -> username
    pub members: BTreeMap<String, String>,
}

impl Room {
    fn new(key: RoomKey) -> Self {
        Self {
            key,
            joined: false,
            read_only: false,
            members: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub key: RoomKey,
    pub title: String,
    pub parent_message_id: Option<MessageId>,
}

/// Outcome of an active-room transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSwitch {
    /// Rooms a `leave` was issued for, previous active room first.
    pub left: Vec<RoomKey>,
    pub entered: RoomKey,
}

/// Guild channels, their threads and DM rooms, plus the single active room.
/// Rooms are created on first reference and kept for the session.
#[derive(Debug)]
pub struct RoomGraph {
    self_id: String,
    rooms: HashMap<RoomKey, Room>,
    /// channel -> threads created under it, in creation order
    threads: HashMap<RoomKey, Vec<ThreadInfo>>,
    active: Option<RoomKey>,
}

impl RoomGraph {
    pub fn new(identity: &Identity) -> Self {
        Self {
            self_id: identity.user_id.clone(),
            rooms: HashMap::new(),
            threads: HashMap::new(),
            active: None,
        }
    }

    pub fn active_room_key(&self) -> Option<&RoomKey> {
        self.active.as_ref()
    }

    pub fn room(&self, key: &RoomKey) -> Option<&Room> {
        self.rooms.get(key)
    }

    pub fn ensure(&mut self, key: &RoomKey) -> &mut Room {
        self.rooms
            .entry(key.clone())
            .or_insert_with(|| Room::new(key.clone()))
    }

    pub fn is_read_only(&self, key: &RoomKey) -> bool {
        self.rooms.get(key).is_some_and(|r| r.read_only)
    }

    /// Returns true if the flag changed.
    pub fn set_read_only(&mut self, key: &RoomKey, read_only: bool) -> bool {
        let room = self.ensure(key);
        let changed = room.read_only != read_only;
        room.read_only = read_only;
        changed
    }

    /// DM room between the current identity and `peer`.
    pub fn dm_with(&self, peer: &str) -> RoomKey {
        dm_key(&self.self_id, peer)
    }

    pub fn join_room<S: CommandSink>(&mut self, key: &RoomKey, sink: &S) -> Result<(), SyncError> {
        if self.rooms.get(key).is_some_and(|r| r.joined) {
            return Ok(());
        }
        sink.send(OutboundCommand::RoomJoin { room: key.clone() })?;
        self.ensure(key).joined = true;
        info!("Joined {}", key);
        Ok(())
    }

    pub fn leave_room<S: CommandSink>(&mut self, key: &RoomKey, sink: &S) -> Result<(), SyncError> {
        sink.send(OutboundCommand::RoomLeave { room: key.clone() })?;
        self.ensure(key).joined = false;
        if self.active.as_ref() == Some(key) {
            self.active = None;
            sink.track_active_room(None);
        }
        info!("Left {}", key);
        Ok(())
    }

    /// Make `key` the active room. Returns `None` if it already is.
    ///
    /// The previous room is left best-effort, except when `key` is a thread
    /// of it: opening a thread is an additional join. Leaving a thread for
    /// somewhere other than its channel (or a sibling thread) also leaves
    /// the channel.
    pub fn switch_active<S: CommandSink>(&mut self, key: RoomKey, sink: &S) -> Option<RoomSwitch> {
        if self.active.as_ref() == Some(&key) {
            return None;
        }

        let mut left = Vec::new();
        if let Some(previous) = self.active.take() {
            let entering_thread_of_previous = key.parent().as_ref() == Some(&previous);
            if !entering_thread_of_previous {
                let parent = previous.parent().filter(|p| {
                    *p != key
                        && key.parent().as_ref() != Some(p)
                        && self.rooms.get(p).is_some_and(|r| r.joined)
                });
                for room in std::iter::once(previous).chain(parent) {
                    self.leave_best_effort(&room, sink);
                    left.push(room);
                }
            }
        }

        let joined = match sink.send(OutboundCommand::RoomJoin { room: key.clone() }) {
            Ok(()) => true,
            Err(e) => {
                warn!("Join for {} not sent ({}); re-attached on reconnect", key, e);
                false
            }
        };
        self.ensure(&key).joined |= joined;
        self.active = Some(key.clone());
        sink.track_active_room(Some(&key));
        info!("Active room is now {}", key);

        Some(RoomSwitch { left, entered: key })
    }

    fn leave_best_effort<S: CommandSink>(&mut self, key: &RoomKey, sink: &S) {
        if let Err(e) = sink.send(OutboundCommand::RoomLeave { room: key.clone() }) {
            warn!("Leave for {} not sent: {}", key, e);
        }
        self.ensure(key).joined = false;
    }

    /// Apply `room:joined`. For the current identity this confirms
    /// membership and carries the read-only flag; returns true if that flag changed.
    pub fn apply_member_joined(
        &mut self,
        key: &RoomKey,
        user_id: &str,
        username: &str,
        read_only: bool,
    ) -> bool {
        let self_id = self.self_id.clone();
        let room = self.ensure(key);
        if user_id == self_id {
            room.joined = true;
            let changed = room.read_only != read_only;
            room.read_only = read_only;
            changed
        } else {
            room.members.insert(user_id.to_string(), username.to_string());
            false
        }
    }

    pub fn apply_member_left(&mut self, key: &RoomKey, user_id: &str) {
        if user_id == self.self_id {
            debug!("Server confirmed leave of {}", key);
            if let Some(room) = self.rooms.get_mut(key) {
                room.joined = false;
            }
        } else if let Some(room) = self.rooms.get_mut(key) {
            room.members.remove(user_id);
        }
    }

    /// Record a thread under `channel`. Returns the thread's room key, or
    /// `None` when `channel` is not a guild channel.
    pub fn register_thread(
        &mut self,
        channel: &RoomKey,
        thread_id: &str,
        title: &str,
        parent_message_id: Option<MessageId>,
    ) -> Option<RoomKey> {
        let key = channel.child_thread(thread_id)?;
        let threads = self.threads.entry(channel.clone()).or_default();
        if !threads.iter().any(|t| t.key == key) {
            threads.push(ThreadInfo {
                key: key.clone(),
                title: title.to_string(),
                parent_message_id,
            });
        }
        Some(key)
    }

    pub fn threads(&self, channel: &RoomKey) -> &[ThreadInfo] {
        self.threads.get(channel).map(Vec::as_slice).unwrap_or(&[])
    }
}
