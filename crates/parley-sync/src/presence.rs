use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use parley_types::RoomKey;

use crate::timers::TimerEvent;

struct Typist {
    user_id: String,
    username: String,
    refreshed_at: Instant,
    generation: u64,
    timer: AbortHandle,
}

/// Inbound typing state per room. Each entry owns a one-shot expiry task
/// that is replaced on refresh, so a lost `typing:stop` still clears it.
pub struct PresenceTracker {
    quiet: Duration,
    rooms: HashMap<RoomKey, Vec<Typist>>,
    next_generation: u64,
    timers: mpsc::UnboundedSender<TimerEvent>,
}

impl PresenceTracker {
    pub fn new(quiet: Duration, timers: mpsc::UnboundedSender<TimerEvent>) -> Self {
        Self {
            quiet,
            rooms: HashMap::new(),
            next_generation: 0,
            timers,
        }
    }

    /// Add or refresh a typist. Returns true if the room's list changed.
    pub fn mark_typing(&mut self, room: &RoomKey, user_id: &str, username: &str) -> bool {
        self.next_generation += 1;
        let generation = self.next_generation;
        let timer = self.arm(room, user_id, generation);
        let typists = self.rooms.entry(room.clone()).or_default();

        if let Some(existing) = typists.iter_mut().find(|t| t.user_id == user_id) {
            existing.timer.abort();
            existing.timer = timer;
            existing.generation = generation;
            existing.refreshed_at = Instant::now();
            trace!("{} still typing in {}", username, room);
            return false;
        }

        typists.push(Typist {
            user_id: user_id.to_string(),
            username: username.to_string(),
            refreshed_at: Instant::now(),
            generation,
            timer,
        });
        debug!("{} started typing in {}", username, room);
        true
    }

    fn arm(&self, room: &RoomKey, user_id: &str, generation: u64) -> AbortHandle {
        let timers = self.timers.clone();
        let quiet = self.quiet;
        let event = TimerEvent::PresenceExpired {
            room: room.clone(),
            user_id: user_id.to_string(),
            generation,
        };
        tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            let _ = timers.send(event);
        })
        .abort_handle()
    }

    pub fn mark_stopped(&mut self, room: &RoomKey, user_id: &str) -> bool {
        self.remove_where(room, |t| t.user_id == user_id)
    }

    /// Handle an expiry firing. Ignored if the entry was refreshed since.
    pub fn on_expired(&mut self, room: &RoomKey, user_id: &str, generation: u64) -> bool {
        let expired = self.remove_where(room, |t| t.user_id == user_id && t.generation == generation);
        if expired {
            debug!("Typing entry for {} in {} expired", user_id, room);
        }
        expired
    }

    fn remove_where(&mut self, room: &RoomKey, pred: impl Fn(&Typist) -> bool) -> bool {
        let Some(typists) = self.rooms.get_mut(room) else {
            return false;
        };
        let Some(i) = typists.iter().position(pred) else {
            return false;
        };
        typists.remove(i).timer.abort();
        if typists.is_empty() {
            self.rooms.remove(room);
        }
        true
    }

    /// Usernames typing in `room`, first to start first.
    pub fn current_typists(&self, room: &RoomKey) -> Vec<&str> {
        let now = Instant::now();
        self.rooms
            .get(room)
            .map(|typists| {
                typists
                    .iter()
                    .filter(|t| now.duration_since(t.refreshed_at) < self.quiet)
                    .map(|t| t.username.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn indicator_text(&self, room: &RoomKey) -> String {
        compose_indicator_text(&self.current_typists(room))
    }

    /// Forget every typist in `room`.
    pub fn reset(&mut self, room: &RoomKey) {
        for typist in self.rooms.remove(room).unwrap_or_default() {
            typist.timer.abort();
        }
    }
}

impl Drop for PresenceTracker {
    fn drop(&mut self) {
        for typist in self.rooms.values().flatten() {
            typist.timer.abort();
        }
    }
}

/// Render the typing indicator line. Empty when nobody is typing.
pub fn compose_indicator_text<S: AsRef<str>>(names: &[S]) -> String {
    match names {
        [] => String::new(),
        [one] => format!("{} is typing…", one.as_ref()),
        [first, second] => format!("{} and {} are typing…", first.as_ref(), second.as_ref()),
        [first, rest @ ..] => format!("{} and {} others are typing…", first.as_ref(), rest.len()),
    }
}
