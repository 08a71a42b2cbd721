use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use parley_types::api::{Cursor, Page};
use parley_types::{Message, MessageId, ReactionMap, RoomKey};

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    /// Newest page, replacing whatever the feed held.
    Fresh,
    /// The page preceding the current cursor.
    Older,
}

/// Identifies one in-flight page request. Completion is only applied if the
/// feed's generation and cursor still match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub room: RoomKey,
    pub kind: LoadKind,
    pub cursor: Option<Cursor>,
    pub generation: u64,
}

/// Ordered message log for one room.
///
/// Invariant: ids strictly increase by position, so no id appears twice.
#[derive(Debug)]
pub struct RoomFeed {
    messages: Vec<Message>,
    cursor: Option<Cursor>,
    has_more: bool,
    generation: u64,
    in_flight: Option<LoadKind>,
    /// Newest stored id when the pending fresh load started. Only messages
    /// above it arrived live during the fetch.
    fresh_floor: Option<MessageId>,
}

impl Default for RoomFeed {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            cursor: None,
            has_more: true,
            generation: 0,
            in_flight: None,
            fresh_floor: None,
        }
    }
}

impl RoomFeed {
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.position(id).ok().map(|i| &self.messages[i])
    }

    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    fn position(&self, id: MessageId) -> Result<usize, usize> {
        self.messages.binary_search_by_key(&id, |m| m.id)
    }

    fn get_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        match self.position(id) {
            Ok(i) => Some(&mut self.messages[i]),
            Err(_) => None,
        }
    }

    /// Insert a live message at its sorted position. Redelivery of a stored
    /// id is a no-op. Returns true if the feed changed.
    pub fn append_live(&mut self, message: Message) -> bool {
        if self.messages.last().is_none_or(|tail| message.id > tail.id) {
            self.messages.push(message);
            return true;
        }
        match self.position(message.id) {
            Ok(_) => false,
            Err(i) => {
                debug!("Out-of-order message {} placed at {}", message.id, i);
                self.messages.insert(i, message);
                true
            }
        }
    }

    pub fn apply_edit(&mut self, id: MessageId, content: &str, edited_at: DateTime<Utc>) -> bool {
        let Some(message) = self.get_mut(id) else {
            return false;
        };
        message.content = content.to_string();
        message.edited = true;
        message.edited_at = Some(edited_at);
        true
    }

    pub fn apply_delete(&mut self, id: MessageId) -> bool {
        match self.position(id) {
            Ok(i) => {
                self.messages.remove(i);
                true
            }
            Err(_) => false,
        }
    }

    pub fn apply_reaction_update(&mut self, id: MessageId, reactions: ReactionMap) -> bool {
        let Some(message) = self.get_mut(id) else {
            return false;
        };
        message.reactions = reactions;
        true
    }

    pub fn apply_pin(&mut self, id: MessageId, pinned: bool) -> bool {
        let Some(message) = self.get_mut(id) else {
            return false;
        };
        message.pinned = pinned;
        true
    }

    pub fn apply_thread(&mut self, id: MessageId, thread_id: &str) -> bool {
        let Some(message) = self.get_mut(id) else {
            return false;
        };
        message.thread_id = Some(thread_id.to_string());
        true
    }

    /// Replace the feed with the newest page. Stored messages newer than
    /// both the page and the feed as it was when the load began (live
    /// arrivals racing the fetch) are kept; anything else the page omits
    /// is gone on the server. Bumps the generation. Returns the page's
    /// message count.
    pub fn replace_with_fresh_page(&mut self, page: Page) -> usize {
        let incoming = sorted_unique(page.messages);
        let newest = incoming.last().map(|m| m.id);
        let keep_above = match (newest, self.fresh_floor.take()) {
            (Some(newest), Some(floor)) => Some(newest.max(floor)),
            (newest, None) => newest,
            (None, floor) => floor,
        };

        let newer_live: Vec<Message> = self
            .messages
            .drain(..)
            .filter(|m| keep_above.is_some_and(|k| m.id > k))
            .collect();

        self.cursor = page
            .next_cursor
            .or_else(|| incoming.first().map(|m| Cursor::from(m.id)));
        self.has_more = page.has_more;
        self.generation += 1;

        let count = incoming.len();
        self.messages = incoming;
        self.messages.extend(newer_live);
        count
    }

    /// Merge an older page. Ids already stored take the page's copy, which
    /// reflects current server state. Returns how many messages were new.
    fn merge_older(&mut self, page: Page) -> usize {
        let mut added = 0;
        for message in sorted_unique(page.messages) {
            match self.position(message.id) {
                Ok(i) => self.messages[i] = message,
                Err(i) => {
                    self.messages.insert(i, message);
                    added += 1;
                }
            }
        }

        self.cursor = page
            .next_cursor
            .or_else(|| self.messages.first().map(|m| Cursor::from(m.id)));
        self.has_more = page.has_more;
        added
    }
}

fn sorted_unique(mut messages: Vec<Message>) -> Vec<Message> {
    messages.sort_by_key(|m| m.id);
    messages.dedup_by_key(|m| m.id);
    messages
}

/// All room feeds, created lazily.
#[derive(Debug)]
pub struct FeedStore {
    feeds: HashMap<RoomKey, RoomFeed>,
    page_size: usize,
}

impl FeedStore {
    pub fn new(page_size: usize) -> Self {
        Self {
            feeds: HashMap::new(),
            page_size,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn feed(&self, room: &RoomKey) -> Option<&RoomFeed> {
        self.feeds.get(room)
    }

    fn feed_mut(&mut self, room: &RoomKey) -> &mut RoomFeed {
        self.feeds.entry(room.clone()).or_default()
    }

    fn loaded(&mut self, room: &RoomKey, what: &str, id: MessageId) -> Option<&mut RoomFeed> {
        let feed = self.feeds.get_mut(room);
        let loaded = feed.filter(|f| f.get(id).is_some());
        if loaded.is_none() {
            debug!("{} for unloaded message {} in {} ignored", what, id, room);
        }
        loaded
    }

    pub fn append_live(&mut self, room: &RoomKey, message: Message) -> bool {
        let id = message.id;
        let appended = self.feed_mut(room).append_live(message);
        if !appended {
            debug!("Duplicate delivery of message {} in {}", id, room);
        }
        appended
    }

    pub fn apply_edit(
        &mut self,
        room: &RoomKey,
        id: MessageId,
        content: &str,
        edited_at: DateTime<Utc>,
    ) -> bool {
        self.loaded(room, "edit", id)
            .is_some_and(|f| f.apply_edit(id, content, edited_at))
    }

    pub fn apply_delete(&mut self, room: &RoomKey, id: MessageId) -> bool {
        self.loaded(room, "delete", id)
            .is_some_and(|f| f.apply_delete(id))
    }

    pub fn apply_reaction_update(
        &mut self,
        room: &RoomKey,
        id: MessageId,
        reactions: ReactionMap,
    ) -> bool {
        self.loaded(room, "reactions", id)
            .is_some_and(|f| f.apply_reaction_update(id, reactions))
    }

    pub fn apply_pin(&mut self, room: &RoomKey, id: MessageId, pinned: bool) -> bool {
        self.loaded(room, "pin", id)
            .is_some_and(|f| f.apply_pin(id, pinned))
    }

    pub fn apply_thread(&mut self, room: &RoomKey, id: MessageId, thread_id: &str) -> bool {
        self.loaded(room, "thread", id)
            .is_some_and(|f| f.apply_thread(id, thread_id))
    }

    pub fn replace_with_fresh_page(&mut self, room: &RoomKey, page: Page) -> usize {
        self.feed_mut(room).replace_with_fresh_page(page)
    }

    /// Drop the room's cached messages and start a fresh first-page load.
    /// Any load already in flight for the room becomes stale.
    pub fn begin_fresh(&mut self, room: &RoomKey) -> LoadTicket {
        let feed = self.feed_mut(room);
        feed.messages.clear();
        feed.cursor = None;
        feed.has_more = true;
        self.begin_resync(room)
    }

    /// Start a fresh first-page load that keeps the current messages on
    /// display until the page arrives.
    pub fn begin_resync(&mut self, room: &RoomKey) -> LoadTicket {
        let feed = self.feed_mut(room);
        feed.generation += 1;
        feed.in_flight = Some(LoadKind::Fresh);
        feed.fresh_floor = Some(feed.messages.last().map_or(MessageId(0), |m| m.id));
        LoadTicket {
            room: room.clone(),
            kind: LoadKind::Fresh,
            cursor: None,
            generation: feed.generation,
        }
    }

    /// Start loading the page before the cursor. `None` while another load
    /// for the room is in flight or when history is exhausted.
    pub fn begin_older(&mut self, room: &RoomKey) -> Option<LoadTicket> {
        let feed = self.feed_mut(room);
        if feed.in_flight.is_some() {
            debug!("Load already in flight for {}, coalescing", room);
            return None;
        }
        if !feed.has_more {
            return None;
        }
        feed.in_flight = Some(LoadKind::Older);
        Some(LoadTicket {
            room: room.clone(),
            kind: LoadKind::Older,
            cursor: feed.cursor.clone(),
            generation: feed.generation,
        })
    }

    /// Make any in-flight load for `room` stale without touching its messages.
    pub fn invalidate(&mut self, room: &RoomKey) {
        if let Some(feed) = self.feeds.get_mut(room) {
            if feed.in_flight.take().is_some() {
                debug!("In-flight load for {} invalidated", room);
            }
            feed.generation += 1;
            feed.fresh_floor = None;
        }
    }

    /// Apply a resolved load. Returns how many messages it contributed, or
    /// `StaleLoad` if the feed has moved on since `ticket` was issued.
    pub fn complete(
        &mut self,
        ticket: &LoadTicket,
        result: Result<Page, SyncError>,
    ) -> Result<usize, SyncError> {
        let page_size = self.page_size;
        let feed = self.feeds.get_mut(&ticket.room).ok_or(SyncError::StaleLoad)?;
        if feed.generation != ticket.generation
            || feed.in_flight != Some(ticket.kind)
            || (ticket.kind == LoadKind::Older && feed.cursor != ticket.cursor)
        {
            return Err(SyncError::StaleLoad);
        }
        feed.in_flight = None;
        if result.is_err() {
            feed.fresh_floor = None;
        }

        let mut page = result?;
        // A short page means the server has nothing older.
        page.has_more &= page.messages.len() >= page_size;

        Ok(match ticket.kind {
            LoadKind::Fresh => feed.replace_with_fresh_page(page),
            LoadKind::Older => feed.merge_older(page),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use parley_types::Identity;

    use super::*;

    fn msg(id: u64, content: &str) -> Message {
        Message {
            id: MessageId(id),
            author: Identity {
                user_id: "u1".into(),
                username: "alice".into(),
            },
            content: content.into(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            edited: false,
            edited_at: None,
            pinned: false,
            reactions: ReactionMap::new(),
            file: None,
            thread_id: None,
        }
    }

    fn ids(feed: &RoomFeed) -> Vec<u64> {
        feed.messages().iter().map(|m| m.id.0).collect()
    }

    fn page(range: std::ops::RangeInclusive<u64>, has_more: bool) -> Page {
        Page {
            messages: range.map(|id| msg(id, "paged")).collect(),
            next_cursor: None,
            has_more,
        }
    }

    fn room() -> RoomKey {
        RoomKey::channel("1", "5")
    }

    #[test]
    fn append_is_idempotent() {
        let mut feed = RoomFeed::default();
        assert!(feed.append_live(msg(1, "a")));
        assert!(feed.append_live(msg(2, "b")));
        assert!(!feed.append_live(msg(2, "b")));
        assert!(!feed.append_live(msg(1, "a")));
        assert_eq!(ids(&feed), vec![1, 2]);
    }

    #[test]
    fn out_of_order_arrivals_stay_sorted() {
        let mut feed = RoomFeed::default();
        for id in [5, 1, 9, 3, 7, 2, 8, 3, 5, 4, 6, 10] {
            feed.append_live(msg(id, "x"));
            let current = ids(&feed);
            assert!(current.windows(2).all(|w| w[0] < w[1]), "{:?}", current);
        }
        assert_eq!(ids(&feed), (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn updates_for_unloaded_ids_are_noops() {
        let mut store = FeedStore::new(50);
        store.append_live(&room(), msg(10, "hello"));
        let now = Utc::now();

        assert!(!store.apply_edit(&room(), MessageId(3), "late", now));
        assert!(!store.apply_delete(&room(), MessageId(3)));
        assert!(!store.apply_pin(&room(), MessageId(3), true));
        assert!(!store.apply_reaction_update(&room(), MessageId(3), ReactionMap::new()));
        assert!(!store.apply_edit(&RoomKey::channel("9", "9"), MessageId(10), "x", now));

        assert!(store.apply_edit(&room(), MessageId(10), "hello!", now));
        let edited = store.feed(&room()).unwrap().get(MessageId(10)).unwrap();
        assert!(edited.edited);
        assert_eq!(edited.content, "hello!");
        assert_eq!(edited.edited_at, Some(now));

        assert!(store.apply_pin(&room(), MessageId(10), true));
        assert!(store.apply_delete(&room(), MessageId(10)));
        assert!(store.feed(&room()).unwrap().messages().is_empty());
    }

    #[test]
    fn reaction_update_replaces_whole_map() {
        let mut store = FeedStore::new(50);
        let mut first = msg(1, "a");
        first.reactions.add("🔥", "u9");
        store.append_live(&room(), first);

        let mut map = ReactionMap::new();
        map.add("👍", "u2");
        assert!(store.apply_reaction_update(&room(), MessageId(1), map.clone()));
        assert_eq!(store.feed(&room()).unwrap().get(MessageId(1)).unwrap().reactions, map);
    }

    #[test]
    fn fresh_page_keeps_newer_live_messages() {
        let mut store = FeedStore::new(3);
        let ticket = store.begin_fresh(&room());
        // Arrives while the page is in flight.
        store.append_live(&room(), msg(7, "live"));

        let count = store.complete(&ticket, Ok(page(4..=6, true))).unwrap();
        assert_eq!(count, 3);
        let feed = store.feed(&room()).unwrap();
        assert_eq!(ids(feed), vec![4, 5, 6, 7]);
        assert!(feed.has_more());
        assert_eq!(feed.cursor(), Some(&Cursor("4".into())));
        assert!(!feed.is_loading());
    }

    #[test]
    fn resync_keeps_messages_until_page_lands() {
        let mut store = FeedStore::new(3);
        let fresh = store.begin_fresh(&room());
        store.complete(&fresh, Ok(page(4..=6, true))).unwrap();

        let resync = store.begin_resync(&room());
        assert_eq!(ids(store.feed(&room()).unwrap()), vec![4, 5, 6]);
        store.complete(&resync, Ok(page(5..=7, true))).unwrap();
        assert_eq!(ids(store.feed(&room()).unwrap()), vec![5, 6, 7]);
    }

    #[test]
    fn empty_resync_page_clears_messages_deleted_offline() {
        let mut store = FeedStore::new(3);
        let fresh = store.begin_fresh(&room());
        store.complete(&fresh, Ok(page(1..=3, true))).unwrap();

        let resync = store.begin_resync(&room());
        let empty = Page {
            messages: Vec::new(),
            next_cursor: None,
            has_more: false,
        };
        store.complete(&resync, Ok(empty)).unwrap();
        let feed = store.feed(&room()).unwrap();
        assert!(feed.messages().is_empty());
        assert!(!feed.has_more());
    }

    #[test]
    fn empty_resync_page_keeps_live_arrivals() {
        let mut store = FeedStore::new(3);
        let fresh = store.begin_fresh(&room());
        store.complete(&fresh, Ok(page(1..=3, true))).unwrap();

        let resync = store.begin_resync(&room());
        store.append_live(&room(), msg(4, "during resync"));
        let empty = Page {
            messages: Vec::new(),
            next_cursor: None,
            has_more: false,
        };
        store.complete(&resync, Ok(empty)).unwrap();
        assert_eq!(ids(store.feed(&room()).unwrap()), vec![4]);
    }

    #[test]
    fn begin_fresh_discards_cached_feed() {
        let mut store = FeedStore::new(50);
        store.append_live(&room(), msg(1, "old"));
        store.begin_fresh(&room());
        assert!(store.feed(&room()).unwrap().messages().is_empty());
    }

    #[test]
    fn older_load_is_single_flight_and_prepends() {
        let mut store = FeedStore::new(3);
        let fresh = store.begin_fresh(&room());
        store.complete(&fresh, Ok(page(10..=12, true))).unwrap();

        let ticket = store.begin_older(&room()).unwrap();
        assert_eq!(ticket.cursor, Some(Cursor("10".into())));
        assert!(store.begin_older(&room()).is_none());

        let added = store.complete(&ticket, Ok(page(7..=9, true))).unwrap();
        assert_eq!(added, 3);
        assert_eq!(ids(store.feed(&room()).unwrap()), (7..=12).collect::<Vec<_>>());
        assert_eq!(store.feed(&room()).unwrap().cursor(), Some(&Cursor("7".into())));

        // Short page ends pagination even if the server claims more.
        let ticket = store.begin_older(&room()).unwrap();
        store.complete(&ticket, Ok(page(5..=6, true))).unwrap();
        assert!(!store.feed(&room()).unwrap().has_more());
        assert!(store.begin_older(&room()).is_none());
    }

    #[test]
    fn failed_load_releases_the_slot() {
        let mut store = FeedStore::new(3);
        let ticket = store.begin_older(&room()).unwrap();
        let err = store
            .complete(&ticket, Err(SyncError::PageFetchFailed("503".into())))
            .unwrap_err();
        assert_eq!(err, SyncError::PageFetchFailed("503".into()));
        assert!(store.begin_older(&room()).is_some());
    }

    #[test]
    fn invalidated_load_is_stale() {
        let mut store = FeedStore::new(3);
        let a = room();
        let b = RoomKey::channel("1", "6");

        let ticket_a = store.begin_fresh(&a);
        store.invalidate(&a);
        let ticket_b = store.begin_fresh(&b);

        assert_eq!(
            store.complete(&ticket_a, Ok(page(1..=3, true))),
            Err(SyncError::StaleLoad)
        );
        assert!(store.feed(&b).unwrap().messages().is_empty());
        assert!(store.feed(&a).unwrap().messages().is_empty());

        store.complete(&ticket_b, Ok(page(20..=22, false))).unwrap();
        assert_eq!(ids(store.feed(&b).unwrap()), vec![20, 21, 22]);
    }

    #[test]
    fn refresh_supersedes_older_load() {
        let mut store = FeedStore::new(3);
        let fresh = store.begin_fresh(&room());
        store.complete(&fresh, Ok(page(10..=12, true))).unwrap();
        let older = store.begin_older(&room()).unwrap();

        let again = store.begin_fresh(&room());
        assert_eq!(
            store.complete(&older, Ok(page(7..=9, true))),
            Err(SyncError::StaleLoad)
        );
        store.complete(&again, Ok(page(11..=13, true))).unwrap();
        assert_eq!(ids(store.feed(&room()).unwrap()), vec![11, 12, 13]);
    }

    #[test]
    fn fresh_replace_bumps_generation() {
        let mut feed = RoomFeed::default();
        let before = feed.generation();
        feed.replace_with_fresh_page(page(1..=2, false));
        assert_eq!(feed.generation(), before + 1);
        assert!(!feed.has_more());
    }
}
