use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-assigned message id. Monotonic per deployment and the only sort key;
/// timestamps are display-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authenticated user as supplied by the auth collaborator. Only ever
/// compared for equality, never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
}

/// Credentials for the realtime handshake.
#[derive(Debug, Clone)]
pub struct Session {
    pub identity: Identity,
    pub token: String,
}

/// Descriptor of an already-uploaded file embedded in a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub mime: String,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.mime.starts_with("image/")
    }
}

/// Emoji token -> set of reactor user ids. A user reacts with a given emoji at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReactionMap(BTreeMap<String, BTreeSet<String>>);

impl ReactionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if `user_id` already reacted with `emoji`.
    pub fn add(&mut self, emoji: &str, user_id: &str) -> bool {
        self.0
            .entry(emoji.to_string())
            .or_default()
            .insert(user_id.to_string())
    }

    pub fn remove(&mut self, emoji: &str, user_id: &str) -> bool {
        let Some(users) = self.0.get_mut(emoji) else {
            return false;
        };
        let removed = users.remove(user_id);
        if users.is_empty() {
            self.0.remove(emoji);
        }
        removed
    }

    pub fn has_reacted(&self, emoji: &str, user_id: &str) -> bool {
        self.0.get(emoji).is_some_and(|users| users.contains(user_id))
    }

    pub fn count(&self, emoji: &str) -> usize {
        self.0.get(emoji).map_or(0, BTreeSet::len)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.0.iter().map(|(emoji, users)| (emoji.as_str(), users.len()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub author: Identity,
    #[serde(default)]
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub reactions: ReactionMap,
    #[serde(default)]
    pub file: Option<Attachment>,
    #[serde(default)]
    pub thread_id: Option<String>,
}
