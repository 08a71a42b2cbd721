use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical address of a conversation scope.
///
/// Wire form is `g:<guild>:c:<channel>` for guild channels,
/// `g:<guild>:c:<channel>:t:<thread>` for threads and `dm:<a>:<b>` for
/// direct messages, where `a <= b`. Inside a segment `%` is written as
/// `%25` and `:` as `%3A`, so any id round-trips.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RoomKey {
    Channel {
        guild: String,
        channel: String,
    },
    Thread {
        guild: String,
        channel: String,
        thread: String,
    },
    Direct {
        low: String,
        high: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomKeyError {
    #[error("malformed room key '{0}'")]
    Malformed(String),
    #[error("room key '{0}' has an empty segment")]
    EmptySegment(String),
}

/// Direct-message key for two participants. Either side produces the same key.
pub fn dm_key(a: &str, b: &str) -> RoomKey {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    RoomKey::Direct {
        low: low.to_string(),
        high: high.to_string(),
    }
}

impl RoomKey {
    pub fn channel(guild: impl Into<String>, channel: impl Into<String>) -> Self {
        Self::Channel {
            guild: guild.into(),
            channel: channel.into(),
        }
    }

    pub fn thread(
        guild: impl Into<String>,
        channel: impl Into<String>,
        thread: impl Into<String>,
    ) -> Self {
        Self::Thread {
            guild: guild.into(),
            channel: channel.into(),
            thread: thread.into(),
        }
    }

    /// The channel a thread nests under. Channels and DMs have no parent.
    pub fn parent(&self) -> Option<RoomKey> {
        match self {
            Self::Thread { guild, channel, .. } => Some(Self::channel(guild.clone(), channel.clone())),
            _ => None,
        }
    }

    /// Thread room for `thread` under this channel. `None` unless `self` is a channel.
    pub fn child_thread(&self, thread: impl Into<String>) -> Option<RoomKey> {
        match self {
            Self::Channel { guild, channel } => {
                Some(Self::thread(guild.clone(), channel.clone(), thread))
            }
            _ => None,
        }
    }

    pub fn is_channel(&self) -> bool {
        matches!(self, Self::Channel { .. })
    }

    pub fn is_thread(&self) -> bool {
        matches!(self, Self::Thread { .. })
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, Self::Direct { .. })
    }

    pub fn guild(&self) -> Option<&str> {
        match self {
            Self::Channel { guild, .. } | Self::Thread { guild, .. } => Some(guild),
            Self::Direct { .. } => None,
        }
    }

    /// The other participant of a DM, from the point of view of `me`.
    pub fn dm_peer(&self, me: &str) -> Option<&str> {
        match self {
            Self::Direct { low, high } if low == me => Some(high),
            Self::Direct { low, high } if high == me => Some(low),
            _ => None,
        }
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channel { guild, channel } => {
                write!(f, "g:{}:c:{}", escape(guild), escape(channel))
            }
            Self::Thread {
                guild,
                channel,
                thread,
            } => write!(
                f,
                "g:{}:c:{}:t:{}",
                escape(guild),
                escape(channel),
                escape(thread)
            ),
            Self::Direct { low, high } => write!(f, "dm:{}:{}", escape(low), escape(high)),
        }
    }
}

impl FromStr for RoomKey {
    type Err = RoomKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let decode = |segment: &str| unescape(segment).ok_or_else(|| RoomKeyError::Malformed(s.to_string()));
        let key = match parts.as_slice() {
            ["g", guild, "c", channel] => Self::channel(decode(*guild)?, decode(*channel)?),
            ["g", guild, "c", channel, "t", thread] => {
                Self::thread(decode(*guild)?, decode(*channel)?, decode(*thread)?)
            }
            ["dm", a, b] => dm_key(&decode(*a)?, &decode(*b)?),
            _ => return Err(RoomKeyError::Malformed(s.to_string())),
        };

        if parts.iter().any(|p| p.is_empty()) {
            return Err(RoomKeyError::EmptySegment(s.to_string()));
        }
        Ok(key)
    }
}

fn escape(segment: &str) -> Cow<'_, str> {
    if segment.contains([':', '%']) {
        Cow::Owned(segment.replace('%', "%25").replace(':', "%3A"))
    } else {
        Cow::Borrowed(segment)
    }
}

fn unescape(segment: &str) -> Option<String> {
    let mut out = String::with_capacity(segment.len());
    let mut rest = segment;
    while let Some(i) = rest.find('%') {
        out.push_str(&rest[..i]);
        match rest.get(i + 1..i + 3)? {
            "25" => out.push('%'),
            "3A" | "3a" => out.push(':'),
            _ => return None,
        }
        rest = &rest[i + 3..];
    }
    out.push_str(rest);
    Some(out)
}

impl TryFrom<String> for RoomKey {
    type Error = RoomKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RoomKey> for String {
    fn from(key: RoomKey) -> Self {
        key.to_string()
    }
}
