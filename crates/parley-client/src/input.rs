use std::path::PathBuf;

use anyhow::{Context, bail};

use parley_types::api::PollDraft;
use parley_types::{MessageId, RoomKey};

pub const HELP: &str = "\
/join <room>              switch to a room (g:1:c:5, g:1:c:5:t:9)
/leave <room>             leave a room
/dm <user_id>             open a direct conversation
/go <room>                follow the pending alert for a room
/more                     load older history
/threads                  list threads of the active channel
/thread <id> <title>      start a thread on a message
/edit <id> <text>         edit a message
/delete <id>              delete a message
/react <id> <emoji>       toggle a reaction
/pin <id> | /unpin <id>   pin or unpin a message
/poll <id> <q> | a | b    attach a poll to a message
/file <path> [caption]    upload and send a file
/visible | /hidden        simulate window focus
/quit";

/// One line of terminal input.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Say(String),
    Join(RoomKey),
    Leave(RoomKey),
    Dm(String),
    Go(RoomKey),
    More,
    Threads,
    Thread { parent: MessageId, title: String },
    Edit { id: MessageId, text: String },
    Delete(MessageId),
    React { id: MessageId, emoji: String },
    Pin(MessageId),
    Unpin(MessageId),
    Poll { id: MessageId, poll: PollDraft },
    File { path: PathBuf, caption: String },
    Visible(bool),
    Help,
    Quit,
}

impl Input {
    pub fn parse(line: &str) -> anyhow::Result<Self> {
        let line = line.trim();
        let Some(command) = line.strip_prefix('/') else {
            return Ok(Self::Say(line.to_string()));
        };

        let (name, rest) = split_word(command);
        let input = match name {
            "join" => Self::Join(room(rest)?),
            "leave" => Self::Leave(room(rest)?),
            "go" => Self::Go(room(rest)?),
            "dm" => match rest {
                "" => bail!("usage: /dm <user_id>"),
                peer => Self::Dm(peer.to_string()),
            },
            "more" => Self::More,
            "threads" => Self::Threads,
            "thread" => {
                let (parent, title) = id_and_text(rest)?;
                Self::Thread { parent, title }
            }
            "edit" => {
                let (id, text) = id_and_text(rest)?;
                Self::Edit { id, text }
            }
            "delete" => Self::Delete(message_id(rest)?),
            "react" => {
                let (id, emoji) = id_and_text(rest)?;
                Self::React { id, emoji }
            }
            "pin" => Self::Pin(message_id(rest)?),
            "unpin" => Self::Unpin(message_id(rest)?),
            "poll" => {
                let (id, body) = id_and_text(rest)?;
                Self::Poll { id, poll: poll(&body) }
            }
            "file" => {
                let (path, caption) = split_word(rest);
                if path.is_empty() {
                    bail!("usage: /file <path> [caption]");
                }
                Self::File {
                    path: PathBuf::from(path),
                    caption: caption.to_string(),
                }
            }
            "visible" => Self::Visible(true),
            "hidden" => Self::Visible(false),
            "help" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => bail!("unknown command /{other}, try /help"),
        };
        Ok(input)
    }
}

fn split_word(s: &str) -> (&str, &str) {
    match s.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (s, ""),
    }
}

fn room(s: &str) -> anyhow::Result<RoomKey> {
    s.parse().with_context(|| format!("not a room: {s:?}"))
}

fn message_id(s: &str) -> anyhow::Result<MessageId> {
    let id: u64 = s.parse().with_context(|| format!("not a message id: {s:?}"))?;
    Ok(MessageId(id))
}

fn id_and_text(s: &str) -> anyhow::Result<(MessageId, String)> {
    let (id, text) = split_word(s);
    Ok((message_id(id)?, text.to_string()))
}

/// `question | option | option`. Validation happens in the engine.
fn poll(body: &str) -> PollDraft {
    let mut parts = body.split('|').map(str::trim);
    let question = parts.next().unwrap_or_default().to_string();
    PollDraft {
        question,
        options: parts.filter(|p| !p.is_empty()).map(str::to_string).collect(),
        allow_multiple: false,
        expires_hours: None,
    }
}
