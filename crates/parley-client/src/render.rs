use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::warn;

use parley_sync::{EngineHandle, EngineUpdate};
use parley_types::{Message, MessageId, RoomKey};

/// One feed line: `[#id hh:mm] author: text` plus markers.
pub fn format_message(message: &Message) -> String {
    let mut line = format!(
        "[#{} {}] {}: {}",
        message.id,
        message.created_at.format("%H:%M"),
        message.author.username,
        message.content
    );
    if let Some(file) = &message.file {
        if !message.content.is_empty() {
            line.push(' ');
        }
        line.push_str(&format!("📎 {} ({} bytes)", file.name, file.size));
    }
    if message.edited {
        line.push_str(" (edited)");
    }
    if message.pinned {
        line.push_str(" 📌");
    }
    for (emoji, count) in message.reactions.iter() {
        line.push_str(&format!(" {emoji}{count}"));
    }
    if let Some(thread) = &message.thread_id {
        line.push_str(&format!(" 🧵{thread}"));
    }
    line
}

/// Prints engine updates. Only the active room's feed is echoed; other
/// rooms surface through alerts.
pub async fn run(engine: EngineHandle, mut updates: mpsc::UnboundedReceiver<EngineUpdate>) {
    // Newest id printed per room, so a feed change only prints what is new.
    let mut printed: HashMap<RoomKey, MessageId> = HashMap::new();
    let mut active: Option<RoomKey> = None;

    while let Some(update) = updates.recv().await {
        match update {
            EngineUpdate::ActiveRoomChanged { room, left } => {
                for gone in &left {
                    printed.remove(gone);
                }
                printed.remove(&room);
                println!("── {room} ──");
                active = Some(room);
            }
            EngineUpdate::FeedChanged { room } => {
                if active.as_ref() != Some(&room) {
                    continue;
                }
                let snapshot = match engine.snapshot(room.clone()).await {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("Snapshot of {} failed: {}", room, e);
                        break;
                    }
                };
                let last = printed.get(&room).copied();
                for message in snapshot.messages.iter().filter(|m| last.is_none_or(|l| m.id > l)) {
                    println!("{}", format_message(message));
                }
                if let Some(newest) = snapshot.messages.last() {
                    printed.insert(room, newest.id);
                }
            }
            EngineUpdate::TypingChanged { room, text } => {
                if active.as_ref() == Some(&room) && !text.is_empty() {
                    println!("  … {text}");
                }
            }
            EngineUpdate::Alert(alert) => {
                println!("🔔 [{}] {}: {}  (/go {})", alert.room, alert.author, alert.body, alert.room);
            }
            EngineUpdate::AlertCleared { .. } => {}
            EngineUpdate::ReadOnlyChanged { room, read_only } => {
                if read_only {
                    println!("!! {room} is read-only");
                } else {
                    println!("{room} is writable again");
                }
            }
            EngineUpdate::ThreadCreated { channel, thread } => {
                println!("🧵 new thread in {channel}: {} ({})", thread.title, thread.key);
            }
            EngineUpdate::LoadFailed { room, error } => {
                println!("!! could not load {room}: {error}");
            }
        }
    }
}
