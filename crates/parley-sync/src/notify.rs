use std::collections::HashMap;

use tracing::debug;

use parley_types::{Message, MessageId, RoomKey};

const PLACEHOLDER_BODY: &str = "New message";

/// A user-visible alert. At most one is pending per room; activating it
/// makes `room` the active room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub room: RoomKey,
    pub author: String,
    pub body: String,
    pub message_id: MessageId,
}

impl Alert {
    fn for_message(message: &Message, room: &RoomKey) -> Self {
        let body = if !message.content.trim().is_empty() {
            message.content.clone()
        } else if let Some(file) = &message.file {
            format!("📎 {}", file.name)
        } else {
            PLACEHOLDER_BODY.to_string()
        };
        Self {
            room: room.clone(),
            author: message.author.username.clone(),
            body,
            message_id: message.id,
        }
    }
}

/// Decides which inbound messages become alerts.
#[derive(Debug)]
pub struct NotificationDispatcher {
    self_id: String,
    visible: bool,
    pending: HashMap<RoomKey, Alert>,
}

impl NotificationDispatcher {
    pub fn new(self_id: impl Into<String>) -> Self {
        Self {
            self_id: self_id.into(),
            visible: true,
            pending: HashMap::new(),
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn pending(&self, room: &RoomKey) -> Option<&Alert> {
        self.pending.get(room)
    }

    /// Returns the alert to show, replacing any pending alert for the same room.
    pub fn on_inbound_message(
        &mut self,
        message: &Message,
        room: &RoomKey,
        active: Option<&RoomKey>,
    ) -> Option<Alert> {
        if message.author.user_id == self.self_id {
            return None;
        }
        if self.visible && active == Some(room) {
            return None;
        }
        if self
            .pending
            .get(room)
            .is_some_and(|a| a.message_id == message.id)
        {
            debug!("Alert for {} in {} already pending", message.id, room);
            return None;
        }

        let alert = Alert::for_message(message, room);
        self.pending.insert(room.clone(), alert.clone());
        Some(alert)
    }

    /// Track surface visibility. Becoming visible clears the active room's
    /// alert; the cleared rooms are returned.
    pub fn set_visible(&mut self, visible: bool, active: Option<&RoomKey>) -> Vec<RoomKey> {
        self.visible = visible;
        if !visible {
            return Vec::new();
        }
        active
            .and_then(|room| self.dismiss(room))
            .map(|alert| vec![alert.room])
            .unwrap_or_default()
    }

    /// The active room changed. A visible surface now shows it, so its alert goes.
    pub fn on_active_changed(&mut self, active: &RoomKey) -> Option<Alert> {
        if self.visible { self.dismiss(active) } else { None }
    }

    pub fn dismiss(&mut self, room: &RoomKey) -> Option<Alert> {
        self.pending.remove(room)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use parley_types::{Attachment, Identity, ReactionMap};

    use super::*;

    fn message(id: u64, author: &str, content: &str) -> Message {
        Message {
            id: MessageId(id),
            author: Identity {
                user_id: author.into(),
                username: author.to_uppercase(),
            },
            content: content.into(),
            created_at: Utc::now(),
            edited: false,
            edited_at: None,
            pinned: false,
            reactions: ReactionMap::new(),
            file: None,
            thread_id: None,
        }
    }

    #[test]
    fn own_messages_never_alert() {
        let mut alerts = NotificationDispatcher::new("me");
        let room = RoomKey::channel("1", "5");
        let other = RoomKey::channel("1", "6");

        for visible in [true, false] {
            alerts.set_visible(visible, Some(&room));
            assert!(alerts.on_inbound_message(&message(1, "me", "hi"), &room, Some(&room)).is_none());
            assert!(alerts.on_inbound_message(&message(2, "me", "hi"), &other, Some(&room)).is_none());
            assert!(alerts.on_inbound_message(&message(3, "me", "hi"), &room, None).is_none());
        }
    }

    #[test]
    fn active_visible_room_is_quiet() {
        let mut alerts = NotificationDispatcher::new("me");
        let room = RoomKey::channel("1", "5");
        assert!(alerts.on_inbound_message(&message(1, "bob", "hi"), &room, Some(&room)).is_none());

        alerts.set_visible(false, Some(&room));
        let alert = alerts
            .on_inbound_message(&message(2, "bob", "hi"), &room, Some(&room))
            .unwrap();
        assert_eq!(alert.author, "BOB");
        assert_eq!(alert.body, "hi");
    }

    #[test]
    fn one_alert_per_room() {
        let mut alerts = NotificationDispatcher::new("me");
        let active = RoomKey::channel("1", "5");
        let room = RoomKey::channel("1", "6");

        alerts.on_inbound_message(&message(1, "bob", "first"), &room, Some(&active));
        assert!(alerts.on_inbound_message(&message(1, "bob", "first"), &room, Some(&active)).is_none());
        alerts.on_inbound_message(&message(2, "bob", "second"), &room, Some(&active));
        assert_eq!(alerts.pending(&room).unwrap().body, "second");
    }

    #[test]
    fn body_falls_back_to_attachment_then_placeholder() {
        let mut alerts = NotificationDispatcher::new("me");
        let room = RoomKey::channel("1", "6");

        let mut with_file = message(1, "bob", "");
        with_file.file = Some(Attachment {
            name: "plan.pdf".into(),
            url: "/uploads/plan.pdf".into(),
            size: 1024,
            mime: "application/pdf".into(),
        });
        let alert = alerts.on_inbound_message(&with_file, &room, None).unwrap();
        assert_eq!(alert.body, "📎 plan.pdf");

        let alert = alerts.on_inbound_message(&message(2, "bob", "  "), &room, None).unwrap();
        assert_eq!(alert.body, PLACEHOLDER_BODY);
    }

    #[test]
    fn regaining_visibility_clears_only_active_room() {
        let mut alerts = NotificationDispatcher::new("me");
        let active = RoomKey::channel("1", "5");
        let other = RoomKey::channel("1", "6");
        alerts.set_visible(false, Some(&active));

        alerts.on_inbound_message(&message(1, "bob", "a"), &active, Some(&active));
        alerts.on_inbound_message(&message(2, "bob", "b"), &other, Some(&active));

        assert_eq!(alerts.set_visible(true, Some(&active)), vec![active.clone()]);
        assert!(alerts.pending(&active).is_none());
        assert!(alerts.pending(&other).is_some());
    }
}
