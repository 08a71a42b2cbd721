use serde::{Deserialize, Serialize};

use crate::models::{Identity, Message, MessageId};

// -- Auth --

#[derive(Debug, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub user_id: String,
    pub username: String,
    pub token: String,
}

impl LoginResponse {
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.user_id.clone(),
            username: self.username.clone(),
        }
    }
}

// -- Pages --

/// Opaque pagination token marking the oldest loaded message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub String);

impl From<MessageId> for Cursor {
    fn from(id: MessageId) -> Self {
        Cursor(id.to_string())
    }
}

/// One page of history, oldest first or in any order; the feed sorts by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Page {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub next_cursor: Option<Cursor>,
    #[serde(default)]
    pub has_more: bool,
}

// -- Uploads --

/// File selected for sending. Raw bytes only ever travel over HTTP.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    pub fn extension(&self) -> Option<String> {
        let (_, ext) = self.name.rsplit_once('.')?;
        Some(ext.to_ascii_lowercase())
    }

    pub fn is_image(&self) -> bool {
        self.mime.starts_with("image/")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadReceipt {
    pub url: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub mime: String,
}

// -- Polls --

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollDraft {
    pub question: String,
    pub options: Vec<String>,
    pub allow_multiple: bool,
    pub expires_hours: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollCreated {
    pub id: String,
}
