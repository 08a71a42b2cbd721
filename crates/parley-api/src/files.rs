use anyhow::Context;
use reqwest::multipart::{Form, Part};
use tracing::info;

use parley_sync::SideChannel;
use parley_types::api::{FileUpload, PollCreated, PollDraft, UploadReceipt};
use parley_types::{MessageId, RoomKey};

use crate::{ApiClient, ensure_success};

impl ApiClient {
    /// Multipart `POST /upload` with `file` and `room` fields.
    pub async fn upload_file(&self, room: &RoomKey, file: FileUpload) -> anyhow::Result<UploadReceipt> {
        let size = file.bytes.len();
        let part = Part::bytes(file.bytes)
            .file_name(file.name.clone())
            .mime_str(&file.mime)
            .with_context(|| format!("invalid mime type {}", file.mime))?;
        let form = Form::new().text("room", room.to_string()).part("file", part);

        let resp = self
            .post("/upload")
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("uploading {}", file.name))?;

        let receipt: UploadReceipt = ensure_success(resp, "Upload")
            .await?
            .json()
            .await
            .context("decoding upload receipt")?;
        info!("Uploaded {} ({} bytes) to {}", file.name, size, receipt.url);
        Ok(receipt)
    }

    /// `POST /messages/{id}/poll`. Returns the new poll's id.
    pub async fn create_message_poll(&self, message_id: MessageId, poll: &PollDraft) -> anyhow::Result<String> {
        let resp = self
            .post(&format!("/messages/{}/poll", message_id))
            .json(poll)
            .send()
            .await
            .with_context(|| format!("creating poll on message {}", message_id))?;

        let created: PollCreated = ensure_success(resp, "Create poll")
            .await?
            .json()
            .await
            .context("decoding poll response")?;
        Ok(created.id)
    }
}

impl SideChannel for ApiClient {
    async fn upload(&self, room: &RoomKey, file: FileUpload) -> anyhow::Result<UploadReceipt> {
        self.upload_file(room, file).await
    }

    async fn create_poll(&self, message_id: MessageId, poll: PollDraft) -> anyhow::Result<String> {
        self.create_message_poll(message_id, &poll).await
    }
}
