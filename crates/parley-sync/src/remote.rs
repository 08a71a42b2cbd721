use std::future::Future;

use parley_types::api::{Cursor, FileUpload, Page, PollDraft, UploadReceipt};
use parley_types::{MessageId, RoomKey};

/// Page-fetch RPC. `cursor == None` asks for the newest page.
pub trait PageSource: Send + Sync + 'static {
    fn fetch_page(
        &self,
        room: &RoomKey,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> impl Future<Output = anyhow::Result<Page>> + Send;
}

/// HTTP operations acknowledged out-of-band from the event stream.
pub trait SideChannel: Send + Sync + 'static {
    fn upload(
        &self,
        room: &RoomKey,
        file: FileUpload,
    ) -> impl Future<Output = anyhow::Result<UploadReceipt>> + Send;

    fn create_poll(
        &self,
        message_id: MessageId,
        poll: PollDraft,
    ) -> impl Future<Output = anyhow::Result<String>> + Send;
}
