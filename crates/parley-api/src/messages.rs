use anyhow::Context;
use tracing::debug;

use parley_sync::PageSource;
use parley_types::RoomKey;
use parley_types::api::{Cursor, Page};

use crate::{ApiClient, ensure_success};

impl ApiClient {
    /// `GET /rooms/{room}/messages?limit=&before=`. Without a cursor the
    /// server returns the newest page.
    pub async fn fetch_messages(
        &self,
        room: &RoomKey,
        before: Option<&Cursor>,
        limit: usize,
    ) -> anyhow::Result<Page> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(cursor) = before {
            query.push(("before", cursor.0.clone()));
        }

        let resp = self
            .get(&format!("/rooms/{}/messages", room))
            .query(&query)
            .send()
            .await
            .with_context(|| format!("fetching messages for {}", room))?;

        let page: Page = ensure_success(resp, "Fetch messages")
            .await?
            .json()
            .await
            .context("decoding message page")?;
        debug!(
            "Fetched {} message(s) for {} (has_more: {})",
            page.messages.len(),
            room,
            page.has_more
        );
        Ok(page)
    }
}

impl PageSource for ApiClient {
    async fn fetch_page(
        &self,
        room: &RoomKey,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> anyhow::Result<Page> {
        self.fetch_messages(room, cursor.as_ref(), limit).await
    }
}
