//! HTTP collaborators of the sync engine: login, history pages, uploads
//! and polls. Everything here is a thin `reqwest` wrapper; the engine only
//! sees the [`parley_sync::PageSource`] and [`parley_sync::SideChannel`] seams.

pub mod auth;
pub mod files;
pub mod messages;

use anyhow::bail;
use reqwest::{Client, RequestBuilder, Response};

pub use auth::login;

/// Authenticated client for the chat server's REST surface.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http.get(self.url(path)).bearer_auth(&self.token)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http.post(self.url(path)).bearer_auth(&self.token)
    }
}

/// Turn a non-2xx response into an error carrying status and body.
async fn ensure_success(resp: Response, what: &str) -> anyhow::Result<Response> {
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        bail!("{} failed ({}): {}", what, status, body);
    }
    Ok(resp)
}
