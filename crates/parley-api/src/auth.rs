use anyhow::Context;
use reqwest::Client;
use tracing::info;

use parley_types::Session;
use parley_types::api::{LoginRequest, LoginResponse};

use crate::ensure_success;

/// Exchange credentials for a session token.
pub async fn login(base_url: &str, username: &str, password: &str) -> anyhow::Result<Session> {
    let url = format!("{}/auth/login", base_url.trim_end_matches('/'));
    let resp = Client::new()
        .post(&url)
        .json(&LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        })
        .send()
        .await
        .with_context(|| format!("POST {}", url))?;

    let login: LoginResponse = ensure_success(resp, "Login")
        .await?
        .json()
        .await
        .context("decoding login response")?;

    info!("Logged in as {} ({})", login.username, login.user_id);
    Ok(Session {
        identity: login.identity(),
        token: login.token,
    })
}
