use anyhow::{Context, bail};

use parley_types::Identity;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Pre-issued token for a known identity.
    Token { token: String, identity: Identity },
    Password { username: String, password: String },
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub gateway_url: String,
    pub api_url: String,
    pub credentials: Credentials,
    pub page_size: usize,
    pub media_stream: bool,
}

impl ClientConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let gateway_url = var("PARLEY_GATEWAY_URL").unwrap_or_else(|| "ws://127.0.0.1:3000/ws".into());
        let api_url = var("PARLEY_API_URL").unwrap_or_else(|| "http://127.0.0.1:3000/api".into());

        let credentials = match (var("PARLEY_TOKEN"), var("PARLEY_USERNAME")) {
            (Some(token), Some(username)) => Credentials::Token {
                token,
                identity: Identity {
                    user_id: var("PARLEY_USER_ID").context("PARLEY_USER_ID is required with PARLEY_TOKEN")?,
                    username,
                },
            },
            (None, Some(username)) => Credentials::Password {
                username,
                password: var("PARLEY_PASSWORD").context("PARLEY_PASSWORD is not set")?,
            },
            (_, None) => bail!("set PARLEY_USERNAME plus PARLEY_PASSWORD or PARLEY_TOKEN"),
        };

        let page_size: usize = var("PARLEY_PAGE_SIZE")
            .unwrap_or_else(|| "50".into())
            .parse()
            .context("PARLEY_PAGE_SIZE must be a number")?;
        let media_stream = var("PARLEY_MEDIA_STREAM").is_some_and(|v| matches!(v.as_str(), "1" | "true" | "yes"));

        Ok(Self {
            gateway_url,
            api_url,
            credentials,
            page_size,
            media_stream,
        })
    }
}
