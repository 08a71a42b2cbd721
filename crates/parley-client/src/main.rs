mod config;
mod input;
mod render;

use std::path::Path;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use parley_api::ApiClient;
use parley_gateway::{ConnectionManager, Dispatcher, ReconnectPolicy, StreamClass, WsConnector};
use parley_sync::{EngineConfig, EngineHandle, SyncEngine};
use parley_types::api::FileUpload;
use parley_types::events::InboundEvent;
use parley_types::{RoomKey, Session};

use config::{ClientConfig, Credentials};
use input::{HELP, Input};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::from_env()?;

    let session = match &config.credentials {
        Credentials::Token { token, identity } => Session {
            identity: identity.clone(),
            token: token.clone(),
        },
        Credentials::Password { username, password } => {
            parley_api::login(&config.api_url, username, password).await?
        }
    };
    info!("Signed in as {} ({})", session.identity.username, session.identity.user_id);

    let api = ApiClient::new(&config.api_url, &session.token);
    let dispatcher = Dispatcher::new();
    let (_listener, inbound) = dispatcher.subscribe().await;

    let mut connections = ConnectionManager::new(
        WsConnector::new(&config.gateway_url),
        dispatcher.clone(),
        ReconnectPolicy::default(),
    );
    let chat = connections.connect(session.clone()).await;

    let mut state = chat.watch_state();
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let current = state.borrow_and_update().clone();
            info!("Chat stream: {:?}", current);
        }
    });

    if config.media_stream && connections.connect_media().is_some() {
        let (_media_listener, mut signals) = dispatcher.subscribe().await;
        tokio::spawn(async move {
            while let Some(inbound) = signals.recv().await {
                if inbound.stream != StreamClass::Media {
                    continue;
                }
                if let InboundEvent::Signal { from_user_id, payload } = inbound.event {
                    info!("Signal from {}: {}", from_user_id, payload);
                }
            }
        });
    }

    let engine_config = EngineConfig {
        page_size: config.page_size,
        ..EngineConfig::default()
    };
    let (engine, handle, updates) = SyncEngine::new(session.identity.clone(), chat, api.clone(), api, engine_config);
    let engine_task = tokio::spawn(engine.run(inbound));
    let render_task = tokio::spawn(render::run(handle.clone(), updates));

    println!("{HELP}");
    let result = repl(&handle).await;

    let _ = handle.shutdown();
    if let Err(e) = engine_task.await {
        warn!("Engine task ended abnormally: {}", e);
    }
    render_task.abort();
    connections.disconnect().await;
    result
}

async fn repl(engine: &EngineHandle) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let input = match Input::parse(&line) {
            Ok(input) => input,
            Err(e) => {
                println!("!! {e}");
                continue;
            }
        };
        if matches!(input, Input::Quit) {
            break;
        }
        if let Err(e) = execute(engine, input).await {
            println!("!! {e:#}");
        }
    }
    Ok(())
}

async fn execute(engine: &EngineHandle, input: Input) -> anyhow::Result<()> {
    match input {
        Input::Join(room) => {
            engine.join_room(room.clone()).await?;
            engine.switch_active(room).await?;
        }
        Input::Leave(room) => engine.leave_room(room).await?,
        Input::Dm(peer) => {
            engine.open_dm(peer).await?;
        }
        Input::Go(room) => {
            engine.activate_alert(room).await?;
        }
        Input::Visible(visible) => engine.set_visible(visible)?,
        Input::Help => println!("{HELP}"),
        Input::Quit => {}
        input => {
            let room = active(engine).await?;
            execute_in(engine, room, input).await?;
        }
    }
    Ok(())
}

/// Commands that act on the active room.
async fn execute_in(engine: &EngineHandle, room: RoomKey, input: Input) -> anyhow::Result<()> {
    match input {
        Input::Say(text) => engine.send_message(room, text, None).await?,
        Input::More => {
            let added = engine.load_older_page(room.clone()).await?;
            let snapshot = engine.snapshot(room).await?;
            for message in snapshot.messages.iter().take(added) {
                println!("{}", render::format_message(message));
            }
            if !snapshot.has_more {
                println!("── start of history ──");
            }
        }
        Input::Threads => {
            let channel = room.parent().unwrap_or(room);
            for thread in engine.threads(channel).await? {
                println!("🧵 {} ({})", thread.title, thread.key);
            }
        }
        Input::Thread { parent, title } => engine.create_thread(room, parent, title).await?,
        Input::Edit { id, text } => engine.edit_message(room, id, text).await?,
        Input::Delete(id) => engine.delete_message(room, id).await?,
        Input::React { id, emoji } => {
            engine.toggle_reaction(room, id, emoji).await?;
        }
        Input::Pin(id) => engine.pin(room, id).await?,
        Input::Unpin(id) => engine.unpin(room, id).await?,
        Input::Poll { id, poll } => {
            let poll_id = engine.create_poll(room, id, poll).await?;
            println!("poll {poll_id} created");
        }
        Input::File { path, caption } => {
            let file = read_upload(&path).await?;
            engine.send_message(room, caption, Some(file)).await?;
        }
        other => warn!("{:?} does not act on a room", other),
    }
    Ok(())
}

async fn active(engine: &EngineHandle) -> anyhow::Result<RoomKey> {
    engine
        .active_room()
        .await?
        .context("no active room, /join one first")
}

async fn read_upload(path: &Path) -> anyhow::Result<FileUpload> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("path has no file name")?
        .to_string();
    Ok(FileUpload {
        mime: mime_for(&name).to_string(),
        name,
        bytes,
    })
}

fn mime_for(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("pdf") => "application/pdf",
        Some("doc") => "application/msword",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}
