use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::anyhow;
use tokio::sync::mpsc;

use parley_gateway::{
    CommandSink, ConnectionManager, ConnectionState, Connector, Dispatcher, ReconnectPolicy,
    SendError, StreamClass, Transport,
};
use parley_types::events::{InboundEvent, OutboundCommand};
use parley_types::{Identity, RoomKey, Session};

/// Server end of one fake transport.
struct ServerSide {
    stream: StreamClass,
    to_client: mpsc::UnboundedSender<InboundEvent>,
    from_client: mpsc::UnboundedReceiver<OutboundCommand>,
}

struct FakeConnector {
    opened: mpsc::UnboundedSender<ServerSide>,
    opens: Arc<AtomicUsize>,
}

impl Connector for FakeConnector {
    async fn open(&self, stream: StreamClass) -> anyhow::Result<Transport> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let (outbound, from_client) = mpsc::unbounded_channel();
        let (to_client, inbound) = mpsc::unbounded_channel();
        self.opened
            .send(ServerSide {
                stream,
                to_client,
                from_client,
            })
            .map_err(|_| anyhow!("test server gone"))?;
        Ok(Transport { outbound, inbound })
    }
}

fn session(user_id: &str, username: &str) -> Session {
    Session {
        identity: Identity {
            user_id: user_id.into(),
            username: username.into(),
        },
        token: format!("token-{}", user_id),
    }
}

fn manager() -> (
    ConnectionManager<FakeConnector>,
    mpsc::UnboundedReceiver<ServerSide>,
    Arc<AtomicUsize>,
) {
    let (opened, servers) = mpsc::unbounded_channel();
    let opens = Arc::new(AtomicUsize::new(0));
    let connector = FakeConnector {
        opened,
        opens: opens.clone(),
    };
    let policy = ReconnectPolicy {
        jitter: 0.0,
        ..Default::default()
    };
    (
        ConnectionManager::new(connector, Dispatcher::new(), policy),
        servers,
        opens,
    )
}

/// Accept the next transport and complete the identify/ready handshake.
async fn accept(servers: &mut mpsc::UnboundedReceiver<ServerSide>, user_id: &str) -> ServerSide {
    let mut server = servers.recv().await.expect("connector dropped");
    match server.from_client.recv().await {
        Some(OutboundCommand::Identify { token }) => assert_eq!(token, format!("token-{}", user_id)),
        other => panic!("expected identify, got {:?}", other),
    }
    server
        .to_client
        .send(InboundEvent::Ready {
            user_id: user_id.into(),
            username: "alice".into(),
        })
        .unwrap();
    server
}

#[tokio::test]
async fn handshake_reaches_connected_and_forwards_commands() {
    let (mut manager, mut servers, _) = manager();
    let handle = manager.connect(session("1", "alice")).await;

    let mut server = accept(&mut servers, "1").await;
    assert_eq!(server.stream, StreamClass::Chat);

    let mut state = handle.watch_state();
    let connected = state.wait_for(|s| s.is_connected()).await.unwrap().clone();
    assert_eq!(connected.identity().unwrap().user_id, "1");

    let room = RoomKey::channel("1", "5");
    handle
        .send(OutboundCommand::RoomJoin { room: room.clone() })
        .unwrap();
    assert_eq!(
        server.from_client.recv().await,
        Some(OutboundCommand::RoomJoin { room })
    );
}

#[tokio::test]
async fn send_before_handshake_fails_fast() {
    let (mut manager, mut servers, _) = manager();
    let handle = manager.connect(session("1", "alice")).await;
    let _server = servers.recv().await.unwrap();

    assert_eq!(handle.state(), ConnectionState::Connecting);
    assert_eq!(
        handle.send(OutboundCommand::TypingStart {
            room: RoomKey::channel("1", "5")
        }),
        Err(SendError::NotConnected)
    );
}

#[tokio::test]
async fn connecting_twice_as_same_identity_reuses_stream() {
    let (mut manager, mut servers, opens) = manager();
    let first = manager.connect(session("1", "alice")).await;
    let _server = accept(&mut servers, "1").await;
    first.watch_state().wait_for(|s| s.is_connected()).await.unwrap();

    let second = manager.connect(session("1", "alice")).await;
    assert!(second.is_connected());
    assert_eq!(opens.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn inbound_events_reach_every_listener() {
    let (mut manager, mut servers, _) = manager();
    let (_a, mut first) = manager.dispatcher().subscribe().await;
    let (_b, mut second) = manager.dispatcher().subscribe().await;

    let handle = manager.connect(session("1", "alice")).await;
    let server = accept(&mut servers, "1").await;
    handle.watch_state().wait_for(|s| s.is_connected()).await.unwrap();

    let event = InboundEvent::PinChanged {
        room: RoomKey::channel("1", "5"),
        message_id: parley_types::MessageId(3),
        pinned: true,
    };
    server.to_client.send(event.clone()).unwrap();

    for rx in [&mut first, &mut second] {
        // The handshake's ready is surfaced first.
        assert!(matches!(rx.recv().await.unwrap().event, InboundEvent::Ready { .. }));
        let inbound = rx.recv().await.unwrap();
        assert_eq!(inbound.stream, StreamClass::Chat);
        assert_eq!(inbound.event, event);
    }
}

#[tokio::test(start_paused = true)]
async fn reconnect_rejoins_active_room_without_replay() {
    let (mut manager, mut servers, opens) = manager();
    let handle = manager.connect(session("1", "alice")).await;
    let server = accept(&mut servers, "1").await;
    let mut state = handle.watch_state();
    state.wait_for(|s| s.is_connected()).await.unwrap();

    let room = RoomKey::channel("1", "5");
    handle.track_active_room(Some(&room));

    drop(server);
    state
        .wait_for(|s| matches!(s, ConnectionState::Reconnecting { .. }))
        .await
        .unwrap();
    assert_eq!(
        handle.send(OutboundCommand::MessageSend {
            room: room.clone(),
            content: "lost".into(),
            file: None,
        }),
        Err(SendError::NotConnected)
    );

    let mut server = accept(&mut servers, "1").await;
    state.wait_for(|s| s.is_connected()).await.unwrap();
    assert_eq!(opens.load(Ordering::SeqCst), 2);

    // First command on the new transport is the re-join, nothing replayed.
    assert_eq!(
        server.from_client.recv().await,
        Some(OutboundCommand::RoomJoin { room })
    );
    assert!(server.from_client.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_attempt_limit() {
    let (opened, servers) = mpsc::unbounded_channel();
    drop(servers);
    let connector = FakeConnector {
        opened,
        opens: Arc::new(AtomicUsize::new(0)),
    };
    let policy = ReconnectPolicy {
        jitter: 0.0,
        max_attempts: Some(2),
        ..Default::default()
    };
    let mut manager = ConnectionManager::new(connector, Dispatcher::new(), policy);
    let handle = manager.connect(session("1", "alice")).await;

    handle
        .watch_state()
        .wait_for(|s| *s == ConnectionState::Disconnected)
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn connect_after_giving_up_opens_a_new_stream() {
    let (opened, servers) = mpsc::unbounded_channel();
    drop(servers);
    let opens = Arc::new(AtomicUsize::new(0));
    let connector = FakeConnector {
        opened,
        opens: opens.clone(),
    };
    let policy = ReconnectPolicy {
        jitter: 0.0,
        max_attempts: Some(1),
        ..Default::default()
    };
    let mut manager = ConnectionManager::new(connector, Dispatcher::new(), policy);

    let first = manager.connect(session("1", "alice")).await;
    first
        .watch_state()
        .wait_for(|s| *s == ConnectionState::Disconnected)
        .await
        .unwrap();
    let before = opens.load(Ordering::SeqCst);

    let second = manager.connect(session("1", "alice")).await;
    second
        .watch_state()
        .wait_for(|s| *s == ConnectionState::Disconnected)
        .await
        .unwrap();
    assert!(opens.load(Ordering::SeqCst) > before);
}

#[tokio::test]
async fn disconnect_stops_all_streams() {
    let (mut manager, mut servers, _) = manager();
    let chat = manager.connect(session("1", "alice")).await;
    let _chat_server = accept(&mut servers, "1").await;
    chat.watch_state().wait_for(|s| s.is_connected()).await.unwrap();

    let media = manager.connect_media().unwrap();
    let media_server = accept(&mut servers, "1").await;
    assert_eq!(media_server.stream, StreamClass::Media);
    media.watch_state().wait_for(|s| s.is_connected()).await.unwrap();

    manager.disconnect().await;
    assert_eq!(chat.state(), ConnectionState::Disconnected);
    assert_eq!(media.state(), ConnectionState::Disconnected);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(
        manager.send(OutboundCommand::TypingStop {
            room: RoomKey::channel("1", "5")
        }),
        Err(SendError::NotConnected)
    );
}
