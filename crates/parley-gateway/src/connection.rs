use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::{anyhow, bail};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use parley_types::events::{InboundEvent, OutboundCommand};
use parley_types::{Identity, RoomKey, Session};

use crate::backoff::ReconnectPolicy;
use crate::dispatcher::{Dispatcher, Inbound, StreamClass};
use crate::sink::{CommandSink, SendError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected { identity: Identity },
    Reconnecting { attempt: u32 },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Connected { identity } => Some(identity),
            _ => None,
        }
    }
}

/// Raw, already-framed event channels for one underlying connection.
/// The stream is considered dropped once `inbound` yields `None`.
pub struct Transport {
    pub outbound: mpsc::UnboundedSender<OutboundCommand>,
    pub inbound: mpsc::UnboundedReceiver<InboundEvent>,
}

/// Opens transports. Implemented over WebSocket by [`crate::ws::WsConnector`].
pub trait Connector: Send + Sync + 'static {
    fn open(&self, stream: StreamClass) -> impl Future<Output = anyhow::Result<Transport>> + Send;
}

/// Cheap, cloneable sending side of one stream plus its state feed.
#[derive(Clone)]
pub struct ConnectionHandle {
    stream: StreamClass,
    state: watch::Receiver<ConnectionState>,
    outbound: mpsc::UnboundedSender<OutboundCommand>,
    rejoin: Arc<watch::Sender<Option<RoomKey>>>,
}

impl ConnectionHandle {
    pub fn stream(&self) -> StreamClass {
        self.stream
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Stream of state transitions for this connection.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

impl CommandSink for ConnectionHandle {
    fn send(&self, command: OutboundCommand) -> Result<(), SendError> {
        if !self.state.borrow().is_connected() {
            debug!("Refusing {} on {} stream: not connected", command.name(), self.stream);
            return Err(SendError::NotConnected);
        }
        trace!("{} -> {}", self.stream, command.name());
        self.outbound
            .send(command)
            .map_err(|_| SendError::NotConnected)
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }

    fn track_active_room(&self, room: Option<&RoomKey>) {
        self.rejoin.send_replace(room.cloned());
    }
}

struct StreamSession {
    handle: ConnectionHandle,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns one supervised transport per stream class for the signed-in identity.
pub struct ConnectionManager<C: Connector> {
    connector: Arc<C>,
    dispatcher: Dispatcher,
    policy: ReconnectPolicy,
    session: Option<Session>,
    streams: HashMap<StreamClass, StreamSession>,
    rejoin: Arc<watch::Sender<Option<RoomKey>>>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C, dispatcher: Dispatcher, policy: ReconnectPolicy) -> Self {
        let (rejoin, _) = watch::channel(None);
        Self {
            connector: Arc::new(connector),
            dispatcher,
            policy,
            session: None,
            streams: HashMap::new(),
            rejoin: Arc::new(rejoin),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Open the chat stream for `session`. Connecting again as the same
    /// identity returns the existing handle; a different identity replaces
    /// the current session.
    pub async fn connect(&mut self, session: Session) -> ConnectionHandle {
        let same_identity = self
            .session
            .as_ref()
            .map(|current| current.identity == session.identity);

        match same_identity {
            Some(true) => {
                if let Some(existing) = self.live_handle(StreamClass::Chat) {
                    debug!(
                        "Already connected as {} ({}), reusing chat stream",
                        session.identity.username, session.identity.user_id
                    );
                    return existing;
                }
            }
            Some(false) => {
                info!("Identity changed, closing previous session");
                self.disconnect().await;
            }
            None => {}
        }

        let handle = self.open_stream(StreamClass::Chat, &session);
        self.session = Some(session);
        handle
    }

    /// Open the optional media signaling stream for the current session.
    pub fn connect_media(&mut self) -> Option<ConnectionHandle> {
        if let Some(existing) = self.live_handle(StreamClass::Media) {
            return Some(existing);
        }
        let session = self.session.clone()?;
        Some(self.open_stream(StreamClass::Media, &session))
    }

    pub fn handle(&self, stream: StreamClass) -> Option<ConnectionHandle> {
        self.streams.get(&stream).map(|s| s.handle.clone())
    }

    /// State of the chat stream.
    pub fn state(&self) -> ConnectionState {
        self.streams
            .get(&StreamClass::Chat)
            .map_or(ConnectionState::Disconnected, |s| s.handle.state())
    }

    /// Emit on the chat stream; fails with `NotConnected` unless connected.
    pub fn send(&self, command: OutboundCommand) -> Result<(), SendError> {
        match self.streams.get(&StreamClass::Chat) {
            Some(s) => s.handle.send(command),
            None => Err(SendError::NotConnected),
        }
    }

    /// Close every stream and forget the session.
    pub async fn disconnect(&mut self) {
        for (stream, session) in self.streams.drain() {
            session.cancel.cancel();
            if let Err(e) = session.task.await {
                warn!("{} supervisor ended abnormally: {}", stream, e);
            }
        }
        self.session = None;
        self.rejoin.send_replace(None);
        info!("Disconnected");
    }

    /// Handle of a stream whose supervisor is still running. A stream that
    /// gave up reconnecting is forgotten so the caller opens a new one.
    fn live_handle(&mut self, stream: StreamClass) -> Option<ConnectionHandle> {
        let existing = self.streams.get(&stream)?;
        if !existing.task.is_finished() && existing.handle.state() != ConnectionState::Disconnected {
            return Some(existing.handle.clone());
        }
        info!("{} stream supervisor has stopped, reopening", stream);
        self.streams.remove(&stream);
        None
    }

    fn open_stream(&mut self, stream: StreamClass, session: &Session) -> ConnectionHandle {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let supervisor = Supervisor {
            connector: self.connector.clone(),
            stream,
            token: session.token.clone(),
            dispatcher: self.dispatcher.clone(),
            policy: self.policy.clone(),
            state: state_tx,
            outbound: outbound_rx,
            rejoin: (stream == StreamClass::Chat).then(|| self.rejoin.subscribe()),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(supervisor.run());

        let handle = ConnectionHandle {
            stream,
            state: state_rx,
            outbound: outbound_tx,
            rejoin: self.rejoin.clone(),
        };
        self.streams.insert(
            stream,
            StreamSession {
                handle: handle.clone(),
                cancel,
                task,
            },
        );
        info!(
            "Opening {} stream for {} ({})",
            stream, session.identity.username, session.identity.user_id
        );
        handle
    }
}

impl<C: Connector> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        for session in self.streams.values() {
            session.cancel.cancel();
        }
    }
}

enum PumpExit {
    Cancelled,
    Dropped,
}

/// Keeps one stream alive: connect, handshake, pump, back off, repeat.
struct Supervisor<C> {
    connector: Arc<C>,
    stream: StreamClass,
    token: String,
    dispatcher: Dispatcher,
    policy: ReconnectPolicy,
    state: watch::Sender<ConnectionState>,
    outbound: mpsc::UnboundedReceiver<OutboundCommand>,
    rejoin: Option<watch::Receiver<Option<RoomKey>>>,
    cancel: CancellationToken,
}

impl<C: Connector> Supervisor<C> {
    async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            let established = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.establish() => result,
            };

            match established {
                Ok((transport, identity)) => {
                    attempt = 0;
                    info!(
                        "{} stream ready as {} ({})",
                        self.stream, identity.username, identity.user_id
                    );
                    match self.pump(transport, identity).await {
                        PumpExit::Cancelled => break,
                        PumpExit::Dropped => warn!("{} stream dropped", self.stream),
                    }
                }
                Err(e) => warn!("{} stream connect failed: {:#}", self.stream, e),
            }

            attempt += 1;
            if self.policy.exhausted(attempt) {
                warn!(
                    "{} stream giving up after {} attempts",
                    self.stream,
                    attempt - 1
                );
                break;
            }
            self.state
                .send_replace(ConnectionState::Reconnecting { attempt });

            let delay = self.policy.delay_for(attempt);
            debug!("{} stream retry #{} in {:?}", self.stream, attempt, delay);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
        debug!("{} supervisor stopped", self.stream);
    }

    async fn establish(&self) -> anyhow::Result<(Transport, Identity)> {
        let mut transport = self.connector.open(self.stream).await?;

        transport
            .outbound
            .send(OutboundCommand::Identify {
                token: self.token.clone(),
            })
            .map_err(|_| anyhow!("transport closed before identify"))?;

        let identity = tokio::time::timeout(
            self.policy.handshake_timeout,
            wait_for_ready(&mut transport.inbound),
        )
        .await
        .map_err(|_| anyhow!("handshake timed out"))??;

        Ok((transport, identity))
    }

    async fn pump(&mut self, transport: Transport, identity: Identity) -> PumpExit {
        let Transport {
            outbound,
            mut inbound,
        } = transport;

        // Intents issued while the stream was down are not replayed.
        let mut lost = 0;
        while self.outbound.try_recv().is_ok() {
            lost += 1;
        }
        if lost > 0 {
            warn!(
                "{} stream discarded {} command(s) queued across the reconnect",
                self.stream, lost
            );
        }

        if let Some(rejoin) = &self.rejoin {
            let room = rejoin.borrow().clone();
            if let Some(room) = room {
                info!("Re-joining {} after reconnect", room);
                if outbound.send(OutboundCommand::RoomJoin { room }).is_err() {
                    return PumpExit::Dropped;
                }
            }
        }

        self.state.send_replace(ConnectionState::Connected {
            identity: identity.clone(),
        });
        self.dispatcher
            .dispatch(Inbound {
                stream: self.stream,
                event: InboundEvent::Ready {
                    user_id: identity.user_id,
                    username: identity.username,
                },
            })
            .await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return PumpExit::Cancelled,
                event = inbound.recv() => match event {
                    Some(event) => {
                        self.dispatcher
                            .dispatch(Inbound { stream: self.stream, event })
                            .await;
                    }
                    None => return PumpExit::Dropped,
                },
                command = self.outbound.recv() => match command {
                    Some(command) => {
                        if outbound.send(command).is_err() {
                            return PumpExit::Dropped;
                        }
                    }
                    // Every handle is gone; nobody can use this stream any more.
                    None => return PumpExit::Cancelled,
                },
            }
        }
    }
}

async fn wait_for_ready(
    inbound: &mut mpsc::UnboundedReceiver<InboundEvent>,
) -> anyhow::Result<Identity> {
    while let Some(event) = inbound.recv().await {
        match event {
            InboundEvent::Ready { user_id, username } => {
                return Ok(Identity { user_id, username });
            }
            other => debug!("Ignoring {:?} before ready", other),
        }
    }
    bail!("stream closed during handshake")
}
