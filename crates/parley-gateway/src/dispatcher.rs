use std::fmt;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use parley_types::events::InboundEvent;

/// Logical stream an event arrived on. Each class owns exactly one transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamClass {
    Chat,
    Media,
}

impl StreamClass {
    /// Path segment appended to the gateway URL.
    pub fn path(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Media => "rtc",
        }
    }
}

impl fmt::Display for StreamClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chat => f.write_str("chat"),
            Self::Media => f.write_str("media"),
        }
    }
}

/// An inbound event tagged with the stream it came from.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub stream: StreamClass,
    pub event: InboundEvent,
}

/// Fans inbound events out to every listener.
///
/// Each listener owns an unbounded queue, so a listener that stops draining
/// never delays the others or the stream it is fed from.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// listener_id -> sender
    listeners: RwLock<Vec<(Uuid, mpsc::UnboundedSender<Inbound>)>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Returns (listener_id, receiver).
    pub async fn subscribe(&self) -> (Uuid, mpsc::UnboundedReceiver<Inbound>) {
        let listener_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.listeners.write().await.push((listener_id, tx));
        (listener_id, rx)
    }

    pub async fn unsubscribe(&self, listener_id: Uuid) {
        self.inner
            .listeners
            .write()
            .await
            .retain(|(id, _)| *id != listener_id);
    }

    /// Deliver an event to all listeners. Returns how many received it.
    pub async fn dispatch(&self, inbound: Inbound) -> usize {
        let mut closed = Vec::new();
        let mut delivered = 0;
        {
            let listeners = self.inner.listeners.read().await;
            for (id, tx) in listeners.iter() {
                if tx.send(inbound.clone()).is_ok() {
                    delivered += 1;
                } else {
                    closed.push(*id);
                }
            }
        }

        if !closed.is_empty() {
            debug!("Pruning {} closed listener(s)", closed.len());
            self.inner
                .listeners
                .write()
                .await
                .retain(|(id, _)| !closed.contains(id));
        }
        delivered
    }

    pub async fn listener_count(&self) -> usize {
        self.inner.listeners.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready() -> Inbound {
        Inbound {
            stream: StreamClass::Chat,
            event: InboundEvent::Ready {
                user_id: "1".into(),
                username: "alice".into(),
            },
        }
    }

    #[tokio::test]
    async fn undrained_listener_does_not_block_others() {
        let dispatcher = Dispatcher::new();
        let (_slow_id, _slow_rx) = dispatcher.subscribe().await;
        let (_fast_id, mut fast_rx) = dispatcher.subscribe().await;

        for _ in 0..100 {
            assert_eq!(dispatcher.dispatch(ready()).await, 2);
        }
        let mut received = 0;
        while fast_rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 100);
    }

    #[tokio::test]
    async fn closed_listeners_are_pruned() {
        let dispatcher = Dispatcher::new();
        let (_id, rx) = dispatcher.subscribe().await;
        let (kept, _kept_rx) = dispatcher.subscribe().await;
        drop(rx);

        assert_eq!(dispatcher.dispatch(ready()).await, 1);
        assert_eq!(dispatcher.listener_count().await, 1);

        dispatcher.unsubscribe(kept).await;
        assert_eq!(dispatcher.listener_count().await, 0);
    }
}
