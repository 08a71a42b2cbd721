pub mod backoff;
pub mod connection;
pub mod dispatcher;
pub mod sink;
pub mod ws;

pub use backoff::ReconnectPolicy;
pub use connection::{ConnectionHandle, ConnectionManager, ConnectionState, Connector, Transport};
pub use dispatcher::{Dispatcher, Inbound, StreamClass};
pub use sink::{CommandSink, SendError};
pub use ws::WsConnector;
