mod connection;
mod events;
mod registry;
mod server;

pub use events::{EventReceiver, EventSender, ServerEvent};
pub use registry::{ConnectionId, ConnectionRegistry, OUTBOUND_CAPACITY, PeerTransport};
pub use server::{BroadcastServer, ServerOptions, ServerPhase};
