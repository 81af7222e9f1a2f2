//! Network Layer
//!
//! WebSocket relay: session bookkeeping, message routing and the server loop.
//! All shared map state lives in `game/`; this layer decides who may change it
//! and who hears about it.

pub mod protocol;
pub mod session;
pub mod registry;
pub mod broadcast;
pub mod handler;
pub mod server;

pub use protocol::{ClientMessage, ServerMessage, ProtocolError, SessionGranted};
pub use session::{Session, SessionId, ConnectionId, SessionError};
pub use registry::{SessionRegistry, RegistryConfig, Binding, Departure};
pub use handler::{ConnectionHandler, Dispatch, DropReason};
pub use server::{RelayServer, RelayError};
