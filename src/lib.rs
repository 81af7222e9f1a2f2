//! # Fog Map Relay
//!
//! Real-time session relay for a shared fog-of-war battle map. One GM owns a
//! session and its map; players join with a short numeric code and watch the
//! token move and the fog lift as the GM reveals it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     FOG MAP RELAY                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Value types                               │
//! │  ├── point.rs    - Normalized map coordinates                │
//! │  └── code.rs     - Numeric session codes                     │
//! │                                                              │
//! │  game/           - Shared map state                          │
//! │  ├── state.rs    - Token, trail, map, radius, torchlight     │
//! │  └── events.rs   - Applied changes                           │
//! │                                                              │
//! │  network/        - Relay                                     │
//! │  ├── protocol.rs - Message types                             │
//! │  ├── session.rs  - One session and its inactivity timer      │
//! │  ├── registry.rs - Code to session map                       │
//! │  ├── broadcast.rs- Fan-out to session members                │
//! │  ├── handler.rs  - Per-connection routing and authorization  │
//! │  └── server.rs   - WebSocket server                          │
//! │                                                              │
//! │  config.rs       - Environment configuration                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency
//!
//! Every mutation of a session's state happens under that session's write
//! lock, and the resulting event is queued to each member before the lock is
//! released. Members therefore observe changes in the order they were applied.
//! The last writer wins; there is no merging.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;
pub mod config;

// Re-export commonly used types
pub use crate::core::{MapPoint, SessionCode};
pub use game::{SharedGameState, StateChange};
pub use network::{RelayServer, RelayError, SessionRegistry};
pub use config::RelayConfig;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
