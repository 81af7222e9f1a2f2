//! Session Management
//!
//! A session is one shared map: its game state, the connections taking part,
//! which of them is the GM, and the inactivity timer that ends it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Weak;
use std::time::Duration;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::core::code::SessionCode;
use crate::game::state::SharedGameState;
use crate::network::broadcast::MemberSender;
use crate::network::protocol::ClientMessage;
use crate::network::registry::SessionRegistry;

/// Unique session identifier. Distinguishes sessions that reuse a code.
pub type SessionId = uuid::Uuid;

/// Identity of one client connection for its whole lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No live session has that code (or it was replaced).
    #[error("Session not found")]
    SessionNotFound,

    /// Registry is at capacity.
    #[error("A session is already active")]
    SessionAlreadyExists,

    /// GM-only action from a non-GM member.
    #[error("Only the GM can do that")]
    Unauthorized,

    /// Connection is not a member of the session.
    #[error("Not in session")]
    NotInSession,
}

// =============================================================================
// INACTIVITY TIMER
// =============================================================================

/// Per-session inactivity timer.
///
/// At most one sleep task is pending at a time: arming aborts the previous
/// one. Each arm bumps the generation, and the registry ignores expiries whose
/// generation is no longer current.
pub struct InactivityTimer {
    timeout: Duration,
    generation: u64,
    handle: Option<JoinHandle<()>>,
    registry: Weak<SessionRegistry>,
}

impl InactivityTimer {
    /// Create a disarmed timer that reports expiry to `registry`.
    pub fn new(timeout: Duration, registry: Weak<SessionRegistry>) -> Self {
        Self {
            timeout,
            generation: 0,
            handle: None,
            registry,
        }
    }

    /// Cancel any pending expiry and schedule a new one.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn arm(&mut self, code: &SessionCode, id: SessionId) {
        self.disarm();
        self.generation += 1;

        let generation = self.generation;
        let timeout = self.timeout;
        let registry = self.registry.clone();
        let code = code.clone();

        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(registry) = registry.upgrade() {
                registry.expire(&code, id, generation).await;
            }
        }));
    }

    /// Cancel the pending expiry, if any.
    pub fn disarm(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Forget the pending task without aborting it. Used by the expiring task itself.
    pub(crate) fn detach(&mut self) {
        self.handle = None;
    }

    /// Current arm generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether an expiry is scheduled.
    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }
}

impl Drop for InactivityTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// One live session.
pub struct Session {
    /// Unique identifier.
    pub id: SessionId,
    /// Shareable join code.
    pub code: SessionCode,
    /// GM connection, fixed at creation.
    gm: ConnectionId,
    /// Members including the GM.
    members: BTreeMap<ConnectionId, MemberSender>,
    /// Shared game state.
    state: SharedGameState,
    /// When the session was created.
    created_at: DateTime<Utc>,
    /// Inactivity timer.
    timer: InactivityTimer,
    /// Set once the session has been removed from the registry.
    closed: bool,
}

impl Session {
    /// Create a session owned by `gm` and arm its timer.
    pub fn new(
        code: SessionCode,
        gm: ConnectionId,
        gm_sender: MemberSender,
        timer: InactivityTimer,
    ) -> Self {
        let mut members = BTreeMap::new();
        members.insert(gm, gm_sender);

        let mut session = Self {
            id: uuid::Uuid::new_v4(),
            code,
            gm,
            members,
            state: SharedGameState::new(),
            created_at: Utc::now(),
            timer,
            closed: false,
        };
        session.touch();
        session
    }

    /// Rearm the inactivity timer.
    pub fn touch(&mut self) {
        if !self.closed {
            self.timer.arm(&self.code, self.id);
        }
    }

    /// Add a member. Returns false if it was already present.
    pub fn add_member(&mut self, id: ConnectionId, sender: MemberSender) -> bool {
        self.members.insert(id, sender).is_none()
    }

    /// Remove a member. Returns true if it was present.
    pub fn remove_member(&mut self, id: ConnectionId) -> bool {
        self.members.remove(&id).is_some()
    }

    /// Check that `conn` may send `msg` to this session.
    pub fn authorize(&self, conn: ConnectionId, msg: &ClientMessage) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::SessionNotFound);
        }
        if !self.is_member(conn) {
            return Err(SessionError::NotInSession);
        }
        if msg.is_gm_only() && !self.is_gm(conn) {
            return Err(SessionError::Unauthorized);
        }
        Ok(())
    }

    /// Whether `conn` holds the GM role.
    pub fn is_gm(&self, conn: ConnectionId) -> bool {
        self.gm == conn
    }

    /// Whether `conn` is a member.
    pub fn is_member(&self, conn: ConnectionId) -> bool {
        self.members.contains_key(&conn)
    }

    /// Iterate members and their outbound queues.
    pub fn members(&self) -> impl Iterator<Item = (ConnectionId, &MemberSender)> + '_ {
        self.members.iter().map(|(id, tx)| (*id, tx))
    }

    /// Member count.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Read-only view of the shared state.
    pub fn state(&self) -> &SharedGameState {
        &self.state
    }

    /// Mutable shared state. Only the connection handler mutates it.
    pub(crate) fn state_mut(&mut self) -> &mut SharedGameState {
        &mut self.state
    }

    /// Copy of the shared state for a join/create reply.
    pub fn snapshot(&self) -> SharedGameState {
        self.state.clone()
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current timer generation.
    pub fn timer_generation(&self) -> u64 {
        self.timer.generation()
    }

    /// Whether the session has been removed from the registry.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Mark closed and cancel the timer.
    pub(crate) fn close(&mut self) {
        self.closed = true;
        self.timer.disarm();
        debug!(code = %self.code, "Session closed");
    }

    /// Mark closed from inside the timer task that is expiring it.
    pub(crate) fn close_expired(&mut self) {
        self.closed = true;
        self.timer.detach();
    }

    /// Remove and return all members (used when notifying a session end).
    pub(crate) fn drain_members(&mut self) -> Vec<(ConnectionId, MemberSender)> {
        std::mem::take(&mut self.members).into_iter().collect()
    }
}
