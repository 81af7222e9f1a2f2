//! Session Registry
//!
//! Maps session codes to live sessions. A code is present here exactly as
//! long as its session is alive; removing it closes the session.
//!
//! Lock order is always registry map first, then a session. Nothing that holds
//! a session lock may wait on the map lock.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::core::code::{SessionCode, DEFAULT_CODE_LENGTH, MAX_CODE_LENGTH};
use crate::game::state::SharedGameState;
use crate::network::broadcast::{send_to, MemberSender};
use crate::network::protocol::ServerMessage;
use crate::network::session::{
    ConnectionId, InactivityTimer, Session, SessionError, SessionId,
};

/// Default inactivity timeout (30 minutes).
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Shown to members when their session times out.
pub const EXPIRED_NOTICE: &str = "Session expired";

/// Shown to members when the GM leaves.
pub const GM_LEFT_NOTICE: &str = "Session ended by the GM";

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Digits per session code.
    pub code_length: usize,
    /// Inactivity timeout.
    pub session_timeout: Duration,
    /// Maximum live sessions (`None` = limited only by the code space).
    pub max_sessions: Option<usize>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            code_length: DEFAULT_CODE_LENGTH,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            max_sessions: None,
        }
    }
}

impl RegistryConfig {
    /// Configuration for the single-session deployment mode.
    pub fn single_session() -> Self {
        Self {
            max_sessions: Some(1),
            ..Default::default()
        }
    }

    /// Effective capacity: the configured limit, bounded by the code space.
    pub fn capacity(&self) -> usize {
        let space = SessionCode::space(self.code_length);
        self.max_sessions.map(|m| m.min(space)).unwrap_or(space)
    }
}

/// A connection's claim on a session, as granted by create or join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Session code.
    pub code: SessionCode,
    /// Identity of the session the code referred to when bound.
    pub session_id: SessionId,
    /// Whether the bound connection is the GM.
    pub is_gm: bool,
}

/// Result of a successful create or join.
#[derive(Debug, Clone)]
pub struct Admission {
    /// The new binding.
    pub binding: Binding,
    /// State snapshot for the reply.
    pub snapshot: SharedGameState,
}

/// What happened when a connection left its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Departure {
    /// Member removed, session continues.
    Left,
    /// Session destroyed; carries the number of members notified.
    SessionEnded {
        /// Members that received an end notice.
        notified: usize,
    },
    /// Nothing to leave (session already gone or not a member).
    NotFound,
}

/// Manages all live sessions.
pub struct SessionRegistry {
    config: RegistryConfig,
    sessions: RwLock<BTreeMap<SessionCode, Arc<RwLock<Session>>>>,
    self_ref: Weak<SessionRegistry>,
}

impl SessionRegistry {
    /// Create a registry.
    pub fn new(config: RegistryConfig) -> Arc<Self> {
        let mut config = config;
        config.code_length = config.code_length.clamp(1, MAX_CODE_LENGTH);

        Arc::new_cyclic(|self_ref| Self {
            config,
            sessions: RwLock::new(BTreeMap::new()),
            self_ref: self_ref.clone(),
        })
    }

    /// Registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Create a session with `gm` as its GM and only member.
    pub async fn create_session(
        &self,
        gm: ConnectionId,
        sender: MemberSender,
    ) -> Result<Admission, SessionError> {
        let mut sessions = self.sessions.write().await;

        if sessions.len() >= self.config.capacity() {
            warn!(live = sessions.len(), "Session capacity reached");
            return Err(SessionError::SessionAlreadyExists);
        }

        let code = {
            let mut rng = rand::thread_rng();
            loop {
                let code = SessionCode::generate(&mut rng, self.config.code_length);
                if !sessions.contains_key(&code) {
                    break code;
                }
            }
        };

        let timer = InactivityTimer::new(self.config.session_timeout, self.self_ref.clone());
        let session = Session::new(code.clone(), gm, sender, timer);
        let admission = Admission {
            binding: Binding {
                code: code.clone(),
                session_id: session.id,
                is_gm: true,
            },
            snapshot: session.snapshot(),
        };

        info!(code = %code, gm = %gm, created_at = %session.created_at(), "Session created");
        sessions.insert(code, Arc::new(RwLock::new(session)));

        Ok(admission)
    }

    /// Add `conn` to the session with `code`. Rejoining keeps an existing role.
    pub async fn join_session(
        &self,
        code: &SessionCode,
        conn: ConnectionId,
        sender: MemberSender,
    ) -> Result<Admission, SessionError> {
        let session = self.get(code).await.ok_or(SessionError::SessionNotFound)?;
        let mut session = session.write().await;

        if session.is_closed() {
            return Err(SessionError::SessionNotFound);
        }

        let added = session.add_member(conn, sender);
        session.touch();

        if added {
            info!(code = %code, conn = %conn, members = session.member_count(), "Player joined");
        } else {
            debug!(code = %code, conn = %conn, "Member rejoined");
        }

        Ok(Admission {
            binding: Binding {
                code: code.clone(),
                session_id: session.id,
                is_gm: session.is_gm(conn),
            },
            snapshot: session.snapshot(),
        })
    }

    /// Get a session by code.
    pub async fn get(&self, code: &SessionCode) -> Option<Arc<RwLock<Session>>> {
        self.sessions.read().await.get(code).cloned()
    }

    /// Get the session a binding refers to, if it is still the live one.
    pub async fn resolve(&self, binding: &Binding) -> Result<Arc<RwLock<Session>>, SessionError> {
        let session = self.get(&binding.code).await.ok_or(SessionError::SessionNotFound)?;
        if session.read().await.id != binding.session_id {
            return Err(SessionError::SessionNotFound);
        }
        Ok(session)
    }

    /// Remove `conn` from its bound session.
    ///
    /// A departing GM ends the session for everyone; the last member leaving
    /// ends it silently.
    pub async fn leave(&self, binding: &Binding, conn: ConnectionId) -> Departure {
        let Ok(session) = self.resolve(binding).await else {
            return Departure::NotFound;
        };

        let (was_gm, now_empty) = {
            let mut session = session.write().await;
            if session.is_closed() || !session.remove_member(conn) {
                return Departure::NotFound;
            }
            (session.is_gm(conn), session.member_count() == 0)
        };

        if was_gm || now_empty {
            info!(code = %binding.code, gm = was_gm, "Session owner left");
            self.destroy_if(&binding.code, binding.session_id, GM_LEFT_NOTICE).await
        } else {
            debug!(code = %binding.code, conn = %conn, "Member left");
            Departure::Left
        }
    }

    /// Remove a session unconditionally. Returns true if it existed.
    ///
    /// Remaining members are not notified.
    pub async fn destroy_session(&self, code: &SessionCode) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.remove(code) {
            Some(session) => {
                session.write().await.close();
                info!(code = %code, "Session destroyed");
                true
            }
            None => false,
        }
    }

    /// Called by a session's timer task when it fires.
    pub(crate) async fn expire(&self, code: &SessionCode, id: SessionId, generation: u64) {
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.get(code).cloned() else {
            return;
        };

        let mut session = entry.write().await;
        if session.id != id || session.timer_generation() != generation {
            debug!(code = %code, "Stale inactivity timer ignored");
            return;
        }

        sessions.remove(code);
        session.close_expired();
        let notified = notify_end(&mut session, EXPIRED_NOTICE);
        info!(code = %code, notified, "Session expired after inactivity");
    }

    /// Destroy the session under `code` if it is still the one with `id`,
    /// telling remaining members why.
    async fn destroy_if(&self, code: &SessionCode, id: SessionId, notice: &str) -> Departure {
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.get(code).cloned() else {
            return Departure::NotFound;
        };

        let mut session = entry.write().await;
        if session.id != id || session.is_closed() {
            return Departure::NotFound;
        }

        sessions.remove(code);
        session.close();
        let notified = notify_end(&mut session, notice);
        info!(code = %code, notified, "Session destroyed");
        Departure::SessionEnded { notified }
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Codes of all live sessions.
    pub async fn codes(&self) -> Vec<SessionCode> {
        self.sessions.read().await.keys().cloned().collect()
    }
}

/// Send `notice` to every remaining member and empty the membership.
fn notify_end(session: &mut Session, notice: &str) -> usize {
    let message = ServerMessage::session_error(notice);
    session
        .drain_members()
        .into_iter()
        .filter(|(_, sender)| send_to(sender, &message))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use crate::network::broadcast::{member_channel, Frame, OUTBOUND_QUEUE_CAPACITY};

    fn member() -> (MemberSender, mpsc::Receiver<Frame>) {
        member_channel(OUTBOUND_QUEUE_CAPACITY)
    }

    fn next_message(rx: &mut mpsc::Receiver<Frame>) -> ServerMessage {
        let frame = rx.try_recv().expect("expected a frame");
        ServerMessage::from_json(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_create_session() {
        let registry = SessionRegistry::new(RegistryConfig::default());
        let (tx, _rx) = member();

        let admission = registry.create_session(ConnectionId(1), tx).await.unwrap();
        assert!(admission.binding.is_gm);
        assert_eq!(admission.binding.code.as_str().len(), 4);
        assert_eq!(admission.snapshot, SharedGameState::new());
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_codes_are_unique() {
        let registry = SessionRegistry::new(RegistryConfig {
            code_length: 1,
            ..Default::default()
        });

        let mut receivers = Vec::new();
        for i in 0..10 {
            let (tx, rx) = member();
            receivers.push(rx);
            registry.create_session(ConnectionId(i), tx).await.unwrap();
        }

        // Every one-digit code is now taken by a distinct session.
        assert_eq!(registry.session_count().await, 10);
        assert_eq!(registry.codes().await.len(), 10);

        // Code space exhausted.
        let (tx, _rx) = member();
        assert_eq!(
            registry.create_session(ConnectionId(99), tx).await.unwrap_err(),
            SessionError::SessionAlreadyExists
        );
    }

    #[tokio::test]
    async fn test_single_session_mode() {
        let registry = SessionRegistry::new(RegistryConfig::single_session());
        let (tx1, _rx1) = member();
        let (tx2, _rx2) = member();

        registry.create_session(ConnectionId(1), tx1).await.unwrap();
        let err = registry.create_session(ConnectionId(2), tx2).await.unwrap_err();
        assert_eq!(err, SessionError::SessionAlreadyExists);
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_join_session() {
        let registry = SessionRegistry::new(RegistryConfig::default());
        let (gm_tx, _gm_rx) = member();
        let (p_tx, _p_rx) = member();

        let created = registry.create_session(ConnectionId(1), gm_tx).await.unwrap();
        let joined = registry
            .join_session(&created.binding.code, ConnectionId(2), p_tx)
            .await
            .unwrap();

        assert!(!joined.binding.is_gm);
        assert_eq!(joined.binding.session_id, created.binding.session_id);
        assert_eq!(joined.snapshot.token_pos, crate::core::point::MapPoint::SPAWN);

        let session = registry.get(&created.binding.code).await.unwrap();
        assert_eq!(session.read().await.member_count(), 2);
    }

    #[tokio::test]
    async fn test_join_unknown_code_creates_nothing() {
        let registry = SessionRegistry::new(RegistryConfig::default());
        let (tx, _rx) = member();
        let code = SessionCode::parse("4821", 4).unwrap();

        let err = registry.join_session(&code, ConnectionId(1), tx).await.unwrap_err();
        assert_eq!(err, SessionError::SessionNotFound);
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_destroy_session() {
        let registry = SessionRegistry::new(RegistryConfig::default());
        let (tx, _rx) = member();
        let created = registry.create_session(ConnectionId(1), tx).await.unwrap();
        let code = created.binding.code.clone();

        assert!(registry.destroy_session(&code).await);
        assert!(!registry.destroy_session(&code).await);
        assert!(registry.get(&code).await.is_none());
        assert_eq!(
            registry.resolve(&created.binding).await.err(),
            Some(SessionError::SessionNotFound)
        );

        let (tx, _rx) = member();
        assert_eq!(
            registry.join_session(&code, ConnectionId(2), tx).await.unwrap_err(),
            SessionError::SessionNotFound
        );
    }

    #[tokio::test]
    async fn test_stale_binding_does_not_resolve() {
        let registry = SessionRegistry::new(RegistryConfig::default());
        let (tx, _rx) = member();
        let created = registry.create_session(ConnectionId(1), tx).await.unwrap();

        let stale = Binding {
            session_id: uuid::Uuid::new_v4(),
            ..created.binding.clone()
        };
        assert!(registry.resolve(&stale).await.is_err());
        assert!(registry.resolve(&created.binding).await.is_ok());
    }

    #[tokio::test]
    async fn test_player_leave_keeps_session() {
        let registry = SessionRegistry::new(RegistryConfig::default());
        let (gm_tx, _gm_rx) = member();
        let (p_tx, _p_rx) = member();
        let created = registry.create_session(ConnectionId(1), gm_tx).await.unwrap();
        let joined = registry
            .join_session(&created.binding.code, ConnectionId(2), p_tx)
            .await
            .unwrap();

        assert_eq!(registry.leave(&joined.binding, ConnectionId(2)).await, Departure::Left);
        assert_eq!(registry.session_count().await, 1);
        assert_eq!(registry.leave(&joined.binding, ConnectionId(2)).await, Departure::NotFound);
    }

    #[tokio::test]
    async fn test_gm_leave_ends_session_and_notifies() {
        let registry = SessionRegistry::new(RegistryConfig::default());
        let (gm_tx, _gm_rx) = member();
        let (p_tx, mut p_rx) = member();
        let created = registry.create_session(ConnectionId(1), gm_tx).await.unwrap();
        registry
            .join_session(&created.binding.code, ConnectionId(2), p_tx)
            .await
            .unwrap();

        let departure = registry.leave(&created.binding, ConnectionId(1)).await;
        assert_eq!(departure, Departure::SessionEnded { notified: 1 });
        assert_eq!(registry.session_count().await, 0);

        match next_message(&mut p_rx) {
            ServerMessage::SessionError(e) => assert_eq!(e.error, GM_LEFT_NOTICE),
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_last_member_leaving_ends_session() {
        let registry = SessionRegistry::new(RegistryConfig::default());
        let (tx, _rx) = member();
        let created = registry.create_session(ConnectionId(1), tx).await.unwrap();

        let departure = registry.leave(&created.binding, ConnectionId(1)).await;
        assert_eq!(departure, Departure::SessionEnded { notified: 0 });
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactivity_expiry() {
        let registry = SessionRegistry::new(RegistryConfig::default());
        let (gm_tx, mut gm_rx) = member();
        let (p_tx, mut p_rx) = member();
        let created = registry.create_session(ConnectionId(1), gm_tx).await.unwrap();
        let code = created.binding.code.clone();
        registry.join_session(&code, ConnectionId(2), p_tx).await.unwrap();

        tokio::time::sleep(DEFAULT_SESSION_TIMEOUT - Duration::from_secs(1)).await;
        assert_eq!(registry.session_count().await, 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(registry.session_count().await, 0);

        for rx in [&mut gm_rx, &mut p_rx] {
            match next_message(rx) {
                ServerMessage::SessionError(e) => assert_eq!(e.error, EXPIRED_NOTICE),
                other => panic!("Wrong message type: {:?}", other),
            }
        }

        let (tx, _rx) = member();
        assert_eq!(
            registry.join_session(&code, ConnectionId(3), tx).await.unwrap_err(),
            SessionError::SessionNotFound
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_rearms_timer() {
        let timeout = Duration::from_secs(60);
        let registry = SessionRegistry::new(RegistryConfig {
            session_timeout: timeout,
            ..Default::default()
        });
        let (gm_tx, _gm_rx) = member();
        let created = registry.create_session(ConnectionId(1), gm_tx).await.unwrap();
        let session = registry.get(&created.binding.code).await.unwrap();

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_secs(45)).await;
            session.write().await.touch();
        }
        assert_eq!(registry.session_count().await, 1);

        tokio::time::sleep(timeout + Duration::from_secs(1)).await;
        assert_eq!(registry.session_count().await, 0);
        assert!(session.read().await.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroyed_session_timer_does_not_touch_new_session() {
        let registry = SessionRegistry::new(RegistryConfig {
            code_length: 1,
            session_timeout: Duration::from_secs(60),
            ..Default::default()
        });
        let (tx, _rx) = member();
        let first = registry.create_session(ConnectionId(1), tx).await.unwrap();
        registry.destroy_session(&first.binding.code).await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        let (tx, _rx2) = member();
        let second = registry.create_session(ConnectionId(2), tx).await.unwrap();

        // The first session's deadline passes; the second must survive it.
        tokio::time::sleep(Duration::from_secs(45)).await;
        assert!(registry.resolve(&second.binding).await.is_ok());
    }
}
