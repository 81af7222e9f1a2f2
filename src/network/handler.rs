//! Connection Handler
//!
//! Owns one connection's session binding. Decodes each inbound frame,
//! authorizes it against the bound session, applies it to the shared state and
//! hands the result to the broadcast router.
//!
//! Nothing in here returns an error to the transport: every failure is either
//! answered with `sessionError` (create/join) or dropped and logged.

use std::sync::Arc;
use tracing::{debug, info};

use crate::core::code::SessionCode;
use crate::game::events::StateChange;
use crate::network::broadcast::{broadcast_to_session, send_to, MemberSender};
use crate::network::protocol::{ClientMessage, ProtocolError, ServerMessage, SessionGranted};
use crate::network::registry::{Admission, Binding, Departure, SessionRegistry};
use crate::network::session::{ConnectionId, SessionError};

/// Why an inbound event was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Connection has no session.
    Unbound,
    /// Bound session no longer exists.
    SessionGone,
    /// Connection is not a member of its bound session.
    NotMember,
    /// GM-only event from a player.
    Unauthorized,
    /// Value had no safe clamped equivalent.
    InvalidValue,
    /// Frame could not be decoded.
    Malformed,
}

/// What the handler did with one inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A direct reply was sent to the caller.
    Replied(&'static str),
    /// The change was applied and relayed to `recipients` other members.
    Broadcast {
        /// Outbound event type.
        kind: &'static str,
        /// Members the event was queued for.
        recipients: usize,
    },
    /// Nothing was applied.
    Dropped(DropReason),
}

/// Per-connection message handler.
pub struct ConnectionHandler {
    id: ConnectionId,
    sender: MemberSender,
    registry: Arc<SessionRegistry>,
    binding: Option<Binding>,
}

impl ConnectionHandler {
    /// Create a handler for a new, unbound connection.
    pub fn new(id: ConnectionId, sender: MemberSender, registry: Arc<SessionRegistry>) -> Self {
        Self {
            id,
            sender,
            registry,
            binding: None,
        }
    }

    /// Connection identity.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current binding, if any.
    pub fn binding(&self) -> Option<&Binding> {
        self.binding.as_ref()
    }

    /// Handle one text frame.
    pub async fn handle_text(&mut self, text: &str) -> Dispatch {
        self.handle_decoded(ClientMessage::from_json(text)).await
    }

    /// Handle one binary frame carrying UTF-8 JSON.
    pub async fn handle_binary(&mut self, data: &[u8]) -> Dispatch {
        self.handle_decoded(ClientMessage::from_bytes(data)).await
    }

    async fn handle_decoded(&mut self, decoded: Result<ClientMessage, ProtocolError>) -> Dispatch {
        match decoded {
            Ok(msg) => self.handle_message(msg).await,
            Err(e) => {
                debug!(conn = %self.id, "Invalid message: {}", e);
                Dispatch::Dropped(DropReason::Malformed)
            }
        }
    }

    /// Handle one decoded message.
    pub async fn handle_message(&mut self, msg: ClientMessage) -> Dispatch {
        match msg {
            ClientMessage::CreateSession => self.handle_create().await,
            ClientMessage::JoinSession(req) => self.handle_join(&req.session_code).await,
            other => self.handle_mutation(other).await,
        }
    }

    async fn handle_create(&mut self) -> Dispatch {
        self.leave_current().await;

        match self.registry.create_session(self.id, self.sender.clone()).await {
            Ok(admission) => self.admit(admission, true),
            Err(e) => self.reply_error(e),
        }
    }

    async fn handle_join(&mut self, raw_code: &str) -> Dispatch {
        let code_length = self.registry.config().code_length;
        let Some(code) = SessionCode::parse(raw_code, code_length) else {
            debug!(conn = %self.id, code = raw_code, "Rejected malformed session code");
            return self.reply_error(SessionError::SessionNotFound);
        };

        // The current session is only left once the new one has admitted us.
        match self.registry.join_session(&code, self.id, self.sender.clone()).await {
            Ok(admission) => {
                let switching = self
                    .binding
                    .as_ref()
                    .map(|b| b.session_id != admission.binding.session_id)
                    .unwrap_or(false);
                if switching {
                    self.leave_current().await;
                }
                self.admit(admission, false)
            }
            Err(e) => {
                if self.binding.as_ref().map(|b| b.code == code).unwrap_or(false) {
                    self.binding = None;
                }
                self.reply_error(e)
            }
        }
    }

    /// Apply a state-mutating event and relay it to the other members.
    async fn handle_mutation(&mut self, msg: ClientMessage) -> Dispatch {
        let Some(binding) = self.binding.clone() else {
            debug!(conn = %self.id, kind = msg.kind(), "Dropped event from unbound connection");
            return Dispatch::Dropped(DropReason::Unbound);
        };

        let session = match self.registry.resolve(&binding).await {
            Ok(session) => session,
            Err(_) => {
                debug!(conn = %self.id, code = %binding.code, "Dropped event for ended session");
                self.binding = None;
                return Dispatch::Dropped(DropReason::SessionGone);
            }
        };

        let mut session = session.write().await;

        if let Err(e) = session.authorize(self.id, &msg) {
            debug!(conn = %self.id, code = %binding.code, kind = msg.kind(), "Dropped event: {}", e);
            return Dispatch::Dropped(match e {
                SessionError::Unauthorized => DropReason::Unauthorized,
                SessionError::NotInSession => DropReason::NotMember,
                _ => {
                    self.binding = None;
                    DropReason::SessionGone
                }
            });
        }

        let state = session.state_mut();
        let change = match msg {
            ClientMessage::Move(m) => Some(state.apply_move(m.token_pos, m.explored_areas)),
            ClientMessage::Radius(r) => state.set_reveal_radius(r.reveal_radius_percent),
            ClientMessage::TorchToggle(t) => Some(state.set_torchlight(t.torch_enabled)),
            ClientMessage::Map(m) => Some(state.set_map(m.map_image)),
            ClientMessage::Reset => Some(state.reset()),
            ClientMessage::CreateSession | ClientMessage::JoinSession(_) => None,
        };

        let Some(change) = change else {
            debug!(conn = %self.id, code = %binding.code, "Dropped event with invalid value");
            return Dispatch::Dropped(DropReason::InvalidValue);
        };

        if matches!(change, StateChange::MapChanged { .. }) {
            info!(code = %binding.code, bytes = session.state().map_bytes(), "Map uploaded");
        }

        session.touch();
        let message = ServerMessage::from(change);
        let recipients = broadcast_to_session(&session, &message, Some(self.id));

        Dispatch::Broadcast {
            kind: message.kind(),
            recipients,
        }
    }

    /// Leave the bound session, if any.
    async fn leave_current(&mut self) -> Option<Departure> {
        let binding = self.binding.take()?;
        Some(self.registry.leave(&binding, self.id).await)
    }

    /// Connection closed: leave the bound session.
    pub async fn disconnect(mut self) -> Option<Departure> {
        self.leave_current().await
    }

    fn admit(&mut self, admission: Admission, created: bool) -> Dispatch {
        let Admission { binding, snapshot } = admission;
        let granted = SessionGranted {
            session_code: binding.code.clone(),
            is_gm: binding.is_gm,
            game_state: snapshot,
        };
        self.binding = Some(binding);

        let reply = if created {
            ServerMessage::SessionCreated(granted)
        } else {
            ServerMessage::SessionJoined(granted)
        };
        send_to(&self.sender, &reply);
        Dispatch::Replied(reply.kind())
    }

    fn reply_error(&self, error: SessionError) -> Dispatch {
        debug!(conn = %self.id, "Session error: {}", error);
        let reply = ServerMessage::session_error(&error);
        send_to(&self.sender, &reply);
        Dispatch::Replied(reply.kind())
    }
}
