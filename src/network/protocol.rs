//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every message is a JSON object discriminated by its `type` field; the
//! type strings and field names are shared with the browser client and must
//! not change.

use serde::{Serialize, Deserialize};

use crate::core::code::SessionCode;
use crate::core::point::MapPoint;
use crate::game::events::StateChange;
use crate::game::state::SharedGameState;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Open a new session with the caller as GM.
    CreateSession,

    /// Join (or resume) a session by code.
    JoinSession(JoinRequest),

    /// Token moved; carries the full trail.
    Move(MovePayload),

    /// Reveal radius changed.
    Radius(RadiusPayload),

    /// GM torchlight toggled.
    TorchToggle(TorchPayload),

    /// New map uploaded (GM only).
    Map(MapPayload),

    /// Reset token and trail (GM only).
    Reset,
}

impl ClientMessage {
    /// Wire name of this message, as found in its `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::CreateSession => "createSession",
            ClientMessage::JoinSession(_) => "joinSession",
            ClientMessage::Move(_) => "move",
            ClientMessage::Radius(_) => "radius",
            ClientMessage::TorchToggle(_) => "torchToggle",
            ClientMessage::Map(_) => "map",
            ClientMessage::Reset => "reset",
        }
    }

    /// Whether only the session's GM may send this message.
    pub fn is_gm_only(&self) -> bool {
        matches!(self, ClientMessage::Map(_) | ClientMessage::Reset)
    }
}

/// Join request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    /// Code as typed by the player (validated server-side).
    pub session_code: String,
}

/// Token position and trail. Sent by clients as `move`, relayed as `update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovePayload {
    /// New token position.
    pub token_pos: MapPoint,
    /// Complete reveal trail after the move.
    #[serde(default)]
    pub explored_areas: Vec<MapPoint>,
}

/// Reveal radius.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadiusPayload {
    /// Percent of map width, integer or float.
    pub reveal_radius_percent: f64,
}

/// Torchlight flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorchPayload {
    /// New torchlight state.
    pub torch_enabled: bool,
}

/// Map upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapPayload {
    /// Image as a Data URI.
    pub map_image: String,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Reply to `createSession`.
    SessionCreated(SessionGranted),

    /// Reply to `joinSession`.
    SessionJoined(SessionGranted),

    /// Session-level failure or session end.
    SessionError(SessionErrorNotice),

    /// Another member moved the token.
    Update(MovePayload),

    /// Another member changed the reveal radius.
    Radius(RadiusPayload),

    /// Another member toggled torchlight.
    TorchToggle(TorchPayload),

    /// The GM uploaded a map.
    Map(MapPayload),

    /// The GM reset the token.
    Reset(ResetNotice),
}

/// Successful create/join reply with a full state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionGranted {
    /// Code of the session now bound to this connection.
    pub session_code: SessionCode,
    /// Whether this connection holds the GM role.
    #[serde(rename = "isGM")]
    pub is_gm: bool,
    /// Current shared state.
    pub game_state: SharedGameState,
}

/// Session error text shown to the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionErrorNotice {
    /// Human-readable reason.
    pub error: String,
}

/// Reset broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetNotice {
    /// Position the token was restored to.
    pub token_pos: MapPoint,
}

impl ServerMessage {
    /// Build a `sessionError` from anything displayable.
    pub fn session_error(error: impl ToString) -> Self {
        ServerMessage::SessionError(SessionErrorNotice { error: error.to_string() })
    }

    /// Wire name of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::SessionCreated(_) => "sessionCreated",
            ServerMessage::SessionJoined(_) => "sessionJoined",
            ServerMessage::SessionError(_) => "sessionError",
            ServerMessage::Update(_) => "update",
            ServerMessage::Radius(_) => "radius",
            ServerMessage::TorchToggle(_) => "torchToggle",
            ServerMessage::Map(_) => "map",
            ServerMessage::Reset(_) => "reset",
        }
    }
}

impl From<StateChange> for ServerMessage {
    fn from(change: StateChange) -> Self {
        match change {
            StateChange::Moved { token_pos, explored_areas } => {
                ServerMessage::Update(MovePayload { token_pos, explored_areas })
            }
            StateChange::RadiusChanged { reveal_radius_percent } => {
                ServerMessage::Radius(RadiusPayload { reveal_radius_percent })
            }
            StateChange::TorchToggled { enabled } => {
                ServerMessage::TorchToggle(TorchPayload { torch_enabled: enabled })
            }
            StateChange::MapChanged { map_image } => {
                ServerMessage::Map(MapPayload { map_image })
            }
            StateChange::Reset { token_pos } => {
                ServerMessage::Reset(ResetNotice { token_pos })
            }
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

/// Inbound frame could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Not valid JSON or not a known message shape.
    #[error("malformed message: {0}")]
    MalformedMessage(#[from] serde_json::Error),

    /// Binary frame that is not UTF-8 text.
    #[error("binary frame is not UTF-8")]
    NonUtf8Frame,
}

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Deserialize from a binary frame holding UTF-8 JSON.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(data).map_err(|_| ProtocolError::NonUtf8Frame)?;
        Self::from_json(text)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
