//! Broadcast Router
//!
//! Fans a serialized event out to the members of one session. Each message is
//! encoded once and the resulting frame is shared by every recipient.
//!
//! Outbound queues are bounded. A member whose queue is full is not waited
//! for: the frame is dropped for that member and its connection is signalled
//! to close, so one stalled socket cannot hold memory for the whole session.

use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use crate::network::protocol::ServerMessage;
use crate::network::session::{ConnectionId, Session};

/// A JSON text frame ready to write to a socket.
pub type Frame = Arc<str>;

/// Frames a connection may have queued before it is considered stalled.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// Outbound queue of one connection. Drained by that connection's writer task.
#[derive(Clone, Debug)]
pub struct MemberSender {
    tx: mpsc::Sender<Frame>,
    overflow: Arc<Notify>,
}

/// Create a member queue holding at most `capacity` frames.
pub fn member_channel(capacity: usize) -> (MemberSender, mpsc::Receiver<Frame>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let sender = MemberSender {
        tx,
        overflow: Arc::new(Notify::new()),
    };
    (sender, rx)
}

impl MemberSender {
    /// Queue a frame without waiting. Returns false if it was not queued.
    ///
    /// A full queue marks the connection as stalled; see [`MemberSender::overflowed`].
    pub fn send(&self, frame: Frame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Outbound queue full, dropping stalled connection");
                self.overflow.notify_one();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Whether the writer side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once a send has found the queue full.
    pub async fn overflowed(&self) {
        self.overflow.notified().await
    }
}

/// Serialize a message into a shareable frame.
pub fn encode(message: &ServerMessage) -> Option<Frame> {
    match message.to_json() {
        Ok(text) => Some(Arc::from(text)),
        Err(e) => {
            error!("Failed to serialize {}: {}", message.kind(), e);
            None
        }
    }
}

/// Send one message to one connection. Returns false if it was not queued.
pub fn send_to(sender: &MemberSender, message: &ServerMessage) -> bool {
    match encode(message) {
        Some(frame) => sender.send(frame),
        None => false,
    }
}

/// Send `message` to every open member of `session`, skipping `exclude`.
///
/// Must be called while holding the session's lock so that deliveries keep the
/// order in which mutations were applied. Returns the number of members the
/// frame was queued for.
pub fn broadcast_to_session(
    session: &Session,
    message: &ServerMessage,
    exclude: Option<ConnectionId>,
) -> usize {
    let Some(frame) = encode(message) else {
        return 0;
    };

    let mut delivered = 0;
    for (id, sender) in session.members() {
        if Some(id) == exclude || sender.is_closed() {
            continue;
        }
        if sender.send(frame.clone()) {
            delivered += 1;
        }
    }

    debug!(
        code = %session.code,
        kind = message.kind(),
        delivered,
        "Broadcast"
    );
    delivered
}
