//! Message envelopes.
//!
//! Payloads are opaque bytes; the pool only routes them.

use bytes::Bytes;

use super::connection::ClientId;

/// A payload addressed to one client, or received from one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMessage {
    /// Sender or recipient.
    pub client_id: ClientId,
    /// Opaque payload.
    pub payload: Bytes,
}

impl ClientMessage {
    /// Creates a client message.
    #[must_use]
    pub fn new(client_id: impl Into<ClientId>, payload: impl Into<Bytes>) -> Self {
        Self {
            client_id: client_id.into(),
            payload: payload.into(),
        }
    }
}

/// A payload for every connected client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastMessage {
    /// Opaque payload.
    pub payload: Bytes,
}

impl BroadcastMessage {
    /// Creates a broadcast message.
    #[must_use]
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

/// Work item carried by a dispatch queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Deliver to a single client.
    Unicast(ClientMessage),
    /// Deliver to every client.
    Broadcast(BroadcastMessage),
}

impl Outbound {
    /// Returns the payload carried by this item.
    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        match self {
            Self::Unicast(msg) => &msg.payload,
            Self::Broadcast(msg) => &msg.payload,
        }
    }

    /// Returns a short name for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Unicast(_) => "unicast",
            Self::Broadcast(_) => "broadcast",
        }
    }
}

impl From<ClientMessage> for Outbound {
    fn from(msg: ClientMessage) -> Self {
        Self::Unicast(msg)
    }
}

impl From<BroadcastMessage> for Outbound {
    fn from(msg: BroadcastMessage) -> Self {
        Self::Broadcast(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_new() {
        let msg = ClientMessage::new("a", "hello");
        assert_eq!(msg.client_id.as_str(), "a");
        assert_eq!(msg.payload, Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_outbound_from() {
        let unicast = Outbound::from(ClientMessage::new("a", "x"));
        assert_eq!(unicast.kind(), "unicast");
        assert_eq!(unicast.payload(), &Bytes::from_static(b"x"));

        let broadcast = Outbound::from(BroadcastMessage::new(vec![1u8, 2, 3]));
        assert_eq!(broadcast.kind(), "broadcast");
        assert_eq!(broadcast.payload().len(), 3);
    }
}
