//! JSON frames exchanged over the chat websocket.
//!
//! Every frame is `{"event": <kind>, "data": <payload>}`; events without a
//! payload leave out `data`.

use serde::{Deserialize, Serialize};
use warp::ws::Message;

use crate::error::ProtocolError;

/// Encrypted chat payload as supplied by the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingChat {
    /// Ciphertext, opaque to the relay.
    pub message: String,
    pub timestamp: String,
}

/// Chat payload as delivered to recipients, stamped with the sender's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedChat {
    pub username: String,
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingNotice {
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    Message(OutgoingChat),
    Typing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    UserList(Vec<String>),
    Message(RelayedChat),
    UserTyping(TypingNotice),
}

impl ServerEvent {
    pub fn to_message(&self) -> Result<Message, ProtocolError> {
        Ok(Message::text(serde_json::to_string(self)?))
    }
}

impl ClientEvent {
    /// Decode an inbound websocket frame. Close, ping and pong frames yield
    /// `Ok(None)`.
    pub fn from_message(msg: &Message) -> Result<Option<ClientEvent>, ProtocolError> {
        if msg.is_close() || msg.is_ping() || msg.is_pong() {
            return Ok(None);
        }
        let text = msg.to_str().map_err(|_| ProtocolError::NotText)?;
        Ok(Some(serde_json::from_str(text)?))
    }
}
