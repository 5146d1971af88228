//! Client-side chat state: connection lifecycle, message list, online users
//! and the typing indicator. No I/O happens here; [`crate::client`] feeds it.

use std::time::{Duration, Instant};

use log::warn;

use crate::{
    cipher::SharedKey,
    error::CipherError,
    protocol::{OutgoingChat, ServerEvent},
};

/// How long the typing indicator stays on after the last signal.
pub const TYPING_WINDOW: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub username: String,
    pub message: String,
    pub timestamp: String,
    pub is_own: bool,
}

/// What changed in the session after a server event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The online-user view was replaced (own name already removed).
    Presence(Vec<String>),
    Message(ChatLine),
    Typing(String),
    Disconnected,
}

/// Local "someone is typing" flag. Each signal restarts the window.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypingIndicator {
    until: Option<Instant>,
}

impl TypingIndicator {
    pub fn signal(&mut self, now: Instant) {
        self.until = Some(now + TYPING_WINDOW);
    }

    pub fn is_active(&self, now: Instant) -> bool {
        self.until.map_or(false, |until| now < until)
    }

    /// When the indicator will switch off unless another signal arrives.
    pub fn expires_at(&self) -> Option<Instant> {
        self.until
    }

    pub fn clear(&mut self) {
        self.until = None;
    }
}

#[derive(Debug)]
pub struct Session {
    key: SharedKey,
    username: String,
    state: SessionState,
    messages: Vec<ChatLine>,
    online_users: Vec<String>,
    typing: TypingIndicator,
}

impl Default for Session {
    fn default() -> Self {
        Session::new(SharedKey::default())
    }
}

impl Session {
    pub fn new(key: SharedKey) -> Session {
        Session {
            key,
            username: String::new(),
            state: SessionState::Disconnected,
            messages: Vec::new(),
            online_users: Vec::new(),
            typing: TypingIndicator::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn messages(&self) -> &[ChatLine] {
        &self.messages
    }

    pub fn online_users(&self) -> &[String] {
        &self.online_users
    }

    pub fn is_typing(&self, now: Instant) -> bool {
        self.typing.is_active(now)
    }

    pub fn typing_expires_at(&self) -> Option<Instant> {
        self.typing.expires_at()
    }

    /// Move to `Connecting` under `username`. Returns `false` (and changes
    /// nothing) for a blank name or when a connection is already up or in
    /// flight.
    pub fn begin_connect(&mut self, username: &str) -> bool {
        let username = username.trim();
        if username.is_empty() || self.state != SessionState::Disconnected {
            return false;
        }
        self.username = username.to_owned();
        self.state = SessionState::Connecting;
        true
    }

    pub fn connected(&mut self) {
        self.state = SessionState::Connected;
    }

    /// Transport dropped or handshake failed. The view is kept.
    pub fn connection_lost(&mut self) {
        self.state = SessionState::Disconnected;
    }

    /// User-initiated disconnect: drops the transcript and the user list.
    pub fn close(&mut self) {
        self.state = SessionState::Disconnected;
        self.messages.clear();
        self.online_users.clear();
        self.typing.clear();
    }

    /// Encrypt `text` for sending and append it to the local transcript.
    /// Blank text or a session that is not connected yields `Ok(None)`.
    pub fn compose(
        &mut self,
        text: &str,
        timestamp: String,
    ) -> Result<Option<OutgoingChat>, CipherError> {
        if self.state != SessionState::Connected || text.trim().is_empty() {
            return Ok(None);
        }
        let message = self.key.encrypt(text)?;
        self.messages.push(ChatLine {
            username: self.username.clone(),
            message: text.to_owned(),
            timestamp: timestamp.clone(),
            is_own: true,
        });
        Ok(Some(OutgoingChat { message, timestamp }))
    }

    pub fn apply(&mut self, event: ServerEvent, now: Instant) -> Option<SessionEvent> {
        match event {
            ServerEvent::UserList(users) => {
                let own = self.username.as_str();
                self.online_users = users.into_iter().filter(|u| u != own).collect();
                Some(SessionEvent::Presence(self.online_users.clone()))
            }
            ServerEvent::Message(chat) => match self.key.decrypt(&chat.message) {
                Ok(message) => {
                    let line = ChatLine {
                        username: chat.username,
                        message,
                        timestamp: chat.timestamp,
                        is_own: false,
                    };
                    self.messages.push(line.clone());
                    Some(SessionEvent::Message(line))
                }
                Err(e) => {
                    warn!("dropping message from {}: {}", chat.username, e);
                    None
                }
            },
            ServerEvent::UserTyping(notice) => {
                if notice.username == self.username {
                    return None;
                }
                self.typing.signal(now);
                Some(SessionEvent::Typing(notice.username))
            }
        }
    }
}
