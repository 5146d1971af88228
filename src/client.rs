use std::time::Instant;

use futures::{SinkExt, StreamExt};
use futures_util::stream::{SplitSink, SplitStream};
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};

use crate::{
    cipher::SharedKey,
    error::ClientError,
    protocol::{ClientEvent, ServerEvent},
    session::{Session, SessionEvent, SessionState},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Websocket client for the relay. One connection at a time; reconnecting
/// after a drop is always an explicit [`ChatClient::connect`] call.
pub struct ChatClient {
    server: String,
    session: Session,
    sink: Option<SplitSink<WsStream, WsMessage>>,
    stream: Option<SplitStream<WsStream>>,
}

/// Local wall-clock `HH:MM`, the timestamp format shown next to messages.
pub fn local_timestamp() -> String {
    chrono::Local::now().format("%H:%M").to_string()
}

fn connect_url(server: &str, username: &str) -> Result<url::Url, ClientError> {
    let base = format!("{}/ws", server.trim_end_matches('/'));
    Ok(url::Url::parse_with_params(&base, &[("username", username)])?)
}

impl ChatClient {
    pub fn new(server: impl Into<String>) -> ChatClient {
        ChatClient::with_key(server, SharedKey::default())
    }

    pub fn with_key(server: impl Into<String>, key: SharedKey) -> ChatClient {
        ChatClient {
            server: server.into(),
            session: Session::new(key),
            sink: None,
            stream: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_connected(&self) -> bool {
        self.session.state() == SessionState::Connected
    }

    /// Open the relay connection under `username`. Returns `Ok(false)` for a
    /// blank name or when already connected.
    pub async fn connect(&mut self, username: &str) -> Result<bool, ClientError> {
        if !self.session.begin_connect(username) {
            return Ok(false);
        }
        let url = match connect_url(&self.server, self.session.username()) {
            Ok(url) => url,
            Err(e) => {
                self.session.connection_lost();
                return Err(e);
            }
        };

        match connect_async(url.as_str()).await {
            Ok((ws, _response)) => {
                let (sink, stream) = ws.split();
                self.sink = Some(sink);
                self.stream = Some(stream);
                self.session.connected();
                info!("connected to {} as {}", self.server, self.session.username());
                Ok(true)
            }
            Err(e) => {
                self.session.connection_lost();
                Err(e.into())
            }
        }
    }

    /// Encrypt and send a chat message. Blank text or no connection is a
    /// no-op returning `Ok(false)`.
    pub async fn send_message(&mut self, text: &str) -> Result<bool, ClientError> {
        if self.sink.is_none() {
            return Ok(false);
        }
        let chat = match self.session.compose(text, local_timestamp())? {
            Some(chat) => chat,
            None => return Ok(false),
        };
        self.send(&ClientEvent::Message(chat)).await
    }

    pub async fn send_typing(&mut self) -> Result<bool, ClientError> {
        self.send(&ClientEvent::Typing).await
    }

    async fn send(&mut self, event: &ClientEvent) -> Result<bool, ClientError> {
        let sink = match self.sink.as_mut() {
            Some(sink) => sink,
            None => return Ok(false),
        };
        let text = serde_json::to_string(event)?;
        sink.send(WsMessage::Text(text)).await?;
        Ok(true)
    }

    /// Wait for the next server event that changes the session.
    ///
    /// Returns `Ok(None)` when there is no connection, and
    /// `SessionEvent::Disconnected` once when the server side goes away.
    pub async fn next_event(&mut self) -> Result<Option<SessionEvent>, ClientError> {
        loop {
            let stream = match self.stream.as_mut() {
                Some(stream) => stream,
                None => return Ok(None),
            };
            match stream.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    let event = match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => event,
                        Err(e) => {
                            warn!("ignoring unreadable server frame: {}", e);
                            continue;
                        }
                    };
                    if let Some(change) = self.session.apply(event, Instant::now()) {
                        return Ok(Some(change));
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    self.drop_transport();
                    return Ok(Some(SessionEvent::Disconnected));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    self.drop_transport();
                    return Err(e.into());
                }
            }
        }
    }

    /// Close the connection and clear the local view.
    pub async fn disconnect(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.close().await {
                debug!("error closing websocket: {}", e);
            }
        }
        self.stream = None;
        self.session.close();
    }

    fn drop_transport(&mut self) {
        self.sink = None;
        self.stream = None;
        self.session.connection_lost();
        info!("connection to {} lost", self.server);
    }
}
