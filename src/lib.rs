use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use futures::{SinkExt, StreamExt, TryFutureExt};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::UnboundedReceiverStream;
use warp::ws::{Message, WebSocket};

pub mod api;
pub mod cipher;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod session;

use protocol::{ClientEvent, RelayedChat, ServerEvent, TypingNotice};
use registry::{ConnectionId, Registry};

/// Queue feeding one connection's websocket writer task.
pub type Outbound = mpsc::UnboundedSender<Message>;

pub type SharedRelay = Arc<Relay>;

/// Connection registry plus the fan-out built on top of it.
///
/// Registry mutation and the presence broadcast that follows it happen under
/// the same write lock, so every `user-list` reflects the registry exactly at
/// the moment it was sent.
#[derive(Debug)]
pub struct Relay {
    registry: RwLock<Registry<Outbound>>,
    next_id: AtomicU64,
}

impl Default for Relay {
    fn default() -> Self {
        Relay {
            registry: RwLock::new(Registry::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Relay {
    pub fn new() -> Relay {
        Relay::default()
    }

    /// Register a new connection and announce the updated presence list to
    /// everyone, the new connection included.
    pub async fn connect(&self, username: String, outbound: Outbound) -> ConnectionId {
        let mut registry = self.registry.write().await;
        // Ids are handed out under the write lock so id order stays insertion order.
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!("user connected: {} ({})", username, id);
        registry.add(id, username, outbound);
        broadcast_presence(&registry);
        id
    }

    /// Deregister a connection and announce the updated presence list.
    /// Unknown ids are ignored.
    pub async fn disconnect(&self, id: ConnectionId) -> Option<String> {
        let mut registry = self.registry.write().await;
        let removed = registry.remove(id)?;
        info!("user disconnected: {} ({})", removed, id);
        broadcast_presence(&registry);
        Some(removed)
    }

    /// Relay one client event to every other connection, stamped with the
    /// sender's registered display name.
    pub async fn dispatch(&self, from: ConnectionId, event: ClientEvent) {
        let registry = self.registry.read().await;
        let username = match registry.name(from) {
            Some(name) => name.to_owned(),
            None => {
                debug!("dropping event from unregistered connection {}", from);
                return;
            }
        };

        let relayed = match event {
            ClientEvent::Message(chat) => {
                debug!("message from {} (encrypted)", username);
                ServerEvent::Message(RelayedChat {
                    username,
                    message: chat.message,
                    timestamp: chat.timestamp,
                })
            }
            ClientEvent::Typing => ServerEvent::UserTyping(TypingNotice { username }),
        };
        fan_out(registry.others(from), &relayed);
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.read().await.len()
    }

    pub async fn presence(&self) -> Vec<String> {
        self.registry.read().await.values()
    }
}

fn broadcast_presence(registry: &Registry<Outbound>) {
    let event = ServerEvent::UserList(registry.values());
    fan_out(registry.outbound(), &event);
}

fn fan_out<'a>(targets: impl Iterator<Item = (ConnectionId, &'a Outbound)>, event: &ServerEvent) {
    let msg = match event.to_message() {
        Ok(msg) => msg,
        Err(e) => {
            error!("could not encode {:?}: {}", event, e);
            return;
        }
    };
    for (id, tx) in targets {
        if tx.send(msg.clone()).is_err() {
            // The writer task is gone; its reader will deregister it shortly.
            debug!("connection {} already closed, skipping", id);
        }
    }
}

pub async fn user_connected(ws: WebSocket, username: String, relay: SharedRelay) {
    let (mut user_ws_tx, mut user_ws_rx) = ws.split();

    // The relay only ever enqueues; this task owns the socket's write half.
    let (tx, rx) = mpsc::unbounded_channel();
    let mut rx = UnboundedReceiverStream::new(rx);

    tokio::task::spawn(async move {
        while let Some(message) = rx.next().await {
            user_ws_tx
                .send(message)
                .unwrap_or_else(|e| {
                    debug!("websocket send error: {}", e);
                })
                .await;
        }
    });

    let my_id = relay.connect(username, tx).await;

    // Every frame the user sends is decoded and relayed to everyone else.
    while let Some(result) = user_ws_rx.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                warn!("websocket error(uid={}): {}", my_id, e);
                break;
            }
        };
        user_message(my_id, msg, &relay).await;
    }

    // Stream ended: closed by the client or dropped by the transport.
    relay.disconnect(my_id).await;
}

async fn user_message(my_id: ConnectionId, msg: Message, relay: &Relay) {
    match ClientEvent::from_message(&msg) {
        Ok(Some(event)) => relay.dispatch(my_id, event).await,
        Ok(None) => {}
        Err(e) => warn!("ignoring frame from uid={}: {}", my_id, e),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::{rngs::StdRng, Rng, SeedableRng};
    use tokio::sync::mpsc::{self, UnboundedReceiver};
    use warp::ws::Message;

    use crate::protocol::{ClientEvent, OutgoingChat, RelayedChat, ServerEvent, TypingNotice};
    use crate::registry::ConnectionId;
    use crate::Relay;

    fn decode(msg: Message) -> ServerEvent {
        serde_json::from_str(msg.to_str().unwrap()).unwrap()
    }

    fn drain(rx: &mut UnboundedReceiver<Message>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            events.push(decode(msg));
        }
        events
    }

    fn user_list(names: &[&str]) -> ServerEvent {
        ServerEvent::UserList(names.iter().map(|n| n.to_string()).collect())
    }

    #[tokio::test]
    async fn presence_follows_every_connect_and_disconnect() {
        let relay = Relay::new();
        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();

        let alice = relay.connect("alice".into(), alice_tx).await;
        assert_eq!(drain(&mut alice_rx), vec![user_list(&["alice"])]);

        let bob = relay.connect("bob".into(), bob_tx).await;
        assert_eq!(drain(&mut alice_rx), vec![user_list(&["alice", "bob"])]);
        assert_eq!(drain(&mut bob_rx), vec![user_list(&["alice", "bob"])]);

        assert_eq!(relay.disconnect(bob).await.as_deref(), Some("bob"));
        assert_eq!(drain(&mut alice_rx), vec![user_list(&["alice"])]);
        assert_eq!(relay.connection_count().await, 1);

        // Second disconnect of the same id is a no-op and broadcasts nothing.
        assert_eq!(relay.disconnect(bob).await, None);
        assert!(drain(&mut alice_rx).is_empty());

        relay.disconnect(alice).await;
        assert_eq!(relay.connection_count().await, 0);
    }

    #[tokio::test]
    async fn chat_reaches_everyone_but_the_sender() {
        let relay = Relay::new();
        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
        let (carol_tx, mut carol_rx) = mpsc::unbounded_channel();

        let alice = relay.connect("alice".into(), alice_tx).await;
        relay.connect("bob".into(), bob_tx).await;
        relay.connect("carol".into(), carol_tx).await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);
        drain(&mut carol_rx);

        relay
            .dispatch(
                alice,
                ClientEvent::Message(OutgoingChat {
                    message: "ciphertext".into(),
                    timestamp: "09:12".into(),
                }),
            )
            .await;

        let expected = ServerEvent::Message(RelayedChat {
            username: "alice".into(),
            message: "ciphertext".into(),
            timestamp: "09:12".into(),
        });
        assert_eq!(drain(&mut bob_rx), vec![expected.clone()]);
        assert_eq!(drain(&mut carol_rx), vec![expected]);
        assert!(drain(&mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn typing_is_relayed_with_sender_name() {
        let relay = Relay::new();
        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();

        relay.connect("alice".into(), alice_tx).await;
        let bob = relay.connect("bob".into(), bob_tx).await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        relay.dispatch(bob, ClientEvent::Typing).await;
        assert_eq!(
            drain(&mut alice_rx),
            vec![ServerEvent::UserTyping(TypingNotice {
                username: "bob".into()
            })]
        );
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn closed_targets_do_not_stop_fan_out() {
        let relay = Relay::new();
        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        let (bob_tx, bob_rx) = mpsc::unbounded_channel();
        let (carol_tx, mut carol_rx) = mpsc::unbounded_channel();

        let alice = relay.connect("alice".into(), alice_tx).await;
        relay.connect("bob".into(), bob_tx).await;
        relay.connect("carol".into(), carol_tx).await;
        drop(bob_rx);
        drain(&mut alice_rx);
        drain(&mut carol_rx);

        relay.dispatch(alice, ClientEvent::Typing).await;
        assert_eq!(drain(&mut carol_rx).len(), 1);
    }

    #[tokio::test]
    async fn shared_names_disconnect_by_id() {
        let relay = Relay::new();
        let (first_tx, _first_rx) = mpsc::unbounded_channel();
        let (second_tx, mut second_rx) = mpsc::unbounded_channel();

        let first = relay.connect("sam".into(), first_tx).await;
        relay.connect("sam".into(), second_tx).await;
        assert_eq!(relay.presence().await, vec!["sam", "sam"]);
        drain(&mut second_rx);

        relay.disconnect(first).await;
        assert_eq!(relay.presence().await, vec!["sam"]);
        assert_eq!(drain(&mut second_rx), vec![user_list(&["sam"])]);
    }

    #[tokio::test]
    async fn events_from_unknown_connections_are_dropped() {
        let relay = Relay::new();
        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        relay.connect("alice".into(), alice_tx).await;
        drain(&mut alice_rx);

        relay.dispatch(999, ClientEvent::Typing).await;
        assert!(drain(&mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn presence_matches_registry_across_random_churn() {
        let relay = Relay::new();
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let names = ["alice", "bob", "carol", "sam", "sam"];
        let mut live: Vec<(ConnectionId, String, UnboundedReceiver<Message>)> = Vec::new();

        for _ in 0..300 {
            if live.is_empty() || rng.gen_bool(0.55) {
                let name = names[rng.gen_range(0..names.len())].to_string();
                let (tx, rx) = mpsc::unbounded_channel();
                let id = relay.connect(name.clone(), tx).await;
                live.push((id, name, rx));
            } else {
                let (id, name, _rx) = live.remove(rng.gen_range(0..live.len()));
                assert_eq!(relay.disconnect(id).await, Some(name));
            }

            // `live` is kept in connect order, which is the expected presence order.
            let expected: Vec<String> = live.iter().map(|(_, name, _)| name.clone()).collect();
            assert_eq!(relay.presence().await, expected);
            for (_, _, rx) in live.iter_mut() {
                assert_eq!(drain(rx), vec![ServerEvent::UserList(expected.clone())]);
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_connects_append_in_arrival_order() {
        let relay = Arc::new(Relay::new());

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let relay = relay.clone();
                tokio::spawn(async move {
                    let name = format!("user{}", i);
                    let (tx, mut rx) = mpsc::unbounded_channel();
                    relay.connect(name.clone(), tx).await;
                    // The first list a connection sees is the one its own
                    // connect produced; a newcomer is always listed last.
                    match decode(rx.recv().await.unwrap()) {
                        ServerEvent::UserList(names) => {
                            assert_eq!(names.last(), Some(&name));
                        }
                        other => panic!("unexpected event {:?}", other),
                    }
                    rx
                })
            })
            .collect();

        let mut receivers = Vec::new();
        for handle in handles {
            receivers.push(handle.await.unwrap());
        }
        assert_eq!(relay.connection_count().await, 64);
    }
}
