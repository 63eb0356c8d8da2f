use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use super::{NodeConfig, NodeStatus, Shared, State};
use crate::event_handler::ManagerEvent;
use crate::model::{IncomingMessage, RemoteStats, UpdateSession};
use crate::rest::Rest;
use crate::{Error, Result};

/// One WebSocket session to one Lavalink node, plus the node's REST client.
pub struct Node {
    config: NodeConfig,
    seq: u64,
    rest: Arc<dyn Rest>,
    shared: Weak<Shared>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    state: State,
    /// Outbound frames for the running socket task.
    sender: Option<UnboundedSender<Message>>,
    session: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    /// Set by an explicit disconnect, so the socket task does not reconnect.
    closing: bool,
}

impl Node {
    pub(crate) fn new(config: NodeConfig, seq: u64, rest: Arc<dyn Rest>, shared: Weak<Shared>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            config,
            seq,
            rest,
            shared,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[inline]
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    #[inline]
    pub fn rest(&self) -> &Arc<dyn Rest> {
        &self.rest
    }

    /// Registration order within the manager.
    #[inline]
    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    pub fn state(&self) -> State {
        self.inner.lock().state.clone()
    }

    pub fn status(&self) -> NodeStatus {
        self.inner.lock().state.status
    }

    pub fn is_connected(&self) -> bool {
        self.status() == NodeStatus::Connected
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.lock().state.session_id.clone()
    }

    pub fn stats(&self) -> Option<RemoteStats> {
        self.inner.lock().state.stats.clone()
    }

    pub fn penalty(&self) -> i64 {
        self.inner.lock().state.penalty()
    }

    /// Opens the socket in a background task. Progress is reported through
    /// [`ManagerEvent`]s.
    ///
    /// Fails only if the handshake request cannot be built.
    pub fn connect(self: &Arc<Self>) -> Result<()> {
        let request = self.request()?;
        let node = Arc::clone(self);

        let mut inner = self.inner.lock();
        inner.closing = false;
        inner.state.status = NodeStatus::Connecting;
        inner.state.attempts += 1;

        debug!("Connecting to node {} (attempt {})", self.name(), inner.state.attempts);

        let session = tokio::spawn(node.run(request));

        if let Some(previous) = inner.session.replace(session) {
            previous.abort();
        }

        Ok(())
    }

    fn request(&self) -> Result<Request> {
        let shared = self.shared.upgrade().ok_or(Error::ManagerDropped)?;
        let mut request = self.config.socket_url().into_client_request()?;
        let headers = request.headers_mut();

        headers.insert("Authorization", HeaderValue::from_str(&self.config.password)?);
        headers.insert("User-Id", HeaderValue::from_str(&shared.user_id.to_string())?);
        headers.insert("Client-Name", HeaderValue::from_str(&shared.options.client_name)?);

        if let Some(key) = shared.options.resume_key() {
            headers.insert("Resume-Key", HeaderValue::from_str(key)?);
        }

        Ok(request)
    }

    async fn run(self: Arc<Self>, request: Request) {
        let stream = match connect_async(request).await {
            Ok((stream, _)) => stream,
            Err(why) => {
                warn!("Failed to connect to node {}: {}", self.name(), why);

                self.end_session();
                self.report(|node| ManagerEvent::NodeError {
                    error: Arc::new(why.into()),
                    node,
                });
                self.reconnect();

                return;
            },
        };

        let (sender, mut outgoing) = mpsc::unbounded_channel();
        self.inner.lock().sender = Some(sender);

        match self.shared.upgrade() {
            Some(shared) => handle_open(&shared, &self).await,
            None => return,
        }

        let (mut sink, mut stream) = stream.split();

        loop {
            tokio::select! {
                message = outgoing.recv() => {
                    let message = match message {
                        Some(message) => message,
                        None => break,
                    };
                    let is_close = matches!(message, Message::Close(_));

                    if let Err(why) = sink.send(message).await {
                        warn!("Failed to write to node {}: {}", self.name(), why);
                        self.report(|node| ManagerEvent::NodeError {
                            error: Arc::new(why.into()),
                            node,
                        });

                        break;
                    }

                    if is_close {
                        break;
                    }
                },
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        trace!("Received text from {}: {}", self.name(), text);

                        match self.shared.upgrade() {
                            Some(shared) => handle_message(&shared, &self, &text).await,
                            None => break,
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        info!("Node {} closed the connection: {:?}", self.name(), frame);

                        self.report(|node| ManagerEvent::NodeDisconnect {
                            code: frame.as_ref().map(|f| u16::from(f.code)),
                            reason: frame.map(|f| f.reason.into_owned()).unwrap_or_default(),
                            node,
                        });

                        break;
                    },
                    Some(Ok(other)) => {
                        trace!("Received non-text frame from {}: {:?}", self.name(), other);
                    },
                    Some(Err(why)) => {
                        warn!("Error reading from node {}: {}", self.name(), why);
                        self.report(|node| ManagerEvent::NodeError {
                            error: Arc::new(why.into()),
                            node,
                        });

                        break;
                    },
                    None => {
                        self.report(|node| ManagerEvent::NodeDisconnect {
                            code: None,
                            reason: String::new(),
                            node,
                        });

                        break;
                    },
                },
            }
        }

        let _ = sink.close().await;

        if !self.end_session() {
            self.reconnect();
        }
    }

    /// Marks the socket as gone. Returns whether the node is being closed on
    /// purpose.
    fn end_session(&self) -> bool {
        let closing = {
            let mut inner = self.inner.lock();
            inner.sender = None;
            inner.state.status = NodeStatus::Disconnected;
            inner.state.session_id = None;

            inner.closing
        };

        self.rest.set_session_id(None);

        closing
    }

    fn report(&self, event: impl FnOnce(String) -> ManagerEvent) {
        if let Some(shared) = self.shared.upgrade() {
            shared.emit(event(self.name().to_owned()));
        }
    }

    /// Arms the reconnect timer.
    ///
    /// When it fires the node reconnects, unless it already used up its
    /// attempts, in which case a terminal [`Error::ReconnectExhausted`] is
    /// reported and nothing further is scheduled.
    pub fn reconnect(self: &Arc<Self>) {
        let (delay, tries) = match self.shared.upgrade() {
            Some(shared) => (shared.options.reconnect_timeout, shared.options.reconnect_tries),
            None => return,
        };
        let node = Arc::clone(self);
        let mut guard = self.inner.lock();

        let timer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;

            let attempts = {
                let mut inner = node.inner.lock();
                inner.reconnect = None;

                if inner.closing {
                    return;
                }

                inner.state.attempts
            };

            if attempts > tries {
                error!("Giving up on node {} after {} attempts", node.name(), attempts);

                node.report(|name| ManagerEvent::NodeError {
                    error: Arc::new(Error::ReconnectExhausted {
                        node: name.clone(),
                        attempts,
                    }),
                    node: name,
                });

                return;
            }

            {
                let mut inner = node.inner.lock();
                inner.sender = None;

                if let Some(session) = inner.session.take() {
                    session.abort();
                }
            }

            info!("Reconnecting to node {}", node.name());
            node.report(|name| ManagerEvent::NodeReconnect {
                node: name,
                attempt: attempts,
            });

            if let Err(why) = node.connect() {
                node.report(|name| ManagerEvent::NodeError {
                    error: Arc::new(why),
                    node: name,
                });
            }
        });

        // stored under the lock the timer takes, so it cannot finish first
        if let Some(previous) = guard.reconnect.replace(timer) {
            if !previous.is_finished() {
                warn!("Replacing a pending reconnect of node {}", self.name());
            }

            previous.abort();
        }
    }

    /// Serializes and writes a payload to the socket.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> Result<()> {
        let text = serde_json::to_string(payload)?;
        let inner = self.inner.lock();

        match inner.sender {
            Some(ref sender) if inner.state.status == NodeStatus::Connected => {
                sender.send(Message::Text(text)).map_err(|_| Error::NotConnected)
            },
            _ => Err(Error::NotConnected),
        }
    }

    /// Moves every player off this node, closes the socket and removes the
    /// node from the manager. Does nothing unless connected.
    ///
    /// Players that cannot be moved anywhere are destroyed.
    pub async fn disconnect(&self) {
        {
            let mut inner = self.inner.lock();

            if inner.state.status != NodeStatus::Connected {
                return;
            }

            inner.closing = true;
            inner.state.status = NodeStatus::Disconnected;
            inner.state.session_id = None;

            if let Some(timer) = inner.reconnect.take() {
                timer.abort();
            }
        }

        let shared = match self.shared.upgrade() {
            Some(shared) => shared,
            None => return,
        };

        for player in shared.players() {
            let mut player = player.lock().await;

            if player.node_name() != self.name() {
                continue;
            }

            match player.auto_move_node().await {
                Ok(()) => {},
                Err(Error::NoNodesAvailable) => {
                    debug!("No node left for guild {}, destroying its player", player.guild_id);

                    if let Err(why) = player.destroy() {
                        warn!("Failed to destroy player of guild {}: {}", player.guild_id, why);
                    }
                },
                Err(why) => warn!("Failed to move player of guild {}: {}", player.guild_id, why),
            }
        }

        if let Some(sender) = self.inner.lock().sender.take() {
            let _ = sender.send(Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "destroy".into(),
            })));
        }

        self.rest.set_session_id(None);
        shared.remove_node(self.name());

        info!("Disconnected from node {}", self.name());
        shared.emit(ManagerEvent::NodeDisconnect {
            node: self.name().to_owned(),
            code: Some(1000),
            reason: "destroy".to_owned(),
        });
    }

    /// Aborts the socket and any pending reconnect.
    pub(crate) fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.closing = true;
        inner.sender = None;
        inner.state.status = NodeStatus::Disconnected;
        inner.state.session_id = None;

        if let Some(session) = inner.session.take() {
            session.abort();
        }

        if let Some(timer) = inner.reconnect.take() {
            timer.abort();
        }
    }
}

/// Marks the node connected and restarts the players bound to it.
pub(crate) async fn handle_open(shared: &Shared, node: &Node) {
    {
        let mut inner = node.inner.lock();

        if let Some(timer) = inner.reconnect.take() {
            timer.abort();
        }

        inner.state.status = NodeStatus::Connected;
        inner.state.attempts = 0;
    }

    info!("Connected to node {}", node.name());
    shared.emit(ManagerEvent::NodeConnect {
        node: node.name().to_owned(),
    });

    for player in shared.players() {
        let mut player = player.lock().await;

        if player.node_name() == node.name() {
            if let Err(why) = player.restart().await {
                warn!("Failed to restart player of guild {}: {}", player.guild_id, why);
            }
        }
    }
}

/// Decodes and dispatches one text frame from a node.
pub(crate) async fn handle_message(shared: &Shared, node: &Node, payload: &str) {
    let message = match serde_json::from_str::<IncomingMessage>(payload) {
        Ok(message) => message,
        Err(why) => {
            let error = protocol_error(payload, &why);
            warn!("Protocol error from node {}: {}", node.name(), error);

            shared.emit(ManagerEvent::NodeError {
                node: node.name().to_owned(),
                error: Arc::new(error),
            });

            return;
        },
    };

    match message {
        IncomingMessage::Stats(stats) => {
            node.inner.lock().state.stats = Some(stats);
        },
        IncomingMessage::PlayerUpdate(update) => {
            let player = match shared.player(update.guild_id) {
                Some(player) => player,
                None => return,
            };
            let mut player = player.lock().await;

            if player.node_name() == node.name() {
                player.apply_update(&update.state);
            }
        },
        IncomingMessage::Event(event) => {
            let guild_id = match event.guild_id() {
                Some(guild_id) => guild_id,
                None => {
                    debug!("Ignoring unknown event from node {}: {}", node.name(), payload);

                    return;
                },
            };
            let player = match shared.player(guild_id) {
                Some(player) => player,
                None => return,
            };
            let mut player = player.lock().await;

            if player.node_name() != node.name() {
                debug!("Ignoring event for guild {} from previous node {}", guild_id, node.name());

                return;
            }

            if let Err(why) = player.handle_event(event).await {
                warn!("Failed to handle event for guild {}: {}", guild_id, why);
            }
        },
        IncomingMessage::Ready(ready) => {
            info!("Node {} is ready (session {}, resumed: {})", node.name(), ready.session_id, ready.resumed);

            {
                let mut inner = node.inner.lock();
                inner.state.session_id = Some(ready.session_id.clone());
                inner.state.resumed = ready.resumed;
            }

            node.rest.set_session_id(Some(ready.session_id));

            if let Some(key) = shared.options.resume_key() {
                node.rest.update_session(UpdateSession {
                    resuming_key: Some(key.to_owned()),
                    timeout: shared.options.resume_timeout,
                });
            }
        },
    }
}

fn protocol_error(payload: &str, why: &serde_json::Error) -> Error {
    let op = serde_json::from_str::<Value>(payload)
        .ok()
        .and_then(|json| json.get("op").and_then(Value::as_str).map(str::to_owned));

    match op {
        Some(ref op) if IncomingMessage::OPS.contains(&op.as_str()) => Error::MalformedPayload {
            reason: why.to_string(),
            payload: payload.to_owned(),
        },
        op => Error::UnexpectedOp {
            payload: payload.to_owned(),
            op,
        },
    }
}
