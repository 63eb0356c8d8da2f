use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use lavalink_automata::model::{GuildId, LoadResult, LoadType, UpdatePlayer, UpdateSession, VoiceStateUpdate};
use lavalink_automata::rest::Rest;
use lavalink_automata::{EventHandler, ManagerEvent, ManagerOptions, NodeConfig, NodeManager, NodeStatus, Result};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

#[derive(Default)]
struct Events(Mutex<Vec<ManagerEvent>>);

impl EventHandler for Events {
    fn forward(&self, _shard_id: u64, _payload: VoiceStateUpdate) {}

    fn on_event(&self, event: ManagerEvent) {
        self.0.lock().push(event);
    }
}

impl Events {
    async fn wait_for(&self, matches: impl Fn(&ManagerEvent) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !self.0.lock().iter().any(&matches) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("event was not emitted in time");
    }
}

#[derive(Default)]
struct Sessions(Mutex<Vec<Option<String>>>);

#[async_trait]
impl Rest for Sessions {
    fn set_session_id(&self, session_id: Option<String>) {
        self.0.lock().push(session_id);
    }

    fn update_player(&self, _guild_id: GuildId, _update: UpdatePlayer) {}

    fn destroy_player(&self, _guild_id: GuildId) {}

    fn update_session(&self, _update: UpdateSession) {}

    async fn load_tracks(&self, _identifier: &str) -> Result<LoadResult> {
        Ok(LoadResult {
            load_type: LoadType::NoMatches,
            playlist_info: None,
            tracks: Vec::new(),
            exception: None,
        })
    }
}

#[tokio::test]
async fn handshake_ready_and_outgoing_frames() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (headers_tx, headers_rx) = oneshot::channel();
    let (received_tx, received_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let header = |name: &str| {
                request
                    .headers()
                    .get(name)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_owned)
            };
            let _ = headers_tx.send((header("Authorization"), header("User-Id"), header("Client-Name")));

            Ok(response)
        })
        .await
        .unwrap();

        let ready = json!({ "op": "ready", "resumed": false, "sessionId": "integration" });
        ws.send(Message::Text(ready.to_string())).await.unwrap();

        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                let _ = received_tx.send(text);
                break;
            }
        }

        ws.close(None).await.ok();
    });

    let events = Arc::new(Events::default());
    let sessions = Arc::new(Sessions::default());
    let options = ManagerOptions {
        client_name: "integration/1.0".to_owned(),
        reconnect_timeout: 60_000,
        ..ManagerOptions::default()
    };
    let manager = NodeManager::new(42, options, events.clone()).unwrap();
    let config = NodeConfig::new("local", "127.0.0.1", port, "secret");

    let node = manager.add_node_with_rest(config, sessions.clone()).unwrap();

    let (authorization, user_id, client_name) = headers_rx.await.unwrap();
    assert_eq!(authorization.as_deref(), Some("secret"));
    assert_eq!(user_id.as_deref(), Some("42"));
    assert_eq!(client_name.as_deref(), Some("integration/1.0"));

    events.wait_for(|e| matches!(e, ManagerEvent::NodeConnect { node } if node == "local")).await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while node.session_id().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(node.status(), NodeStatus::Connected);
    assert_eq!(sessions.0.lock().last().cloned().flatten().as_deref(), Some("integration"));

    node.send(&json!({ "op": "ping" })).unwrap();
    let received: serde_json::Value = serde_json::from_str(&received_rx.await.unwrap()).unwrap();
    assert_eq!(received, json!({ "op": "ping" }));

    events.wait_for(|e| matches!(e, ManagerEvent::NodeDisconnect { .. })).await;

    manager.close_all().await;
}

#[tokio::test]
async fn unknown_ops_do_not_close_the_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (done_tx, done_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        ws.send(Message::Text(r#"{"op":"mystery"}"#.to_owned())).await.unwrap();
        ws.send(Message::Text(r#"{"op":"ready","sessionId":"s"}"#.to_owned())).await.unwrap();

        let _ = done_rx.await;
    });

    let events = Arc::new(Events::default());
    let manager = NodeManager::new(1, ManagerOptions::default(), events.clone()).unwrap();
    let node = manager
        .add_node_with_rest(NodeConfig::new("local", "127.0.0.1", port, "pw"), Arc::new(Sessions::default()))
        .unwrap();

    events.wait_for(|e| matches!(e, ManagerEvent::NodeError { .. })).await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while node.session_id().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert!(node.is_connected());

    manager.close_all().await;
    assert!(manager.nodes().is_empty());
    let _ = done_tx.send(());
}
