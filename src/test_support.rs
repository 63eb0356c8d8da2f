//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use crate::event_handler::{EventHandler, ManagerEvent};
use crate::model::{GuildId, LoadResult, LoadType, UpdatePlayer, UpdateSession, VoiceStateUpdate};
use crate::nodes::{ManagerOptions, NodeConfig, NodeManager};
use crate::rest::Rest;
use crate::track::{Track, TrackInfo};
use crate::{Error, Result};

/// Records every REST call instead of sending it.
pub struct MockRest {
    session_id: Mutex<Option<String>>,
    updates: Mutex<Vec<(GuildId, UpdatePlayer)>>,
    destroyed: Mutex<Vec<GuildId>>,
    session_updates: Mutex<Vec<UpdateSession>>,
    load_result: Mutex<LoadResult>,
    load_queries: Mutex<Vec<String>>,
}

impl MockRest {
    pub fn new() -> Self {
        Self {
            session_id: Mutex::new(None),
            updates: Mutex::new(Vec::new()),
            destroyed: Mutex::new(Vec::new()),
            session_updates: Mutex::new(Vec::new()),
            load_result: Mutex::new(LoadResult {
                load_type: LoadType::NoMatches,
                playlist_info: None,
                tracks: Vec::new(),
                exception: None,
            }),
            load_queries: Mutex::new(Vec::new()),
        }
    }

    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn set_load_result(&self, result: LoadResult) {
        *self.load_result.lock() = result;
    }

    pub fn load_queries(&self) -> Vec<String> {
        self.load_queries.lock().clone()
    }

    pub fn updates(&self) -> Vec<(GuildId, UpdatePlayer)> {
        self.updates.lock().clone()
    }

    pub fn destroyed(&self) -> Vec<GuildId> {
        self.destroyed.lock().clone()
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    pub fn session_updates(&self) -> Vec<UpdateSession> {
        self.session_updates.lock().clone()
    }
}

#[async_trait]
impl Rest for MockRest {
    fn set_session_id(&self, session_id: Option<String>) {
        *self.session_id.lock() = session_id;
    }

    fn update_player(&self, guild_id: GuildId, update: UpdatePlayer) {
        self.updates.lock().push((guild_id, update));
    }

    fn destroy_player(&self, guild_id: GuildId) {
        self.destroyed.lock().push(guild_id);
    }

    fn update_session(&self, update: UpdateSession) {
        self.session_updates.lock().push(update);
    }

    async fn load_tracks(&self, identifier: &str) -> Result<LoadResult> {
        self.load_queries.lock().push(identifier.to_owned());

        Ok(self.load_result.lock().clone())
    }
}

#[derive(Clone, Debug)]
pub enum Record {
    Forward(u64, VoiceStateUpdate),
    Event(ManagerEvent),
}

/// Keeps every forwarded payload and event, in order.
#[derive(Default)]
pub struct RecordingHandler {
    records: Mutex<Vec<Record>>,
}

impl RecordingHandler {
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().clone()
    }

    pub fn events(&self) -> Vec<ManagerEvent> {
        self.records()
            .into_iter()
            .filter_map(|record| match record {
                Record::Event(event) => Some(event),
                Record::Forward(..) => None,
            })
            .collect()
    }

    pub fn node_errors(&self) -> Vec<Arc<Error>> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ManagerEvent::NodeError { error, .. } => Some(error),
                _ => None,
            })
            .collect()
    }
}

impl EventHandler for RecordingHandler {
    fn forward(&self, shard_id: u64, payload: VoiceStateUpdate) {
        self.records.lock().push(Record::Forward(shard_id, payload));
    }

    fn on_event(&self, event: ManagerEvent) {
        self.records.lock().push(Record::Event(event));
    }
}

/// A manager for user 1 with default options.
pub fn manager() -> (NodeManager, Arc<RecordingHandler>) {
    let handler = RecordingHandler::new_arc();
    let manager = NodeManager::new(1, ManagerOptions::default(), handler.clone()).unwrap();

    (manager, handler)
}

pub fn node_config(name: &str) -> NodeConfig {
    NodeConfig::new(name, "localhost", 2333, "youshallnotpass")
}

/// A resolved track whose encoded payload is its identifier.
pub fn track(identifier: &str, length: u64) -> Track {
    let info = TrackInfo {
        identifier: identifier.to_owned(),
        title: identifier.to_owned(),
        length,
        ..TrackInfo::default()
    };

    Track::new(identifier.to_owned(), info, None)
}
