use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use super::{Node, NodeConfig};
use crate::event_handler::{EventHandler, ManagerEvent};
use crate::model::{
    GuildId,
    LoadType,
    PlaylistInfo,
    UserId,
    VoiceServerEvent,
    VoiceStateEvent,
    VoiceStateUpdate,
};
use crate::player::{AudioPlayer, AudioPlayerManager, PlayerOptions, PlayerRef};
use crate::rest::{HttpRest, Rest};
use crate::track::Track;
use crate::{Error, Result};

/// Options shared by every node and player of a manager.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ManagerOptions {
    /// Delay before each reconnect attempt, in milliseconds.
    pub reconnect_timeout: u64,
    /// Connection attempts allowed before a node is given up on.
    pub reconnect_tries: u32,
    pub resume_status: bool,
    pub resume_key: Option<String>,
    /// How long the node keeps a disconnected session, in seconds.
    pub resume_timeout: u64,
    pub client_name: String,
    pub default_search: String,
    pub max_volume: u16,
    pub shards: u64,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            reconnect_timeout: 10_000,
            reconnect_tries: 3,
            resume_status: false,
            resume_key: None,
            resume_timeout: 60,
            client_name: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_owned(),
            default_search: "ytsearch".to_owned(),
            max_volume: 100,
            shards: 1,
        }
    }
}

impl ManagerOptions {
    pub fn validate(&self) -> Result<()> {
        if self.reconnect_timeout == 0 {
            return Err(Error::Config("manager option \"reconnectTimeout\" must be positive".to_owned()));
        }

        if self.shards == 0 {
            return Err(Error::Config("manager option \"shards\" must be positive".to_owned()));
        }

        if self.max_volume > 1000 {
            return Err(Error::Config("manager option \"maxVolume\" must be at most 1000".to_owned()));
        }

        if self.resume_status {
            if self.resume_key.as_deref().map_or(true, str::is_empty) {
                return Err(Error::Config("manager option \"resumeKey\" is required when resuming".to_owned()));
            }

            if self.resume_timeout == 0 {
                return Err(Error::Config("manager option \"resumeTimeout\" must be positive".to_owned()));
            }
        }

        Ok(())
    }

    /// The resume key, when resuming is enabled.
    pub fn resume_key(&self) -> Option<&str> {
        if self.resume_status {
            self.resume_key.as_deref()
        } else {
            None
        }
    }
}

/// Everything the manager, its nodes and its players share. Nodes and players
/// hold it weakly.
pub(crate) struct Shared {
    pub(crate) user_id: UserId,
    pub(crate) options: ManagerOptions,
    handler: Arc<dyn EventHandler>,
    registry: Mutex<Registry>,
}

#[derive(Default)]
struct Registry {
    nodes: HashMap<String, Arc<Node>>,
    players: AudioPlayerManager,
    next_seq: u64,
}

impl Shared {
    pub(crate) fn emit(&self, event: ManagerEvent) {
        trace!("Emitting {:?}", event);

        self.handler.on_event(event);
    }

    pub(crate) fn forward(&self, guild_id: GuildId, payload: VoiceStateUpdate) {
        let shard_id = (guild_id >> 22) % self.options.shards;

        self.handler.forward(shard_id, payload);
    }

    pub(crate) fn node(&self, name: &str) -> Option<Arc<Node>> {
        self.registry.lock().nodes.get(name).cloned()
    }

    pub(crate) fn has_node(&self, name: &str) -> bool {
        self.registry.lock().nodes.contains_key(name)
    }

    pub(crate) fn remove_node(&self, name: &str) -> Option<Arc<Node>> {
        self.registry.lock().nodes.remove(name)
    }

    /// Connected nodes, least penalized first; ties go to the node registered
    /// first.
    pub(crate) fn least_used_nodes(&self) -> Vec<Arc<Node>> {
        let mut nodes = self
            .registry
            .lock()
            .nodes
            .values()
            .filter(|node| node.is_connected())
            .map(|node| (node.penalty(), Arc::clone(node)))
            .collect::<Vec<_>>();

        nodes.sort_by_key(|(penalty, node)| (*penalty, node.seq()));
        nodes.into_iter().map(|(_, node)| node).collect()
    }

    pub(crate) fn player(&self, guild_id: GuildId) -> Option<PlayerRef> {
        self.registry.lock().players.get(&guild_id).cloned()
    }

    pub(crate) fn players(&self) -> Vec<PlayerRef> {
        self.registry.lock().players.values().cloned().collect()
    }

    pub(crate) fn remove_player(&self, guild_id: GuildId) -> Option<PlayerRef> {
        self.registry.lock().players.remove(&guild_id)
    }
}

impl Drop for Shared {
    /// Stops every node task once the last manager handle is gone.
    fn drop(&mut self) {
        for node in self.registry.get_mut().nodes.values() {
            node.shutdown();
        }
    }
}

/// Tracks, loaded through [`NodeManager::resolve`].
#[derive(Clone, Debug)]
pub struct SearchResult {
    pub load_type: LoadType,
    pub playlist: Option<PlaylistInfo>,
    pub tracks: Vec<Track>,
}

/// The process-wide table of nodes and players.
///
/// Cloning yields another handle to the same tables.
#[derive(Clone)]
pub struct NodeManager {
    pub(crate) shared: Arc<Shared>,
}

impl NodeManager {
    pub fn new(user_id: UserId, options: ManagerOptions, handler: Arc<dyn EventHandler>) -> Result<Self> {
        options.validate()?;

        Ok(Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::default()),
                user_id,
                options,
                handler,
            }),
        })
    }

    #[inline]
    pub fn options(&self) -> &ManagerOptions {
        &self.shared.options
    }

    #[inline]
    pub fn user_id(&self) -> UserId {
        self.shared.user_id
    }

    /// Adds a new node to be managed and starts connecting to it, using
    /// [`HttpRest`] for its control plane.
    ///
    /// Must be called within a Tokio runtime.
    pub fn add_node(&self, config: NodeConfig) -> Result<Arc<Node>> {
        config.validate()?;
        let rest = Arc::new(HttpRest::new(&config));

        self.add_node_with_rest(config, rest)
    }

    /// Like [`add_node`], with a caller-provided REST client.
    ///
    /// [`add_node`]: #method.add_node
    pub fn add_node_with_rest(&self, config: NodeConfig, rest: Arc<dyn Rest>) -> Result<Arc<Node>> {
        let node = self.register_node(config, rest)?;

        if let Err(why) = node.connect() {
            self.shared.remove_node(node.name());

            return Err(why);
        }

        Ok(node)
    }

    pub(crate) fn register_node(&self, config: NodeConfig, rest: Arc<dyn Rest>) -> Result<Arc<Node>> {
        config.validate()?;

        let mut registry = self.shared.registry.lock();

        if registry.nodes.contains_key(&config.name) {
            return Err(Error::Config(format!("a node named {:?} already exists", config.name)));
        }

        let seq = registry.next_seq;
        registry.next_seq += 1;

        let node = Arc::new(Node::new(config, seq, rest, Arc::downgrade(&self.shared)));
        registry.nodes.insert(node.name().to_owned(), Arc::clone(&node));

        Ok(node)
    }

    pub fn get_node(&self, name: &str) -> Option<Arc<Node>> {
        self.shared.node(name)
    }

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        let mut nodes = self.shared.registry.lock().nodes.values().cloned().collect::<Vec<_>>();
        nodes.sort_by_key(|node| node.seq());

        nodes
    }

    /// Connected nodes ordered by penalty.
    pub fn least_used_nodes(&self) -> Vec<Arc<Node>> {
        self.shared.least_used_nodes()
    }

    /// Determines the best node, if any.
    pub fn best_node(&self) -> Option<Arc<Node>> {
        self.shared.least_used_nodes().into_iter().next()
    }

    /// Connected nodes serving a region, ordered by penalty.
    pub fn nodes_in_region(&self, region: &str) -> Vec<Arc<Node>> {
        self.shared
            .least_used_nodes()
            .into_iter()
            .filter(|node| node.config().has_region(region))
            .collect()
    }

    /// Creates the player of a guild.
    ///
    /// The player is bound to `options.node` if given, otherwise to the best
    /// node of `options.region`, otherwise to the best node overall.
    pub fn create_player(&self, options: PlayerOptions) -> Result<PlayerRef> {
        let node = match options.node {
            Some(ref name) => self.get_node(name).ok_or_else(|| Error::NodeNotFound(name.clone()))?,
            None => options
                .region
                .as_deref()
                .and_then(|region| self.nodes_in_region(region).into_iter().next())
                .or_else(|| self.best_node())
                .ok_or(Error::NoNodesAvailable)?,
        };

        let guild_id = options.guild_id;
        let player = AudioPlayer::new(
            Arc::downgrade(&self.shared),
            node.name().to_owned(),
            self.shared.options.max_volume,
            options,
        );
        let player = self.shared.registry.lock().players.create(player)?;

        debug!("Created player for guild {} on node {}", guild_id, node.name());
        self.shared.emit(ManagerEvent::PlayerCreate { guild_id });

        Ok(player)
    }

    pub fn get_player(&self, guild_id: GuildId) -> Option<PlayerRef> {
        self.shared.player(guild_id)
    }

    pub fn players(&self) -> Vec<PlayerRef> {
        self.shared.players()
    }

    /// Destroys the player of a guild. Returns whether one existed.
    pub async fn destroy_player(&self, guild_id: GuildId) -> Result<bool> {
        match self.get_player(guild_id) {
            Some(player) => {
                player.lock().await.destroy()?;

                Ok(true)
            },
            None => Ok(false),
        }
    }

    /// Applies a gateway VOICE_STATE_UPDATE. Updates about other users are
    /// ignored.
    pub async fn update_voice_state(&self, event: VoiceStateEvent) -> Result<()> {
        if event.user_id != self.shared.user_id {
            return Ok(());
        }

        match self.get_player(event.guild_id) {
            Some(player) => player.lock().await.update_voice_state(&event),
            None => {
                trace!("No player for voice state update in guild {}", event.guild_id);

                Ok(())
            },
        }
    }

    /// Applies a gateway VOICE_SERVER_UPDATE.
    pub async fn update_voice_server(&self, event: VoiceServerEvent) -> Result<()> {
        match self.get_player(event.guild_id) {
            Some(player) => player.lock().await.update_voice_server(&event),
            None => {
                trace!("No player for voice server update in guild {}", event.guild_id);

                Ok(())
            },
        }
    }

    /// Routes a raw gateway dispatch. Dispatches other than the two voice
    /// updates are ignored.
    pub async fn update_voice(&self, packet: &Value) -> Result<()> {
        let data = match packet.get("d") {
            Some(data) => data.clone(),
            None => return Ok(()),
        };

        match packet.get("t").and_then(Value::as_str) {
            Some("VOICE_STATE_UPDATE") => self.update_voice_state(serde_json::from_value(data)?).await,
            Some("VOICE_SERVER_UPDATE") => self.update_voice_server(serde_json::from_value(data)?).await,
            _ => Ok(()),
        }
    }

    /// Loads tracks on the best node.
    ///
    /// URLs are loaded as they are; anything else is searched on `source`,
    /// or the default search platform.
    pub async fn resolve(&self, query: &str, source: Option<&str>, requester: Option<UserId>) -> Result<SearchResult> {
        let node = self.best_node().ok_or(Error::NoNodesAvailable)?;
        let identifier = if query.starts_with("http://") || query.starts_with("https://") {
            query.to_owned()
        } else {
            format!("{}:{}", source.unwrap_or(&self.shared.options.default_search), query)
        };

        let result = node.rest().load_tracks(&identifier).await?;

        if result.load_type == LoadType::LoadFailed {
            let message = result
                .exception
                .and_then(|e| e.message)
                .unwrap_or_else(|| "unknown error".to_owned());

            return Err(Error::LoadFailed(message));
        }

        Ok(SearchResult {
            load_type: result.load_type,
            playlist: result.playlist_info,
            tracks: result
                .tracks
                .into_iter()
                .map(|data| Track::from_data(data, requester))
                .collect(),
        })
    }

    /// Disconnects a node by name, moving its players elsewhere first.
    ///
    /// Returns `false` if the node is not recognized.
    pub async fn disconnect_node(&self, name: &str) -> bool {
        match self.get_node(name) {
            Some(node) => {
                node.disconnect().await;

                true
            },
            None => false,
        }
    }

    /// Disconnects all of the nodes owned by the manager, including those that
    /// are not connected, and removes them.
    pub async fn close_all(&self) {
        for node in self.nodes() {
            node.disconnect().await;
            node.shutdown();
            self.shared.remove_node(node.name());
        }
    }
}
