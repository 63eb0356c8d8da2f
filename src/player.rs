//! Module containing structs for tracking and controlling the audio player of
//! each guild.

use serde_json::Value;
use std::collections::hash_map::{HashMap, Values};
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex as AsyncMutex;
use crate::event_handler::{ManagerEvent, TrackError};
use crate::model::{
    ChannelId,
    GuildId,
    PlayerEvent,
    PlayerState,
    TrackEndReason,
    UpdatePlayer,
    VoiceServerEvent,
    VoiceStateEvent,
    VoiceStateUpdate,
};
use crate::nodes::{Node, Shared};
use crate::queue::Queue;
use crate::voice::VoiceConnection;
use crate::{Error, Result};

/// A shared handle to a guild's player. Holding the lock serializes every
/// command and node event for that guild.
pub type PlayerRef = Arc<AsyncMutex<AudioPlayer>>;

/// A light wrapper around a hashmap keyed by guild IDs with audio players.
#[derive(Default)]
pub struct AudioPlayerManager {
    players: HashMap<GuildId, PlayerRef>,
}

impl AudioPlayerManager {
    /// Creates a new default `AudioPlayerManager`.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an audio player for its guild.
    ///
    /// It may be preferable to use [`NodeManager::create_player`].
    ///
    /// [`NodeManager::create_player`]: ../nodes/struct.NodeManager.html#method.create_player
    pub fn create(&mut self, player: AudioPlayer) -> Result<PlayerRef> {
        if self.players.contains_key(&player.guild_id) {
            return Err(Error::PlayerAlreadyExists(player.guild_id));
        }

        let guild_id = player.guild_id;
        let player = Arc::new(AsyncMutex::new(player));
        self.players.insert(guild_id, Arc::clone(&player));

        Ok(player)
    }

    /// Retrieves the audio player for the guild, if it exists.
    pub fn get(&self, guild_id: &GuildId) -> Option<&PlayerRef> {
        self.players.get(guild_id)
    }

    /// Whether the manager contains a player for the given guild.
    pub fn has(&self, guild_id: &GuildId) -> bool {
        self.players.contains_key(guild_id)
    }

    pub fn remove(&mut self, guild_id: &GuildId) -> Option<PlayerRef> {
        self.players.remove(guild_id)
    }

    pub fn values(&self) -> Values<'_, GuildId, PlayerRef> {
        self.players.values()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum LoopMode {
    #[default]
    None,
    Track,
    Queue,
}

impl FromStr for LoopMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NONE" => Ok(LoopMode::None),
            "TRACK" => Ok(LoopMode::Track),
            "QUEUE" => Ok(LoopMode::Queue),
            other => Err(Error::InvalidLoopMode(other.to_owned())),
        }
    }
}

impl Display for LoopMode {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.write_str(match self {
            LoopMode::None => "NONE",
            LoopMode::Track => "TRACK",
            LoopMode::Queue => "QUEUE",
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct PlayerOptions {
    pub guild_id: GuildId,
    pub voice_channel: Option<ChannelId>,
    pub text_channel: Option<ChannelId>,
    pub mute: bool,
    pub deaf: bool,
    /// Binds the player to this node instead of the least used one.
    pub node: Option<String>,
    /// Prefers nodes serving this voice region.
    pub region: Option<String>,
}

impl PlayerOptions {
    pub fn new(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            ..Self::default()
        }
    }
}

/// A struct containing the state of a guild's audio player.
pub struct AudioPlayer {
    /// The ID of the guild that the player represents.
    pub guild_id: GuildId,
    pub queue: Queue,
    pub voice_channel: Option<ChannelId>,
    pub text_channel: Option<ChannelId>,
    pub connection: VoiceConnection,
    /// Whether the node reports the voice connection as established.
    pub is_connected: bool,
    pub is_playing: bool,
    pub is_paused: bool,
    pub loop_mode: LoopMode,
    /// The estimated position of the player, in milliseconds.
    pub position: u64,
    pub ping: i64,
    /// Node time of the last position update.
    pub timestamp: Option<u64>,
    pub mute: bool,
    pub deaf: bool,
    pub volume: u16,
    max_volume: u16,
    data: HashMap<String, Value>,
    node: String,
    destroyed: bool,
    manager: Weak<Shared>,
}

impl Debug for AudioPlayer {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.debug_struct("AudioPlayer")
            .field("guild_id", &self.guild_id)
            .field("node", &self.node)
            .field("queue", &self.queue)
            .field("voice_channel", &self.voice_channel)
            .field("text_channel", &self.text_channel)
            .field("is_connected", &self.is_connected)
            .field("is_playing", &self.is_playing)
            .field("is_paused", &self.is_paused)
            .field("loop_mode", &self.loop_mode)
            .field("position", &self.position)
            .field("volume", &self.volume)
            .field("destroyed", &self.destroyed)
            .finish_non_exhaustive()
    }
}

impl AudioPlayer {
    /// Using [`NodeManager::create_player`] is the way of creating a player.
    ///
    /// [`NodeManager::create_player`]: ../nodes/struct.NodeManager.html#method.create_player
    pub(crate) fn new(manager: Weak<Shared>, node: String, max_volume: u16, options: PlayerOptions) -> Self {
        Self {
            guild_id: options.guild_id,
            queue: Queue::new(),
            voice_channel: options.voice_channel,
            text_channel: options.text_channel,
            connection: VoiceConnection::new(),
            is_connected: false,
            is_playing: false,
            is_paused: false,
            loop_mode: LoopMode::None,
            position: 0,
            ping: 0,
            timestamp: None,
            mute: options.mute,
            deaf: options.deaf,
            volume: 100.min(max_volume),
            data: HashMap::new(),
            max_volume,
            node,
            destroyed: false,
            manager,
        }
    }

    /// Name of the node the player is bound to.
    #[inline]
    pub fn node_name(&self) -> &str {
        &self.node
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    fn shared(&self) -> Result<Arc<Shared>> {
        if self.destroyed {
            return Err(Error::PlayerDestroyed(self.guild_id));
        }

        self.manager.upgrade().ok_or(Error::ManagerDropped)
    }

    /// The node the player is bound to.
    pub fn node(&self) -> Result<Arc<Node>> {
        self.shared()?
            .node(&self.node)
            .ok_or_else(|| Error::NodeNotFound(self.node.clone()))
    }

    fn dispatch(&self, update: UpdatePlayer) -> Result<()> {
        self.node()?.rest().update_player(self.guild_id, update);

        Ok(())
    }

    fn emit(&self, event: ManagerEvent) {
        if let Some(shared) = self.manager.upgrade() {
            shared.emit(event);
        }
    }

    fn send_voice_state(&self, channel_id: Option<ChannelId>) -> Result<()> {
        let payload = VoiceStateUpdate::new(self.guild_id, channel_id, self.deaf, self.mute);
        self.shared()?.forward(self.guild_id, payload);

        Ok(())
    }

    /// Plays the next track of the queue. Does nothing if the queue is empty.
    ///
    /// An unresolved track is looked up on the node first.
    pub async fn play(&mut self) -> Result<()> {
        if self.queue.is_empty() {
            return Ok(());
        }

        let node = self.node()?;
        let mut track = match self.queue.shift() {
            Some(track) => track,
            None => return Ok(()),
        };

        if !track.is_resolved() {
            let default_search = self.shared()?.options.default_search.clone();

            if let Err(why) = track.resolve(node.rest().as_ref(), &default_search).await {
                warn!("Failed to resolve track for guild {}: {}", self.guild_id, why);

                self.is_playing = false;
                self.queue.current = None;
                self.emit(ManagerEvent::TrackError {
                    guild_id: self.guild_id,
                    track: Some(track),
                    error: TrackError::Resolve(why.to_string()),
                });

                return Err(why);
            }
        }

        let encoded = match track.encoded.clone() {
            Some(encoded) => encoded,
            None => return Err(Error::TrackNotFound(track.info.title)),
        };

        self.position = 0;
        self.is_playing = true;
        self.queue.current = Some(track);

        node.rest().update_player(self.guild_id, UpdatePlayer::track(encoded));

        Ok(())
    }

    /// Replaces the current track with the next one, or stops if the queue is
    /// empty.
    pub async fn skip(&mut self) -> Result<()> {
        if self.queue.is_empty() {
            return self.stop();
        }

        self.queue.previous = self.queue.current.take();

        self.play().await
    }

    /// Stops the player. Does nothing unless playing.
    pub fn stop(&mut self) -> Result<()> {
        if !self.is_playing {
            return Ok(());
        }

        self.position = 0;
        self.is_playing = false;

        self.dispatch(UpdatePlayer::clear_track())
    }

    /// Either pauses or unpauses the player.
    pub fn pause(&mut self, pause: bool) -> Result<()> {
        self.is_playing = !pause;
        self.is_paused = pause;

        self.dispatch(UpdatePlayer::paused(pause))
    }

    /// Seeks by `delta` milliseconds, clamped to the current track. Does
    /// nothing without a current track.
    pub fn seek_to(&mut self, delta: i64) -> Result<()> {
        let length = match self.queue.current {
            Some(ref track) => track.length(),
            None => return Ok(()),
        };
        let position = (self.position as i64).saturating_add(delta).clamp(0, length as i64) as u64;

        self.dispatch(UpdatePlayer::position(position))?;
        self.position = position;

        Ok(())
    }

    /// Mutates the volume setting, on a scale of 0 to the manager's maximum.
    pub fn set_volume(&mut self, volume: i32) -> Result<()> {
        if volume < 0 || volume > i32::from(self.max_volume) {
            return Err(Error::VolumeOutOfRange {
                max: self.max_volume,
                volume,
            });
        }

        let volume = volume as u16;
        self.dispatch(UpdatePlayer::volume(volume))?;
        self.volume = volume;

        Ok(())
    }

    pub fn set_loop(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
    }

    pub fn set_text_channel(&mut self, channel_id: ChannelId) {
        self.text_channel = Some(channel_id);
    }

    /// Moves the player into another voice channel.
    pub fn set_voice_channel(&mut self, channel_id: ChannelId, mute: Option<bool>, deaf: Option<bool>) -> Result<()> {
        if self.is_connected && self.voice_channel == Some(channel_id) {
            return Err(Error::AlreadyConnected(channel_id));
        }

        self.voice_channel = Some(channel_id);
        self.mute = mute.unwrap_or(self.mute);
        self.deaf = deaf.unwrap_or(self.deaf);

        self.connect()
    }

    /// Asks the gateway to join the player's voice channel.
    pub fn connect(&mut self) -> Result<()> {
        let channel_id = self.voice_channel.ok_or(Error::NoVoiceChannel)?;

        self.send_voice_state(Some(channel_id))?;
        self.is_connected = true;

        Ok(())
    }

    /// Pauses and asks the gateway to leave the voice channel. Does nothing
    /// without a voice channel.
    pub fn disconnect(&mut self) -> Result<()> {
        if self.voice_channel.is_none() {
            return Ok(());
        }

        if let Err(why) = self.pause(true) {
            debug!("Could not pause player of guild {} while leaving: {}", self.guild_id, why);
        }

        self.is_connected = false;
        self.voice_channel = None;

        self.send_voice_state(None)
    }

    /// Leaves the voice channel, discards the player on its node and removes
    /// it from the manager. No commands are accepted afterwards.
    pub fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }

        if let Err(why) = self.disconnect() {
            debug!("Could not disconnect player of guild {}: {}", self.guild_id, why);
        }

        if let Ok(node) = self.node() {
            node.rest().destroy_player(self.guild_id);
        }

        self.destroyed = true;
        self.is_playing = false;
        self.connection.clear();

        if let Some(shared) = self.manager.upgrade() {
            shared.remove_player(self.guild_id);
            shared.emit(ManagerEvent::PlayerDestroy {
                guild_id: self.guild_id,
            });
        }

        debug!("Destroyed player of guild {}", self.guild_id);

        Ok(())
    }

    /// Re-sends the current track and position to the node, e.g. after a
    /// reconnect or a move. Without a current track, plays the queue instead.
    pub async fn restart(&mut self) -> Result<()> {
        let encoded = self.queue.current.as_ref().and_then(|track| track.encoded.clone());

        let encoded = match encoded {
            Some(encoded) => encoded,
            None => return self.play().await,
        };

        self.dispatch(UpdatePlayer {
            encoded_track: Some(Some(encoded)),
            position: Some(self.position),
            paused: if self.is_paused { Some(true) } else { None },
            voice: self.connection.voice_state(),
            ..UpdatePlayer::default()
        })
    }

    /// Moves the player to another node.
    ///
    /// Does nothing if the node does not exist or is the current one; fails if
    /// the node is not connected.
    pub async fn move_node(&mut self, name: &str) -> Result<()> {
        let shared = self.shared()?;

        let target = match shared.node(name) {
            Some(target) if target.name() != self.node => target,
            _ => return Ok(()),
        };

        if !target.is_connected() {
            return Err(Error::NodeUnavailable(name.to_owned()));
        }

        if let Some(previous) = shared.node(&self.node) {
            previous.rest().destroy_player(self.guild_id);
        }

        let from = std::mem::replace(&mut self.node, target.name().to_owned());

        info!("Moving player of guild {} from {} to {}", self.guild_id, from, self.node);
        shared.emit(ManagerEvent::PlayerMove {
            guild_id: self.guild_id,
            to: self.node.clone(),
            from,
        });

        self.restart().await
    }

    /// Moves the player to the least used node, or destroys it if its node
    /// has left the manager.
    pub async fn auto_move_node(&mut self) -> Result<()> {
        let shared = self.shared()?;

        let best = shared
            .least_used_nodes()
            .into_iter()
            .next()
            .ok_or(Error::NoNodesAvailable)?;

        if !shared.has_node(&self.node) {
            return self.destroy();
        }

        self.move_node(best.name()).await
    }

    /// Copies a node's position report.
    pub fn apply_update(&mut self, state: &PlayerState) {
        self.is_connected = state.connected;
        self.position = state.position;
        self.ping = state.ping;
        self.timestamp = Some(state.time);
    }

    pub fn update_voice_state(&mut self, event: &VoiceStateEvent) -> Result<()> {
        if event.channel_id.is_none() {
            self.is_connected = false;
            self.voice_channel = None;
            self.connection.clear();

            return Ok(());
        }

        self.voice_channel = event.channel_id;
        self.deaf = event.self_deaf;
        self.mute = event.self_mute;
        self.connection.set_state_update(event);

        self.send_voice()
    }

    pub fn update_voice_server(&mut self, event: &VoiceServerEvent) -> Result<()> {
        self.connection.set_server_update(event);

        self.send_voice()
    }

    fn send_voice(&self) -> Result<()> {
        match self.connection.voice_state() {
            Some(voice) => self.dispatch(UpdatePlayer::voice(voice)),
            None => Ok(()),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.data.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Reacts to a playback event pushed by the node.
    pub async fn handle_event(&mut self, event: PlayerEvent) -> Result<()> {
        match event {
            PlayerEvent::TrackStartEvent(_) => {
                self.is_playing = true;
                self.emit(ManagerEvent::TrackStart {
                    guild_id: self.guild_id,
                    track: self.queue.current.clone(),
                });

                Ok(())
            },
            PlayerEvent::TrackEndEvent(end) => self.handle_track_end(end.reason).await,
            PlayerEvent::TrackStuckEvent(stuck) => {
                self.emit(ManagerEvent::TrackError {
                    guild_id: self.guild_id,
                    track: self.queue.current.clone(),
                    error: TrackError::Stuck {
                        threshold_ms: stuck.threshold_ms,
                    },
                });

                self.stop()
            },
            PlayerEvent::TrackExceptionEvent(exception) => {
                self.emit(ManagerEvent::TrackError {
                    guild_id: self.guild_id,
                    track: self.queue.current.clone(),
                    error: TrackError::Exception(exception.exception),
                });

                self.stop()
            },
            PlayerEvent::WebSocketClosedEvent(closed) => {
                if closed.requires_rejoin() {
                    if let Some(channel_id) = self.voice_channel {
                        self.send_voice_state(Some(channel_id))?;
                    }
                }

                self.emit(ManagerEvent::SocketClosed {
                    guild_id: self.guild_id,
                    track: self.queue.current.clone(),
                    code: closed.code,
                    reason: closed.reason,
                    by_remote: closed.by_remote,
                });

                self.pause(true)
            },
            PlayerEvent::Unknown => Ok(()),
        }
    }

    async fn handle_track_end(&mut self, reason: TrackEndReason) -> Result<()> {
        // the track was superseded by a newer play request
        if reason == TrackEndReason::Replaced {
            return Ok(());
        }

        if self.queue.current.is_none() && self.queue.is_empty() {
            return Ok(());
        }

        self.queue.previous = self.queue.current.clone();

        match self.loop_mode {
            LoopMode::Track => {
                if let Some(previous) = self.queue.previous.clone() {
                    self.queue.unshift(previous);
                }

                self.emit_track_end(reason);

                return self.play().await;
            },
            LoopMode::Queue if self.queue.current.is_some() => {
                if let Some(previous) = self.queue.previous.clone() {
                    self.queue.push(previous);
                }

                self.emit_track_end(reason);

                return self.play().await;
            },
            _ => {},
        }

        if self.queue.is_empty() {
            self.is_playing = false;
            self.queue.current = None;
            self.emit(ManagerEvent::QueueEnd {
                guild_id: self.guild_id,
            });

            return Ok(());
        }

        self.emit_track_end(reason);

        self.play().await
    }

    fn emit_track_end(&self, reason: TrackEndReason) {
        self.emit(ManagerEvent::TrackEnd {
            guild_id: self.guild_id,
            track: self.queue.current.clone(),
            reason,
        });
    }
}
