use std::sync::Arc;
use crate::model::{Exception, GuildId, TrackEndReason, VoiceStateUpdate};
use crate::track::Track;
use crate::Error;

/// Lifecycle notifications emitted by the manager, its nodes and players.
#[derive(Clone, Debug)]
pub enum ManagerEvent {
    NodeConnect { node: String },
    NodeDisconnect { node: String, code: Option<u16>, reason: String },
    NodeReconnect { node: String, attempt: u32 },
    /// Protocol and transport errors. A [`Error::ReconnectExhausted`] here is
    /// terminal: the node is not retried again.
    NodeError { node: String, error: Arc<Error> },
    PlayerCreate { guild_id: GuildId },
    PlayerDestroy { guild_id: GuildId },
    PlayerMove { guild_id: GuildId, from: String, to: String },
    TrackStart { guild_id: GuildId, track: Option<Track> },
    TrackEnd { guild_id: GuildId, track: Option<Track>, reason: TrackEndReason },
    QueueEnd { guild_id: GuildId },
    TrackError { guild_id: GuildId, track: Option<Track>, error: TrackError },
    SocketClosed { guild_id: GuildId, track: Option<Track>, code: u16, reason: String, by_remote: bool },
}

#[derive(Clone, Debug, PartialEq)]
pub enum TrackError {
    Stuck { threshold_ms: u64 },
    Exception(Exception),
    /// The track could not be looked up before playing.
    Resolve(String),
}

pub trait EventHandler: Send + Sync {
    /// Sends a voice state update through the gateway shard of a guild.
    fn forward(&self, shard_id: u64, payload: VoiceStateUpdate);

    /// Called for every notification. Does nothing by default.
    fn on_event(&self, _event: ManagerEvent) {}
}
