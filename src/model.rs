//! Wire types exchanged with Lavalink nodes and the Discord gateway.
//!
//! Snowflake ids are kept as `u64` and travel as strings, the way both the
//! node protocol and the gateway encode them.

use serde::{Deserialize, Serialize};
use crate::track::TrackInfo;

pub type GuildId = u64;
pub type ChannelId = u64;
pub type UserId = u64;

/// Messages pushed by a node over its WebSocket, tagged by `op`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum IncomingMessage {
    Ready(Ready),
    Stats(RemoteStats),
    PlayerUpdate(PlayerUpdate),
    Event(PlayerEvent),
}

impl IncomingMessage {
    /// The ops this client understands.
    pub const OPS: &'static [&'static str] = &["ready", "stats", "playerUpdate", "event"];
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ready {
    #[serde(default)]
    pub resumed: bool,
    pub session_id: String,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RemoteStats {
    pub players: u64,
    pub playing_players: u64,
    pub uptime: u64,
    pub memory: Memory,
    pub cpu: Cpu,
    pub frame_stats: Option<FrameStats>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Memory {
    pub free: u64,
    pub used: u64,
    pub allocated: u64,
    pub reservable: u64,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Cpu {
    pub cores: u32,
    pub system_load: f64,
    pub lavalink_load: f64,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct FrameStats {
    pub sent: i64,
    pub nulled: i64,
    pub deficit: i64,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    #[serde(with = "snowflake")]
    pub guild_id: GuildId,
    pub state: PlayerState,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlayerState {
    pub time: u64,
    pub position: u64,
    pub connected: bool,
    pub ping: i64,
}

/// Playback events for one guild, tagged by `type`.
///
/// Unknown event types decode to [`PlayerEvent::Unknown`] so newer nodes do
/// not break older clients.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    TrackStartEvent(TrackStart),
    TrackEndEvent(TrackEnd),
    TrackExceptionEvent(TrackException),
    TrackStuckEvent(TrackStuck),
    WebSocketClosedEvent(WebSocketClosed),
    #[serde(other)]
    Unknown,
}

impl PlayerEvent {
    pub fn guild_id(&self) -> Option<GuildId> {
        match self {
            PlayerEvent::TrackStartEvent(e) => Some(e.guild_id),
            PlayerEvent::TrackEndEvent(e) => Some(e.guild_id),
            PlayerEvent::TrackExceptionEvent(e) => Some(e.guild_id),
            PlayerEvent::TrackStuckEvent(e) => Some(e.guild_id),
            PlayerEvent::WebSocketClosedEvent(e) => Some(e.guild_id),
            PlayerEvent::Unknown => None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackStart {
    #[serde(with = "snowflake")]
    pub guild_id: GuildId,
    #[serde(default)]
    pub encoded_track: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackEnd {
    #[serde(with = "snowflake")]
    pub guild_id: GuildId,
    #[serde(default)]
    pub encoded_track: Option<String>,
    #[serde(default)]
    pub reason: TrackEndReason,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackEndReason {
    #[default]
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackException {
    #[serde(with = "snowflake")]
    pub guild_id: GuildId,
    #[serde(default)]
    pub encoded_track: Option<String>,
    pub exception: Exception,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Exception {
    pub message: Option<String>,
    pub severity: String,
    pub cause: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackStuck {
    #[serde(with = "snowflake")]
    pub guild_id: GuildId,
    #[serde(default)]
    pub encoded_track: Option<String>,
    #[serde(default)]
    pub threshold_ms: u64,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketClosed {
    #[serde(with = "snowflake")]
    pub guild_id: GuildId,
    pub code: u16,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub by_remote: bool,
}

impl WebSocketClosed {
    /// Discord voice close codes after which the voice session has to be
    /// identified again.
    pub fn requires_rejoin(&self) -> bool {
        matches!(self.code, 4009 | 4015)
    }
}

/// Body of a player PATCH request. `None` fields are left untouched by the
/// node; `encoded_track: Some(None)` clears the current track.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoded_track: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceState>,
}

impl UpdatePlayer {
    pub fn track(encoded: impl Into<String>) -> Self {
        Self {
            encoded_track: Some(Some(encoded.into())),
            ..Self::default()
        }
    }

    pub fn clear_track() -> Self {
        Self {
            encoded_track: Some(None),
            ..Self::default()
        }
    }

    pub fn position(position: u64) -> Self {
        Self {
            position: Some(position),
            ..Self::default()
        }
    }

    pub fn volume(volume: u16) -> Self {
        Self {
            volume: Some(volume),
            ..Self::default()
        }
    }

    pub fn paused(paused: bool) -> Self {
        Self {
            paused: Some(paused),
            ..Self::default()
        }
    }

    pub fn voice(voice: VoiceState) -> Self {
        Self {
            voice: Some(voice),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceState {
    pub token: String,
    pub endpoint: String,
    pub session_id: String,
}

/// Body of the session PATCH enabling resuming.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSession {
    pub resuming_key: Option<String>,
    pub timeout: u64,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadResult {
    pub load_type: LoadType,
    #[serde(default)]
    pub playlist_info: Option<PlaylistInfo>,
    #[serde(default)]
    pub tracks: Vec<TrackData>,
    #[serde(default)]
    pub exception: Option<Exception>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadType {
    TrackLoaded,
    PlaylistLoaded,
    SearchResult,
    NoMatches,
    LoadFailed,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct PlaylistInfo {
    pub name: Option<String>,
    pub selected_track: i64,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct TrackData {
    pub encoded: String,
    pub info: TrackInfo,
}

/// Gateway op 4, asking Discord to move the bot into (or out of) a voice
/// channel.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VoiceStateUpdate {
    pub op: u8,
    pub d: VoiceStateUpdateData,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VoiceStateUpdateData {
    #[serde(with = "snowflake")]
    pub guild_id: GuildId,
    #[serde(with = "snowflake::option")]
    pub channel_id: Option<ChannelId>,
    pub self_deaf: bool,
    pub self_mute: bool,
}

impl VoiceStateUpdate {
    pub fn new(guild_id: GuildId, channel_id: Option<ChannelId>, self_deaf: bool, self_mute: bool) -> Self {
        Self {
            op: 4,
            d: VoiceStateUpdateData {
                guild_id,
                channel_id,
                self_deaf,
                self_mute,
            },
        }
    }
}

/// `d` of a gateway VOICE_STATE_UPDATE dispatch.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct VoiceStateEvent {
    #[serde(with = "snowflake")]
    pub guild_id: GuildId,
    #[serde(default, with = "snowflake::option")]
    pub channel_id: Option<ChannelId>,
    #[serde(with = "snowflake")]
    pub user_id: UserId,
    pub session_id: String,
    #[serde(default)]
    pub self_deaf: bool,
    #[serde(default)]
    pub self_mute: bool,
}

/// `d` of a gateway VOICE_SERVER_UPDATE dispatch.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct VoiceServerEvent {
    #[serde(with = "snowflake")]
    pub guild_id: GuildId,
    pub token: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

pub(crate) mod snowflake {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(id: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(id)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        deserializer.deserialize_any(SnowflakeVisitor)
    }

    struct SnowflakeVisitor;

    impl<'de> Visitor<'de> for SnowflakeVisitor {
        type Value = u64;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a snowflake as a string or integer")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<u64, E> {
            Ok(value)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<u64, E> {
            u64::try_from(value).map_err(|_| E::custom("negative snowflake"))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<u64, E> {
            value.parse().map_err(E::custom)
        }
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(id: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
            match id {
                Some(id) => serializer.collect_str(id),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
            #[derive(Deserialize)]
            struct Wrapper(#[serde(with = "super")] u64);

            Option::<Wrapper>::deserialize(deserializer).map(|wrapped| wrapped.map(|Wrapper(id)| id))
        }
    }
}
