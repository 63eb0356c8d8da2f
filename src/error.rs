use std::result::Result as StdResult;
use tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue;
use tokio_tungstenite::tungstenite::Error as WebSocketError;

/// A `Result` whose error defaults to the crate [`Error`].
pub type Result<T, E = Error> = StdResult<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid node or manager options.
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] WebSocketError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),
    /// The node sent an op code this client does not know.
    #[error("unexpected op {op:?} with data: {payload}")]
    UnexpectedOp { op: Option<String>, payload: String },
    /// A known op code whose body could not be decoded.
    #[error("malformed payload ({reason}): {payload}")]
    MalformedPayload { reason: String, payload: String },
    #[error("node socket is not connected")]
    NotConnected,
    #[error("node {0:?} does not exist")]
    NodeNotFound(String),
    #[error("node {0:?} is not available")]
    NodeUnavailable(String),
    #[error("there aren't any available nodes")]
    NoNodesAvailable,
    #[error("volume {volume} must be between 0 and {max}")]
    VolumeOutOfRange { volume: i32, max: u16 },
    #[error("loop mode {0:?} is not one of NONE, TRACK or QUEUE")]
    InvalidLoopMode(String),
    #[error("a player already exists for guild {0}")]
    PlayerAlreadyExists(u64),
    #[error("the player for guild {0} was destroyed")]
    PlayerDestroyed(u64),
    #[error("player is already connected to channel {0}")]
    AlreadyConnected(u64),
    #[error("player has no voice channel")]
    NoVoiceChannel,
    #[error("no track found for {0:?}")]
    TrackNotFound(String),
    #[error("loading tracks failed: {0}")]
    LoadFailed(String),
    #[error("node {node:?} gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { node: String, attempts: u32 },
    #[error("the node manager has been dropped")]
    ManagerDropped,
}
