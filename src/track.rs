use serde::Deserialize;
use crate::model::{LoadType, TrackData, UserId};
use crate::rest::Rest;
use crate::{Error, Result};

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackInfo {
    pub identifier: String,
    pub is_seekable: bool,
    pub author: String,
    /// Duration in milliseconds.
    pub length: u64,
    pub is_stream: bool,
    pub position: u64,
    pub title: String,
    pub uri: Option<String>,
    pub source_name: Option<String>,
}

/// A playable item: the node's opaque encoded payload plus metadata.
///
/// A track without an encoded payload is unresolved; it is looked up on the
/// node the first time it is played.
#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    pub encoded: Option<String>,
    pub info: TrackInfo,
    pub requester: Option<UserId>,
}

impl Track {
    pub fn new(encoded: impl Into<String>, info: TrackInfo, requester: Option<UserId>) -> Self {
        Self {
            encoded: Some(encoded.into()),
            info,
            requester,
        }
    }

    /// Creates a track that only carries metadata, to be resolved on play.
    pub fn unresolved(info: TrackInfo, requester: Option<UserId>) -> Self {
        Self {
            encoded: None,
            info,
            requester,
        }
    }

    pub fn from_data(data: TrackData, requester: Option<UserId>) -> Self {
        Self::new(data.encoded, data.info, requester)
    }

    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.encoded.is_some()
    }

    #[inline]
    pub fn length(&self) -> u64 {
        self.info.length
    }

    /// The identifier used to look this track up on a node.
    pub fn search_query(&self, default_search: &str) -> String {
        match self.info.uri {
            Some(ref uri) if !uri.is_empty() => uri.clone(),
            _ => format!("{}:{} - {}", default_search, self.info.author, self.info.title),
        }
    }

    /// Fills in the encoded payload using the first result of a node lookup.
    ///
    /// The requester is preserved; metadata is replaced by the node's.
    pub async fn resolve(&mut self, rest: &dyn Rest, default_search: &str) -> Result<()> {
        if self.is_resolved() {
            return Ok(());
        }

        let query = self.search_query(default_search);
        let result = rest.load_tracks(&query).await?;

        if result.load_type == LoadType::LoadFailed {
            let message = result
                .exception
                .and_then(|e| e.message)
                .unwrap_or_else(|| "unknown error".to_owned());

            return Err(Error::LoadFailed(message));
        }

        let data = result.tracks.into_iter().next().ok_or(Error::TrackNotFound(query))?;

        self.encoded = Some(data.encoded);
        self.info = data.info;

        Ok(())
    }
}
