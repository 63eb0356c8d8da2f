//! A client for Lavalink audio nodes.
//!
//! A [`NodeManager`] keeps a socket open to every registered node, picks the
//! least loaded node for new guild players and moves players when a node goes
//! away. Gateway voice dispatches are fed in through
//! [`NodeManager::update_voice`]; voice state updates for the gateway come out
//! through [`EventHandler::forward`].

#[macro_use] extern crate log;

pub mod model;
pub mod nodes;
pub mod player;
pub mod queue;
pub mod rest;
pub mod track;
pub mod voice;

mod error;
mod event_handler;

#[cfg(test)]
mod test_support;

pub use self::error::{Error, Result};
pub use self::event_handler::{EventHandler, ManagerEvent, TrackError};
pub use self::nodes::{ManagerOptions, Node, NodeConfig, NodeManager, NodeStatus, SearchResult};
pub use self::player::{AudioPlayer, LoopMode, PlayerOptions, PlayerRef};
pub use self::track::{Track, TrackInfo};
