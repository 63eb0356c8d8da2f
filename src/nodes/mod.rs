mod node;
mod node_manager;

pub use self::node::Node;
pub use self::node_manager::{ManagerOptions, NodeManager, SearchResult};

#[cfg(test)]
pub(crate) use self::node::{handle_message, handle_open};
pub(crate) use self::node_manager::Shared;

use serde::Deserialize;
use crate::model::RemoteStats;
use crate::{Error, Result};

/// Identity and address of one Lavalink node.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct NodeConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub password: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub regions: Vec<String>,
}

impl NodeConfig {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            password: password.into(),
            secure: false,
            regions: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("node option \"host\" must be a non-empty string".to_owned()));
        }

        if self.port == 0 {
            return Err(Error::Config("node option \"port\" must be a valid port".to_owned()));
        }

        if self.password.is_empty() {
            return Err(Error::Config("node option \"password\" must be a non-empty string".to_owned()));
        }

        if self.name.trim().is_empty() {
            return Err(Error::Config("node option \"name\" must be a non-empty string".to_owned()));
        }

        Ok(())
    }

    pub fn rest_url(&self) -> String {
        format!("http{}://{}:{}", if self.secure { "s" } else { "" }, self.host, self.port)
    }

    pub fn socket_url(&self) -> String {
        format!("{}://{}:{}/", if self.secure { "wss" } else { "ws" }, self.host, self.port)
    }

    pub fn has_region(&self, region: &str) -> bool {
        self.regions.iter().any(|r| r.eq_ignore_ascii_case(region))
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum NodeStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Health of a node as last reported on its socket.
#[derive(Clone, Debug, Default)]
pub struct State {
    pub status: NodeStatus,
    /// Valid only while `status` is [`NodeStatus::Connected`].
    pub session_id: Option<String>,
    pub resumed: bool,
    pub stats: Option<RemoteStats>,
    /// Connection attempts since the last successful open.
    pub attempts: u32,
}

impl State {
    /// The node-selection score; lower is better. Always 0 when disconnected.
    pub fn penalty(&self) -> i64 {
        if self.status != NodeStatus::Connected {
            return 0;
        }

        let stats = match self.stats {
            Some(ref stats) => stats,
            None => return 0,
        };
        let cpu = (1.05f64.powf(100.0 * stats.cpu.system_load) * 10.0 - 10.0).round() as i64;
        let (deficit, nulled) = stats
            .frame_stats
            .as_ref()
            .map_or((0, 0), |frames| (frames.deficit, frames.nulled));

        stats.players as i64 + cpu + deficit + nulled * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Cpu, FrameStats};

    fn connected(players: u64, load: f64, deficit: i64, nulled: i64) -> State {
        State {
            status: NodeStatus::Connected,
            stats: Some(RemoteStats {
                players,
                cpu: Cpu {
                    system_load: load,
                    ..Cpu::default()
                },
                frame_stats: Some(FrameStats {
                    sent: 0,
                    nulled,
                    deficit,
                }),
                ..RemoteStats::default()
            }),
            ..State::default()
        }
    }

    #[test]
    fn penalty_formula() {
        // 1.05^50 * 10 - 10 = 104.67
        assert_eq!(connected(4, 0.5, 3, 2).penalty(), 4 + 105 + 3 + 4);
        assert_eq!(connected(0, 0.0, 0, 0).penalty(), 0);
    }

    #[test]
    fn disconnected_nodes_have_no_penalty() {
        let mut state = connected(50, 0.9, 100, 100);
        state.status = NodeStatus::Disconnected;

        assert_eq!(state.penalty(), 0);
    }

    #[test]
    fn penalty_grows_with_load_and_frame_loss() {
        let base = connected(2, 0.2, 0, 0).penalty();

        assert!(connected(2, 0.4, 0, 0).penalty() > base);
        assert!(connected(2, 0.2, 1, 0).penalty() > base);
        assert!(connected(2, 0.2, 0, 1).penalty() > connected(2, 0.2, 1, 0).penalty());
    }

    #[test]
    fn validation_rejects_empty_password() {
        let config = NodeConfig::new("main", "localhost", 2333, "");

        assert!(matches!(config.validate(), Err(Error::Config(_))));
        assert!(NodeConfig::new("main", "localhost", 2333, "pass").validate().is_ok());
    }

    #[test]
    fn urls_follow_the_secure_flag() {
        let mut config = NodeConfig::new("main", "lava.example", 443, "pass");
        config.secure = true;

        assert_eq!(config.rest_url(), "https://lava.example:443");
        assert_eq!(config.socket_url(), "wss://lava.example:443/");
    }
}
