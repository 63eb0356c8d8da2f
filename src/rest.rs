//! The REST control plane of a node.
//!
//! Player and session updates are fire-and-forget: implementations queue them
//! and report failures through logging. Only track loading is awaited.

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::{Client, Method, RequestBuilder};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use crate::model::{GuildId, LoadResult, UpdatePlayer, UpdateSession};
use crate::nodes::NodeConfig;
use crate::Result;

#[async_trait]
pub trait Rest: Send + Sync {
    /// Records the session id issued by the node on `ready`.
    fn set_session_id(&self, session_id: Option<String>);

    fn update_player(&self, guild_id: GuildId, update: UpdatePlayer);

    fn destroy_player(&self, guild_id: GuildId);

    fn update_session(&self, update: UpdateSession);

    async fn load_tracks(&self, identifier: &str) -> Result<LoadResult>;
}

#[derive(Debug)]
enum Command {
    Session(Option<String>),
    UpdatePlayer(GuildId, UpdatePlayer),
    DestroyPlayer(GuildId),
    UpdateSession(UpdateSession),
}

/// HTTP client for one node's Lavalink v3 REST routes.
///
/// Queued requests are sent by a single worker task, so they reach the node in
/// the order they were issued. Requests issued while the node has no session
/// are held until it reports one.
pub struct HttpRest {
    inner: Arc<Inner>,
    commands: UnboundedSender<Command>,
}

struct Inner {
    base_url: String,
    client: Client,
    password: String,
}

impl HttpRest {
    /// Creates the client and spawns its worker.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(config: &NodeConfig) -> Self {
        let inner = Arc::new(Inner {
            base_url: config.rest_url(),
            client: Client::new(),
            password: config.password.clone(),
        });
        let (commands, rx) = mpsc::unbounded_channel();

        tokio::spawn(run_worker(Arc::clone(&inner), rx));

        Self { inner, commands }
    }

    fn queue(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("REST worker for {} has stopped; dropping request", self.inner.base_url);
        }
    }
}

#[async_trait]
impl Rest for HttpRest {
    fn set_session_id(&self, session_id: Option<String>) {
        self.queue(Command::Session(session_id));
    }

    fn update_player(&self, guild_id: GuildId, update: UpdatePlayer) {
        self.queue(Command::UpdatePlayer(guild_id, update));
    }

    fn destroy_player(&self, guild_id: GuildId) {
        self.queue(Command::DestroyPlayer(guild_id));
    }

    fn update_session(&self, update: UpdateSession) {
        self.queue(Command::UpdateSession(update));
    }

    async fn load_tracks(&self, identifier: &str) -> Result<LoadResult> {
        let path = format!(
            "/v3/loadtracks?identifier={}",
            utf8_percent_encode(identifier, NON_ALPHANUMERIC),
        );

        let result = self.inner
            .request(Method::GET, &path)
            .send()
            .await?
            .error_for_status()?
            .json::<LoadResult>()
            .await?;

        Ok(result)
    }
}

impl Inner {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("Authorization", &self.password)
    }

    async fn execute(&self, session_id: &str, command: Command) -> Result<()> {
        let request = match command {
            Command::UpdatePlayer(guild_id, update) => {
                let path = format!("/v3/sessions/{}/players/{}?noReplace=false", session_id, guild_id);

                self.request(Method::PATCH, &path).json(&update)
            },
            Command::DestroyPlayer(guild_id) => {
                let path = format!("/v3/sessions/{}/players/{}", session_id, guild_id);

                self.request(Method::DELETE, &path)
            },
            Command::UpdateSession(update) => {
                let path = format!("/v3/sessions/{}", session_id);

                self.request(Method::PATCH, &path).json(&update)
            },
            Command::Session(_) => return Ok(()),
        };

        request.send().await?.error_for_status()?;

        Ok(())
    }
}

/// Requests held back until the node issues a session id.
///
/// Losing the session drops whatever was held for it; the node's players are
/// restarted once it opens again.
#[derive(Debug, Default)]
struct Backlog {
    session_id: Option<String>,
    pending: VecDeque<Command>,
}

impl Backlog {
    /// Upper bound on held requests; the oldest are dropped past it.
    const MAX_PENDING: usize = 1024;

    fn accept(&mut self, command: Command) {
        match command {
            Command::Session(None) => {
                if !self.pending.is_empty() {
                    debug!("Dropping {} requests queued for a lost session", self.pending.len());
                }

                self.session_id = None;
                self.pending.clear();
            },
            Command::Session(session) => {
                self.session_id = session;
            },
            command => {
                if self.pending.len() == Self::MAX_PENDING {
                    warn!("REST backlog is full; dropping the oldest request");
                    self.pending.pop_front();
                }

                self.pending.push_back(command);
            },
        }
    }

    /// The current session and the requests that can be sent with it.
    fn ready(&mut self) -> Option<(String, Vec<Command>)> {
        let session_id = self.session_id.clone()?;

        Some((session_id, self.pending.drain(..).collect()))
    }
}

async fn run_worker(inner: Arc<Inner>, mut rx: UnboundedReceiver<Command>) {
    let mut backlog = Backlog::default();

    while let Some(command) = rx.recv().await {
        backlog.accept(command);

        let (session_id, commands) = match backlog.ready() {
            Some(ready) => ready,
            None => continue,
        };

        for command in commands {
            trace!("Sending REST request to {}: {:?}", inner.base_url, command);

            if let Err(why) = inner.execute(&session_id, command).await {
                warn!("REST request to {} failed: {}", inner.base_url, why);
            }
        }
    }

    debug!("REST worker for {} finished", inner.base_url);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guilds(commands: &[Command]) -> Vec<GuildId> {
        commands
            .iter()
            .filter_map(|command| match command {
                Command::UpdatePlayer(guild_id, _) | Command::DestroyPlayer(guild_id) => Some(*guild_id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn requests_wait_for_a_session_and_keep_their_order() {
        let mut backlog = Backlog::default();
        backlog.accept(Command::UpdatePlayer(1, UpdatePlayer::paused(true)));
        backlog.accept(Command::DestroyPlayer(2));

        assert!(backlog.ready().is_none());

        backlog.accept(Command::Session(Some("abc".to_owned())));
        let (session_id, commands) = backlog.ready().unwrap();

        assert_eq!(session_id, "abc");
        assert_eq!(guilds(&commands), vec![1, 2]);
        assert!(backlog.ready().unwrap().1.is_empty());
    }

    #[test]
    fn losing_the_session_drops_held_requests() {
        let mut backlog = Backlog::default();
        backlog.accept(Command::Session(Some("old".to_owned())));
        backlog.ready();
        backlog.accept(Command::Session(None));

        for guild_id in 0..1000 {
            backlog.accept(Command::UpdatePlayer(guild_id, UpdatePlayer::volume(50)));
        }

        // the node reconnects; its players restart between open and ready
        backlog.accept(Command::Session(None));
        backlog.accept(Command::UpdatePlayer(7, UpdatePlayer::track("QAAA")));
        backlog.accept(Command::Session(Some("new".to_owned())));

        let (session_id, commands) = backlog.ready().unwrap();
        assert_eq!(session_id, "new");
        assert_eq!(guilds(&commands), vec![7]);
    }

    #[test]
    fn held_requests_are_bounded() {
        let mut backlog = Backlog::default();

        for guild_id in 0..(Backlog::MAX_PENDING as u64 + 10) {
            backlog.accept(Command::DestroyPlayer(guild_id));
        }

        backlog.accept(Command::Session(Some("s".to_owned())));
        let commands = backlog.ready().unwrap().1;

        assert_eq!(commands.len(), Backlog::MAX_PENDING);
        assert_eq!(guilds(&commands)[0], 10);
    }
}
