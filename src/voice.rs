use crate::model::{VoiceServerEvent, VoiceState, VoiceStateEvent};

/// Assembles a guild's voice session from the two gateway dispatches a node
/// needs before it can send audio.
#[derive(Clone, Debug, Default)]
pub struct VoiceConnection {
    pub session_id: Option<String>,
    pub token: Option<String>,
    pub endpoint: Option<String>,
    pub region: Option<String>,
}

impl VoiceConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_state_update(&mut self, event: &VoiceStateEvent) {
        self.session_id = Some(event.session_id.clone());
    }

    pub fn set_server_update(&mut self, event: &VoiceServerEvent) {
        self.token = Some(event.token.clone());
        self.endpoint = event.endpoint.clone();
        self.region = event.endpoint.as_deref().and_then(region_of);
    }

    /// The full voice state, once both dispatches have arrived.
    pub fn voice_state(&self) -> Option<VoiceState> {
        Some(VoiceState {
            token: self.token.clone()?,
            endpoint: self.endpoint.clone()?,
            session_id: self.session_id.clone()?,
        })
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// `"us-east1234.discord.media:443"` → `"us-east"`.
fn region_of(endpoint: &str) -> Option<String> {
    let region: String = endpoint
        .chars()
        .take_while(|c| c.is_ascii_alphabetic() || *c == '-')
        .collect();
    let region = region.trim_end_matches('-');

    if region.is_empty() {
        None
    } else {
        Some(region.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_is_the_endpoint_prefix() {
        assert_eq!(region_of("us-east1234.discord.media:443").as_deref(), Some("us-east"));
        assert_eq!(region_of("rotterdam42.discord.media").as_deref(), Some("rotterdam"));
        assert_eq!(region_of("1234.discord.media"), None);
    }

    #[test]
    fn voice_state_needs_both_dispatches() {
        let mut connection = VoiceConnection::new();
        connection.set_server_update(&VoiceServerEvent {
            guild_id: 1,
            token: "tok".to_owned(),
            endpoint: Some("japan12.discord.media".to_owned()),
        });

        assert!(connection.voice_state().is_none());

        connection.set_state_update(&VoiceStateEvent {
            guild_id: 1,
            channel_id: Some(2),
            user_id: 3,
            session_id: "sess".to_owned(),
            self_deaf: false,
            self_mute: false,
        });

        let state = connection.voice_state().unwrap();
        assert_eq!(state.session_id, "sess");
        assert_eq!(connection.region.as_deref(), Some("japan"));
    }
}
