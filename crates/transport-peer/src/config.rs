use tracing::warn;

use crate::error::PeerError;

/// Largest payload written to the application channel in one message.
pub const DEFAULT_MAX_CHANNEL_MESSAGE_SIZE: usize = 16 * 1024;
/// Reserved label of the data channel that carries signaling once connected.
pub const CONTROL_CHANNEL_LABEL: &str = "peer-control";
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

const ENV_MAX_MESSAGE_BYTES: &str = "PEER_MAX_CHANNEL_MESSAGE_BYTES";
const ENV_ICE_SERVERS: &str = "PEER_ICE_SERVERS";
const ENV_DISABLE_STUN: &str = "PEER_DISABLE_STUN";
const ENV_CONTROL_CHANNEL: &str = "PEER_CONTROL_CHANNEL";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

impl IceServer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            ..Default::default()
        }
    }
}

/// Settings used whenever a transport is (re)created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcConfig {
    pub ice_servers: Vec<IceServer>,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer::new(DEFAULT_STUN_SERVER)],
        }
    }
}

impl RtcConfig {
    /// No STUN/TURN; only host candidates are gathered.
    pub fn localhost() -> Self {
        Self {
            ice_servers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OfferOptions {
    pub ice_restart: bool,
    pub voice_activity_detection: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnswerOptions {
    pub voice_activity_detection: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelOptions {
    pub ordered: Option<bool>,
    pub max_packet_life_time: Option<u16>,
    pub max_retransmits: Option<u16>,
    pub protocol: Option<String>,
    pub negotiated: Option<u16>,
}

impl ChannelOptions {
    pub fn reliable() -> Self {
        Self {
            ordered: Some(true),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    /// Peer identifier; a random UUID when unset.
    pub id: Option<String>,
    /// Application channel label; a random UUID when unset.
    pub channel_label: Option<String>,
    pub channel_options: ChannelOptions,
    pub rtc: RtcConfig,
    pub offer_options: Option<OfferOptions>,
    pub answer_options: Option<AnswerOptions>,
    pub max_channel_message_size: usize,
    /// Whether an initiator opens the control channel next to the
    /// application channel.
    pub control_channel: bool,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            id: None,
            channel_label: None,
            channel_options: ChannelOptions::default(),
            rtc: RtcConfig::default(),
            offer_options: None,
            answer_options: None,
            max_channel_message_size: DEFAULT_MAX_CHANNEL_MESSAGE_SIZE,
            control_channel: true,
        }
    }
}

impl PeerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an environment-like lookup. Unparseable values
    /// are logged and replaced by defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_MAX_MESSAGE_BYTES) {
            config.max_channel_message_size = parse_usize(
                ENV_MAX_MESSAGE_BYTES,
                &raw,
                DEFAULT_MAX_CHANNEL_MESSAGE_SIZE,
                1,
            );
        }

        if let Some(raw) = lookup(ENV_ICE_SERVERS) {
            let servers: Vec<IceServer> = raw
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(IceServer::new)
                .collect();
            if !servers.is_empty() {
                config.rtc.ice_servers = servers;
            }
        }

        if lookup(ENV_DISABLE_STUN).is_some_and(|raw| parse_flag(&raw)) {
            config
                .rtc
                .ice_servers
                .retain(|server| !server.urls.iter().all(|url| url.starts_with("stun:")));
        }

        if let Some(raw) = lookup(ENV_CONTROL_CHANNEL) {
            config.control_channel = parse_flag(&raw);
        }

        config
    }

    pub fn validate(&self) -> Result<(), PeerError> {
        if self.max_channel_message_size == 0 {
            return Err(PeerError::Config(
                "max_channel_message_size must be greater than zero".into(),
            ));
        }
        if self.channel_label.as_deref() == Some(CONTROL_CHANNEL_LABEL) {
            return Err(PeerError::Config(format!(
                "channel label {CONTROL_CHANNEL_LABEL:?} is reserved for the control channel"
            )));
        }
        Ok(())
    }
}

fn parse_flag(raw: &str) -> bool {
    !matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}

fn parse_usize(var: &str, raw: &str, default: usize, min: usize) -> usize {
    match raw.trim().parse::<usize>() {
        Ok(parsed) if parsed >= min => parsed,
        Ok(parsed) => {
            warn!(
                target = "transport_peer::config",
                var, parsed, min, default, "config value below minimum; using default"
            );
            default
        }
        Err(err) => {
            warn!(
                target = "transport_peer::config",
                var,
                error = %err,
                default,
                "failed to parse config value; using default"
            );
            default
        }
    }
}
