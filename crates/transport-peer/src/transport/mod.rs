//! Capability interface of the underlying real-time transport.
//!
//! The negotiation engine never talks to ICE, DTLS or SCTP directly. It drives
//! a [`Transport`] through these traits and reacts to the [`TransportEvent`]
//! stream handed out by [`Connector::connect`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::config::{AnswerOptions, ChannelOptions, OfferOptions, RtcConfig};
use crate::error::TransportError;
use crate::signal::{IceCandidate, MediaKind, SessionDescription, TransceiverInit};

pub mod mock;
pub mod webrtc;

pub type TransportResult<T> = Result<T, TransportError>;

pub type EventReceiver<T> = mpsc::UnboundedReceiver<TransportEvent<T>>;
pub type EventSender<T> = mpsc::UnboundedSender<TransportEvent<T>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Unspecified,
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// States after which the connection cannot carry traffic any more.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Failed | ConnectionState::Closed
        )
    }
}

/// One message received on (or written to) a data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub is_string: bool,
    pub data: Bytes,
}

impl ChannelMessage {
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self {
            is_string: false,
            data: data.into(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            is_string: true,
            data: Bytes::from(text.into()),
        }
    }
}

/// Asynchronous notifications emitted by a transport. Channel-level events
/// are keyed by channel label.
pub enum TransportEvent<T: Transport> {
    ConnectionState(ConnectionState),
    LocalCandidate(IceCandidate),
    Track {
        track: T::RemoteTrack,
        receiver: T::Receiver,
    },
    ChannelOffered(Arc<T::Channel>),
    ChannelOpen {
        label: String,
    },
    ChannelClose {
        label: String,
    },
    ChannelError {
        label: String,
        error: TransportError,
    },
    ChannelMessage {
        label: String,
        message: ChannelMessage,
    },
}

impl<T: Transport> TransportEvent<T> {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            TransportEvent::ConnectionState(_) => "connection_state",
            TransportEvent::LocalCandidate(_) => "local_candidate",
            TransportEvent::Track { .. } => "track",
            TransportEvent::ChannelOffered(_) => "channel_offered",
            TransportEvent::ChannelOpen { .. } => "channel_open",
            TransportEvent::ChannelClose { .. } => "channel_close",
            TransportEvent::ChannelError { .. } => "channel_error",
            TransportEvent::ChannelMessage { .. } => "channel_message",
        }
    }
}

#[async_trait]
pub trait Channel: Send + Sync + 'static {
    fn label(&self) -> &str;
    async fn send(&self, data: Bytes) -> TransportResult<usize>;
    async fn send_text(&self, text: String) -> TransportResult<usize>;
    async fn close(&self) -> TransportResult<()>;
}

/// A live peer connection. Handle types are opaque to the engine; it only
/// passes them between the application and the transport.
#[async_trait]
pub trait Transport: Send + Sync + Sized + 'static {
    type Channel: Channel;
    type LocalTrack: Send + Sync + 'static;
    type Sender: Clone + Send + Sync + 'static;
    type Transceiver: Clone + Send + Sync + 'static;
    type RemoteTrack: Clone + Send + Sync + 'static;
    type Receiver: Clone + Send + Sync + 'static;

    async fn create_offer(
        &self,
        options: Option<&OfferOptions>,
    ) -> TransportResult<SessionDescription>;
    async fn create_answer(
        &self,
        options: Option<&AnswerOptions>,
    ) -> TransportResult<SessionDescription>;
    async fn set_local_description(&self, description: SessionDescription) -> TransportResult<()>;
    async fn set_remote_description(&self, description: SessionDescription)
    -> TransportResult<()>;
    async fn remote_description(&self) -> Option<SessionDescription>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> TransportResult<()>;
    async fn add_track(&self, track: Self::LocalTrack) -> TransportResult<Self::Sender>;
    async fn remove_track(&self, sender: &Self::Sender) -> TransportResult<()>;
    async fn add_transceiver_from_kind(
        &self,
        kind: MediaKind,
        init: &[TransceiverInit],
    ) -> TransportResult<Self::Transceiver>;
    async fn create_data_channel(
        &self,
        label: &str,
        options: &ChannelOptions,
    ) -> TransportResult<Arc<Self::Channel>>;
    async fn close(&self) -> TransportResult<()>;
}

/// A freshly created transport together with its event stream.
pub struct Connected<T: Transport> {
    pub transport: Arc<T>,
    pub events: EventReceiver<T>,
}

/// Creates transports on demand; a peer asks for a new one every time it
/// (re)initialises.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    async fn connect(&self, config: &RtcConfig) -> TransportResult<Connected<Self::Transport>>;
}
