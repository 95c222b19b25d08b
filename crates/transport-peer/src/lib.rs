//! Peer-to-peer session orchestration on top of a WebRTC-style transport.
//!
//! A [`Peer`] drives offer/answer negotiation, buffers ICE candidates that
//! arrive before a remote description exists, and moves its own signaling
//! onto a dedicated control data channel once the direct link is up. The
//! application supplies an outgoing signal handler and feeds inbound signals
//! to [`Peer::signal`]; everything in between is handled here.
//!
//! ```no_run
//! use transport_peer::{Peer, WebRtcConnector};
//!
//! # async fn run() -> transport_peer::PeerResult<()> {
//! let peer = Peer::builder(WebRtcConnector::new())
//!     .on_signal(|message| {
//!         println!("{}", message.to_json()?);
//!         Ok(())
//!     })
//!     .on_data(|message| println!("{} bytes", message.data.len()))
//!     .build()?;
//! peer.init().await?;
//! # Ok(())
//! # }
//! ```

pub mod callbacks;
pub mod candidates;
pub mod channel;
pub mod config;
pub mod error;
pub mod peer;
pub mod reader;
pub mod signal;
pub mod transport;

pub use callbacks::HandlerId;
pub use candidates::CandidateBuffer;
pub use config::{
    AnswerOptions, CONTROL_CHANNEL_LABEL, ChannelOptions, DEFAULT_MAX_CHANNEL_MESSAGE_SIZE,
    IceServer, OfferOptions, PeerConfig, RtcConfig,
};
pub use error::{BoxError, PeerError, PeerResult, TransportError};
pub use peer::{Peer, PeerBuilder, PeerState};
pub use reader::PeerReader;
pub use signal::{
    IceCandidate, MediaKind, SdpKind, SendEncoding, SessionDescription, SignalMessage,
    TransceiverDirection, TransceiverInit, TransceiverRequest,
};
pub use transport::webrtc::{IceTimeouts, WebRtcConnector, WebRtcTransport};
pub use transport::{
    Channel, ChannelMessage, ConnectionState, Connected, Connector, Transport, TransportEvent,
};
