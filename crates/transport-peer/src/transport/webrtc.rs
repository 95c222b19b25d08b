//! [`Transport`] backed by the `webrtc` crate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::{RTCAnswerOptions, RTCOfferOptions};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpEncodingParameters, RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::{
    Channel, ChannelMessage, ConnectionState, Connected, Connector, EventSender, Transport,
    TransportEvent, TransportResult,
};
use crate::config::{AnswerOptions, ChannelOptions, IceServer, OfferOptions, RtcConfig};
use crate::error::TransportError;
use crate::signal::{
    IceCandidate, MediaKind, SdpKind, SessionDescription, TransceiverDirection, TransceiverInit,
};

/// Creates `RTCPeerConnection`s with the default codecs and interceptors.
#[derive(Debug, Clone, Default)]
pub struct WebRtcConnector {
    include_loopback_candidates: bool,
    ice_timeouts: Option<IceTimeouts>,
}

#[derive(Debug, Clone, Copy)]
pub struct IceTimeouts {
    pub disconnected: Duration,
    pub failed: Duration,
    pub keep_alive: Duration,
}

impl WebRtcConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gathers loopback host candidates too; needed when both ends run on
    /// the same machine without a usable external interface.
    pub fn with_loopback_candidates(mut self, include: bool) -> Self {
        self.include_loopback_candidates = include;
        self
    }

    pub fn with_ice_timeouts(mut self, timeouts: IceTimeouts) -> Self {
        self.ice_timeouts = Some(timeouts);
        self
    }

    fn setting_engine(&self) -> SettingEngine {
        let mut setting = SettingEngine::default();
        if self.include_loopback_candidates {
            setting.set_include_loopback_candidate(true);
        }
        if let Some(timeouts) = self.ice_timeouts {
            setting.set_ice_timeouts(
                Some(timeouts.disconnected),
                Some(timeouts.failed),
                Some(timeouts.keep_alive),
            );
        }
        setting
    }
}

#[async_trait]
impl Connector for WebRtcConnector {
    type Transport = WebRtcTransport;

    async fn connect(&self, config: &RtcConfig) -> TransportResult<Connected<WebRtcTransport>> {
        let api = build_api(self.setting_engine())?;
        let configuration = RTCConfiguration {
            ice_servers: config.ice_servers.iter().map(to_rtc_ice_server).collect(),
            ..Default::default()
        };
        let pc = Arc::new(
            api.new_peer_connection(configuration)
                .await
                .map_err(to_setup_error)?,
        );
        let (events_tx, events) = mpsc::unbounded_channel();
        wire_peer_connection(&pc, &events_tx);
        trace!(
            target = "transport_peer::webrtc",
            ice_servers = config.ice_servers.len(),
            "peer connection created"
        );
        Ok(Connected {
            transport: Arc::new(WebRtcTransport {
                pc,
                events: events_tx,
            }),
            events,
        })
    }
}

fn build_api(setting: SettingEngine) -> TransportResult<API> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(to_setup_error)?;

    let mut registry = Registry::new();
    registry =
        register_default_interceptors(registry, &mut media_engine).map_err(to_setup_error)?;

    Ok(APIBuilder::new()
        .with_setting_engine(setting)
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    events: EventSender<WebRtcTransport>,
}

impl WebRtcTransport {
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }
}

#[async_trait]
impl Transport for WebRtcTransport {
    type Channel = WebRtcChannel;
    type LocalTrack = Arc<dyn TrackLocal + Send + Sync>;
    type Sender = Arc<RTCRtpSender>;
    type Transceiver = Arc<RTCRtpTransceiver>;
    type RemoteTrack = Arc<TrackRemote>;
    type Receiver = Arc<RTCRtpReceiver>;

    async fn create_offer(
        &self,
        options: Option<&OfferOptions>,
    ) -> TransportResult<SessionDescription> {
        let options = options.map(|options| RTCOfferOptions {
            ice_restart: options.ice_restart,
            voice_activity_detection: options.voice_activity_detection,
        });
        let offer = self
            .pc
            .create_offer(options)
            .await
            .map_err(to_operation_error)?;
        from_rtc_description(offer)
    }

    async fn create_answer(
        &self,
        options: Option<&AnswerOptions>,
    ) -> TransportResult<SessionDescription> {
        let options = options.map(|options| RTCAnswerOptions {
            voice_activity_detection: options.voice_activity_detection,
        });
        let answer = self
            .pc
            .create_answer(options)
            .await
            .map_err(to_operation_error)?;
        from_rtc_description(answer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> TransportResult<()> {
        self.pc
            .set_local_description(to_rtc_description(description)?)
            .await
            .map_err(to_operation_error)
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> TransportResult<()> {
        self.pc
            .set_remote_description(to_rtc_description(description)?)
            .await
            .map_err(to_operation_error)
    }

    async fn remote_description(&self) -> Option<SessionDescription> {
        let description = self.pc.remote_description().await?;
        match from_rtc_description(description) {
            Ok(description) => Some(description),
            Err(err) => {
                warn!(target = "transport_peer::webrtc", error = %err, "unusable remote description");
                None
            }
        }
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> TransportResult<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await
            .map_err(to_operation_error)
    }

    async fn add_track(
        &self,
        track: Arc<dyn TrackLocal + Send + Sync>,
    ) -> TransportResult<Arc<RTCRtpSender>> {
        self.pc.add_track(track).await.map_err(to_operation_error)
    }

    async fn remove_track(&self, sender: &Arc<RTCRtpSender>) -> TransportResult<()> {
        self.pc.remove_track(sender).await.map_err(to_operation_error)
    }

    async fn add_transceiver_from_kind(
        &self,
        kind: MediaKind,
        init: &[TransceiverInit],
    ) -> TransportResult<Arc<RTCRtpTransceiver>> {
        if init.len() > 1 {
            return Err(TransportError::Operation(
                "add_transceiver_from_kind accepts at most one init".into(),
            ));
        }
        let init = init.first().map(to_rtc_transceiver_init);
        self.pc
            .add_transceiver_from_kind(to_codec_type(kind), init)
            .await
            .map_err(to_operation_error)
    }

    async fn create_data_channel(
        &self,
        label: &str,
        options: &ChannelOptions,
    ) -> TransportResult<Arc<WebRtcChannel>> {
        let dc = self
            .pc
            .create_data_channel(label, Some(to_rtc_channel_init(options)))
            .await
            .map_err(to_operation_error)?;
        wire_channel(&dc, &self.events);
        Ok(Arc::new(WebRtcChannel { dc }))
    }

    async fn close(&self) -> TransportResult<()> {
        self.pc.close().await.map_err(to_operation_error)
    }
}

pub struct WebRtcChannel {
    dc: Arc<RTCDataChannel>,
}

impl WebRtcChannel {
    pub fn data_channel(&self) -> &Arc<RTCDataChannel> {
        &self.dc
    }
}

#[async_trait]
impl Channel for WebRtcChannel {
    fn label(&self) -> &str {
        self.dc.label()
    }

    async fn send(&self, data: Bytes) -> TransportResult<usize> {
        self.dc.send(&data).await.map_err(to_channel_error)
    }

    async fn send_text(&self, text: String) -> TransportResult<usize> {
        self.dc.send_text(text).await.map_err(to_channel_error)
    }

    async fn close(&self) -> TransportResult<()> {
        self.dc.close().await.map_err(to_channel_error)
    }
}

fn wire_peer_connection(pc: &Arc<RTCPeerConnection>, events: &EventSender<WebRtcTransport>) {
    {
        let events = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let events = events.clone();
            Box::pin(async move {
                let _ = events.send(TransportEvent::ConnectionState(to_connection_state(state)));
            })
        }));
    }

    {
        let events = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = events.clone();
            Box::pin(async move {
                // `None` marks the end of gathering
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = events.send(TransportEvent::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }));
                    }
                    Err(err) => {
                        warn!(
                            target = "transport_peer::webrtc",
                            error = %err,
                            "failed to serialize local candidate"
                        );
                    }
                }
            })
        }));
    }

    {
        let events = events.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let events = events.clone();
                Box::pin(async move {
                    let _ = events.send(TransportEvent::Track { track, receiver });
                })
            },
        ));
    }

    {
        let events = events.clone();
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let events = events.clone();
            Box::pin(async move {
                debug!(
                    target = "transport_peer::webrtc",
                    label = dc.label(),
                    "remote data channel offered"
                );
                // announce before wiring so the open event cannot overtake it
                let _ = events.send(TransportEvent::ChannelOffered(Arc::new(WebRtcChannel {
                    dc: Arc::clone(&dc),
                })));
                wire_channel(&dc, &events);
            })
        }));
    }
}

fn wire_channel(dc: &Arc<RTCDataChannel>, events: &EventSender<WebRtcTransport>) {
    let label = dc.label().to_string();

    {
        let events = events.clone();
        let label = label.clone();
        dc.on_open(Box::new(move || {
            Box::pin(async move {
                let _ = events.send(TransportEvent::ChannelOpen { label });
            })
        }));
    }

    {
        let events = events.clone();
        let label = label.clone();
        dc.on_close(Box::new(move || {
            let events = events.clone();
            let label = label.clone();
            Box::pin(async move {
                let _ = events.send(TransportEvent::ChannelClose { label });
            })
        }));
    }

    {
        let events = events.clone();
        let label = label.clone();
        dc.on_error(Box::new(move |err| {
            let events = events.clone();
            let label = label.clone();
            Box::pin(async move {
                let _ = events.send(TransportEvent::ChannelError {
                    label,
                    error: to_channel_error(err),
                });
            })
        }));
    }

    let events = events.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let events = events.clone();
        let label = label.clone();
        Box::pin(async move {
            let _ = events.send(TransportEvent::ChannelMessage {
                label,
                message: ChannelMessage {
                    is_string: msg.is_string,
                    data: msg.data,
                },
            });
        })
    }));
}

fn to_rtc_ice_server(server: &IceServer) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone(),
        credential: server.credential.clone(),
        ..Default::default()
    }
}

fn to_rtc_channel_init(options: &ChannelOptions) -> RTCDataChannelInit {
    RTCDataChannelInit {
        ordered: options.ordered,
        max_packet_life_time: options.max_packet_life_time,
        max_retransmits: options.max_retransmits,
        protocol: options.protocol.clone(),
        negotiated: options.negotiated,
    }
}

fn to_rtc_transceiver_init(init: &TransceiverInit) -> RTCRtpTransceiverInit {
    RTCRtpTransceiverInit {
        direction: match init.direction {
            TransceiverDirection::Sendrecv => RTCRtpTransceiverDirection::Sendrecv,
            TransceiverDirection::Sendonly => RTCRtpTransceiverDirection::Sendonly,
            TransceiverDirection::Recvonly => RTCRtpTransceiverDirection::Recvonly,
            TransceiverDirection::Inactive => RTCRtpTransceiverDirection::Inactive,
        },
        send_encodings: init
            .send_encodings
            .iter()
            .map(|encoding| RTCRtpEncodingParameters {
                rid: encoding.rid.clone().into(),
                ssrc: encoding.ssrc,
                payload_type: encoding.payload_type,
                ..Default::default()
            })
            .collect(),
    }
}

fn to_codec_type(kind: MediaKind) -> RTPCodecType {
    match kind {
        MediaKind::Audio => RTPCodecType::Audio,
        MediaKind::Video => RTPCodecType::Video,
    }
}

fn to_connection_state(state: RTCPeerConnectionState) -> ConnectionState {
    match state {
        RTCPeerConnectionState::Unspecified => ConnectionState::Unspecified,
        RTCPeerConnectionState::New => ConnectionState::New,
        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
        RTCPeerConnectionState::Connected => ConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => ConnectionState::Failed,
        RTCPeerConnectionState::Closed => ConnectionState::Closed,
    }
}

fn to_rtc_description(description: SessionDescription) -> TransportResult<RTCSessionDescription> {
    match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp).map_err(to_operation_error),
        SdpKind::Answer => {
            RTCSessionDescription::answer(description.sdp).map_err(to_operation_error)
        }
        SdpKind::Pranswer => {
            RTCSessionDescription::pranswer(description.sdp).map_err(to_operation_error)
        }
        SdpKind::Rollback => {
            let mut rollback = RTCSessionDescription::default();
            rollback.sdp_type = RTCSdpType::Rollback;
            rollback.sdp = description.sdp;
            Ok(rollback)
        }
    }
}

fn from_rtc_description(description: RTCSessionDescription) -> TransportResult<SessionDescription> {
    let kind = match description.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        RTCSdpType::Pranswer => SdpKind::Pranswer,
        RTCSdpType::Rollback => SdpKind::Rollback,
        RTCSdpType::Unspecified => {
            return Err(TransportError::Operation(
                "session description has no type".into(),
            ));
        }
    };
    Ok(SessionDescription::new(kind, description.sdp))
}

fn to_setup_error<E: std::fmt::Display>(err: E) -> TransportError {
    TransportError::Setup(err.to_string())
}

fn to_operation_error<E: std::fmt::Display>(err: E) -> TransportError {
    TransportError::Operation(err.to_string())
}

fn to_channel_error(err: webrtc::Error) -> TransportError {
    match err {
        webrtc::Error::ErrClosedPipe | webrtc::Error::ErrConnectionClosed => {
            TransportError::ChannelClosed
        }
        other => TransportError::Operation(other.to_string()),
    }
}
