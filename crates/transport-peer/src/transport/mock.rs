//! Scriptable in-memory transport.
//!
//! Every call is recorded, session descriptions are synthetic, and tests push
//! [`TransportEvent`]s by hand to simulate what a real connection would report.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use super::{
    Channel, ChannelMessage, ConnectionState, Connected, Connector, EventSender, Transport,
    TransportEvent, TransportResult,
};
use crate::config::{AnswerOptions, ChannelOptions, OfferOptions, RtcConfig};
use crate::error::TransportError;
use crate::signal::{IceCandidate, MediaKind, SdpKind, SessionDescription, TransceiverInit};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    CreateOffer,
    CreateAnswer,
    SetLocalDescription(SessionDescription),
    SetRemoteDescription(SessionDescription),
    AddIceCandidate(IceCandidate),
    AddTrack(String),
    RemoveTrack(String),
    AddTransceiver {
        kind: MediaKind,
        init: Vec<TransceiverInit>,
    },
    CreateDataChannel {
        label: String,
        options: ChannelOptions,
    },
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockTrack {
    pub id: String,
}

impl MockTrack {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockSender {
    pub track_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockReceiver {
    pub track_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockTransceiver {
    pub kind: MediaKind,
    pub init: Vec<TransceiverInit>,
}

/// Hands out a fresh [`MockTransport`] per `connect` and remembers all of
/// them so tests can reach the one a peer is using.
#[derive(Clone, Default)]
pub struct MockConnector {
    transports: Arc<Mutex<Vec<Arc<MockTransport>>>>,
    fail_connect: Arc<AtomicBool>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transports(&self) -> Vec<Arc<MockTransport>> {
        self.transports.lock().clone()
    }

    pub fn latest(&self) -> Option<Arc<MockTransport>> {
        self.transports.lock().last().cloned()
    }

    pub fn connect_count(&self) -> usize {
        self.transports.lock().len()
    }

    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self, config: &RtcConfig) -> TransportResult<Connected<MockTransport>> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::Setup("mock connector refused".into()));
        }
        let (events_tx, events) = mpsc::unbounded_channel();
        let transport = Arc::new(MockTransport::new(config.clone(), events_tx));
        self.transports.lock().push(Arc::clone(&transport));
        Ok(Connected { transport, events })
    }
}

pub struct MockTransport {
    config: RtcConfig,
    events: EventSender<MockTransport>,
    calls: Mutex<Vec<MockCall>>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    channels: Mutex<Vec<Arc<MockChannel>>>,
    rejected_candidates: Mutex<HashSet<String>>,
    sdp_counter: AtomicU64,
    closed: AtomicBool,
}

impl MockTransport {
    fn new(config: RtcConfig, events: EventSender<MockTransport>) -> Self {
        Self {
            config,
            events,
            calls: Mutex::new(Vec::new()),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            channels: Mutex::new(Vec::new()),
            rejected_candidates: Mutex::new(HashSet::new()),
            sdp_counter: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &RtcConfig {
        &self.config
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn count_calls(&self, matcher: impl Fn(&MockCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| matcher(call)).count()
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                MockCall::AddIceCandidate(candidate) => Some(candidate.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Makes `add_ice_candidate` fail for this candidate string.
    pub fn reject_candidate(&self, candidate: impl Into<String>) {
        self.rejected_candidates.lock().insert(candidate.into());
    }

    pub fn channel(&self, label: &str) -> Option<Arc<MockChannel>> {
        self.channels
            .lock()
            .iter()
            .find(|channel| channel.label() == label)
            .cloned()
    }

    pub fn emit(&self, event: TransportEvent<MockTransport>) {
        trace!(target = "transport_peer::mock", event = event.name(), "emit");
        let _ = self.events.send(event);
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.emit(TransportEvent::ConnectionState(state));
    }

    pub fn gather(&self, candidate: IceCandidate) {
        self.emit(TransportEvent::LocalCandidate(candidate));
    }

    pub fn open_channel(&self, label: &str) {
        self.emit(TransportEvent::ChannelOpen {
            label: label.to_string(),
        });
    }

    pub fn close_channel(&self, label: &str) {
        self.emit(TransportEvent::ChannelClose {
            label: label.to_string(),
        });
    }

    pub fn deliver(&self, label: &str, message: ChannelMessage) {
        self.emit(TransportEvent::ChannelMessage {
            label: label.to_string(),
            message,
        });
    }

    /// Simulates the remote side opening a channel with this label.
    pub fn offer_channel(&self, label: &str) -> Arc<MockChannel> {
        let channel = Arc::new(MockChannel::new(label));
        self.channels.lock().push(Arc::clone(&channel));
        self.emit(TransportEvent::ChannelOffered(Arc::clone(&channel)));
        channel
    }

    pub fn add_remote_track(&self, track_id: &str) {
        self.emit(TransportEvent::Track {
            track: MockTrack::new(track_id),
            receiver: MockReceiver {
                track_id: track_id.to_string(),
            },
        });
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().push(call);
    }

    fn next_sdp(&self, kind: SdpKind) -> SessionDescription {
        let index = self.sdp_counter.fetch_add(1, Ordering::SeqCst) + 1;
        SessionDescription::new(kind, format!("mock-{kind}-{index}"))
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Channel = MockChannel;
    type LocalTrack = MockTrack;
    type Sender = MockSender;
    type Transceiver = MockTransceiver;
    type RemoteTrack = MockTrack;
    type Receiver = MockReceiver;

    async fn create_offer(
        &self,
        _options: Option<&OfferOptions>,
    ) -> TransportResult<SessionDescription> {
        self.record(MockCall::CreateOffer);
        Ok(self.next_sdp(SdpKind::Offer))
    }

    async fn create_answer(
        &self,
        _options: Option<&AnswerOptions>,
    ) -> TransportResult<SessionDescription> {
        self.record(MockCall::CreateAnswer);
        match self.remote.lock().as_ref() {
            Some(remote) if remote.kind == SdpKind::Offer => Ok(self.next_sdp(SdpKind::Answer)),
            Some(_) => Err(TransportError::Operation(
                "cannot answer without a remote offer".into(),
            )),
            None => Err(TransportError::NoRemoteDescription),
        }
    }

    async fn set_local_description(&self, description: SessionDescription) -> TransportResult<()> {
        self.record(MockCall::SetLocalDescription(description.clone()));
        *self.local.lock() = Some(description);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> TransportResult<()> {
        self.record(MockCall::SetRemoteDescription(description.clone()));
        let mut remote = self.remote.lock();
        if description.kind == SdpKind::Rollback {
            *remote = None;
        } else {
            *remote = Some(description);
        }
        Ok(())
    }

    async fn remote_description(&self) -> Option<SessionDescription> {
        self.remote.lock().clone()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> TransportResult<()> {
        self.record(MockCall::AddIceCandidate(candidate.clone()));
        if self.remote.lock().is_none() {
            return Err(TransportError::NoRemoteDescription);
        }
        if self.rejected_candidates.lock().contains(&candidate.candidate) {
            return Err(TransportError::Operation(format!(
                "candidate rejected: {}",
                candidate.candidate
            )));
        }
        Ok(())
    }

    async fn add_track(&self, track: MockTrack) -> TransportResult<MockSender> {
        self.record(MockCall::AddTrack(track.id.clone()));
        Ok(MockSender { track_id: track.id })
    }

    async fn remove_track(&self, sender: &MockSender) -> TransportResult<()> {
        self.record(MockCall::RemoveTrack(sender.track_id.clone()));
        Ok(())
    }

    async fn add_transceiver_from_kind(
        &self,
        kind: MediaKind,
        init: &[TransceiverInit],
    ) -> TransportResult<MockTransceiver> {
        self.record(MockCall::AddTransceiver {
            kind,
            init: init.to_vec(),
        });
        Ok(MockTransceiver {
            kind,
            init: init.to_vec(),
        })
    }

    async fn create_data_channel(
        &self,
        label: &str,
        options: &ChannelOptions,
    ) -> TransportResult<Arc<MockChannel>> {
        self.record(MockCall::CreateDataChannel {
            label: label.to_string(),
            options: options.clone(),
        });
        let channel = Arc::new(MockChannel::new(label));
        self.channels.lock().push(Arc::clone(&channel));
        Ok(channel)
    }

    async fn close(&self) -> TransportResult<()> {
        self.record(MockCall::Close);
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.set_state(ConnectionState::Closed);
        }
        Ok(())
    }
}

/// Data channel that records everything written to it.
pub struct MockChannel {
    label: String,
    sent: Mutex<Vec<ChannelMessage>>,
    fail_after: Mutex<Option<usize>>,
    fail_close: AtomicBool,
    closed: AtomicBool,
}

impl MockChannel {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            sent: Mutex::new(Vec::new()),
            fail_after: Mutex::new(None),
            fail_close: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn sent(&self) -> Vec<ChannelMessage> {
        self.sent.lock().clone()
    }

    /// Text payloads written so far, in order.
    pub fn sent_text(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|message| message.is_string)
            .map(|message| String::from_utf8_lossy(&message.data).into_owned())
            .collect()
    }

    /// Lets `sends` more messages through, then fails every send.
    pub fn fail_after(&self, sends: usize) {
        let already = self.sent.lock().len();
        *self.fail_after.lock() = Some(already + sends);
    }

    pub fn fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn push(&self, message: ChannelMessage) -> TransportResult<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }
        let mut sent = self.sent.lock();
        if let Some(limit) = *self.fail_after.lock() {
            if sent.len() >= limit {
                return Err(TransportError::Operation("mock send failure".into()));
            }
        }
        let len = message.data.len();
        sent.push(message);
        Ok(len)
    }
}

#[async_trait]
impl Channel for MockChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send(&self, data: Bytes) -> TransportResult<usize> {
        self.push(ChannelMessage::binary(data))
    }

    async fn send_text(&self, text: String) -> TransportResult<usize> {
        self.push(ChannelMessage::text(text))
    }

    async fn close(&self) -> TransportResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(TransportError::Operation("mock close failure".into()));
        }
        Ok(())
    }
}
