//! The negotiation engine.
//!
//! A [`Peer`] owns at most one live transport at a time. Application calls,
//! inbound signals and transport events all funnel through one async
//! negotiation lock, so the "no remote description yet, buffer the candidate"
//! check can never interleave with the drain that follows applying a remote
//! description. Transport events are consumed by a pump task bound to the
//! transport generation it was spawned for; once a transport is replaced or
//! torn down its pump stops and late events are dropped.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::callbacks::{Callbacks, HandlerId};
use crate::candidates::CandidateBuffer;
use crate::channel::{ChannelRole, ChannelSet, write_chunked, write_text_chunked};
use crate::config::{
    AnswerOptions, CONTROL_CHANNEL_LABEL, ChannelOptions, IceServer, OfferOptions, PeerConfig,
    RtcConfig,
};
use crate::error::{BoxError, PeerError, PeerResult};
use crate::reader::PeerReader;
use crate::signal::{
    IceCandidate, MediaKind, SdpKind, SessionDescription, SignalMessage, TransceiverInit,
    TransceiverRequest,
};
use crate::transport::{
    Channel, ChannelMessage, ConnectionState, Connected, Connector, EventReceiver, Transport,
    TransportEvent,
};

type TransportOf<C> = <C as Connector>::Transport;
type ChannelOf<C> = <TransportOf<C> as Transport>::Channel;
type TransceiverOf<C> = <TransportOf<C> as Transport>::Transceiver;
type RemoteTrackOf<C> = <TransportOf<C> as Transport>::RemoteTrack;
type ReceiverOf<C> = <TransportOf<C> as Transport>::Receiver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    /// No transport has been created yet.
    Uninitialized,
    Negotiating,
    Connected,
    Closed,
}

struct Shared<C: Connector> {
    id: String,
    channel_label: String,
    config: PeerConfig,
    connector: C,
    initiator: AtomicBool,
    state: RwLock<PeerState>,
    transport: RwLock<Option<Arc<TransportOf<C>>>>,
    generation: AtomicU64,
    channels: ChannelSet<ChannelOf<C>>,
    remote_candidates: CandidateBuffer,
    local_candidates: CandidateBuffer,
    callbacks: Callbacks<TransportOf<C>>,
    negotiation: Mutex<()>,
}

/// Handle to a peer. Clones share the same session.
pub struct Peer<C: Connector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connector> Clone for Peer<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connector> fmt::Debug for Peer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.shared.id)
            .field("initiator", &self.is_initiator())
            .field("state", &self.state())
            .field("control_ready", &self.is_control_ready())
            .finish()
    }
}

pub struct PeerBuilder<C: Connector> {
    connector: C,
    config: PeerConfig,
    callbacks: Callbacks<TransportOf<C>>,
}

impl<C: Connector> PeerBuilder<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            config: PeerConfig::default(),
            callbacks: Callbacks::default(),
        }
    }

    /// Replaces the whole configuration; later setters refine it.
    pub fn config(mut self, config: PeerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = Some(id.into());
        self
    }

    pub fn channel_label(mut self, label: impl Into<String>) -> Self {
        self.config.channel_label = Some(label.into());
        self
    }

    pub fn channel_options(mut self, options: ChannelOptions) -> Self {
        self.config.channel_options = options;
        self
    }

    pub fn rtc_config(mut self, rtc: RtcConfig) -> Self {
        self.config.rtc = rtc;
        self
    }

    pub fn ice_servers(mut self, servers: Vec<IceServer>) -> Self {
        self.config.rtc.ice_servers = servers;
        self
    }

    pub fn offer_options(mut self, options: OfferOptions) -> Self {
        self.config.offer_options = Some(options);
        self
    }

    pub fn answer_options(mut self, options: AnswerOptions) -> Self {
        self.config.answer_options = Some(options);
        self
    }

    pub fn max_channel_message_size(mut self, bytes: usize) -> Self {
        self.config.max_channel_message_size = bytes;
        self
    }

    pub fn control_channel(mut self, enabled: bool) -> Self {
        self.config.control_channel = enabled;
        self
    }

    pub fn on_signal<F>(self, handler: F) -> Self
    where
        F: Fn(SignalMessage) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.callbacks.signal.store(Arc::new(handler));
        self
    }

    pub fn on_connect<F>(self, handler: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks.connect.add(Arc::new(handler));
        self
    }

    pub fn on_data<F>(self, handler: F) -> Self
    where
        F: Fn(ChannelMessage) + Send + Sync + 'static,
    {
        self.callbacks.data.add(Arc::new(handler));
        self
    }

    pub fn on_error<F>(self, handler: F) -> Self
    where
        F: Fn(Arc<PeerError>) + Send + Sync + 'static,
    {
        self.callbacks.error.add(Arc::new(handler));
        self
    }

    pub fn on_close<F>(self, handler: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks.close.add(Arc::new(handler));
        self
    }

    pub fn on_transceiver<F>(self, handler: F) -> Self
    where
        F: Fn(TransceiverOf<C>) + Send + Sync + 'static,
    {
        self.callbacks.transceiver.add(Arc::new(handler));
        self
    }

    pub fn on_track<F>(self, handler: F) -> Self
    where
        F: Fn(RemoteTrackOf<C>, ReceiverOf<C>) + Send + Sync + 'static,
    {
        self.callbacks.track.add(Arc::new(handler));
        self
    }

    pub fn build(self) -> PeerResult<Peer<C>> {
        self.config.validate()?;
        let id = self
            .config
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let channel_label = self
            .config
            .channel_label
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Ok(Peer {
            shared: Arc::new(Shared {
                id,
                channel_label,
                config: self.config,
                connector: self.connector,
                initiator: AtomicBool::new(false),
                state: RwLock::new(PeerState::Uninitialized),
                transport: RwLock::new(None),
                generation: AtomicU64::new(0),
                channels: ChannelSet::new(),
                remote_candidates: CandidateBuffer::new(),
                local_candidates: CandidateBuffer::new(),
                callbacks: self.callbacks,
                negotiation: Mutex::new(()),
            }),
        })
    }
}

impl<C: Connector> Peer<C> {
    pub fn builder(connector: C) -> PeerBuilder<C> {
        PeerBuilder::new(connector)
    }

    pub fn new(connector: C, config: PeerConfig) -> PeerResult<Self> {
        PeerBuilder::new(connector).config(config).build()
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn channel_label(&self) -> &str {
        &self.shared.channel_label
    }

    pub fn config(&self) -> &PeerConfig {
        &self.shared.config
    }

    pub fn is_initiator(&self) -> bool {
        self.shared.initiator.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> PeerState {
        *self.shared.state.read()
    }

    pub fn transport(&self) -> Option<Arc<TransportOf<C>>> {
        self.shared.transport.read().clone()
    }

    /// The application data channel, once created or offered.
    pub fn channel(&self) -> Option<Arc<ChannelOf<C>>> {
        self.shared.channels.app()
    }

    pub fn control_channel(&self) -> Option<Arc<ChannelOf<C>>> {
        self.shared.channels.control()
    }

    pub fn is_control_ready(&self) -> bool {
        self.shared.channels.is_ready()
    }

    pub async fn wait_control_ready(&self) {
        self.shared.channels.wait_ready().await
    }

    /// Remote candidates waiting for a remote description.
    pub fn pending_candidate_count(&self) -> usize {
        self.shared.remote_candidates.len()
    }

    /// Locally gathered candidates not yet announced to the remote side.
    pub fn held_local_candidate_count(&self) -> usize {
        self.shared.local_candidates.len()
    }

    /// Starts a session as the initiator: (re)creates the transport, opens
    /// the channels and sends an offer.
    pub async fn init(&self) -> PeerResult<()> {
        let _guard = self.shared.negotiation.lock().await;
        self.shared.initiator.store(true, Ordering::SeqCst);
        self.create_transport_locked().await?;
        self.negotiate_locked().await
    }

    /// Applies an inbound signal. Without a live transport the peer first
    /// creates one, joining as the non-initiator unless `init` ran before.
    pub async fn signal(&self, message: SignalMessage) -> PeerResult<()> {
        self.check_role(&message)?;
        let _guard = self.shared.negotiation.lock().await;
        if self.transport().is_none() {
            debug!(
                target = "transport_peer::peer",
                peer = %self.shared.id,
                kind = message.kind(),
                "creating transport for inbound signal"
            );
            self.create_transport_locked().await?;
        }
        self.signal_locked(message).await
    }

    pub async fn signal_value(&self, value: &Value) -> PeerResult<()> {
        let message = SignalMessage::from_value(value)?;
        self.signal(message).await
    }

    pub async fn signal_json(&self, text: &str) -> PeerResult<()> {
        let message = SignalMessage::from_json(text)?;
        self.signal(message).await
    }

    /// On the initiator, adds the transceiver and renegotiates. A
    /// non-initiator cannot touch its transceivers; it asks the initiator with
    /// a `transceiverRequest` and returns `None`.
    pub async fn add_transceiver_from_kind(
        &self,
        kind: MediaKind,
        init: Vec<TransceiverInit>,
    ) -> PeerResult<Option<TransceiverOf<C>>> {
        let _guard = self.shared.negotiation.lock().await;
        let transport = self.require_transport()?;
        if !self.is_initiator() {
            self.send_signal(SignalMessage::TransceiverRequest(TransceiverRequest {
                kind,
                init,
            }))
            .await?;
            return Ok(None);
        }
        let transceiver = transport.add_transceiver_from_kind(kind, &init).await?;
        self.shared.callbacks.emit_transceiver(&transceiver);
        self.negotiate_locked().await?;
        Ok(Some(transceiver))
    }

    pub async fn add_track(
        &self,
        track: <TransportOf<C> as Transport>::LocalTrack,
    ) -> PeerResult<<TransportOf<C> as Transport>::Sender> {
        let _guard = self.shared.negotiation.lock().await;
        let transport = self.require_transport()?;
        let sender = transport.add_track(track).await?;
        self.negotiate_locked().await?;
        Ok(sender)
    }

    pub async fn remove_track(
        &self,
        sender: &<TransportOf<C> as Transport>::Sender,
    ) -> PeerResult<()> {
        let _guard = self.shared.negotiation.lock().await;
        let transport = self.require_transport()?;
        transport.remove_track(sender).await?;
        self.negotiate_locked().await
    }

    /// Writes bytes to the application channel, split into chunks of at
    /// most `max_channel_message_size`. Returns the number of bytes sent.
    pub async fn write(&self, data: &[u8]) -> PeerResult<usize> {
        let channel = self
            .shared
            .channels
            .app()
            .ok_or(PeerError::ConnectionNotInitialized)?;
        write_chunked(&*channel, data, self.shared.config.max_channel_message_size).await
    }

    pub async fn write_text(&self, text: &str) -> PeerResult<usize> {
        let channel = self
            .shared
            .channels
            .app()
            .ok_or(PeerError::ConnectionNotInitialized)?;
        write_text_chunked(&*channel, text, self.shared.config.max_channel_message_size).await
    }

    /// Returns a reader over application channel bytes received from now on.
    pub fn reader(&self) -> PeerReader {
        PeerReader::new(self.shared.channels.add_tap())
    }

    /// Tears down channels and transport. Safe to call repeatedly; close
    /// handlers only run when something was actually torn down.
    pub async fn close(&self) -> PeerResult<()> {
        let _guard = self.shared.negotiation.lock().await;
        let (torn_down, result) = self.teardown_locked().await;
        if torn_down {
            debug!(target = "transport_peer::peer", peer = %self.shared.id, "peer closed");
            self.finish_close();
        }
        result
    }

    pub fn on_signal<F>(&self, handler: F)
    where
        F: Fn(SignalMessage) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.shared.callbacks.signal.store(Arc::new(handler));
    }

    pub fn off_signal(&self) {
        self.shared.callbacks.signal.clear();
    }

    pub fn on_connect<F>(&self, handler: F) -> HandlerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.callbacks.connect.add(Arc::new(handler))
    }

    pub fn off_connect(&self, id: HandlerId) -> bool {
        self.shared.callbacks.connect.remove(id)
    }

    pub fn on_data<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(ChannelMessage) + Send + Sync + 'static,
    {
        self.shared.callbacks.data.add(Arc::new(handler))
    }

    pub fn off_data(&self, id: HandlerId) -> bool {
        self.shared.callbacks.data.remove(id)
    }

    pub fn on_error<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(Arc<PeerError>) + Send + Sync + 'static,
    {
        self.shared.callbacks.error.add(Arc::new(handler))
    }

    pub fn off_error(&self, id: HandlerId) -> bool {
        self.shared.callbacks.error.remove(id)
    }

    pub fn on_close<F>(&self, handler: F) -> HandlerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.callbacks.close.add(Arc::new(handler))
    }

    pub fn off_close(&self, id: HandlerId) -> bool {
        self.shared.callbacks.close.remove(id)
    }

    pub fn on_transceiver<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(TransceiverOf<C>) + Send + Sync + 'static,
    {
        self.shared.callbacks.transceiver.add(Arc::new(handler))
    }

    pub fn off_transceiver(&self, id: HandlerId) -> bool {
        self.shared.callbacks.transceiver.remove(id)
    }

    pub fn on_track<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(RemoteTrackOf<C>, ReceiverOf<C>) + Send + Sync + 'static,
    {
        self.shared.callbacks.track.add(Arc::new(handler))
    }

    pub fn off_track(&self, id: HandlerId) -> bool {
        self.shared.callbacks.track.remove(id)
    }

    fn check_role(&self, message: &SignalMessage) -> PeerResult<()> {
        if matches!(message, SignalMessage::TransceiverRequest(_)) && !self.is_initiator() {
            return Err(PeerError::InvalidSignalState(
                "transceiverRequest is only accepted by the initiator",
            ));
        }
        Ok(())
    }

    fn require_transport(&self) -> PeerResult<Arc<TransportOf<C>>> {
        self.transport().ok_or(PeerError::ConnectionNotInitialized)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.shared.generation.load(Ordering::SeqCst) == generation
    }

    /// Takes the negotiation lock, or `None` once `generation` is stale.
    async fn lock_current(&self, generation: u64) -> Option<MutexGuard<'_, ()>> {
        let guard = self.shared.negotiation.lock().await;
        self.is_current(generation).then_some(guard)
    }

    async fn create_transport_locked(&self) -> PeerResult<()> {
        let shared = &self.shared;
        let (replaced, result) = self.teardown_locked().await;
        if let Err(err) = result {
            warn!(
                target = "transport_peer::peer",
                peer = %shared.id,
                error = %err,
                "failed to tear down previous transport"
            );
        }

        let Connected { transport, events } = match shared.connector.connect(&shared.config.rtc).await
        {
            Ok(connected) => connected,
            Err(err) => {
                self.abandon_setup(replaced);
                return Err(err.into());
            }
        };
        let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *shared.transport.write() = Some(Arc::clone(&transport));
        *shared.state.write() = PeerState::Negotiating;
        spawn_pump(Arc::downgrade(shared), generation, events);

        if self.is_initiator() {
            if let Err(err) = self.open_channels_locked(&transport).await {
                let (_, teardown) = self.teardown_locked().await;
                if let Err(teardown_err) = teardown {
                    warn!(
                        target = "transport_peer::peer",
                        peer = %shared.id,
                        error = %teardown_err,
                        "failed to tear down transport after channel setup error"
                    );
                }
                self.abandon_setup(replaced);
                return Err(err);
            }
        }

        debug!(
            target = "transport_peer::peer",
            peer = %shared.id,
            initiator = self.is_initiator(),
            generation,
            replaced,
            "transport created"
        );
        Ok(())
    }

    /// Leaves the peer closed after a failed (re)initialisation. Close
    /// handlers only run when a previous session was torn down for it.
    fn abandon_setup(&self, replaced: bool) {
        if replaced {
            self.finish_close();
        } else {
            *self.shared.state.write() = PeerState::Closed;
            self.shared.channels.close_taps();
        }
    }

    async fn open_channels_locked(&self, transport: &TransportOf<C>) -> PeerResult<()> {
        let shared = &self.shared;
        let app = transport
            .create_data_channel(&shared.channel_label, &shared.config.channel_options)
            .await?;
        shared.channels.set_app(app);
        if shared.config.control_channel {
            let control = transport
                .create_data_channel(CONTROL_CHANNEL_LABEL, &ChannelOptions::reliable())
                .await?;
            shared.channels.set_control(control);
        }
        Ok(())
    }

    /// Drops channels, transport and buffered candidates. Returns whether
    /// anything existed, plus the combined teardown failures.
    async fn teardown_locked(&self) -> (bool, PeerResult<()>) {
        let shared = &self.shared;
        shared.generation.fetch_add(1, Ordering::SeqCst);
        let (app, control) = shared.channels.take();
        let transport = shared.transport.write().take();
        shared.remote_candidates.clear();
        shared.local_candidates.clear();

        let torn_down = app.is_some() || control.is_some() || transport.is_some();
        let mut errors = Vec::new();
        for channel in [app, control].into_iter().flatten() {
            if let Err(err) = channel.close().await {
                errors.push(PeerError::from(err));
            }
        }
        if let Some(transport) = transport {
            if let Err(err) = transport.close().await {
                errors.push(PeerError::from(err));
            }
        }
        (torn_down, PeerError::join(errors))
    }

    fn finish_close(&self) {
        *self.shared.state.write() = PeerState::Closed;
        self.shared.channels.close_taps();
        self.shared.callbacks.emit_close();
    }

    async fn negotiate_locked(&self) -> PeerResult<()> {
        let transport = self.require_transport()?;
        if !self.is_initiator() {
            debug!(
                target = "transport_peer::peer",
                peer = %self.shared.id,
                "requesting renegotiation from initiator"
            );
            return self.send_signal(SignalMessage::Renegotiate).await;
        }
        let offer = transport
            .create_offer(self.shared.config.offer_options.as_ref())
            .await?;
        transport.set_local_description(offer.clone()).await?;
        debug!(target = "transport_peer::peer", peer = %self.shared.id, "sending offer");
        self.send_signal(SignalMessage::from(offer)).await
    }

    async fn signal_locked(&self, message: SignalMessage) -> PeerResult<()> {
        let transport = self.require_transport()?;
        trace!(
            target = "transport_peer::peer",
            peer = %self.shared.id,
            kind = message.kind(),
            "handling signal"
        );
        match message {
            SignalMessage::Renegotiate => self.negotiate_locked().await,
            SignalMessage::TransceiverRequest(request) => {
                let transceiver = transport
                    .add_transceiver_from_kind(request.kind, &request.init)
                    .await?;
                self.shared.callbacks.emit_transceiver(&transceiver);
                self.negotiate_locked().await
            }
            SignalMessage::Candidate(candidate) => {
                if transport.remote_description().await.is_none() {
                    trace!(
                        target = "transport_peer::peer",
                        peer = %self.shared.id,
                        "buffering remote candidate"
                    );
                    self.shared.remote_candidates.push(candidate);
                    return Ok(());
                }
                transport.add_ice_candidate(candidate).await?;
                Ok(())
            }
            other => match other.description() {
                Some(description) => {
                    self.apply_remote_description_locked(&transport, description)
                        .await
                }
                None => Err(PeerError::InvalidSignalMessageType),
            },
        }
    }

    async fn apply_remote_description_locked(
        &self,
        transport: &TransportOf<C>,
        description: SessionDescription,
    ) -> PeerResult<()> {
        let kind = description.kind;
        transport.set_remote_description(description).await?;
        if kind == SdpKind::Rollback {
            debug!(
                target = "transport_peer::peer",
                peer = %self.shared.id,
                "remote description rolled back"
            );
            return Ok(());
        }

        let mut errors = Vec::new();
        let buffered = self.shared.remote_candidates.drain();
        if !buffered.is_empty() {
            debug!(
                target = "transport_peer::peer",
                peer = %self.shared.id,
                count = buffered.len(),
                "applying buffered candidates"
            );
        }
        for candidate in buffered {
            if let Err(err) = transport.add_ice_candidate(candidate).await {
                errors.push(PeerError::from(err));
            }
        }

        if kind == SdpKind::Offer {
            if let Err(err) = self.answer_locked(transport).await {
                errors.push(err);
            }
        }

        for candidate in self.shared.local_candidates.drain() {
            if let Err(err) = self.send_signal(SignalMessage::Candidate(candidate)).await {
                errors.push(err);
            }
        }

        PeerError::join(errors)
    }

    async fn answer_locked(&self, transport: &TransportOf<C>) -> PeerResult<()> {
        let answer = transport
            .create_answer(self.shared.config.answer_options.as_ref())
            .await?;
        transport.set_local_description(answer.clone()).await?;
        debug!(target = "transport_peer::peer", peer = %self.shared.id, "sending answer");
        self.send_signal(SignalMessage::from(answer)).await
    }

    /// Routes an outbound signal: over the control channel while it is open,
    /// otherwise through the application's signal handler.
    async fn send_signal(&self, message: SignalMessage) -> PeerResult<()> {
        if let Some(control) = self.shared.channels.ready_control() {
            let text = message.to_json()?;
            trace!(
                target = "transport_peer::peer",
                peer = %self.shared.id,
                kind = message.kind(),
                "signal via control channel"
            );
            control.send_text(text).await?;
            return Ok(());
        }
        let handler = self
            .shared
            .callbacks
            .signal
            .load()
            .ok_or(PeerError::SignalHandlerMissing)?;
        handler(message).map_err(PeerError::SignalHandler)
    }

    async fn handle_event(&self, generation: u64, event: TransportEvent<TransportOf<C>>) {
        let shared = &self.shared;
        trace!(
            target = "transport_peer::peer",
            peer = %shared.id,
            event = event.name(),
            "transport event"
        );
        match event {
            TransportEvent::ConnectionState(state) => {
                self.on_connection_state(generation, state).await
            }
            TransportEvent::LocalCandidate(candidate) => {
                self.on_local_candidate(generation, candidate).await
            }
            TransportEvent::Track { track, receiver } => {
                shared.callbacks.emit_track(&track, &receiver)
            }
            TransportEvent::ChannelOffered(channel) => {
                let Some(_guard) = self.lock_current(generation).await else {
                    return;
                };
                let label = channel.label().to_string();
                let role = shared.channels.adopt(channel);
                debug!(
                    target = "transport_peer::peer",
                    peer = %shared.id,
                    label,
                    role = ?role,
                    "remote channel adopted"
                );
            }
            TransportEvent::ChannelOpen { label } => {
                let Some(_guard) = self.lock_current(generation).await else {
                    return;
                };
                match shared.channels.role(&label) {
                    ChannelRole::Control => {
                        debug!(target = "transport_peer::peer", peer = %shared.id, "control channel open");
                        shared.channels.set_ready(true);
                    }
                    ChannelRole::Application => {
                        debug!(target = "transport_peer::peer", peer = %shared.id, label, "channel open");
                        shared.callbacks.emit_connect();
                    }
                    ChannelRole::Unknown => {
                        trace!(target = "transport_peer::peer", peer = %shared.id, label, "open for unknown channel")
                    }
                }
            }
            TransportEvent::ChannelClose { label } => {
                let Some(_guard) = self.lock_current(generation).await else {
                    return;
                };
                match shared.channels.role(&label) {
                    ChannelRole::Control => {
                        debug!(target = "transport_peer::peer", peer = %shared.id, "control channel closed");
                        shared.channels.set_ready(false);
                    }
                    _ => {
                        debug!(target = "transport_peer::peer", peer = %shared.id, label, "channel closed")
                    }
                }
            }
            TransportEvent::ChannelError { label, error } => {
                warn!(
                    target = "transport_peer::peer",
                    peer = %shared.id,
                    label,
                    error = %error,
                    "channel error"
                );
                shared.callbacks.emit_error(&shared.id, PeerError::from(error));
            }
            TransportEvent::ChannelMessage { label, message } => {
                match shared.channels.role(&label) {
                    ChannelRole::Control => {
                        if let Err(err) = self.apply_control_message(generation, &message.data).await
                        {
                            shared.callbacks.emit_error(&shared.id, err);
                        }
                    }
                    ChannelRole::Application => {
                        shared.channels.feed_taps(&message.data);
                        shared.callbacks.emit_data(&message);
                    }
                    ChannelRole::Unknown => {
                        trace!(target = "transport_peer::peer", peer = %shared.id, label, "message for unknown channel")
                    }
                }
            }
        }
    }

    async fn on_connection_state(&self, generation: u64, state: ConnectionState) {
        debug!(
            target = "transport_peer::peer",
            peer = %self.shared.id,
            state = ?state,
            "connection state changed"
        );
        if state == ConnectionState::Connected {
            let mut current = self.shared.state.write();
            if *current != PeerState::Closed {
                *current = PeerState::Connected;
            }
        } else if state.is_terminal() {
            self.close_from_transport(generation).await;
        }
    }

    /// Close requested by the transport itself; close handlers always run.
    async fn close_from_transport(&self, generation: u64) {
        let Some(_guard) = self.lock_current(generation).await else {
            return;
        };
        let (_, result) = self.teardown_locked().await;
        self.finish_close();
        if let Err(err) = result {
            self.shared.callbacks.emit_error(&self.shared.id, err);
        }
    }

    async fn on_local_candidate(&self, generation: u64, candidate: IceCandidate) {
        let Some(_guard) = self.lock_current(generation).await else {
            return;
        };
        let Some(transport) = self.transport() else {
            return;
        };
        if transport.remote_description().await.is_none() {
            trace!(
                target = "transport_peer::peer",
                peer = %self.shared.id,
                "holding local candidate until remote description"
            );
            self.shared.local_candidates.push(candidate);
            return;
        }
        if let Err(err) = self.send_signal(SignalMessage::Candidate(candidate)).await {
            self.shared.callbacks.emit_error(&self.shared.id, err);
        }
    }

    async fn apply_control_message(&self, generation: u64, data: &Bytes) -> PeerResult<()> {
        let text = std::str::from_utf8(data)
            .map_err(|err| PeerError::InvalidSignalMessage(err.to_string()))?;
        let message = SignalMessage::from_json(text)?;
        self.check_role(&message)?;
        let Some(_guard) = self.lock_current(generation).await else {
            return Ok(());
        };
        self.signal_locked(message).await
    }
}

fn spawn_pump<C: Connector>(
    shared: Weak<Shared<C>>,
    generation: u64,
    events: EventReceiver<TransportOf<C>>,
) {
    tokio::spawn(run_pump(shared, generation, events));
}

async fn run_pump<C: Connector>(
    shared: Weak<Shared<C>>,
    generation: u64,
    mut events: EventReceiver<TransportOf<C>>,
) {
    while let Some(event) = events.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        if shared.generation.load(Ordering::SeqCst) != generation {
            break;
        }
        let peer = Peer { shared };
        peer.handle_event(generation, event).await;
    }
    trace!(target = "transport_peer::peer", generation, "event pump stopped");
}
