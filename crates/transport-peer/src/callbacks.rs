//! Per-peer handler registries.
//!
//! Every registry is an owned, thread-safe list. Dispatch snapshots the list
//! first, so handlers may be added or removed while a dispatch is running, and
//! then spawns one task per handler; the emitting code never waits for them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::error;

use crate::error::{BoxError, PeerError};
use crate::signal::SignalMessage;
use crate::transport::{ChannelMessage, Transport};

pub type OnSignal = dyn Fn(SignalMessage) -> Result<(), BoxError> + Send + Sync;
pub type OnConnect = dyn Fn() + Send + Sync;
pub type OnData = dyn Fn(ChannelMessage) + Send + Sync;
pub type OnError = dyn Fn(Arc<PeerError>) + Send + Sync;
pub type OnClose = dyn Fn() + Send + Sync;
pub type OnTransceiver<T> = dyn Fn(<T as Transport>::Transceiver) + Send + Sync;
pub type OnTrack<T> =
    dyn Fn(<T as Transport>::RemoteTrack, <T as Transport>::Receiver) + Send + Sync;

/// Token returned by every `on_*` registration, used to deregister. Only
/// meaningful for the registry that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

pub struct Registry<F: ?Sized> {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(HandlerId, Arc<F>)>>,
}

impl<F: ?Sized> Default for Registry<F> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            handlers: RwLock::new(Vec::new()),
        }
    }
}

impl<F: ?Sized> Registry<F> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, handler: Arc<F>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, handler));
        id
    }

    pub fn remove(&self, id: HandlerId) -> bool {
        let mut guard = self.handlers.write();
        let before = guard.len();
        guard.retain(|(existing, _)| *existing != id);
        guard.len() != before
    }

    pub fn snapshot(&self) -> Vec<Arc<F>> {
        self.handlers
            .read()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    pub fn clear(&self) {
        self.handlers.write().clear();
    }
}

/// Single replaceable handler; the last store wins.
pub struct SignalSlot {
    handler: RwLock<Option<Arc<OnSignal>>>,
}

impl Default for SignalSlot {
    fn default() -> Self {
        Self {
            handler: RwLock::new(None),
        }
    }
}

impl SignalSlot {
    pub fn store(&self, handler: Arc<OnSignal>) {
        *self.handler.write() = Some(handler);
    }

    pub fn load(&self) -> Option<Arc<OnSignal>> {
        self.handler.read().clone()
    }

    pub fn clear(&self) {
        *self.handler.write() = None;
    }
}

pub struct Callbacks<T: Transport> {
    pub signal: SignalSlot,
    pub connect: Registry<OnConnect>,
    pub data: Registry<OnData>,
    pub error: Registry<OnError>,
    pub close: Registry<OnClose>,
    pub transceiver: Registry<OnTransceiver<T>>,
    pub track: Registry<OnTrack<T>>,
}

impl<T: Transport> Default for Callbacks<T> {
    fn default() -> Self {
        Self {
            signal: SignalSlot::default(),
            connect: Registry::new(),
            data: Registry::new(),
            error: Registry::new(),
            close: Registry::new(),
            transceiver: Registry::new(),
            track: Registry::new(),
        }
    }
}

impl<T: Transport> Callbacks<T> {
    pub fn emit_connect(&self) {
        for handler in self.connect.snapshot() {
            tokio::spawn(async move { handler() });
        }
    }

    pub fn emit_close(&self) {
        for handler in self.close.snapshot() {
            tokio::spawn(async move { handler() });
        }
    }

    pub fn emit_data(&self, message: &ChannelMessage) {
        for handler in self.data.snapshot() {
            let message = message.clone();
            tokio::spawn(async move { handler(message) });
        }
    }

    pub fn emit_transceiver(&self, transceiver: &T::Transceiver) {
        for handler in self.transceiver.snapshot() {
            let transceiver = transceiver.clone();
            tokio::spawn(async move { handler(transceiver) });
        }
    }

    pub fn emit_track(&self, track: &T::RemoteTrack, receiver: &T::Receiver) {
        for handler in self.track.snapshot() {
            let track = track.clone();
            let receiver = receiver.clone();
            tokio::spawn(async move { handler(track, receiver) });
        }
    }

    /// Hands an error to the error handlers, or logs it when nobody listens.
    pub fn emit_error(&self, peer_id: &str, err: PeerError) {
        let handlers = self.error.snapshot();
        if handlers.is_empty() {
            error!(
                target = "transport_peer::callbacks",
                peer = %peer_id,
                error = %err,
                "unhandled peer error"
            );
            return;
        }
        let err = Arc::new(err);
        for handler in handlers {
            let err = Arc::clone(&err);
            tokio::spawn(async move { handler(err) });
        }
    }
}
