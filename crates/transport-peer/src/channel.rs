use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tracing::trace;

use crate::config::CONTROL_CHANNEL_LABEL;
use crate::error::{PeerError, PeerResult};
use crate::transport::Channel;

/// Which of the peer's channels an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    Application,
    Control,
    Unknown,
}

/// The application channel, the optional control channel and the state that
/// hangs off them.
pub struct ChannelSet<C: Channel> {
    app: RwLock<Option<Arc<C>>>,
    control: RwLock<Option<Arc<C>>>,
    ready: AtomicBool,
    ready_tx: watch::Sender<bool>,
    taps: Mutex<Vec<mpsc::UnboundedSender<Bytes>>>,
}

impl<C: Channel> Default for ChannelSet<C> {
    fn default() -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            app: RwLock::new(None),
            control: RwLock::new(None),
            ready: AtomicBool::new(false),
            ready_tx,
            taps: Mutex::new(Vec::new()),
        }
    }
}

impl<C: Channel> ChannelSet<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn app(&self) -> Option<Arc<C>> {
        self.app.read().clone()
    }

    pub fn control(&self) -> Option<Arc<C>> {
        self.control.read().clone()
    }

    pub fn set_app(&self, channel: Arc<C>) {
        *self.app.write() = Some(channel);
    }

    pub fn set_control(&self, channel: Arc<C>) {
        *self.control.write() = Some(channel);
    }

    /// Stores a channel offered by the remote side. The reserved label always
    /// becomes the control channel.
    pub fn adopt(&self, channel: Arc<C>) -> ChannelRole {
        if channel.label() == CONTROL_CHANNEL_LABEL {
            self.set_control(channel);
            ChannelRole::Control
        } else {
            self.set_app(channel);
            ChannelRole::Application
        }
    }

    pub fn role(&self, label: &str) -> ChannelRole {
        let matches = |slot: &RwLock<Option<Arc<C>>>| {
            slot.read()
                .as_ref()
                .is_some_and(|channel| channel.label() == label)
        };
        if matches(&self.control) {
            ChannelRole::Control
        } else if matches(&self.app) {
            ChannelRole::Application
        } else {
            ChannelRole::Unknown
        }
    }

    /// Removes both channels and drops the ready flag.
    pub fn take(&self) -> (Option<Arc<C>>, Option<Arc<C>>) {
        self.set_ready(false);
        (self.app.write().take(), self.control.write().take())
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
        self.ready_tx.send_replace(ready);
    }

    /// Resolves once the control channel is open.
    pub async fn wait_ready(&self) {
        let mut rx = self.ready_tx.subscribe();
        // the sender lives as long as `self`, so this cannot fail while borrowed
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// The control channel, if it is currently usable for signaling.
    pub fn ready_control(&self) -> Option<Arc<C>> {
        if self.is_ready() { self.control() } else { None }
    }

    pub fn add_tap(&self) -> mpsc::UnboundedReceiver<Bytes> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.taps.lock().push(tx);
        rx
    }

    /// Forwards application bytes to every attached reader, detaching the
    /// ones that went away.
    pub fn feed_taps(&self, data: &Bytes) {
        self.taps.lock().retain(|tap| tap.send(data.clone()).is_ok());
    }

    /// Ends every attached reader.
    pub fn close_taps(&self) {
        self.taps.lock().clear();
    }

    pub fn tap_count(&self) -> usize {
        self.taps.lock().len()
    }
}

/// Sends `data` in slices of at most `max` bytes, in order.
pub async fn write_chunked<C: Channel>(channel: &C, data: &[u8], max: usize) -> PeerResult<usize> {
    let max = max.max(1);
    let mut sent = 0;
    for chunk in data.chunks(max) {
        let written = channel
            .send(Bytes::copy_from_slice(chunk))
            .await
            .map_err(|source| PeerError::Write { sent, source })?;
        sent += written;
        trace!(
            target = "transport_peer::channel",
            label = channel.label(),
            chunk = chunk.len(),
            sent,
            "wrote chunk"
        );
    }
    Ok(sent)
}

/// Text variant of [`write_chunked`]; chunk boundaries never split a
/// character, so a chunk may exceed `max` only when a single character does.
pub async fn write_text_chunked<C: Channel>(
    channel: &C,
    text: &str,
    max: usize,
) -> PeerResult<usize> {
    let mut sent = 0;
    for chunk in text_chunks(text, max.max(1)) {
        let written = channel
            .send_text(chunk.to_string())
            .await
            .map_err(|source| PeerError::Write { sent, source })?;
        sent += written;
    }
    Ok(sent)
}

fn text_chunks(text: &str, max: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let mut end = (start + max).min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            end = start
                + text[start..]
                    .chars()
                    .next()
                    .map(char::len_utf8)
                    .unwrap_or(1);
        }
        chunks.push(&text[start..end]);
        start = end;
    }
    chunks
}
