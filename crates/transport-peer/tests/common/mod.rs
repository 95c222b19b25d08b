#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, timeout};
use tracing_subscriber::{EnvFilter, fmt::SubscriberBuilder};

use transport_peer::transport::mock::MockConnector;
use transport_peer::{BoxError, Peer, PeerBuilder, SignalMessage};

pub const WAIT: Duration = Duration::from_secs(3);

pub fn init_tracing() {
    let _ = SubscriberBuilder::default()
        .with_test_writer()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Outgoing signals captured from a peer's signal handler.
pub struct SignalLog {
    rx: mpsc::UnboundedReceiver<SignalMessage>,
}

impl SignalLog {
    pub async fn next(&mut self) -> SignalMessage {
        timeout(WAIT, self.rx.recv())
            .await
            .expect("signal timed out")
            .expect("signal log closed")
    }

    /// Everything emitted so far, without waiting.
    pub fn drain(&mut self) -> Vec<SignalMessage> {
        let mut out = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            out.push(message);
        }
        out
    }
}

pub fn signal_log() -> (
    impl Fn(SignalMessage) -> Result<(), BoxError> + Send + Sync + 'static,
    SignalLog,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |message: SignalMessage| -> Result<(), BoxError> {
        tx.send(message).map_err(|err| err.to_string().into())
    };
    (handler, SignalLog { rx })
}

/// A peer on the mock transport with a capturing signal handler.
pub fn mock_peer(connector: &MockConnector, id: &str) -> (Peer<MockConnector>, SignalLog) {
    mock_builder_with(connector, id, |builder| builder)
}

pub fn mock_builder_with<F>(
    connector: &MockConnector,
    id: &str,
    configure: F,
) -> (Peer<MockConnector>, SignalLog)
where
    F: FnOnce(PeerBuilder<MockConnector>) -> PeerBuilder<MockConnector>,
{
    let (handler, log) = signal_log();
    let builder = Peer::builder(connector.clone())
        .id(id)
        .channel_label("app")
        .on_signal(handler);
    let peer = configure(builder).build().expect("build peer");
    (peer, log)
}

pub fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let handle = Arc::clone(&count);
    (count, move || {
        handle.fetch_add(1, Ordering::SeqCst);
    })
}

pub async fn eventually<F>(what: &str, check: F)
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + WAIT;
    while !check() {
        if Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        sleep(Duration::from_millis(10)).await;
    }
}

pub fn answer(sdp: &str) -> SignalMessage {
    SignalMessage::Answer { sdp: sdp.into() }
}

pub fn offer(sdp: &str) -> SignalMessage {
    SignalMessage::Offer { sdp: sdp.into() }
}
