use thiserror::Error;

/// Error returned by an application-supplied outgoing signal handler.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type PeerResult<T> = Result<T, PeerError>;

/// Failures reported by a transport primitive implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport setup failed: {0}")]
    Setup(String),
    #[error("transport operation failed: {0}")]
    Operation(String),
    #[error("channel closed")]
    ChannelClosed,
    #[error("no remote description")]
    NoRemoteDescription,
}

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("connection not initialized")]
    ConnectionNotInitialized,
    #[error("invalid signal message type")]
    InvalidSignalMessageType,
    #[error("invalid signal message: {0}")]
    InvalidSignalMessage(String),
    #[error("invalid signal state: {0}")]
    InvalidSignalState(&'static str),
    #[error("no signal handler registered")]
    SignalHandlerMissing,
    #[error("signal handler failed: {0}")]
    SignalHandler(#[source] BoxError),
    #[error("failed to encode signal message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("channel write failed after {sent} bytes: {source}")]
    Write {
        sent: usize,
        #[source]
        source: TransportError,
    },
    #[error("{}", join_messages(.0))]
    Multiple(Vec<PeerError>),
    #[error("invalid peer configuration: {0}")]
    Config(String),
}

impl PeerError {
    /// Folds a list of failures into a single result: `Ok` when empty, the
    /// error itself when there is exactly one, `Multiple` otherwise.
    pub fn join(mut errors: Vec<PeerError>) -> PeerResult<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(PeerError::Multiple(errors)),
        }
    }

    /// Flattened view of the failures carried by this error.
    pub fn causes(&self) -> Vec<&PeerError> {
        match self {
            PeerError::Multiple(errors) => errors.iter().flat_map(PeerError::causes).collect(),
            other => vec![other],
        }
    }
}

fn join_messages(errors: &[PeerError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
