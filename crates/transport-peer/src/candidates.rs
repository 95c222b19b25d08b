use parking_lot::Mutex;

use crate::signal::IceCandidate;

/// FIFO of ICE candidates that cannot be applied (or announced) yet because
/// no remote description exists.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: Mutex<Vec<IceCandidate>>,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, candidate: IceCandidate) {
        self.pending.lock().push(candidate);
    }

    /// Takes every buffered candidate in arrival order and leaves the buffer
    /// empty. Pushes racing with the drain land either in the returned batch
    /// or in the next one, never in both.
    pub fn drain(&self) -> Vec<IceCandidate> {
        std::mem::take(&mut *self.pending.lock())
    }

    pub fn clear(&self) {
        self.pending.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}
