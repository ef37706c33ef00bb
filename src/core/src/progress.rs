//! Progress reporting for transfer operations.
//!
//! Operations push `(bytes_transferred, total)` updates into a write-only
//! sink; consumers receive them over an unbounded channel. A missing sink
//! costs nothing.

use std::sync::Arc;

use tokio::sync::mpsc;

/// A single progress update emitted during push or pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Bytes processed so far (uncompressed).
    pub bytes_transferred: u64,
    /// Total bytes the operation will process (uncompressed).
    pub total: u64,
}

/// Write-only progress sink.
#[derive(Clone)]
pub struct ProgressSink {
    sender: Arc<mpsc::UnboundedSender<ProgressUpdate>>,
}

impl ProgressSink {
    /// Create a sink and the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Arc::new(sender),
            },
            receiver,
        )
    }

    /// Send an update. A dropped receiver is ignored.
    pub fn send(&self, bytes_transferred: u64, total: u64) {
        let _ = self.sender.send(ProgressUpdate {
            bytes_transferred,
            total,
        });
    }
}
