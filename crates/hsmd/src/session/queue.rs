//! Outbound queue: bounded FIFO between producers and the single writer.
//!
//! Producers are the per-message handlers and the status ticker. A full
//! queue suspends the producer until the writer drains an item; nothing is
//! dropped. When the writer tears down it closes the receiving half, which
//! fails every pending and future enqueue instead of leaving it parked.

use hsm_core::Envelope;
use thiserror::Error;
use tokio::sync::mpsc;

/// Create a queue holding at most `capacity` envelopes.
pub fn outbound_queue(capacity: usize) -> (OutboundQueue, OutboundReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (OutboundQueue { tx }, OutboundReceiver { rx })
}

#[derive(Debug, Error)]
#[error("outbound queue closed")]
pub struct QueueClosed;

/// Producer handle. Cheap to clone; the queue closes once every clone is gone.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    tx: mpsc::Sender<Envelope>,
}

impl OutboundQueue {
    /// Push `envelope`, waiting while the queue is full.
    pub async fn enqueue(&self, envelope: Envelope) -> Result<(), QueueClosed> {
        self.tx.send(envelope).await.map_err(|_| QueueClosed)
    }
}

/// Consumer half, owned by the writer loop.
#[derive(Debug)]
pub struct OutboundReceiver {
    rx: mpsc::Receiver<Envelope>,
}

impl OutboundReceiver {
    /// Next envelope in FIFO order, or `None` once all producers are gone and
    /// the queue is drained.
    pub async fn next(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Refuse further enqueues. Already-queued items are discarded on drop.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
