//! The framed transport seam consumed by the tunnel engine.
//!
//! A transmission carries whole frames, not a byte stream: one
//! `write_frame` on one end surfaces as exactly one `read_frame` on the
//! other. Encryption, framing, and obfuscation all live behind this trait;
//! the tunnel core only ever sees opaque frames.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// A framed, full-duplex message transport.
///
/// Implementations must be usable from several tasks at once: the tunnel
/// engine reads relay frames and writes keep-alive junk on the same
/// transmission concurrently.
#[async_trait]
pub trait Transmission: Send + Sync {
    /// Read the next frame. `None` or an empty frame means the transport
    /// is closed or failed; callers must not read again after that.
    async fn read_frame(&self) -> Option<Bytes>;

    /// Write one frame. Returns whether the write succeeded; `false`
    /// means the transport is closed or failed.
    async fn write_frame(&self, frame: Bytes) -> bool;

    /// Close the transport. Idempotent; wakes pending reads and writes.
    fn close(&self);
}

/// Frames buffered per direction before writers back off.
const CHANNEL_DEPTH: usize = 32;

/// An in-memory [`Transmission`] over paired frame queues.
///
/// [`pair`] yields two linked ends: frames written on one end are read on
/// the other. Closing either end closes both directions, matching how a
/// real transport tears down. Used by the tunnel tests and handy for
/// bridging two in-process endpoints.
pub struct ChannelTransmission {
    tx: mpsc::Sender<Bytes>,
    rx: Mutex<mpsc::Receiver<Bytes>>,
    closed: CancellationToken,
}

/// Create a linked pair of in-memory transmissions.
pub fn pair() -> (Arc<ChannelTransmission>, Arc<ChannelTransmission>) {
    let (a_tx, a_rx) = mpsc::channel(CHANNEL_DEPTH);
    let (b_tx, b_rx) = mpsc::channel(CHANNEL_DEPTH);
    let closed = CancellationToken::new();
    let a = ChannelTransmission {
        tx: a_tx,
        rx: Mutex::new(b_rx),
        closed: closed.clone(),
    };
    let b = ChannelTransmission {
        tx: b_tx,
        rx: Mutex::new(a_rx),
        closed,
    };
    (Arc::new(a), Arc::new(b))
}

#[async_trait]
impl Transmission for ChannelTransmission {
    async fn read_frame(&self) -> Option<Bytes> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => None,
            frame = rx.recv() => frame,
        }
    }

    async fn write_frame(&self, frame: Bytes) -> bool {
        tokio::select! {
            _ = self.closed.cancelled() => false,
            sent = self.tx.send(frame) => sent.is_ok(),
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }
}
