//! In-memory doubles for both transports.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use url::Url;

use crate::traits::{ChannelConnector, ChannelError, ChannelMessage, ReliableChannel, TransportFault};

/// One end of an in-memory reliable channel.
pub struct MemoryChannel {
    tx: Option<mpsc::UnboundedSender<ChannelMessage>>,
    rx: mpsc::UnboundedReceiver<ChannelMessage>,
    close_reason: Arc<Mutex<Option<String>>>,
}

impl MemoryChannel {
    /// Create two connected ends. Closing either end ends the other's stream.
    pub fn pair() -> (MemoryChannel, MemoryChannel) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let reason = Arc::new(Mutex::new(None));
        (
            MemoryChannel {
                tx: Some(a_tx),
                rx: a_rx,
                close_reason: reason.clone(),
            },
            MemoryChannel {
                tx: Some(b_tx),
                rx: b_rx,
                close_reason: reason,
            },
        )
    }

    /// Reason passed to `close` by either end, if closed.
    pub fn close_reason(&self) -> Option<String> {
        self.close_reason.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    /// Stop accepting messages; the peer's sends fail from now on.
    pub fn refuse_inbound(&mut self) {
        self.rx.close();
    }

    /// Send text without going through the async trait.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), ChannelError> {
        let tx = self.tx.as_ref().ok_or(ChannelError::Disconnected)?;
        tx.send(ChannelMessage::Text(text.into()))
            .map_err(|_| ChannelError::Disconnected)
    }
}

#[async_trait]
impl ReliableChannel for MemoryChannel {
    async fn send(&mut self, message: ChannelMessage) -> Result<(), ChannelError> {
        let tx = self.tx.as_ref().ok_or(ChannelError::Disconnected)?;
        tx.send(message).map_err(|_| ChannelError::Disconnected)
    }

    async fn recv(&mut self) -> Option<Result<ChannelMessage, ChannelError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self, reason: &str) -> Result<(), ChannelError> {
        if self.tx.take().is_some() {
            self.close_reason.lock().get_or_insert_with(|| reason.to_string());
        }
        Ok(())
    }
}

/// Hands out pre-queued [`MemoryChannel`] ends and records requested URLs.
#[derive(Default)]
pub struct MemoryConnector {
    channels: Mutex<VecDeque<MemoryChannel>>,
    urls: Mutex<Vec<Url>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a channel end and return the peer end for the test to drive.
    pub fn expect_connection(&self) -> MemoryChannel {
        let (client, server) = MemoryChannel::pair();
        self.channels.lock().push_back(client);
        server
    }

    pub fn connected_urls(&self) -> Vec<Url> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl ChannelConnector for MemoryConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn ReliableChannel>, ChannelError> {
        self.urls.lock().push(url.clone());
        match self.channels.lock().pop_front() {
            Some(channel) => Ok(Box::new(channel)),
            None => Err(ChannelError::ConnectFailed(format!("no peer listening at {url}"))),
        }
    }
}

/// MTU-limited chunk link with optional simulated backpressure and failure.
#[derive(Debug)]
pub struct ChunkLink {
    mtu: usize,
    backpressure_every: Option<usize>,
    fail_after: Option<usize>,
    accepted: usize,
    paused_at: Option<usize>,
    delivered: VecDeque<Bytes>,
}

impl ChunkLink {
    pub fn new(mtu: usize) -> Self {
        Self {
            mtu,
            backpressure_every: None,
            fail_after: None,
            accepted: 0,
            paused_at: None,
            delivered: VecDeque::new(),
        }
    }

    /// Refuse one write after every `n` accepted writes.
    pub fn with_backpressure_every(mut self, n: usize) -> Self {
        self.backpressure_every = Some(n.max(1));
        self
    }

    /// Fail every write once `n` writes were accepted.
    pub fn with_failure_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub fn accepted(&self) -> usize {
        self.accepted
    }

    pub fn write(&mut self, chunk: Bytes) -> Result<(), TransportFault> {
        if self.fail_after.is_some_and(|n| self.accepted >= n) {
            return Err(TransportFault::WriteFailed("link failure".to_string()));
        }
        if chunk.len() > self.mtu {
            return Err(TransportFault::WriteFailed(format!(
                "chunk of {} bytes exceeds MTU {}",
                chunk.len(),
                self.mtu
            )));
        }
        if let Some(every) = self.backpressure_every {
            if self.accepted > 0 && self.accepted % every == 0 && self.paused_at != Some(self.accepted) {
                self.paused_at = Some(self.accepted);
                return Err(TransportFault::Backpressure);
            }
        }
        self.accepted += 1;
        self.delivered.push_back(chunk);
        Ok(())
    }

    /// Next chunk delivered to the far side.
    pub fn take_delivered(&mut self) -> Option<Bytes> {
        self.delivered.pop_front()
    }
}
