//! Stream — subscription lifecycle, ingestion and the flush scheduler.
//!
//! A [`LogViewer`] holds at most one subscription. Each subscription is one
//! task that owns the buffer, the pending queue and the connection; nothing
//! else touches them. Observers read [`Snapshot`]s and the
//! [`ConnectionState`] through `watch` channels.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::Url;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::{LogBuffer, Snapshot};
use crate::client::{EventSource, EventStream};
use crate::metrics::StreamMetrics;
use crate::parse::{parse_event, IndexAllocator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No subscription
    Idle,
    Connecting,
    Connected,
    /// Waiting to retry after a stream error
    Reconnecting { attempt: u32 },
    /// Stream ended or failed; a new subscription is needed
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub max_lines: usize,
    pub flush_interval: Duration,
    /// 0 = never reconnect on error
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            max_lines: 2000,
            flush_interval: Duration::from_millis(50),
            max_retries: 0,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

struct Subscription {
    url: Url,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Live, bounded view over one log stream at a time.
pub struct LogViewer {
    source: Arc<dyn EventSource>,
    options: StreamOptions,
    metrics: StreamMetrics,
    snapshot_tx: watch::Sender<Snapshot>,
    state_tx: watch::Sender<ConnectionState>,
    active: Option<Subscription>,
    epoch: u64,
}

impl LogViewer {
    pub fn new(source: Arc<dyn EventSource>, options: StreamOptions, metrics: StreamMetrics) -> Self {
        let (snapshot_tx, _) = watch::channel(Snapshot::default());
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            source,
            options,
            metrics,
            snapshot_tx,
            state_tx,
            active: None,
            epoch: 0,
        }
    }

    /// Point the viewer at `url`.
    ///
    /// Any existing subscription is torn down and awaited first, then the
    /// buffer is replaced by an empty one (published before any new entry
    /// can arrive) and a new connection is opened. Subscribing to the URL
    /// that is already active is a no-op.
    pub async fn subscribe(&mut self, url: Url) {
        if self.active.as_ref().is_some_and(|sub| sub.url == url) {
            debug!(url = %url, "Already subscribed");
            return;
        }

        self.teardown().await;

        self.epoch += 1;
        let buffer = LogBuffer::new(self.options.max_lines).with_epoch(self.epoch);
        self.snapshot_tx.send_replace(buffer.snapshot());
        self.state_tx.send_replace(ConnectionState::Connecting);

        info!(url = %url, epoch = self.epoch, "Subscribing to log stream");

        let cancel = CancellationToken::new();
        let ingest = Ingest {
            source: Arc::clone(&self.source),
            url: url.clone(),
            options: self.options.clone(),
            metrics: self.metrics.clone(),
            snapshot_tx: self.snapshot_tx.clone(),
            state_tx: self.state_tx.clone(),
            cancel: cancel.clone(),
            buffer,
            indices: IndexAllocator::new(),
        };
        let task = tokio::spawn(ingest.run());

        self.active = Some(Subscription { url, cancel, task });
    }

    /// Close the current subscription. The last snapshot stays readable.
    pub async fn unsubscribe(&mut self) {
        self.teardown().await;
        self.state_tx.send_replace(ConnectionState::Idle);
    }

    async fn teardown(&mut self) {
        if let Some(sub) = self.active.take() {
            debug!(url = %sub.url, "Tearing down subscription");
            sub.cancel.cancel();
            if let Err(e) = sub.task.await {
                if e.is_panic() {
                    warn!(url = %sub.url, "Subscription task panicked");
                }
            }
        }
    }

    /// Wait until the current subscription's task has finished on its own
    /// (stream ended or failed for good).
    pub async fn finished(&self) {
        let mut states = self.state_tx.subscribe();
        // Err only if the sender is gone, which can't happen while self lives
        let _ = states
            .wait_for(|s| matches!(s, ConnectionState::Disconnected | ConnectionState::Idle))
            .await;
    }

    pub fn url(&self) -> Option<&Url> {
        self.active.as_ref().map(|sub| &sub.url)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Receiver notified on every flush and reset.
    pub fn snapshots(&self) -> watch::Receiver<Snapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn states(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn metrics(&self) -> &StreamMetrics {
        &self.metrics
    }
}

impl Drop for LogViewer {
    fn drop(&mut self) {
        if let Some(sub) = self.active.take() {
            sub.cancel.cancel();
            sub.task.abort();
        }
    }
}

/// How one connection ended.
enum StreamEnd {
    Cancelled,
    Closed,
    Failed(String),
}

/// State owned by a subscription task.
struct Ingest {
    source: Arc<dyn EventSource>,
    url: Url,
    options: StreamOptions,
    metrics: StreamMetrics,
    snapshot_tx: watch::Sender<Snapshot>,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    buffer: LogBuffer,
    indices: IndexAllocator,
}

impl Ingest {
    async fn run(mut self) {
        let mut attempt = 0u32;

        loop {
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = self.source.connect(&self.url) => result,
            };

            let end = match connected {
                Ok(events) => {
                    attempt = 0;
                    self.metrics.connection_opened(self.url.as_str());
                    self.state_tx.send_replace(ConnectionState::Connected);
                    info!(url = %self.url, "Log stream connected");
                    self.pump(events).await
                }
                Err(e) => StreamEnd::Failed(e.to_string()),
            };

            match end {
                StreamEnd::Cancelled => return,
                StreamEnd::Closed => {
                    info!(url = %self.url, lines = self.buffer.len(), "Log stream closed by server");
                    self.state_tx.send_replace(ConnectionState::Disconnected);
                    return;
                }
                StreamEnd::Failed(reason) => {
                    self.metrics.connection_failed();
                    if attempt >= self.options.max_retries {
                        warn!(url = %self.url, error = %reason, "Log stream failed");
                        self.state_tx.send_replace(ConnectionState::Disconnected);
                        return;
                    }
                    attempt += 1;
                    warn!(
                        url = %self.url,
                        error = %reason,
                        attempt,
                        max_retries = self.options.max_retries,
                        "Log stream failed, retrying"
                    );
                    self.state_tx.send_replace(ConnectionState::Reconnecting { attempt });
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = time::sleep(self.options.retry_backoff) => {}
                    }
                }
            }
        }
    }

    /// Read events until the stream ends, flushing on every tick. The timer
    /// lives only as long as this call, so it stops with the connection.
    async fn pump(&mut self, mut events: EventStream) -> StreamEnd {
        let mut ticker = time::interval(self.options.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let end = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return StreamEnd::Cancelled,
                _ = ticker.tick() => self.flush(),
                next = events.next() => match next {
                    Some(Ok(event)) => self.ingest(&event.data),
                    Some(Err(e)) => break StreamEnd::Failed(e.to_string()),
                    None => break StreamEnd::Closed,
                },
            }
        };

        // Close the connection before the final flush
        drop(events);
        self.flush();
        end
    }

    fn ingest(&mut self, data: &str) {
        self.metrics.message_received(data.len());
        match parse_event(data, &mut self.indices) {
            Some(entry) => {
                self.metrics.line_accepted(entry.level.map(|l| l.as_str()));
                self.buffer.enqueue(entry);
            }
            None => {
                self.metrics.message_dropped();
                debug!(bytes = data.len(), "Dropping event without usable text");
            }
        }
    }

    fn flush(&mut self) {
        if let Some(stats) = self.buffer.flush() {
            self.metrics.flushed(stats.evicted);
            self.snapshot_tx.send_replace(self.buffer.snapshot());
        }
    }
}
