use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Stream ingestion metrics tracker
#[derive(Clone)]
pub struct StreamMetrics {
    inner: Arc<StreamMetricsInner>,
}

struct StreamMetricsInner {
    /// Connections successfully opened (lifetime)
    connections_opened: AtomicU64,

    /// Connection attempts that failed or ended in a transport error
    connections_failed: AtomicU64,

    /// Events received from the stream
    messages_received: AtomicU64,

    /// Events dropped because they carried no usable text
    messages_dropped: AtomicU64,

    /// Payload bytes received
    bytes_received: AtomicU64,

    /// Flushes that moved at least one entry
    flushes: AtomicU64,

    /// Entries evicted by capacity trimming
    lines_evicted: AtomicU64,

    /// Entries received per level name ("NONE" for unleveled lines)
    lines_per_level: RwLock<HashMap<String, u64>>,
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StreamMetricsInner {
                connections_opened: AtomicU64::new(0),
                connections_failed: AtomicU64::new(0),
                messages_received: AtomicU64::new(0),
                messages_dropped: AtomicU64::new(0),
                bytes_received: AtomicU64::new(0),
                flushes: AtomicU64::new(0),
                lines_evicted: AtomicU64::new(0),
                lines_per_level: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Called when a stream connection is established
    pub fn connection_opened(&self, url: &str) {
        self.inner.connections_opened.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            url = url,
            total = self.inner.connections_opened.load(Ordering::Relaxed),
            "Stream connection opened"
        );
    }

    /// Called when connecting fails or an open stream errors out
    pub fn connection_failed(&self) {
        self.inner.connections_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Called for every event received, usable or not
    pub fn message_received(&self, bytes: usize) {
        self.inner.messages_received.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Called when an event is discarded
    pub fn message_dropped(&self) {
        self.inner.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Called for every entry accepted into the pending queue
    pub fn line_accepted(&self, level: Option<&str>) {
        let mut per_level = self.inner.lines_per_level.write();
        *per_level.entry(level.unwrap_or("NONE").to_string()).or_insert(0) += 1;
    }

    /// Called after a non-empty flush
    pub fn flushed(&self, evicted: usize) {
        self.inner.flushes.fetch_add(1, Ordering::Relaxed);
        self.inner.lines_evicted.fetch_add(evicted as u64, Ordering::Relaxed);
    }

    pub fn connections_opened(&self) -> u64 {
        self.inner.connections_opened.load(Ordering::Relaxed)
    }

    pub fn connections_failed(&self) -> u64 {
        self.inner.connections_failed.load(Ordering::Relaxed)
    }

    pub fn messages_received(&self) -> u64 {
        self.inner.messages_received.load(Ordering::Relaxed)
    }

    pub fn messages_dropped(&self) -> u64 {
        self.inner.messages_dropped.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.inner.bytes_received.load(Ordering::Relaxed)
    }

    pub fn flushes(&self) -> u64 {
        self.inner.flushes.load(Ordering::Relaxed)
    }

    pub fn lines_evicted(&self) -> u64 {
        self.inner.lines_evicted.load(Ordering::Relaxed)
    }

    pub fn lines_by_level(&self) -> HashMap<String, u64> {
        self.inner.lines_per_level.read().clone()
    }

    /// Log current metrics summary
    pub fn log_summary(&self) {
        tracing::info!(
            connections_opened = self.connections_opened(),
            connections_failed = self.connections_failed(),
            messages_received = self.messages_received(),
            messages_dropped = self.messages_dropped(),
            bytes_received = self.bytes_received(),
            flushes = self.flushes(),
            lines_evicted = self.lines_evicted(),
            "Stream metrics summary"
        );

        for (level, count) in self.lines_by_level() {
            tracing::debug!(level = level, lines = count, "Lines per level");
        }
    }
}

impl Default for StreamMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = StreamMetrics::new();
        metrics.connection_opened("http://x");
        metrics.message_received(10);
        metrics.message_received(5);
        metrics.message_dropped();
        metrics.line_accepted(Some("ERROR"));
        metrics.line_accepted(None);
        metrics.line_accepted(Some("ERROR"));
        metrics.flushed(3);

        assert_eq!(metrics.connections_opened(), 1);
        assert_eq!(metrics.messages_received(), 2);
        assert_eq!(metrics.bytes_received(), 15);
        assert_eq!(metrics.messages_dropped(), 1);
        assert_eq!(metrics.flushes(), 1);
        assert_eq!(metrics.lines_evicted(), 3);
        let by_level = metrics.lines_by_level();
        assert_eq!(by_level["ERROR"], 2);
        assert_eq!(by_level["NONE"], 1);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = StreamMetrics::new();
        let clone = metrics.clone();
        clone.connection_failed();
        assert_eq!(metrics.connections_failed(), 1);
    }
}
