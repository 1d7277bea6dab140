//! Fake — scripted test double for event sources.
//!
//! Each call to `connect` consumes the next scripted connection. A script is
//! either a canned list of events (the stream ends after them) or a channel
//! the test pushes into. The fake also counts how many of its streams are
//! alive at once, which is how the one-connection-per-viewer invariant is
//! checked.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::Url;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::client::source::{EventSource, EventStream};
use crate::client::sse::SseEvent;
use crate::error::{ViewerError, ViewerResult};

/// One item delivered on a fake connection.
#[derive(Debug)]
pub enum FakeEvent {
    Data(String),
    /// Transport failure; the stream ends after it
    Error(String),
}

impl FakeEvent {
    pub fn data(data: impl Into<String>) -> Self {
        FakeEvent::Data(data.into())
    }
}

enum Script {
    Canned(Vec<FakeEvent>),
    Live(mpsc::Receiver<FakeEvent>),
    Refuse(String),
}

/// Tracks live connections; decremented when a stream is dropped.
struct ConnectionGuard {
    live: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Inner {
    scripts: VecDeque<Script>,
    urls: Vec<Url>,
}

/// A fake event source for deterministic testing.
#[derive(Clone, Default)]
pub struct FakeSource {
    inner: Arc<Mutex<Inner>>,
    live: Arc<AtomicUsize>,
    max_live: Arc<AtomicUsize>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a connection that delivers `events` and then ends.
    pub fn push_canned(&self, events: Vec<FakeEvent>) {
        self.inner.lock().scripts.push_back(Script::Canned(events));
    }

    /// Script a connection driven by the returned sender. The stream ends
    /// when the sender is dropped.
    pub fn push_channel(&self) -> mpsc::Sender<FakeEvent> {
        let (tx, rx) = mpsc::channel(1024);
        self.inner.lock().scripts.push_back(Script::Live(rx));
        tx
    }

    /// Script a connection attempt that fails outright.
    pub fn push_refusal(&self, reason: impl Into<String>) {
        self.inner.lock().scripts.push_back(Script::Refuse(reason.into()));
    }

    /// URLs connected to, in order.
    pub fn connected_urls(&self) -> Vec<Url> {
        self.inner.lock().urls.clone()
    }

    /// Streams currently alive.
    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of streams ever alive at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    fn open(&self, url: &Url) -> ViewerResult<EventStream> {
        let script = {
            let mut inner = self.inner.lock();
            inner.urls.push(url.clone());
            inner.scripts.pop_front()
        };

        let items: EventStream = match script {
            None => return Err(ViewerError::Transport(format!("no scripted connection for {}", url))),
            Some(Script::Refuse(reason)) => return Err(ViewerError::Transport(reason)),
            Some(Script::Canned(events)) => Box::pin(futures::stream::iter(events).map(to_item)),
            Some(Script::Live(rx)) => Box::pin(ReceiverStream::new(rx).map(to_item)),
        };

        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(now, Ordering::SeqCst);
        let guard = ConnectionGuard { live: Arc::clone(&self.live) };

        // The guard rides along inside the stream and drops with it. Errors
        // end the stream like a real transport failure would.
        let stream = items
            .scan(false, |failed, item| {
                if *failed {
                    return futures::future::ready(None);
                }
                *failed = item.is_err();
                futures::future::ready(Some(item))
            })
            .map(move |item| {
                let _guard = &guard;
                item
            });
        Ok(Box::pin(stream))
    }
}

fn to_item(event: FakeEvent) -> ViewerResult<SseEvent> {
    match event {
        FakeEvent::Data(data) => Ok(SseEvent { data, ..SseEvent::default() }),
        FakeEvent::Error(reason) => Err(ViewerError::Transport(reason)),
    }
}

impl EventSource for FakeSource {
    fn connect<'a>(
        &'a self,
        url: &'a Url,
    ) -> Pin<Box<dyn Future<Output = ViewerResult<EventStream>> + Send + 'a>> {
        Box::pin(async move { self.open(url) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("http://fake/stream_logs?session_id=s").unwrap()
    }

    #[tokio::test]
    async fn test_canned_connection() {
        let fake = FakeSource::new();
        fake.push_canned(vec![FakeEvent::data("a"), FakeEvent::data("b")]);

        let stream = fake.connect(&url()).await.unwrap();
        assert_eq!(fake.live_connections(), 1);
        let data: Vec<String> = stream.map(|e| e.unwrap().data).collect().await;
        assert_eq!(data, vec!["a", "b"]);
        // collect() consumed and dropped the stream
        assert_eq!(fake.live_connections(), 0);
        assert_eq!(fake.max_concurrent(), 1);
    }

    #[tokio::test]
    async fn test_error_ends_stream() {
        let fake = FakeSource::new();
        fake.push_canned(vec![
            FakeEvent::data("a"),
            FakeEvent::Error("reset".into()),
            FakeEvent::data("never"),
        ]);
        let items: Vec<_> = fake.connect(&url()).await.unwrap().collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn test_refusal_and_exhausted_script() {
        let fake = FakeSource::new();
        fake.push_refusal("connection refused");
        assert!(fake.connect(&url()).await.is_err());
        assert!(fake.connect(&url()).await.is_err());
        assert_eq!(fake.connected_urls().len(), 2);
        assert_eq!(fake.live_connections(), 0);
    }
}
