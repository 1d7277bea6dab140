//! Source trait — abstract interface over a push stream of log events.
//!
//! The viewer only ever talks to an [`EventSource`]. `live.rs` provides the
//! reqwest-backed SSE implementation, `fake.rs` a scripted test double.

use std::future::Future;
use std::pin::Pin;

use futures::Stream;
use reqwest::Url;

use crate::client::sse::SseEvent;
use crate::error::ViewerResult;

/// Open connection yielding events until the server closes it or an error
/// occurs. Dropping the stream closes the connection.
pub type EventStream = Pin<Box<dyn Stream<Item = ViewerResult<SseEvent>> + Send>>;

/// Object-safe thanks to the boxed future, so it can live behind
/// `Arc<dyn EventSource>`.
pub trait EventSource: Send + Sync {
    fn connect<'a>(
        &'a self,
        url: &'a Url,
    ) -> Pin<Box<dyn Future<Output = ViewerResult<EventStream>> + Send + 'a>>;
}
