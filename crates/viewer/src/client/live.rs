//! Live — implements `EventSource` over HTTP with reqwest.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::Url;
use tracing::debug;

use crate::client::source::{EventSource, EventStream};
use crate::client::sse::decode_stream;
use crate::error::{ViewerError, ViewerResult};

/// SSE source backed by a shared reqwest client.
///
/// reqwest clients are cheap to clone (Arc internally); the same client can
/// serve uploads and streams.
#[derive(Clone)]
pub struct LiveSource {
    http: reqwest::Client,
}

impl LiveSource {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Client suitable for long-lived streams: a connect timeout, but no
    /// overall request timeout that would cut the stream off.
    pub fn default_client(connect_timeout: Duration) -> ViewerResult<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?)
    }

    async fn open(&self, url: &Url) -> ViewerResult<EventStream> {
        debug!(url = %url, "Opening event stream");
        let response = self
            .http
            .get(url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ViewerError::StreamStatus(status));
        }

        let body = Box::pin(response.bytes_stream());
        Ok(Box::pin(decode_stream(body)))
    }
}

impl EventSource for LiveSource {
    fn connect<'a>(
        &'a self,
        url: &'a Url,
    ) -> Pin<Box<dyn Future<Output = ViewerResult<EventStream>> + Send + 'a>> {
        Box::pin(self.open(url))
    }
}
