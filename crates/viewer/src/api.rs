//! Api — the backend's request/response endpoints.
//!
//! `POST /upload` and `POST /close_session` live here; the SSE endpoint is
//! only addressed (see [`ApiClient::stream_url`]) and consumed through an
//! `EventSource`.

use std::path::Path;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::Url;
use tracing::{debug, info, warn};

use crate::error::{ViewerError, ViewerResult};
use crate::model::{StreamFilter, UploadResponse};

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    request_timeout: Duration,
}

impl ApiClient {
    pub fn new(http: reqwest::Client, base_url: &str, request_timeout: Duration) -> ViewerResult<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| ViewerError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        // Url::join drops the last path segment unless the base ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            http,
            base_url,
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    fn endpoint(&self, path: &str) -> ViewerResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ViewerError::InvalidUrl(format!("{}: {}", path, e)))
    }

    /// Upload a log file from disk.
    pub async fn upload(&self, path: &Path) -> ViewerResult<UploadResponse> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.log".to_string());
        self.upload_bytes(&file_name, bytes).await
    }

    /// Upload log content as the single `file` part of a multipart body.
    pub async fn upload_bytes(&self, file_name: &str, bytes: Vec<u8>) -> ViewerResult<UploadResponse> {
        let size = bytes.len();
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("text/plain")?;
        let form = Form::new().part("file", part);

        info!(file = file_name, bytes = size, "Uploading log file");
        let response = self
            .http
            .post(self.endpoint("upload")?)
            .timeout(self.request_timeout)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "Upload rejected");
            return Err(ViewerError::UploadFailed(status));
        }

        let body = response.bytes().await?;
        let upload: UploadResponse = serde_json::from_slice(&body)?;
        info!(
            session_id = %upload.session_id,
            total_lines = upload.summary.total_lines,
            "Upload accepted"
        );
        Ok(upload)
    }

    /// Tell the backend the session is done. Best-effort: failures are
    /// logged and otherwise ignored.
    pub async fn close_session(&self, session_id: &str) {
        let url = match self.endpoint("close_session") {
            Ok(mut url) => {
                url.query_pairs_mut().append_pair("session_id", session_id);
                url
            }
            Err(e) => {
                warn!(session_id, error = %e, "Cannot build close_session URL");
                return;
            }
        };

        match self.http.post(url).timeout(self.request_timeout).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(session_id, "Session closed");
            }
            Ok(response) => {
                warn!(session_id, status = %response.status(), "close_session rejected");
            }
            Err(e) => {
                warn!(session_id, error = %e, "close_session failed");
            }
        }
    }

    /// URL of the filtered SSE stream for a session.
    pub fn stream_url(&self, session_id: &str, filter: &StreamFilter) -> ViewerResult<Url> {
        let mut url = self.endpoint("stream_logs")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("session_id", session_id);
            for (key, value) in filter.query_pairs() {
                query.append_pair(key, &value);
            }
        }
        Ok(url)
    }
}
