//! Client-side log viewer: uploads a log file to the analysis backend, then
//! follows its filtered SSE stream into a bounded buffer with incremental
//! search and a follow-tail view.

pub mod api;
pub mod buffer;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod parse;
pub mod search;
pub mod stream;
pub mod view;

pub use api::ApiClient;
pub use buffer::{LogBuffer, Snapshot};
pub use error::{ViewerError, ViewerResult};
pub use model::{Level, LogEntry, LogSummary, StreamFilter, UploadResponse};
pub use search::{SearchOptions, SearchOutcome, Searcher};
pub use stream::{ConnectionState, LogViewer, StreamOptions};
pub use view::TailView;
