//! Client — where log events come from.

pub mod fake;
pub mod live;
pub mod source;
pub mod sse;

pub use fake::{FakeEvent, FakeSource};
pub use live::LiveSource;
pub use source::{EventSource, EventStream};
pub use sse::{SseDecoder, SseEvent};
